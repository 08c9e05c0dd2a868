//! Encode and decode [`Structure`] values.
//!
//! Integers are written big-endian. A length override narrower than the
//! native width keeps only the low-order bytes of the value; the high-order
//! bits are dropped without error. Byte sequences are written raw, so the
//! receiver must know their length from the schema: either through a length
//! override or by being the last field, in which case decoding takes every
//! remaining byte.

use bytes::{Buf, BufMut, Bytes, BytesMut};
use tracing::trace;

use crate::error::CodecError;
use crate::schema::{validate_schema, FieldKind, FieldValue, Structure};
use crate::{Result, LOG_TARGET};

/// Encode all fields of `value` in schema order.
pub fn encode<T: Structure>(value: &T) -> Result<Bytes> {
    validate_schema::<T>()?;
    let mut buf = BytesMut::new();

    for (index, field) in T::FIELDS.iter().enumerate() {
        match (field.kind, value.field(index)) {
            (FieldKind::Uint(_), FieldValue::Uint(v)) => {
                let width = field.uint_width(value)?;
                buf.put_uint(v, width);
            }
            (FieldKind::Bytes, FieldValue::Bytes(b)) => {
                trace!(target: LOG_TARGET, "Encoding array length={}", b.len());
                buf.put_slice(b);
            }
            _ => return Err(CodecError::UnsupportedField { field: field.name }),
        }
    }

    trace!(target: LOG_TARGET, "Total encoded length = {}", buf.len());
    Ok(buf.freeze())
}

/// Decode a `T` from the front of `data`.
///
/// Returns the value and the number of bytes consumed.
pub fn decode<T: Structure>(data: &[u8]) -> Result<(T, usize)> {
    validate_schema::<T>()?;
    let mut value = T::default();
    let mut buf = data;

    for (index, field) in T::FIELDS.iter().enumerate() {
        match field.kind {
            FieldKind::Uint(_) => {
                let width = field.uint_width(&value)?;
                ensure_remaining(field.name, buf, width)?;
                let v = buf.get_uint(width);
                value.set_field(index, FieldValue::Uint(v))?;
            }
            FieldKind::Bytes => {
                let len = match field.length {
                    Some(length) => length(&value),
                    None => buf.len(),
                };
                ensure_remaining(field.name, buf, len)?;
                let (head, tail) = buf.split_at(len);
                buf = tail;
                value.set_field(index, FieldValue::Bytes(head))?;
            }
        }
    }

    Ok((value, data.len() - buf.len()))
}

fn ensure_remaining(field: &'static str, buf: &[u8], needed: usize) -> Result<()> {
    if buf.len() < needed {
        return Err(CodecError::ShortBuffer {
            field,
            needed,
            remaining: buf.len(),
        });
    }
    Ok(())
}

/// A schema-less argument for [`encode_args`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Arg<'a> {
    U8(u8),
    U16(u16),
    U32(u32),
    U64(u64),
    Bytes(&'a [u8]),
}

/// Concatenate native-width integers and raw byte slices.
pub fn encode_args(args: &[Arg<'_>]) -> Bytes {
    let mut buf = BytesMut::new();
    for arg in args {
        match *arg {
            Arg::U8(v) => buf.put_u8(v),
            Arg::U16(v) => buf.put_u16(v),
            Arg::U32(v) => buf.put_u32(v),
            Arg::U64(v) => buf.put_u64(v),
            Arg::Bytes(b) => buf.put_slice(b),
        }
    }
    buf.freeze()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::FieldDescriptor;

    #[derive(Debug, Default, PartialEq)]
    struct Header {
        kind: u8,
        seq: u16,
        offset: u32,
        token: u64,
        body: Vec<u8>,
    }

    impl Structure for Header {
        const FIELDS: &'static [FieldDescriptor<Self>] = &[
            FieldDescriptor::uint("kind", 1),
            FieldDescriptor::uint("seq", 2),
            FieldDescriptor::uint("offset", 4),
            FieldDescriptor::uint("token", 8),
            FieldDescriptor::bytes("body"),
        ];

        fn field(&self, index: usize) -> FieldValue<'_> {
            match index {
                0 => FieldValue::Uint(self.kind.into()),
                1 => FieldValue::Uint(self.seq.into()),
                2 => FieldValue::Uint(self.offset.into()),
                3 => FieldValue::Uint(self.token),
                _ => FieldValue::Bytes(&self.body),
            }
        }

        fn set_field(&mut self, index: usize, value: FieldValue<'_>) -> Result<()> {
            match index {
                0 => self.kind = value.uint("kind")? as u8,
                1 => self.seq = value.uint("seq")? as u16,
                2 => self.offset = value.uint("offset")? as u32,
                3 => self.token = value.uint("token")?,
                _ => self.body = value.bytes("body")?.to_vec(),
            }
            Ok(())
        }
    }

    #[derive(Debug, Default, PartialEq)]
    struct Narrow {
        value: u32,
        width: usize,
    }

    fn narrow_width(n: &Narrow) -> usize {
        n.width
    }

    impl Structure for Narrow {
        const FIELDS: &'static [FieldDescriptor<Self>] =
            &[FieldDescriptor::uint("value", 4).with_length(narrow_width)];

        fn field(&self, _index: usize) -> FieldValue<'_> {
            FieldValue::Uint(self.value.into())
        }

        fn set_field(&mut self, _index: usize, value: FieldValue<'_>) -> Result<()> {
            self.value = value.uint("value")? as u32;
            Ok(())
        }
    }

    #[derive(Debug, Default, PartialEq)]
    struct Tail {
        id: u16,
        rest: Vec<u8>,
    }

    impl Structure for Tail {
        const FIELDS: &'static [FieldDescriptor<Self>] = &[
            FieldDescriptor::uint("id", 2),
            FieldDescriptor::bytes("rest"),
        ];

        fn field(&self, index: usize) -> FieldValue<'_> {
            match index {
                0 => FieldValue::Uint(self.id.into()),
                _ => FieldValue::Bytes(&self.rest),
            }
        }

        fn set_field(&mut self, index: usize, value: FieldValue<'_>) -> Result<()> {
            match index {
                0 => self.id = value.uint("id")? as u16,
                _ => self.rest = value.bytes("rest")?.to_vec(),
            }
            Ok(())
        }
    }

    #[derive(Debug, Default, PartialEq)]
    struct Prefixed {
        len: u8,
        data: Vec<u8>,
        trailer: u8,
    }

    fn prefixed_len(p: &Prefixed) -> usize {
        p.len as usize
    }

    impl Structure for Prefixed {
        const FIELDS: &'static [FieldDescriptor<Self>] = &[
            FieldDescriptor::uint("len", 1),
            FieldDescriptor::bytes("data").with_length(prefixed_len),
            FieldDescriptor::uint("trailer", 1),
        ];

        fn field(&self, index: usize) -> FieldValue<'_> {
            match index {
                0 => FieldValue::Uint(self.len.into()),
                1 => FieldValue::Bytes(&self.data),
                _ => FieldValue::Uint(self.trailer.into()),
            }
        }

        fn set_field(&mut self, index: usize, value: FieldValue<'_>) -> Result<()> {
            match index {
                0 => self.len = value.uint("len")? as u8,
                1 => self.data = value.bytes("data")?.to_vec(),
                _ => self.trailer = value.uint("trailer")? as u8,
            }
            Ok(())
        }
    }

    #[derive(Debug, Default)]
    struct UnboundedFirst {
        data: Vec<u8>,
        trailer: u8,
    }

    impl Structure for UnboundedFirst {
        const FIELDS: &'static [FieldDescriptor<Self>] = &[
            FieldDescriptor::bytes("data"),
            FieldDescriptor::uint("trailer", 1),
        ];

        fn field(&self, index: usize) -> FieldValue<'_> {
            match index {
                0 => FieldValue::Bytes(&self.data),
                _ => FieldValue::Uint(self.trailer.into()),
            }
        }

        fn set_field(&mut self, _index: usize, _value: FieldValue<'_>) -> Result<()> {
            Ok(())
        }
    }

    #[derive(Debug, Default)]
    struct ThreeByte {
        value: u32,
    }

    impl Structure for ThreeByte {
        const FIELDS: &'static [FieldDescriptor<Self>] = &[FieldDescriptor::uint("value", 3)];

        fn field(&self, _index: usize) -> FieldValue<'_> {
            FieldValue::Uint(self.value.into())
        }

        fn set_field(&mut self, _index: usize, _value: FieldValue<'_>) -> Result<()> {
            Ok(())
        }
    }

    #[derive(Debug, Default)]
    struct Mismatched;

    impl Structure for Mismatched {
        const FIELDS: &'static [FieldDescriptor<Self>] = &[FieldDescriptor::uint("value", 2)];

        fn field(&self, _index: usize) -> FieldValue<'_> {
            FieldValue::Bytes(&[1, 2])
        }

        fn set_field(&mut self, _index: usize, value: FieldValue<'_>) -> Result<()> {
            value.bytes("value").map(|_| ())
        }
    }

    #[test]
    fn round_trip_all_widths() {
        let header = Header {
            kind: 0x7f,
            seq: 0xbeef,
            offset: 0x0102_0304,
            token: 0x1122_3344_5566_7788,
            body: b"payload".to_vec(),
        };
        let bytes = encode(&header).unwrap();
        assert_eq!(bytes.len(), 1 + 2 + 4 + 8 + 7);
        assert_eq!(&bytes[..3], &[0x7f, 0xbe, 0xef]);

        let (decoded, consumed) = decode::<Header>(&bytes).unwrap();
        assert_eq!(decoded, header);
        assert_eq!(consumed, bytes.len());
    }

    #[test]
    fn narrowing_override_keeps_low_order_bytes() {
        let value = Narrow {
            value: 0x1234_5678,
            width: 2,
        };
        assert_eq!(&encode(&value).unwrap()[..], &[0x56, 0x78]);
    }

    #[test]
    fn zero_width_override_emits_nothing() {
        let value = Narrow {
            value: 0xffff_ffff,
            width: 0,
        };
        assert!(encode(&value).unwrap().is_empty());
    }

    #[test]
    fn override_wider_than_native_is_rejected() {
        let value = Narrow {
            value: 1,
            width: 8,
        };
        assert_eq!(
            encode(&value),
            Err(CodecError::LengthOverflow {
                field: "value",
                requested: 8,
                native: 4,
            })
        );
    }

    #[test]
    fn short_buffer_is_rejected() {
        let err = decode::<Tail>(&[0x01]).unwrap_err();
        assert_eq!(
            err,
            CodecError::ShortBuffer {
                field: "id",
                needed: 2,
                remaining: 1,
            }
        );
    }

    #[test]
    fn unbounded_tail_takes_remaining_bytes() {
        let (tail, consumed) = decode::<Tail>(&[0x00, 0x01, 0xaa, 0xbb, 0xcc]).unwrap();
        assert_eq!(tail.id, 1);
        assert_eq!(tail.rest, vec![0xaa, 0xbb, 0xcc]);
        assert_eq!(consumed, 5);
    }

    #[test]
    fn unbounded_tail_may_be_empty() {
        let (tail, consumed) = decode::<Tail>(&[0x00, 0x02]).unwrap();
        assert_eq!(tail.id, 2);
        assert!(tail.rest.is_empty());
        assert_eq!(consumed, 2);
    }

    #[test]
    fn bytes_override_reads_earlier_fields() {
        let wire = [0x02, 0xde, 0xad, 0x09, 0xff];
        let (decoded, consumed) = decode::<Prefixed>(&wire).unwrap();
        assert_eq!(
            decoded,
            Prefixed {
                len: 2,
                data: vec![0xde, 0xad],
                trailer: 9,
            }
        );
        assert_eq!(consumed, 4);
    }

    #[test]
    fn bytes_override_short_buffer() {
        let err = decode::<Prefixed>(&[0x05, 0x01]).unwrap_err();
        assert_eq!(
            err,
            CodecError::ShortBuffer {
                field: "data",
                needed: 5,
                remaining: 1,
            }
        );
    }

    #[test]
    fn unbounded_field_must_be_last() {
        let value = UnboundedFirst {
            data: vec![1],
            trailer: 2,
        };
        assert_eq!(
            encode(&value),
            Err(CodecError::InvalidSchema { field: "data" })
        );
        assert!(matches!(
            decode::<UnboundedFirst>(&[1, 2]),
            Err(CodecError::InvalidSchema { field: "data" })
        ));
    }

    #[test]
    fn unsupported_width_is_rejected() {
        assert_eq!(
            encode(&ThreeByte { value: 1 }),
            Err(CodecError::UnsupportedField { field: "value" })
        );
        assert!(matches!(
            decode::<ThreeByte>(&[0, 0, 1]),
            Err(CodecError::UnsupportedField { field: "value" })
        ));
    }

    #[test]
    fn value_kind_must_match_descriptor() {
        assert_eq!(
            encode(&Mismatched),
            Err(CodecError::UnsupportedField { field: "value" })
        );
    }

    #[test]
    fn encode_args_concatenates_native_widths() {
        let bytes = encode_args(&[
            Arg::U8(1),
            Arg::U16(0x0203),
            Arg::U32(0x0405_0607),
            Arg::Bytes(&[0xaa]),
        ]);
        assert_eq!(&bytes[..], &[1, 2, 3, 4, 5, 6, 7, 0xaa]);
        assert_eq!(encode_args(&[Arg::U64(1)]).len(), 8);
    }
}
