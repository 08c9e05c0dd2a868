//! Field descriptors and the [`Structure`] trait.

use crate::error::CodecError;
use crate::Result;

/// Computes the encoded byte length of one field from the owning structure.
pub type LengthFn<T> = fn(&T) -> usize;

/// Element kind of a field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldKind {
    /// Unsigned integer with the given native width in bytes.
    Uint(usize),
    /// Raw byte sequence, no length prefix.
    Bytes,
}

/// One element of a wire schema.
pub struct FieldDescriptor<T: 'static> {
    pub name: &'static str,
    pub kind: FieldKind,
    pub length: Option<LengthFn<T>>,
}

impl<T: 'static> FieldDescriptor<T> {
    /// An unsigned integer field of `width` bytes.
    pub const fn uint(name: &'static str, width: usize) -> Self {
        Self {
            name,
            kind: FieldKind::Uint(width),
            length: None,
        }
    }

    /// A byte-sequence field.
    pub const fn bytes(name: &'static str) -> Self {
        Self {
            name,
            kind: FieldKind::Bytes,
            length: None,
        }
    }

    /// Attach a length override to this field.
    pub const fn with_length(self, length: LengthFn<T>) -> Self {
        Self {
            name: self.name,
            kind: self.kind,
            length: Some(length),
        }
    }

    /// Width of an integer field after applying the override, if any.
    pub(crate) fn uint_width(&self, value: &T) -> Result<usize> {
        let FieldKind::Uint(native) = self.kind else {
            return Err(CodecError::UnsupportedField { field: self.name });
        };
        if !matches!(native, 1 | 2 | 4 | 8) {
            return Err(CodecError::UnsupportedField { field: self.name });
        }
        match self.length {
            Some(length) => {
                let requested = length(value);
                if requested > native {
                    return Err(CodecError::LengthOverflow {
                        field: self.name,
                        requested,
                        native,
                    });
                }
                Ok(requested)
            }
            None => Ok(native),
        }
    }
}

/// A borrowed field value, as read from or written into a structure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldValue<'a> {
    Uint(u64),
    Bytes(&'a [u8]),
}

impl<'a> FieldValue<'a> {
    /// Unwrap an integer value, or fail with `UnsupportedField`.
    pub fn uint(self, field: &'static str) -> Result<u64> {
        match self {
            FieldValue::Uint(v) => Ok(v),
            FieldValue::Bytes(_) => Err(CodecError::UnsupportedField { field }),
        }
    }

    /// Unwrap a byte-sequence value, or fail with `UnsupportedField`.
    pub fn bytes(self, field: &'static str) -> Result<&'a [u8]> {
        match self {
            FieldValue::Bytes(b) => Ok(b),
            FieldValue::Uint(_) => Err(CodecError::UnsupportedField { field }),
        }
    }
}

/// A fixed-order wire structure.
///
/// `FIELDS` is the schema; `field` and `set_field` address fields by their
/// position in it. Decoding starts from `Default::default()` and fills
/// fields in order, so a length override may read any field declared before
/// the one it belongs to.
pub trait Structure: Default + 'static {
    const FIELDS: &'static [FieldDescriptor<Self>];

    fn field(&self, index: usize) -> FieldValue<'_>;

    fn set_field(&mut self, index: usize, value: FieldValue<'_>) -> Result<()>;
}

/// Check that every field kind is supported and that an unbounded
/// byte-sequence field, if any, is the last one.
pub fn validate_schema<T: Structure>() -> Result<()> {
    let last = T::FIELDS.len().saturating_sub(1);
    for (index, field) in T::FIELDS.iter().enumerate() {
        match field.kind {
            FieldKind::Uint(1 | 2 | 4 | 8) => {}
            FieldKind::Uint(_) => {
                return Err(CodecError::UnsupportedField { field: field.name });
            }
            FieldKind::Bytes => {
                if field.length.is_none() && index != last {
                    return Err(CodecError::InvalidSchema { field: field.name });
                }
            }
        }
    }
    Ok(())
}
