//! Address signaling frames.
//!
//! Wire layout (after the one-byte frame type):
//! - `ADDR_ARRAY`: endpoint entries back to back, no count; the entries run
//!   to the end of the frame.
//! - `ADDR_MOD`: one op byte (`0` add, `1` delete) and one endpoint entry.
//!
//! An endpoint entry is `family (1) | ip (4 or 16) | port (2)`, where the ip
//! width follows from the family byte.

use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};

use braid_codec::{decode, encode, encode_args, Arg, CodecError, FieldDescriptor, FieldValue, Structure};
use bytes::Bytes;

use crate::error::Error;
use crate::Result;

pub const FRAME_TYPE_ADDR_ARRAY: u8 = 0x30;
pub const FRAME_TYPE_ADDR_MOD: u8 = 0x31;

const FAMILY_V4: u8 = 4;
const FAMILY_V6: u8 = 6;

/// Kind of a single address change.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum AddrOp {
    Add = 0,
    Delete = 1,
}

impl TryFrom<u8> for AddrOp {
    type Error = Error;

    fn try_from(value: u8) -> Result<Self> {
        match value {
            0 => Ok(AddrOp::Add),
            1 => Ok(AddrOp::Delete),
            other => Err(Error::Frame(format!("unknown address operation {}", other))),
        }
    }
}

/// A control frame describing local address state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    /// Every currently known local address.
    AddrArray { addresses: Vec<SocketAddr> },
    /// One added or removed local address.
    AddrMod { op: AddrOp, address: SocketAddr },
}

/// Snapshot `addresses` into one `AddrArray` frame.
pub fn build_addr_array_frame(addresses: impl IntoIterator<Item = SocketAddr>) -> Frame {
    Frame::AddrArray {
        addresses: addresses.into_iter().collect(),
    }
}

/// Wrap a single address event.
pub fn build_addr_mod_frame(op: AddrOp, address: SocketAddr) -> Frame {
    Frame::AddrMod { op, address }
}

impl Frame {
    pub fn frame_type(&self) -> u8 {
        match self {
            Frame::AddrArray { .. } => FRAME_TYPE_ADDR_ARRAY,
            Frame::AddrMod { .. } => FRAME_TYPE_ADDR_MOD,
        }
    }

    /// Serialize the frame, type byte included.
    pub fn encode(&self) -> Result<Bytes> {
        let payload = match self {
            Frame::AddrArray { addresses } => {
                let mut payload = Vec::new();
                for address in addresses {
                    payload.extend_from_slice(&encode(&EndpointEntry::from(*address))?);
                }
                payload
            }
            Frame::AddrMod { op, address } => {
                let entry = encode(&EndpointEntry::from(*address))?;
                encode_args(&[Arg::U8(*op as u8), Arg::Bytes(&entry)]).to_vec()
            }
        };
        Ok(encode_args(&[Arg::U8(self.frame_type()), Arg::Bytes(&payload)]))
    }

    /// Parse a frame produced by [`Frame::encode`].
    pub fn decode(data: &[u8]) -> Result<Frame> {
        let (frame_type, payload) = split_u8(data, "frame_type")?;
        match frame_type {
            FRAME_TYPE_ADDR_ARRAY => {
                let mut addresses = Vec::new();
                let mut rest = payload;
                while !rest.is_empty() {
                    let (entry, consumed) = decode::<EndpointEntry>(rest)?;
                    addresses.push(entry.to_socket_addr()?);
                    rest = &rest[consumed..];
                }
                Ok(Frame::AddrArray { addresses })
            }
            FRAME_TYPE_ADDR_MOD => {
                let (op, rest) = split_u8(payload, "op")?;
                let (entry, consumed) = decode::<EndpointEntry>(rest)?;
                if consumed != rest.len() {
                    return Err(Error::Frame(format!(
                        "{} trailing bytes after address modification",
                        rest.len() - consumed
                    )));
                }
                Ok(Frame::AddrMod {
                    op: AddrOp::try_from(op)?,
                    address: entry.to_socket_addr()?,
                })
            }
            other => Err(Error::Frame(format!("unknown frame type {:#04x}", other))),
        }
    }
}

fn split_u8<'a>(data: &'a [u8], field: &'static str) -> Result<(u8, &'a [u8])> {
    match data.split_first() {
        Some((first, rest)) => Ok((*first, rest)),
        None => Err(CodecError::ShortBuffer {
            field,
            needed: 1,
            remaining: 0,
        }
        .into()),
    }
}

/// One endpoint as carried on the wire.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
struct EndpointEntry {
    family: u8,
    ip: Vec<u8>,
    port: u16,
}

fn ip_len(entry: &EndpointEntry) -> usize {
    match entry.family {
        FAMILY_V6 => 16,
        _ => 4,
    }
}

impl Structure for EndpointEntry {
    const FIELDS: &'static [FieldDescriptor<Self>] = &[
        FieldDescriptor::uint("family", 1),
        FieldDescriptor::bytes("ip").with_length(ip_len),
        FieldDescriptor::uint("port", 2),
    ];

    fn field(&self, index: usize) -> FieldValue<'_> {
        match index {
            0 => FieldValue::Uint(self.family.into()),
            1 => FieldValue::Bytes(&self.ip),
            _ => FieldValue::Uint(self.port.into()),
        }
    }

    fn set_field(&mut self, index: usize, value: FieldValue<'_>) -> braid_codec::Result<()> {
        match index {
            0 => self.family = value.uint("family")? as u8,
            1 => self.ip = value.bytes("ip")?.to_vec(),
            _ => self.port = value.uint("port")? as u16,
        }
        Ok(())
    }
}

impl From<SocketAddr> for EndpointEntry {
    fn from(addr: SocketAddr) -> Self {
        let (family, ip) = match addr.ip() {
            IpAddr::V4(v4) => (FAMILY_V4, v4.octets().to_vec()),
            IpAddr::V6(v6) => (FAMILY_V6, v6.octets().to_vec()),
        };
        Self {
            family,
            ip,
            port: addr.port(),
        }
    }
}

impl EndpointEntry {
    fn to_socket_addr(&self) -> Result<SocketAddr> {
        let ip = match self.family {
            FAMILY_V4 => {
                let octets: [u8; 4] = self
                    .ip
                    .as_slice()
                    .try_into()
                    .map_err(|_| Error::Frame("bad IPv4 length".to_string()))?;
                IpAddr::V4(Ipv4Addr::from(octets))
            }
            FAMILY_V6 => {
                let octets: [u8; 16] = self
                    .ip
                    .as_slice()
                    .try_into()
                    .map_err(|_| Error::Frame("bad IPv6 length".to_string()))?;
                IpAddr::V6(Ipv6Addr::from(octets))
            }
            other => return Err(Error::Frame(format!("unknown address family {}", other))),
        };
        Ok(SocketAddr::new(ip, self.port))
    }
}
