//! Error types for braid-codec.

use thiserror::Error;

/// Errors raised while encoding or decoding a wire structure.
///
/// All of them are fatal for the current call: the partial result must be
/// discarded and the enclosing frame treated as malformed.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CodecError {
    /// The field kind is not an unsigned integer of width 1/2/4/8 or a byte
    /// sequence, or the structure yielded a value of the wrong kind.
    #[error("unsupported field `{field}`")]
    UnsupportedField { field: &'static str },

    /// A length override asked for more bytes than the integer's native width.
    #[error("field `{field}`: requested {requested} bytes, native width is {native}")]
    LengthOverflow {
        field: &'static str,
        requested: usize,
        native: usize,
    },

    /// Not enough bytes left in the buffer.
    #[error("field `{field}`: needed {needed} bytes, {remaining} remaining")]
    ShortBuffer {
        field: &'static str,
        needed: usize,
        remaining: usize,
    },

    /// An unbounded byte-sequence field is not the last field of its schema.
    #[error("field `{field}`: unbounded byte sequence must be the last field")]
    InvalidSchema { field: &'static str },
}
