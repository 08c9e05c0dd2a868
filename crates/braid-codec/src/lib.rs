//! Schema-driven binary codec for Braid wire structures.
//!
//! Every wire structure declares an ordered list of [`FieldDescriptor`]s.
//! The declaration order is the wire format: no tags, no padding, no length
//! prefixes. Individual fields may narrow their encoded width through a
//! length override evaluated against the structure being encoded or decoded.

pub mod codec;
pub mod error;
pub mod schema;

pub use codec::{decode, encode, encode_args, Arg};
pub use error::CodecError;
pub use schema::{validate_schema, FieldDescriptor, FieldKind, FieldValue, LengthFn, Structure};

/// Result type for codec operations.
pub type Result<T> = std::result::Result<T, CodecError>;

/// Tracing target for codec activity.
pub const LOG_TARGET: &str = "braid::codec";
