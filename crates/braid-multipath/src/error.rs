//! Error types for braid-multipath.

use std::net::SocketAddr;

use braid_codec::CodecError;
use thiserror::Error;

/// Errors that can occur in braid-multipath operations.
#[derive(Debug, Error)]
pub enum Error {
    /// Malformed or unencodable wire structure.
    #[error("codec error: {0}")]
    Codec(#[from] CodecError),

    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// The transport of the selected path failed.
    #[error("transport error on path {local} -> {remote}: {source}")]
    Transport {
        local: SocketAddr,
        remote: SocketAddr,
        #[source]
        source: std::io::Error,
    },

    /// The selected path did not accept the packet in time.
    #[error("send on path {local} -> {remote} timed out after {timeout_ms}ms")]
    Timeout {
        local: SocketAddr,
        remote: SocketAddr,
        timeout_ms: u64,
    },

    /// There is no path to send on.
    #[error("no paths available")]
    NoPaths,

    /// Connection closed.
    #[error("connection closed: {reason}")]
    ConnectionClosed { reason: String },

    /// Configuration error.
    #[error("config error: {0}")]
    Config(String),

    /// Control frame with an unknown type or operation.
    #[error("malformed frame: {0}")]
    Frame(String),
}
