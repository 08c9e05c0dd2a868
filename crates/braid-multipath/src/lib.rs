//! Multipath extension layer for a QUIC-like transport.
//!
//! A [`Scheduler`] owns the set of paths for one connection. Paths are
//! created from every compatible pair of local and remote addresses, removed
//! when either address goes away, and picked round-robin for outbound
//! packets. Local address changes are signalled to the peer with
//! [`Frame::AddrMod`] control frames built on top of `braid-codec`.

pub mod config;
pub mod connection;
pub mod error;
pub mod frame;
pub mod listener;
pub mod path;
pub mod scheduler;
pub mod transport;

#[cfg(test)]
mod test_support;

pub use config::Config;
pub use connection::{Connection, ConnectionState, PacketType};
pub use error::Error;
pub use frame::{AddrOp, Frame};
pub use listener::ListenerHandle;
pub use path::{is_same_version, Path, PathEvent, PathId, PathInfo};
pub use scheduler::Scheduler;
pub use transport::{AddressHelper, LocalAddressTable, Transport, UdpAddressHelper, UdpTransport};

/// Result type for braid-multipath operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Tracing target for path lifecycle and scheduling.
pub const LOG_MULTIPATH: &str = "braid::multipath";

/// Tracing target for lock acquisition.
pub const LOG_MUTEX: &str = "braid::mutex";
