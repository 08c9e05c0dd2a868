//! The owning connection, as seen by the scheduler.

use tokio::sync::watch;

use crate::frame::Frame;

/// Coarse connection state. Only `Established` gates scheduler behavior.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Handshaking,
    Established,
    Closed,
}

/// Packet category a batch of frames is sent in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PacketType {
    Initial,
    Handshake,
    ZeroRtt,
    OneRtt,
}

/// Connection services used by the scheduler.
///
/// The handshake, loss recovery and congestion control behind this trait are
/// not part of this crate.
pub trait Connection: Send + Sync + 'static {
    /// Identifier used in log lines.
    fn connection_id(&self) -> u64;

    /// Subscribe to state transitions.
    fn state(&self) -> watch::Receiver<ConnectionState>;

    /// Queue control frames for transmission to the peer.
    fn send_frames_in_packet(&self, packet_type: PacketType, frames: Vec<Frame>)
        -> crate::Result<()>;
}
