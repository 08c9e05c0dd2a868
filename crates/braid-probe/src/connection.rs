//! Stand-in connection for the probe: always established, logs the control
//! frames it is asked to send instead of transmitting them.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use braid_multipath::{Connection, ConnectionState, Frame, PacketType};
use tokio::sync::watch;
use tracing::info;

pub(crate) struct LoopbackConnection {
    state: watch::Sender<ConnectionState>,
    frames_sent: AtomicUsize,
}

impl LoopbackConnection {
    pub(crate) fn established() -> Arc<Self> {
        let (state, _) = watch::channel(ConnectionState::Established);
        Arc::new(Self {
            state,
            frames_sent: AtomicUsize::new(0),
        })
    }

    pub(crate) fn frames_sent(&self) -> usize {
        self.frames_sent.load(Ordering::Relaxed)
    }
}

impl Connection for LoopbackConnection {
    fn connection_id(&self) -> u64 {
        std::process::id() as u64
    }

    fn state(&self) -> watch::Receiver<ConnectionState> {
        self.state.subscribe()
    }

    fn send_frames_in_packet(
        &self,
        packet_type: PacketType,
        frames: Vec<Frame>,
    ) -> braid_multipath::Result<()> {
        for frame in frames {
            let bytes = frame.encode()?;
            info!(
                "{:?} frame type {:#04x}, {} bytes: {:?}",
                packet_type,
                frame.frame_type(),
                bytes.len(),
                frame
            );
            self.frames_sent.fetch_add(1, Ordering::Relaxed);
        }
        Ok(())
    }
}
