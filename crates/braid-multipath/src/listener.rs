//! Background task applying local address changes.
//!
//! The task subscribes to the address helper, waits until the connection is
//! established and then turns every notification into a table update plus
//! an `AddrMod` frame for the peer. Notifications that arrive earlier stay
//! queued in the channel until the connection is established.

use std::net::SocketAddr;
use std::sync::Arc;

use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::connection::ConnectionState;
use crate::scheduler::Scheduler;
use crate::LOG_MULTIPATH;

/// Handle to a running address listener.
///
/// Dropping the handle stops the listener as well.
pub struct ListenerHandle {
    stop: watch::Sender<bool>,
    task: JoinHandle<()>,
}

impl ListenerHandle {
    /// Ask the listener to stop.
    pub fn stop(&self) {
        self.stop.send_replace(true);
    }

    /// Stop the listener and wait for it to finish.
    pub async fn shutdown(self) {
        self.stop();
        if let Err(err) = self.task.await {
            warn!(target: LOG_MULTIPATH, "Address listener failed: {}", err);
        }
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }
}

impl Scheduler {
    /// Start applying address notifications from the address helper.
    ///
    /// Must be called from within a tokio runtime.
    pub fn listen_for_address_changes(self: &Arc<Self>) -> ListenerHandle {
        let (addr_tx, addr_rx) = mpsc::unbounded_channel();
        self.address_helper().subscribe(addr_tx);
        info!(target: LOG_MULTIPATH, "Subscribed to address helper");

        let (stop_tx, stop_rx) = watch::channel(false);
        let task = tokio::spawn(run_listener(self.clone(), addr_rx, stop_rx));
        ListenerHandle {
            stop: stop_tx,
            task,
        }
    }
}

async fn run_listener(
    scheduler: Arc<Scheduler>,
    mut addr_rx: mpsc::UnboundedReceiver<SocketAddr>,
    mut stop_rx: watch::Receiver<bool>,
) {
    let mut state = scheduler.connection().state();
    if !wait_for_established(&scheduler, &mut state, &mut stop_rx).await {
        debug!(target: LOG_MULTIPATH, "Address listener stopped before establishment");
        return;
    }
    info!(target: LOG_MULTIPATH, "Connection established, applying address changes");

    loop {
        tokio::select! {
            biased;
            _ = stop_rx.changed() => break,
            changed = state.changed() => {
                if changed.is_err() || *state.borrow_and_update() == ConnectionState::Closed {
                    break;
                }
            }
            addr = addr_rx.recv() => {
                let Some(addr) = addr else { break };
                if let Err(err) = scheduler.apply_address_change(addr) {
                    warn!(
                        target: LOG_MULTIPATH,
                        "Failed to signal address change {}: {}", addr, err
                    );
                }
            }
        }
    }
    debug!(target: LOG_MULTIPATH, "Address listener stopped");
}

/// Returns `false` if the listener should exit instead.
async fn wait_for_established(
    scheduler: &Scheduler,
    state: &mut watch::Receiver<ConnectionState>,
    stop_rx: &mut watch::Receiver<bool>,
) -> bool {
    let mut ticker = tokio::time::interval(scheduler.config().establish_log_interval);
    ticker.tick().await;
    loop {
        let current = *state.borrow_and_update();
        match current {
            ConnectionState::Established => return true,
            ConnectionState::Closed => return false,
            ConnectionState::Handshaking => {}
        }
        tokio::select! {
            biased;
            _ = stop_rx.changed() => return false,
            changed = state.changed() => {
                if changed.is_err() {
                    return false;
                }
            }
            _ = ticker.tick() => {
                info!(target: LOG_MULTIPATH, "Waiting for connection establishment");
            }
        }
    }
}
