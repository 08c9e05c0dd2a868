//! Mock collaborators for unit tests.

use std::collections::HashSet;
use std::io;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::{mpsc, watch};

use crate::connection::{Connection, ConnectionState, PacketType};
use crate::frame::Frame;
use crate::transport::{AddressHelper, LocalAddressTable, SendFuture, Transport};

pub(crate) fn addr(s: &str) -> SocketAddr {
    s.parse().unwrap()
}

/// Counts sends; can be switched to fail or stall.
#[derive(Default)]
pub(crate) struct MockTransport {
    pub sent: AtomicUsize,
    pub fail: AtomicBool,
    pub stall: AtomicBool,
}

impl MockTransport {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn sent(&self) -> usize {
        self.sent.load(Ordering::SeqCst)
    }
}

impl Transport for MockTransport {
    fn send<'a>(&'a self, _buf: &'a [u8]) -> SendFuture<'a> {
        Box::pin(async move {
            if self.stall.load(Ordering::SeqCst) {
                tokio::time::sleep(Duration::from_secs(3600)).await;
            }
            if self.fail.load(Ordering::SeqCst) {
                return Err(io::Error::new(io::ErrorKind::ConnectionRefused, "refused"));
            }
            self.sent.fetch_add(1, Ordering::SeqCst);
            Ok(())
        })
    }
}

/// Address helper handing out [`MockTransport`]s.
#[derive(Default)]
pub(crate) struct MockAddressHelper {
    pub table: LocalAddressTable,
    pub failing_locals: Mutex<HashSet<SocketAddr>>,
    /// Locals dropped from the table while their socket is being opened.
    pub vanishing_locals: Mutex<HashSet<SocketAddr>>,
    pub transports: Mutex<Vec<(SocketAddr, SocketAddr, Arc<MockTransport>)>>,
    pub released: Mutex<Vec<SocketAddr>>,
    pub subscribers: Mutex<Vec<mpsc::UnboundedSender<SocketAddr>>>,
}

impl MockAddressHelper {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn with_addresses(addrs: &[&str]) -> Arc<Self> {
        let helper = Self::default();
        for a in addrs {
            helper.table.insert(addr(a));
        }
        Arc::new(helper)
    }

    pub fn fail_on(&self, local: SocketAddr) {
        self.failing_locals.lock().unwrap().insert(local);
    }

    pub fn vanish_on_open(&self, local: SocketAddr) {
        self.vanishing_locals.lock().unwrap().insert(local);
    }

    pub fn opened(&self) -> usize {
        self.transports.lock().unwrap().len()
    }

    pub fn transport_for(&self, local: &str, remote: &str) -> Option<Arc<MockTransport>> {
        let (local, remote) = (addr(local), addr(remote));
        self.transports
            .lock()
            .unwrap()
            .iter()
            .find(|(l, r, _)| *l == local && *r == remote)
            .map(|(_, _, t)| t.clone())
    }

    pub fn notify(&self, a: SocketAddr) {
        for tx in self.subscribers.lock().unwrap().iter() {
            let _ = tx.send(a);
        }
    }
}

impl AddressHelper for MockAddressHelper {
    fn open_socket(&self, local: SocketAddr, remote: SocketAddr) -> io::Result<Arc<dyn Transport>> {
        if self.failing_locals.lock().unwrap().contains(&local) || !self.table.contains(&local) {
            return Err(io::Error::new(io::ErrorKind::AddrNotAvailable, "no such address"));
        }
        if self.vanishing_locals.lock().unwrap().contains(&local) {
            self.table.remove(&local);
        }
        let transport = MockTransport::new();
        self.transports
            .lock()
            .unwrap()
            .push((local, remote, transport.clone()));
        Ok(transport)
    }

    fn release_socket(&self, local: SocketAddr) {
        self.released.lock().unwrap().push(local);
    }

    fn local_addresses(&self) -> LocalAddressTable {
        self.table.clone()
    }

    fn subscribe(&self, tx: mpsc::UnboundedSender<SocketAddr>) {
        self.subscribers.lock().unwrap().push(tx);
    }
}

/// Connection with a controllable state that records queued frames.
pub(crate) struct MockConnection {
    pub state: watch::Sender<ConnectionState>,
    pub frames: Mutex<Vec<(PacketType, Frame)>>,
}

impl MockConnection {
    pub fn new(state: ConnectionState) -> Arc<Self> {
        let (tx, _rx) = watch::channel(state);
        Arc::new(Self {
            state: tx,
            frames: Mutex::new(Vec::new()),
        })
    }

    pub fn set_state(&self, state: ConnectionState) {
        self.state.send_replace(state);
    }

    pub fn frames(&self) -> Vec<Frame> {
        self.frames
            .lock()
            .unwrap()
            .iter()
            .map(|(_, f)| f.clone())
            .collect()
    }
}

impl Connection for MockConnection {
    fn connection_id(&self) -> u64 {
        7
    }

    fn state(&self) -> watch::Receiver<ConnectionState> {
        self.state.subscribe()
    }

    fn send_frames_in_packet(
        &self,
        packet_type: PacketType,
        frames: Vec<Frame>,
    ) -> crate::Result<()> {
        let mut queued = self.frames.lock().unwrap();
        for frame in frames {
            frame.encode()?;
            queued.push((packet_type, frame));
        }
        Ok(())
    }
}
