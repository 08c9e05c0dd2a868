//! Datagram transports and the local address helper.
//!
//! The [`Transport`] trait is object-safe so every path can hold an
//! `Arc<dyn Transport>`. [`UdpAddressHelper`] is the default
//! [`AddressHelper`]: it owns the shared local address table, opens one
//! tokio UDP socket per local address and fans address notifications out to
//! its subscribers. Discovering addresses is left to the caller, who feeds
//! them in through [`UdpAddressHelper::notify`].

use std::collections::{BTreeMap, HashMap};
use std::future::Future;
use std::io;
use std::net::SocketAddr;
use std::pin::Pin;
use std::sync::{Arc, Mutex, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use tokio::net::UdpSocket;
use tokio::sync::mpsc;
use tracing::{debug, trace};

use crate::{LOG_MULTIPATH, LOG_MUTEX};

/// Boxed future returned by [`Transport::send`].
pub type SendFuture<'a> = Pin<Box<dyn Future<Output = io::Result<()>> + Send + 'a>>;

/// A bound local/remote socket pair.
pub trait Transport: Send + Sync + 'static {
    /// Send one datagram to the remote endpoint.
    fn send<'a>(&'a self, buf: &'a [u8]) -> SendFuture<'a>;
}

/// [`Transport`] over a (possibly shared) tokio UDP socket.
pub struct UdpTransport {
    socket: Arc<UdpSocket>,
    remote: SocketAddr,
}

impl UdpTransport {
    /// Wrap `socket`, sending every datagram to `remote`.
    pub fn new(socket: Arc<UdpSocket>, remote: SocketAddr) -> Self {
        Self { socket, remote }
    }
}

impl Transport for UdpTransport {
    fn send<'a>(&'a self, buf: &'a [u8]) -> SendFuture<'a> {
        Box::pin(async move {
            self.socket.send_to(buf, self.remote).await?;
            Ok(())
        })
    }
}

/// Contents of the local address table.
#[derive(Debug, Default)]
pub struct LocalAddrs {
    /// Known local addresses keyed by their string form.
    pub addrs: BTreeMap<String, SocketAddr>,
    /// `true` while an address has been offered to the peer but not
    /// acknowledged.
    pub pending: BTreeMap<String, bool>,
}

/// Local address table shared between the address helper and the scheduler.
#[derive(Debug, Clone, Default)]
pub struct LocalAddressTable {
    inner: Arc<RwLock<LocalAddrs>>,
}

impl LocalAddressTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Acquire the read lock.
    pub fn read(&self) -> RwLockReadGuard<'_, LocalAddrs> {
        trace!(target: LOG_MUTEX, "locked local (read)");
        self.inner.read().unwrap_or_else(PoisonError::into_inner)
    }

    /// Acquire the write lock.
    pub fn write(&self) -> RwLockWriteGuard<'_, LocalAddrs> {
        trace!(target: LOG_MUTEX, "locked local (write)");
        self.inner.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// Record `addr`. Returns `false` if it was already present.
    pub fn insert(&self, addr: SocketAddr) -> bool {
        self.write().addrs.insert(addr.to_string(), addr).is_none()
    }

    /// Forget `addr` and its pending mark. Returns `true` if it was present.
    pub fn remove(&self, addr: &SocketAddr) -> bool {
        let key = addr.to_string();
        let mut table = self.write();
        table.pending.remove(&key);
        table.addrs.remove(&key).is_some()
    }

    pub fn contains(&self, addr: &SocketAddr) -> bool {
        self.read().addrs.contains_key(&addr.to_string())
    }

    /// Current addresses, ordered by their string form.
    pub fn snapshot(&self) -> Vec<SocketAddr> {
        self.read().addrs.values().copied().collect()
    }
}

/// Socket factory and source of local address notifications.
pub trait AddressHelper: Send + Sync + 'static {
    /// Open (or reuse) a socket on `local` that sends to `remote`.
    fn open_socket(&self, local: SocketAddr, remote: SocketAddr) -> io::Result<Arc<dyn Transport>>;

    /// Drop any socket held for `local` once no path uses it.
    fn release_socket(&self, _local: SocketAddr) {}

    /// The shared local address table.
    fn local_addresses(&self) -> LocalAddressTable;

    /// Deliver every future address notification to `tx`.
    fn subscribe(&self, tx: mpsc::UnboundedSender<SocketAddr>);
}

/// [`AddressHelper`] backed by tokio UDP sockets.
#[derive(Default)]
pub struct UdpAddressHelper {
    table: LocalAddressTable,
    sockets: Mutex<HashMap<SocketAddr, Arc<UdpSocket>>>,
    subscribers: Mutex<Vec<mpsc::UnboundedSender<SocketAddr>>>,
}

impl UdpAddressHelper {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a helper whose table already holds `addrs`.
    pub fn with_addresses(addrs: impl IntoIterator<Item = SocketAddr>) -> Self {
        let helper = Self::new();
        for addr in addrs {
            helper.table.insert(addr);
        }
        helper
    }

    /// Announce a discovered or vanished local address to all subscribers.
    ///
    /// Returns how many subscribers received it.
    pub fn notify(&self, addr: SocketAddr) -> usize {
        let mut subscribers = self
            .subscribers
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        subscribers.retain(|tx| tx.send(addr).is_ok());
        debug!(
            target: LOG_MULTIPATH,
            "Address notification {} delivered to {} subscriber(s)",
            addr,
            subscribers.len()
        );
        subscribers.len()
    }

    /// Number of sockets currently open.
    pub fn open_sockets(&self) -> usize {
        self.sockets
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }
}

impl AddressHelper for UdpAddressHelper {
    fn open_socket(&self, local: SocketAddr, remote: SocketAddr) -> io::Result<Arc<dyn Transport>> {
        let mut sockets = self.sockets.lock().unwrap_or_else(PoisonError::into_inner);
        let socket = match sockets.get(&local) {
            Some(socket) => socket.clone(),
            None => {
                let std_socket = std::net::UdpSocket::bind(local)?;
                std_socket.set_nonblocking(true)?;
                let socket = Arc::new(UdpSocket::from_std(std_socket)?);
                debug!(target: LOG_MULTIPATH, "Opened socket on {}", local);
                sockets.insert(local, socket.clone());
                socket
            }
        };
        Ok(Arc::new(UdpTransport::new(socket, remote)))
    }

    fn release_socket(&self, local: SocketAddr) {
        let removed = self
            .sockets
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&local);
        if removed.is_some() {
            debug!(target: LOG_MULTIPATH, "Released socket on {}", local);
        }
    }

    fn local_addresses(&self) -> LocalAddressTable {
        self.table.clone()
    }

    fn subscribe(&self, tx: mpsc::UnboundedSender<SocketAddr>) {
        self.subscribers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(tx);
    }
}
