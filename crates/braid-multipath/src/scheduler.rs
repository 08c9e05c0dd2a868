//! Path scheduler.
//!
//! The scheduler owns every path of one connection together with the remote
//! address table, and shares the local address table with the address
//! helper. Locks are always taken in the order local table, remote table,
//! path table. Sockets are opened with no table lock held; a new path is
//! only inserted while both of its addresses are still present in the
//! tables, so a path never outlives the address it was built from.
//!
//! Sending picks paths round-robin over the insertion-ordered path list. The
//! cursor lives under the path-table lock, so selection is consistent with
//! concurrent path changes; fairness only holds between such changes since
//! removing a path shifts the positions of the ones after it.

use std::collections::{BTreeMap, HashMap};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::Duration;

use tracing::{debug, info, trace, warn};

use crate::config::Config;
use crate::connection::{Connection, ConnectionState};
use crate::error::Error;
use crate::frame::{build_addr_array_frame, build_addr_mod_frame, AddrOp, Frame};
use crate::path::{is_same_version, Path, PathEvent, PathId, PathInfo};
use crate::transport::{AddressHelper, LocalAddressTable, Transport};
use crate::{Result, LOG_MULTIPATH, LOG_MUTEX};

/// Paths plus the ordered id list that drives round-robin selection.
#[derive(Default)]
struct PathTable {
    paths: HashMap<PathId, Path>,
    path_ids: Vec<PathId>,
    last_path: usize,
}

impl PathTable {
    /// Insert `path` unless its endpoint pair is already present.
    fn insert(&mut self, path: Path) -> bool {
        let id = path.id();
        if self.paths.contains_key(&id) {
            return false;
        }
        self.paths.insert(id, path);
        self.path_ids.push(id);
        true
    }

    fn remove(&mut self, id: &PathId) -> Option<Path> {
        let path = self.paths.remove(id)?;
        self.path_ids.retain(|p| p != id);
        if self.last_path >= self.path_ids.len() {
            self.last_path = self.path_ids.len().saturating_sub(1);
        }
        Some(path)
    }

    /// Advance the cursor and return the path under it.
    fn next(&mut self) -> Option<&Path> {
        if self.path_ids.is_empty() {
            return None;
        }
        self.last_path = (self.last_path + 1) % self.path_ids.len();
        self.paths.get(&self.path_ids[self.last_path])
    }
}

/// Owns the paths of one connection.
pub struct Scheduler {
    config: Config,
    connection: Arc<dyn Connection>,
    address_helper: Arc<dyn AddressHelper>,
    local_addrs: LocalAddressTable,
    remote_addrs: RwLock<BTreeMap<String, SocketAddr>>,
    paths: RwLock<PathTable>,
    is_initialized: AtomicBool,
    events: Mutex<Vec<PathEvent>>,
}

impl Scheduler {
    /// Create the scheduler with path zero built on the connection's
    /// initial transport.
    pub fn new(
        config: Config,
        initial_transport: Arc<dyn Transport>,
        initial_local: SocketAddr,
        initial_remote: SocketAddr,
        connection: Arc<dyn Connection>,
        address_helper: Arc<dyn AddressHelper>,
    ) -> Result<Self> {
        config.validate()?;
        let mut table = PathTable::default();
        table.insert(Path::primary(
            initial_transport,
            initial_local,
            initial_remote,
            config.reference_rtt,
        ));
        info!(
            target: LOG_MULTIPATH,
            "New scheduler built for connection {:x}",
            connection.connection_id()
        );
        Ok(Self {
            local_addrs: address_helper.local_addresses(),
            config,
            connection,
            address_helper,
            remote_addrs: RwLock::new(BTreeMap::new()),
            paths: RwLock::new(table),
            is_initialized: AtomicBool::new(false),
            events: Mutex::new(Vec::new()),
        })
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub(crate) fn connection(&self) -> &Arc<dyn Connection> {
        &self.connection
    }

    pub(crate) fn address_helper(&self) -> &Arc<dyn AddressHelper> {
        &self.address_helper
    }

    /// Send `payload` on the next path in round-robin order.
    ///
    /// Failures are returned as is; no other path is tried.
    pub async fn send(&self, payload: &[u8]) -> Result<()> {
        let path = {
            let mut table = self.write_paths();
            table.next().cloned()
        };
        let Some(path) = path else {
            warn!(target: LOG_MULTIPATH, "No path available for sending");
            return Err(Error::NoPaths);
        };
        let id = path.id();

        match tokio::time::timeout(self.config.send_timeout, path.transport().send(payload)).await {
            Ok(Ok(())) => {
                if path.is_primary() {
                    trace!(target: LOG_MULTIPATH, "Packet sent. Used path zero");
                } else {
                    trace!(target: LOG_MULTIPATH, "Packet sent on path {}", id);
                }
                Ok(())
            }
            Ok(Err(source)) => {
                warn!(target: LOG_MULTIPATH, "Send failed on path {}: {}", id, source);
                self.record(PathEvent::SendFailed {
                    path_id: id,
                    reason: source.to_string(),
                });
                Err(Error::Transport {
                    local: id.local,
                    remote: id.remote,
                    source,
                })
            }
            Err(_) => {
                let timeout_ms = self.config.send_timeout.as_millis() as u64;
                warn!(
                    target: LOG_MULTIPATH,
                    "Send on path {} timed out after {}ms", id, timeout_ms
                );
                self.record(PathEvent::SendFailed {
                    path_id: id,
                    reason: format!("timed out after {}ms", timeout_ms),
                });
                Err(Error::Timeout {
                    local: id.local,
                    remote: id.remote,
                    timeout_ms,
                })
            }
        }
    }

    /// Record a local address and build a path to every compatible remote.
    pub fn add_local_address(&self, local: SocketAddr) {
        info!(target: LOG_MULTIPATH, "Adding local address {}", local);
        let pairs: Vec<(SocketAddr, SocketAddr)> = {
            let mut locals = self.local_addrs.write();
            locals.addrs.insert(local.to_string(), local);
            let remotes = self.read_remote();
            remotes
                .values()
                .filter(|remote| is_same_version(&local, remote))
                .map(|remote| (local, *remote))
                .collect()
        };
        self.create_paths(pairs);
    }

    /// Record a remote address and build a path from every compatible local.
    pub fn add_remote_address(&self, remote: SocketAddr) {
        info!(target: LOG_MULTIPATH, "Adding remote address {}", remote);
        let pairs: Vec<(SocketAddr, SocketAddr)> = {
            let locals = self.local_addrs.read();
            let mut remotes = self.write_remote();
            remotes.insert(remote.to_string(), remote);
            locals
                .addrs
                .values()
                .filter(|local| is_same_version(local, &remote))
                .map(|local| (*local, remote))
                .collect()
        };
        self.create_paths(pairs);
    }

    /// Forget `addr` in both tables and drop every path that uses it.
    pub fn remove_address(&self, addr: SocketAddr) {
        let key = addr.to_string();
        let mut locals = self.local_addrs.write();
        let mut remotes = self.write_remote();

        if remotes.remove(&key).is_some() {
            info!(target: LOG_MULTIPATH, "Deleted remote address {}", addr);
        }
        let was_local = locals.addrs.remove(&key).is_some();
        if was_local {
            locals.pending.remove(&key);
            info!(target: LOG_MULTIPATH, "Deleted local address {}", addr);
        }

        let removed: Vec<PathId> = {
            let mut table = self.write_paths();
            let doomed: Vec<PathId> = table
                .path_ids
                .iter()
                .filter(|id| id.contains(&key))
                .copied()
                .collect();
            doomed
                .into_iter()
                .filter(|id| table.remove(id).is_some())
                .collect()
        };
        for id in removed {
            info!(target: LOG_MULTIPATH, "Removed path {}", id);
            self.record(PathEvent::Removed(id));
        }

        drop(remotes);
        drop(locals);
        if was_local {
            self.address_helper.release_socket(addr);
        }
    }

    /// Build one path for every compatible local/remote pair.
    pub fn initialize_paths(&self) {
        let pairs: Vec<(SocketAddr, SocketAddr)> = {
            let locals = self.local_addrs.read();
            let remotes = self.read_remote();
            locals
                .addrs
                .values()
                .flat_map(|local| remotes.values().map(move |remote| (*local, *remote)))
                .filter(|(local, remote)| is_same_version(local, remote))
                .collect()
        };
        self.create_paths(pairs);
        self.is_initialized.store(true, Ordering::SeqCst);
        info!(target: LOG_MULTIPATH, "First flight paths initialized");
    }

    /// Send the full local address list to the peer and mark every address
    /// as pending acknowledgement.
    pub fn announce_local_addresses(&self) -> Result<()> {
        self.ensure_open()?;
        let frame = {
            let mut locals = self.local_addrs.write();
            let addrs: Vec<SocketAddr> = locals.addrs.values().copied().collect();
            for addr in &addrs {
                locals.pending.insert(addr.to_string(), true);
            }
            build_addr_array_frame(addrs)
        };
        debug!(target: LOG_MULTIPATH, "Assembled frame {:?}", frame);
        self.send_frames(vec![frame])
    }

    /// The peer acknowledged `addr`.
    pub fn acknowledge_local_address(&self, addr: SocketAddr) {
        let mut locals = self.local_addrs.write();
        let key = addr.to_string();
        if locals.addrs.contains_key(&key) {
            locals.pending.insert(key, false);
        }
    }

    /// Local addresses offered to the peer and not yet acknowledged.
    pub fn pending_local_addresses(&self) -> Vec<SocketAddr> {
        let locals = self.local_addrs.read();
        locals
            .pending
            .iter()
            .filter(|(_, pending)| **pending)
            .filter_map(|(key, _)| locals.addrs.get(key).copied())
            .collect()
    }

    /// React to an address notification: unknown addresses are added,
    /// known ones removed, and the peer is told either way.
    pub(crate) fn apply_address_change(&self, addr: SocketAddr) -> Result<()> {
        let frame = if !self.local_addrs.contains(&addr) {
            self.add_local_address(addr);
            self.local_addrs
                .write()
                .pending
                .insert(addr.to_string(), true);
            build_addr_mod_frame(AddrOp::Add, addr)
        } else {
            self.remove_address(addr);
            build_addr_mod_frame(AddrOp::Delete, addr)
        };
        debug!(target: LOG_MULTIPATH, "Assembled frame {:?}", frame);
        self.send_frames(vec![frame])
    }

    fn send_frames(&self, frames: Vec<Frame>) -> Result<()> {
        self.ensure_open()?;
        self.connection
            .send_frames_in_packet(self.config.control_packet_type, frames)
    }

    /// Control frames cannot be queued on a closed connection.
    fn ensure_open(&self) -> Result<()> {
        if *self.connection.state().borrow() == ConnectionState::Closed {
            warn!(
                target: LOG_MULTIPATH,
                "Connection {:x} is closed, dropping control frames",
                self.connection.connection_id()
            );
            return Err(Error::ConnectionClosed {
                reason: "control frames cannot be sent after close".to_string(),
            });
        }
        Ok(())
    }

    fn create_paths(&self, pairs: Vec<(SocketAddr, SocketAddr)>) {
        for (local, remote) in pairs {
            self.create_path(local, remote);
        }
    }

    /// Open a socket for the pair and add the path. Existing pairs are left
    /// untouched; socket failures are logged and recorded, never returned.
    ///
    /// Called without any table lock held, since the address helper may
    /// consult its own table while opening the socket. Both addresses are
    /// checked again under the table locks before the path is inserted.
    fn create_path(&self, local: SocketAddr, remote: SocketAddr) {
        let id = PathId::new(local, remote);
        if self.read_paths().paths.contains_key(&id) {
            debug!(target: LOG_MULTIPATH, "Path {} already exists", id);
            return;
        }

        let transport = match self.address_helper.open_socket(local, remote) {
            Ok(transport) => transport,
            Err(err) => {
                warn!(
                    target: LOG_MULTIPATH,
                    "Error while creating path local {} remote {}: {}", local, remote, err
                );
                self.record(PathEvent::CreateFailed {
                    path_id: id,
                    reason: err.to_string(),
                });
                return;
            }
        };

        let path = Path::new(transport, local, remote, self.config.reference_rtt);
        let (local_present, inserted) = {
            let locals = self.local_addrs.read();
            let remotes = self.read_remote();
            let local_present = locals.addrs.contains_key(&local.to_string());
            let remote_present = remotes.contains_key(&remote.to_string());
            let inserted = local_present && remote_present && self.write_paths().insert(path);
            (local_present, inserted)
        };

        if inserted {
            info!(target: LOG_MULTIPATH, "Path successfully created {}", id);
            self.record(PathEvent::Created(id));
        } else if !local_present {
            debug!(
                target: LOG_MULTIPATH,
                "Local address {} removed while opening path {}", local, id
            );
            self.address_helper.release_socket(local);
        }
    }

    /// Replace the metric of a path. Returns `false` if the path is unknown.
    pub fn update_path_metric(&self, id: &PathId, rtt: Duration) -> bool {
        match self.write_paths().paths.get_mut(id) {
            Some(path) => {
                path.update_metric(rtt);
                true
            }
            None => false,
        }
    }

    pub fn path_count(&self) -> usize {
        self.read_paths().path_ids.len()
    }

    /// Path ids in selection order.
    pub fn path_ids(&self) -> Vec<PathId> {
        self.read_paths().path_ids.clone()
    }

    pub fn has_path(&self, local: SocketAddr, remote: SocketAddr) -> bool {
        self.read_paths()
            .paths
            .contains_key(&PathId::new(local, remote))
    }

    /// Snapshots of all paths in selection order.
    pub fn paths(&self) -> Vec<PathInfo> {
        let table = self.read_paths();
        table
            .path_ids
            .iter()
            .filter_map(|id| table.paths.get(id))
            .map(Path::info)
            .collect()
    }

    pub fn is_initialized(&self) -> bool {
        self.is_initialized.load(Ordering::SeqCst)
    }

    pub fn local_addresses(&self) -> Vec<SocketAddr> {
        self.local_addrs.snapshot()
    }

    pub fn remote_addresses(&self) -> Vec<SocketAddr> {
        self.read_remote().values().copied().collect()
    }

    pub(crate) fn is_local_address(&self, addr: &SocketAddr) -> bool {
        self.local_addrs.contains(addr)
    }

    /// Take every path event recorded since the last call.
    pub fn drain_path_events(&self) -> Vec<PathEvent> {
        std::mem::take(&mut *self.events.lock().unwrap_or_else(PoisonError::into_inner))
    }

    fn record(&self, event: PathEvent) {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(event);
    }

    fn read_remote(&self) -> RwLockReadGuard<'_, BTreeMap<String, SocketAddr>> {
        trace!(target: LOG_MUTEX, "locked remote (read)");
        self.remote_addrs
            .read()
            .unwrap_or_else(PoisonError::into_inner)
    }

    fn write_remote(&self) -> RwLockWriteGuard<'_, BTreeMap<String, SocketAddr>> {
        trace!(target: LOG_MUTEX, "locked remote (write)");
        self.remote_addrs
            .write()
            .unwrap_or_else(PoisonError::into_inner)
    }

    fn read_paths(&self) -> RwLockReadGuard<'_, PathTable> {
        trace!(target: LOG_MUTEX, "locked paths (read)");
        self.paths.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write_paths(&self) -> RwLockWriteGuard<'_, PathTable> {
        trace!(target: LOG_MUTEX, "locked paths (write)");
        self.paths.write().unwrap_or_else(PoisonError::into_inner)
    }
}
