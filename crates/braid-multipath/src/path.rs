//! Network paths.
//!
//! A path is one local/remote endpoint pair plus the transport that sends
//! over it. Its identity is the pair itself, so creating a path for a pair
//! that already has one always lands on the same table entry.

use std::fmt;
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;

use crc::{Crc, CRC_32_ISCSI};

use crate::transport::Transport;

const TAG_CRC: Crc<u32> = Crc::<u32>::new(&CRC_32_ISCSI);

/// Identity of a path: its (local, remote) endpoint pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PathId {
    pub local: SocketAddr,
    pub remote: SocketAddr,
}

impl PathId {
    pub fn new(local: SocketAddr, remote: SocketAddr) -> Self {
        Self { local, remote }
    }

    /// Short checksum of the endpoint strings, for log lines only.
    pub fn tag(&self) -> u32 {
        let mut digest = TAG_CRC.digest();
        digest.update(self.local.to_string().as_bytes());
        digest.update(self.remote.to_string().as_bytes());
        digest.finalize()
    }

    /// True if either endpoint stringifies to `addr`.
    pub fn contains(&self, addr: &str) -> bool {
        self.local.to_string() == addr || self.remote.to_string() == addr
    }
}

impl fmt::Display for PathId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} -> {} [{:08x}]", self.local, self.remote, self.tag())
    }
}

/// A single network path.
#[derive(Clone)]
pub struct Path {
    id: PathId,
    transport: Arc<dyn Transport>,
    is_primary: bool,
    metric: Duration,
}

impl Path {
    /// Create a secondary path.
    pub fn new(
        transport: Arc<dyn Transport>,
        local: SocketAddr,
        remote: SocketAddr,
        reference_rtt: Duration,
    ) -> Self {
        Self {
            id: PathId::new(local, remote),
            transport,
            is_primary: false,
            metric: reference_rtt,
        }
    }

    /// Create path zero from the connection's initial transport.
    pub fn primary(
        transport: Arc<dyn Transport>,
        local: SocketAddr,
        remote: SocketAddr,
        reference_rtt: Duration,
    ) -> Self {
        Self {
            is_primary: true,
            ..Self::new(transport, local, remote, reference_rtt)
        }
    }

    pub fn id(&self) -> PathId {
        self.id
    }

    pub fn local(&self) -> SocketAddr {
        self.id.local
    }

    pub fn remote(&self) -> SocketAddr {
        self.id.remote
    }

    pub fn is_primary(&self) -> bool {
        self.is_primary
    }

    pub fn transport(&self) -> &Arc<dyn Transport> {
        &self.transport
    }

    /// Current metric. Not used for selection yet.
    pub fn metric(&self) -> Duration {
        self.metric
    }

    pub fn update_metric(&mut self, rtt: Duration) {
        self.metric = rtt;
    }

    pub fn contains(&self, addr: &str) -> bool {
        self.id.contains(addr)
    }

    pub fn info(&self) -> PathInfo {
        PathInfo {
            path_id: self.id,
            local_addr: self.id.local,
            peer_addr: self.id.remote,
            rtt: self.metric,
            is_primary: self.is_primary,
        }
    }
}

impl fmt::Debug for Path {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Path")
            .field("id", &self.id)
            .field("is_primary", &self.is_primary)
            .field("metric", &self.metric)
            .finish()
    }
}

/// Snapshot of a path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PathInfo {
    /// Unique path identifier.
    pub path_id: PathId,

    /// Local address for this path.
    pub local_addr: SocketAddr,

    /// Remote address for this path.
    pub peer_addr: SocketAddr,

    /// Current RTT metric.
    pub rtt: Duration,

    /// Whether this is path zero.
    pub is_primary: bool,
}

/// Observable path lifecycle and send events.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PathEvent {
    /// A new path was added to the table.
    Created(PathId),

    /// A path was removed from the table.
    Removed(PathId),

    /// Opening a socket for a new path failed; the path was not created.
    CreateFailed { path_id: PathId, reason: String },

    /// The selected path failed to send a packet.
    SendFailed { path_id: PathId, reason: String },
}

/// True if both addresses are IPv4 or both are IPv6.
///
/// IPv4-mapped IPv6 addresses count as IPv4.
pub fn is_same_version(a: &SocketAddr, b: &SocketAddr) -> bool {
    is_v4(a.ip()) == is_v4(b.ip())
}

fn is_v4(ip: IpAddr) -> bool {
    match ip {
        IpAddr::V4(_) => true,
        IpAddr::V6(v6) => v6.to_ipv4_mapped().is_some(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::MockTransport;

    fn addr(s: &str) -> SocketAddr {
        s.parse().unwrap()
    }

    #[test]
    fn identity_is_the_endpoint_pair() {
        let a = PathId::new(addr("10.0.0.1:1000"), addr("10.0.1.1:443"));
        let b = PathId::new(addr("10.0.0.1:1000"), addr("10.0.1.1:443"));
        let swapped = PathId::new(addr("10.0.1.1:443"), addr("10.0.0.1:1000"));
        assert_eq!(a, b);
        assert_eq!(a.tag(), b.tag());
        assert_ne!(a, swapped);
    }

    #[test]
    fn contains_matches_either_endpoint() {
        let path = Path::new(
            MockTransport::new(),
            addr("10.0.0.1:1000"),
            addr("[2001:db8::1]:443"),
            Duration::from_millis(100),
        );
        assert!(path.contains("10.0.0.1:1000"));
        assert!(path.contains("[2001:db8::1]:443"));
        assert!(!path.contains("10.0.0.1:1001"));
        assert!(!path.is_primary());
    }

    #[test]
    fn primary_path_carries_flag_and_metric() {
        let mut path = Path::primary(
            MockTransport::new(),
            addr("10.0.0.1:1000"),
            addr("10.0.1.1:443"),
            Duration::from_millis(100),
        );
        assert!(path.is_primary());
        assert_eq!(path.metric(), Duration::from_millis(100));
        path.update_metric(Duration::from_millis(42));
        assert_eq!(path.info().rtt, Duration::from_millis(42));
    }

    #[test]
    fn version_matching() {
        assert!(is_same_version(&addr("1.2.3.4:1"), &addr("5.6.7.8:2")));
        assert!(is_same_version(&addr("[::1]:1"), &addr("[2001:db8::2]:2")));
        assert!(!is_same_version(&addr("1.2.3.4:1"), &addr("[::1]:2")));
        assert!(is_same_version(&addr("[::ffff:1.2.3.4]:1"), &addr("5.6.7.8:2")));
    }
}
