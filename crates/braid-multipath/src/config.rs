//! Configuration for the path scheduler.

use std::time::Duration;

use crate::connection::PacketType;

/// Configuration for a [`Scheduler`](crate::Scheduler).
#[derive(Debug, Clone)]
pub struct Config {
    /// Placeholder RTT assigned to every new path.
    pub reference_rtt: Duration,

    /// Upper bound for a single transport send.
    pub send_timeout: Duration,

    /// How often the address listener logs while waiting for establishment.
    pub establish_log_interval: Duration,

    /// Packet category used for address signaling frames.
    pub control_packet_type: PacketType,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            reference_rtt: Duration::from_millis(100),
            send_timeout: Duration::from_secs(5),
            establish_log_interval: Duration::from_secs(10),
            control_packet_type: PacketType::OneRtt,
        }
    }
}

impl Config {
    /// Create a new config with defaults.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the placeholder RTT for new paths.
    pub fn with_reference_rtt(mut self, rtt: Duration) -> Self {
        self.reference_rtt = rtt;
        self
    }

    /// Set the send timeout.
    pub fn with_send_timeout(mut self, timeout: Duration) -> Self {
        self.send_timeout = timeout;
        self
    }

    /// Set the wait-log interval of the address listener.
    pub fn with_establish_log_interval(mut self, interval: Duration) -> Self {
        self.establish_log_interval = interval;
        self
    }

    /// Check that durations are usable.
    pub fn validate(&self) -> Result<(), crate::Error> {
        if self.send_timeout.is_zero() {
            return Err(crate::Error::Config(
                "send_timeout must be greater than zero".to_string(),
            ));
        }
        if self.establish_log_interval.is_zero() {
            return Err(crate::Error::Config(
                "establish_log_interval must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }
}
