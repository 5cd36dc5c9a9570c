//! Connection accounting and host network sampling

use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};
use std::time::Instant;

use serde::Serialize;
use sysinfo::Networks;

/// Hooks for observing forwarded connections.
///
/// Injected into the forwarder; the default implementation ignores
/// everything, so callers that do not care pay nothing.
pub trait StatsSink: Send + Sync {
    fn connection_opened(&self) {}
    fn connection_closed(&self) {}
    fn bytes_transferred(&self, n: u64) {
        let _ = n;
    }
}

/// Sink that ignores every event
#[derive(Debug, Default)]
pub struct NoopStats;

impl StatsSink for NoopStats {}

/// Live gauges backing the stats endpoint
#[derive(Debug, Default)]
pub struct ConnectionStats {
    active: AtomicI64,
    total_bytes: AtomicU64,
}

impl ConnectionStats {
    pub fn active_connections(&self) -> i64 {
        self.active.load(Ordering::Relaxed)
    }

    pub fn total_bytes(&self) -> u64 {
        self.total_bytes.load(Ordering::Relaxed)
    }
}

impl StatsSink for ConnectionStats {
    fn connection_opened(&self) {
        self.active.fetch_add(1, Ordering::Relaxed);
    }

    fn connection_closed(&self) {
        self.active.fetch_sub(1, Ordering::Relaxed);
    }

    fn bytes_transferred(&self, n: u64) {
        self.total_bytes.fetch_add(n, Ordering::Relaxed);
    }
}

/// Host-wide network rates, up and down, in bytes per second
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct NetworkThroughput {
    pub received_per_sec: u64,
    pub transmitted_per_sec: u64,
}

struct NetworkSample {
    at: Instant,
    received: u64,
    transmitted: u64,
}

/// Samples host network counters and derives per-second rates.
///
/// Rates are recomputed at most once per second; loopback traffic is
/// excluded. Counter resets clamp to zero instead of going negative.
pub struct NetworkMonitor {
    networks: Networks,
    last: Option<NetworkSample>,
    rates: NetworkThroughput,
}

impl NetworkMonitor {
    pub fn new() -> Self {
        Self {
            networks: Networks::new_with_refreshed_list(),
            last: None,
            rates: NetworkThroughput::default(),
        }
    }

    pub fn sample(&mut self) -> NetworkThroughput {
        self.networks.refresh();

        let mut received = 0u64;
        let mut transmitted = 0u64;
        for (name, data) in &self.networks {
            if name == "lo" {
                continue;
            }
            received += data.total_received();
            transmitted += data.total_transmitted();
        }

        let now = Instant::now();
        match &self.last {
            None => {
                self.last = Some(NetworkSample {
                    at: now,
                    received,
                    transmitted,
                });
            }
            Some(prev) => {
                let elapsed = now.duration_since(prev.at).as_secs();
                if elapsed >= 1 {
                    self.rates = NetworkThroughput {
                        received_per_sec: received.saturating_sub(prev.received) / elapsed,
                        transmitted_per_sec: transmitted.saturating_sub(prev.transmitted)
                            / elapsed,
                    };
                    self.last = Some(NetworkSample {
                        at: now,
                        received,
                        transmitted,
                    });
                }
            }
        }

        self.rates
    }
}

impl Default for NetworkMonitor {
    fn default() -> Self {
        Self::new()
    }
}
