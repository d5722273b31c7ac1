//! Health status derivation
//!
//! Pure mapping from connectivity flags and latencies to a single status.
//! Recomputed on every check, never persisted.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Overall connection health.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum HealthStatus {
    /// No check has completed yet
    Unknown,
    /// Reachable with acceptable latency
    Healthy,
    /// Reachable but round-trips exceed the degraded threshold
    Degraded,
    /// No relay link, or an expected peer is unreachable
    Disconnected,
}

impl fmt::Display for HealthStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HealthStatus::Unknown => write!(f, "unknown"),
            HealthStatus::Healthy => write!(f, "healthy"),
            HealthStatus::Degraded => write!(f, "degraded"),
            HealthStatus::Disconnected => write!(f, "disconnected"),
        }
    }
}

/// Derive the status for one check. First matching rule wins.
///
/// The relay is the single point of reachability, so relay-down dominates
/// everything, then an expected-but-absent peer, then latency over the
/// degraded threshold (peer leg checked before relay leg).
pub fn derive_status(
    relay_connected: bool,
    peer_connected: bool,
    relay_latency_ms: Option<u32>,
    peer_latency_ms: Option<u32>,
    peer_expected: bool,
    degraded_threshold_ms: u32,
) -> HealthStatus {
    if !relay_connected {
        return HealthStatus::Disconnected;
    }
    if peer_expected && !peer_connected {
        return HealthStatus::Disconnected;
    }
    if peer_expected {
        if let Some(latency) = peer_latency_ms {
            if latency > degraded_threshold_ms {
                return HealthStatus::Degraded;
            }
        }
    }
    if let Some(latency) = relay_latency_ms {
        if latency > degraded_threshold_ms {
            return HealthStatus::Degraded;
        }
    }
    HealthStatus::Healthy
}
