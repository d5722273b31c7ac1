//! Health update reduction
//!
//! Pure combination of the previous health record, the latest probe results,
//! and the observed-connectivity override into a new record plus edge flags.
//! Owns no state and touches no transport, so every hysteresis rule is unit
//! testable in isolation.

use super::status::{derive_status, HealthStatus};
use crate::transport::abstraction::ProbeResult;
use serde::Serialize;
use web_time::Instant;

/// Published connectivity record. Owned by the monitor; observers read
/// snapshot clones.
#[derive(Debug, Clone, Serialize)]
pub struct ConnectionHealth {
    /// Latest effective relay verdict (link presence or observed exchange).
    pub relay_connected: bool,
    /// Latest effective peer verdict.
    pub peer_connected: bool,
    /// Round-trip of the most recent successful relay probe.
    pub last_relay_ping_ms: Option<u32>,
    /// Round-trip of the most recent successful peer probe.
    pub last_peer_ping_ms: Option<u32>,
    /// Derived on every check, never set directly by a caller.
    pub status: HealthStatus,
    /// Consecutive raw relay probe failures.
    pub relay_failures: u32,
    /// Consecutive raw peer ping failures. Not rescued by observed
    /// connectivity, so a stale observed flag cannot mask a dead link.
    pub peer_failures: u32,
    /// `None` until the first check completes.
    #[serde(skip)]
    pub last_check_at: Option<Instant>,
}

impl Default for ConnectionHealth {
    fn default() -> Self {
        Self {
            relay_connected: false,
            peer_connected: false,
            last_relay_ping_ms: None,
            last_peer_ping_ms: None,
            status: HealthStatus::Unknown,
            relay_failures: 0,
            peer_failures: 0,
            last_check_at: None,
        }
    }
}

/// Edge flags produced alongside each new record.
///
/// Disconnect edges are level signals once the failure threshold is reached;
/// the monitor's fired flags turn them into at-most-once callbacks, re-armed
/// by the reconnect edges.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct HealthEdges {
    pub relay_disconnected: bool,
    pub peer_disconnected: bool,
    pub relay_reconnected: bool,
    pub peer_reconnected: bool,
}

/// Combine one check's evidence into the next record.
///
/// An observed successful exchange counts as proof the path works even when
/// the latest ping failed (pings false-negative on a busy relay). The raw
/// peer failure counter still advances on every failed ping, and the
/// disconnect edges stay suppressed until a prior baseline exists.
#[allow(clippy::too_many_arguments)]
pub fn reduce(
    prev: &ConnectionHealth,
    relay_result: ProbeResult,
    peer_result: ProbeResult,
    observed_connected: bool,
    peer_expected: bool,
    now: Instant,
    failure_threshold: u32,
    degraded_threshold_ms: u32,
) -> (ConnectionHealth, HealthEdges) {
    let effective_relay_connected = relay_result.connected || observed_connected;
    let effective_peer_connected = peer_result.connected || observed_connected;

    let relay_failures = if effective_relay_connected {
        0
    } else {
        prev.relay_failures.saturating_add(1)
    };
    let peer_failures = if peer_result.connected {
        0
    } else {
        prev.peer_failures.saturating_add(1)
    };

    // The very first check has no baseline to regress from.
    let has_baseline = prev.last_check_at.is_some();
    let edges = HealthEdges {
        relay_disconnected: has_baseline && relay_failures >= failure_threshold,
        peer_disconnected: has_baseline && peer_expected && peer_failures >= failure_threshold,
        relay_reconnected: effective_relay_connected,
        peer_reconnected: effective_peer_connected,
    };

    let status = derive_status(
        effective_relay_connected,
        effective_peer_connected,
        relay_result.latency_ms,
        peer_result.latency_ms,
        peer_expected,
        degraded_threshold_ms,
    );

    let next = ConnectionHealth {
        relay_connected: effective_relay_connected,
        peer_connected: effective_peer_connected,
        last_relay_ping_ms: relay_result.latency_ms,
        last_peer_ping_ms: peer_result.latency_ms,
        status,
        relay_failures,
        peer_failures,
        last_check_at: Some(now),
    };

    (next, edges)
}
