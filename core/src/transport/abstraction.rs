//! Transport abstraction layer
//!
//! Defines the capability trait and probe types the health engine consumes.
//! Probe-level failures are signal, not exceptions: every transport error is
//! folded into a failed `ProbeResult` at the probe boundary and never
//! propagates further.

use async_trait::async_trait;
use libp2p::PeerId;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::debug;

/// State of a single transport connection as reported by the host.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConnectionState {
    Open,
    Closed,
}

/// Snapshot of one connection at probe time.
#[derive(Debug, Clone)]
pub struct ConnectionInfo {
    pub remote_peer_id: PeerId,
    pub state: ConnectionState,
}

impl ConnectionInfo {
    pub fn open(remote_peer_id: PeerId) -> Self {
        Self {
            remote_peer_id,
            state: ConnectionState::Open,
        }
    }

    pub fn is_open(&self) -> bool {
        self.state == ConnectionState::Open
    }
}

/// Errors from the transport capability
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("Ping timed out")]
    PingTimeout,

    #[error("Peer unreachable: {0}")]
    Unreachable(String),

    #[error("Transport not ready")]
    NotReady,
}

/// Narrow view onto the host transport: connection snapshots and pings.
///
/// `ping` relies on the transport's own call timeout; callers must not
/// assume bounded latency from it.
#[async_trait]
pub trait TransportHandle: Send + Sync {
    /// Current connections known to the transport.
    fn open_connections(&self) -> Vec<ConnectionInfo>;

    /// Round-trip ping to a peer.
    async fn ping(&self, peer: PeerId) -> Result<Duration, TransportError>;
}

/// Outcome of a single probe. Ephemeral: never retained beyond one reducer
/// call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ProbeResult {
    pub connected: bool,
    pub latency_ms: Option<u32>,
}

impl ProbeResult {
    pub fn success(latency_ms: Option<u32>) -> Self {
        Self {
            connected: true,
            latency_ms,
        }
    }

    pub fn failure() -> Self {
        Self {
            connected: false,
            latency_ms: None,
        }
    }
}

/// Round-trip time in whole milliseconds, clamped to the record's range.
pub(crate) fn duration_ms(rtt: Duration) -> u32 {
    rtt.as_millis().min(u32::MAX as u128) as u32
}

/// Ping adapter: one ping, one result, failures folded into the result.
pub struct PeerPingProbe {
    transport: Arc<dyn TransportHandle>,
}

impl PeerPingProbe {
    pub fn new(transport: Arc<dyn TransportHandle>) -> Self {
        Self { transport }
    }

    /// Ping `peer` once. A transport error is a failed probe, not an error.
    pub async fn probe(&self, peer: PeerId) -> ProbeResult {
        match self.transport.ping(peer).await {
            Ok(rtt) => ProbeResult::success(Some(duration_ms(rtt))),
            Err(err) => {
                debug!("Ping to {peer} failed: {err}");
                ProbeResult::failure()
            }
        }
    }
}
