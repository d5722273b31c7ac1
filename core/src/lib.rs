// Relaywatch Core: peer connection health monitoring and keep-alive
//
// Sits between a host application and its peer-to-peer transport: infers a
// single connectivity verdict from relay-link presence, ping round-trips,
// and observed data exchanges, with hysteresis so transient blips don't
// flap, and keeps idle circuit-relay reservations alive.
//
// The transport itself (dialing, negotiation, streams) is the host's job
// and is consumed through the narrow seams in `transport`.

pub mod health;
pub mod signal;
pub mod transport;

use thiserror::Error;

pub use health::keepalive::{KeepAliveConfig, KeepAlivePinger, KeepAliveState};
pub use health::monitor::{HealthMonitor, MonitorConfig, MonitorState};
pub use health::reducer::{ConnectionHealth, HealthEdges};
pub use health::status::HealthStatus;
pub use signal::ObservedConnectivity;
pub use transport::abstraction::{
    ConnectionInfo, ConnectionState, PeerPingProbe, ProbeResult, TransportError, TransportHandle,
};
pub use transport::relays::{RelayConnectivityProbe, RelayDirectory};

/// Errors raised at construction time. Runtime probe failures are signal,
/// not errors: they are folded into the published health record and never
/// surface here.
#[derive(Debug, Error, Clone)]
pub enum HealthError {
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}
