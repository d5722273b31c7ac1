//! Transport seams, narrow interfaces onto the p2p layer
//!
//! The health engine never dials, negotiates, or reads streams; it only
//! inspects connection snapshots and issues pings through these interfaces.

pub mod abstraction;
pub mod relays;

pub use abstraction::{
    ConnectionInfo, ConnectionState, PeerPingProbe, ProbeResult, TransportError, TransportHandle,
};
pub use relays::{RelayConnectivityProbe, RelayDirectory};
