//! Connection health engine
//!
//! One trustworthy verdict from noisy signals: relay-link presence, ping
//! round-trips, and observed application-level exchanges. Pure derivation
//! and reduction live in `status` / `reducer`; scheduling, hysteresis
//! bookkeeping, and callback edges live in `monitor`; the reservation
//! keep-alive lives in `keepalive`.

pub mod keepalive;
pub mod monitor;
pub mod reducer;
pub mod status;

pub use keepalive::{KeepAliveConfig, KeepAlivePinger, KeepAliveState};
pub use monitor::{HealthMonitor, MonitorConfig, MonitorState};
pub use reducer::{reduce, ConnectionHealth, HealthEdges};
pub use status::{derive_status, HealthStatus};
