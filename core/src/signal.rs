//! Observed connectivity signal, shared evidence cell
//!
//! A single advisory boolean written by the data-plane whenever an
//! application-level message send/receive round-trips, and by the health
//! monitor / keep-alive pinger once ping failures prove the link is down.
//! Last write wins; readers tolerate staleness.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Cloneable handle to the shared observed-connectivity cell.
///
/// Constructor-injected into both the data-plane and the monitors, so tests
/// and multiple monitor instances can use independent cells instead of a
/// process-wide singleton.
#[derive(Debug, Clone, Default)]
pub struct ObservedConnectivity {
    cell: Arc<AtomicBool>,
}

impl ObservedConnectivity {
    /// Create a fresh cell. Starts `false`: connectivity is never assumed,
    /// only proven by a successful exchange.
    pub fn new() -> Self {
        Self::default()
    }

    /// Latest evidence: `true` only after a proven successful exchange.
    pub fn get(&self) -> bool {
        self.cell.load(Ordering::Relaxed)
    }

    /// Record new evidence. Advisory, last write wins.
    pub fn set(&self, connected: bool) {
        self.cell.store(connected, Ordering::Relaxed);
    }
}
