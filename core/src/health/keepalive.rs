//! Circuit-relay keep-alive pinger
//!
//! An idle relayed link loses its reservation; this pinger keeps it warm by
//! pinging the remote peer on a fixed interval, independent of whatever the
//! health monitor is probing. Three consecutive outright failures declare
//! the connection lost; slow pings are logged but never counted.

use crate::signal::ObservedConnectivity;
use crate::transport::abstraction::{duration_ms, TransportHandle};
use crate::HealthError;
use libp2p::PeerId;
use parking_lot::{Mutex, RwLock};
use std::str::FromStr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;
use tracing::{debug, info, warn};

#[derive(Debug, Clone)]
pub struct KeepAliveConfig {
    /// Ping cadence; must sit well under the relay's idle reclaim window.
    pub interval: Duration,
    /// Consecutive outright failures before the link is declared lost.
    pub failure_threshold: u32,
    /// Round-trips above this are logged but are not failures.
    pub warn_latency_ms: u32,
}

impl Default for KeepAliveConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(45),
            failure_threshold: 3,
            warn_latency_ms: 5000,
        }
    }
}

impl KeepAliveConfig {
    fn validate(&self) -> Result<(), HealthError> {
        if self.interval.is_zero() {
            return Err(HealthError::InvalidConfig("interval must be non-zero".into()));
        }
        if self.failure_threshold == 0 {
            return Err(HealthError::InvalidConfig("failure_threshold must be at least 1".into()));
        }
        Ok(())
    }
}

/// Per-session ping bookkeeping. Fully reset when the remote peer changes,
/// discarded when the pinger is stopped.
#[derive(Debug, Clone)]
pub struct KeepAliveState {
    pub consecutive_failures: u32,
    pub last_latency_ms: Option<u32>,
    pub is_healthy: bool,
    pub lost_callback_fired: bool,
}

impl Default for KeepAliveState {
    fn default() -> Self {
        Self {
            consecutive_failures: 0,
            last_latency_ms: None,
            is_healthy: true,
            lost_callback_fired: false,
        }
    }
}

type LostCallback = Box<dyn Fn() + Send + Sync>;

struct PingerInner {
    config: KeepAliveConfig,
    transport: Arc<dyn TransportHandle>,
    observed: ObservedConnectivity,
    state: RwLock<KeepAliveState>,
    remote_peer: RwLock<Option<PeerId>>,
    /// Bumped on every peer change/stop; a ping resolving into a stale
    /// session is discarded.
    session: AtomicU64,
    on_connection_lost: RwLock<Vec<LostCallback>>,
}

/// Keep-alive pinger for the active remote-peer session.
pub struct KeepAlivePinger {
    inner: Arc<PingerInner>,
    shutdown: Mutex<Option<Arc<Notify>>>,
}

impl KeepAlivePinger {
    pub fn new(
        config: KeepAliveConfig,
        transport: Arc<dyn TransportHandle>,
        observed: ObservedConnectivity,
    ) -> Result<Self, HealthError> {
        config.validate()?;
        Ok(Self {
            inner: Arc::new(PingerInner {
                config,
                transport,
                observed,
                state: RwLock::new(KeepAliveState::default()),
                remote_peer: RwLock::new(None),
                session: AtomicU64::new(0),
                on_connection_lost: RwLock::new(Vec::new()),
            }),
            shutdown: Mutex::new(None),
        })
    }

    /// Assign, replace, or clear the remote peer. Any running interval is
    /// cancelled, all counters and flags reset, and a fresh interval starts
    /// for the new peer. Malformed identifiers are treated as "no peer"
    /// rather than propagated as an error. Must be called within a tokio
    /// runtime when assigning a peer.
    pub fn set_remote_peer(&self, peer: Option<&str>) {
        let parsed = peer.and_then(|raw| match PeerId::from_str(raw) {
            Ok(peer_id) => Some(peer_id),
            Err(err) => {
                warn!("Malformed keep-alive peer id {raw}: {err}; treating as no peer");
                None
            }
        });

        let mut shutdown = self.shutdown.lock();
        {
            let mut slot = self.inner.remote_peer.write();
            if *slot == parsed {
                return;
            }
            *slot = parsed;
        }

        let session = self.inner.session.fetch_add(1, Ordering::SeqCst) + 1;
        if let Some(notify) = shutdown.take() {
            notify.notify_one();
        }
        *self.inner.state.write() = KeepAliveState::default();

        if let Some(peer) = parsed {
            let notify = Arc::new(Notify::new());
            spawn_driver(self.inner.clone(), peer, session, notify.clone());
            *shutdown = Some(notify);
            info!("Keep-alive pinger started for {peer}");
        } else {
            debug!("Keep-alive pinger idle: no remote peer");
        }
    }

    /// Stop pinging and discard the session state.
    pub fn stop(&self) {
        let mut shutdown = self.shutdown.lock();
        self.inner.session.fetch_add(1, Ordering::SeqCst);
        if let Some(notify) = shutdown.take() {
            notify.notify_one();
        }
        *self.inner.remote_peer.write() = None;
        *self.inner.state.write() = KeepAliveState::default();
    }

    /// One manual ping to the current peer. Returns the round-trip in
    /// milliseconds on success; failures feed the same counters as the
    /// interval pings.
    pub async fn ping(&self) -> Option<u32> {
        let peer = (*self.inner.remote_peer.read())?;
        let session = self.inner.session.load(Ordering::SeqCst);
        ping_once(&self.inner, peer, session).await
    }

    /// Snapshot of the current session state.
    pub fn state(&self) -> KeepAliveState {
        self.inner.state.read().clone()
    }

    pub fn remote_peer(&self) -> Option<PeerId> {
        *self.inner.remote_peer.read()
    }

    pub fn on_connection_lost(&self, callback: impl Fn() + Send + Sync + 'static) {
        self.inner.on_connection_lost.write().push(Box::new(callback));
    }
}

impl Drop for KeepAlivePinger {
    fn drop(&mut self) {
        let mut shutdown = self.shutdown.lock();
        self.inner.session.fetch_add(1, Ordering::SeqCst);
        if let Some(notify) = shutdown.take() {
            notify.notify_one();
        }
    }
}

fn spawn_driver(inner: Arc<PingerInner>, peer: PeerId, session: u64, shutdown: Arc<Notify>) {
    tokio::spawn(async move {
        loop {
            tokio::select! {
                _ = tokio::time::sleep(inner.config.interval) => {}
                _ = shutdown.notified() => break,
            }
            if inner.session.load(Ordering::SeqCst) != session {
                break;
            }
            ping_once(&inner, peer, session).await;
        }
        debug!("Keep-alive driver for {peer} stopped");
    });
}

async fn ping_once(inner: &Arc<PingerInner>, peer: PeerId, session: u64) -> Option<u32> {
    let result = inner.transport.ping(peer).await;

    // The peer may have changed while the ping was in flight.
    if inner.session.load(Ordering::SeqCst) != session {
        debug!("Discarding keep-alive result from stale session");
        return None;
    }

    match result {
        Ok(rtt) => {
            let latency_ms = duration_ms(rtt);
            if latency_ms > inner.config.warn_latency_ms {
                warn!("Keep-alive ping to {peer} slow: {latency_ms}ms");
            }
            let mut state = inner.state.write();
            state.consecutive_failures = 0;
            state.last_latency_ms = Some(latency_ms);
            state.is_healthy = true;
            Some(latency_ms)
        }
        Err(err) => {
            debug!("Keep-alive ping to {peer} failed: {err}");
            let fire = {
                let mut state = inner.state.write();
                state.consecutive_failures = state.consecutive_failures.saturating_add(1);
                if state.consecutive_failures >= inner.config.failure_threshold {
                    state.is_healthy = false;
                    if !state.lost_callback_fired {
                        state.lost_callback_fired = true;
                        true
                    } else {
                        false
                    }
                } else {
                    false
                }
            };
            if fire {
                warn!(
                    "Connection to {peer} lost after {} consecutive keep-alive failures",
                    inner.config.failure_threshold
                );
                // Proven disconnect: the observed flag must stop reading
                // connected until a real exchange succeeds again.
                inner.observed.set(false);
                for callback in inner.on_connection_lost.read().iter() {
                    callback();
                }
            }
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::abstraction::{ConnectionInfo, TransportError};
    use async_trait::async_trait;
    use std::sync::atomic::AtomicBool;

    struct TogglableTransport {
        reachable: AtomicBool,
        rtt: Duration,
    }

    impl TogglableTransport {
        fn new(reachable: bool, rtt: Duration) -> Self {
            Self {
                reachable: AtomicBool::new(reachable),
                rtt,
            }
        }
    }

    #[async_trait]
    impl TransportHandle for TogglableTransport {
        fn open_connections(&self) -> Vec<ConnectionInfo> {
            Vec::new()
        }

        async fn ping(&self, peer: PeerId) -> Result<Duration, TransportError> {
            if self.reachable.load(Ordering::SeqCst) {
                Ok(self.rtt)
            } else {
                Err(TransportError::Unreachable(peer.to_string()))
            }
        }
    }

    const PEER: &str = "QmNnooDu7bfjPFoTZYxMNLWUQJyrVwtbZg5gBMjTezGAJN";

    fn pinger(transport: Arc<TogglableTransport>) -> KeepAlivePinger {
        KeepAlivePinger::new(
            KeepAliveConfig {
                interval: Duration::from_secs(3600), // interval pings out of the way
                ..Default::default()
            },
            transport,
            ObservedConnectivity::new(),
        )
        .unwrap()
    }

    #[test]
    fn test_default_config() {
        let config = KeepAliveConfig::default();
        assert_eq!(config.interval, Duration::from_secs(45));
        assert_eq!(config.failure_threshold, 3);
        assert_eq!(config.warn_latency_ms, 5000);
    }

    #[test]
    fn test_zero_interval_is_rejected() {
        let config = KeepAliveConfig {
            interval: Duration::ZERO,
            ..Default::default()
        };
        let result = KeepAlivePinger::new(
            config,
            Arc::new(TogglableTransport::new(true, Duration::from_millis(1))),
            ObservedConnectivity::new(),
        );
        assert!(matches!(result, Err(HealthError::InvalidConfig(_))));
    }

    #[test]
    fn test_fresh_state() {
        let state = KeepAliveState::default();
        assert_eq!(state.consecutive_failures, 0);
        assert_eq!(state.last_latency_ms, None);
        assert!(state.is_healthy);
        assert!(!state.lost_callback_fired);
    }

    #[tokio::test]
    async fn test_malformed_peer_id_is_no_peer() {
        let pinger = pinger(Arc::new(TogglableTransport::new(true, Duration::from_millis(5))));
        pinger.set_remote_peer(Some("not-a-peer"));
        assert_eq!(pinger.remote_peer(), None);
        assert_eq!(pinger.ping().await, None);
    }

    #[tokio::test]
    async fn test_manual_ping_success_resets_counters() {
        let transport = Arc::new(TogglableTransport::new(false, Duration::from_millis(5)));
        let pinger = pinger(transport.clone());
        pinger.set_remote_peer(Some(PEER));

        assert_eq!(pinger.ping().await, None);
        assert_eq!(pinger.ping().await, None);
        assert_eq!(pinger.state().consecutive_failures, 2);

        transport.reachable.store(true, Ordering::SeqCst);
        assert_eq!(pinger.ping().await, Some(5));

        let state = pinger.state();
        assert_eq!(state.consecutive_failures, 0);
        assert_eq!(state.last_latency_ms, Some(5));
        assert!(state.is_healthy);
    }

    #[tokio::test]
    async fn test_terminal_callback_fires_exactly_once() {
        let transport = Arc::new(TogglableTransport::new(false, Duration::from_millis(5)));
        let pinger = pinger(transport);
        let fired = Arc::new(AtomicU64::new(0));
        let counter = fired.clone();
        pinger.on_connection_lost(move || {
            counter.fetch_add(1, Ordering::SeqCst);
        });
        pinger.set_remote_peer(Some(PEER));

        for _ in 0..3 {
            pinger.ping().await;
        }
        assert_eq!(fired.load(Ordering::SeqCst), 1);
        assert!(!pinger.state().is_healthy);

        // A fourth consecutive failure must not fire again.
        pinger.ping().await;
        assert_eq!(fired.load(Ordering::SeqCst), 1);
        assert_eq!(pinger.state().consecutive_failures, 4);
    }

    #[tokio::test]
    async fn test_terminal_loss_clears_observed_signal() {
        let observed = ObservedConnectivity::new();
        observed.set(true);
        let pinger = KeepAlivePinger::new(
            KeepAliveConfig {
                interval: Duration::from_secs(3600),
                ..Default::default()
            },
            Arc::new(TogglableTransport::new(false, Duration::from_millis(1))),
            observed.clone(),
        )
        .unwrap();
        pinger.set_remote_peer(Some(PEER));

        for _ in 0..3 {
            pinger.ping().await;
        }
        assert!(!observed.get());
    }

    #[tokio::test]
    async fn test_peer_change_resets_session() {
        let transport = Arc::new(TogglableTransport::new(false, Duration::from_millis(5)));
        let pinger = pinger(transport);
        let fired = Arc::new(AtomicU64::new(0));
        let counter = fired.clone();
        pinger.on_connection_lost(move || {
            counter.fetch_add(1, Ordering::SeqCst);
        });
        pinger.set_remote_peer(Some(PEER));

        for _ in 0..3 {
            pinger.ping().await;
        }
        assert_eq!(fired.load(Ordering::SeqCst), 1);

        // New session: counters and the fired guard reset, so the terminal
        // callback is re-armed for the new peer.
        pinger.set_remote_peer(Some("QmQCU2EcMqAqQPR2i9bChDtGNJchTbq5TbXJJ16u19uLTa"));
        let state = pinger.state();
        assert_eq!(state.consecutive_failures, 0);
        assert!(state.is_healthy);
        assert!(!state.lost_callback_fired);

        for _ in 0..3 {
            pinger.ping().await;
        }
        assert_eq!(fired.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_same_peer_is_a_noop() {
        let transport = Arc::new(TogglableTransport::new(false, Duration::from_millis(5)));
        let pinger = pinger(transport);
        pinger.set_remote_peer(Some(PEER));
        pinger.ping().await;
        assert_eq!(pinger.state().consecutive_failures, 1);

        pinger.set_remote_peer(Some(PEER));
        assert_eq!(pinger.state().consecutive_failures, 1, "no reset on same id");
    }

    #[tokio::test]
    async fn test_slow_ping_is_not_a_failure() {
        let pinger = KeepAlivePinger::new(
            KeepAliveConfig {
                interval: Duration::from_secs(3600),
                warn_latency_ms: 10,
                ..Default::default()
            },
            Arc::new(TogglableTransport::new(true, Duration::from_millis(50))),
            ObservedConnectivity::new(),
        )
        .unwrap();
        pinger.set_remote_peer(Some(PEER));

        assert_eq!(pinger.ping().await, Some(50));
        let state = pinger.state();
        assert_eq!(state.consecutive_failures, 0);
        assert!(state.is_healthy);
    }

    #[tokio::test]
    async fn test_stop_discards_state() {
        let transport = Arc::new(TogglableTransport::new(false, Duration::from_millis(5)));
        let pinger = pinger(transport);
        pinger.set_remote_peer(Some(PEER));
        pinger.ping().await;
        assert_eq!(pinger.state().consecutive_failures, 1);

        pinger.stop();
        assert_eq!(pinger.remote_peer(), None);
        assert_eq!(pinger.state().consecutive_failures, 0);
        assert_eq!(pinger.ping().await, None);
    }
}
