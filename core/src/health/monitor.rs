//! Health monitor, scheduling and callback edges
//!
//! Owns the published `ConnectionHealth` record and the driver task that
//! polls the probes: `Idle` until enabled, `AwaitingTransport` while the
//! transport handle is absent (short fixed retry), then `Polling` on the
//! configured interval. Probe failures are signal, not errors; the monitor
//! never raises, it only updates the record and fires callbacks.

use super::reducer::{reduce, ConnectionHealth};
use crate::signal::ObservedConnectivity;
use crate::transport::abstraction::{duration_ms, PeerPingProbe, ProbeResult, TransportHandle};
use crate::transport::relays::RelayConnectivityProbe;
use crate::HealthError;
use libp2p::PeerId;
use parking_lot::{Mutex, RwLock};
use std::str::FromStr;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;
use tracing::{debug, info, warn};
use web_time::Instant;

/// Scheduling and threshold configuration.
#[derive(Debug, Clone)]
pub struct MonitorConfig {
    /// Fixed polling interval once the transport is available.
    pub poll_interval: Duration,
    /// Retry cadence while waiting for the transport handle.
    pub retry_interval: Duration,
    /// Consecutive failures before a disconnect edge.
    pub failure_threshold: u32,
    /// Round-trips above this read as degraded.
    pub degraded_threshold_ms: u32,
    /// Ping the open relay peer for latency during each check.
    pub measure_relay_latency: bool,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(30),
            retry_interval: Duration::from_secs(1),
            failure_threshold: 3,
            degraded_threshold_ms: 3000,
            measure_relay_latency: true,
        }
    }
}

impl MonitorConfig {
    fn validate(&self) -> Result<(), HealthError> {
        if self.poll_interval.is_zero() {
            return Err(HealthError::InvalidConfig("poll_interval must be non-zero".into()));
        }
        if self.retry_interval.is_zero() {
            return Err(HealthError::InvalidConfig("retry_interval must be non-zero".into()));
        }
        if self.failure_threshold == 0 {
            return Err(HealthError::InvalidConfig("failure_threshold must be at least 1".into()));
        }
        Ok(())
    }
}

/// Scheduler state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MonitorState {
    /// Monitoring disabled or not yet started
    Idle,
    /// Enabled, waiting for the transport handle to appear
    AwaitingTransport,
    /// Interval-driven checks running
    Polling,
}

type DisconnectCallback = Box<dyn Fn() + Send + Sync>;

struct MonitorInner {
    config: MonitorConfig,
    relay_probe: RelayConnectivityProbe,
    observed: ObservedConnectivity,
    transport: RwLock<Option<Arc<dyn TransportHandle>>>,
    remote_peer: RwLock<Option<PeerId>>,
    health: RwLock<ConnectionHealth>,
    state: RwLock<MonitorState>,
    /// At-most-one in-flight check; overlapping triggers skip, never queue.
    check_in_flight: AtomicBool,
    /// Bumped on every enable/disable; results from an older generation are
    /// discarded so a late probe cannot resurrect a stopped monitor.
    generation: AtomicU64,
    /// Fire-once flags per failure episode, re-armed by reconnect edges.
    relay_callback_fired: AtomicBool,
    peer_callback_fired: AtomicBool,
    on_relay_disconnected: RwLock<Vec<DisconnectCallback>>,
    on_peer_disconnected: RwLock<Vec<DisconnectCallback>>,
}

/// Connection health monitor.
///
/// One logical actor per instance: a single driver task plus on-demand
/// manual triggers, serialized by the in-flight guard.
pub struct HealthMonitor {
    inner: Arc<MonitorInner>,
    shutdown: Mutex<Option<Arc<Notify>>>,
}

impl HealthMonitor {
    pub fn new(
        config: MonitorConfig,
        relay_probe: RelayConnectivityProbe,
        observed: ObservedConnectivity,
    ) -> Result<Self, HealthError> {
        config.validate()?;
        Ok(Self {
            inner: Arc::new(MonitorInner {
                config,
                relay_probe,
                observed,
                transport: RwLock::new(None),
                remote_peer: RwLock::new(None),
                health: RwLock::new(ConnectionHealth::default()),
                state: RwLock::new(MonitorState::Idle),
                check_in_flight: AtomicBool::new(false),
                generation: AtomicU64::new(0),
                relay_callback_fired: AtomicBool::new(false),
                peer_callback_fired: AtomicBool::new(false),
                on_relay_disconnected: RwLock::new(Vec::new()),
                on_peer_disconnected: RwLock::new(Vec::new()),
            }),
            shutdown: Mutex::new(None),
        })
    }

    /// Provide the transport handle once the host has constructed it. The
    /// driver picks it up within one retry interval.
    pub fn set_transport(&self, transport: Arc<dyn TransportHandle>) {
        *self.inner.transport.write() = Some(transport);
        debug!("Transport handle attached to health monitor");
    }

    /// Enable or disable monitoring. Enabling spawns the driver task and
    /// attempts an immediate check; disabling stops the timers synchronously
    /// and discards any in-flight result. Must be called within a tokio
    /// runtime when enabling.
    pub fn set_enabled(&self, enabled: bool) {
        let mut shutdown = self.shutdown.lock();
        if enabled {
            if shutdown.is_some() {
                return;
            }
            let generation = self.inner.generation.fetch_add(1, Ordering::SeqCst) + 1;
            *self.inner.state.write() = MonitorState::AwaitingTransport;
            let notify = Arc::new(Notify::new());
            spawn_driver(self.inner.clone(), generation, notify.clone());
            *shutdown = Some(notify);
            info!("Health monitoring enabled");
        } else {
            let Some(notify) = shutdown.take() else {
                return;
            };
            // Invalidate in-flight checks before waking the driver.
            self.inner.generation.fetch_add(1, Ordering::SeqCst);
            *self.inner.state.write() = MonitorState::Idle;
            notify.notify_one();
            info!("Health monitoring disabled");
        }
    }

    /// Change the monitored remote peer. Malformed identifiers are treated
    /// as "no peer to monitor". Peer-specific counters and flags reset;
    /// relay history is kept. Triggers one out-of-band check so the
    /// published verdict does not go stale until the next tick.
    pub fn set_remote_peer(&self, peer: Option<&str>) {
        let parsed = peer.and_then(|raw| match PeerId::from_str(raw) {
            Ok(peer_id) => Some(peer_id),
            Err(err) => {
                warn!("Malformed peer id {raw}: {err}; treating as no peer");
                None
            }
        });

        {
            let mut slot = self.inner.remote_peer.write();
            if *slot == parsed {
                return;
            }
            *slot = parsed;
        }
        debug!("Remote peer changed: {:?}", parsed.map(|p| p.to_string()));

        {
            let mut health = self.inner.health.write();
            health.peer_failures = 0;
            health.last_peer_ping_ms = None;
        }
        self.inner.peer_callback_fired.store(false, Ordering::SeqCst);

        if *self.inner.state.read() != MonitorState::Idle {
            let inner = self.inner.clone();
            let generation = inner.generation.load(Ordering::SeqCst);
            tokio::spawn(async move {
                run_check(&inner, generation).await;
            });
        }
    }

    /// Manual trigger. Respects the in-flight guard: a concurrent interval
    /// tick makes this a no-op skip. Does nothing while disabled.
    pub async fn check_now(&self) {
        if *self.inner.state.read() == MonitorState::Idle {
            return;
        }
        let generation = self.inner.generation.load(Ordering::SeqCst);
        run_check(&self.inner, generation).await;
    }

    /// Current published snapshot.
    pub fn health(&self) -> ConnectionHealth {
        self.inner.health.read().clone()
    }

    pub fn state(&self) -> MonitorState {
        *self.inner.state.read()
    }

    pub fn remote_peer(&self) -> Option<PeerId> {
        *self.inner.remote_peer.read()
    }

    pub fn on_relay_disconnected(&self, callback: impl Fn() + Send + Sync + 'static) {
        self.inner.on_relay_disconnected.write().push(Box::new(callback));
    }

    pub fn on_peer_disconnected(&self, callback: impl Fn() + Send + Sync + 'static) {
        self.inner.on_peer_disconnected.write().push(Box::new(callback));
    }
}

impl Drop for HealthMonitor {
    fn drop(&mut self) {
        let mut shutdown = self.shutdown.lock();
        if let Some(notify) = shutdown.take() {
            self.inner.generation.fetch_add(1, Ordering::SeqCst);
            notify.notify_one();
        }
    }
}

fn spawn_driver(inner: Arc<MonitorInner>, generation: u64, shutdown: Arc<Notify>) {
    tokio::spawn(async move {
        loop {
            if inner.generation.load(Ordering::SeqCst) != generation {
                break;
            }
            let delay = if inner.transport.read().is_some() {
                if *inner.state.read() == MonitorState::AwaitingTransport {
                    *inner.state.write() = MonitorState::Polling;
                    info!(
                        "Transport available; polling health every {:?}",
                        inner.config.poll_interval
                    );
                }
                run_check(&inner, generation).await;
                inner.config.poll_interval
            } else {
                inner.config.retry_interval
            };

            tokio::select! {
                _ = tokio::time::sleep(delay) => {}
                _ = shutdown.notified() => break,
            }
        }
        debug!("Health monitor driver stopped");
    });
}

/// Run one check unless another is already in flight.
async fn run_check(inner: &Arc<MonitorInner>, generation: u64) {
    if inner
        .check_in_flight
        .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
        .is_err()
    {
        debug!("Health check already in flight; skipping");
        return;
    }
    execute_check(inner, generation).await;
    inner.check_in_flight.store(false, Ordering::SeqCst);
}

/// One check cycle: snapshot connections, probe relay then peer, reduce,
/// publish, then fire callbacks. The order matters: callbacks must observe
/// the fully updated record.
async fn execute_check(inner: &Arc<MonitorInner>, generation: u64) {
    let transport = inner.transport.read().clone();
    let Some(transport) = transport else {
        return;
    };

    let connections = transport.open_connections();
    let mut relay_result = inner.relay_probe.probe(&connections);

    // Link presence is authoritative; the latency ping only feeds the
    // latency field and a failure here never marks the relay down.
    if relay_result.connected && inner.config.measure_relay_latency {
        if let Some(relay_peer) = inner.relay_probe.open_relay_peer(&connections) {
            if let Ok(rtt) = transport.ping(relay_peer).await {
                relay_result.latency_ms = Some(duration_ms(rtt));
            }
        }
    }

    let remote_peer = *inner.remote_peer.read();
    let peer_expected = remote_peer.is_some();
    let peer_result = match remote_peer {
        Some(peer) => PeerPingProbe::new(transport.clone()).probe(peer).await,
        None => ProbeResult::failure(),
    };

    let (next, edges) = {
        let prev = inner.health.read().clone();
        reduce(
            &prev,
            relay_result,
            peer_result,
            inner.observed.get(),
            peer_expected,
            Instant::now(),
            inner.config.failure_threshold,
            inner.config.degraded_threshold_ms,
        )
    };

    // The monitor must not publish after teardown: a ping that was in
    // flight when monitoring was disabled resolves into a stale generation.
    if inner.generation.load(Ordering::SeqCst) != generation {
        debug!("Discarding health check result from stale generation");
        return;
    }

    *inner.health.write() = next.clone();

    if edges.relay_reconnected {
        inner.relay_callback_fired.store(false, Ordering::SeqCst);
    }
    if edges.peer_reconnected {
        inner.peer_callback_fired.store(false, Ordering::SeqCst);
    }

    if edges.relay_disconnected && !inner.relay_callback_fired.swap(true, Ordering::SeqCst) {
        warn!(
            "Relay link lost after {} consecutive failed checks",
            next.relay_failures
        );
        for callback in inner.on_relay_disconnected.read().iter() {
            callback();
        }
    }

    if edges.peer_disconnected && !inner.peer_callback_fired.swap(true, Ordering::SeqCst) {
        warn!(
            "Peer link lost after {} consecutive failed pings",
            next.peer_failures
        );
        // Ping failures past the threshold are proof; the observed flag is
        // strictly evidence-based and must not keep reading connected.
        inner.observed.set(false);
        for callback in inner.on_peer_disconnected.read().iter() {
            callback();
        }
    }
}
