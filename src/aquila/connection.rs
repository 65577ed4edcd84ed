//! Connection lifecycle for the Aquila service.
//!
//! [`ConnectionManager`] owns at most one channel at a time. It subscribes to
//! the channel's connectivity and reacts to failures by backing off, dropping
//! the channel and reconnecting to a freshly resolved host. Readiness is a
//! level-triggered `watch` signal that callers can wait on with a timeout.
//!
//! Connectivity callbacks hold only a [`Weak`] reference to the manager's
//! state, so a channel can never keep a dropped manager alive. Each channel
//! is tagged with a generation number; events from a superseded channel are
//! ignored. Events are handled one at a time, so at most one reconnect is in
//! progress.

use metrics::counter;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::aquila::transport::{
    AddressProvider, ChannelConnectivity, ConnectivityCallback, Connector, ScoringChannel,
    ScoringStub, SubscriptionId,
};
use crate::constants::retry::DEFAULT_PORT;
use crate::error::{AppError, Result};
use crate::reliability::metrics::names;
use crate::reliability::ReconnectBackoff;

/// Coarse state of the managed connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Ready,
    Failed,
}

/// Point-in-time view of the manager, for logs and health output.
#[derive(Debug, Clone)]
pub struct ConnectionStats {
    pub state: ConnectionState,
    pub consecutive_failures: u32,
    pub reconnects: u64,
    pub last_backoff: Option<Duration>,
    pub generation: u64,
    pub shutting_down: bool,
}

struct Slot {
    channel: Option<Arc<dyn ScoringChannel>>,
    stub: Option<Arc<dyn ScoringStub>>,
    subscription: Option<SubscriptionId>,
    generation: u64,
    state: ConnectionState,
}

struct ConnectionInner {
    address_provider: Arc<dyn AddressProvider>,
    connector: Arc<dyn Connector>,
    port: u16,
    backoff: ReconnectBackoff,
    slot: Mutex<Slot>,
    ready: watch::Sender<bool>,
    shutdown: CancellationToken,
    /// Held for the whole handling of one connectivity event, recovery included.
    events: tokio::sync::Mutex<()>,
    consecutive_failures: AtomicU32,
    reconnects: AtomicU64,
    last_backoff: Mutex<Option<Duration>>,
}

impl ConnectionInner {
    fn connect(self: &Arc<Self>, force_refresh: bool) -> Result<()> {
        let mut slot = self.slot.lock();
        if self.shutdown.is_cancelled() {
            return Err(AppError::Connection(
                "connection manager is shutting down".into(),
            ));
        }
        if slot.channel.is_some() {
            return Ok(());
        }

        let host = self.address_provider.get_address(force_refresh)?;
        debug!("Establishing connection on {}:{}", host, self.port);
        let channel = self.connector.open(&host, self.port)?;

        slot.generation += 1;
        let callback = Self::connectivity_callback(Arc::downgrade(self), slot.generation);
        slot.stub = Some(channel.stub());
        slot.state = ConnectionState::Connecting;
        // Subscribe last: the channel may report synchronously.
        slot.subscription = Some(channel.subscribe(callback, true));
        slot.channel = Some(channel);
        Ok(())
    }

    fn disconnect(&self) {
        let mut slot = self.slot.lock();
        self.ready.send_replace(false);
        if let Some(channel) = slot.channel.take() {
            if let Some(id) = slot.subscription.take() {
                channel.unsubscribe(id);
            }
            slot.stub = None;
            channel.close();
            debug!("Disconnected from Aquila (generation {})", slot.generation);
        }
        slot.state = ConnectionState::Disconnected;
    }

    fn connectivity_callback(weak: Weak<Self>, generation: u64) -> ConnectivityCallback {
        Arc::new(move |status| {
            let Some(inner) = weak.upgrade() else {
                return;
            };
            match tokio::runtime::Handle::try_current() {
                Ok(handle) => {
                    handle.spawn(async move {
                        inner.dispatch(Some(generation), status).await;
                    });
                }
                Err(_) => warn!("Dropping connectivity event {}: no runtime", status),
            }
        })
    }

    /// Handle one event, one at a time. Events queued behind a recovery are
    /// checked against the channel that recovery installed.
    async fn dispatch(self: &Arc<Self>, generation: Option<u64>, status: ChannelConnectivity) {
        let _serial = self.events.lock().await;
        if self.shutdown.is_cancelled() {
            return;
        }
        if let Some(generation) = generation {
            let current = self.slot.lock().generation;
            if generation != current {
                debug!(
                    "Ignoring {} from superseded channel (generation {} < {})",
                    status, generation, current
                );
                return;
            }
        }
        self.on_connectivity_changed(status).await;
    }

    async fn on_connectivity_changed(self: &Arc<Self>, status: ChannelConnectivity) {
        if status.is_failure() {
            self.recover(status).await;
            return;
        }
        if *self.ready.borrow() {
            return;
        }
        match status {
            ChannelConnectivity::Ready => {
                self.consecutive_failures.store(0, Ordering::SeqCst);
                self.slot.lock().state = ConnectionState::Ready;
                self.ready.send_replace(true);
                info!("Aquila server has been reached");
            }
            other => debug!("Channel connectivity is {}", other),
        }
    }

    /// Back off, then replace the channel with one to a freshly resolved host.
    async fn recover(self: &Arc<Self>, status: ChannelConnectivity) {
        warn!("Lost connection to Aquila ({}); trying another server", status);
        self.ready.send_replace(false);
        let generation = {
            let mut slot = self.slot.lock();
            slot.state = ConnectionState::Failed;
            slot.generation
        };

        loop {
            let failures = self.consecutive_failures.fetch_add(1, Ordering::SeqCst) + 1;
            let delay = self.backoff.delay(failures);
            *self.last_backoff.lock() = Some(delay);
            debug!(failures, ?delay, "Backing off before reconnect");

            tokio::select! {
                _ = tokio::time::sleep(delay) => {}
                _ = self.shutdown.cancelled() => {
                    debug!("Reconnect abandoned: shutting down");
                    return;
                }
            }

            if self.slot.lock().generation != generation {
                debug!("Channel replaced during backoff; reconnect abandoned");
                return;
            }
            self.disconnect();
            match self.connect(true) {
                Ok(()) => {
                    self.reconnects.fetch_add(1, Ordering::Relaxed);
                    counter!(names::RECONNECTS_TOTAL).increment(1);
                    return;
                }
                Err(_) if self.shutdown.is_cancelled() => return,
                Err(e) => {
                    error!("Reconnect failed: {}", e);
                    self.slot.lock().state = ConnectionState::Failed;
                }
            }
        }
    }

    fn shutdown(&self) {
        if !self.shutdown.is_cancelled() {
            debug!("Connection manager shutting down");
        }
        self.shutdown.cancel();
        self.disconnect();
    }
}

/// Owns the channel to the Aquila service and keeps it healthy.
///
/// Dropping the manager shuts it down.
pub struct ConnectionManager {
    inner: Arc<ConnectionInner>,
}

impl ConnectionManager {
    pub fn builder(
        address_provider: Arc<dyn AddressProvider>,
        connector: Arc<dyn Connector>,
    ) -> ConnectionManagerBuilder {
        ConnectionManagerBuilder::new(address_provider, connector)
    }

    /// Open a channel unless one is already open.
    ///
    /// Fails once [`shutdown`](Self::shutdown) has been called.
    pub fn connect(&self, force_refresh: bool) -> Result<()> {
        self.inner.connect(force_refresh)
    }

    /// Drop the current channel, if any. Idempotent.
    pub fn disconnect(&self) {
        self.inner.disconnect()
    }

    /// Feed a connectivity event as if the current channel had reported it.
    pub async fn on_connectivity_changed(&self, status: ChannelConnectivity) {
        self.inner.dispatch(None, status).await
    }

    /// Wait until the server is reachable. Returns `false` on timeout or
    /// shutdown.
    pub async fn wait_ready(&self, timeout: Duration) -> bool {
        if self.inner.shutdown.is_cancelled() {
            return false;
        }
        let mut ready = self.inner.ready.subscribe();
        let became_ready = async move { ready.wait_for(|r| *r).await.is_ok() };
        tokio::select! {
            result = tokio::time::timeout(timeout, became_ready) => result.unwrap_or(false),
            _ = self.inner.shutdown.cancelled() => false,
        }
    }

    pub fn is_ready(&self) -> bool {
        *self.inner.ready.borrow()
    }

    /// Stub for the current channel.
    pub fn stub(&self) -> Option<Arc<dyn ScoringStub>> {
        self.inner.slot.lock().stub.clone()
    }

    /// Begin shutdown. Idempotent; no further connects are accepted.
    pub fn shutdown(&self) {
        self.inner.shutdown()
    }

    pub fn is_shutting_down(&self) -> bool {
        self.inner.shutdown.is_cancelled()
    }

    /// Token cancelled when the manager shuts down.
    pub fn shutdown_token(&self) -> CancellationToken {
        self.inner.shutdown.clone()
    }

    pub fn state(&self) -> ConnectionState {
        self.inner.slot.lock().state
    }

    pub fn stats(&self) -> ConnectionStats {
        let (state, generation) = {
            let slot = self.inner.slot.lock();
            (slot.state, slot.generation)
        };
        ConnectionStats {
            state,
            consecutive_failures: self.inner.consecutive_failures.load(Ordering::SeqCst),
            reconnects: self.inner.reconnects.load(Ordering::Relaxed),
            last_backoff: *self.inner.last_backoff.lock(),
            generation,
            shutting_down: self.inner.shutdown.is_cancelled(),
        }
    }
}

impl Drop for ConnectionManager {
    fn drop(&mut self) {
        self.inner.shutdown();
    }
}

/// Builder for [`ConnectionManager`].
pub struct ConnectionManagerBuilder {
    address_provider: Arc<dyn AddressProvider>,
    connector: Arc<dyn Connector>,
    port: u16,
    backoff: ReconnectBackoff,
}

impl ConnectionManagerBuilder {
    pub fn new(address_provider: Arc<dyn AddressProvider>, connector: Arc<dyn Connector>) -> Self {
        Self {
            address_provider,
            connector,
            port: DEFAULT_PORT,
            backoff: ReconnectBackoff::default(),
        }
    }

    pub fn port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    pub fn backoff(mut self, backoff: ReconnectBackoff) -> Self {
        self.backoff = backoff;
        self
    }

    /// Build without connecting.
    pub fn build(self) -> ConnectionManager {
        let (ready, _) = watch::channel(false);
        ConnectionManager {
            inner: Arc::new(ConnectionInner {
                address_provider: self.address_provider,
                connector: self.connector,
                port: self.port,
                backoff: self.backoff,
                slot: Mutex::new(Slot {
                    channel: None,
                    stub: None,
                    subscription: None,
                    generation: 0,
                    state: ConnectionState::Disconnected,
                }),
                ready,
                shutdown: CancellationToken::new(),
                events: tokio::sync::Mutex::new(()),
                consecutive_failures: AtomicU32::new(0),
                reconnects: AtomicU64::new(0),
                last_backoff: Mutex::new(None),
            }),
        }
    }

    /// Build and open the first channel.
    pub fn connect(self) -> Result<ConnectionManager> {
        let manager = self.build();
        manager.connect(false)?;
        Ok(manager)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::aquila::testing::{FakeAddressProvider, FakeConnector, ScriptedStub};
    use crate::reliability::Jitter;

    fn backoff() -> ReconnectBackoff {
        ReconnectBackoff {
            base: Duration::from_millis(100),
            failure_cap: 10,
            jitter: Jitter::Fixed(1.0),
        }
    }

    fn manager(auto_ready: bool) -> (ConnectionManager, Arc<FakeAddressProvider>, Arc<FakeConnector>) {
        let provider = Arc::new(FakeAddressProvider::new(&["a", "b"]));
        let connector = Arc::new(FakeConnector::new(Arc::new(ScriptedStub::new()), auto_ready));
        let manager = ConnectionManager::builder(provider.clone(), connector.clone())
            .port(9000)
            .backoff(backoff())
            .build();
        (manager, provider, connector)
    }

    #[tokio::test]
    async fn test_connect_is_noop_when_connected() {
        let (manager, provider, connector) = manager(false);
        manager.connect(false).unwrap();
        manager.connect(false).unwrap();

        assert_eq!(connector.opened(), 1);
        assert_eq!(provider.calls(), vec![false]);
        assert_eq!(manager.state(), ConnectionState::Connecting);
        assert!(manager.stub().is_some());
    }

    #[tokio::test]
    async fn test_ready_event_sets_signal() {
        let (manager, _, connector) = manager(false);
        manager.connect(false).unwrap();
        assert!(!manager.is_ready());

        connector.channel(0).emit(ChannelConnectivity::Ready);
        assert!(manager.wait_ready(Duration::from_secs(1)).await);
        assert_eq!(manager.state(), ConnectionState::Ready);
        assert_eq!(manager.stats().consecutive_failures, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_wait_ready_times_out() {
        let (manager, _, _) = manager(false);
        manager.connect(false).unwrap();
        assert!(!manager.wait_ready(Duration::from_millis(50)).await);
    }

    #[tokio::test(start_paused = true)]
    async fn test_repeated_failures_grow_backoff() {
        let (manager, provider, connector) = manager(false);
        manager.connect(false).unwrap();

        let mut delays = Vec::new();
        for _ in 0..3 {
            manager
                .on_connectivity_changed(ChannelConnectivity::TransientFailure)
                .await;
            delays.push(manager.stats().last_backoff.unwrap());
        }

        let stats = manager.stats();
        assert_eq!(stats.consecutive_failures, 3);
        assert_eq!(stats.reconnects, 3);
        assert!(delays.windows(2).all(|w| w[0] < w[1]), "{:?}", delays);

        // Every reconnect asks for a fresh host and replaces the channel.
        assert_eq!(provider.calls(), vec![false, true, true, true]);
        assert_eq!(connector.opened(), 4);
        for i in 0..3 {
            assert!(connector.channel(i).is_closed());
            assert_eq!(connector.channel(i).subscriber_count(), 0);
        }
        assert!(!connector.channel(3).is_closed());
    }

    #[tokio::test(start_paused = true)]
    async fn test_ready_resets_failures() {
        let (manager, _, connector) = manager(false);
        manager.connect(false).unwrap();
        manager
            .on_connectivity_changed(ChannelConnectivity::TransientFailure)
            .await;
        assert_eq!(manager.stats().consecutive_failures, 1);

        connector.channel(1).emit(ChannelConnectivity::Ready);
        assert!(manager.wait_ready(Duration::from_secs(1)).await);
        assert_eq!(manager.stats().consecutive_failures, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_reconnect_retries_until_host_resolves() {
        let (manager, provider, connector) = manager(false);
        manager.connect(false).unwrap();
        provider.fail_next(2);

        manager
            .on_connectivity_changed(ChannelConnectivity::FatalFailure)
            .await;

        assert_eq!(manager.stats().consecutive_failures, 3);
        assert_eq!(connector.opened(), 2);
        assert!(manager.stub().is_some());
    }

    #[tokio::test]
    async fn test_stale_generation_ignored() {
        let (manager, _, connector) = manager(false);
        manager.connect(false).unwrap();
        manager.disconnect();
        manager.connect(false).unwrap();

        // The first channel's callback still fires, but it is out of date.
        connector.channel(0).emit_retained(ChannelConnectivity::Ready);
        tokio::task::yield_now().await;
        assert!(!manager.is_ready());

        connector.channel(1).emit(ChannelConnectivity::Ready);
        assert!(manager.wait_ready(Duration::from_secs(1)).await);
    }

    #[tokio::test(start_paused = true)]
    async fn test_events_during_backoff_do_not_start_second_recovery() {
        let (manager, _, connector) = manager(false);
        manager.connect(false).unwrap();
        let failing = connector.channel(0);

        failing.emit(ChannelConnectivity::TransientFailure);
        tokio::task::yield_now().await;
        // The failing channel flaps while the manager is backing off.
        failing.emit(ChannelConnectivity::Ready);
        failing.emit(ChannelConnectivity::TransientFailure);
        tokio::task::yield_now().await;
        assert!(!manager.is_ready());

        tokio::time::sleep(Duration::from_secs(5)).await;

        let stats = manager.stats();
        assert_eq!(connector.opened(), 2);
        assert_eq!(stats.reconnects, 1);
        assert_eq!(stats.consecutive_failures, 1);
        assert_eq!(stats.generation, 2);
        assert!(failing.is_closed());
        assert!(!connector.channel(1).is_closed());
    }

    #[tokio::test(start_paused = true)]
    async fn test_recovery_yields_to_channel_replaced_during_backoff() {
        let (manager, _, connector) = manager(false);
        manager.connect(false).unwrap();

        connector.channel(0).emit(ChannelConnectivity::TransientFailure);
        tokio::task::yield_now().await;
        manager.disconnect();
        manager.connect(false).unwrap();

        tokio::time::sleep(Duration::from_secs(5)).await;

        assert_eq!(connector.opened(), 2);
        assert_eq!(manager.stats().reconnects, 0);
        assert!(!connector.channel(1).is_closed());
        assert!(manager.stub().is_some());
    }

    #[tokio::test]
    async fn test_disconnect_is_idempotent() {
        let (manager, _, connector) = manager(true);
        manager.connect(false).unwrap();
        assert!(manager.wait_ready(Duration::from_secs(1)).await);

        manager.disconnect();
        manager.disconnect();
        assert!(!manager.is_ready());
        assert!(manager.stub().is_none());
        assert_eq!(manager.state(), ConnectionState::Disconnected);
        assert!(connector.channel(0).is_closed());
    }

    #[tokio::test]
    async fn test_shutdown_rejects_connect() {
        let (manager, _, connector) = manager(true);
        manager.connect(false).unwrap();
        manager.shutdown();
        manager.shutdown();

        assert!(manager.is_shutting_down());
        assert!(matches!(manager.connect(false), Err(AppError::Connection(_))));
        assert!(!manager.wait_ready(Duration::from_secs(1)).await);
        assert_eq!(connector.opened(), 1);
        assert!(connector.channel(0).is_closed());
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_interrupts_backoff() {
        let (manager, _, connector) = manager(false);
        let manager = Arc::new(manager);
        manager.connect(false).unwrap();

        let recovering = {
            let manager = manager.clone();
            tokio::spawn(async move {
                manager
                    .on_connectivity_changed(ChannelConnectivity::TransientFailure)
                    .await
            })
        };
        tokio::task::yield_now().await;
        manager.shutdown();
        recovering.await.unwrap();

        assert_eq!(connector.opened(), 1);
        assert_eq!(manager.stats().reconnects, 0);
    }

    #[tokio::test]
    async fn test_callback_does_not_keep_manager_alive() {
        let (manager, _, connector) = manager(false);
        manager.connect(false).unwrap();
        let token = manager.shutdown_token();
        drop(manager);

        assert!(token.is_cancelled());
        let channel = connector.channel(0);
        assert!(channel.is_closed());
        // The retained callback upgrades nothing and must not panic.
        channel.emit_retained(ChannelConnectivity::TransientFailure);
    }
}
