//! Connection lifecycle.
//!
//! A [`ConnectionManager`] owns one logical push connection. A background
//! driver task opens the transport, pumps inbound messages into the
//! [`EventRouter`], and on every close or error schedules another attempt
//! according to the [`ReconnectPolicy`]. It retries until
//! [`disconnect`](ConnectionManager::disconnect) is called.

use codegauge_types::UserId;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::router::EventRouter;
use crate::subscription::SubscriptionRegistry;
use crate::transport::{Transport, TransportEvent, TransportReceiver};

/// Connection state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionState {
    /// No transport session.
    Disconnected,
    /// Opening a session.
    Connecting,
    /// Session open.
    Connected,
}

/// Named causes of a state transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Trigger {
    /// The caller asked to connect.
    ConnectRequested,
    /// The transport opened.
    Opened,
    /// The transport closed.
    Closed,
    /// The transport failed.
    Errored,
    /// The reconnect delay elapsed.
    ReconnectTimerFired,
    /// The caller asked to disconnect.
    DisconnectRequested,
}

impl ConnectionState {
    /// Returns the state after `trigger`. Triggers that make no sense in the
    /// current state leave it unchanged.
    pub fn on(self, trigger: Trigger) -> ConnectionState {
        use ConnectionState::*;
        match (self, trigger) {
            (_, Trigger::DisconnectRequested) => Disconnected,
            (Disconnected, Trigger::ConnectRequested | Trigger::ReconnectTimerFired) => Connecting,
            (Connecting, Trigger::Opened) => Connected,
            (Connecting | Connected, Trigger::Closed | Trigger::Errored) => Disconnected,
            (state, _) => state,
        }
    }
}

fn default_delay_ms() -> u64 {
    5_000
}

fn default_max_ms() -> u64 {
    60_000
}

fn default_multiplier() -> f64 {
    2.0
}

/// How long to wait before each reconnection attempt.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ReconnectPolicy {
    /// Same delay every time.
    Fixed {
        /// Delay in milliseconds.
        #[serde(default = "default_delay_ms")]
        delay_ms: u64,
    },
    /// Delay grows by `multiplier` per failed attempt, capped at `max_ms`.
    Exponential {
        /// First delay in milliseconds.
        #[serde(default = "default_delay_ms")]
        initial_ms: u64,
        /// Upper bound in milliseconds.
        #[serde(default = "default_max_ms")]
        max_ms: u64,
        /// Growth factor.
        #[serde(default = "default_multiplier")]
        multiplier: f64,
        /// Add up to 25% random jitter.
        #[serde(default)]
        jitter: bool,
    },
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        ReconnectPolicy::Fixed {
            delay_ms: default_delay_ms(),
        }
    }
}

impl ReconnectPolicy {
    /// Delay before the given attempt (1-based) since the last successful
    /// open.
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        match *self {
            ReconnectPolicy::Fixed { delay_ms } => Duration::from_millis(delay_ms),
            ReconnectPolicy::Exponential {
                initial_ms,
                max_ms,
                multiplier,
                jitter,
            } => {
                let exponent = attempt.saturating_sub(1).min(i32::MAX as u32) as i32;
                let delay_ms = (initial_ms as f64 * multiplier.powi(exponent)).min(max_ms as f64);
                if jitter {
                    let jitter_factor = 1.0 + rand::random::<f64>() * 0.25;
                    Duration::from_millis((delay_ms * jitter_factor) as u64)
                } else {
                    Duration::from_millis(delay_ms as u64)
                }
            }
        }
    }
}

struct Inner {
    transport: Arc<dyn Transport>,
    router: Arc<EventRouter>,
    registry: Arc<SubscriptionRegistry>,
    policy: ReconnectPolicy,
    state: watch::Sender<ConnectionState>,
    connectivity: watch::Sender<bool>,
    sessions: broadcast::Sender<u64>,
    session_count: AtomicU64,
}

impl Inner {
    fn transition(&self, trigger: Trigger) -> ConnectionState {
        let mut next = ConnectionState::Disconnected;
        self.state.send_if_modified(|state| {
            next = state.on(trigger);
            let changed = *state != next;
            *state = next;
            changed
        });
        debug!(?trigger, state = ?next, "Connection state");
        next
    }

    fn set_connectivity(&self, connected: bool) {
        self.connectivity
            .send_if_modified(|current| std::mem::replace(current, connected) != connected);
    }
}

struct Driver {
    handle: JoinHandle<()>,
    cancel: CancellationToken,
}

/// Owns the push connection and its reconnect loop.
pub struct ConnectionManager {
    inner: Arc<Inner>,
    driver: Mutex<Option<Driver>>,
}

impl ConnectionManager {
    /// Create a manager over `transport` that feeds `router`.
    pub fn new(
        transport: Arc<dyn Transport>,
        router: Arc<EventRouter>,
        policy: ReconnectPolicy,
    ) -> Self {
        let (state, state_rx) = watch::channel(ConnectionState::Disconnected);
        let registry = Arc::new(SubscriptionRegistry::new(transport.clone(), state_rx));
        Self {
            inner: Arc::new(Inner {
                transport,
                router,
                registry,
                policy,
                state,
                connectivity: watch::channel(false).0,
                sessions: broadcast::channel(16).0,
                session_count: AtomicU64::new(0),
            }),
            driver: Mutex::new(None),
        }
    }

    /// Connects as `user`, or just updates the user's private topics if a
    /// connection already exists.
    pub async fn connect(&self, user: Option<UserId>) {
        self.inner.registry.set_user(user).await;
        self.inner.registry.register_public_topics().await;

        let mut driver = self.driver.lock();
        if driver.as_ref().is_some_and(|d| !d.handle.is_finished()) {
            return;
        }

        self.inner.transition(Trigger::ConnectRequested);
        let cancel = CancellationToken::new();
        let handle = tokio::spawn(drive(self.inner.clone(), cancel.clone()));
        *driver = Some(Driver { handle, cancel });
        info!("Connection driver started");
    }

    /// Stops the reconnect loop and closes the transport.
    ///
    /// Safe to call when already disconnected. Topic intent is kept, so a
    /// later [`connect`](Self::connect) restores every subscription.
    pub async fn disconnect(&self) {
        let driver = self.driver.lock().take();
        if let Some(driver) = driver {
            driver.cancel.cancel();
            if let Err(e) = driver.handle.await {
                warn!(error = %e, "Connection driver ended abnormally");
            }
        }

        self.inner.transport.close().await;
        self.inner.transition(Trigger::DisconnectRequested);
        self.inner.set_connectivity(false);
        self.inner.registry.on_disconnected();
        info!("Disconnected");
    }

    /// Connectivity as a stream of booleans.
    pub fn connectivity(&self) -> watch::Receiver<bool> {
        self.inner.connectivity.subscribe()
    }

    /// Returns true while a session is open.
    pub fn is_connected(&self) -> bool {
        *self.inner.connectivity.borrow()
    }

    /// Current connection state.
    pub fn state(&self) -> ConnectionState {
        *self.inner.state.borrow()
    }

    /// Stream of connection state changes.
    pub fn state_changes(&self) -> watch::Receiver<ConnectionState> {
        self.inner.state.subscribe()
    }

    /// Emits the session number each time a session is open and every
    /// registered topic has been resubscribed. Session 1 is the first
    /// connection; anything higher is a reconnection.
    pub fn sessions(&self) -> broadcast::Receiver<u64> {
        self.inner.sessions.subscribe()
    }

    /// The subscription registry.
    pub fn registry(&self) -> &Arc<SubscriptionRegistry> {
        &self.inner.registry
    }

    /// The event router inbound messages are dispatched to.
    pub fn router(&self) -> &Arc<EventRouter> {
        &self.inner.router
    }
}

impl Drop for ConnectionManager {
    fn drop(&mut self) {
        if let Some(driver) = self.driver.get_mut().take() {
            driver.cancel.cancel();
        }
    }
}

impl std::fmt::Debug for ConnectionManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionManager")
            .field("state", &self.state())
            .field("policy", &self.inner.policy)
            .finish()
    }
}

async fn drive(inner: Arc<Inner>, cancel: CancellationToken) {
    let mut attempt: u32 = 0;
    loop {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let opened = tokio::select! {
            _ = cancel.cancelled() => return,
            result = inner.transport.open(tx) => result,
        };

        match opened {
            Ok(()) => {
                attempt = 0;
                let session = inner.session_count.fetch_add(1, Ordering::SeqCst) + 1;
                inner.transition(Trigger::Opened);
                inner.set_connectivity(true);
                info!(session, "Connected");

                tokio::select! {
                    _ = cancel.cancelled() => return,
                    _ = inner.registry.resubscribe_all() => {}
                }
                let _ = inner.sessions.send(session);

                let Some(trigger) = pump(&inner, &mut rx, &cancel).await else {
                    return;
                };
                inner.transition(trigger);
                inner.set_connectivity(false);
                inner.registry.on_disconnected();
            }
            Err(e) => {
                warn!(error = %e, "Connection attempt failed");
                inner.transition(Trigger::Errored);
            }
        }

        attempt = attempt.saturating_add(1);
        let delay = inner.policy.delay_for_attempt(attempt);
        warn!(attempt, delay_ms = delay.as_millis() as u64, "Reconnecting");
        tokio::select! {
            _ = cancel.cancelled() => return,
            _ = tokio::time::sleep(delay) => {}
        }
        inner.transition(Trigger::ReconnectTimerFired);
    }
}

/// Forwards messages until the session ends. Returns `None` if cancelled.
async fn pump(
    inner: &Inner,
    rx: &mut TransportReceiver,
    cancel: &CancellationToken,
) -> Option<Trigger> {
    loop {
        let event = tokio::select! {
            _ = cancel.cancelled() => return None,
            event = rx.recv() => event,
        };
        match event {
            Some(TransportEvent::Message { topic, payload }) => {
                inner.router.dispatch(&topic, &payload);
            }
            Some(TransportEvent::Closed { reason }) => {
                info!(reason = reason.as_deref().unwrap_or("none"), "Connection closed");
                return Some(Trigger::Closed);
            }
            Some(TransportEvent::Error { message }) => {
                warn!(error = %message, "Connection error");
                return Some(Trigger::Errored);
            }
            None => {
                warn!("Transport dropped its event channel");
                return Some(Trigger::Closed);
            }
        }
    }
}
