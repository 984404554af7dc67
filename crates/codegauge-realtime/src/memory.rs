//! In-process transport.
//!
//! Behaves like a broker with a single client: messages published on a topic
//! are delivered only while the session is open and the topic is subscribed.
//! Used to drive the connection manager without a network.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};

use crate::error::{RealtimeError, Result};
use crate::transport::{SubscriptionHandle, Transport, TransportEvent, TransportSender};

#[derive(Debug, Default)]
struct State {
    events: Option<TransportSender>,
    subscriptions: HashMap<SubscriptionHandle, String>,
    next_id: u64,
    fail_opens: usize,
    failing_topics: HashSet<String>,
    open_calls: usize,
    subscribe_calls: usize,
}

/// An in-memory [`Transport`].
#[derive(Debug, Default)]
pub struct MemoryTransport {
    state: Mutex<State>,
}

impl MemoryTransport {
    /// Create a new transport with no open session.
    pub fn new() -> Self {
        Self::default()
    }

    /// Delivers a message to the client if `topic` is subscribed on an open
    /// session. Returns whether anything was delivered.
    pub fn publish(&self, topic: &str, payload: impl Into<String>) -> bool {
        let state = self.state.lock();
        let Some(events) = &state.events else {
            return false;
        };
        if !state.subscriptions.values().any(|t| t == topic) {
            return false;
        }
        events
            .send(TransportEvent::Message {
                topic: topic.to_string(),
                payload: payload.into(),
            })
            .is_ok()
    }

    /// Simulates the broker dropping the connection.
    pub fn drop_connection(&self) {
        let mut state = self.state.lock();
        state.subscriptions.clear();
        if let Some(events) = state.events.take() {
            let _ = events.send(TransportEvent::Closed {
                reason: Some("connection dropped".to_string()),
            });
        }
    }

    /// Makes the next `n` calls to `open` fail.
    pub fn fail_next_opens(&self, n: usize) {
        self.state.lock().fail_opens = n;
    }

    /// Makes every subscribe to `topic` fail until healed.
    pub fn fail_topic(&self, topic: &str) {
        self.state.lock().failing_topics.insert(topic.to_string());
    }

    /// Lets subscribes to `topic` succeed again.
    pub fn heal_topic(&self, topic: &str) {
        self.state.lock().failing_topics.remove(topic);
    }

    /// Topics with at least one live subscription, sorted.
    pub fn active_topics(&self) -> Vec<String> {
        let state = self.state.lock();
        let mut topics: Vec<String> = state.subscriptions.values().cloned().collect();
        topics.sort();
        topics.dedup();
        topics
    }

    /// Number of live subscriptions on `topic`.
    pub fn subscription_count(&self, topic: &str) -> usize {
        self.state
            .lock()
            .subscriptions
            .values()
            .filter(|t| *t == topic)
            .count()
    }

    /// Total subscribe calls, including failed ones.
    pub fn subscribe_calls(&self) -> usize {
        self.state.lock().subscribe_calls
    }

    /// Total open calls, including failed ones.
    pub fn open_calls(&self) -> usize {
        self.state.lock().open_calls
    }

    /// Returns true while a session is open.
    pub fn is_open(&self) -> bool {
        self.state.lock().events.is_some()
    }
}

#[async_trait]
impl Transport for MemoryTransport {
    async fn open(&self, events: TransportSender) -> Result<()> {
        let mut state = self.state.lock();
        state.open_calls += 1;
        if state.fail_opens > 0 {
            state.fail_opens -= 1;
            return Err(RealtimeError::ConnectionFailed(
                "broker unreachable".to_string(),
            ));
        }
        state.subscriptions.clear();
        state.events = Some(events);
        Ok(())
    }

    async fn subscribe(&self, destination: &str) -> Result<SubscriptionHandle> {
        // Subscribing is asynchronous on a real broker.
        tokio::task::yield_now().await;

        let mut state = self.state.lock();
        state.subscribe_calls += 1;
        if state.events.is_none() {
            return Err(RealtimeError::NotConnected);
        }
        if state.failing_topics.contains(destination) {
            return Err(RealtimeError::SubscribeFailed {
                topic: destination.to_string(),
                reason: "rejected by broker".to_string(),
            });
        }
        state.next_id += 1;
        let handle = SubscriptionHandle::new(format!("sub-{}", state.next_id));
        state
            .subscriptions
            .insert(handle.clone(), destination.to_string());
        Ok(handle)
    }

    async fn unsubscribe(&self, handle: &SubscriptionHandle) -> Result<()> {
        self.state.lock().subscriptions.remove(handle);
        Ok(())
    }

    async fn close(&self) {
        let mut state = self.state.lock();
        state.subscriptions.clear();
        state.events = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::mpsc;

    #[tokio::test]
    async fn test_publish_requires_subscription() {
        let transport = MemoryTransport::new();
        let (tx, mut rx) = mpsc::unbounded_channel();

        assert!(!transport.publish("/topic/projects", "{}"));
        transport.open(tx).await.unwrap();
        assert!(!transport.publish("/topic/projects", "{}"));

        let handle = transport.subscribe("/topic/projects").await.unwrap();
        assert!(transport.publish("/topic/projects", "{}"));
        assert!(matches!(
            rx.recv().await,
            Some(TransportEvent::Message { .. })
        ));

        transport.unsubscribe(&handle).await.unwrap();
        assert!(!transport.publish("/topic/projects", "{}"));
    }

    #[tokio::test]
    async fn test_subscribe_without_session_fails() {
        let transport = MemoryTransport::new();
        let result = transport.subscribe("/topic/projects").await;
        assert!(matches!(result, Err(RealtimeError::NotConnected)));
        assert_eq!(transport.subscribe_calls(), 1);
    }

    #[tokio::test]
    async fn test_drop_connection_reports_close() {
        let transport = MemoryTransport::new();
        let (tx, mut rx) = mpsc::unbounded_channel();
        transport.open(tx).await.unwrap();
        transport.subscribe("/topic/issues").await.unwrap();

        transport.drop_connection();
        assert!(!transport.is_open());
        assert!(transport.active_topics().is_empty());
        assert!(matches!(
            rx.recv().await,
            Some(TransportEvent::Closed { .. })
        ));
    }

    #[tokio::test]
    async fn test_failure_injection() {
        let transport = MemoryTransport::new();
        transport.fail_next_opens(1);
        let (tx, _rx) = mpsc::unbounded_channel();
        assert!(transport.open(tx.clone()).await.is_err());
        transport.open(tx).await.unwrap();
        assert_eq!(transport.open_calls(), 2);

        transport.fail_topic("/topic/issues");
        assert!(transport.subscribe("/topic/issues").await.is_err());
        transport.heal_topic("/topic/issues");
        transport.subscribe("/topic/issues").await.unwrap();
        assert_eq!(transport.subscription_count("/topic/issues"), 1);
    }
}
