//! Push transport abstraction.
//!
//! The connection manager drives any [`Transport`]: a STOMP-over-WebSocket
//! client in production, an in-memory fake in tests.

use async_trait::async_trait;
use std::fmt;
use tokio::sync::mpsc;

use crate::error::Result;

/// Opaque handle returned by a successful subscribe.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SubscriptionHandle(String);

impl SubscriptionHandle {
    /// Wraps a transport-specific subscription id.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Returns the subscription id.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SubscriptionHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Something that happened on an open transport.
#[derive(Debug, Clone, PartialEq)]
pub enum TransportEvent {
    /// A message arrived on a subscribed destination.
    Message { topic: String, payload: String },
    /// The connection closed.
    Closed { reason: Option<String> },
    /// The connection failed.
    Error { message: String },
}

/// Sender half handed to [`Transport::open`].
pub type TransportSender = mpsc::UnboundedSender<TransportEvent>;

/// Receiver half read by the connection driver.
pub type TransportReceiver = mpsc::UnboundedReceiver<TransportEvent>;

/// A full-duplex publish/subscribe transport.
///
/// Every inbound message and every close or error after a successful
/// [`open`](Transport::open) is delivered on the sender passed to it. A
/// transport reports exactly one `Closed` or `Error` per session.
#[async_trait]
pub trait Transport: Send + Sync + 'static {
    /// Opens a session.
    async fn open(&self, events: TransportSender) -> Result<()>;

    /// Subscribes to a destination on the open session.
    async fn subscribe(&self, destination: &str) -> Result<SubscriptionHandle>;

    /// Cancels a subscription.
    async fn unsubscribe(&self, handle: &SubscriptionHandle) -> Result<()>;

    /// Closes the session; a no-op if none is open.
    async fn close(&self);
}
