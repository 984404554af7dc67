//! Error types for the real-time module.

use thiserror::Error;

/// Errors that can occur in real-time operations.
#[derive(Debug, Error)]
pub enum RealtimeError {
    /// Invalid topic format.
    #[error("invalid topic: {0}")]
    InvalidTopic(String),

    /// Operation requires an open transport.
    #[error("transport is not connected")]
    NotConnected,

    /// Opening the transport failed.
    #[error("connection failed: {0}")]
    ConnectionFailed(String),

    /// The transport refused a subscription.
    #[error("subscribe to {topic} failed: {reason}")]
    SubscribeFailed { topic: String, reason: String },

    /// The peer violated the messaging protocol.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// A private topic was requested without a logged-in user.
    #[error("no user identity for private topic")]
    NoIdentity,

    /// A private topic was requested for a user other than the current one.
    #[error("private topic {topic} does not belong to the current user")]
    IdentityMismatch { topic: String },

    /// Serialization error.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Channel closed.
    #[error("channel closed")]
    ChannelClosed,
}

/// Result type for real-time operations.
pub type Result<T> = std::result::Result<T, RealtimeError>;
