//! Error types for synchronization.

use std::path::PathBuf;
use thiserror::Error;

/// Errors returned by a [`Backend`](crate::Backend).
#[derive(Error, Debug)]
pub enum BackendError {
    /// Network or HTTP error.
    #[error("network error: {0}")]
    Network(#[from] reqwest::Error),

    /// The server returned an error response.
    #[error("server error: {status} - {message}")]
    Server {
        /// HTTP status code.
        status: u16,
        /// Error message from the server.
        message: String,
    },

    /// Failed to deserialize response.
    #[error("invalid response format: {0}")]
    InvalidResponse(String),

    /// The backend cannot serve the request right now.
    #[error("backend unavailable: {0}")]
    Unavailable(String),
}

/// Result type for backend calls.
pub type BackendResult<T> = std::result::Result<T, BackendError>;

/// Errors that can occur in synchronization.
#[derive(Error, Debug)]
pub enum SyncError {
    /// A REST call failed.
    #[error(transparent)]
    Backend(#[from] BackendError),

    /// The state store rejected an operation.
    #[error(transparent)]
    Store(#[from] codegauge_store::StoreError),

    /// The push layer rejected an operation.
    #[error(transparent)]
    Realtime(#[from] codegauge_realtime::RealtimeError),

    /// The operation needs a logged-in user.
    #[error("no user is logged in")]
    NoUser,

    /// Configuration file could not be read.
    #[error("failed to read config {path}: {source}")]
    ConfigIo {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Configuration is invalid.
    #[error("invalid configuration: {0}")]
    Config(String),
}

/// Result type for synchronization.
pub type Result<T> = std::result::Result<T, SyncError>;
