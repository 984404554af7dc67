//! Error types for store operations.

use std::path::PathBuf;
use thiserror::Error;

use crate::CollectionKey;

/// Errors that can occur during store operations.
#[derive(Debug, Error)]
pub enum StoreError {
    /// No record with the given id in the collection.
    #[error("{collection}: no record with id {id}")]
    NotFound {
        collection: CollectionKey,
        id: String,
    },

    /// Reading or writing the persisted status file failed.
    #[error("status file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Serialization error.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}
