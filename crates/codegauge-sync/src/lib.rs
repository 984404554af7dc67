//! # Codegauge Sync
//!
//! Keeps the client-side [`StateStore`](codegauge_store::StateStore) in step
//! with the dashboard server.
//!
//! ## Features
//!
//! - **Orchestrator**: reacts to every typed push event with the REST
//!   re-fetches and store updates it needs
//! - **Notification Dedup Engine**: creates each issue or quality-gate
//!   notification at most once, even under concurrent triggers
//! - **Backends**: the REST API over `reqwest`, and an in-memory backend for
//!   tests
//! - **Configuration**: YAML file with defaults for every field
//!
//! ## Example
//!
//! ```rust,ignore
//! use codegauge_sync::{SyncConfig, SyncOrchestrator};
//!
//! let config = SyncConfig::load_or_default(Some("codegauge.yaml".as_ref()))?;
//! let orchestrator = SyncOrchestrator::from_config(&config)?;
//! let mut acks = orchestrator.acknowledgements();
//! orchestrator.start(config.user_id.clone()).await;
//!
//! while let Ok(ack) = acks.recv().await {
//!     println!("{ack}");
//! }
//! ```

pub mod backend;
pub mod config;
pub mod dedup;
pub mod error;
pub mod http;
pub mod orchestrator;

pub use backend::{Backend, MemoryBackend};
pub use config::{default_status_file, LogFormat, SyncConfig};
pub use dedup::{DedupKey, DedupReport, NotificationDeduplicator, DEFAULT_DEDUP_CAPACITY};
pub use error::{BackendError, BackendResult, Result, SyncError};
pub use http::HttpBackend;
pub use orchestrator::{Acknowledgement, SyncOrchestrator};
