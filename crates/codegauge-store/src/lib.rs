//! Client-side state store for Codegauge.
//!
//! The store is the source of truth the dashboard renders from. Each
//! collection is a [`Collection`] whose contents are published through a
//! `tokio::sync::watch` channel, so readers always observe the latest list
//! and never a half-applied update.
//!
//! Writes come from three places: an initial REST load ([`Collection::set_all`]),
//! a push-driven partial update ([`Collection::upsert`]) and an optimistic
//! local edit ([`Collection::patch`]). Rollback of an optimistic edit is the
//! caller's job, by patching the field back.

mod collection;
mod error;
mod record;
mod status;
mod store;

pub use collection::{CacheEntry, Collection, CollectionKey, Upsert};
pub use error::StoreError;
pub use record::{Record, Tombstones, DEFAULT_TOMBSTONE_CAPACITY};
pub use status::{status_key, RepoStatusStore, STATUS_KEY_PREFIX};
pub use store::{CascadeRemoval, StateStore};

/// Result type for store operations.
pub type Result<T> = std::result::Result<T, StoreError>;
