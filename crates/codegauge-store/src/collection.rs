//! A single cached collection.

use std::fmt;
use std::sync::Arc;
use tokio::sync::watch;
use tokio_stream::wrappers::WatchStream;
use tracing::debug;

use crate::record::{Record, Tombstones};
use crate::{Result, StoreError};

/// Names of the cached collections.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CollectionKey {
    /// Projects (repositories).
    Repositories,
    /// Scan runs.
    Scans,
    /// Issues.
    Issues,
    /// Notifications of the current user.
    Notifications,
    /// Per-user settings.
    UserSettings,
}

impl fmt::Display for CollectionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CollectionKey::Repositories => write!(f, "repositories"),
            CollectionKey::Scans => write!(f, "scans"),
            CollectionKey::Issues => write!(f, "issues"),
            CollectionKey::Notifications => write!(f, "notifications"),
            CollectionKey::UserSettings => write!(f, "user-settings"),
        }
    }
}

/// Contents of a collection.
///
/// `loaded` separates "fetched and empty" from "never fetched": once set, an
/// empty list is a final state and must not trigger another fetch.
#[derive(Debug, Clone)]
pub struct CacheEntry<T> {
    items: Vec<T>,
    loaded: bool,
}

impl<T> CacheEntry<T> {
    /// The cached items, newest first.
    pub fn items(&self) -> &[T] {
        &self.items
    }

    /// Whether a full load has happened.
    pub fn is_loaded(&self) -> bool {
        self.loaded
    }
}

impl<T> Default for CacheEntry<T> {
    fn default() -> Self {
        Self {
            items: Vec::new(),
            loaded: false,
        }
    }
}

/// What an upsert did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Upsert {
    /// No record with the key existed; the item was prepended.
    Inserted,
    /// An existing record was merged with the item.
    Merged,
    /// The item references a removed project or scan and was dropped.
    Refused,
}

/// A named collection of records, observable through a watch channel.
pub struct Collection<T: Record> {
    key: CollectionKey,
    state: watch::Sender<CacheEntry<T>>,
    tombstones: Arc<Tombstones>,
}

impl<T: Record> Collection<T> {
    /// Creates an empty, never-loaded collection.
    pub fn new(key: CollectionKey) -> Self {
        Self::with_tombstones(key, Arc::new(Tombstones::new()))
    }

    /// Creates a collection sharing a tombstone set with its siblings.
    pub fn with_tombstones(key: CollectionKey, tombstones: Arc<Tombstones>) -> Self {
        let (state, _) = watch::channel(CacheEntry::default());
        Self {
            key,
            state,
            tombstones,
        }
    }

    /// Returns the collection name.
    pub fn key(&self) -> CollectionKey {
        self.key
    }

    /// Replaces the whole collection and marks it loaded.
    pub fn set_all(&self, items: Vec<T>) {
        let before = items.len();
        let items: Vec<T> = items
            .into_iter()
            .filter(|item| !self.tombstones.refuses(item))
            .collect();
        let count = items.len();
        self.state.send_modify(|entry| {
            entry.items = items;
            entry.loaded = true;
        });
        debug!(
            collection = %self.key,
            count,
            refused = before - count,
            "Collection replaced"
        );
    }

    /// Merges `item` into the record with the same id, or prepends it.
    ///
    /// Upserting into a never-loaded collection does not mark it loaded.
    pub fn upsert(&self, item: T) -> Upsert {
        self.upsert_by(item, |record| record.id().clone())
    }

    /// Like [`Collection::upsert`], matching records by `key_fn`.
    pub fn upsert_by<K, F>(&self, item: T, key_fn: F) -> Upsert
    where
        K: PartialEq,
        F: Fn(&T) -> K,
    {
        if self.tombstones.refuses(&item) {
            debug!(collection = %self.key, id = %item.id(), "Upsert refused for removed parent");
            return Upsert::Refused;
        }

        let key = key_fn(&item);
        let mut outcome = Upsert::Inserted;
        self.state.send_modify(|entry| {
            match entry.items.iter_mut().find(|existing| key_fn(existing) == key) {
                Some(existing) => {
                    existing.merge(item);
                    outcome = Upsert::Merged;
                }
                None => entry.items.insert(0, item),
            }
        });
        outcome
    }

    /// Applies `f` to the record with the given id and returns the result.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::NotFound`] if no record has that id.
    pub fn patch<F>(&self, id: &T::Id, f: F) -> Result<T>
    where
        F: FnOnce(&mut T),
    {
        let mut updated = None;
        self.state.send_if_modified(|entry| {
            match entry.items.iter_mut().find(|item| item.id() == id) {
                Some(item) => {
                    f(item);
                    updated = Some(item.clone());
                    true
                }
                None => false,
            }
        });
        updated.ok_or_else(|| StoreError::NotFound {
            collection: self.key,
            id: id.to_string(),
        })
    }

    /// Removes the record with the given id.
    pub fn remove(&self, id: &T::Id) -> Option<T> {
        self.remove_where(|item| item.id() == id).into_iter().next()
    }

    /// Removes every record matching `pred` and returns them.
    pub fn remove_where<P>(&self, mut pred: P) -> Vec<T>
    where
        P: FnMut(&T) -> bool,
    {
        let mut removed = Vec::new();
        self.state.send_if_modified(|entry| {
            let (gone, kept): (Vec<T>, Vec<T>) = std::mem::take(&mut entry.items)
                .into_iter()
                .partition(|item| pred(item));
            entry.items = kept;
            removed = gone;
            !removed.is_empty()
        });
        removed
    }

    /// Returns a copy of the record with the given id.
    pub fn get(&self, id: &T::Id) -> Option<T> {
        self.state
            .borrow()
            .items
            .iter()
            .find(|item| item.id() == id)
            .cloned()
    }

    /// Returns true if a record with the given id is cached.
    pub fn contains(&self, id: &T::Id) -> bool {
        self.state.borrow().items.iter().any(|item| item.id() == id)
    }

    /// Returns a copy of the cached items.
    pub fn snapshot(&self) -> Vec<T> {
        self.state.borrow().items.clone()
    }

    /// Whether a full load has happened.
    pub fn is_loaded(&self) -> bool {
        self.state.borrow().loaded
    }

    /// Number of cached records.
    pub fn len(&self) -> usize {
        self.state.borrow().items.len()
    }

    /// Returns true if nothing is cached.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Subscribes to the collection; the receiver always holds the latest state.
    pub fn read(&self) -> watch::Receiver<CacheEntry<T>> {
        self.state.subscribe()
    }

    /// Stream of collection states, starting with the current one.
    pub fn stream(&self) -> WatchStream<CacheEntry<T>> {
        WatchStream::new(self.read())
    }

    /// Drops all items and the loaded flag.
    pub fn clear(&self) {
        self.state.send_replace(CacheEntry::default());
    }
}

impl<T: Record + fmt::Debug> fmt::Debug for Collection<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Collection")
            .field("key", &self.key)
            .field("len", &self.len())
            .field("loaded", &self.is_loaded())
            .finish()
    }
}
