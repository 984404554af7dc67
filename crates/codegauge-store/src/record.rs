//! The contract between cached records and the collections holding them.

use codegauge_types::{Issue, Notification, Project, ProjectId, Scan, ScanId, UserSettings, UserId};
use parking_lot::RwLock;
use std::collections::{HashSet, VecDeque};
use std::fmt;
use std::hash::Hash;

/// A record that can live in a [`Collection`](crate::Collection).
pub trait Record: Clone + Send + Sync + 'static {
    /// Identity used by `patch`, `remove` and the default `upsert` key.
    type Id: Clone + Eq + Hash + fmt::Display + Send + Sync;

    /// Returns the record's identity.
    fn id(&self) -> &Self::Id;

    /// Merges another representation of the same record into this one.
    ///
    /// Fields `incoming` specifies overwrite, unspecified fields are kept.
    fn merge(&mut self, incoming: Self);

    /// Project this record hangs off, if any.
    fn project_ref(&self) -> Option<&ProjectId> {
        None
    }

    /// Scan this record hangs off, if any.
    fn scan_ref(&self) -> Option<&ScanId> {
        None
    }
}

impl Record for Project {
    type Id = ProjectId;

    fn id(&self) -> &ProjectId {
        &self.id
    }

    fn merge(&mut self, incoming: Self) {
        self.merge_from(incoming);
    }

    fn project_ref(&self) -> Option<&ProjectId> {
        Some(&self.id)
    }
}

impl Record for Scan {
    type Id = ScanId;

    fn id(&self) -> &ScanId {
        &self.id
    }

    fn merge(&mut self, incoming: Self) {
        self.merge_from(incoming);
    }

    fn project_ref(&self) -> Option<&ProjectId> {
        Some(&self.project_id)
    }

    fn scan_ref(&self) -> Option<&ScanId> {
        Some(&self.id)
    }
}

impl Record for Issue {
    type Id = codegauge_types::IssueId;

    fn id(&self) -> &Self::Id {
        &self.id
    }

    fn merge(&mut self, incoming: Self) {
        self.merge_from(incoming);
    }

    fn project_ref(&self) -> Option<&ProjectId> {
        self.project_id.as_ref()
    }

    fn scan_ref(&self) -> Option<&ScanId> {
        self.scan_id.as_ref()
    }
}

impl Record for Notification {
    type Id = codegauge_types::NotificationId;

    fn id(&self) -> &Self::Id {
        &self.id
    }

    fn merge(&mut self, incoming: Self) {
        self.merge_from(incoming);
    }
}

impl Record for UserSettings {
    type Id = UserId;

    fn id(&self) -> &UserId {
        &self.user_id
    }

    fn merge(&mut self, incoming: Self) {
        self.merge_from(incoming);
    }
}

/// Default number of project and scan tombstones remembered.
pub const DEFAULT_TOMBSTONE_CAPACITY: usize = 1024;

/// Ids of projects and scans removed by a cascade.
///
/// Shared by every collection of a [`StateStore`](crate::StateStore): a record
/// that references a tombstoned project or scan is refused on `set_all` and
/// `upsert`, so a late REST response or push event cannot resurrect entities
/// of a deleted project. Each set keeps its most recent `capacity` ids.
#[derive(Debug)]
pub struct Tombstones {
    projects: RwLock<Graveyard<ProjectId>>,
    scans: RwLock<Graveyard<ScanId>>,
}

impl Default for Tombstones {
    fn default() -> Self {
        Self::with_capacity(DEFAULT_TOMBSTONE_CAPACITY)
    }
}

impl Tombstones {
    /// Creates an empty tombstone set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates an empty tombstone set remembering up to `capacity` ids of
    /// each kind.
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            projects: RwLock::new(Graveyard::new(capacity)),
            scans: RwLock::new(Graveyard::new(capacity)),
        }
    }

    /// Marks a project as removed.
    pub fn bury_project(&self, id: ProjectId) {
        self.projects.write().insert(id);
    }

    /// Marks scans as removed.
    pub fn bury_scans(&self, ids: impl IntoIterator<Item = ScanId>) {
        let mut scans = self.scans.write();
        for id in ids {
            scans.insert(id);
        }
    }

    /// Lifts the tombstone of a project that was explicitly re-added.
    pub fn revive_project(&self, id: &ProjectId) -> bool {
        self.projects.write().remove(id)
    }

    /// Returns true if the project was removed and not revived since.
    pub fn is_project_buried(&self, id: &ProjectId) -> bool {
        self.projects.read().contains(id)
    }

    /// Returns true if the record references a removed project or scan.
    pub fn refuses<T: Record>(&self, record: &T) -> bool {
        if let Some(project) = record.project_ref() {
            if self.projects.read().contains(project) {
                return true;
            }
        }
        record
            .scan_ref()
            .is_some_and(|scan| self.scans.read().contains(scan))
    }

    /// Forgets every tombstone.
    pub fn clear(&self) {
        self.projects.write().clear();
        self.scans.write().clear();
    }

    /// Number of buried projects and scans.
    pub fn counts(&self) -> (usize, usize) {
        (self.projects.read().len(), self.scans.read().len())
    }
}

/// Insertion-ordered id set dropping its oldest entries past `capacity`.
#[derive(Debug)]
struct Graveyard<K> {
    capacity: usize,
    order: VecDeque<K>,
    ids: HashSet<K>,
}

impl<K: Clone + Eq + Hash> Graveyard<K> {
    fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            order: VecDeque::new(),
            ids: HashSet::new(),
        }
    }

    fn insert(&mut self, id: K) {
        if !self.ids.insert(id.clone()) {
            return;
        }
        self.order.push_back(id);
        while self.order.len() > self.capacity {
            if let Some(oldest) = self.order.pop_front() {
                self.ids.remove(&oldest);
            }
        }
    }

    fn remove(&mut self, id: &K) -> bool {
        let removed = self.ids.remove(id);
        if removed {
            self.order.retain(|k| k != id);
        }
        removed
    }

    fn contains(&self, id: &K) -> bool {
        self.ids.contains(id)
    }

    fn len(&self) -> usize {
        self.ids.len()
    }

    fn clear(&mut self) {
        self.order.clear();
        self.ids.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use codegauge_types::ScanStatus;

    #[test]
    fn test_tombstones_are_bounded() {
        let tombstones = Tombstones::with_capacity(2);
        tombstones.bury_project("p1".into());
        tombstones.bury_project("p2".into());
        tombstones.bury_project("p3".into());
        tombstones.bury_scans(["s1".into(), "s2".into(), "s2".into(), "s3".into()]);

        assert_eq!(tombstones.counts(), (2, 2));
        assert!(!tombstones.is_project_buried(&"p1".into()));
        assert!(tombstones.is_project_buried(&"p3".into()));
        assert!(tombstones.refuses(&Scan::new("s3".into(), "p9".into(), ScanStatus::Success)));
        assert!(!tombstones.refuses(&Scan::new("s1".into(), "p9".into(), ScanStatus::Success)));
    }

    #[test]
    fn test_revived_project_frees_its_slot() {
        let tombstones = Tombstones::with_capacity(2);
        tombstones.bury_project("p1".into());
        tombstones.bury_project("p2".into());
        assert!(tombstones.revive_project(&"p1".into()));
        assert!(!tombstones.revive_project(&"p1".into()));

        tombstones.bury_project("p3".into());
        assert!(tombstones.is_project_buried(&"p2".into()));
        assert!(tombstones.is_project_buried(&"p3".into()));
        assert_eq!(tombstones.counts(), (2, 0));
    }
}
