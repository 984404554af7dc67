//! The process-wide state store.

use codegauge_types::{Issue, Notification, Project, ProjectId, Scan, ScanId, UserSettings};
use std::collections::HashSet;
use std::sync::Arc;
use tracing::info;

use crate::collection::{Collection, CollectionKey};
use crate::record::Tombstones;

/// Cached state of the dashboard.
///
/// Constructed once per session and shared by reference; [`StateStore::clear`]
/// tears it down at logout. All collections share one [`Tombstones`] set so
/// that removal of a project is respected by every collection.
pub struct StateStore {
    projects: Collection<Project>,
    scans: Collection<Scan>,
    issues: Collection<Issue>,
    notifications: Collection<Notification>,
    user_settings: Collection<UserSettings>,
    tombstones: Arc<Tombstones>,
}

/// Entities removed by [`StateStore::remove_project`].
#[derive(Debug, Default)]
pub struct CascadeRemoval {
    /// The project itself, if it was cached.
    pub project: Option<Project>,
    /// Scans of the project.
    pub scans: Vec<Scan>,
    /// Issues referencing the project or one of its scans.
    pub issues: Vec<Issue>,
}

impl CascadeRemoval {
    /// Total number of removed entities.
    pub fn total(&self) -> usize {
        usize::from(self.project.is_some()) + self.scans.len() + self.issues.len()
    }
}

impl StateStore {
    /// Creates an empty store.
    pub fn new() -> Self {
        let tombstones = Arc::new(Tombstones::new());
        Self {
            projects: Collection::with_tombstones(CollectionKey::Repositories, tombstones.clone()),
            scans: Collection::with_tombstones(CollectionKey::Scans, tombstones.clone()),
            issues: Collection::with_tombstones(CollectionKey::Issues, tombstones.clone()),
            notifications: Collection::with_tombstones(
                CollectionKey::Notifications,
                tombstones.clone(),
            ),
            user_settings: Collection::with_tombstones(
                CollectionKey::UserSettings,
                tombstones.clone(),
            ),
            tombstones,
        }
    }

    /// Projects (repositories).
    pub fn projects(&self) -> &Collection<Project> {
        &self.projects
    }

    /// Scan runs.
    pub fn scans(&self) -> &Collection<Scan> {
        &self.scans
    }

    /// Issues.
    pub fn issues(&self) -> &Collection<Issue> {
        &self.issues
    }

    /// Notifications of the current user.
    pub fn notifications(&self) -> &Collection<Notification> {
        &self.notifications
    }

    /// Per-user settings.
    pub fn user_settings(&self) -> &Collection<UserSettings> {
        &self.user_settings
    }

    /// Returns false when `id` was removed this session, or when the
    /// project list is loaded and lacks it.
    ///
    /// Cross-topic ordering is unspecified, so consumers use this to avoid
    /// acting on events for projects that were already deleted.
    pub fn project_is_known(&self, id: &ProjectId) -> bool {
        if self.tombstones.is_project_buried(id) {
            return false;
        }
        !self.projects.is_loaded() || self.projects.contains(id)
    }

    /// Removes a project together with its scans and issues.
    ///
    /// Issues referencing the project directly are removed regardless of
    /// what is cached, because the project is tombstoned and later loads
    /// filter them out. Issues reached only through a scan are removed for
    /// the scans known at this point.
    pub fn remove_project(&self, id: &ProjectId) -> CascadeRemoval {
        self.tombstones.bury_project(id.clone());

        let project = self.projects.remove(id);
        let scans = self.scans.remove_where(|scan| &scan.project_id == id);
        let scan_ids: HashSet<ScanId> = scans.iter().map(|scan| scan.id.clone()).collect();
        self.tombstones.bury_scans(scan_ids.iter().cloned());

        let issues = self.issues.remove_where(|issue| {
            issue.project_id.as_ref() == Some(id)
                || issue
                    .scan_id
                    .as_ref()
                    .is_some_and(|scan| scan_ids.contains(scan))
        });

        let removal = CascadeRemoval {
            project,
            scans,
            issues,
        };
        info!(
            project_id = %id,
            scans = removal.scans.len(),
            issues = removal.issues.len(),
            "Project removed"
        );
        removal
    }

    /// Allows a previously removed project id to be cached again.
    pub fn revive_project(&self, id: &ProjectId) {
        self.tombstones.revive_project(id);
    }

    /// Drops all cached state (logout).
    pub fn clear(&self) {
        self.projects.clear();
        self.scans.clear();
        self.issues.clear();
        self.notifications.clear();
        self.user_settings.clear();
        self.tombstones.clear();
    }
}

impl Default for StateStore {
    fn default() -> Self {
        Self::new()
    }
}
