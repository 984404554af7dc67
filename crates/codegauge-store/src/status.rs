//! Persisted repository status.
//!
//! A scan in flight must survive a restart of the client, so the status of
//! each repository with an unfinished scan is kept in a small string-keyed
//! store under `repo-status-{projectId}`. It is written when a scan starts
//! and removed when the scan reaches a terminal status.

use codegauge_types::{ProjectId, RepoStatus};
use parking_lot::RwLock;
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use crate::{Result, StoreError};

/// Prefix of every persisted status key.
pub const STATUS_KEY_PREFIX: &str = "repo-status-";

/// Returns the persisted key for a project.
pub fn status_key(project_id: &ProjectId) -> String {
    format!("{STATUS_KEY_PREFIX}{project_id}")
}

/// String-keyed repository status store, optionally backed by a JSON file.
#[derive(Debug, Default)]
pub struct RepoStatusStore {
    path: Option<PathBuf>,
    entries: RwLock<BTreeMap<String, String>>,
}

impl RepoStatusStore {
    /// Creates a store that lives only in memory.
    pub fn in_memory() -> Self {
        Self::default()
    }

    /// Opens a file-backed store, starting empty if the file is missing or
    /// unreadable.
    pub fn open(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let entries = Self::load(&path);
        Self {
            path: Some(path),
            entries: RwLock::new(entries),
        }
    }

    fn load(path: &Path) -> BTreeMap<String, String> {
        if !path.exists() {
            tracing::debug!(?path, "Status file not found, starting empty");
            return BTreeMap::new();
        }

        match fs::read_to_string(path) {
            Ok(contents) => match serde_json::from_str(&contents) {
                Ok(entries) => {
                    tracing::info!(?path, "Loaded persisted repository status");
                    entries
                }
                Err(e) => {
                    tracing::warn!(?path, error = %e, "Failed to parse status file, starting empty");
                    BTreeMap::new()
                }
            },
            Err(e) => {
                tracing::warn!(?path, error = %e, "Failed to read status file, starting empty");
                BTreeMap::new()
            }
        }
    }

    fn save(&self, entries: &BTreeMap<String, String>) -> Result<()> {
        let Some(path) = &self.path else {
            return Ok(());
        };

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|source| StoreError::Io {
                path: parent.to_path_buf(),
                source,
            })?;
        }

        let contents = serde_json::to_string_pretty(entries)?;
        fs::write(path, contents).map_err(|source| StoreError::Io {
            path: path.clone(),
            source,
        })
    }

    /// Returns the persisted status of a project.
    pub fn get(&self, project_id: &ProjectId) -> Option<RepoStatus> {
        self.entries
            .read()
            .get(&status_key(project_id))
            .and_then(|value| RepoStatus::parse(value))
    }

    /// Persists the status of a project.
    ///
    /// # Errors
    ///
    /// Returns an error if the backing file cannot be written; the in-memory
    /// value is updated either way.
    pub fn set(&self, project_id: &ProjectId, status: RepoStatus) -> Result<()> {
        let mut entries = self.entries.write();
        entries.insert(status_key(project_id), status.as_str().to_string());
        self.save(&entries)
    }

    /// Removes the persisted status of a project.
    ///
    /// # Errors
    ///
    /// Returns an error if the backing file cannot be written.
    pub fn remove(&self, project_id: &ProjectId) -> Result<()> {
        let mut entries = self.entries.write();
        if entries.remove(&status_key(project_id)).is_none() {
            return Ok(());
        }
        self.save(&entries)
    }

    /// Returns every persisted project status; unparseable values are skipped.
    pub fn entries(&self) -> Vec<(ProjectId, RepoStatus)> {
        self.entries
            .read()
            .iter()
            .filter_map(|(key, value)| {
                let id = key.strip_prefix(STATUS_KEY_PREFIX)?;
                Some((ProjectId::from(id), RepoStatus::parse(value)?))
            })
            .collect()
    }
}
