//! Projects (scanned repositories).

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::{ProjectId, Scan, ScanId, ScanStatus, Timestamp};

/// Dashboard status of a repository, derived from its latest scan.
///
/// These are also the values persisted under `repo-status-{projectId}`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RepoStatus {
    /// A scan is in flight.
    Scanning,
    /// The latest scan failed.
    Error,
    /// The latest scan succeeded.
    Active,
}

impl RepoStatus {
    /// Returns the persisted string form.
    pub fn as_str(self) -> &'static str {
        match self {
            RepoStatus::Scanning => "Scanning",
            RepoStatus::Error => "Error",
            RepoStatus::Active => "Active",
        }
    }

    /// Parses the persisted string form.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "Scanning" => Some(RepoStatus::Scanning),
            "Error" => Some(RepoStatus::Error),
            "Active" => Some(RepoStatus::Active),
            _ => None,
        }
    }

    /// Derives the repository status from a scan status.
    pub fn from_scan(status: ScanStatus) -> Option<Self> {
        match status {
            ScanStatus::Scanning => Some(RepoStatus::Scanning),
            ScanStatus::Success => Some(RepoStatus::Active),
            ScanStatus::Failed => Some(RepoStatus::Error),
            ScanStatus::Unknown => None,
        }
    }
}

impl fmt::Display for RepoStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A repository registered for scanning.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Project {
    /// Project identifier.
    pub id: ProjectId,
    /// Display name.
    #[serde(default)]
    pub name: String,
    /// Status derived from the latest scan.
    #[serde(default)]
    pub status: Option<RepoStatus>,
    /// Clone URL.
    #[serde(default)]
    pub url: Option<String>,
    /// Most recent scan run.
    #[serde(default)]
    pub last_scan_id: Option<ScanId>,
    /// Last modification time.
    #[serde(default)]
    pub updated_at: Option<Timestamp>,
}

impl Project {
    /// Creates a project with only an id and a name.
    pub fn new(id: ProjectId, name: impl Into<String>) -> Self {
        Self {
            id,
            name: name.into(),
            status: None,
            url: None,
            last_scan_id: None,
            updated_at: None,
        }
    }

    /// Overwrites fields that `incoming` specifies, keeping the rest.
    pub fn merge_from(&mut self, incoming: Project) {
        if !incoming.name.is_empty() {
            self.name = incoming.name;
        }
        if incoming.status.is_some() {
            self.status = incoming.status;
        }
        if incoming.url.is_some() {
            self.url = incoming.url;
        }
        if incoming.last_scan_id.is_some() {
            self.last_scan_id = incoming.last_scan_id;
        }
        if incoming.updated_at.is_some() {
            self.updated_at = incoming.updated_at;
        }
    }
}

/// Full repository as returned by the fetch-by-id endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProjectDetail {
    /// The project itself.
    #[serde(flatten)]
    pub project: Project,
    /// Scan history, newest first.
    #[serde(default)]
    pub scans: Vec<Scan>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_repo_status_round_trips_persisted_form() {
        for status in [RepoStatus::Scanning, RepoStatus::Error, RepoStatus::Active] {
            assert_eq!(RepoStatus::parse(status.as_str()), Some(status));
        }
        assert_eq!(RepoStatus::parse("scanning"), None);
    }

    #[test]
    fn test_repo_status_from_scan() {
        assert_eq!(
            RepoStatus::from_scan(ScanStatus::Failed),
            Some(RepoStatus::Error)
        );
        assert_eq!(RepoStatus::from_scan(ScanStatus::Unknown), None);
    }

    #[test]
    fn test_merge_preserves_unspecified_fields() {
        let mut project = Project::new("p1".into(), "api");
        project.url = Some("https://git.example/api.git".into());

        project.merge_from(Project::new("p1".into(), "api-v2"));

        assert_eq!(project.name, "api-v2");
        assert_eq!(project.url.as_deref(), Some("https://git.example/api.git"));
    }

    #[test]
    fn test_detail_flattens_project_fields() {
        let detail: ProjectDetail = serde_json::from_value(serde_json::json!({
            "id": 5,
            "name": "web",
            "scans": [{"id": 9, "projectId": 5, "status": "SUCCESS"}]
        }))
        .unwrap();
        assert_eq!(detail.project.id.as_str(), "5");
        assert_eq!(detail.scans.len(), 1);
    }
}
