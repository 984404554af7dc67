//! Issues found by scans.

use serde::{Deserialize, Serialize};

use crate::{IssueId, ProjectId, ScanId, Timestamp};

/// Severity of an issue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Severity {
    /// Blocks release.
    Blocker,
    /// Critical defect.
    Critical,
    /// Major defect.
    Major,
    /// Minor defect.
    Minor,
    /// Informational.
    Info,
    /// Any other value.
    #[serde(other)]
    Unknown,
}

impl Severity {
    /// Returns true if a new issue of this severity warrants a notification.
    pub fn is_notifiable(self) -> bool {
        matches!(self, Severity::Blocker | Severity::Critical)
    }

    /// Get a human-readable label.
    pub fn label(self) -> &'static str {
        match self {
            Severity::Blocker => "Blocker",
            Severity::Critical => "Critical",
            Severity::Major => "Major",
            Severity::Minor => "Minor",
            Severity::Info => "Info",
            Severity::Unknown => "Unknown",
        }
    }
}

/// An issue reported against a project.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Issue {
    /// Issue identifier.
    pub id: IssueId,
    /// Short description.
    #[serde(default)]
    pub title: String,
    /// Severity.
    #[serde(default = "unknown_severity")]
    pub severity: Severity,
    /// Workflow status (open, resolved, ...).
    #[serde(default)]
    pub status: Option<String>,
    /// Project the issue belongs to, when reported directly.
    #[serde(default)]
    pub project_id: Option<ProjectId>,
    /// Scan that found the issue.
    #[serde(default)]
    pub scan_id: Option<ScanId>,
    /// File the issue points at.
    #[serde(default)]
    pub file_path: Option<String>,
    /// When the issue was first reported.
    #[serde(default)]
    pub created_at: Option<Timestamp>,
    /// Last modification time.
    #[serde(default)]
    pub updated_at: Option<Timestamp>,
}

fn unknown_severity() -> Severity {
    Severity::Unknown
}

impl Issue {
    /// Creates an issue with a title and severity.
    pub fn new(id: IssueId, title: impl Into<String>, severity: Severity) -> Self {
        Self {
            id,
            title: title.into(),
            severity,
            status: None,
            project_id: None,
            scan_id: None,
            file_path: None,
            created_at: None,
            updated_at: None,
        }
    }

    /// Sets the owning project.
    pub fn with_project(mut self, project_id: ProjectId) -> Self {
        self.project_id = Some(project_id);
        self
    }

    /// Sets the originating scan.
    pub fn with_scan(mut self, scan_id: ScanId) -> Self {
        self.scan_id = Some(scan_id);
        self
    }

    /// Overwrites fields that `incoming` specifies, keeping the rest.
    pub fn merge_from(&mut self, incoming: Issue) {
        if !incoming.title.is_empty() {
            self.title = incoming.title;
        }
        if incoming.severity != Severity::Unknown {
            self.severity = incoming.severity;
        }
        macro_rules! take {
            ($($field:ident),*) => {
                $(if incoming.$field.is_some() {
                    self.$field = incoming.$field;
                })*
            };
        }
        take!(status, project_id, scan_id, file_path, created_at, updated_at);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unknown_severity_fallback() {
        let issue: Issue =
            serde_json::from_str(r#"{"id": 1, "title": "x", "severity": "SPICY"}"#).unwrap();
        assert_eq!(issue.severity, Severity::Unknown);

        let issue: Issue = serde_json::from_str(r#"{"id": 1}"#).unwrap();
        assert_eq!(issue.severity, Severity::Unknown);
    }

    #[test]
    fn test_notifiable_severities() {
        assert!(Severity::Critical.is_notifiable());
        assert!(Severity::Blocker.is_notifiable());
        assert!(!Severity::Major.is_notifiable());
    }

    #[test]
    fn test_merge_keeps_project_reference() {
        let mut issue = Issue::new("i1".into(), "Null deref", Severity::Major)
            .with_project("p1".into());
        let mut update = Issue::new("i1".into(), "", Severity::Critical);
        update.status = Some("RESOLVED".into());
        issue.merge_from(update);

        assert_eq!(issue.title, "Null deref");
        assert_eq!(issue.severity, Severity::Critical);
        assert_eq!(issue.project_id.as_ref().map(ProjectId::as_str), Some("p1"));
        assert_eq!(issue.status.as_deref(), Some("RESOLVED"));
    }
}
