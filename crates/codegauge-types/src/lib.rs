//! Common types used throughout `codegauge`.
//!
//! This crate provides the records the synchronization core caches and
//! reconciles: projects, scans, issues, notifications and user settings,
//! plus the identifier newtypes they are keyed by.
//!
//! Identifiers accept either JSON strings or JSON numbers on the wire, since
//! the backend is not consistent about which it sends.

mod id;
mod issue;
mod notification;
mod project;
mod scan;
mod settings;

pub use id::{CommentId, IssueId, NotificationId, ProjectId, ScanId, UserId};
pub use issue::{Issue, Severity};
pub use notification::{NewNotification, Notification, NotificationType};
pub use project::{Project, ProjectDetail, RepoStatus};
pub use scan::{QualityGateStatus, Scan, ScanStatus};
pub use settings::UserSettings;

/// Timestamp type used by every record.
pub type Timestamp = chrono::DateTime<chrono::Utc>;
