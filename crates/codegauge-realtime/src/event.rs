//! Typed push events.
//!
//! Events are immutable values built by the [`EventRouter`](crate::EventRouter)
//! from raw payloads; consumers only ever see these types.

use codegauge_types::{IssueId, Notification, ProjectId, ScanId, ScanStatus, UserId};
use serde::Serialize;
use std::fmt;

/// A scan changed status.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ScanEvent {
    /// Project the scan belongs to.
    pub project_id: ProjectId,
    /// The scan run.
    pub scan_id: ScanId,
    /// New status, already mapped to the dashboard vocabulary.
    pub status: ScanStatus,
}

/// A notification was pushed to the current user or broadcast to everyone.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NotificationEvent {
    /// The notification.
    pub notification: Notification,
    /// True if it arrived on the global topic.
    pub broadcast: bool,
}

/// What happened to a project.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum ProjectAction {
    /// Project was created.
    Added,
    /// Project metadata changed.
    Updated,
    /// Project was deleted.
    Deleted,
}

impl ProjectAction {
    /// Parses the backend action name, ignoring case.
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_uppercase().as_str() {
            "ADDED" | "CREATED" => Some(ProjectAction::Added),
            "UPDATED" => Some(ProjectAction::Updated),
            "DELETED" => Some(ProjectAction::Deleted),
            _ => None,
        }
    }
}

/// A project was added, updated or deleted.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProjectChangeEvent {
    /// What happened.
    pub action: ProjectAction,
    /// The project.
    pub project_id: ProjectId,
    /// Project name at the time of the change.
    pub project_name: String,
}

/// What happened to an issue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum IssueAction {
    /// Issue was modified.
    Updated,
}

impl IssueAction {
    /// Parses the backend action name, ignoring case.
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_uppercase().as_str() {
            "UPDATED" => Some(IssueAction::Updated),
            _ => None,
        }
    }
}

/// An issue changed.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct IssueChangeEvent {
    /// What happened.
    pub action: IssueAction,
    /// The issue.
    pub issue_id: IssueId,
}

/// A user's verification status changed.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct VerifyStatusEvent {
    /// The user.
    pub user_id: UserId,
    /// New status as reported by the backend.
    pub status: String,
}

/// A comment was posted on an issue the client is watching.
///
/// Comments are forwarded raw; they are not one of the typed [`Event`]s.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CommentEvent {
    /// The issue being watched.
    pub issue_id: IssueId,
    /// The comment object as sent by the backend.
    pub comment: serde_json::Value,
}

/// The closed set of typed push events.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", content = "event", rename_all = "snake_case")]
pub enum Event {
    /// Scan lifecycle.
    Scan(ScanEvent),
    /// Notification delivery.
    Notification(NotificationEvent),
    /// Project added/updated/deleted.
    ProjectChange(ProjectChangeEvent),
    /// Issue changed.
    IssueChange(IssueChangeEvent),
    /// Account verification status.
    VerifyStatus(VerifyStatusEvent),
}

impl Event {
    /// Returns the variant tag.
    pub fn kind(&self) -> EventKind {
        match self {
            Event::Scan(_) => EventKind::Scan,
            Event::Notification(_) => EventKind::Notification,
            Event::ProjectChange(_) => EventKind::ProjectChange,
            Event::IssueChange(_) => EventKind::IssueChange,
            Event::VerifyStatus(_) => EventKind::VerifyStatus,
        }
    }
}

/// Variant tags of [`Event`], plus raw comments.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    /// [`ScanEvent`]
    Scan,
    /// [`NotificationEvent`]
    Notification,
    /// [`ProjectChangeEvent`]
    ProjectChange,
    /// [`IssueChangeEvent`]
    IssueChange,
    /// [`VerifyStatusEvent`]
    VerifyStatus,
    /// [`CommentEvent`]
    Comment,
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EventKind::Scan => write!(f, "scan"),
            EventKind::Notification => write!(f, "notification"),
            EventKind::ProjectChange => write!(f, "project.change"),
            EventKind::IssueChange => write!(f, "issue.change"),
            EventKind::VerifyStatus => write!(f, "user.verify_status"),
            EventKind::Comment => write!(f, "issue.comment"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_project_action_parse() {
        assert_eq!(ProjectAction::parse("DELETED"), Some(ProjectAction::Deleted));
        assert_eq!(ProjectAction::parse("added"), Some(ProjectAction::Added));
        assert_eq!(ProjectAction::parse("ARCHIVED"), None);
    }

    #[test]
    fn test_issue_action_parse() {
        assert_eq!(IssueAction::parse("Updated"), Some(IssueAction::Updated));
        assert_eq!(IssueAction::parse("CREATED"), None);
    }

    #[test]
    fn test_event_kind_display() {
        let event = Event::Scan(ScanEvent {
            project_id: "p".into(),
            scan_id: "s".into(),
            status: ScanStatus::Scanning,
        });
        assert_eq!(event.kind(), EventKind::Scan);
        assert_eq!(EventKind::ProjectChange.to_string(), "project.change");
    }

    #[test]
    fn test_event_serialization() {
        let event = Event::IssueChange(IssueChangeEvent {
            action: IssueAction::Updated,
            issue_id: "i1".into(),
        });
        let json = serde_json::to_string(&event).unwrap();
        assert!(json.contains("\"kind\":\"issue_change\""));
        assert!(json.contains("\"issue_id\":\"i1\""));
    }
}
