//! Notification types for user alerts.

use serde::{Deserialize, Serialize};

use crate::{CommentId, IssueId, NotificationId, ProjectId, ScanId, Timestamp, UserId};

/// A notification for a user.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Notification {
    /// Unique notification ID.
    pub id: NotificationId,
    /// User who receives this notification; absent for global broadcasts.
    #[serde(default)]
    pub user_id: Option<UserId>,
    /// Notification type.
    #[serde(rename = "type", default = "other_type")]
    pub notification_type: NotificationType,
    /// Brief title.
    #[serde(default)]
    pub title: String,
    /// Notification body.
    #[serde(default)]
    pub message: String,
    /// Whether the notification has been read.
    #[serde(default)]
    pub is_read: bool,
    /// When the notification was created.
    #[serde(default)]
    pub created_at: Option<Timestamp>,
    /// Project the notification is about.
    #[serde(default)]
    pub related_project_id: Option<ProjectId>,
    /// Scan the notification is about.
    #[serde(default)]
    pub related_scan_id: Option<ScanId>,
    /// Issue the notification is about.
    #[serde(default)]
    pub related_issue_id: Option<IssueId>,
    /// Comment the notification is about.
    #[serde(default)]
    pub related_comment_id: Option<CommentId>,
}

fn other_type() -> NotificationType {
    NotificationType::Other
}

impl Notification {
    /// Mark as read.
    pub fn mark_read(&mut self) {
        self.is_read = true;
    }

    /// Overwrites fields that `incoming` specifies, keeping the rest.
    ///
    /// `is_read` only moves from unread to read; a re-delivered copy never
    /// marks a read notification unread again.
    pub fn merge_from(&mut self, incoming: Notification) {
        self.is_read |= incoming.is_read;
        if incoming.notification_type != NotificationType::Other {
            self.notification_type = incoming.notification_type;
        }
        if !incoming.title.is_empty() {
            self.title = incoming.title;
        }
        if !incoming.message.is_empty() {
            self.message = incoming.message;
        }
        macro_rules! take {
            ($($field:ident),*) => {
                $(if incoming.$field.is_some() {
                    self.$field = incoming.$field;
                })*
            };
        }
        take!(
            user_id,
            created_at,
            related_project_id,
            related_scan_id,
            related_issue_id,
            related_comment_id
        );
    }
}

/// Types of notifications.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum NotificationType {
    /// A new high-severity issue was found.
    NewIssue,
    /// A scan finished successfully.
    ScanCompleted,
    /// A scan failed.
    ScanFailed,
    /// A scan's quality gate failed.
    QualityGateFailed,
    /// Someone commented on an issue.
    CommentAdded,
    /// Mentioned in a comment.
    Mention,
    /// System announcement.
    System,
    /// Any other value.
    #[serde(other)]
    Other,
}

impl NotificationType {
    /// Get a human-readable label.
    pub fn label(&self) -> &'static str {
        match self {
            NotificationType::NewIssue => "New Issue",
            NotificationType::ScanCompleted => "Scan Completed",
            NotificationType::ScanFailed => "Scan Failed",
            NotificationType::QualityGateFailed => "Quality Gate Failed",
            NotificationType::CommentAdded => "New Comment",
            NotificationType::Mention => "Mentioned",
            NotificationType::System => "System",
            NotificationType::Other => "Notification",
        }
    }
}

/// Request body for creating a notification.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewNotification {
    /// Recipient.
    pub user_id: UserId,
    /// Notification type.
    #[serde(rename = "type")]
    pub notification_type: NotificationType,
    /// Brief title.
    pub title: String,
    /// Notification body.
    pub message: String,
    /// Related project.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub related_project_id: Option<ProjectId>,
    /// Related scan.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub related_scan_id: Option<ScanId>,
    /// Related issue.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub related_issue_id: Option<IssueId>,
}

impl NewNotification {
    /// Create a new notification request.
    pub fn new(
        user_id: UserId,
        notification_type: NotificationType,
        title: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            user_id,
            notification_type,
            title: title.into(),
            message: message.into(),
            related_project_id: None,
            related_scan_id: None,
            related_issue_id: None,
        }
    }

    /// Set the related project.
    pub fn with_project(mut self, project_id: ProjectId) -> Self {
        self.related_project_id = Some(project_id);
        self
    }

    /// Set the related scan.
    pub fn with_scan(mut self, scan_id: ScanId) -> Self {
        self.related_scan_id = Some(scan_id);
        self
    }

    /// Set the related issue.
    pub fn with_issue(mut self, issue_id: IssueId) -> Self {
        self.related_issue_id = Some(issue_id);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_notification_deserializes_wire_shape() {
        let n: Notification = serde_json::from_value(serde_json::json!({
            "id": 12,
            "userId": 3,
            "type": "NEW_ISSUE",
            "title": "Critical issue",
            "message": "SQL injection in login.rs",
            "isRead": false,
            "createdAt": "2024-05-01T10:00:00Z",
            "relatedIssueId": 77
        }))
        .unwrap();

        assert_eq!(n.notification_type, NotificationType::NewIssue);
        assert_eq!(n.related_issue_id, Some(IssueId::from(77u64)));
        assert!(n.created_at.is_some());
        assert!(!n.is_read);
    }

    #[test]
    fn test_unknown_type_falls_back() {
        let n: Notification =
            serde_json::from_value(serde_json::json!({"id": "a", "type": "BIRTHDAY"})).unwrap();
        assert_eq!(n.notification_type, NotificationType::Other);
        assert_eq!(n.notification_type.label(), "Notification");
    }

    #[test]
    fn test_new_notification_skips_empty_relations() {
        let req = NewNotification::new(
            "u1".into(),
            NotificationType::QualityGateFailed,
            "Quality gate failed",
            "web: scan 9",
        )
        .with_scan("9".into());
        let json = serde_json::to_value(&req).unwrap();

        assert_eq!(json["type"], "QUALITY_GATE_FAILED");
        assert_eq!(json["relatedScanId"], "9");
        assert!(json.get("relatedIssueId").is_none());
    }

    #[test]
    fn test_notification_mark_read() {
        let mut n: Notification = serde_json::from_value(serde_json::json!({"id": 1})).unwrap();
        assert!(!n.is_read);
        n.mark_read();
        assert!(n.is_read);
    }

    #[test]
    fn test_merge_never_marks_unread() {
        let mut local: Notification =
            serde_json::from_value(serde_json::json!({"id": "n1", "title": "old"})).unwrap();
        local.mark_read();

        let redelivered: Notification =
            serde_json::from_value(serde_json::json!({"id": "n1", "title": "new"})).unwrap();
        local.merge_from(redelivered);
        assert!(local.is_read);
        assert_eq!(local.title, "new");

        let mut unread: Notification =
            serde_json::from_value(serde_json::json!({"id": "n2"})).unwrap();
        let read_elsewhere: Notification =
            serde_json::from_value(serde_json::json!({"id": "n2", "isRead": true})).unwrap();
        unread.merge_from(read_elsewhere);
        assert!(unread.is_read);
    }
}
