//! Event router: raw push messages in, typed events out.
//!
//! This is the only place untyped payloads become typed values. A message
//! that fails to parse is logged and dropped; it never reaches a consumer and
//! never stops later messages from being delivered.

use codegauge_types::{IssueId, Notification, ProjectId, ScanId, ScanStatus, UserId};
use parking_lot::RwLock;
use serde::Deserialize;
use tokio::sync::broadcast;
use tracing::{debug, warn};

use crate::error::RealtimeError;
use crate::event::{
    CommentEvent, Event, EventKind, IssueAction, IssueChangeEvent, NotificationEvent,
    ProjectAction, ProjectChangeEvent, ScanEvent, VerifyStatusEvent,
};
use crate::topic::Topic;

/// Default capacity of each event stream.
pub const DEFAULT_EVENT_CAPACITY: usize = 1024;

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ScanStatusPayload {
    project_id: ProjectId,
    #[serde(alias = "id")]
    scan_id: ScanId,
    status: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ProjectChangePayload {
    action: String,
    project_id: ProjectId,
    #[serde(default)]
    project_name: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct IssueChangePayload {
    action: String,
    issue_id: IssueId,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct VerifyStatusPayload {
    #[serde(default)]
    user_id: Option<UserId>,
    status: String,
}

/// A decoded inbound message.
#[derive(Debug, Clone, PartialEq)]
pub enum Inbound {
    /// One of the typed events.
    Event(Event),
    /// A raw comment on a watched issue.
    Comment(CommentEvent),
}

/// Decodes a payload received on `topic`.
///
/// # Errors
///
/// Returns an error if the payload is not valid JSON for the topic, or names
/// an action the client does not know.
pub fn decode(topic: &Topic, payload: &str) -> Result<Inbound, RealtimeError> {
    let event = match topic {
        Topic::ScanStatus => {
            let raw: ScanStatusPayload = serde_json::from_str(payload)?;
            Event::Scan(ScanEvent {
                project_id: raw.project_id,
                scan_id: raw.scan_id,
                status: ScanStatus::from_backend(&raw.status),
            })
        }
        Topic::UserNotifications(_) | Topic::GlobalNotifications => {
            let notification: Notification = serde_json::from_str(payload)?;
            Event::Notification(NotificationEvent {
                notification,
                broadcast: *topic == Topic::GlobalNotifications,
            })
        }
        Topic::Projects => {
            let raw: ProjectChangePayload = serde_json::from_str(payload)?;
            let action = ProjectAction::parse(&raw.action).ok_or_else(|| {
                RealtimeError::Protocol(format!("unknown project action: {}", raw.action))
            })?;
            Event::ProjectChange(ProjectChangeEvent {
                action,
                project_id: raw.project_id,
                project_name: raw.project_name,
            })
        }
        Topic::Issues => {
            let raw: IssueChangePayload = serde_json::from_str(payload)?;
            let action = IssueAction::parse(&raw.action).ok_or_else(|| {
                RealtimeError::Protocol(format!("unknown issue action: {}", raw.action))
            })?;
            Event::IssueChange(IssueChangeEvent {
                action,
                issue_id: raw.issue_id,
            })
        }
        Topic::VerifyStatus(owner) => {
            let raw: VerifyStatusPayload = serde_json::from_str(payload)?;
            Event::VerifyStatus(VerifyStatusEvent {
                user_id: raw.user_id.unwrap_or_else(|| owner.clone()),
                status: raw.status,
            })
        }
        Topic::IssueComments(issue_id) => {
            let comment: serde_json::Value = serde_json::from_str(payload)?;
            return Ok(Inbound::Comment(CommentEvent {
                issue_id: issue_id.clone(),
                comment,
            }));
        }
    };
    Ok(Inbound::Event(event))
}

/// Router statistics.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RouterStats {
    /// Messages decoded and published.
    pub dispatched: u64,
    /// Messages dropped because the payload was malformed.
    pub dropped: u64,
    /// Messages dropped because the topic is unknown.
    pub unrouted: u64,
}

/// Demultiplexes raw messages onto one stream per event variant.
///
/// Dropping a receiver only stops delivery to that receiver; the router and
/// the transport subscription behind it are unaffected.
#[derive(Debug)]
pub struct EventRouter {
    scans: broadcast::Sender<ScanEvent>,
    notifications: broadcast::Sender<NotificationEvent>,
    projects: broadcast::Sender<ProjectChangeEvent>,
    issues: broadcast::Sender<IssueChangeEvent>,
    verify_status: broadcast::Sender<VerifyStatusEvent>,
    comments: broadcast::Sender<CommentEvent>,
    stats: RwLock<RouterStats>,
}

impl EventRouter {
    /// Create a new router.
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_EVENT_CAPACITY)
    }

    /// Create a router whose streams buffer `capacity` events per receiver.
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            scans: broadcast::channel(capacity).0,
            notifications: broadcast::channel(capacity).0,
            projects: broadcast::channel(capacity).0,
            issues: broadcast::channel(capacity).0,
            verify_status: broadcast::channel(capacity).0,
            comments: broadcast::channel(capacity).0,
            stats: RwLock::new(RouterStats::default()),
        }
    }

    /// Decodes a raw message and publishes it; returns what was published.
    ///
    /// Never panics and never returns an error: malformed input is counted,
    /// logged and dropped.
    pub fn dispatch(&self, topic: &str, payload: &str) -> Option<EventKind> {
        let parsed = match Topic::parse(topic) {
            Ok(parsed) => parsed,
            Err(e) => {
                warn!(topic = %topic, error = %e, "Dropping message on unknown topic");
                self.stats.write().unrouted += 1;
                return None;
            }
        };

        match decode(&parsed, payload) {
            Ok(Inbound::Event(event)) => Some(self.publish(event)),
            Ok(Inbound::Comment(comment)) => {
                let _ = self.comments.send(comment);
                self.stats.write().dispatched += 1;
                Some(EventKind::Comment)
            }
            Err(e) => {
                warn!(topic = %topic, error = %e, "Dropping malformed payload");
                self.stats.write().dropped += 1;
                None
            }
        }
    }

    /// Publishes a typed event on its stream.
    pub fn publish(&self, event: Event) -> EventKind {
        let kind = event.kind();
        // A send error only means nobody is listening right now.
        let receivers = match event {
            Event::Scan(e) => self.scans.send(e).unwrap_or(0),
            Event::Notification(e) => self.notifications.send(e).unwrap_or(0),
            Event::ProjectChange(e) => self.projects.send(e).unwrap_or(0),
            Event::IssueChange(e) => self.issues.send(e).unwrap_or(0),
            Event::VerifyStatus(e) => self.verify_status.send(e).unwrap_or(0),
        };

        self.stats.write().dispatched += 1;
        debug!(event = %kind, receivers, "Event dispatched");
        kind
    }

    /// Stream of scan status changes.
    pub fn scan_events(&self) -> broadcast::Receiver<ScanEvent> {
        self.scans.subscribe()
    }

    /// Stream of notifications (private and global).
    pub fn notification_events(&self) -> broadcast::Receiver<NotificationEvent> {
        self.notifications.subscribe()
    }

    /// Stream of project changes.
    pub fn project_events(&self) -> broadcast::Receiver<ProjectChangeEvent> {
        self.projects.subscribe()
    }

    /// Stream of issue changes.
    pub fn issue_events(&self) -> broadcast::Receiver<IssueChangeEvent> {
        self.issues.subscribe()
    }

    /// Stream of verification status changes.
    pub fn verify_status_events(&self) -> broadcast::Receiver<VerifyStatusEvent> {
        self.verify_status.subscribe()
    }

    /// Stream of raw comments on watched issues.
    pub fn comment_events(&self) -> broadcast::Receiver<CommentEvent> {
        self.comments.subscribe()
    }

    /// Get router statistics.
    pub fn stats(&self) -> RouterStats {
        self.stats.read().clone()
    }
}

impl Default for EventRouter {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::broadcast::error::TryRecvError;

    #[test]
    fn test_scan_status_is_mapped() {
        let router = EventRouter::new();
        let mut rx = router.scan_events();

        let kind = router.dispatch(
            "/topic/scan-status",
            r#"{"projectId": 1, "scanId": 10, "status": "PENDING"}"#,
        );
        assert_eq!(kind, Some(EventKind::Scan));

        let event = rx.try_recv().unwrap();
        assert_eq!(event.status, ScanStatus::Scanning);
        assert_eq!(event.scan_id.as_str(), "10");
    }

    #[test]
    fn test_scan_id_alias() {
        let router = EventRouter::new();
        let mut rx = router.scan_events();
        router.dispatch(
            "/topic/scan-status",
            r#"{"projectId": 1, "id": 11, "status": "SUCCESS"}"#,
        );
        let event = rx.try_recv().unwrap();
        assert_eq!(event.scan_id.as_str(), "11");
        assert_eq!(event.status, ScanStatus::Success);
    }

    #[test]
    fn test_each_variant_lands_on_its_own_stream() {
        let router = EventRouter::new();
        let mut scans = router.scan_events();
        let mut notifications = router.notification_events();
        let mut projects = router.project_events();
        let mut issues = router.issue_events();
        let mut verify = router.verify_status_events();

        router.dispatch(
            "/topic/projects",
            r#"{"action": "DELETED", "projectId": 3, "projectName": "web"}"#,
        );
        assert_eq!(projects.try_recv().unwrap().action, ProjectAction::Deleted);
        assert!(matches!(scans.try_recv(), Err(TryRecvError::Empty)));
        assert!(matches!(issues.try_recv(), Err(TryRecvError::Empty)));

        router.dispatch("/topic/issues", r#"{"action": "UPDATED", "issueId": 5}"#);
        assert_eq!(issues.try_recv().unwrap().issue_id.as_str(), "5");

        router.dispatch(
            "/topic/notifications/global",
            r#"{"id": 1, "type": "SYSTEM", "title": "Maintenance"}"#,
        );
        assert!(notifications.try_recv().unwrap().broadcast);

        router.dispatch(
            "/topic/user/u1/verify-status",
            r#"{"status": "VERIFIED"}"#,
        );
        let event = verify.try_recv().unwrap();
        assert_eq!(event.user_id.as_str(), "u1");
        assert_eq!(event.status, "VERIFIED");

        assert!(matches!(notifications.try_recv(), Err(TryRecvError::Empty)));
    }

    #[test]
    fn test_comments_are_forwarded_raw() {
        let router = EventRouter::new();
        let mut rx = router.comment_events();
        let kind = router.dispatch(
            "/topic/issue/9/comments",
            r#"{"id": 1, "body": "looks wrong", "author": {"name": "bo"}}"#,
        );
        assert_eq!(kind, Some(EventKind::Comment));
        let comment = rx.try_recv().unwrap();
        assert_eq!(comment.issue_id.as_str(), "9");
        assert_eq!(comment.comment["author"]["name"], "bo");
    }

    #[test]
    fn test_malformed_payloads_are_dropped() {
        let router = EventRouter::new();
        let mut scans = router.scan_events();
        let mut projects = router.project_events();

        assert_eq!(router.dispatch("/topic/scan-status", "{not json"), None);
        assert_eq!(router.dispatch("/topic/scan-status", r#"{"status": "SUCCESS"}"#), None);
        assert_eq!(
            router.dispatch("/topic/projects", r#"{"action": "EXPLODED", "projectId": 1}"#),
            None
        );
        assert_eq!(router.dispatch("/topic/elsewhere", "{}"), None);

        assert!(matches!(scans.try_recv(), Err(TryRecvError::Empty)));
        assert!(matches!(projects.try_recv(), Err(TryRecvError::Empty)));

        // Later messages still flow.
        router.dispatch(
            "/topic/scan-status",
            r#"{"projectId": 1, "scanId": 2, "status": "FAILED"}"#,
        );
        assert_eq!(scans.try_recv().unwrap().status, ScanStatus::Failed);

        let stats = router.stats();
        assert_eq!(stats.dropped, 3);
        assert_eq!(stats.unrouted, 1);
        assert_eq!(stats.dispatched, 1);
    }

    #[test]
    fn test_dropping_a_receiver_does_not_affect_others() {
        let router = EventRouter::new();
        let first = router.scan_events();
        let mut second = router.scan_events();
        drop(first);

        router.dispatch(
            "/topic/scan-status",
            r#"{"projectId": 1, "scanId": 2, "status": "SUCCESS"}"#,
        );
        assert!(second.try_recv().is_ok());
    }

    #[test]
    fn test_order_within_topic_is_preserved() {
        let router = EventRouter::new();
        let mut rx = router.scan_events();
        for status in ["PENDING", "SUCCESS"] {
            router.dispatch(
                "/topic/scan-status",
                &format!(r#"{{"projectId": 1, "scanId": 2, "status": "{status}"}}"#),
            );
        }
        assert_eq!(rx.try_recv().unwrap().status, ScanStatus::Scanning);
        assert_eq!(rx.try_recv().unwrap().status, ScanStatus::Success);
    }
}
