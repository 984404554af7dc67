//! REST collaborators.
//!
//! The orchestrator and the deduplicator only see the [`Backend`] trait.
//! [`HttpBackend`](crate::HttpBackend) talks to the real server;
//! [`MemoryBackend`] keeps everything in process for tests and demos.

use async_trait::async_trait;
use codegauge_types::{
    Issue, IssueId, NewNotification, Notification, NotificationId, Project, ProjectDetail,
    ProjectId, UserId,
};
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};

use crate::error::{BackendError, BackendResult};

/// REST operations the synchronization core depends on.
#[async_trait]
pub trait Backend: Send + Sync + 'static {
    /// Fetches every project.
    async fn fetch_projects(&self) -> BackendResult<Vec<Project>>;

    /// Fetches one project with its scan history.
    async fn fetch_project(&self, id: &ProjectId) -> BackendResult<ProjectDetail>;

    /// Fetches every issue.
    async fn fetch_issues(&self) -> BackendResult<Vec<Issue>>;

    /// Fetches one issue.
    async fn fetch_issue(&self, id: &IssueId) -> BackendResult<Issue>;

    /// Fetches the notifications of a user.
    async fn fetch_notifications(&self, user: &UserId) -> BackendResult<Vec<Notification>>;

    /// Persists a new notification and returns it with its assigned id.
    async fn create_notification(&self, request: &NewNotification) -> BackendResult<Notification>;

    /// Marks one notification read.
    async fn mark_notification_read(&self, id: &NotificationId) -> BackendResult<()>;

    /// Marks every notification of a user read.
    async fn mark_all_notifications_read(&self, user: &UserId) -> BackendResult<()>;
}

#[derive(Debug, Default)]
struct State {
    projects: Vec<ProjectDetail>,
    issues: Vec<Issue>,
    notifications: Vec<Notification>,
    next_notification_id: u64,
    offline: bool,
    fail_mark_read: bool,
    failing_issues: HashSet<IssueId>,
    calls: HashMap<&'static str, usize>,
}

impl State {
    fn call(&mut self, name: &'static str) -> BackendResult<()> {
        *self.calls.entry(name).or_default() += 1;
        if self.offline {
            return Err(BackendError::Unavailable("offline".to_string()));
        }
        Ok(())
    }
}

fn not_found(what: &str, id: impl std::fmt::Display) -> BackendError {
    BackendError::Server {
        status: 404,
        message: format!("{what} {id} not found"),
    }
}

/// An in-process [`Backend`].
#[derive(Debug, Default)]
pub struct MemoryBackend {
    state: Mutex<State>,
}

impl MemoryBackend {
    /// Create an empty backend.
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds or replaces a project.
    pub fn put_project(&self, detail: ProjectDetail) {
        let mut state = self.state.lock();
        state.projects.retain(|p| p.project.id != detail.project.id);
        state.projects.push(detail);
    }

    /// Deletes a project.
    pub fn delete_project(&self, id: &ProjectId) {
        self.state.lock().projects.retain(|p| &p.project.id != id);
    }

    /// Adds or replaces an issue.
    pub fn put_issue(&self, issue: Issue) {
        let mut state = self.state.lock();
        state.issues.retain(|i| i.id != issue.id);
        state.issues.push(issue);
    }

    /// Stores a notification as if it had been created earlier.
    pub fn put_notification(&self, notification: Notification) {
        self.state.lock().notifications.push(notification);
    }

    /// Every stored notification.
    pub fn notifications(&self) -> Vec<Notification> {
        self.state.lock().notifications.clone()
    }

    /// Makes every call fail while `offline` is true.
    pub fn set_offline(&self, offline: bool) {
        self.state.lock().offline = offline;
    }

    /// Makes creating a notification about `issue` fail until healed.
    pub fn fail_notifications_for(&self, issue: IssueId) {
        self.state.lock().failing_issues.insert(issue);
    }

    /// Lets notifications about `issue` be created again.
    pub fn heal_notifications_for(&self, issue: &IssueId) {
        self.state.lock().failing_issues.remove(issue);
    }

    /// Makes the mark-read calls fail while `fail` is true.
    pub fn set_fail_mark_read(&self, fail: bool) {
        self.state.lock().fail_mark_read = fail;
    }

    /// How many times the named trait method was called.
    pub fn calls(&self, method: &str) -> usize {
        self.state.lock().calls.get(method).copied().unwrap_or(0)
    }
}

#[async_trait]
impl Backend for MemoryBackend {
    async fn fetch_projects(&self) -> BackendResult<Vec<Project>> {
        let mut state = self.state.lock();
        state.call("fetch_projects")?;
        Ok(state.projects.iter().map(|p| p.project.clone()).collect())
    }

    async fn fetch_project(&self, id: &ProjectId) -> BackendResult<ProjectDetail> {
        let mut state = self.state.lock();
        state.call("fetch_project")?;
        state
            .projects
            .iter()
            .find(|p| &p.project.id == id)
            .cloned()
            .ok_or_else(|| not_found("project", id))
    }

    async fn fetch_issues(&self) -> BackendResult<Vec<Issue>> {
        let mut state = self.state.lock();
        state.call("fetch_issues")?;
        Ok(state.issues.clone())
    }

    async fn fetch_issue(&self, id: &IssueId) -> BackendResult<Issue> {
        let mut state = self.state.lock();
        state.call("fetch_issue")?;
        state
            .issues
            .iter()
            .find(|i| &i.id == id)
            .cloned()
            .ok_or_else(|| not_found("issue", id))
    }

    async fn fetch_notifications(&self, user: &UserId) -> BackendResult<Vec<Notification>> {
        // Let concurrent callers interleave here as they would over a network.
        tokio::task::yield_now().await;
        let mut state = self.state.lock();
        state.call("fetch_notifications")?;
        Ok(state
            .notifications
            .iter()
            .filter(|n| n.user_id.as_ref() == Some(user))
            .cloned()
            .collect())
    }

    async fn create_notification(&self, request: &NewNotification) -> BackendResult<Notification> {
        tokio::task::yield_now().await;
        let mut state = self.state.lock();
        state.call("create_notification")?;
        if let Some(issue) = &request.related_issue_id {
            if state.failing_issues.contains(issue) {
                return Err(BackendError::Server {
                    status: 500,
                    message: format!("cannot notify about issue {issue}"),
                });
            }
        }

        state.next_notification_id += 1;
        let notification = Notification {
            id: NotificationId::from(state.next_notification_id),
            user_id: Some(request.user_id.clone()),
            notification_type: request.notification_type,
            title: request.title.clone(),
            message: request.message.clone(),
            is_read: false,
            created_at: None,
            related_project_id: request.related_project_id.clone(),
            related_scan_id: request.related_scan_id.clone(),
            related_issue_id: request.related_issue_id.clone(),
            related_comment_id: None,
        };
        state.notifications.push(notification.clone());
        Ok(notification)
    }

    async fn mark_notification_read(&self, id: &NotificationId) -> BackendResult<()> {
        let mut state = self.state.lock();
        state.call("mark_notification_read")?;
        if state.fail_mark_read {
            return Err(BackendError::Server {
                status: 500,
                message: "mark read failed".to_string(),
            });
        }
        let notification = state
            .notifications
            .iter_mut()
            .find(|n| &n.id == id)
            .ok_or_else(|| not_found("notification", id))?;
        notification.mark_read();
        Ok(())
    }

    async fn mark_all_notifications_read(&self, user: &UserId) -> BackendResult<()> {
        let mut state = self.state.lock();
        state.call("mark_all_notifications_read")?;
        if state.fail_mark_read {
            return Err(BackendError::Server {
                status: 500,
                message: "mark all read failed".to_string(),
            });
        }
        state
            .notifications
            .iter_mut()
            .filter(|n| n.user_id.as_ref() == Some(user))
            .for_each(Notification::mark_read);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use codegauge_types::NotificationType;

    #[tokio::test]
    async fn test_create_assigns_ids() {
        let backend = MemoryBackend::new();
        let request = NewNotification::new(
            "u1".into(),
            NotificationType::NewIssue,
            "Critical issue",
            "SQL injection",
        )
        .with_issue("9".into());

        let first = backend.create_notification(&request).await.unwrap();
        let second = backend.create_notification(&request).await.unwrap();
        assert_ne!(first.id, second.id);
        assert_eq!(first.related_issue_id, Some("9".into()));
        assert_eq!(
            backend.fetch_notifications(&"u1".into()).await.unwrap().len(),
            2
        );
        assert!(backend
            .fetch_notifications(&"u2".into())
            .await
            .unwrap()
            .is_empty());
    }

    #[tokio::test]
    async fn test_offline_fails_every_call() {
        let backend = MemoryBackend::new();
        backend.set_offline(true);
        assert!(matches!(
            backend.fetch_issues().await,
            Err(BackendError::Unavailable(_))
        ));
        assert_eq!(backend.calls("fetch_issues"), 1);
    }

    #[tokio::test]
    async fn test_missing_project_is_404() {
        let backend = MemoryBackend::new();
        let err = backend.fetch_project(&"1".into()).await.unwrap_err();
        assert!(matches!(err, BackendError::Server { status: 404, .. }));
    }
}
