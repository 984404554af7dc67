//! Event orchestration.
//!
//! The orchestrator reacts to each typed event stream: it decides which REST
//! re-fetch an event needs, applies the result to the [`StateStore`], runs the
//! notification deduplicator where new notifications may be due, and
//! publishes an [`Acknowledgement`] for anything the user should see.
//!
//! Streams are handled by one task each, so events on one topic are applied
//! in arrival order. Events on different topics interleave freely; handlers
//! re-read the store after every await and check that the entities they
//! touch still exist.

use codegauge_realtime::{
    CommentEvent, ConnectionManager, EventRouter, IssueAction, IssueChangeEvent,
    NotificationEvent, ProjectAction, ProjectChangeEvent, ScanEvent, StompTransport,
    VerifyStatusEvent,
};
use codegauge_store::{RepoStatusStore, StateStore, Upsert};
use codegauge_types::{
    IssueId, NotificationId, ProjectDetail, ProjectId, RepoStatus, Scan, ScanId, ScanStatus,
    UserId, UserSettings,
};
use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use tokio::sync::broadcast;
use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::backend::Backend;
use crate::config::SyncConfig;
use crate::dedup::NotificationDeduplicator;
use crate::error::{Result, SyncError};
use crate::http::HttpBackend;

/// Something the user should be told about.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Acknowledgement {
    /// A scan started.
    ScanStarted { project_id: ProjectId, scan_id: ScanId },
    /// A scan finished successfully.
    ScanCompleted { project_id: ProjectId, scan_id: ScanId },
    /// A scan failed.
    ScanFailed { project_id: ProjectId, scan_id: ScanId },
    /// A project was added.
    ProjectAdded { project_id: ProjectId, name: String },
    /// A project was updated.
    ProjectUpdated { project_id: ProjectId, name: String },
    /// A project was deleted, along with `removed` dependent records.
    ProjectDeleted {
        project_id: ProjectId,
        name: String,
        removed: usize,
    },
    /// A notification arrived.
    NewNotification {
        title: String,
        message: String,
        broadcast: bool,
    },
    /// The current user's verification status changed.
    VerifyStatusChanged { status: String },
}

impl fmt::Display for Acknowledgement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Acknowledgement::ScanStarted { project_id, scan_id } => {
                write!(f, "Scan {scan_id} started for project {project_id}")
            }
            Acknowledgement::ScanCompleted { project_id, scan_id } => {
                write!(f, "Scan {scan_id} completed for project {project_id}")
            }
            Acknowledgement::ScanFailed { project_id, scan_id } => {
                write!(f, "Scan {scan_id} failed for project {project_id}")
            }
            Acknowledgement::ProjectAdded { name, .. } => write!(f, "Project {name} added"),
            Acknowledgement::ProjectUpdated { name, .. } => write!(f, "Project {name} updated"),
            Acknowledgement::ProjectDeleted { name, removed, .. } => {
                write!(f, "Project {name} deleted ({removed} related records removed)")
            }
            Acknowledgement::NewNotification { title, message, .. } => {
                write!(f, "{title}: {message}")
            }
            Acknowledgement::VerifyStatusChanged { status } => {
                write!(f, "Account verification status: {status}")
            }
        }
    }
}

struct Shared {
    store: Arc<StateStore>,
    backend: Arc<dyn Backend>,
    connection: Arc<ConnectionManager>,
    dedup: Arc<NotificationDeduplicator>,
    status: Arc<RepoStatusStore>,
    acks: broadcast::Sender<Acknowledgement>,
    user: RwLock<Option<UserId>>,
}

impl Shared {
    fn user(&self) -> Option<UserId> {
        self.user.read().clone()
    }

    fn acknowledge(&self, ack: Acknowledgement) {
        info!(ack = %ack, "Acknowledgement");
        let _ = self.acks.send(ack);
    }

    fn persist_status(&self, project_id: &ProjectId, status: Option<RepoStatus>) {
        let result = match status {
            Some(RepoStatus::Scanning) => self.status.set(project_id, RepoStatus::Scanning),
            _ => self.status.remove(project_id),
        };
        if let Err(e) = result {
            warn!(project_id = %project_id, error = %e, "Failed to persist repository status");
        }
    }

    fn set_project_status(&self, project_id: &ProjectId, status: RepoStatus) {
        // The project may not be loaded; that is fine.
        let _ = self
            .store
            .projects()
            .patch(project_id, |project| project.status = Some(status));
    }

    /// Applies a fetched project and its scans; returns the merged scans.
    fn apply_detail(&self, detail: ProjectDetail) -> Vec<Scan> {
        let ProjectDetail { project, scans } = detail;
        let project_id = project.id.clone();
        if self.store.projects().upsert(project) == Upsert::Refused {
            debug!(project_id = %project_id, "Ignoring detail of deleted project");
            return Vec::new();
        }
        scans
            .into_iter()
            .filter_map(|scan| {
                let id = scan.id.clone();
                self.store.scans().upsert(scan);
                self.store.scans().get(&id)
            })
            .collect()
    }

    async fn refresh_project(&self, project_id: &ProjectId) -> Option<Vec<Scan>> {
        match self.backend.fetch_project(project_id).await {
            Ok(detail) => Some(self.apply_detail(detail)),
            Err(e) => {
                warn!(project_id = %project_id, error = %e, "Failed to refetch project");
                None
            }
        }
    }

    async fn handle_scan(&self, event: ScanEvent) {
        let ScanEvent {
            project_id,
            scan_id,
            status,
        } = event;

        if !self.store.project_is_known(&project_id) {
            debug!(project_id = %project_id, scan_id = %scan_id, "Dropping scan event for unknown project");
            return;
        }

        let incoming = Scan::new(scan_id.clone(), project_id.clone(), status);
        if self.store.scans().upsert(incoming) == Upsert::Refused {
            return;
        }
        let merged = self
            .store
            .scans()
            .get(&scan_id)
            .map_or(status, |scan| scan.status);
        if status != ScanStatus::Unknown && merged != status {
            debug!(scan_id = %scan_id, incoming = %status, kept = %merged, "Stale scan event");
            return;
        }

        match status {
            ScanStatus::Scanning => {
                self.persist_status(&project_id, Some(RepoStatus::Scanning));
                self.set_project_status(&project_id, RepoStatus::Scanning);
                self.acknowledge(Acknowledgement::ScanStarted {
                    project_id,
                    scan_id,
                });
            }
            ScanStatus::Success | ScanStatus::Failed => {
                self.finish_scan(&project_id, &scan_id, status).await;
            }
            ScanStatus::Unknown => {
                debug!(project_id = %project_id, scan_id = %scan_id, "Scan status not recognized");
            }
        }
    }

    async fn finish_scan(&self, project_id: &ProjectId, scan_id: &ScanId, status: ScanStatus) {
        self.persist_status(project_id, None);
        if let Some(repo_status) = RepoStatus::from_scan(status) {
            self.set_project_status(project_id, repo_status);
        }

        let scans = self.refresh_project(project_id).await.unwrap_or_default();
        // The project may have been deleted while the fetch was in flight.
        if !self.store.project_is_known(project_id) {
            return;
        }
        if let Some(repo_status) = RepoStatus::from_scan(status) {
            self.set_project_status(project_id, repo_status);
        }

        if status == ScanStatus::Success {
            self.refresh_issues_and_notify().await;
        }
        if let Some(user) = self.user() {
            let finished: Vec<Scan> = scans.into_iter().filter(|s| &s.id == scan_id).collect();
            if let Err(e) = self.dedup.generate_from_failed_scans(&user, &finished).await {
                warn!(scan_id = %scan_id, error = %e, "Quality gate notifications skipped");
            }
        }

        let (project_id, scan_id) = (project_id.clone(), scan_id.clone());
        self.acknowledge(if status == ScanStatus::Success {
            Acknowledgement::ScanCompleted {
                project_id,
                scan_id,
            }
        } else {
            Acknowledgement::ScanFailed {
                project_id,
                scan_id,
            }
        });
    }

    async fn refresh_issues_and_notify(&self) {
        let issues = match self.backend.fetch_issues().await {
            Ok(issues) => issues,
            Err(e) => {
                warn!(error = %e, "Failed to refetch issues");
                return;
            }
        };
        self.store.issues().set_all(issues);

        let Some(user) = self.user() else {
            return;
        };
        let issues = self.store.issues().snapshot();
        if let Err(e) = self.dedup.generate_from_issues(&user, &issues).await {
            warn!(error = %e, "Issue notifications skipped");
        }
    }

    fn handle_notification(&self, event: NotificationEvent) {
        let NotificationEvent {
            notification,
            broadcast,
        } = event;
        let (title, message) = (notification.title.clone(), notification.message.clone());
        let inserted = self.store.notifications().upsert(notification) == Upsert::Inserted;
        if inserted {
            self.acknowledge(Acknowledgement::NewNotification {
                title,
                message,
                broadcast,
            });
        }
    }

    async fn handle_project_change(&self, event: ProjectChangeEvent) {
        let ProjectChangeEvent {
            action,
            project_id,
            project_name,
        } = event;

        match action {
            ProjectAction::Added | ProjectAction::Updated => {
                if action == ProjectAction::Added {
                    self.store.revive_project(&project_id);
                }
                self.refresh_project(&project_id).await;
                let name = self
                    .store
                    .projects()
                    .get(&project_id)
                    .map(|p| p.name)
                    .filter(|name| !name.is_empty())
                    .unwrap_or(project_name);
                self.acknowledge(if action == ProjectAction::Added {
                    Acknowledgement::ProjectAdded { project_id, name }
                } else {
                    Acknowledgement::ProjectUpdated { project_id, name }
                });
            }
            ProjectAction::Deleted => {
                let removal = self.store.remove_project(&project_id);
                self.persist_status(&project_id, None);
                let name = removal
                    .project
                    .as_ref()
                    .map(|p| p.name.clone())
                    .filter(|name| !name.is_empty())
                    .unwrap_or(project_name);
                self.acknowledge(Acknowledgement::ProjectDeleted {
                    project_id,
                    name,
                    removed: removal.scans.len() + removal.issues.len(),
                });
            }
        }
    }

    async fn handle_issue_change(&self, event: IssueChangeEvent) {
        match event.action {
            IssueAction::Updated => match self.backend.fetch_issue(&event.issue_id).await {
                Ok(issue) => {
                    self.store.issues().upsert(issue);
                }
                Err(e) => warn!(issue_id = %event.issue_id, error = %e, "Failed to refetch issue"),
            },
        }
    }

    fn handle_verify_status(&self, event: VerifyStatusEvent) {
        if self.user().as_ref() != Some(&event.user_id) {
            debug!(user_id = %event.user_id, "Ignoring verify status of another user");
            return;
        }
        let mut settings = UserSettings::new(event.user_id);
        settings.verify_status = Some(event.status.clone());
        self.store.user_settings().upsert(settings);
        self.acknowledge(Acknowledgement::VerifyStatusChanged {
            status: event.status,
        });
    }

    /// Re-fetches every project still persisted as scanning.
    async fn validate_after_reconnect(&self) -> usize {
        let scanning: Vec<ProjectId> = self
            .status
            .entries()
            .into_iter()
            .filter(|(_, status)| *status == RepoStatus::Scanning)
            .map(|(id, _)| id)
            .collect();

        let mut refreshed = 0;
        for project_id in scanning {
            let Some(scans) = self.refresh_project(&project_id).await else {
                continue;
            };
            refreshed += 1;
            let latest = scans.into_iter().max_by_key(|scan| scan.started_at);
            if let Some(scan) = latest.filter(|scan| scan.status.is_terminal()) {
                info!(project_id = %project_id, scan_id = %scan.id, "Scan finished while offline");
                self.finish_scan(&project_id, &scan.id, scan.status).await;
            }
        }
        refreshed
    }

    fn restore_persisted_status(&self) {
        for (project_id, status) in self.status.entries() {
            self.set_project_status(&project_id, status);
        }
    }
}

/// Wires the push layer, the state store and the REST backend together.
pub struct SyncOrchestrator {
    shared: Arc<Shared>,
    handlers: Mutex<Vec<JoinHandle<()>>>,
}

impl SyncOrchestrator {
    /// Create an orchestrator. Nothing runs until [`start`](Self::start).
    pub fn new(
        store: Arc<StateStore>,
        backend: Arc<dyn Backend>,
        connection: Arc<ConnectionManager>,
        status: Arc<RepoStatusStore>,
        dedup_capacity: usize,
    ) -> Self {
        let dedup = Arc::new(NotificationDeduplicator::new(
            backend.clone(),
            store.clone(),
            dedup_capacity,
        ));
        Self {
            shared: Arc::new(Shared {
                store,
                backend,
                connection,
                dedup,
                status,
                acks: broadcast::channel(256).0,
                user: RwLock::new(None),
            }),
            handlers: Mutex::new(Vec::new()),
        }
    }

    /// Builds the STOMP transport, the HTTP backend and the status store
    /// described by `config`.
    ///
    /// # Errors
    ///
    /// Fails if the configuration is invalid or the HTTP client cannot be
    /// built.
    pub fn from_config(config: &SyncConfig) -> Result<Self> {
        config.validate()?;

        let mut transport = StompTransport::new(config.ws_url.clone());
        let mut backend = HttpBackend::new(config.api_url.clone())?;
        if let Some(token) = &config.auth_token {
            transport = transport.with_auth_token(token.clone());
            backend = backend.with_auth_token(token.clone());
        }
        let status = match &config.status_file {
            Some(path) => RepoStatusStore::open(path.clone()),
            None => RepoStatusStore::in_memory(),
        };
        let connection = ConnectionManager::new(
            Arc::new(transport),
            Arc::new(EventRouter::with_capacity(config.event_capacity)),
            config.reconnect.clone(),
        );

        Ok(Self::new(
            Arc::new(StateStore::new()),
            Arc::new(backend),
            Arc::new(connection),
            Arc::new(status),
            config.dedup_capacity,
        ))
    }

    /// Loads the initial state, starts one handler per event stream and
    /// connects as `user`.
    ///
    /// REST failures during the initial load are logged; the affected
    /// collections stay unloaded.
    pub async fn start(&self, user: Option<UserId>) {
        *self.shared.user.write() = user.clone();
        self.load_initial_state().await;
        self.shared.restore_persisted_status();

        let router = self.shared.connection.router().clone();
        {
            let mut handlers = self.handlers.lock();
            for handle in handlers.drain(..) {
                handle.abort();
            }
            handlers.push(spawn_handler(router.scan_events(), &self.shared, |s, e| async move {
                s.handle_scan(e).await
            }));
            handlers.push(spawn_handler(
                router.notification_events(),
                &self.shared,
                |s, e| async move { s.handle_notification(e) },
            ));
            handlers.push(spawn_handler(
                router.project_events(),
                &self.shared,
                |s, e| async move { s.handle_project_change(e).await },
            ));
            handlers.push(spawn_handler(router.issue_events(), &self.shared, |s, e| async move {
                s.handle_issue_change(e).await
            }));
            handlers.push(spawn_handler(
                router.verify_status_events(),
                &self.shared,
                |s, e| async move { s.handle_verify_status(e) },
            ));
            handlers.push(spawn_handler(
                self.shared.connection.sessions(),
                &self.shared,
                |s, session| async move {
                    if session > 1 {
                        let refreshed = s.validate_after_reconnect().await;
                        info!(session, refreshed, "Validated state after reconnect");
                    }
                },
            ));
        }

        self.shared.connection.connect(user).await;
        info!("Sync orchestrator started");
    }

    async fn load_initial_state(&self) {
        let shared = &self.shared;
        match shared.backend.fetch_projects().await {
            Ok(projects) => shared.store.projects().set_all(projects),
            Err(e) => warn!(error = %e, "Failed to load projects"),
        }
        match shared.backend.fetch_issues().await {
            Ok(issues) => shared.store.issues().set_all(issues),
            Err(e) => warn!(error = %e, "Failed to load issues"),
        }
        if let Some(user) = shared.user() {
            match shared.backend.fetch_notifications(&user).await {
                Ok(notifications) => shared.store.notifications().set_all(notifications),
                Err(e) => warn!(error = %e, "Failed to load notifications"),
            }
        }
    }

    /// Disconnects, stops every handler and drops all cached state.
    pub async fn shutdown(&self) {
        self.shared.connection.disconnect().await;
        for handle in self.handlers.lock().drain(..) {
            handle.abort();
        }
        self.shared.connection.registry().clear();
        self.shared.store.clear();
        self.shared.dedup.reset();
        *self.shared.user.write() = None;
        info!("Sync orchestrator stopped");
    }

    /// Marks a notification read locally, then on the server. The local
    /// change is reverted if the server call fails.
    ///
    /// # Errors
    ///
    /// Returns the store error if the notification is not cached, or the
    /// backend error after reverting.
    pub async fn mark_notification_read(&self, id: &NotificationId) -> Result<()> {
        let notifications = self.shared.store.notifications();
        let mut was_read = false;
        notifications.patch(id, |n| {
            was_read = n.is_read;
            n.is_read = true;
        })?;

        if let Err(e) = self.shared.backend.mark_notification_read(id).await {
            warn!(id = %id, error = %e, "Mark read failed, reverting");
            let _ = notifications.patch(id, |n| n.is_read = was_read);
            return Err(e.into());
        }
        Ok(())
    }

    /// Marks every cached notification read locally, then on the server.
    /// Notifications changed locally are reverted if the server call fails.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::NoUser`] if nobody is logged in, or the backend
    /// error after reverting.
    pub async fn mark_all_notifications_read(&self) -> Result<()> {
        let user = self.shared.user().ok_or(SyncError::NoUser)?;
        let notifications = self.shared.store.notifications();
        let unread: Vec<NotificationId> = notifications
            .snapshot()
            .into_iter()
            .filter(|n| !n.is_read)
            .map(|n| n.id)
            .collect();
        for id in &unread {
            let _ = notifications.patch(id, |n| n.is_read = true);
        }

        if let Err(e) = self.shared.backend.mark_all_notifications_read(&user).await {
            warn!(count = unread.len(), error = %e, "Mark all read failed, reverting");
            for id in &unread {
                let _ = notifications.patch(id, |n| n.is_read = false);
            }
            return Err(e.into());
        }
        Ok(())
    }

    /// Subscribes to comments on an issue; they arrive on
    /// [`comment_events`](Self::comment_events).
    ///
    /// # Errors
    ///
    /// Fails if nobody is logged in or the transport refuses the topic.
    pub async fn watch_issue_comments(&self, issue_id: IssueId) -> Result<()> {
        self.shared
            .connection
            .registry()
            .watch_issue_comments(issue_id)
            .await?;
        Ok(())
    }

    /// Stream of raw comments on watched issues.
    pub fn comment_events(&self) -> broadcast::Receiver<CommentEvent> {
        self.shared.connection.router().comment_events()
    }

    /// Stream of acknowledgements.
    pub fn acknowledgements(&self) -> broadcast::Receiver<Acknowledgement> {
        self.shared.acks.subscribe()
    }

    /// The state store.
    pub fn store(&self) -> &Arc<StateStore> {
        &self.shared.store
    }

    /// The connection manager.
    pub fn connection(&self) -> &Arc<ConnectionManager> {
        &self.shared.connection
    }

    /// The notification deduplicator.
    pub fn deduplicator(&self) -> &Arc<NotificationDeduplicator> {
        &self.shared.dedup
    }

    /// The current user.
    pub fn user(&self) -> Option<UserId> {
        self.shared.user()
    }

    /// Applies a scan event as its handler would.
    pub async fn handle_scan_event(&self, event: ScanEvent) {
        self.shared.handle_scan(event).await;
    }

    /// Applies a notification event as its handler would.
    pub fn handle_notification_event(&self, event: NotificationEvent) {
        self.shared.handle_notification(event);
    }

    /// Applies a project change as its handler would.
    pub async fn handle_project_event(&self, event: ProjectChangeEvent) {
        self.shared.handle_project_change(event).await;
    }

    /// Applies an issue change as its handler would.
    pub async fn handle_issue_event(&self, event: IssueChangeEvent) {
        self.shared.handle_issue_change(event).await;
    }

    /// Applies a verification status change as its handler would.
    pub fn handle_verify_status_event(&self, event: VerifyStatusEvent) {
        self.shared.handle_verify_status(event);
    }

    /// Re-fetches projects persisted as scanning. Returns how many were
    /// refreshed.
    pub async fn validate_after_reconnect(&self) -> usize {
        self.shared.validate_after_reconnect().await
    }
}

impl Drop for SyncOrchestrator {
    fn drop(&mut self) {
        for handle in self.handlers.get_mut().drain(..) {
            handle.abort();
        }
    }
}

impl fmt::Debug for SyncOrchestrator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SyncOrchestrator")
            .field("user", &self.shared.user())
            .field("handlers", &self.handlers.lock().len())
            .finish()
    }
}

fn spawn_handler<E, F, Fut>(
    mut events: broadcast::Receiver<E>,
    shared: &Arc<Shared>,
    handle: F,
) -> JoinHandle<()>
where
    E: Clone + Send + 'static,
    F: Fn(Arc<Shared>, E) -> Fut + Send + 'static,
    Fut: Future<Output = ()> + Send,
{
    let shared = shared.clone();
    tokio::spawn(async move {
        loop {
            match events.recv().await {
                Ok(event) => handle(shared.clone(), event).await,
                Err(RecvError::Lagged(missed)) => {
                    warn!(missed, "Event handler fell behind, events dropped");
                }
                Err(RecvError::Closed) => break,
            }
        }
    })
}
