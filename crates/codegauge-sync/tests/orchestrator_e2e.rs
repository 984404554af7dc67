//! End-to-end tests for the sync orchestrator.
//!
//! Each test drives a real connection manager over the in-memory transport,
//! so payloads travel the same path as in production: transport, router,
//! handler task, store.

use codegauge_realtime::{ConnectionManager, EventRouter, MemoryTransport, ReconnectPolicy};
use codegauge_store::{RepoStatusStore, StateStore};
use codegauge_sync::{Acknowledgement, HttpBackend, MemoryBackend, SyncOrchestrator};
use codegauge_types::{
    Issue, NotificationType, Project, ProjectDetail, RepoStatus, Scan, ScanStatus, Severity,
};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;

// ============================================================================
// Harness
// ============================================================================

struct Harness {
    transport: Arc<MemoryTransport>,
    backend: Arc<MemoryBackend>,
    status: Arc<RepoStatusStore>,
    orchestrator: SyncOrchestrator,
    acks: broadcast::Receiver<Acknowledgement>,
    sessions: broadcast::Receiver<u64>,
}

impl Harness {
    fn new(backend: Arc<MemoryBackend>) -> Self {
        let transport = Arc::new(MemoryTransport::new());
        let status = Arc::new(RepoStatusStore::in_memory());
        let connection = Arc::new(ConnectionManager::new(
            transport.clone(),
            Arc::new(EventRouter::new()),
            ReconnectPolicy::default(),
        ));
        let sessions = connection.sessions();
        let orchestrator = SyncOrchestrator::new(
            Arc::new(StateStore::new()),
            backend.clone(),
            connection,
            status.clone(),
            128,
        );
        let acks = orchestrator.acknowledgements();
        Self {
            transport,
            backend,
            status,
            orchestrator,
            acks,
            sessions,
        }
    }

    async fn start(&mut self, user: &str) {
        self.orchestrator.start(Some(user.into())).await;
        assert_eq!(self.next_session().await, 1);
    }

    async fn next_session(&mut self) -> u64 {
        tokio::time::timeout(Duration::from_secs(60), self.sessions.recv())
            .await
            .expect("timed out waiting for session")
            .expect("session stream closed")
    }

    async fn next_ack(&mut self) -> Acknowledgement {
        tokio::time::timeout(Duration::from_secs(60), self.acks.recv())
            .await
            .expect("timed out waiting for acknowledgement")
            .expect("acknowledgement stream closed")
    }

    fn publish(&self, topic: &str, payload: &str) {
        assert!(
            self.transport.publish(topic, payload),
            "{topic} is not subscribed"
        );
    }
}

fn project(id: &str, name: &str, scans: Vec<Scan>) -> ProjectDetail {
    ProjectDetail {
        project: Project::new(id.into(), name),
        scans,
    }
}

fn scan(id: &str, project: &str, status: ScanStatus) -> Scan {
    Scan::new(id.into(), project.into(), status)
}

fn scan_payload(project: u64, scan: u64, status: &str) -> String {
    format!(r#"{{"projectId": {project}, "scanId": {scan}, "status": "{status}"}}"#)
}

// ============================================================================
// Scan lifecycle
// ============================================================================

#[tokio::test(start_paused = true)]
async fn test_scan_lifecycle_notifies_critical_issue_once() {
    let backend = Arc::new(MemoryBackend::new());
    backend.put_project(project("1", "payments", vec![]));
    backend.put_issue(Issue::new("10".into(), "SQL injection", Severity::Critical).with_project("1".into()));
    backend.put_issue(Issue::new("11".into(), "Long method", Severity::Minor).with_project("1".into()));
    let mut h = Harness::new(backend);
    h.start("u1").await;

    h.publish("/topic/scan-status", &scan_payload(1, 7, "PENDING"));
    assert!(matches!(h.next_ack().await, Acknowledgement::ScanStarted { .. }));
    assert_eq!(h.status.get(&"1".into()), Some(RepoStatus::Scanning));

    h.backend
        .put_project(project("1", "payments", vec![scan("7", "1", ScanStatus::Success)]));
    h.publish("/topic/scan-status", &scan_payload(1, 7, "SUCCESS"));
    assert!(matches!(h.next_ack().await, Acknowledgement::ScanCompleted { .. }));

    h.publish("/topic/scan-status", &scan_payload(1, 8, "SUCCESS"));
    assert!(matches!(h.next_ack().await, Acknowledgement::ScanCompleted { .. }));

    let created = h.backend.notifications();
    assert_eq!(created.len(), 1);
    assert_eq!(created[0].notification_type, NotificationType::NewIssue);
    assert_eq!(created[0].related_issue_id, Some("10".into()));

    let store = h.orchestrator.store().clone();
    assert_eq!(store.notifications().len(), 1);
    assert_eq!(h.status.get(&"1".into()), None);
    assert_eq!(
        store.projects().get(&"1".into()).unwrap().status,
        Some(RepoStatus::Active)
    );
}

#[tokio::test(start_paused = true)]
async fn test_concurrent_scan_completions_create_one_notification() {
    let backend = Arc::new(MemoryBackend::new());
    backend.put_project(project("1", "payments", vec![]));
    backend.put_issue(Issue::new("10".into(), "Hardcoded secret", Severity::Blocker).with_project("1".into()));
    let mut h = Harness::new(backend);
    h.start("u1").await;

    let first = codegauge_realtime::ScanEvent {
        project_id: "1".into(),
        scan_id: "7".into(),
        status: ScanStatus::Success,
    };
    let second = codegauge_realtime::ScanEvent {
        scan_id: "8".into(),
        ..first.clone()
    };
    tokio::join!(
        h.orchestrator.handle_scan_event(first),
        h.orchestrator.handle_scan_event(second)
    );

    assert_eq!(h.backend.notifications().len(), 1);
    assert_eq!(h.backend.calls("create_notification"), 1);
}

#[tokio::test(start_paused = true)]
async fn test_terminal_push_is_not_undone_by_stale_detail() {
    let backend = Arc::new(MemoryBackend::new());
    backend.put_project(project("1", "payments", vec![scan("7", "1", ScanStatus::Scanning)]));
    let mut h = Harness::new(backend);
    h.start("u1").await;

    h.publish("/topic/scan-status", &scan_payload(1, 7, "FAILED"));
    assert!(matches!(h.next_ack().await, Acknowledgement::ScanFailed { .. }));

    let store = h.orchestrator.store().clone();
    assert_eq!(store.scans().get(&"7".into()).unwrap().status, ScanStatus::Failed);

    // A late PENDING for the same run is ignored.
    h.publish("/topic/scan-status", &scan_payload(1, 7, "PENDING"));
    h.publish("/topic/scan-status", &scan_payload(1, 9, "PENDING"));
    match h.next_ack().await {
        Acknowledgement::ScanStarted { scan_id, .. } => assert_eq!(scan_id, "9".into()),
        other => panic!("unexpected acknowledgement: {other:?}"),
    }
    assert_eq!(store.scans().get(&"7".into()).unwrap().status, ScanStatus::Failed);
}

// ============================================================================
// Project changes
// ============================================================================

#[tokio::test(start_paused = true)]
async fn test_project_delete_cascades_and_blocks_late_events() {
    let backend = Arc::new(MemoryBackend::new());
    backend.put_project(project(
        "1",
        "payments",
        vec![
            scan("7", "1", ScanStatus::Success),
            scan("8", "1", ScanStatus::Success),
        ],
    ));
    backend.put_project(project("2", "billing", vec![]));
    for id in ["20", "21", "22"] {
        backend.put_issue(Issue::new(id.into(), "direct", Severity::Major).with_project("1".into()));
    }
    backend.put_issue(Issue::new("23".into(), "via scan", Severity::Major).with_scan("8".into()));
    backend.put_issue(Issue::new("24".into(), "other", Severity::Major).with_project("2".into()));
    let mut h = Harness::new(backend);
    h.start("u1").await;

    h.publish(
        "/topic/projects",
        r#"{"action": "UPDATED", "projectId": 1, "projectName": "payments"}"#,
    );
    assert!(matches!(h.next_ack().await, Acknowledgement::ProjectUpdated { .. }));
    assert_eq!(h.orchestrator.store().scans().len(), 2);

    h.publish(
        "/topic/projects",
        r#"{"action": "DELETED", "projectId": 1, "projectName": "payments"}"#,
    );
    assert_eq!(
        h.next_ack().await,
        Acknowledgement::ProjectDeleted {
            project_id: "1".into(),
            name: "payments".to_string(),
            removed: 6,
        }
    );

    let store = h.orchestrator.store().clone();
    assert_eq!(store.projects().snapshot().len(), 1);
    assert!(store.scans().is_empty());
    let remaining: Vec<_> = store.issues().snapshot().into_iter().map(|i| i.id).collect();
    assert_eq!(remaining, vec!["24".into()]);

    h.publish("/topic/scan-status", &scan_payload(1, 99, "PENDING"));
    h.publish("/topic/scan-status", &scan_payload(2, 50, "PENDING"));
    match h.next_ack().await {
        Acknowledgement::ScanStarted { project_id, .. } => assert_eq!(project_id, "2".into()),
        other => panic!("unexpected acknowledgement: {other:?}"),
    }
    assert!(!store.scans().contains(&"99".into()));
    assert_eq!(h.status.get(&"1".into()), None);
}

// ============================================================================
// Reconnect
// ============================================================================

#[tokio::test(start_paused = true)]
async fn test_reconnect_restores_topics_and_reconciles_scans() {
    let backend = Arc::new(MemoryBackend::new());
    backend.put_project(project("1", "payments", vec![]));
    let mut h = Harness::new(backend);
    h.start("u1").await;
    h.orchestrator.watch_issue_comments("5".into()).await.unwrap();
    let before = h.transport.active_topics();
    assert_eq!(before.len(), 7);

    h.publish("/topic/scan-status", &scan_payload(1, 7, "PENDING"));
    assert!(matches!(h.next_ack().await, Acknowledgement::ScanStarted { .. }));

    h.transport.drop_connection();
    h.backend
        .put_project(project("1", "payments", vec![scan("7", "1", ScanStatus::Failed)]));

    assert_eq!(h.next_session().await, 2);
    assert!(matches!(h.next_ack().await, Acknowledgement::ScanFailed { .. }));

    assert_eq!(h.transport.active_topics(), before);
    for topic in &before {
        assert_eq!(h.transport.subscription_count(topic), 1, "{topic}");
    }
    assert_eq!(h.status.get(&"1".into()), None);
    assert_eq!(
        h.orchestrator.store().projects().get(&"1".into()).unwrap().status,
        Some(RepoStatus::Error)
    );
}

// ============================================================================
// Routing edge cases
// ============================================================================

#[tokio::test(start_paused = true)]
async fn test_malformed_payloads_are_dropped() {
    let mut h = Harness::new(Arc::new(MemoryBackend::new()));
    h.start("u1").await;

    h.publish("/topic/notifications/u1", "not json");
    h.publish("/topic/projects", r#"{"action": "EXPLODED", "projectId": 1}"#);
    h.publish(
        "/topic/notifications/global",
        r#"{"id": 1, "type": "SYSTEM", "title": "Maintenance", "message": "Tonight at 22:00"}"#,
    );

    assert_eq!(
        h.next_ack().await,
        Acknowledgement::NewNotification {
            title: "Maintenance".to_string(),
            message: "Tonight at 22:00".to_string(),
            broadcast: true,
        }
    );
    let stats = h.orchestrator.connection().router().stats();
    assert_eq!(stats.dropped, 2);
    assert_eq!(stats.dispatched, 1);
}

#[tokio::test(start_paused = true)]
async fn test_verify_status_on_private_topic() {
    let mut h = Harness::new(Arc::new(MemoryBackend::new()));
    h.start("u1").await;

    h.publish("/topic/user/u1/verify-status", r#"{"status": "VERIFIED"}"#);
    assert_eq!(
        h.next_ack().await,
        Acknowledgement::VerifyStatusChanged {
            status: "VERIFIED".to_string()
        }
    );
    let settings = h.orchestrator.store().user_settings().get(&"u1".into()).unwrap();
    assert_eq!(settings.verify_status.as_deref(), Some("VERIFIED"));
}

// ============================================================================
// Lifecycle
// ============================================================================

#[tokio::test(start_paused = true)]
async fn test_unreachable_backend_still_connects() {
    let backend = Arc::new(MemoryBackend::new());
    backend.set_offline(true);
    let mut h = Harness::new(backend);
    h.start("u1").await;

    assert!(!h.orchestrator.store().projects().is_loaded());
    assert!(h.orchestrator.connection().is_connected());
    assert_eq!(h.transport.active_topics().len(), 6);
}

#[tokio::test(start_paused = true)]
async fn test_shutdown_clears_everything() {
    let backend = Arc::new(MemoryBackend::new());
    backend.put_project(project("1", "payments", vec![]));
    let mut h = Harness::new(backend);
    h.start("u1").await;
    assert!(h.orchestrator.store().projects().is_loaded());

    h.orchestrator.shutdown().await;
    assert!(!h.transport.is_open());
    assert!(!h.orchestrator.store().projects().is_loaded());
    assert!(h.orchestrator.connection().registry().subscriptions().is_empty());
    assert_eq!(h.orchestrator.user(), None);
}

// ============================================================================
// REST over HTTP
// ============================================================================

#[tokio::test]
async fn test_mark_read_rolls_back_when_server_rejects() {
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    let server = MockServer::start().await;
    for route in ["/api/projects", "/api/issues"] {
        Mock::given(method("GET"))
            .and(path(route))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!([])))
            .mount(&server)
            .await;
    }
    Mock::given(method("GET"))
        .and(path("/api/notifications/user/u1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!([
            {"id": 1, "userId": "u1", "type": "SYSTEM", "title": "Hi", "message": "Welcome", "isRead": false}
        ])))
        .mount(&server)
        .await;
    Mock::given(method("PUT"))
        .and(path("/api/notifications/1/read"))
        .respond_with(ResponseTemplate::new(500))
        .expect(1)
        .mount(&server)
        .await;

    let connection = Arc::new(ConnectionManager::new(
        Arc::new(MemoryTransport::new()),
        Arc::new(EventRouter::new()),
        ReconnectPolicy::default(),
    ));
    let orchestrator = SyncOrchestrator::new(
        Arc::new(StateStore::new()),
        Arc::new(HttpBackend::new(server.uri()).unwrap()),
        connection,
        Arc::new(RepoStatusStore::in_memory()),
        128,
    );
    orchestrator.start(Some("u1".into())).await;
    assert_eq!(orchestrator.store().notifications().len(), 1);

    assert!(orchestrator.mark_notification_read(&"1".into()).await.is_err());
    let notification = orchestrator.store().notifications().get(&"1".into()).unwrap();
    assert!(!notification.is_read);

    orchestrator.shutdown().await;
}
