//! Notification deduplication.
//!
//! A logical event (a new high-severity issue, a failed quality gate) must
//! produce at most one persisted notification, however many times it is
//! reported. The REST notification list is the durable record of what was
//! already notified. A bounded in-memory set of keys claimed this session
//! closes the window between two triggers that both fetched that list before
//! either created anything.

use codegauge_store::StateStore;
use codegauge_types::{
    Issue, IssueId, NewNotification, Notification, NotificationType, Scan, ScanId, UserId,
};
use parking_lot::Mutex;
use std::collections::{HashSet, VecDeque};
use std::fmt;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::backend::Backend;
use crate::error::Result;

/// Default number of claimed keys remembered per session.
pub const DEFAULT_DEDUP_CAPACITY: usize = 4096;

/// Identifies the logical event a notification is about.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum DedupKey {
    /// A new high-severity issue.
    Issue(IssueId),
    /// A failed quality gate on a scan.
    QualityGate(ScanId),
}

impl DedupKey {
    /// The key an existing notification already covers, if any.
    pub fn of(notification: &Notification) -> Option<DedupKey> {
        match notification.notification_type {
            NotificationType::NewIssue => notification.related_issue_id.clone().map(DedupKey::Issue),
            NotificationType::QualityGateFailed => notification
                .related_scan_id
                .clone()
                .map(DedupKey::QualityGate),
            _ => None,
        }
    }
}

impl fmt::Display for DedupKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DedupKey::Issue(id) => write!(f, "issue:{id}"),
            DedupKey::QualityGate(id) => write!(f, "scan:{id}:quality-gate"),
        }
    }
}

/// Insertion-ordered set of claimed keys, trimmed to `capacity`.
///
/// Keys are only forgotten while no generation pass is running. A pass that
/// fetched the REST list before another pass's create landed relies on the
/// claim still being here when it filters its candidates.
#[derive(Debug)]
struct AttemptedSet {
    capacity: usize,
    order: VecDeque<DedupKey>,
    keys: HashSet<DedupKey>,
    active_passes: usize,
}

impl AttemptedSet {
    fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            order: VecDeque::new(),
            keys: HashSet::new(),
            active_passes: 0,
        }
    }

    fn contains(&self, key: &DedupKey) -> bool {
        self.keys.contains(key)
    }

    fn insert(&mut self, key: DedupKey) -> bool {
        if !self.keys.insert(key.clone()) {
            return false;
        }
        self.order.push_back(key);
        self.trim();
        true
    }

    fn remove(&mut self, key: &DedupKey) {
        if self.keys.remove(key) {
            self.order.retain(|k| k != key);
        }
    }

    fn begin_pass(&mut self) {
        self.active_passes += 1;
    }

    fn end_pass(&mut self) {
        self.active_passes = self.active_passes.saturating_sub(1);
        self.trim();
    }

    fn trim(&mut self) {
        if self.active_passes > 0 {
            return;
        }
        while self.order.len() > self.capacity {
            if let Some(oldest) = self.order.pop_front() {
                self.keys.remove(&oldest);
            }
        }
    }

    fn clear(&mut self) {
        self.order.clear();
        self.keys.clear();
    }
}

/// Keeps a generation pass registered until it returns or is dropped.
struct PassGuard<'a>(&'a Mutex<AttemptedSet>);

impl<'a> PassGuard<'a> {
    fn enter(attempted: &'a Mutex<AttemptedSet>) -> Self {
        attempted.lock().begin_pass();
        Self(attempted)
    }
}

impl Drop for PassGuard<'_> {
    fn drop(&mut self) {
        self.0.lock().end_pass();
    }
}

/// Outcome of one generation pass.
#[derive(Debug, Default, Clone)]
pub struct DedupReport {
    /// Notifications created by this pass.
    pub created: Vec<Notification>,
    /// Candidates skipped because they were already notified or claimed.
    pub skipped: usize,
    /// Candidates whose creation failed; they are retried by the next pass.
    pub failed: usize,
}

/// Creates at most one notification per logical event.
pub struct NotificationDeduplicator {
    backend: Arc<dyn Backend>,
    store: Arc<StateStore>,
    attempted: Mutex<AttemptedSet>,
}

impl NotificationDeduplicator {
    /// Create a deduplicator remembering up to `capacity` claimed keys.
    pub fn new(backend: Arc<dyn Backend>, store: Arc<StateStore>, capacity: usize) -> Self {
        Self {
            backend,
            store,
            attempted: Mutex::new(AttemptedSet::new(capacity)),
        }
    }

    /// Notifies `user` about every Critical or Blocker issue not yet notified.
    ///
    /// # Errors
    ///
    /// Fails only if the existing notifications cannot be fetched, in which
    /// case nothing is created.
    pub async fn generate_from_issues(&self, user: &UserId, issues: &[Issue]) -> Result<DedupReport> {
        let candidates = issues
            .iter()
            .filter(|issue| issue.severity.is_notifiable())
            .map(|issue| (DedupKey::Issue(issue.id.clone()), issue_notification(user, issue)));
        self.generate(user, candidates.collect()).await
    }

    /// Notifies `user` about every scan whose quality gate failed and that
    /// was not yet notified.
    ///
    /// # Errors
    ///
    /// Fails only if the existing notifications cannot be fetched.
    pub async fn generate_from_failed_scans(&self, user: &UserId, scans: &[Scan]) -> Result<DedupReport> {
        let candidates = scans
            .iter()
            .filter(|scan| scan.quality_gate_failed())
            .map(|scan| (DedupKey::QualityGate(scan.id.clone()), gate_notification(user, scan)));
        self.generate(user, candidates.collect()).await
    }

    async fn generate(
        &self,
        user: &UserId,
        candidates: Vec<(DedupKey, NewNotification)>,
    ) -> Result<DedupReport> {
        let mut report = DedupReport::default();
        if candidates.is_empty() {
            return Ok(report);
        }

        let _pass = PassGuard::enter(&self.attempted);
        let existing = self.backend.fetch_notifications(user).await?;
        let notified: HashSet<DedupKey> = existing.iter().filter_map(DedupKey::of).collect();

        // Claim every remaining key before the first create is awaited.
        let claimed: Vec<(DedupKey, NewNotification)> = {
            let mut attempted = self.attempted.lock();
            candidates
                .into_iter()
                .filter(|(key, _)| {
                    let fresh = !notified.contains(key) && !attempted.contains(key);
                    if fresh {
                        attempted.insert(key.clone());
                    } else {
                        report.skipped += 1;
                    }
                    fresh
                })
                .collect()
        };

        for (key, request) in claimed {
            match self.backend.create_notification(&request).await {
                Ok(notification) => {
                    debug!(key = %key, id = %notification.id, "Notification created");
                    self.store.notifications().upsert(notification.clone());
                    report.created.push(notification);
                }
                Err(e) => {
                    warn!(key = %key, error = %e, "Failed to create notification");
                    self.attempted.lock().remove(&key);
                    report.failed += 1;
                }
            }
        }

        if !report.created.is_empty() || report.failed > 0 {
            info!(
                user = %user,
                created = report.created.len(),
                skipped = report.skipped,
                failed = report.failed,
                "Notification generation finished"
            );
        }
        Ok(report)
    }

    /// Returns true if `key` was claimed this session.
    pub fn was_attempted(&self, key: &DedupKey) -> bool {
        self.attempted.lock().contains(key)
    }

    /// Forgets every claimed key.
    pub fn reset(&self) {
        self.attempted.lock().clear();
    }
}

impl fmt::Debug for NotificationDeduplicator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NotificationDeduplicator")
            .field("attempted", &self.attempted.lock().keys.len())
            .finish()
    }
}

fn issue_notification(user: &UserId, issue: &Issue) -> NewNotification {
    let mut request = NewNotification::new(
        user.clone(),
        NotificationType::NewIssue,
        format!("New {} issue", issue.severity.label()),
        issue.title.clone(),
    )
    .with_issue(issue.id.clone());
    if let Some(project) = &issue.project_id {
        request = request.with_project(project.clone());
    }
    if let Some(scan) = &issue.scan_id {
        request = request.with_scan(scan.clone());
    }
    request
}

fn gate_notification(user: &UserId, scan: &Scan) -> NewNotification {
    NewNotification::new(
        user.clone(),
        NotificationType::QualityGateFailed,
        NotificationType::QualityGateFailed.label(),
        format!("Scan {} of project {} failed its quality gate", scan.id, scan.project_id),
    )
    .with_project(scan.project_id.clone())
    .with_scan(scan.id.clone())
}
