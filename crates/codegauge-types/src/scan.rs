//! Scan runs and their status vocabulary.

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;

use crate::{ProjectId, ScanId, Timestamp};

/// Status of a scan run, in the vocabulary the dashboard shows.
///
/// The backend reports `PENDING` while a scan is running; that is surfaced
/// as [`ScanStatus::Scanning`]. Deserialization goes through
/// [`ScanStatus::from_backend`], so REST records and push payloads land in
/// the same vocabulary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ScanStatus {
    /// Scan is queued or running.
    Scanning,
    /// Scan finished successfully.
    Success,
    /// Scan failed.
    Failed,
    /// Status string was not recognized.
    Unknown,
}

impl ScanStatus {
    /// Maps a backend status string onto the dashboard vocabulary.
    ///
    /// Total over all inputs: anything unrecognized becomes
    /// [`ScanStatus::Unknown`].
    pub fn from_backend(raw: &str) -> Self {
        match raw.trim().to_ascii_uppercase().as_str() {
            "PENDING" | "SCANNING" => ScanStatus::Scanning,
            "SUCCESS" => ScanStatus::Success,
            "FAILED" => ScanStatus::Failed,
            _ => ScanStatus::Unknown,
        }
    }

    /// Returns true for statuses after which a scan run never transitions.
    pub fn is_terminal(self) -> bool {
        matches!(self, ScanStatus::Success | ScanStatus::Failed)
    }

    /// Returns the dashboard label.
    pub fn as_str(self) -> &'static str {
        match self {
            ScanStatus::Scanning => "SCANNING",
            ScanStatus::Success => "SUCCESS",
            ScanStatus::Failed => "FAILED",
            ScanStatus::Unknown => "UNKNOWN",
        }
    }
}

impl fmt::Display for ScanStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Serialize for ScanStatus {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for ScanStatus {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        Ok(ScanStatus::from_backend(&raw))
    }
}

/// Outcome of the quality gate evaluated at the end of a scan.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum QualityGateStatus {
    /// Gate passed.
    Passed,
    /// Gate failed.
    Failed,
    /// Any other value.
    #[serde(other)]
    Unknown,
}

/// A single scan run of a project.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Scan {
    /// Scan identifier.
    pub id: ScanId,
    /// Project the scan belongs to.
    pub project_id: ProjectId,
    /// Current status.
    pub status: ScanStatus,
    /// When the scan started.
    #[serde(default)]
    pub started_at: Option<Timestamp>,
    /// When the scan reached a terminal status.
    #[serde(default)]
    pub completed_at: Option<Timestamp>,
    /// Quality gate outcome, once known.
    #[serde(default)]
    pub quality_gate: Option<QualityGateStatus>,
    /// Branch that was scanned.
    #[serde(default)]
    pub branch: Option<String>,
}

impl Scan {
    /// Creates a scan record with only the fields a push event carries.
    pub fn new(id: ScanId, project_id: ProjectId, status: ScanStatus) -> Self {
        Self {
            id,
            project_id,
            status,
            started_at: None,
            completed_at: None,
            quality_gate: None,
            branch: None,
        }
    }

    /// Returns true if the quality gate for this scan failed.
    pub fn quality_gate_failed(&self) -> bool {
        self.quality_gate == Some(QualityGateStatus::Failed)
    }

    fn recency(&self) -> Option<Timestamp> {
        self.completed_at.or(self.started_at)
    }

    /// Merges another representation of the same scan into this one.
    ///
    /// A terminal status is never replaced by a non-terminal one, and a
    /// terminal incoming status always replaces a non-terminal one. Otherwise
    /// the record with the later `completed_at`/`started_at` is authoritative;
    /// a record without timestamps counts as the newer one. Fields of the
    /// authoritative record overwrite, fields of the stale record only fill
    /// gaps.
    pub fn merge_from(&mut self, incoming: Scan) {
        let authoritative = match (self.status.is_terminal(), incoming.status.is_terminal()) {
            (false, true) => true,
            (true, false) => false,
            _ => match (incoming.recency(), self.recency()) {
                (Some(theirs), Some(ours)) => theirs >= ours,
                _ => true,
            },
        };

        if authoritative {
            if incoming.status != ScanStatus::Unknown {
                self.status = incoming.status;
            }
            self.project_id = incoming.project_id;
            overwrite(&mut self.started_at, incoming.started_at);
            overwrite(&mut self.completed_at, incoming.completed_at);
            overwrite(&mut self.quality_gate, incoming.quality_gate);
            overwrite(&mut self.branch, incoming.branch);
        } else {
            if self.status == ScanStatus::Unknown {
                self.status = incoming.status;
            }
            fill(&mut self.started_at, incoming.started_at);
            fill(&mut self.completed_at, incoming.completed_at);
            fill(&mut self.quality_gate, incoming.quality_gate);
            fill(&mut self.branch, incoming.branch);
        }
    }
}

fn overwrite<T>(slot: &mut Option<T>, value: Option<T>) {
    if value.is_some() {
        *slot = value;
    }
}

fn fill<T>(slot: &mut Option<T>, value: Option<T>) {
    if slot.is_none() {
        *slot = value;
    }
}
