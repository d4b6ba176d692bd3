//! Result accounting for sync runs.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Outcome of upserting one record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UpsertOutcome {
    /// No local row existed; one was inserted.
    Created,
    /// A local row existed and at least one mapped column changed.
    Updated,
    /// A local row existed and every mapped column was equal.
    Unchanged,
    /// The record could not be written.
    Failed,
}

impl UpsertOutcome {
    /// Convert to string representation.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            UpsertOutcome::Created => "created",
            UpsertOutcome::Updated => "updated",
            UpsertOutcome::Unchanged => "unchanged",
            UpsertOutcome::Failed => "failed",
        }
    }

    /// Whether a write was performed.
    #[must_use]
    pub fn is_write(&self) -> bool {
        matches!(self, UpsertOutcome::Created | UpsertOutcome::Updated)
    }
}

impl fmt::Display for UpsertOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for UpsertOutcome {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "created" => Ok(UpsertOutcome::Created),
            "updated" => Ok(UpsertOutcome::Updated),
            "unchanged" => Ok(UpsertOutcome::Unchanged),
            "failed" => Ok(UpsertOutcome::Failed),
            _ => Err(format!("Unknown upsert outcome: {s}")),
        }
    }
}

/// A per-record failure.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordError {
    /// Vendor-native id of the offending record.
    pub external_id: String,
    pub error_message: String,
}

/// Counts for one entity type over a sync run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncResult {
    /// Records fetched from the vendor.
    pub total: u64,
    pub created: u64,
    pub updated: u64,
    pub unchanged: u64,
    pub failed: u64,
    pub errors: Vec<RecordError>,
}

impl SyncResult {
    /// Empty result.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Count one record with a non-failure outcome.
    ///
    /// `Failed` should go through [`SyncResult::record_failure`] so the
    /// message is kept; passing it here counts it without a message.
    pub fn record(&mut self, outcome: UpsertOutcome) {
        self.total += 1;
        match outcome {
            UpsertOutcome::Created => self.created += 1,
            UpsertOutcome::Updated => self.updated += 1,
            UpsertOutcome::Unchanged => self.unchanged += 1,
            UpsertOutcome::Failed => self.failed += 1,
        }
    }

    /// Count one failed record and keep its error.
    pub fn record_failure(&mut self, external_id: impl Into<String>, message: impl Into<String>) {
        self.total += 1;
        self.failed += 1;
        self.errors.push(RecordError {
            external_id: external_id.into(),
            error_message: message.into(),
        });
    }

    /// Fold another result into this one.
    pub fn merge(&mut self, other: SyncResult) {
        self.total += other.total;
        self.created += other.created;
        self.updated += other.updated;
        self.unchanged += other.unchanged;
        self.failed += other.failed;
        self.errors.extend(other.errors);
    }

    /// `created + updated + unchanged + failed == total`.
    #[must_use]
    pub fn is_balanced(&self) -> bool {
        self.created + self.updated + self.unchanged + self.failed == self.total
    }
}

/// Per-entity results for one sync run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AggregatedSyncResult {
    pub donors: SyncResult,
    /// `None` when the adapter cannot enumerate projects.
    pub projects: Option<SyncResult>,
    pub donations: SyncResult,
}

impl AggregatedSyncResult {
    /// Failed records across all entity types.
    #[must_use]
    pub fn total_failed(&self) -> u64 {
        self.donors.failed
            + self.donations.failed
            + self.projects.as_ref().map_or(0, |p| p.failed)
    }

    /// Records fetched across all entity types.
    #[must_use]
    pub fn total_records(&self) -> u64 {
        self.donors.total + self.donations.total + self.projects.as_ref().map_or(0, |p| p.total)
    }
}
