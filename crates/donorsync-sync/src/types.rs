//! Engine-level enums and per-run reports.

use serde::{Deserialize, Serialize};

use donorsync_core::{AggregatedSyncResult, IntegrationId, OrganizationId};

/// Page sequencing for a pull run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncMode {
    /// Donors, then projects, then donations, each paged to completion.
    #[default]
    Separate,
    /// Projects, then donor pages that carry their donations.
    Combined,
}

impl SyncMode {
    /// Convert to string representation.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            SyncMode::Separate => "separate",
            SyncMode::Combined => "combined",
        }
    }
}

impl std::fmt::Display for SyncMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for SyncMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "separate" => Ok(SyncMode::Separate),
            "combined" => Ok(SyncMode::Combined),
            _ => Err(format!("Unknown sync mode: {s}")),
        }
    }
}

/// Entity loop being processed; used in logs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EntityKind {
    Donors,
    Projects,
    Donations,
}

impl EntityKind {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            EntityKind::Donors => "donors",
            EntityKind::Projects => "projects",
            EntityKind::Donations => "donations",
        }
    }
}

impl std::fmt::Display for EntityKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outcome of one integration inside a `sync-all` sweep.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IntegrationRun {
    pub integration_id: IntegrationId,
    pub organization_id: OrganizationId,
    pub provider: String,
    /// Aggregated counts on success.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<AggregatedSyncResult>,
    /// Fatal error message on failure.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl IntegrationRun {
    #[must_use]
    pub fn succeeded(&self) -> bool {
        self.error.is_none()
    }
}
