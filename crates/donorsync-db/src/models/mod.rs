//! Row types for the local store.

pub mod donation;
pub mod donor;
pub mod integration;
pub mod project;

pub use donation::{DonationFields, DonationRow, DonationUpdate, NewDonation};
pub use donor::{DonorFields, DonorRow, DonorUpdate, NewDonor};
pub use integration::{merge_metadata, Integration, NewIntegration, SyncState};
pub use project::{NewProject, ProjectFields, ProjectRow, ProjectUpdate, EXTERNAL_BUCKET_NAME};

/// Which record table an operation targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RecordKind {
    Donor,
    Donation,
    Project,
}

impl RecordKind {
    #[must_use]
    pub fn table(&self) -> &'static str {
        match self {
            RecordKind::Donor => "donors",
            RecordKind::Donation => "donations",
            RecordKind::Project => "projects",
        }
    }
}

impl std::fmt::Display for RecordKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.table())
    }
}
