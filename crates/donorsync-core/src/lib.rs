//! # donorsync core
//!
//! Canonical data model shared by provider adapters, the local store and the
//! sync engine.
//!
//! # Modules
//!
//! - [`ids`] - Strongly typed identifiers for local rows
//! - [`external_id`] - Provider names and `{provider}_{native}` scoped ids
//! - [`canonical`] - Vendor-agnostic donor, donation and project records
//! - [`pagination`] - Page request/response types
//! - [`result`] - Per-entity sync accounting
//!
//! # Example
//!
//! ```
//! use donorsync_core::{ProviderName, ScopedExternalId};
//!
//! let provider = ProviderName::new("salesforce").unwrap();
//! let id = ScopedExternalId::new(&provider, "0035e00000AbCdE").unwrap();
//! assert_eq!(id.as_str(), "salesforce_0035e00000AbCdE");
//! ```

pub mod canonical;
pub mod external_id;
pub mod ids;
pub mod pagination;
pub mod result;

pub use canonical::{
    Address, CanonicalDonation, CanonicalDonor, CanonicalProject, CoupleNames, DonorWithDonations,
};
pub use external_id::{IdentifierError, ProviderName, ScopedExternalId, EXTERNAL_ID_MAX_LEN};
pub use ids::{
    DonationId, DonorId, IntegrationId, OrganizationId, ParseIdError, ProjectId, SyncRunId,
};
pub use pagination::{PageRequest, PaginatedResponse, DEFAULT_PAGE_SIZE};
pub use result::{AggregatedSyncResult, RecordError, SyncResult, UpsertOutcome};
