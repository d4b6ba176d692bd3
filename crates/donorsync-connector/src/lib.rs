//! # Provider Adapter Framework
//!
//! Abstractions for pulling donor, donation and project data out of external
//! CRMs and, where the vendor allows it, pushing local records back.
//!
//! ## Architecture
//!
//! - [`CrmAdapter`] - Base trait every provider implements (donor and donation paging)
//! - [`ProjectFetcher`] - Optional project/campaign enumeration
//! - [`CombinedFetcher`] - Optional donor-with-gifts paging
//! - [`BulkUploader`] - Optional push-sync
//! - [`OAuthProvider`] - OAuth lifecycle
//!
//! Optional capabilities are reached through accessor methods on
//! [`CrmAdapter`], so callers can skip a step when the capability is absent.
//!
//! ## Crate Organization
//!
//! - [`error`] - Error types with transient/permanent classification
//! - [`traits`] - Adapter capability traits
//! - [`types`] - Credentials and OAuth tokens
//! - [`mapping`] - Pure vendor-to-canonical field transforms
//! - [`registry`] - Provider registry

pub mod error;
pub mod mapping;
pub mod registry;
pub mod traits;
pub mod types;

pub use error::{ConnectorError, ConnectorResult};
pub use registry::{BoxedAdapter, ProviderRegistry};
pub use traits::{BulkUploader, CombinedFetcher, CrmAdapter, OAuthProvider, ProjectFetcher};
pub use types::{OAuthTokens, ProviderCredentials};

// Re-export async_trait for adapter implementors
pub use async_trait::async_trait;

/// Prelude module for convenient imports.
pub mod prelude {
    pub use crate::error::{ConnectorError, ConnectorResult};
    pub use crate::registry::{BoxedAdapter, ProviderRegistry};
    pub use crate::traits::{
        BulkUploader, CombinedFetcher, CrmAdapter, OAuthProvider, ProjectFetcher,
    };
    pub use crate::types::{OAuthTokens, ProviderCredentials};
    pub use donorsync_core::{
        CanonicalDonation, CanonicalDonor, CanonicalProject, DonorWithDonations, PageRequest,
        PaginatedResponse, ProviderName,
    };
}
