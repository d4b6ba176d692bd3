//! Provider adapter traits
//!
//! Capability-based trait definitions. Every adapter implements
//! [`CrmAdapter`]; optional capabilities are separate traits that an adapter
//! implements only when the vendor supports them, and exposes through the
//! matching accessor on [`CrmAdapter`]. Callers check the accessor instead of
//! probing for methods.

use async_trait::async_trait;

use donorsync_core::{
    CanonicalDonation, CanonicalDonor, CanonicalProject, DonorWithDonations, PageRequest,
    PaginatedResponse, ProviderName,
};

use crate::error::ConnectorResult;
use crate::types::{OAuthTokens, ProviderCredentials};

/// Base trait for all provider adapters.
#[async_trait]
pub trait CrmAdapter: Send + Sync {
    /// Registry key, also the prefix of every scoped external id.
    fn provider_name(&self) -> &ProviderName;

    /// Human readable vendor name (e.g. "Salesforce").
    fn display_name(&self) -> &str;

    /// Fetch one page of donors.
    async fn fetch_donors(
        &self,
        credentials: &ProviderCredentials,
        page: PageRequest,
    ) -> ConnectorResult<PaginatedResponse<CanonicalDonor>>;

    /// Fetch one page of donations.
    async fn fetch_donations(
        &self,
        credentials: &ProviderCredentials,
        page: PageRequest,
    ) -> ConnectorResult<PaginatedResponse<CanonicalDonation>>;

    /// Project enumeration, if supported.
    fn project_fetcher(&self) -> Option<&dyn ProjectFetcher> {
        None
    }

    /// Donor-with-gifts fetching, if supported.
    fn combined_fetcher(&self) -> Option<&dyn CombinedFetcher> {
        None
    }

    /// Push-sync uploads, if supported.
    fn uploader(&self) -> Option<&dyn BulkUploader> {
        None
    }

    /// OAuth lifecycle, if the vendor uses OAuth.
    fn oauth(&self) -> Option<&dyn OAuthProvider> {
        None
    }
}

/// Capability for enumerating projects (campaigns, funds).
#[async_trait]
pub trait ProjectFetcher: CrmAdapter {
    /// Fetch one page of projects.
    async fn fetch_projects(
        &self,
        credentials: &ProviderCredentials,
        page: PageRequest,
    ) -> ConnectorResult<PaginatedResponse<CanonicalProject>>;
}

/// Capability for fetching donors together with their gifts in one page.
#[async_trait]
pub trait CombinedFetcher: CrmAdapter {
    /// Fetch one page of donors, each with its donations.
    async fn fetch_donors_with_donations(
        &self,
        credentials: &ProviderCredentials,
        page: PageRequest,
    ) -> ConnectorResult<PaginatedResponse<DonorWithDonations>>;
}

/// Capability for pushing local records to the vendor.
///
/// Implementations return the input records with `external_id` populated for
/// rows the vendor created. A record whose update target no longer exists is
/// retried once as a create; records that still fail are returned with their
/// original (possibly empty) `external_id` and do not abort the batch.
#[async_trait]
pub trait BulkUploader: CrmAdapter {
    /// Upload donors.
    async fn upload_donors(
        &self,
        credentials: &ProviderCredentials,
        donors: Vec<CanonicalDonor>,
    ) -> ConnectorResult<Vec<CanonicalDonor>>;

    /// Upload donations.
    async fn upload_donations(
        &self,
        credentials: &ProviderCredentials,
        donations: Vec<CanonicalDonation>,
    ) -> ConnectorResult<Vec<CanonicalDonation>>;

    /// Upload projects.
    async fn upload_projects(
        &self,
        credentials: &ProviderCredentials,
        projects: Vec<CanonicalProject>,
    ) -> ConnectorResult<Vec<CanonicalProject>>;
}

/// OAuth lifecycle for vendors that authorize through OAuth 2.0.
#[async_trait]
pub trait OAuthProvider: Send + Sync {
    /// URL the user is redirected to in order to grant access.
    fn authorization_url(&self, state: &str) -> ConnectorResult<String>;

    /// Exchange an authorization code for tokens.
    async fn exchange_auth_code(&self, code: &str) -> ConnectorResult<OAuthTokens>;

    /// Obtain a new access token from a refresh token.
    async fn refresh_access_token(
        &self,
        refresh_token: &str,
        credentials: &ProviderCredentials,
    ) -> ConnectorResult<OAuthTokens>;

    /// Check whether an access token is still accepted.
    async fn validate_token(&self, credentials: &ProviderCredentials) -> ConnectorResult<bool>;
}
