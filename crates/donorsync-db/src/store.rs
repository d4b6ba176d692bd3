//! Local store port.
//!
//! The sync engine talks to storage only through these traits. [`crate::PgStore`]
//! is the production implementation; `MemoryStore` (feature `test-utils`)
//! honors the same contract for engine tests.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use donorsync_connector::OAuthTokens;
use donorsync_core::{
    DonorId, IntegrationId, OrganizationId, ProjectId, ProviderName, ScopedExternalId, SyncRunId,
};

use crate::error::DbResult;
use crate::models::{
    DonationRow, DonationUpdate, DonorRow, DonorUpdate, Integration, NewDonation, NewDonor,
    NewIntegration, NewProject, ProjectRow, ProjectUpdate, RecordKind,
};

/// Donor, donation and project rows.
///
/// Bulk writes are all-or-nothing per call: an insert call is one statement,
/// an update call is one transaction.
#[async_trait]
pub trait RecordStore: Send + Sync {
    // ------------------------------------------------------------------
    // Donors
    // ------------------------------------------------------------------

    /// Donors of `org` whose scoped external id is in `external_ids`.
    async fn find_donors_by_external_ids(
        &self,
        org: OrganizationId,
        external_ids: &[ScopedExternalId],
    ) -> DbResult<Vec<DonorRow>>;

    async fn find_donors_by_ids(
        &self,
        org: OrganizationId,
        ids: &[DonorId],
    ) -> DbResult<Vec<DonorRow>>;

    /// Insert donors in one statement.
    async fn insert_donors(&self, donors: Vec<NewDonor>) -> DbResult<Vec<DonorRow>>;

    /// Apply updates in one transaction. Returns the number of rows written.
    async fn update_donors(&self, updates: Vec<DonorUpdate>) -> DbResult<u64>;

    // ------------------------------------------------------------------
    // Projects
    // ------------------------------------------------------------------

    async fn find_projects_by_external_ids(
        &self,
        org: OrganizationId,
        external_ids: &[ScopedExternalId],
    ) -> DbResult<Vec<ProjectRow>>;

    async fn find_projects_by_ids(
        &self,
        org: OrganizationId,
        ids: &[ProjectId],
    ) -> DbResult<Vec<ProjectRow>>;

    async fn insert_projects(&self, projects: Vec<NewProject>) -> DbResult<Vec<ProjectRow>>;

    async fn update_projects(&self, updates: Vec<ProjectUpdate>) -> DbResult<u64>;

    /// The organization's fallback bucket, if one exists.
    async fn find_external_bucket(&self, org: OrganizationId) -> DbResult<Option<ProjectRow>>;

    /// Insert the fallback bucket unless one exists; returns the surviving row.
    ///
    /// Concurrent callers for the same organization all get the same row.
    async fn create_external_bucket(&self, org: OrganizationId, name: &str)
        -> DbResult<ProjectRow>;

    // ------------------------------------------------------------------
    // Donations
    // ------------------------------------------------------------------

    async fn find_donations_by_external_ids(
        &self,
        org: OrganizationId,
        external_ids: &[ScopedExternalId],
    ) -> DbResult<Vec<DonationRow>>;

    async fn insert_donations(&self, donations: Vec<NewDonation>) -> DbResult<Vec<DonationRow>>;

    async fn update_donations(&self, updates: Vec<DonationUpdate>) -> DbResult<u64>;

    // ------------------------------------------------------------------
    // Push sync
    // ------------------------------------------------------------------

    /// Donors created locally and never pushed, oldest first.
    async fn list_unpushed_donors(&self, org: OrganizationId, limit: u32)
        -> DbResult<Vec<DonorRow>>;

    /// Projects never pushed, oldest first. The fallback bucket is excluded.
    async fn list_unpushed_projects(
        &self,
        org: OrganizationId,
        limit: u32,
    ) -> DbResult<Vec<ProjectRow>>;

    async fn list_unpushed_donations(
        &self,
        org: OrganizationId,
        limit: u32,
    ) -> DbResult<Vec<DonationRow>>;

    /// Store vendor-assigned ids on pushed rows. Returns rows written.
    async fn assign_external_ids(
        &self,
        kind: RecordKind,
        assignments: &[(Uuid, ScopedExternalId)],
    ) -> DbResult<u64>;
}

/// Integration records and the sync status state machine.
#[async_trait]
pub trait IntegrationStore: Send + Sync {
    async fn find_active_integration(
        &self,
        org: OrganizationId,
        provider: &ProviderName,
    ) -> DbResult<Option<Integration>>;

    async fn get_integration(&self, id: IntegrationId) -> DbResult<Option<Integration>>;

    async fn list_active_integrations(&self) -> DbResult<Vec<Integration>>;

    /// Create an integration, deactivating any active one for the same
    /// organization and provider.
    async fn create_integration(&self, integration: NewIntegration) -> DbResult<Integration>;

    /// Persist refreshed tokens.
    ///
    /// A `None` refresh token keeps the stored one; token metadata is merged
    /// into the stored metadata.
    async fn update_tokens(&self, id: IntegrationId, tokens: &OAuthTokens)
        -> DbResult<Integration>;

    /// `idle|error -> syncing`, recording `run` as the holder. Returns
    /// `false` if a run already holds the integration (or it is inactive).
    async fn try_begin_sync(&self, id: IntegrationId, run: SyncRunId) -> DbResult<bool>;

    /// Stamp the holder's heartbeat. Returns `false` once `run` no longer
    /// holds the integration.
    async fn heartbeat_sync(&self, id: IntegrationId, run: SyncRunId) -> DbResult<bool>;

    /// `syncing -> idle`, clearing the error and stamping `last_sync_at`.
    ///
    /// Writes nothing and returns `false` if `run` no longer holds the
    /// integration.
    async fn complete_sync(
        &self,
        id: IntegrationId,
        run: SyncRunId,
        at: DateTime<Utc>,
    ) -> DbResult<bool>;

    /// `syncing -> error` with a message; fenced on `run` like
    /// [`IntegrationStore::complete_sync`].
    async fn fail_sync(&self, id: IntegrationId, run: SyncRunId, message: &str)
        -> DbResult<bool>;

    async fn deactivate(&self, id: IntegrationId) -> DbResult<()>;

    /// Move runs whose last heartbeat is older than `older_than` to `error`
    /// and drop their hold.
    ///
    /// Returns the number of integrations released.
    async fn release_stale_syncs(&self, older_than: DateTime<Utc>) -> DbResult<u64>;
}

/// Message stored on integrations released by [`IntegrationStore::release_stale_syncs`].
pub const STALE_SYNC_MESSAGE: &str = "sync interrupted before completion";
