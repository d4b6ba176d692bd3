//! In-memory store for engine tests.
//!
//! Honors the [`RecordStore`] / [`IntegrationStore`] contract, including the
//! `(organization, external_id)` and external-bucket uniqueness rules, and
//! exposes counters and failure switches so tests can observe how the engine
//! batches its writes.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::RwLock;
use uuid::Uuid;

use donorsync_connector::OAuthTokens;
use donorsync_core::{
    DonorId, IntegrationId, OrganizationId, ProjectId, ProviderName, ScopedExternalId, SyncRunId,
};

use crate::error::{DbError, DbResult};
use crate::models::{
    merge_metadata, DonationRow, DonationUpdate, DonorRow, DonorUpdate, Integration, NewDonation,
    NewDonor, NewIntegration, NewProject, ProjectRow, ProjectUpdate, RecordKind, SyncState,
};
use crate::store::{IntegrationStore, RecordStore, STALE_SYNC_MESSAGE};

#[derive(Debug, Default)]
struct State {
    donors: HashMap<Uuid, DonorRow>,
    projects: HashMap<Uuid, ProjectRow>,
    donations: HashMap<Uuid, DonationRow>,
    integrations: HashMap<Uuid, Integration>,
    rejected_external_ids: HashSet<String>,
    fail_update_calls: HashSet<u64>,
}

/// Counters observed by tests.
#[derive(Debug, Default)]
struct Counters {
    insert_statements: AtomicU64,
    update_transactions: AtomicU64,
    update_calls: AtomicU64,
    lookups: AtomicU64,
}

/// In-memory implementation of both store traits.
#[derive(Debug, Default, Clone)]
pub struct MemoryStore {
    state: Arc<RwLock<State>>,
    counters: Arc<Counters>,
}

fn has_conflict<'a>(
    existing: impl Iterator<Item = (Uuid, Option<&'a str>)>,
    org: Uuid,
    external_ids: &[&str],
) -> Option<String> {
    let taken: HashSet<(Uuid, &str)> = existing
        .filter_map(|(o, e)| e.map(|e| (o, e)))
        .collect();
    let mut seen = HashSet::new();
    external_ids
        .iter()
        .find(|id| taken.contains(&(org, **id)) || !seen.insert(**id))
        .map(|id| format!("duplicate key value violates unique constraint: external_id {id}"))
}

fn held_by(row: &Integration, run: SyncRunId) -> bool {
    row.sync_status == SyncState::Syncing && row.sync_run_id == Some(run.into_uuid())
}

/// Drop the run's hold and record the final status.
fn release(row: &mut Integration, status: SyncState, error: Option<&str>) {
    row.sync_status = status;
    row.sync_error = error.map(str::to_string);
    row.sync_run_id = None;
    row.sync_heartbeat_at = None;
    row.updated_at = Utc::now();
}

impl MemoryStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    // ------------------------------------------------------------------
    // Failure injection
    // ------------------------------------------------------------------

    /// Make any insert statement containing `external_id` fail as a
    /// constraint violation.
    pub async fn reject_external_id(&self, external_id: &ScopedExternalId) {
        self.state
            .write()
            .await
            .rejected_external_ids
            .insert(external_id.as_str().to_string());
    }

    /// Make the `n`th update call (1-based, across all record kinds) fail
    /// without applying any of its rows.
    pub async fn fail_update_call(&self, n: u64) {
        self.state.write().await.fail_update_calls.insert(n);
    }

    // ------------------------------------------------------------------
    // Observation
    // ------------------------------------------------------------------

    /// Number of insert statements issued (including failed ones).
    #[must_use]
    pub fn insert_statements(&self) -> u64 {
        self.counters.insert_statements.load(Ordering::SeqCst)
    }

    /// Number of committed update transactions.
    #[must_use]
    pub fn update_transactions(&self) -> u64 {
        self.counters.update_transactions.load(Ordering::SeqCst)
    }

    /// Number of bulk lookups by external id.
    #[must_use]
    pub fn lookups(&self) -> u64 {
        self.counters.lookups.load(Ordering::SeqCst)
    }

    pub fn reset_counters(&self) {
        self.counters.insert_statements.store(0, Ordering::SeqCst);
        self.counters.update_transactions.store(0, Ordering::SeqCst);
        self.counters.update_calls.store(0, Ordering::SeqCst);
        self.counters.lookups.store(0, Ordering::SeqCst);
    }

    pub async fn donors(&self, org: OrganizationId) -> Vec<DonorRow> {
        let state = self.state.read().await;
        let mut rows: Vec<DonorRow> = state
            .donors
            .values()
            .filter(|d| d.organization_id == org.into_uuid())
            .cloned()
            .collect();
        rows.sort_by(|a, b| a.external_id.cmp(&b.external_id));
        rows
    }

    pub async fn projects(&self, org: OrganizationId) -> Vec<ProjectRow> {
        let state = self.state.read().await;
        let mut rows: Vec<ProjectRow> = state
            .projects
            .values()
            .filter(|p| p.organization_id == org.into_uuid())
            .cloned()
            .collect();
        rows.sort_by(|a, b| a.external_id.cmp(&b.external_id));
        rows
    }

    pub async fn donations(&self, org: OrganizationId) -> Vec<DonationRow> {
        let state = self.state.read().await;
        let mut rows: Vec<DonationRow> = state
            .donations
            .values()
            .filter(|d| d.organization_id == org.into_uuid())
            .cloned()
            .collect();
        rows.sort_by(|a, b| a.external_id.cmp(&b.external_id));
        rows
    }

    pub async fn donor_by_external_id(&self, external_id: &ScopedExternalId) -> Option<DonorRow> {
        let state = self.state.read().await;
        state
            .donors
            .values()
            .find(|d| d.external_id.as_deref() == Some(external_id.as_str()))
            .cloned()
    }

    /// Seed a local-only donor (no external id), as created by the app UI.
    pub async fn seed_local_donor(
        &self,
        org: OrganizationId,
        fields: crate::models::DonorFields,
    ) -> DonorRow {
        let now = Utc::now();
        let mut row = DonorRow {
            id: Uuid::new_v4(),
            organization_id: org.into_uuid(),
            external_id: None,
            first_name: None,
            last_name: None,
            display_name: None,
            email: None,
            phone: None,
            street: None,
            city: None,
            state: None,
            postal_code: None,
            country: None,
            is_couple: false,
            his_first_name: None,
            his_last_name: None,
            her_first_name: None,
            her_last_name: None,
            created_at: now,
            updated_at: now,
        };
        row.apply(fields);
        self.state.write().await.donors.insert(row.id, row.clone());
        row
    }

    /// Seed a local-only project.
    pub async fn seed_local_project(
        &self,
        org: OrganizationId,
        fields: crate::models::ProjectFields,
    ) -> ProjectRow {
        let now = Utc::now();
        let mut row = ProjectRow {
            id: Uuid::new_v4(),
            organization_id: org.into_uuid(),
            external_id: None,
            name: String::new(),
            description: None,
            active: true,
            goal: None,
            tags: Vec::new(),
            external: false,
            created_at: now,
            updated_at: now,
        };
        row.apply(fields);
        self.state.write().await.projects.insert(row.id, row.clone());
        row
    }

    /// Seed a local-only donation.
    pub async fn seed_local_donation(
        &self,
        org: OrganizationId,
        fields: crate::models::DonationFields,
    ) -> DonationRow {
        let now = Utc::now();
        let row = DonationRow {
            id: Uuid::new_v4(),
            organization_id: org.into_uuid(),
            external_id: None,
            donor_id: fields.donor_id.into_uuid(),
            project_id: fields.project_id.into_uuid(),
            amount: fields.amount,
            currency: fields.currency,
            date: fields.date,
            designation: fields.designation,
            created_at: now,
            updated_at: now,
        };
        self.state
            .write()
            .await
            .donations
            .insert(row.id, row.clone());
        row
    }

    /// Force an integration's status, e.g. to simulate a crashed run.
    ///
    /// `Syncing` installs a holder nobody owns, last seen at `at`.
    pub async fn set_sync_state(&self, id: IntegrationId, status: SyncState, at: DateTime<Utc>) {
        if let Some(integration) = self.state.write().await.integrations.get_mut(id.as_uuid()) {
            integration.sync_status = status;
            integration.updated_at = at;
            if status == SyncState::Syncing {
                integration.sync_run_id = Some(Uuid::new_v4());
                integration.sync_heartbeat_at = Some(at);
            } else {
                integration.sync_run_id = None;
                integration.sync_heartbeat_at = None;
            }
        }
    }

    fn check_rejected(state: &State, external_ids: &[&str]) -> DbResult<()> {
        match external_ids
            .iter()
            .find(|id| state.rejected_external_ids.contains(**id))
        {
            Some(id) => Err(DbError::Conflict(format!("rejected external_id {id}"))),
            None => Ok(()),
        }
    }

    /// Count an update call and fail it if requested.
    fn begin_update(&self, state: &State) -> DbResult<()> {
        let call = self.counters.update_calls.fetch_add(1, Ordering::SeqCst) + 1;
        if state.fail_update_calls.contains(&call) {
            return Err(DbError::ValidationFailed(format!(
                "injected failure on update call {call}"
            )));
        }
        Ok(())
    }

    fn commit_update(&self) {
        self.counters
            .update_transactions
            .fetch_add(1, Ordering::SeqCst);
    }
}

#[async_trait]
impl RecordStore for MemoryStore {
    async fn find_donors_by_external_ids(
        &self,
        org: OrganizationId,
        external_ids: &[ScopedExternalId],
    ) -> DbResult<Vec<DonorRow>> {
        self.counters.lookups.fetch_add(1, Ordering::SeqCst);
        let wanted: HashSet<&str> = external_ids.iter().map(ScopedExternalId::as_str).collect();
        let state = self.state.read().await;
        Ok(state
            .donors
            .values()
            .filter(|d| {
                d.organization_id == org.into_uuid()
                    && d.external_id.as_deref().is_some_and(|e| wanted.contains(e))
            })
            .cloned()
            .collect())
    }

    async fn find_donors_by_ids(
        &self,
        org: OrganizationId,
        ids: &[DonorId],
    ) -> DbResult<Vec<DonorRow>> {
        let state = self.state.read().await;
        Ok(ids
            .iter()
            .filter_map(|id| state.donors.get(id.as_uuid()))
            .filter(|d| d.organization_id == org.into_uuid())
            .cloned()
            .collect())
    }

    async fn insert_donors(&self, donors: Vec<NewDonor>) -> DbResult<Vec<DonorRow>> {
        if donors.is_empty() {
            return Ok(Vec::new());
        }
        self.counters
            .insert_statements
            .fetch_add(1, Ordering::SeqCst);
        let mut state = self.state.write().await;
        let external_ids: Vec<&str> = donors.iter().map(|d| d.external_id.as_str()).collect();
        Self::check_rejected(&state, &external_ids)?;
        for org in donors.iter().map(|d| d.organization_id.into_uuid()) {
            if let Some(conflict) = has_conflict(
                state
                    .donors
                    .values()
                    .map(|d| (d.organization_id, d.external_id.as_deref())),
                org,
                &external_ids,
            ) {
                return Err(DbError::Conflict(conflict));
            }
        }

        let now = Utc::now();
        let mut inserted = Vec::with_capacity(donors.len());
        for donor in donors {
            let mut row = DonorRow {
                id: donor.id.into_uuid(),
                organization_id: donor.organization_id.into_uuid(),
                external_id: Some(donor.external_id.into_inner()),
                first_name: None,
                last_name: None,
                display_name: None,
                email: None,
                phone: None,
                street: None,
                city: None,
                state: None,
                postal_code: None,
                country: None,
                is_couple: false,
                his_first_name: None,
                his_last_name: None,
                her_first_name: None,
                her_last_name: None,
                created_at: now,
                updated_at: now,
            };
            row.apply(donor.fields);
            state.donors.insert(row.id, row.clone());
            inserted.push(row);
        }
        Ok(inserted)
    }

    async fn update_donors(&self, updates: Vec<DonorUpdate>) -> DbResult<u64> {
        if updates.is_empty() {
            return Ok(0);
        }
        let mut state = self.state.write().await;
        self.begin_update(&state)?;
        let now = Utc::now();
        let mut written = 0;
        for update in updates {
            if let Some(row) = state.donors.get_mut(update.id.as_uuid()) {
                row.apply_changed(update.fields, &update.changed);
                row.updated_at = now;
                written += 1;
            }
        }
        self.commit_update();
        Ok(written)
    }

    async fn find_projects_by_external_ids(
        &self,
        org: OrganizationId,
        external_ids: &[ScopedExternalId],
    ) -> DbResult<Vec<ProjectRow>> {
        self.counters.lookups.fetch_add(1, Ordering::SeqCst);
        let wanted: HashSet<&str> = external_ids.iter().map(ScopedExternalId::as_str).collect();
        let state = self.state.read().await;
        Ok(state
            .projects
            .values()
            .filter(|p| {
                p.organization_id == org.into_uuid()
                    && p.external_id.as_deref().is_some_and(|e| wanted.contains(e))
            })
            .cloned()
            .collect())
    }

    async fn find_projects_by_ids(
        &self,
        org: OrganizationId,
        ids: &[ProjectId],
    ) -> DbResult<Vec<ProjectRow>> {
        let state = self.state.read().await;
        Ok(ids
            .iter()
            .filter_map(|id| state.projects.get(id.as_uuid()))
            .filter(|p| p.organization_id == org.into_uuid())
            .cloned()
            .collect())
    }

    async fn insert_projects(&self, projects: Vec<NewProject>) -> DbResult<Vec<ProjectRow>> {
        if projects.is_empty() {
            return Ok(Vec::new());
        }
        self.counters
            .insert_statements
            .fetch_add(1, Ordering::SeqCst);
        let mut state = self.state.write().await;
        let external_ids: Vec<&str> = projects.iter().map(|p| p.external_id.as_str()).collect();
        Self::check_rejected(&state, &external_ids)?;
        for org in projects.iter().map(|p| p.organization_id.into_uuid()) {
            if let Some(conflict) = has_conflict(
                state
                    .projects
                    .values()
                    .map(|p| (p.organization_id, p.external_id.as_deref())),
                org,
                &external_ids,
            ) {
                return Err(DbError::Conflict(conflict));
            }
        }

        let now = Utc::now();
        let mut inserted = Vec::with_capacity(projects.len());
        for project in projects {
            let row = ProjectRow {
                id: project.id.into_uuid(),
                organization_id: project.organization_id.into_uuid(),
                external_id: Some(project.external_id.into_inner()),
                name: project.fields.name,
                description: project.fields.description,
                active: project.fields.active,
                goal: project.fields.goal,
                tags: project.fields.tags,
                external: false,
                created_at: now,
                updated_at: now,
            };
            state.projects.insert(row.id, row.clone());
            inserted.push(row);
        }
        Ok(inserted)
    }

    async fn update_projects(&self, updates: Vec<ProjectUpdate>) -> DbResult<u64> {
        if updates.is_empty() {
            return Ok(0);
        }
        let mut state = self.state.write().await;
        self.begin_update(&state)?;
        let now = Utc::now();
        let mut written = 0;
        for update in updates {
            if let Some(row) = state.projects.get_mut(update.id.as_uuid()) {
                row.apply_changed(update.fields, &update.changed);
                row.updated_at = now;
                written += 1;
            }
        }
        self.commit_update();
        Ok(written)
    }

    async fn find_external_bucket(&self, org: OrganizationId) -> DbResult<Option<ProjectRow>> {
        let state = self.state.read().await;
        Ok(state
            .projects
            .values()
            .find(|p| p.organization_id == org.into_uuid() && p.external)
            .cloned())
    }

    async fn create_external_bucket(
        &self,
        org: OrganizationId,
        name: &str,
    ) -> DbResult<ProjectRow> {
        let mut state = self.state.write().await;
        if let Some(existing) = state
            .projects
            .values()
            .find(|p| p.organization_id == org.into_uuid() && p.external)
        {
            return Ok(existing.clone());
        }
        let now = Utc::now();
        let row = ProjectRow {
            id: Uuid::new_v4(),
            organization_id: org.into_uuid(),
            external_id: None,
            name: name.to_string(),
            description: None,
            active: true,
            goal: None,
            tags: Vec::new(),
            external: true,
            created_at: now,
            updated_at: now,
        };
        state.projects.insert(row.id, row.clone());
        Ok(row)
    }

    async fn find_donations_by_external_ids(
        &self,
        org: OrganizationId,
        external_ids: &[ScopedExternalId],
    ) -> DbResult<Vec<DonationRow>> {
        self.counters.lookups.fetch_add(1, Ordering::SeqCst);
        let wanted: HashSet<&str> = external_ids.iter().map(ScopedExternalId::as_str).collect();
        let state = self.state.read().await;
        Ok(state
            .donations
            .values()
            .filter(|d| {
                d.organization_id == org.into_uuid()
                    && d.external_id.as_deref().is_some_and(|e| wanted.contains(e))
            })
            .cloned()
            .collect())
    }

    async fn insert_donations(&self, donations: Vec<NewDonation>) -> DbResult<Vec<DonationRow>> {
        if donations.is_empty() {
            return Ok(Vec::new());
        }
        self.counters
            .insert_statements
            .fetch_add(1, Ordering::SeqCst);
        let mut state = self.state.write().await;
        let external_ids: Vec<&str> = donations.iter().map(|d| d.external_id.as_str()).collect();
        Self::check_rejected(&state, &external_ids)?;
        for org in donations.iter().map(|d| d.organization_id.into_uuid()) {
            if let Some(conflict) = has_conflict(
                state
                    .donations
                    .values()
                    .map(|d| (d.organization_id, d.external_id.as_deref())),
                org,
                &external_ids,
            ) {
                return Err(DbError::Conflict(conflict));
            }
        }
        // Foreign keys.
        if let Some(missing) = donations.iter().find(|d| {
            !state.donors.contains_key(d.fields.donor_id.as_uuid())
                || !state.projects.contains_key(d.fields.project_id.as_uuid())
        }) {
            return Err(DbError::Conflict(format!(
                "foreign key violation for donation {}",
                missing.external_id
            )));
        }

        let now = Utc::now();
        let mut inserted = Vec::with_capacity(donations.len());
        for donation in donations {
            let row = DonationRow {
                id: donation.id.into_uuid(),
                organization_id: donation.organization_id.into_uuid(),
                external_id: Some(donation.external_id.into_inner()),
                donor_id: donation.fields.donor_id.into_uuid(),
                project_id: donation.fields.project_id.into_uuid(),
                amount: donation.fields.amount,
                currency: donation.fields.currency,
                date: donation.fields.date,
                designation: donation.fields.designation,
                created_at: now,
                updated_at: now,
            };
            state.donations.insert(row.id, row.clone());
            inserted.push(row);
        }
        Ok(inserted)
    }

    async fn update_donations(&self, updates: Vec<DonationUpdate>) -> DbResult<u64> {
        if updates.is_empty() {
            return Ok(0);
        }
        let mut state = self.state.write().await;
        self.begin_update(&state)?;
        let now = Utc::now();
        let mut written = 0;
        for update in updates {
            if let Some(row) = state.donations.get_mut(update.id.as_uuid()) {
                row.apply_changed(update.fields, &update.changed);
                row.updated_at = now;
                written += 1;
            }
        }
        self.commit_update();
        Ok(written)
    }

    async fn list_unpushed_donors(
        &self,
        org: OrganizationId,
        limit: u32,
    ) -> DbResult<Vec<DonorRow>> {
        let state = self.state.read().await;
        let mut rows: Vec<DonorRow> = state
            .donors
            .values()
            .filter(|d| d.organization_id == org.into_uuid() && d.external_id.is_none())
            .cloned()
            .collect();
        rows.sort_by_key(|d| (d.created_at, d.id));
        rows.truncate(limit as usize);
        Ok(rows)
    }

    async fn list_unpushed_projects(
        &self,
        org: OrganizationId,
        limit: u32,
    ) -> DbResult<Vec<ProjectRow>> {
        let state = self.state.read().await;
        let mut rows: Vec<ProjectRow> = state
            .projects
            .values()
            .filter(|p| {
                p.organization_id == org.into_uuid() && p.external_id.is_none() && !p.external
            })
            .cloned()
            .collect();
        rows.sort_by_key(|p| (p.created_at, p.id));
        rows.truncate(limit as usize);
        Ok(rows)
    }

    async fn list_unpushed_donations(
        &self,
        org: OrganizationId,
        limit: u32,
    ) -> DbResult<Vec<DonationRow>> {
        let state = self.state.read().await;
        let mut rows: Vec<DonationRow> = state
            .donations
            .values()
            .filter(|d| d.organization_id == org.into_uuid() && d.external_id.is_none())
            .cloned()
            .collect();
        rows.sort_by_key(|d| (d.created_at, d.id));
        rows.truncate(limit as usize);
        Ok(rows)
    }

    async fn assign_external_ids(
        &self,
        kind: RecordKind,
        assignments: &[(Uuid, ScopedExternalId)],
    ) -> DbResult<u64> {
        let mut state = self.state.write().await;
        let now = Utc::now();
        let mut written = 0;
        for (id, external_id) in assignments {
            let value = Some(external_id.as_str().to_string());
            let slot = match kind {
                RecordKind::Donor => state.donors.get_mut(id).map(|r| {
                    r.updated_at = now;
                    &mut r.external_id
                }),
                RecordKind::Project => state.projects.get_mut(id).map(|r| {
                    r.updated_at = now;
                    &mut r.external_id
                }),
                RecordKind::Donation => state.donations.get_mut(id).map(|r| {
                    r.updated_at = now;
                    &mut r.external_id
                }),
            };
            if let Some(slot) = slot {
                *slot = value;
                written += 1;
            }
        }
        Ok(written)
    }
}

#[async_trait]
impl IntegrationStore for MemoryStore {
    async fn find_active_integration(
        &self,
        org: OrganizationId,
        provider: &ProviderName,
    ) -> DbResult<Option<Integration>> {
        let state = self.state.read().await;
        Ok(state
            .integrations
            .values()
            .find(|i| {
                i.organization_id == org.into_uuid()
                    && i.provider == provider.as_str()
                    && i.is_active
            })
            .cloned())
    }

    async fn get_integration(&self, id: IntegrationId) -> DbResult<Option<Integration>> {
        Ok(self
            .state
            .read()
            .await
            .integrations
            .get(id.as_uuid())
            .cloned())
    }

    async fn list_active_integrations(&self) -> DbResult<Vec<Integration>> {
        let state = self.state.read().await;
        let mut rows: Vec<Integration> = state
            .integrations
            .values()
            .filter(|i| i.is_active)
            .cloned()
            .collect();
        rows.sort_by(|a, b| {
            (a.organization_id, &a.provider).cmp(&(b.organization_id, &b.provider))
        });
        Ok(rows)
    }

    async fn create_integration(&self, integration: NewIntegration) -> DbResult<Integration> {
        let mut state = self.state.write().await;
        let now = Utc::now();
        for existing in state.integrations.values_mut() {
            if existing.organization_id == integration.organization_id.into_uuid()
                && existing.provider == integration.provider.as_str()
                && existing.is_active
            {
                existing.is_active = false;
                existing.updated_at = now;
            }
        }
        let row = Integration {
            id: integration.id.into_uuid(),
            organization_id: integration.organization_id.into_uuid(),
            provider: integration.provider.as_str().to_string(),
            access_token: integration.access_token,
            refresh_token: integration.refresh_token,
            token_expires_at: integration.token_expires_at,
            metadata: integration.metadata,
            sync_status: SyncState::Idle,
            sync_error: None,
            last_sync_at: None,
            sync_run_id: None,
            sync_heartbeat_at: None,
            is_active: true,
            created_at: now,
            updated_at: now,
        };
        state.integrations.insert(row.id, row.clone());
        Ok(row)
    }

    async fn update_tokens(
        &self,
        id: IntegrationId,
        tokens: &OAuthTokens,
    ) -> DbResult<Integration> {
        let mut state = self.state.write().await;
        let row = state
            .integrations
            .get_mut(id.as_uuid())
            .ok_or_else(|| DbError::NotFound(format!("integration {id}")))?;
        row.access_token = tokens.access_token.clone();
        if let Some(refresh) = &tokens.refresh_token {
            row.refresh_token = Some(refresh.clone());
        }
        row.token_expires_at = tokens.expires_at;
        row.metadata = merge_metadata(&row.metadata, &tokens.metadata);
        row.updated_at = Utc::now();
        Ok(row.clone())
    }

    async fn try_begin_sync(&self, id: IntegrationId, run: SyncRunId) -> DbResult<bool> {
        let mut state = self.state.write().await;
        match state.integrations.get_mut(id.as_uuid()) {
            Some(row) if row.is_active && row.sync_status != SyncState::Syncing => {
                let now = Utc::now();
                row.sync_status = SyncState::Syncing;
                row.sync_error = None;
                row.sync_run_id = Some(run.into_uuid());
                row.sync_heartbeat_at = Some(now);
                row.updated_at = now;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn heartbeat_sync(&self, id: IntegrationId, run: SyncRunId) -> DbResult<bool> {
        let mut state = self.state.write().await;
        match state.integrations.get_mut(id.as_uuid()) {
            Some(row) if held_by(row, run) => {
                row.sync_heartbeat_at = Some(Utc::now());
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn complete_sync(
        &self,
        id: IntegrationId,
        run: SyncRunId,
        at: DateTime<Utc>,
    ) -> DbResult<bool> {
        let mut state = self.state.write().await;
        match state.integrations.get_mut(id.as_uuid()) {
            Some(row) if held_by(row, run) => {
                release(row, SyncState::Idle, None);
                row.last_sync_at = Some(at);
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn fail_sync(
        &self,
        id: IntegrationId,
        run: SyncRunId,
        message: &str,
    ) -> DbResult<bool> {
        let mut state = self.state.write().await;
        match state.integrations.get_mut(id.as_uuid()) {
            Some(row) if held_by(row, run) => {
                release(row, SyncState::Error, Some(message));
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn deactivate(&self, id: IntegrationId) -> DbResult<()> {
        if let Some(row) = self.state.write().await.integrations.get_mut(id.as_uuid()) {
            row.is_active = false;
            row.updated_at = Utc::now();
        }
        Ok(())
    }

    async fn release_stale_syncs(&self, older_than: DateTime<Utc>) -> DbResult<u64> {
        let mut state = self.state.write().await;
        let mut released = 0;
        for row in state.integrations.values_mut() {
            let last_seen = row.sync_heartbeat_at.unwrap_or(row.updated_at);
            if row.sync_status == SyncState::Syncing && last_seen < older_than {
                release(row, SyncState::Error, Some(STALE_SYNC_MESSAGE));
                released += 1;
            }
        }
        Ok(released)
    }
}
