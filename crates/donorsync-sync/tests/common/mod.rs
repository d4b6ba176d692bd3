//! Common test utilities for sync engine tests.
//!
//! A scripted adapter serves fixed pages from memory; storage is the
//! in-memory store from `donorsync-db`, so no database or vendor is needed.

#![allow(dead_code)]

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, Once};
use tokio::sync::Notify;

use donorsync_connector::{
    BulkUploader, CombinedFetcher, ConnectorError, ConnectorResult, CrmAdapter, OAuthProvider,
    OAuthTokens, ProjectFetcher, ProviderCredentials,
};
use donorsync_core::{
    CanonicalDonation, CanonicalDonor, CanonicalProject, DonorWithDonations, IntegrationId,
    OrganizationId, PageRequest, PaginatedResponse, ProviderName,
};
use donorsync_db::{Integration, IntegrationStore, MemoryStore, NewIntegration};
use donorsync_sync::{SyncConfig, SyncOrchestrator};

static INIT: Once = Once::new();

/// Initialize logging for tests (once).
pub fn init_test_logging() {
    INIT.call_once(|| {
        if std::env::var("RUST_LOG").is_ok() {
            tracing_subscriber::fmt()
                .with_test_writer()
                .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
                .try_init()
                .ok();
        }
    });
}

// ============================================================================
// Fixtures
// ============================================================================

pub fn gift_date() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 3, 15, 10, 30, 0).unwrap()
}

pub fn donor(native_id: &str, email: &str) -> CanonicalDonor {
    let mut donor = CanonicalDonor::new(native_id);
    donor.first_name = Some("Ann".to_string());
    donor.last_name = Some(format!("Donor {native_id}"));
    donor.email = Some(email.to_string());
    donor.address.city = Some("Portland".to_string());
    donor
}

pub fn donation(native_id: &str, donor_id: &str, amount: i64) -> CanonicalDonation {
    CanonicalDonation {
        external_id: native_id.to_string(),
        donor_external_id: donor_id.to_string(),
        amount,
        currency: "USD".to_string(),
        date: gift_date(),
        designation: None,
        campaign_external_id: None,
        metadata: serde_json::Value::Null,
    }
}

pub fn project(native_id: &str, name: &str) -> CanonicalProject {
    CanonicalProject {
        external_id: native_id.to_string(),
        name: name.to_string(),
        description: None,
        active: true,
        goal: None,
        tags: vec![],
        metadata: serde_json::Value::Null,
    }
}

// ============================================================================
// Scripted adapter
// ============================================================================

/// Serves page `i` of each entity in order. Page tokens are page indexes.
pub struct ScriptedAdapter {
    name: ProviderName,
    display: String,
    donor_pages: Vec<Vec<CanonicalDonor>>,
    donation_pages: Vec<Vec<CanonicalDonation>>,
    project_pages: Option<Vec<Vec<CanonicalProject>>>,
    combined_pages: Option<Vec<Vec<DonorWithDonations>>>,
    fail_on: Option<(&'static str, usize)>,
    uploads: bool,
    oauth: Option<bool>,
    /// Held by `fetch_donors` until released; see [`ScriptedAdapter::with_gate`].
    gate: Option<(Arc<Notify>, Arc<Notify>)>,
    fetches: Mutex<Vec<(&'static str, Option<String>)>>,
    refresh_calls: AtomicUsize,
    uploaded: Mutex<Vec<(&'static str, usize)>>,
    next_push_id: AtomicUsize,
}

impl ScriptedAdapter {
    pub fn new(name: &str) -> Self {
        Self {
            name: ProviderName::new(name).unwrap(),
            display: "Scripted CRM".to_string(),
            donor_pages: vec![],
            donation_pages: vec![],
            project_pages: None,
            combined_pages: None,
            fail_on: None,
            uploads: false,
            oauth: None,
            gate: None,
            fetches: Mutex::new(vec![]),
            refresh_calls: AtomicUsize::new(0),
            uploaded: Mutex::new(vec![]),
            next_push_id: AtomicUsize::new(1),
        }
    }

    pub fn with_donor_pages(mut self, pages: Vec<Vec<CanonicalDonor>>) -> Self {
        self.donor_pages = pages;
        self
    }

    pub fn with_donation_pages(mut self, pages: Vec<Vec<CanonicalDonation>>) -> Self {
        self.donation_pages = pages;
        self
    }

    pub fn with_project_pages(mut self, pages: Vec<Vec<CanonicalProject>>) -> Self {
        self.project_pages = Some(pages);
        self
    }

    pub fn with_combined_pages(mut self, pages: Vec<Vec<DonorWithDonations>>) -> Self {
        self.combined_pages = Some(pages);
        self
    }

    /// Fail the fetch of `entity` page `page` (0-based) with a 503.
    pub fn failing_on(mut self, entity: &'static str, page: usize) -> Self {
        self.fail_on = Some((entity, page));
        self
    }

    pub fn with_uploader(mut self) -> Self {
        self.uploads = true;
        self
    }

    /// Enable OAuth; `refresh_succeeds` controls the refresh outcome.
    pub fn with_oauth(mut self, refresh_succeeds: bool) -> Self {
        self.oauth = Some(refresh_succeeds);
        self
    }

    /// Block the first donor fetch. Returns `(entered, release)`: `entered`
    /// fires when the fetch starts, `release` lets it continue.
    pub fn with_gate(mut self) -> (Self, Arc<Notify>, Arc<Notify>) {
        let entered = Arc::new(Notify::new());
        let release = Arc::new(Notify::new());
        self.gate = Some((entered.clone(), release.clone()));
        (self, entered, release)
    }

    /// Every fetch as `(entity, page token)`.
    pub fn fetches(&self) -> Vec<(&'static str, Option<String>)> {
        self.fetches.lock().unwrap().clone()
    }

    pub fn fetch_count(&self) -> usize {
        self.fetches.lock().unwrap().len()
    }

    pub fn refresh_calls(&self) -> usize {
        self.refresh_calls.load(Ordering::SeqCst)
    }

    /// Every upload as `(entity, batch size)`.
    pub fn uploads(&self) -> Vec<(&'static str, usize)> {
        self.uploaded.lock().unwrap().clone()
    }

    fn serve<T: Clone>(
        &self,
        entity: &'static str,
        pages: &[Vec<T>],
        request: &PageRequest,
    ) -> ConnectorResult<PaginatedResponse<T>> {
        self.fetches
            .lock()
            .unwrap()
            .push((entity, request.page_token.clone()));
        let index: usize = match request.page_token.as_deref() {
            None => 0,
            Some(token) => token.parse().map_err(|_| ConnectorError::InvalidPageToken {
                message: token.to_string(),
            })?,
        };
        if self.fail_on == Some((entity, index)) {
            return Err(ConnectorError::TargetUnavailable {
                message: format!("503 on {entity} page {index}"),
            });
        }
        let Some(data) = pages.get(index) else {
            return Ok(PaginatedResponse::empty());
        };
        if index + 1 < pages.len() {
            Ok(PaginatedResponse::more(data.clone(), (index + 1).to_string()))
        } else {
            Ok(PaginatedResponse::last(data.clone()))
        }
    }

    fn push_id(&self) -> String {
        format!("PUSH{}", self.next_push_id.fetch_add(1, Ordering::SeqCst))
    }
}

#[async_trait]
impl CrmAdapter for ScriptedAdapter {
    fn provider_name(&self) -> &ProviderName {
        &self.name
    }

    fn display_name(&self) -> &str {
        &self.display
    }

    async fn fetch_donors(
        &self,
        _credentials: &ProviderCredentials,
        page: PageRequest,
    ) -> ConnectorResult<PaginatedResponse<CanonicalDonor>> {
        if let Some((entered, release)) = &self.gate {
            if page.page_token.is_none() {
                entered.notify_one();
                release.notified().await;
            }
        }
        self.serve("donors", &self.donor_pages, &page)
    }

    async fn fetch_donations(
        &self,
        _credentials: &ProviderCredentials,
        page: PageRequest,
    ) -> ConnectorResult<PaginatedResponse<CanonicalDonation>> {
        self.serve("donations", &self.donation_pages, &page)
    }

    fn project_fetcher(&self) -> Option<&dyn ProjectFetcher> {
        self.project_pages.as_ref().map(|_| self as &dyn ProjectFetcher)
    }

    fn combined_fetcher(&self) -> Option<&dyn CombinedFetcher> {
        self.combined_pages
            .as_ref()
            .map(|_| self as &dyn CombinedFetcher)
    }

    fn uploader(&self) -> Option<&dyn BulkUploader> {
        self.uploads.then_some(self as &dyn BulkUploader)
    }

    fn oauth(&self) -> Option<&dyn OAuthProvider> {
        self.oauth.map(|_| self as &dyn OAuthProvider)
    }
}

#[async_trait]
impl ProjectFetcher for ScriptedAdapter {
    async fn fetch_projects(
        &self,
        _credentials: &ProviderCredentials,
        page: PageRequest,
    ) -> ConnectorResult<PaginatedResponse<CanonicalProject>> {
        let pages = self.project_pages.clone().unwrap_or_default();
        self.serve("projects", &pages, &page)
    }
}

#[async_trait]
impl CombinedFetcher for ScriptedAdapter {
    async fn fetch_donors_with_donations(
        &self,
        _credentials: &ProviderCredentials,
        page: PageRequest,
    ) -> ConnectorResult<PaginatedResponse<DonorWithDonations>> {
        let pages = self.combined_pages.clone().unwrap_or_default();
        self.serve("combined", &pages, &page)
    }
}

/// Assigns `PUSH{n}` ids. A donor whose email contains "reject" gets no id,
/// as if the vendor refused it.
#[async_trait]
impl BulkUploader for ScriptedAdapter {
    async fn upload_donors(
        &self,
        _credentials: &ProviderCredentials,
        donors: Vec<CanonicalDonor>,
    ) -> ConnectorResult<Vec<CanonicalDonor>> {
        self.uploaded.lock().unwrap().push(("donors", donors.len()));
        Ok(donors
            .into_iter()
            .map(|mut d| {
                let rejected = d.email.as_deref().is_some_and(|e| e.contains("reject"));
                if !rejected {
                    d.external_id = self.push_id();
                }
                d
            })
            .collect())
    }

    async fn upload_donations(
        &self,
        _credentials: &ProviderCredentials,
        donations: Vec<CanonicalDonation>,
    ) -> ConnectorResult<Vec<CanonicalDonation>> {
        self.uploaded
            .lock()
            .unwrap()
            .push(("donations", donations.len()));
        Ok(donations
            .into_iter()
            .map(|mut d| {
                d.external_id = self.push_id();
                d
            })
            .collect())
    }

    async fn upload_projects(
        &self,
        _credentials: &ProviderCredentials,
        projects: Vec<CanonicalProject>,
    ) -> ConnectorResult<Vec<CanonicalProject>> {
        self.uploaded
            .lock()
            .unwrap()
            .push(("projects", projects.len()));
        Ok(projects
            .into_iter()
            .map(|mut p| {
                p.external_id = self.push_id();
                p
            })
            .collect())
    }
}

#[async_trait]
impl OAuthProvider for ScriptedAdapter {
    fn authorization_url(&self, state: &str) -> ConnectorResult<String> {
        Ok(format!("https://crm.test/authorize?state={state}"))
    }

    async fn exchange_auth_code(&self, code: &str) -> ConnectorResult<OAuthTokens> {
        if code == "bad" {
            return Err(ConnectorError::TokenRequestFailed {
                message: "invalid_grant".to_string(),
            });
        }
        Ok(OAuthTokens {
            access_token: format!("access-{code}"),
            refresh_token: Some(format!("refresh-{code}")),
            expires_at: Some(Utc::now() + chrono::Duration::hours(2)),
            metadata: serde_json::json!({"instance_url": "https://org.crm.test"}),
        })
    }

    async fn refresh_access_token(
        &self,
        refresh_token: &str,
        _credentials: &ProviderCredentials,
    ) -> ConnectorResult<OAuthTokens> {
        self.refresh_calls.fetch_add(1, Ordering::SeqCst);
        if self.oauth != Some(true) {
            return Err(ConnectorError::TokenRequestFailed {
                message: "invalid_grant: expired refresh token".to_string(),
            });
        }
        Ok(OAuthTokens {
            access_token: format!("refreshed-from-{refresh_token}"),
            refresh_token: None,
            expires_at: Some(Utc::now() + chrono::Duration::hours(2)),
            metadata: serde_json::Value::Null,
        })
    }

    async fn validate_token(&self, _credentials: &ProviderCredentials) -> ConnectorResult<bool> {
        Ok(true)
    }
}

// ============================================================================
// Harness
// ============================================================================

/// Store, orchestrator and one connected integration.
pub struct Harness {
    pub store: MemoryStore,
    pub orchestrator: SyncOrchestrator,
    pub org: OrganizationId,
    pub integration: Integration,
}

impl Harness {
    pub async fn new(provider: &str) -> Self {
        Self::with_config(provider, SyncConfig::default()).await
    }

    pub async fn with_config(provider: &str, config: SyncConfig) -> Self {
        init_test_logging();
        let store = MemoryStore::new();
        let org = OrganizationId::new();
        let integration = connect(&store, org, provider, None).await;
        let orchestrator =
            SyncOrchestrator::new(Arc::new(store.clone()), Arc::new(store.clone()), config);
        Self {
            store,
            orchestrator,
            org,
            integration,
        }
    }

    /// Re-read the integration row.
    pub async fn integration(&self) -> Integration {
        self.store
            .get_integration(self.integration.integration_id())
            .await
            .unwrap()
            .unwrap()
    }
}

/// Store an active integration for `provider`.
pub async fn connect(
    store: &MemoryStore,
    org: OrganizationId,
    provider: &str,
    token_expires_at: Option<DateTime<Utc>>,
) -> Integration {
    store
        .create_integration(NewIntegration {
            id: IntegrationId::new(),
            organization_id: org,
            provider: ProviderName::new(provider).unwrap(),
            access_token: "access-token".to_string(),
            refresh_token: Some("refresh-token".to_string()),
            token_expires_at,
            metadata: serde_json::json!({}),
        })
        .await
        .unwrap()
}
