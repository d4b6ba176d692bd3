//! Sync orchestrator.
//!
//! Drives one run for one integration: claims the single-flight guard, pages
//! through the vendor entity by entity, hands each page to the
//! [`BatchUpserter`], and records the final status on the integration row.
//!
//! ## Status transitions
//!
//! ```text
//! idle  ──try_begin_sync──▶ syncing ──complete_sync──▶ idle
//!                            │  ▲ │
//!               heartbeat_sync└──┘ └──────fail_sync──────▶ error
//! ```
//!
//! The claim records a fresh [`SyncRunId`]. Every page boundary renews the
//! heartbeat under that id, and the final status is written only while the
//! id still holds the row. A run whose hold was released by stale-run
//! recovery stops at its next page with [`SyncError::LeaseLost`] and leaves
//! the status to whichever run holds the row now.
//!
//! Pages committed before a fatal error stay committed; the upsert is
//! idempotent, so the next run picks up where the data left off.

use chrono::Utc;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

use donorsync_connector::{ConnectorError, CrmAdapter};
use donorsync_core::{
    AggregatedSyncResult, CanonicalDonation, CanonicalDonor, PageRequest, PaginatedResponse,
    IntegrationId, ProviderName, SyncResult, SyncRunId,
};
use donorsync_db::{Integration, IntegrationStore, RecordStore};

use crate::bucket::BucketHandle;
use crate::config::SyncConfig;
use crate::error::{SyncError, SyncOutcome};
use crate::push::{log_push_summary, Pusher};
use crate::types::{EntityKind, SyncMode};
use crate::upserter::BatchUpserter;

/// Cursor over one entity type's pages.
struct PageCursor {
    kind: EntityKind,
    limit: u32,
    next: Option<PageRequest>,
    pages: u32,
}

impl PageCursor {
    fn new(kind: EntityKind, limit: u32) -> Self {
        Self {
            kind,
            limit,
            next: Some(PageRequest::first(limit)),
            pages: 0,
        }
    }

    /// The next request, or `None` once the vendor reported the last page.
    ///
    /// Cancellation is honored here, before every fetch.
    fn next_request(&mut self, cancel: &CancellationToken) -> SyncOutcome<Option<PageRequest>> {
        if self.next.is_some() && cancel.is_cancelled() {
            warn!(entity = %self.kind, pages = self.pages, "Sync cancelled at page boundary");
            return Err(SyncError::Cancelled);
        }
        Ok(self.next.take())
    }

    /// Record a fetched page and queue the request for the one after it.
    fn advance<T>(
        &mut self,
        sent_token: Option<&str>,
        page: &PaginatedResponse<T>,
    ) -> SyncOutcome<()> {
        self.pages += 1;
        debug!(
            entity = %self.kind,
            page = self.pages,
            records = page.data.len(),
            has_more = page.has_more,
            "Fetched page"
        );
        if !page.has_more {
            return Ok(());
        }
        match page.next_page_token.as_deref() {
            None => Err(ConnectorError::InvalidPageToken {
                message: format!("{} page {} has more data but no next token", self.kind, self.pages),
            }
            .into()),
            Some(token) if Some(token) == sent_token => Err(ConnectorError::InvalidPageToken {
                message: format!("{} page token did not advance", self.kind),
            }
            .into()),
            Some(token) => {
                self.next = Some(PageRequest::after(self.limit, token));
                Ok(())
            }
        }
    }
}

/// A claimed run's hold on its integration row.
pub(crate) struct SyncLease<'a> {
    integrations: &'a dyn IntegrationStore,
    integration_id: IntegrationId,
    run: SyncRunId,
}

impl SyncLease<'_> {
    /// Refresh the heartbeat; fails once the row no longer belongs to this run.
    pub(crate) async fn renew(&self) -> SyncOutcome<()> {
        if self
            .integrations
            .heartbeat_sync(self.integration_id, self.run)
            .await?
        {
            Ok(())
        } else {
            warn!(run_id = %self.run, "Sync hold was released; stopping");
            Err(SyncError::LeaseLost {
                integration_id: self.integration_id,
            })
        }
    }
}

/// Runs pull and push syncs for integrations.
#[derive(Clone)]
pub struct SyncOrchestrator {
    records: Arc<dyn RecordStore>,
    integrations: Arc<dyn IntegrationStore>,
    upserter: BatchUpserter,
    config: SyncConfig,
}

impl SyncOrchestrator {
    #[must_use]
    pub fn new(
        records: Arc<dyn RecordStore>,
        integrations: Arc<dyn IntegrationStore>,
        config: SyncConfig,
    ) -> Self {
        let config = config.normalized();
        let upserter = BatchUpserter::new(records.clone(), config.clone());
        Self {
            records,
            integrations,
            upserter,
            config,
        }
    }

    #[must_use]
    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    #[must_use]
    pub fn upserter(&self) -> &BatchUpserter {
        &self.upserter
    }

    /// Pull everything the vendor has for the integration's organization.
    ///
    /// Rejected with [`SyncError::AlreadySyncing`] when another run holds the
    /// integration, and with [`SyncError::Unsupported`] when combined mode is
    /// requested from an adapter without a combined fetcher. Neither
    /// rejection touches the vendor or the integration status.
    #[instrument(
        skip(self, adapter, integration, cancel),
        fields(
            integration_id = %integration.id,
            organization_id = %integration.organization_id,
            provider = %integration.provider,
            mode = %mode,
        )
    )]
    pub async fn sync_organization_data(
        &self,
        adapter: &dyn CrmAdapter,
        integration: &Integration,
        mode: SyncMode,
        cancel: &CancellationToken,
    ) -> SyncOutcome<AggregatedSyncResult> {
        if mode == SyncMode::Combined && adapter.combined_fetcher().is_none() {
            return Err(SyncError::Unsupported {
                provider: adapter.provider_name().to_string(),
                capability: "combined donor and donation fetching",
            });
        }

        let lease = self.claim(integration).await?;
        info!(run_id = %lease.run, "Sync started");

        let outcome = self.pull(adapter, integration, mode, &lease, cancel).await;
        let outcome = self.finish(&lease, outcome).await;
        if let Ok(result) = &outcome {
            info!(
                donors = result.donors.total,
                projects = result.projects.as_ref().map_or(0, |p| p.total),
                donations = result.donations.total,
                failed = result.total_failed(),
                "Sync completed"
            );
        }
        outcome
    }

    /// Upload local records that have no external id yet.
    ///
    /// Adapters without a [`donorsync_connector::BulkUploader`] are skipped:
    /// the call returns an empty result and the integration is left alone.
    #[instrument(
        skip(self, adapter, integration, cancel),
        fields(
            integration_id = %integration.id,
            organization_id = %integration.organization_id,
            provider = %integration.provider,
        )
    )]
    pub async fn push_organization_data(
        &self,
        adapter: &dyn CrmAdapter,
        integration: &Integration,
        cancel: &CancellationToken,
    ) -> SyncOutcome<AggregatedSyncResult> {
        let Some(uploader) = adapter.uploader() else {
            info!("Adapter cannot upload; push skipped");
            return Ok(AggregatedSyncResult::default());
        };

        let lease = self.claim(integration).await?;
        info!(run_id = %lease.run, "Push started");

        let credentials = integration.credentials();
        let provider = adapter.provider_name();
        let pusher = Pusher {
            store: self.records.as_ref(),
            uploader,
            credentials: &credentials,
            organization_id: integration.org_id(),
            provider,
            batch_size: self.config.push_batch_size,
            lease: &lease,
            cancel,
        };
        let outcome = pusher.run(adapter.project_fetcher().is_some()).await;
        let outcome = self.finish(&lease, outcome).await;
        if let Ok(result) = &outcome {
            log_push_summary(integration.org_id(), result);
        }
        outcome
    }

    async fn claim(&self, integration: &Integration) -> SyncOutcome<SyncLease<'_>> {
        let id = integration.integration_id();
        let run = SyncRunId::new();
        if self.integrations.try_begin_sync(id, run).await? {
            Ok(SyncLease {
                integrations: self.integrations.as_ref(),
                integration_id: id,
                run,
            })
        } else {
            info!("Integration already syncing; request rejected");
            Err(SyncError::AlreadySyncing { integration_id: id })
        }
    }

    /// Persist the run's final status while the run still holds the row.
    ///
    /// A failure to write the `idle` status is returned as the run's error;
    /// the row stays `syncing` until stale-run recovery releases it. A run
    /// that lost its hold writes nothing.
    async fn finish<T>(&self, lease: &SyncLease<'_>, outcome: SyncOutcome<T>) -> SyncOutcome<T> {
        let id = lease.integration_id;
        match outcome {
            Ok(value) => match self
                .integrations
                .complete_sync(id, lease.run, Utc::now())
                .await
            {
                Ok(true) => Ok(value),
                Ok(false) => {
                    warn!(run_id = %lease.run, "Sync hold was released before completion");
                    Err(SyncError::LeaseLost { integration_id: id })
                }
                Err(e) => {
                    error!(error = %e, "Failed to record sync completion");
                    Err(e.into())
                }
            },
            Err(e) => {
                warn!(error = %e, code = e.error_code(), "Sync failed");
                match self.integrations.fail_sync(id, lease.run, &e.to_string()).await {
                    Ok(true) => {}
                    Ok(false) => {
                        debug!(run_id = %lease.run, "Hold already released; failure not recorded");
                    }
                    Err(db) => error!(error = %db, "Failed to record sync failure"),
                }
                Err(e)
            }
        }
    }

    async fn pull(
        &self,
        adapter: &dyn CrmAdapter,
        integration: &Integration,
        mode: SyncMode,
        lease: &SyncLease<'_>,
        cancel: &CancellationToken,
    ) -> SyncOutcome<AggregatedSyncResult> {
        let provider = adapter.provider_name();
        let bucket = BucketHandle::new(
            self.records.clone(),
            integration.org_id(),
            adapter.display_name(),
        );
        let run = PullRun {
            upserter: &self.upserter,
            adapter,
            credentials: integration.credentials(),
            provider,
            organization_id: integration.org_id(),
            page_size: self.config.page_size,
            bucket,
            lease,
            cancel,
        };
        match mode {
            SyncMode::Separate => run.separate().await,
            SyncMode::Combined => run.combined().await,
        }
    }
}

impl std::fmt::Debug for SyncOrchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SyncOrchestrator")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

/// State for one pull run.
struct PullRun<'a> {
    upserter: &'a BatchUpserter,
    adapter: &'a dyn CrmAdapter,
    credentials: donorsync_connector::ProviderCredentials,
    provider: &'a ProviderName,
    organization_id: donorsync_core::OrganizationId,
    page_size: u32,
    bucket: BucketHandle,
    lease: &'a SyncLease<'a>,
    cancel: &'a CancellationToken,
}

impl PullRun<'_> {
    /// Gate for the next fetch: cancellation, then the heartbeat.
    async fn next_page(&self, cursor: &mut PageCursor) -> SyncOutcome<Option<PageRequest>> {
        let request = cursor.next_request(self.cancel)?;
        if request.is_some() {
            self.lease.renew().await?;
        }
        Ok(request)
    }

    /// Donors, then projects when supported, then donations.
    async fn separate(&self) -> SyncOutcome<AggregatedSyncResult> {
        let donors = self.donors().await?;
        let projects = self.projects().await?;
        let donations = self.donations().await?;
        Ok(AggregatedSyncResult {
            donors,
            projects,
            donations,
        })
    }

    /// Projects when supported, then donor pages carrying their donations.
    async fn combined(&self) -> SyncOutcome<AggregatedSyncResult> {
        let Some(fetcher) = self.adapter.combined_fetcher() else {
            return Err(SyncError::Unsupported {
                provider: self.provider.to_string(),
                capability: "combined donor and donation fetching",
            });
        };
        let projects = self.projects().await?;

        let mut donors = SyncResult::new();
        let mut donations = SyncResult::new();
        let mut cursor = PageCursor::new(EntityKind::Donors, self.page_size);
        while let Some(request) = self.next_page(&mut cursor).await? {
            let sent = request.page_token.clone();
            let page = fetcher
                .fetch_donors_with_donations(&self.credentials, request)
                .await?;
            cursor.advance(sent.as_deref(), &page)?;

            let (page_donors, page_donations) = split_combined(page.data);
            let outcome = self
                .upserter
                .upsert_donors(self.organization_id, self.provider, &page_donors)
                .await?;
            donors.merge(outcome.result);
            // One donation batch per page so lookups are shared across donors.
            let outcome = self
                .upserter
                .upsert_donations(self.organization_id, self.provider, &page_donations, &self.bucket)
                .await?;
            donations.merge(outcome.result);
        }

        Ok(AggregatedSyncResult {
            donors,
            projects,
            donations,
        })
    }

    async fn donors(&self) -> SyncOutcome<SyncResult> {
        let mut result = SyncResult::new();
        let mut cursor = PageCursor::new(EntityKind::Donors, self.page_size);
        while let Some(request) = self.next_page(&mut cursor).await? {
            let sent = request.page_token.clone();
            let page = self.adapter.fetch_donors(&self.credentials, request).await?;
            cursor.advance(sent.as_deref(), &page)?;
            let outcome = self
                .upserter
                .upsert_donors(self.organization_id, self.provider, &page.data)
                .await?;
            result.merge(outcome.result);
        }
        Ok(result)
    }

    /// `None` when the adapter cannot enumerate projects.
    async fn projects(&self) -> SyncOutcome<Option<SyncResult>> {
        let Some(fetcher) = self.adapter.project_fetcher() else {
            debug!("Adapter has no project fetcher; skipping projects");
            return Ok(None);
        };
        let mut result = SyncResult::new();
        let mut cursor = PageCursor::new(EntityKind::Projects, self.page_size);
        while let Some(request) = self.next_page(&mut cursor).await? {
            let sent = request.page_token.clone();
            let page = fetcher.fetch_projects(&self.credentials, request).await?;
            cursor.advance(sent.as_deref(), &page)?;
            let outcome = self
                .upserter
                .upsert_projects(self.organization_id, self.provider, &page.data)
                .await?;
            result.merge(outcome.result);
        }
        Ok(Some(result))
    }

    async fn donations(&self) -> SyncOutcome<SyncResult> {
        let mut result = SyncResult::new();
        let mut cursor = PageCursor::new(EntityKind::Donations, self.page_size);
        while let Some(request) = self.next_page(&mut cursor).await? {
            let sent = request.page_token.clone();
            let page = self
                .adapter
                .fetch_donations(&self.credentials, request)
                .await?;
            cursor.advance(sent.as_deref(), &page)?;
            let outcome = self
                .upserter
                .upsert_donations(self.organization_id, self.provider, &page.data, &self.bucket)
                .await?;
            result.merge(outcome.result);
        }
        Ok(result)
    }
}

/// Flatten a combined page. Nested donations without a donor reference
/// belong to the donor they are nested under.
fn split_combined(
    page: Vec<donorsync_core::DonorWithDonations>,
) -> (Vec<CanonicalDonor>, Vec<CanonicalDonation>) {
    let mut donors = Vec::with_capacity(page.len());
    let mut donations = Vec::new();
    for entry in page {
        for mut donation in entry.donations {
            if donation.donor_external_id.trim().is_empty() {
                donation.donor_external_id = entry.donor.external_id.clone();
            }
            donations.push(donation);
        }
        donors.push(entry.donor);
    }
    (donors, donations)
}

#[cfg(test)]
mod tests {
    use super::*;
    use donorsync_core::DonorWithDonations;

    #[test]
    fn test_cursor_follows_tokens() {
        let cancel = CancellationToken::new();
        let mut cursor = PageCursor::new(EntityKind::Donors, 2);

        let first = cursor.next_request(&cancel).unwrap().unwrap();
        assert!(first.page_token.is_none());
        cursor
            .advance(None, &PaginatedResponse::more(vec![1, 2], "p2"))
            .unwrap();

        let second = cursor.next_request(&cancel).unwrap().unwrap();
        assert_eq!(second.page_token.as_deref(), Some("p2"));
        cursor
            .advance(Some("p2"), &PaginatedResponse::last(vec![3]))
            .unwrap();

        assert!(cursor.next_request(&cancel).unwrap().is_none());
        assert_eq!(cursor.pages, 2);
    }

    #[test]
    fn test_cursor_rejects_missing_or_repeated_token() {
        let mut cursor = PageCursor::new(EntityKind::Donations, 10);
        let mut page = PaginatedResponse::more(vec![1], "x");
        page.next_page_token = None;
        assert!(matches!(
            cursor.advance(None, &page),
            Err(SyncError::Connector(ConnectorError::InvalidPageToken { .. }))
        ));

        let mut cursor = PageCursor::new(EntityKind::Donations, 10);
        assert!(cursor
            .advance(Some("x"), &PaginatedResponse::more(vec![1], "x"))
            .is_err());
    }

    #[test]
    fn test_cursor_cancelled_before_fetch() {
        let cancel = CancellationToken::new();
        cancel.cancel();
        let mut cursor = PageCursor::new(EntityKind::Projects, 10);
        assert!(matches!(
            cursor.next_request(&cancel),
            Err(SyncError::Cancelled)
        ));
    }

    #[test]
    fn test_split_combined_fills_donor_reference() {
        let mut nested = CanonicalDonation {
            external_id: "006A".to_string(),
            donor_external_id: String::new(),
            amount: 500,
            currency: "USD".to_string(),
            date: Utc::now(),
            designation: None,
            campaign_external_id: None,
            metadata: serde_json::Value::Null,
        };
        let explicit = CanonicalDonation {
            external_id: "006B".to_string(),
            donor_external_id: "003OTHER".to_string(),
            ..nested.clone()
        };
        nested.amount = 700;
        let page = vec![DonorWithDonations {
            donor: CanonicalDonor::new("003A"),
            donations: vec![nested, explicit],
        }];

        let (donors, donations) = split_combined(page);
        assert_eq!(donors.len(), 1);
        assert_eq!(donations[0].donor_external_id, "003A");
        assert_eq!(donations[1].donor_external_id, "003OTHER");
    }
}
