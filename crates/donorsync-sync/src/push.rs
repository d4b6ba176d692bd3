//! Push sync: upload local records the vendor has never seen.
//!
//! Records without an external id are uploaded in batches through the
//! adapter's [`BulkUploader`]. The vendor returns the batch in input order
//! with native ids filled in; those are scoped and written back so the next
//! pull matches the rows instead of duplicating them.

use std::collections::{HashMap, HashSet};

use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

use donorsync_connector::{BulkUploader, ProviderCredentials};
use donorsync_core::{
    AggregatedSyncResult, CanonicalDonation, CanonicalDonor, CanonicalProject, DonorId,
    OrganizationId, ProjectId, ProviderName, ScopedExternalId, SyncResult, UpsertOutcome,
};
use donorsync_db::{DonationRow, DonorRow, ProjectRow, RecordKind, RecordStore};

use crate::error::{SyncError, SyncOutcome};
use crate::orchestrator::SyncLease;

/// Canonical form of a local donor, ready for upload.
#[must_use]
pub fn donor_to_canonical(row: &DonorRow) -> CanonicalDonor {
    CanonicalDonor {
        first_name: row.first_name.clone(),
        last_name: row.last_name.clone(),
        display_name: row.display_name.clone(),
        email: row.email.clone(),
        phone: row.phone.clone(),
        address: row.address(),
        is_couple: row.is_couple,
        couple: row.couple(),
        ..CanonicalDonor::new(String::new())
    }
}

/// Canonical form of a local project, ready for upload.
#[must_use]
pub fn project_to_canonical(row: &ProjectRow) -> CanonicalProject {
    CanonicalProject {
        external_id: String::new(),
        name: row.name.clone(),
        description: row.description.clone(),
        active: row.active,
        goal: row.goal,
        tags: row.tags.clone(),
        metadata: serde_json::Value::Null,
    }
}

/// Vendor-native id of a stored external id, if it belongs to `provider`.
fn native_for(external_id: Option<&str>, provider: &ProviderName) -> Option<String> {
    let scoped = ScopedExternalId::from_stored(external_id?).ok()?;
    scoped
        .is_from(provider)
        .then(|| scoped.native_id().to_string())
}

/// One push run over a single organization.
pub(crate) struct Pusher<'a> {
    pub store: &'a dyn RecordStore,
    pub uploader: &'a dyn BulkUploader,
    pub credentials: &'a ProviderCredentials,
    pub organization_id: OrganizationId,
    pub provider: &'a ProviderName,
    pub batch_size: u32,
    pub lease: &'a SyncLease<'a>,
    pub cancel: &'a CancellationToken,
}

impl Pusher<'_> {
    /// Donors, then projects, then donations, so donations can reference
    /// the ids assigned earlier in the run.
    pub async fn run(&self, with_projects: bool) -> SyncOutcome<AggregatedSyncResult> {
        let donors = self.push_donors().await?;
        let projects = if with_projects {
            Some(self.push_projects().await?)
        } else {
            None
        };
        let donations = self.push_donations().await?;
        Ok(AggregatedSyncResult {
            donors,
            projects,
            donations,
        })
    }

    /// Gate for the next batch: cancellation, then the heartbeat.
    async fn next_batch(&self) -> SyncOutcome<()> {
        if self.cancel.is_cancelled() {
            return Err(SyncError::Cancelled);
        }
        self.lease.renew().await
    }

    /// Rows already counted as failed are listed again until fixed; skip them.
    fn listing_limit(&self, failed: &HashSet<Uuid>) -> u32 {
        self.batch_size
            .saturating_add(u32::try_from(failed.len()).unwrap_or(u32::MAX))
    }

    async fn push_donors(&self) -> SyncOutcome<SyncResult> {
        let mut result = SyncResult::new();
        let mut failed = HashSet::new();
        loop {
            self.next_batch().await?;
            let rows: Vec<DonorRow> = self
                .store
                .list_unpushed_donors(self.organization_id, self.listing_limit(&failed))
                .await?
                .into_iter()
                .filter(|r| !failed.contains(&r.id))
                .take(self.batch_size as usize)
                .collect();
            if rows.is_empty() {
                break;
            }
            let batch_len = rows.len();
            let ids: Vec<Uuid> = rows.iter().map(|r| r.id).collect();
            let records = rows.iter().map(donor_to_canonical).collect();

            let returned = self
                .uploader
                .upload_donors(self.credentials, records)
                .await?;
            let native: Vec<String> = returned.into_iter().map(|d| d.external_id).collect();
            let assigned = self
                .settle(RecordKind::Donor, &ids, &native, &mut result, &mut failed)
                .await;

            debug!(kind = "donors", sent = batch_len, assigned, "Pushed batch");
            if batch_len < self.batch_size as usize {
                break;
            }
        }
        Ok(result)
    }

    async fn push_projects(&self) -> SyncOutcome<SyncResult> {
        let mut result = SyncResult::new();
        let mut failed = HashSet::new();
        loop {
            self.next_batch().await?;
            let rows: Vec<ProjectRow> = self
                .store
                .list_unpushed_projects(self.organization_id, self.listing_limit(&failed))
                .await?
                .into_iter()
                .filter(|r| !failed.contains(&r.id))
                .take(self.batch_size as usize)
                .collect();
            if rows.is_empty() {
                break;
            }
            let batch_len = rows.len();
            let ids: Vec<Uuid> = rows.iter().map(|r| r.id).collect();
            let records = rows.iter().map(project_to_canonical).collect();

            let returned = self
                .uploader
                .upload_projects(self.credentials, records)
                .await?;
            let native: Vec<String> = returned.into_iter().map(|p| p.external_id).collect();
            let assigned = self
                .settle(RecordKind::Project, &ids, &native, &mut result, &mut failed)
                .await;

            debug!(kind = "projects", sent = batch_len, assigned, "Pushed batch");
            if batch_len < self.batch_size as usize {
                break;
            }
        }
        Ok(result)
    }

    async fn push_donations(&self) -> SyncOutcome<SyncResult> {
        let mut result = SyncResult::new();
        let mut failed = HashSet::new();
        loop {
            self.next_batch().await?;
            let rows: Vec<DonationRow> = self
                .store
                .list_unpushed_donations(self.organization_id, self.listing_limit(&failed))
                .await?
                .into_iter()
                .filter(|r| !failed.contains(&r.id))
                .take(self.batch_size as usize)
                .collect();
            if rows.is_empty() {
                break;
            }
            let batch_len = rows.len();

            let mut donor_ids: Vec<DonorId> =
                rows.iter().map(|r| DonorId::from_uuid(r.donor_id)).collect();
            donor_ids.sort();
            donor_ids.dedup();
            let mut project_ids: Vec<ProjectId> = rows
                .iter()
                .map(|r| ProjectId::from_uuid(r.project_id))
                .collect();
            project_ids.sort();
            project_ids.dedup();

            let donors: HashMap<Uuid, Option<String>> = self
                .store
                .find_donors_by_ids(self.organization_id, &donor_ids)
                .await?
                .into_iter()
                .map(|d| (d.id, native_for(d.external_id.as_deref(), self.provider)))
                .collect();
            let projects: HashMap<Uuid, Option<String>> = self
                .store
                .find_projects_by_ids(self.organization_id, &project_ids)
                .await?
                .into_iter()
                .map(|p| (p.id, native_for(p.external_id.as_deref(), self.provider)))
                .collect();

            let mut ids = Vec::with_capacity(batch_len);
            let mut records = Vec::with_capacity(batch_len);
            for row in &rows {
                let Some(donor_native) = donors.get(&row.donor_id).cloned().flatten() else {
                    result.record_failure(
                        row.id.to_string(),
                        format!("donor {} has not been pushed to {}", row.donor_id, self.provider),
                    );
                    failed.insert(row.id);
                    continue;
                };
                ids.push(row.id);
                records.push(CanonicalDonation {
                    external_id: String::new(),
                    donor_external_id: donor_native,
                    amount: row.amount,
                    currency: row.currency.clone(),
                    date: row.date,
                    designation: row.designation.clone(),
                    campaign_external_id: projects.get(&row.project_id).cloned().flatten(),
                    metadata: serde_json::Value::Null,
                });
            }

            let assigned = if records.is_empty() {
                0
            } else {
                let returned = self
                    .uploader
                    .upload_donations(self.credentials, records)
                    .await?;
                let native: Vec<String> = returned.into_iter().map(|d| d.external_id).collect();
                self.settle(RecordKind::Donation, &ids, &native, &mut result, &mut failed)
                    .await
            };

            debug!(kind = "donations", sent = ids.len(), assigned, "Pushed batch");
            if batch_len < self.batch_size as usize {
                break;
            }
        }
        Ok(result)
    }

    /// Store the vendor ids returned for a batch. Returns how many were
    /// assigned.
    ///
    /// `native[i]` is the vendor id returned for `local[i]`; empty or missing
    /// entries are failures.
    async fn settle(
        &self,
        kind: RecordKind,
        local: &[Uuid],
        native: &[String],
        result: &mut SyncResult,
        failed: &mut HashSet<Uuid>,
    ) -> usize {
        let mut assignments = Vec::with_capacity(local.len());
        for (index, id) in local.iter().enumerate() {
            match native
                .get(index)
                .map(|n| ScopedExternalId::new(self.provider, n))
            {
                Some(Ok(scoped)) => assignments.push((*id, scoped)),
                _ => {
                    result.record_failure(id.to_string(), "vendor did not return an id");
                    failed.insert(*id);
                }
            }
        }
        if assignments.is_empty() {
            return 0;
        }

        match self.store.assign_external_ids(kind, &assignments).await {
            Ok(_) => {
                for _ in &assignments {
                    result.record(UpsertOutcome::Created);
                }
                assignments.len()
            }
            Err(e) => {
                warn!(%kind, error = %e, "Bulk id assignment failed; assigning rows individually");
                let mut assigned = 0;
                for (id, scoped) in assignments {
                    let single = [(id, scoped)];
                    match self.store.assign_external_ids(kind, &single).await {
                        Ok(_) => {
                            result.record(UpsertOutcome::Created);
                            assigned += 1;
                        }
                        Err(e) => {
                            result.record_failure(id.to_string(), format!("id assignment failed: {e}"));
                            failed.insert(id);
                        }
                    }
                }
                assigned
            }
        }
    }
}

/// Log line for a finished push.
pub(crate) fn log_push_summary(organization_id: OrganizationId, result: &AggregatedSyncResult) {
    info!(
        organization_id = %organization_id,
        donors = result.donors.created,
        projects = result.projects.as_ref().map_or(0, |p| p.created),
        donations = result.donations.created,
        failed = result.total_failed(),
        "Push completed"
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    fn provider() -> ProviderName {
        ProviderName::new("salesforce").unwrap()
    }

    #[test]
    fn test_native_for_own_provider_only() {
        assert_eq!(
            native_for(Some("salesforce_003A"), &provider()),
            Some("003A".to_string())
        );
        assert_eq!(native_for(Some("blackbaud_77"), &provider()), None);
        assert_eq!(native_for(None, &provider()), None);
    }

    #[test]
    fn test_project_to_canonical_has_no_external_id() {
        let now = chrono::Utc::now();
        let row = ProjectRow {
            id: Uuid::new_v4(),
            organization_id: Uuid::new_v4(),
            external_id: None,
            name: "Gala".to_string(),
            description: None,
            active: true,
            goal: Some(10_000),
            tags: vec!["event".to_string()],
            external: false,
            created_at: now,
            updated_at: now,
        };
        let canonical = project_to_canonical(&row);
        assert!(canonical.external_id.is_empty());
        assert_eq!(canonical.goal, Some(10_000));
        assert_eq!(canonical.tags, vec!["event"]);
    }
}
