//! Batch upserter.
//!
//! Persists one page of canonical records with one bulk lookup, one bulk
//! insert and chunked update transactions, classifying every input record as
//! created, updated, unchanged or failed. Per-record problems are recorded
//! in the returned [`PageOutcome`]; only lookup failures abort the page.

use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, trace, warn};

use donorsync_core::{
    CanonicalDonation, CanonicalDonor, CanonicalProject, OrganizationId, ProviderName,
    ScopedExternalId, SyncResult, UpsertOutcome,
};
use donorsync_db::{
    DbResult, DonationFields, DonationUpdate, DonorUpdate, NewDonation, NewDonor, NewProject,
    ProjectUpdate, RecordStore,
};

use crate::bucket::BucketHandle;
use crate::config::SyncConfig;
use crate::diff::{
    changed_donation_columns, changed_donor_columns, changed_project_columns, donor_fields,
    project_fields, stored_currency, stored_designation, stored_instant,
};
use crate::error::SyncOutcome;

/// Outcome of one input record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordOutcome {
    /// Vendor-native id as received.
    pub external_id: String,
    pub outcome: UpsertOutcome,
}

/// Per-record outcomes for one page, in input order, plus their totals.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PageOutcome {
    pub records: Vec<RecordOutcome>,
    pub result: SyncResult,
}

impl PageOutcome {
    /// Outcome of the last input record with this vendor-native id.
    #[must_use]
    pub fn outcome_of(&self, external_id: &str) -> Option<UpsertOutcome> {
        self.records
            .iter()
            .rev()
            .find(|r| r.external_id == external_id)
            .map(|r| r.outcome)
    }
}

/// Outcome slots for a page, filled in as writes complete.
struct Ledger {
    slots: Vec<(String, Option<Result<UpsertOutcome, String>>)>,
}

impl Ledger {
    fn new<'a>(external_ids: impl Iterator<Item = &'a str>) -> Self {
        Self {
            slots: external_ids.map(|id| (id.to_string(), None)).collect(),
        }
    }

    fn set(&mut self, index: usize, outcome: UpsertOutcome) {
        self.slots[index].1 = Some(Ok(outcome));
    }

    fn fail(&mut self, index: usize, message: impl Into<String>) {
        self.slots[index].1 = Some(Err(message.into()));
    }

    fn finish(self) -> PageOutcome {
        let mut page = PageOutcome::default();
        for (external_id, slot) in self.slots {
            let outcome = match slot {
                Some(Ok(outcome)) => {
                    page.result.record(outcome);
                    outcome
                }
                Some(Err(message)) => {
                    page.result.record_failure(external_id.clone(), message);
                    UpsertOutcome::Failed
                }
                None => {
                    page.result
                        .record_failure(external_id.clone(), "record was not processed");
                    UpsertOutcome::Failed
                }
            };
            page.records.push(RecordOutcome {
                external_id,
                outcome,
            });
        }
        page
    }
}

/// Scope every input id and keep the last occurrence of each.
///
/// Earlier duplicates are marked `Unchanged`: they are superseded within the
/// page and never written. Returns `(index, scoped id)` in input order.
fn scope_and_dedupe<'a>(
    ledger: &mut Ledger,
    provider: &ProviderName,
    native_ids: impl Iterator<Item = &'a str>,
) -> Vec<(usize, ScopedExternalId)> {
    let mut latest: HashMap<ScopedExternalId, usize> = HashMap::new();
    for (index, native) in native_ids.enumerate() {
        match ScopedExternalId::new(provider, native) {
            Ok(scoped) => {
                if let Some(previous) = latest.insert(scoped, index) {
                    ledger.set(previous, UpsertOutcome::Unchanged);
                }
            }
            Err(e) => ledger.fail(index, e.to_string()),
        }
    }
    let mut ordered: Vec<(usize, ScopedExternalId)> =
        latest.into_iter().map(|(id, index)| (index, id)).collect();
    ordered.sort_by_key(|(index, _)| *index);
    ordered
}

/// Diffs pages against the local store and writes the differences.
#[derive(Clone)]
pub struct BatchUpserter {
    store: Arc<dyn RecordStore>,
    config: SyncConfig,
}

impl BatchUpserter {
    #[must_use]
    pub fn new(store: Arc<dyn RecordStore>, config: SyncConfig) -> Self {
        Self {
            store,
            config: config.normalized(),
        }
    }

    #[must_use]
    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    /// Upsert a page of donors.
    pub async fn upsert_donors(
        &self,
        org: OrganizationId,
        provider: &ProviderName,
        donors: &[CanonicalDonor],
    ) -> SyncOutcome<PageOutcome> {
        let mut ledger = Ledger::new(donors.iter().map(|d| d.external_id.as_str()));
        let unique = scope_and_dedupe(
            &mut ledger,
            provider,
            donors.iter().map(|d| d.external_id.as_str()),
        );
        if unique.is_empty() {
            return Ok(ledger.finish());
        }

        let ids: Vec<ScopedExternalId> = unique.iter().map(|(_, id)| id.clone()).collect();
        let existing: HashMap<String, _> = self
            .store
            .find_donors_by_external_ids(org, &ids)
            .await?
            .into_iter()
            .filter_map(|row| row.external_id.clone().map(|e| (e, row)))
            .collect();

        let mut inserts = Vec::new();
        let mut updates = Vec::new();
        for (index, scoped) in unique {
            let fields = donor_fields(&donors[index]);
            match existing.get(scoped.as_str()) {
                Some(row) => {
                    let changed = changed_donor_columns(&row.fields(), &fields);
                    if changed.is_empty() {
                        ledger.set(index, UpsertOutcome::Unchanged);
                    } else {
                        trace!(external_id = %scoped, ?changed, "Donor changed");
                        updates.push((
                            index,
                            DonorUpdate {
                                id: row.donor_id(),
                                fields,
                                changed,
                            },
                        ));
                    }
                }
                None => inserts.push((index, NewDonor::new(org, scoped, fields))),
            }
        }

        let store = &self.store;
        self.apply_inserts(&mut ledger, inserts, |rows| {
            Box::pin(async move { store.insert_donors(rows).await.map(|r| r.len()) })
        })
        .await;
        self.apply_updates(&mut ledger, updates, |rows| {
            Box::pin(async move { store.update_donors(rows).await })
        })
        .await;

        let page = ledger.finish();
        debug!(
            organization_id = %org,
            entity = "donors",
            total = page.result.total,
            created = page.result.created,
            updated = page.result.updated,
            unchanged = page.result.unchanged,
            failed = page.result.failed,
            "Upserted page"
        );
        Ok(page)
    }

    /// Upsert a page of projects.
    pub async fn upsert_projects(
        &self,
        org: OrganizationId,
        provider: &ProviderName,
        projects: &[CanonicalProject],
    ) -> SyncOutcome<PageOutcome> {
        let mut ledger = Ledger::new(projects.iter().map(|p| p.external_id.as_str()));
        let unique = scope_and_dedupe(
            &mut ledger,
            provider,
            projects.iter().map(|p| p.external_id.as_str()),
        );
        if unique.is_empty() {
            return Ok(ledger.finish());
        }

        let ids: Vec<ScopedExternalId> = unique.iter().map(|(_, id)| id.clone()).collect();
        let existing: HashMap<String, _> = self
            .store
            .find_projects_by_external_ids(org, &ids)
            .await?
            .into_iter()
            .filter_map(|row| row.external_id.clone().map(|e| (e, row)))
            .collect();

        let mut inserts = Vec::new();
        let mut updates = Vec::new();
        for (index, scoped) in unique {
            let Some(fields) = project_fields(&projects[index]) else {
                ledger.fail(index, "project has no name");
                continue;
            };
            match existing.get(scoped.as_str()) {
                Some(row) => {
                    let changed = changed_project_columns(&row.fields(), &fields);
                    if changed.is_empty() {
                        ledger.set(index, UpsertOutcome::Unchanged);
                    } else {
                        trace!(external_id = %scoped, ?changed, "Project changed");
                        updates.push((
                            index,
                            ProjectUpdate {
                                id: row.project_id(),
                                fields,
                                changed,
                            },
                        ));
                    }
                }
                None => inserts.push((index, NewProject::new(org, scoped, fields))),
            }
        }

        let store = &self.store;
        self.apply_inserts(&mut ledger, inserts, |rows| {
            Box::pin(async move { store.insert_projects(rows).await.map(|r| r.len()) })
        })
        .await;
        self.apply_updates(&mut ledger, updates, |rows| {
            Box::pin(async move { store.update_projects(rows).await })
        })
        .await;

        let page = ledger.finish();
        debug!(
            organization_id = %org,
            entity = "projects",
            total = page.result.total,
            created = page.result.created,
            updated = page.result.updated,
            unchanged = page.result.unchanged,
            failed = page.result.failed,
            "Upserted page"
        );
        Ok(page)
    }

    /// Upsert a page of donations.
    ///
    /// Donors are resolved by scoped id; a donation whose donor is not stored
    /// locally is counted `Failed`. Donations without a resolvable campaign go
    /// to the run's fallback bucket.
    pub async fn upsert_donations(
        &self,
        org: OrganizationId,
        provider: &ProviderName,
        donations: &[CanonicalDonation],
        bucket: &BucketHandle,
    ) -> SyncOutcome<PageOutcome> {
        let mut ledger = Ledger::new(donations.iter().map(|d| d.external_id.as_str()));
        let unique = scope_and_dedupe(
            &mut ledger,
            provider,
            donations.iter().map(|d| d.external_id.as_str()),
        );
        if unique.is_empty() {
            return Ok(ledger.finish());
        }

        // Reference ids, looked up once for the whole page.
        let mut donor_refs = Vec::new();
        let mut campaign_refs = Vec::new();
        for (index, _) in &unique {
            let donation = &donations[*index];
            if let Ok(id) = ScopedExternalId::new(provider, &donation.donor_external_id) {
                donor_refs.push(id);
            }
            if let Some(Ok(id)) = donation
                .campaign_external_id
                .as_deref()
                .map(|c| ScopedExternalId::new(provider, c))
            {
                campaign_refs.push(id);
            }
        }
        donor_refs.sort();
        donor_refs.dedup();
        campaign_refs.sort();
        campaign_refs.dedup();

        let donors: HashMap<String, _> = self
            .store
            .find_donors_by_external_ids(org, &donor_refs)
            .await?
            .into_iter()
            .filter_map(|row| row.external_id.clone().map(|e| (e, row.donor_id())))
            .collect();
        let projects: HashMap<String, _> = self
            .store
            .find_projects_by_external_ids(org, &campaign_refs)
            .await?
            .into_iter()
            .filter_map(|row| row.external_id.clone().map(|e| (e, row.project_id())))
            .collect();
        let ids: Vec<ScopedExternalId> = unique.iter().map(|(_, id)| id.clone()).collect();
        let existing: HashMap<String, _> = self
            .store
            .find_donations_by_external_ids(org, &ids)
            .await?
            .into_iter()
            .filter_map(|row| row.external_id.clone().map(|e| (e, row)))
            .collect();

        let mut inserts = Vec::new();
        let mut updates = Vec::new();
        for (index, scoped) in unique {
            let donation = &donations[index];

            let donor_id = match ScopedExternalId::new(provider, &donation.donor_external_id) {
                Ok(donor_ref) => match donors.get(donor_ref.as_str()) {
                    Some(id) => *id,
                    None => {
                        ledger.fail(
                            index,
                            format!("donor not found for external id {donor_ref}"),
                        );
                        continue;
                    }
                },
                Err(_) => {
                    ledger.fail(index, "donation has no donor reference");
                    continue;
                }
            };

            let mapped_project = donation
                .campaign_external_id
                .as_deref()
                .and_then(|c| ScopedExternalId::new(provider, c).ok())
                .and_then(|c| projects.get(c.as_str()).copied());
            let project_id = match mapped_project {
                Some(id) => id,
                None => bucket.project_id().await?,
            };

            let fields = DonationFields {
                donor_id,
                project_id,
                amount: donation.amount,
                currency: stored_currency(&donation.currency, &self.config.default_currency),
                date: stored_instant(donation.date),
                designation: stored_designation(donation.designation.as_deref()),
            };

            match existing.get(scoped.as_str()) {
                Some(row) => {
                    let changed = changed_donation_columns(&row.fields(), &fields);
                    if changed.is_empty() {
                        ledger.set(index, UpsertOutcome::Unchanged);
                    } else {
                        trace!(external_id = %scoped, ?changed, "Donation changed");
                        updates.push((
                            index,
                            DonationUpdate {
                                id: row.donation_id(),
                                fields,
                                changed,
                            },
                        ));
                    }
                }
                None => inserts.push((index, NewDonation::new(org, scoped, fields))),
            }
        }

        let store = &self.store;
        self.apply_inserts(&mut ledger, inserts, |rows| {
            Box::pin(async move { store.insert_donations(rows).await.map(|r| r.len()) })
        })
        .await;
        self.apply_updates(&mut ledger, updates, |rows| {
            Box::pin(async move { store.update_donations(rows).await })
        })
        .await;

        let page = ledger.finish();
        debug!(
            organization_id = %org,
            entity = "donations",
            total = page.result.total,
            created = page.result.created,
            updated = page.result.updated,
            unchanged = page.result.unchanged,
            failed = page.result.failed,
            "Upserted page"
        );
        Ok(page)
    }

    /// Bulk insert in chunks of `insert_chunk_size`.
    ///
    /// A failed chunk is retried row by row so one bad row cannot fail its
    /// neighbours.
    async fn apply_inserts<'a, N, F>(&self, ledger: &mut Ledger, rows: Vec<(usize, N)>, insert: F)
    where
        N: Clone + Send,
        F: Fn(Vec<N>) -> BoxFuture<'a, DbResult<usize>>,
    {
        for chunk in rows.chunks(self.config.insert_chunk_size) {
            let batch: Vec<N> = chunk.iter().map(|(_, row)| row.clone()).collect();
            match insert(batch).await {
                Ok(_) => {
                    for (index, _) in chunk {
                        ledger.set(*index, UpsertOutcome::Created);
                    }
                }
                Err(e) if chunk.len() == 1 => {
                    ledger.fail(chunk[0].0, format!("insert failed: {e}"));
                }
                Err(e) => {
                    warn!(rows = chunk.len(), error = %e, "Bulk insert failed; retrying rows individually");
                    for (index, row) in chunk {
                        match insert(vec![row.clone()]).await {
                            Ok(_) => ledger.set(*index, UpsertOutcome::Created),
                            Err(e) => ledger.fail(*index, format!("insert failed: {e}")),
                        }
                    }
                }
            }
        }
    }

    /// Updates in chunks of `update_chunk_size`, one transaction each.
    ///
    /// A failed chunk marks all of its records failed; later chunks still run.
    async fn apply_updates<'a, U, F>(&self, ledger: &mut Ledger, rows: Vec<(usize, U)>, update: F)
    where
        U: Send,
        F: Fn(Vec<U>) -> BoxFuture<'a, DbResult<u64>>,
    {
        let mut pending = rows.into_iter();
        loop {
            let chunk: Vec<(usize, U)> = pending
                .by_ref()
                .take(self.config.update_chunk_size)
                .collect();
            if chunk.is_empty() {
                break;
            }
            let (indices, batch): (Vec<usize>, Vec<U>) = chunk.into_iter().unzip();
            match update(batch).await {
                Ok(_) => {
                    for index in indices {
                        ledger.set(index, UpsertOutcome::Updated);
                    }
                }
                Err(e) => {
                    warn!(rows = indices.len(), error = %e, "Update chunk rolled back");
                    let message = format!("update failed: {e}");
                    for index in indices {
                        ledger.fail(index, message.clone());
                    }
                }
            }
        }
    }
}

impl std::fmt::Debug for BatchUpserter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BatchUpserter")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn provider() -> ProviderName {
        ProviderName::new("crm").unwrap()
    }

    #[test]
    fn test_scope_and_dedupe_keeps_last_occurrence() {
        let mut ledger = Ledger::new(["A", "B", "A", ""].into_iter());
        let unique = scope_and_dedupe(&mut ledger, &provider(), ["A", "B", "A", ""].into_iter());

        let indices: Vec<usize> = unique.iter().map(|(i, _)| *i).collect();
        assert_eq!(indices, vec![1, 2]);
        ledger.set(1, UpsertOutcome::Created);
        ledger.set(2, UpsertOutcome::Created);

        let page = ledger.finish();
        assert_eq!(page.records[0].outcome, UpsertOutcome::Unchanged);
        assert_eq!(page.records[3].outcome, UpsertOutcome::Failed);
        assert_eq!(page.result.total, 4);
        assert!(page.result.is_balanced());
        assert_eq!(page.outcome_of("A"), Some(UpsertOutcome::Created));
    }

    #[test]
    fn test_unprocessed_slots_are_failures() {
        let ledger = Ledger::new(["A"].into_iter());
        let page = ledger.finish();
        assert_eq!(page.result.failed, 1);
        assert_eq!(page.result.errors[0].external_id, "A");
    }
}
