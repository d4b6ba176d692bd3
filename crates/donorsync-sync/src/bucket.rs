//! Fallback project for donations without a mapped campaign.

use std::sync::Arc;
use tokio::sync::OnceCell;
use tracing::debug;

use donorsync_core::{OrganizationId, ProjectId};
use donorsync_db::{RecordStore, EXTERNAL_BUCKET_NAME};

use crate::error::SyncOutcome;

/// Bucket name for a provider, e.g. "External Donations from Salesforce".
#[must_use]
pub fn bucket_name(provider_display_name: &str) -> String {
    let display = provider_display_name.trim();
    if display.is_empty() {
        EXTERNAL_BUCKET_NAME.to_string()
    } else {
        format!("{EXTERNAL_BUCKET_NAME} from {display}")
    }
}

/// Per-run handle to the organization's fallback bucket.
///
/// The bucket is resolved on first use and reused for the rest of the run.
/// Uniqueness across concurrent runs is enforced by the store.
pub struct BucketHandle {
    store: Arc<dyn RecordStore>,
    organization_id: OrganizationId,
    name: String,
    resolved: OnceCell<ProjectId>,
}

impl BucketHandle {
    #[must_use]
    pub fn new(
        store: Arc<dyn RecordStore>,
        organization_id: OrganizationId,
        provider_display_name: &str,
    ) -> Self {
        Self {
            store,
            organization_id,
            name: bucket_name(provider_display_name),
            resolved: OnceCell::new(),
        }
    }

    /// Get or create the bucket.
    pub async fn project_id(&self) -> SyncOutcome<ProjectId> {
        let id = self
            .resolved
            .get_or_try_init(|| async {
                if let Some(existing) = self.store.find_external_bucket(self.organization_id).await?
                {
                    return Ok(existing.project_id());
                }
                let created = self
                    .store
                    .create_external_bucket(self.organization_id, &self.name)
                    .await?;
                debug!(organization_id = %self.organization_id, project_id = %created.id, "Resolved external bucket");
                Ok::<_, crate::error::SyncError>(created.project_id())
            })
            .await?;
        Ok(*id)
    }

    /// Whether the bucket has been resolved during this run.
    #[must_use]
    pub fn is_resolved(&self) -> bool {
        self.resolved.initialized()
    }
}

impl std::fmt::Debug for BucketHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BucketHandle")
            .field("organization_id", &self.organization_id)
            .field("name", &self.name)
            .field("resolved", &self.resolved.get())
            .finish_non_exhaustive()
    }
}
