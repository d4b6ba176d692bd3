//! Integration manager.
//!
//! Entry point for schedulers and admin actions. Resolves the active
//! integration and its adapter, refreshes the access token when it is about
//! to expire, then hands off to the [`SyncOrchestrator`].

use chrono::Utc;
use futures::stream::{self, StreamExt};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{info, instrument, warn};

use donorsync_connector::{BoxedAdapter, ProviderRegistry};
use donorsync_core::{AggregatedSyncResult, IntegrationId, OrganizationId, ProviderName};
use donorsync_db::{merge_metadata, Integration, IntegrationStore, NewIntegration};

use crate::config::SyncConfig;
use crate::error::{SyncError, SyncOutcome};
use crate::orchestrator::SyncOrchestrator;
use crate::types::{IntegrationRun, SyncMode};

/// Coordinates integrations, adapters and runs.
#[derive(Clone)]
pub struct IntegrationManager {
    registry: Arc<ProviderRegistry>,
    integrations: Arc<dyn IntegrationStore>,
    orchestrator: SyncOrchestrator,
    config: SyncConfig,
}

impl IntegrationManager {
    #[must_use]
    pub fn new(
        registry: Arc<ProviderRegistry>,
        integrations: Arc<dyn IntegrationStore>,
        orchestrator: SyncOrchestrator,
        config: SyncConfig,
    ) -> Self {
        Self {
            registry,
            integrations,
            orchestrator,
            config: config.normalized(),
        }
    }

    #[must_use]
    pub fn registry(&self) -> &ProviderRegistry {
        &self.registry
    }

    /// Pull sync for one organization and provider.
    #[instrument(skip(self, cancel), fields(organization_id = %org, provider = %provider))]
    pub async fn sync_now(
        &self,
        org: OrganizationId,
        provider: &ProviderName,
        mode: SyncMode,
        cancel: &CancellationToken,
    ) -> SyncOutcome<AggregatedSyncResult> {
        let (adapter, integration) = self.prepare(org, provider).await?;
        self.orchestrator
            .sync_organization_data(adapter.as_ref(), &integration, mode, cancel)
            .await
    }

    /// Push sync for one organization and provider.
    #[instrument(skip(self, cancel), fields(organization_id = %org, provider = %provider))]
    pub async fn push_now(
        &self,
        org: OrganizationId,
        provider: &ProviderName,
        cancel: &CancellationToken,
    ) -> SyncOutcome<AggregatedSyncResult> {
        let (adapter, integration) = self.prepare(org, provider).await?;
        self.orchestrator
            .push_organization_data(adapter.as_ref(), &integration, cancel)
            .await
    }

    /// Pull sync for every active integration.
    ///
    /// Stale runs are released first. Up to `max_concurrent_runs` integrations
    /// run at once; one integration failing does not affect the others.
    pub async fn sync_all(
        &self,
        mode: SyncMode,
        cancel: &CancellationToken,
    ) -> SyncOutcome<Vec<IntegrationRun>> {
        self.recover_stale_syncs().await?;
        let integrations = self.integrations.list_active_integrations().await?;
        info!(
            integrations = integrations.len(),
            concurrency = self.config.max_concurrent_runs,
            mode = %mode,
            "Starting sync sweep"
        );

        let runs: Vec<IntegrationRun> = stream::iter(integrations)
            .map(|integration| self.run_integration(integration, mode, cancel))
            .buffer_unordered(self.config.max_concurrent_runs)
            .collect()
            .await;

        let failed = runs.iter().filter(|r| !r.succeeded()).count();
        info!(runs = runs.len(), failed, "Sync sweep finished");
        Ok(runs)
    }

    /// Mark runs stuck in `syncing` for longer than `stale_sync_after` as
    /// failed so they can be retried.
    pub async fn recover_stale_syncs(&self) -> SyncOutcome<u64> {
        let cutoff = Utc::now() - self.config.stale_sync_after();
        let released = self.integrations.release_stale_syncs(cutoff).await?;
        if released > 0 {
            warn!(released, "Released stale sync runs");
        }
        Ok(released)
    }

    /// URL to send the user to when connecting a provider.
    pub fn authorization_url(&self, provider: &ProviderName, state: &str) -> SyncOutcome<String> {
        let adapter = self.adapter(provider)?;
        let oauth = adapter.oauth().ok_or_else(|| SyncError::Unsupported {
            provider: provider.to_string(),
            capability: "OAuth authorization",
        })?;
        Ok(oauth.authorization_url(state)?)
    }

    /// Exchange an authorization code and store the integration.
    ///
    /// Replaces any active integration for the same organization and provider.
    #[instrument(skip(self, code, metadata), fields(organization_id = %org, provider = %provider))]
    pub async fn connect(
        &self,
        org: OrganizationId,
        provider: &ProviderName,
        code: &str,
        metadata: serde_json::Value,
    ) -> SyncOutcome<Integration> {
        let adapter = self.adapter(provider)?;
        let oauth = adapter.oauth().ok_or_else(|| SyncError::Unsupported {
            provider: provider.to_string(),
            capability: "OAuth authorization",
        })?;
        let tokens = oauth.exchange_auth_code(code).await?;

        let integration = self
            .integrations
            .create_integration(NewIntegration {
                id: IntegrationId::new(),
                organization_id: org,
                provider: provider.clone(),
                access_token: tokens.access_token,
                refresh_token: tokens.refresh_token,
                token_expires_at: tokens.expires_at,
                metadata: merge_metadata(&metadata, &tokens.metadata),
            })
            .await?;
        info!(integration_id = %integration.id, "Integration connected");
        Ok(integration)
    }

    fn adapter(&self, provider: &ProviderName) -> SyncOutcome<BoxedAdapter> {
        self.registry
            .get(provider)
            .map_err(|_| SyncError::UnknownProvider {
                provider: provider.to_string(),
            })
    }

    async fn prepare(
        &self,
        org: OrganizationId,
        provider: &ProviderName,
    ) -> SyncOutcome<(BoxedAdapter, Integration)> {
        let integration = self
            .integrations
            .find_active_integration(org, provider)
            .await?
            .ok_or_else(|| SyncError::IntegrationNotFound {
                organization_id: org,
                provider: provider.to_string(),
            })?;
        let adapter = self.adapter(provider)?;
        let integration = self.ensure_fresh_token(&adapter, integration).await?;
        Ok((adapter, integration))
    }

    /// Refresh the access token if it expires within the configured skew.
    ///
    /// An integration another run already holds is rejected first, so a busy
    /// request never rotates the tokens that run is using. The new tokens are
    /// stored before the caller runs anything. A failed refresh leaves the
    /// integration status untouched.
    async fn ensure_fresh_token(
        &self,
        adapter: &BoxedAdapter,
        integration: Integration,
    ) -> SyncOutcome<Integration> {
        if integration.is_syncing() {
            info!(integration_id = %integration.id, "Integration already syncing; request rejected");
            return Err(SyncError::AlreadySyncing {
                integration_id: integration.integration_id(),
            });
        }
        if !integration.token_expires_within(self.config.token_refresh_skew(), Utc::now()) {
            return Ok(integration);
        }
        let Some(oauth) = adapter.oauth() else {
            return Ok(integration);
        };
        let Some(refresh_token) = integration.refresh_token.as_deref() else {
            return Err(SyncError::token_refresh("no refresh token stored"));
        };

        let tokens = oauth
            .refresh_access_token(refresh_token, &integration.credentials())
            .await
            .map_err(|e| {
                warn!(integration_id = %integration.id, error = %e, "Token refresh failed");
                SyncError::token_refresh(e.to_string())
            })?;
        let refreshed = self
            .integrations
            .update_tokens(integration.integration_id(), &tokens)
            .await?;
        info!(
            integration_id = %refreshed.id,
            expires_at = ?refreshed.token_expires_at,
            "Access token refreshed"
        );
        Ok(refreshed)
    }

    async fn run_integration(
        &self,
        integration: Integration,
        mode: SyncMode,
        cancel: &CancellationToken,
    ) -> IntegrationRun {
        let mut run = IntegrationRun {
            integration_id: integration.integration_id(),
            organization_id: integration.org_id(),
            provider: integration.provider.clone(),
            result: None,
            error: None,
        };

        let outcome = async {
            let provider = integration.provider_name()?;
            let adapter = self.adapter(&provider)?;
            let integration = self.ensure_fresh_token(&adapter, integration).await?;
            self.orchestrator
                .sync_organization_data(adapter.as_ref(), &integration, mode, cancel)
                .await
        }
        .await;

        match outcome {
            Ok(result) => run.result = Some(result),
            Err(e) => run.error = Some(e.to_string()),
        }
        run
    }
}

impl std::fmt::Debug for IntegrationManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IntegrationManager")
            .field("providers", &self.registry.providers())
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}
