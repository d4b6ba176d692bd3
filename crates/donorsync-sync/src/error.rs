//! Sync engine error types.
//!
//! Every variant is fatal to the operation that returned it. Per-record
//! failures never surface here; they are counted in
//! [`donorsync_core::SyncResult::errors`].

use thiserror::Error;

use donorsync_connector::ConnectorError;
use donorsync_core::{IntegrationId, OrganizationId};
use donorsync_db::DbError;

/// Errors that abort a sync, push or connect request.
#[derive(Debug, Error)]
pub enum SyncError {
    /// A run already holds the integration.
    #[error("integration {integration_id} is already syncing")]
    AlreadySyncing { integration_id: IntegrationId },

    /// No active integration for the organization and provider.
    #[error("no active {provider} integration for organization {organization_id}")]
    IntegrationNotFound {
        organization_id: OrganizationId,
        provider: String,
    },

    /// Provider is not registered.
    #[error("unknown provider: {provider}")]
    UnknownProvider { provider: String },

    /// The adapter lacks a capability the request needs.
    #[error("{provider} does not support {capability}")]
    Unsupported {
        provider: String,
        capability: &'static str,
    },

    /// Refreshing the access token failed; the run never started.
    #[error("token refresh failed: {message}")]
    TokenRefresh { message: String },

    /// Stale-run recovery released the integration while this run was still
    /// working; the run stopped and left the status to whoever holds it now.
    #[error("sync of integration {integration_id} was released before it finished")]
    LeaseLost { integration_id: IntegrationId },

    /// The run was cancelled at a page boundary.
    #[error("sync cancelled")]
    Cancelled,

    /// Vendor call failed.
    #[error("provider error: {0}")]
    Connector(#[from] ConnectorError),

    /// Storage failed.
    #[error("database error: {0}")]
    Database(#[from] DbError),
}

impl SyncError {
    /// Create a token refresh error.
    pub fn token_refresh(message: impl Into<String>) -> Self {
        Self::TokenRefresh {
            message: message.into(),
        }
    }

    /// Whether the request was turned away before any work was done.
    #[must_use]
    pub fn is_rejection(&self) -> bool {
        matches!(
            self,
            SyncError::AlreadySyncing { .. }
                | SyncError::IntegrationNotFound { .. }
                | SyncError::UnknownProvider { .. }
                | SyncError::Unsupported { .. }
        )
    }

    /// Whether retrying later may succeed without operator action.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        match self {
            SyncError::AlreadySyncing { .. } | SyncError::LeaseLost { .. } => true,
            SyncError::Connector(e) => e.is_transient(),
            SyncError::Database(e) => e.is_connection_error(),
            _ => false,
        }
    }

    /// Get an error code for classification.
    #[must_use]
    pub fn error_code(&self) -> &'static str {
        match self {
            SyncError::AlreadySyncing { .. } => "ALREADY_SYNCING",
            SyncError::IntegrationNotFound { .. } => "INTEGRATION_NOT_FOUND",
            SyncError::UnknownProvider { .. } => "UNKNOWN_PROVIDER",
            SyncError::Unsupported { .. } => "UNSUPPORTED",
            SyncError::TokenRefresh { .. } => "TOKEN_REFRESH_FAILED",
            SyncError::LeaseLost { .. } => "LEASE_LOST",
            SyncError::Cancelled => "CANCELLED",
            SyncError::Connector(e) => e.error_code(),
            SyncError::Database(_) => "DATABASE_ERROR",
        }
    }
}

/// Result type for engine operations.
///
/// Named to avoid confusion with the per-entity [`donorsync_core::SyncResult`].
pub type SyncOutcome<T> = Result<T, SyncError>;
