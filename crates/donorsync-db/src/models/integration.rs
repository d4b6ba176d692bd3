//! Integration records: one connected CRM per organization and provider.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use std::fmt;
use uuid::Uuid;

use donorsync_connector::ProviderCredentials;
use donorsync_core::{IntegrationId, OrganizationId, ProviderName};

use crate::error::{DbError, DbResult};

/// Sync status of an integration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "varchar", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum SyncState {
    /// Not currently syncing; last run (if any) succeeded.
    Idle,
    /// A run holds the integration.
    Syncing,
    /// Last run failed; see `sync_error`.
    Error,
}

impl SyncState {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            SyncState::Idle => "idle",
            SyncState::Syncing => "syncing",
            SyncState::Error => "error",
        }
    }
}

impl fmt::Display for SyncState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for SyncState {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "idle" => Ok(SyncState::Idle),
            "syncing" => Ok(SyncState::Syncing),
            "error" => Ok(SyncState::Error),
            _ => Err(format!("Unknown sync state: {s}")),
        }
    }
}

/// A stored integration.
#[derive(Clone, FromRow, Serialize, Deserialize)]
pub struct Integration {
    pub id: Uuid,
    pub organization_id: Uuid,
    pub provider: String,
    #[serde(skip_serializing)]
    pub access_token: String,
    #[serde(skip_serializing)]
    pub refresh_token: Option<String>,
    pub token_expires_at: Option<DateTime<Utc>>,
    /// Provider-specific data (e.g. Salesforce `instance_url`).
    pub metadata: serde_json::Value,
    pub sync_status: SyncState,
    pub sync_error: Option<String>,
    pub last_sync_at: Option<DateTime<Utc>>,
    /// Run holding the integration; set only while `syncing`.
    pub sync_run_id: Option<Uuid>,
    /// Last sign of life from the holding run.
    pub sync_heartbeat_at: Option<DateTime<Utc>>,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl fmt::Debug for Integration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Integration")
            .field("id", &self.id)
            .field("organization_id", &self.organization_id)
            .field("provider", &self.provider)
            .field("access_token", &"[REDACTED]")
            .field("refresh_token", &self.refresh_token.as_ref().map(|_| "[REDACTED]"))
            .field("token_expires_at", &self.token_expires_at)
            .field("metadata", &self.metadata)
            .field("sync_status", &self.sync_status)
            .field("sync_error", &self.sync_error)
            .field("last_sync_at", &self.last_sync_at)
            .field("sync_run_id", &self.sync_run_id)
            .field("is_active", &self.is_active)
            .finish_non_exhaustive()
    }
}

impl Integration {
    #[must_use]
    pub fn integration_id(&self) -> IntegrationId {
        IntegrationId::from_uuid(self.id)
    }

    #[must_use]
    pub fn org_id(&self) -> OrganizationId {
        OrganizationId::from_uuid(self.organization_id)
    }

    /// Whether a run currently holds the integration.
    #[must_use]
    pub fn is_syncing(&self) -> bool {
        self.sync_status == SyncState::Syncing
    }

    /// Parsed provider name.
    pub fn provider_name(&self) -> DbResult<ProviderName> {
        ProviderName::new(self.provider.clone()).map_err(|e| {
            DbError::ValidationFailed(format!("integration {} has {e}", self.id))
        })
    }

    /// Credentials handed to the adapter.
    #[must_use]
    pub fn credentials(&self) -> ProviderCredentials {
        ProviderCredentials::new(self.access_token.clone(), self.metadata.clone())
    }

    /// True when the token expires at or before `now + skew`.
    ///
    /// A token without a known expiry is assumed valid.
    #[must_use]
    pub fn token_expires_within(&self, skew: Duration, now: DateTime<Utc>) -> bool {
        self.token_expires_at
            .is_some_and(|expires_at| expires_at <= now + skew)
    }
}

/// An integration to create after an OAuth grant.
#[derive(Clone)]
pub struct NewIntegration {
    pub id: IntegrationId,
    pub organization_id: OrganizationId,
    pub provider: ProviderName,
    pub access_token: String,
    pub refresh_token: Option<String>,
    pub token_expires_at: Option<DateTime<Utc>>,
    pub metadata: serde_json::Value,
}

impl fmt::Debug for NewIntegration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NewIntegration")
            .field("id", &self.id)
            .field("organization_id", &self.organization_id)
            .field("provider", &self.provider)
            .field("token_expires_at", &self.token_expires_at)
            .finish_non_exhaustive()
    }
}

/// Merge token-response metadata into stored metadata (new keys win).
#[must_use]
pub fn merge_metadata(stored: &serde_json::Value, update: &serde_json::Value) -> serde_json::Value {
    match (stored, update) {
        (serde_json::Value::Object(base), serde_json::Value::Object(extra)) => {
            let mut merged = base.clone();
            for (key, value) in extra {
                merged.insert(key.clone(), value.clone());
            }
            serde_json::Value::Object(merged)
        }
        (_, serde_json::Value::Object(_)) => update.clone(),
        _ => stored.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn integration(expires_at: Option<DateTime<Utc>>) -> Integration {
        let now = Utc::now();
        Integration {
            id: Uuid::new_v4(),
            organization_id: Uuid::new_v4(),
            provider: "salesforce".to_string(),
            access_token: "secret-access".to_string(),
            refresh_token: Some("secret-refresh".to_string()),
            token_expires_at: expires_at,
            metadata: json!({"instance_url": "https://na1.salesforce.com"}),
            sync_status: SyncState::Idle,
            sync_error: None,
            last_sync_at: None,
            sync_run_id: None,
            sync_heartbeat_at: None,
            is_active: true,
            created_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn test_sync_state_roundtrip() {
        for state in [SyncState::Idle, SyncState::Syncing, SyncState::Error] {
            assert_eq!(state.to_string().parse::<SyncState>().unwrap(), state);
        }
        assert!("paused".parse::<SyncState>().is_err());
    }

    #[test]
    fn test_token_expiry_window() {
        let now = Utc::now();
        let skew = Duration::seconds(300);
        assert!(integration(Some(now + Duration::seconds(60))).token_expires_within(skew, now));
        assert!(integration(Some(now - Duration::seconds(1))).token_expires_within(skew, now));
        assert!(!integration(Some(now + Duration::hours(1))).token_expires_within(skew, now));
        assert!(!integration(None).token_expires_within(skew, now));
    }

    #[test]
    fn test_debug_and_serialize_hide_tokens() {
        let record = integration(None);
        let debug = format!("{record:?}");
        assert!(!debug.contains("secret-access"));
        assert!(!debug.contains("secret-refresh"));
        let json = serde_json::to_string(&record).unwrap();
        assert!(!json.contains("secret-access"));
    }

    #[test]
    fn test_credentials_carry_metadata() {
        let creds = integration(None).credentials();
        assert_eq!(
            creds.metadata_str("instance_url"),
            Some("https://na1.salesforce.com")
        );
    }

    #[test]
    fn test_merge_metadata() {
        let merged = merge_metadata(
            &json!({"instance_url": "old", "org": "x"}),
            &json!({"instance_url": "new"}),
        );
        assert_eq!(merged, json!({"instance_url": "new", "org": "x"}));
        assert_eq!(merge_metadata(&json!({"a": 1}), &json!(null)), json!({"a": 1}));
    }
}
