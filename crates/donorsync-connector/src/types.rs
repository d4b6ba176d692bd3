//! Credential and token types passed across the adapter boundary.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Access token plus provider-specific metadata for one integration.
///
/// `metadata` is the integration's stored JSON (e.g. Salesforce keeps
/// `instance_url` there).
#[derive(Clone, Serialize, Deserialize)]
pub struct ProviderCredentials {
    pub access_token: String,
    #[serde(default)]
    pub metadata: serde_json::Value,
}

impl ProviderCredentials {
    /// Create credentials.
    pub fn new(access_token: impl Into<String>, metadata: serde_json::Value) -> Self {
        Self {
            access_token: access_token.into(),
            metadata,
        }
    }

    /// Read a string entry from the metadata object.
    #[must_use]
    pub fn metadata_str(&self, key: &str) -> Option<&str> {
        self.metadata.get(key).and_then(serde_json::Value::as_str)
    }
}

impl std::fmt::Debug for ProviderCredentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProviderCredentials")
            .field("access_token", &"[REDACTED]")
            .field("metadata", &self.metadata)
            .finish()
    }
}

/// Tokens returned by an OAuth code exchange or refresh.
#[derive(Clone, Serialize, Deserialize)]
pub struct OAuthTokens {
    pub access_token: String,
    /// Some vendors do not rotate refresh tokens; `None` keeps the stored one.
    pub refresh_token: Option<String>,
    pub expires_at: Option<DateTime<Utc>>,
    /// Provider metadata to merge into the integration record.
    #[serde(default)]
    pub metadata: serde_json::Value,
}

impl std::fmt::Debug for OAuthTokens {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OAuthTokens")
            .field("access_token", &"[REDACTED]")
            .field(
                "refresh_token",
                &self.refresh_token.as_ref().map(|_| "[REDACTED]"),
            )
            .field("expires_at", &self.expires_at)
            .field("metadata", &self.metadata)
            .finish()
    }
}
