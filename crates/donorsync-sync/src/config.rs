//! Engine configuration.

use serde::{Deserialize, Serialize};
use std::str::FromStr;

use donorsync_connector::mapping::DEFAULT_CURRENCY;

/// Upper bound for `update_chunk_size`.
pub const MAX_UPDATE_CHUNK_SIZE: usize = 1000;

/// Tunables for the upserter, orchestrator and manager.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncConfig {
    /// Records requested per vendor page.
    #[serde(default = "default_page_size")]
    pub page_size: u32,
    /// Updates per transaction.
    #[serde(default = "default_update_chunk_size")]
    pub update_chunk_size: usize,
    /// Rows per bulk insert statement.
    #[serde(default = "default_insert_chunk_size")]
    pub insert_chunk_size: usize,
    /// Currency used when the vendor sends none.
    #[serde(default = "default_currency")]
    pub default_currency: String,
    /// Tokens expiring within this window are refreshed before a run.
    #[serde(default = "default_token_refresh_skew_secs")]
    pub token_refresh_skew_secs: i64,
    /// Parallel runs in a `sync_all` sweep.
    #[serde(default = "default_max_concurrent_runs")]
    pub max_concurrent_runs: usize,
    /// A run still `syncing` after this long is considered dead.
    #[serde(default = "default_stale_sync_after_secs")]
    pub stale_sync_after_secs: i64,
    /// Local records uploaded per push batch.
    #[serde(default = "default_push_batch_size")]
    pub push_batch_size: u32,
}

fn default_page_size() -> u32 {
    200
}

fn default_update_chunk_size() -> usize {
    500
}

fn default_insert_chunk_size() -> usize {
    1000
}

fn default_currency() -> String {
    DEFAULT_CURRENCY.to_string()
}

fn default_token_refresh_skew_secs() -> i64 {
    300
}

fn default_max_concurrent_runs() -> usize {
    4
}

fn default_stale_sync_after_secs() -> i64 {
    3600
}

fn default_push_batch_size() -> u32 {
    200
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            page_size: default_page_size(),
            update_chunk_size: default_update_chunk_size(),
            insert_chunk_size: default_insert_chunk_size(),
            default_currency: default_currency(),
            token_refresh_skew_secs: default_token_refresh_skew_secs(),
            max_concurrent_runs: default_max_concurrent_runs(),
            stale_sync_after_secs: default_stale_sync_after_secs(),
            push_batch_size: default_push_batch_size(),
        }
    }
}

fn env_or<T: FromStr>(name: &str, default: T) -> T {
    match std::env::var(name) {
        Ok(raw) => raw.trim().parse().unwrap_or_else(|_| {
            tracing::warn!(variable = name, value = %raw, "Ignoring unparsable setting");
            default
        }),
        Err(_) => default,
    }
}

impl SyncConfig {
    /// Read `SYNC_*` variables, falling back to defaults for absent or
    /// unparsable values.
    #[must_use]
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            page_size: env_or("SYNC_PAGE_SIZE", defaults.page_size),
            update_chunk_size: env_or("SYNC_UPDATE_CHUNK_SIZE", defaults.update_chunk_size),
            insert_chunk_size: env_or("SYNC_INSERT_CHUNK_SIZE", defaults.insert_chunk_size),
            default_currency: env_or("SYNC_DEFAULT_CURRENCY", defaults.default_currency),
            token_refresh_skew_secs: env_or(
                "SYNC_TOKEN_REFRESH_SKEW_SECS",
                defaults.token_refresh_skew_secs,
            ),
            max_concurrent_runs: env_or("SYNC_MAX_CONCURRENT_RUNS", defaults.max_concurrent_runs),
            stale_sync_after_secs: env_or(
                "SYNC_STALE_AFTER_SECS",
                defaults.stale_sync_after_secs,
            ),
            push_batch_size: env_or("SYNC_PUSH_BATCH_SIZE", defaults.push_batch_size),
        }
        .normalized()
    }

    /// Clamp values into their valid ranges.
    #[must_use]
    pub fn normalized(mut self) -> Self {
        self.page_size = self.page_size.max(1);
        self.update_chunk_size = self.update_chunk_size.clamp(1, MAX_UPDATE_CHUNK_SIZE);
        self.insert_chunk_size = self.insert_chunk_size.max(1);
        self.max_concurrent_runs = self.max_concurrent_runs.max(1);
        self.push_batch_size = self.push_batch_size.max(1);
        self.token_refresh_skew_secs = self.token_refresh_skew_secs.max(0);
        self
    }

    #[must_use]
    pub fn with_page_size(mut self, page_size: u32) -> Self {
        self.page_size = page_size.max(1);
        self
    }

    #[must_use]
    pub fn with_update_chunk_size(mut self, size: usize) -> Self {
        self.update_chunk_size = size.clamp(1, MAX_UPDATE_CHUNK_SIZE);
        self
    }

    #[must_use]
    pub fn with_insert_chunk_size(mut self, size: usize) -> Self {
        self.insert_chunk_size = size.max(1);
        self
    }

    #[must_use]
    pub fn with_default_currency(mut self, currency: impl Into<String>) -> Self {
        self.default_currency = currency.into();
        self
    }

    #[must_use]
    pub fn with_token_refresh_skew_secs(mut self, secs: i64) -> Self {
        self.token_refresh_skew_secs = secs.max(0);
        self
    }

    #[must_use]
    pub fn with_max_concurrent_runs(mut self, runs: usize) -> Self {
        self.max_concurrent_runs = runs.max(1);
        self
    }

    #[must_use]
    pub fn with_stale_sync_after_secs(mut self, secs: i64) -> Self {
        self.stale_sync_after_secs = secs;
        self
    }

    #[must_use]
    pub fn with_push_batch_size(mut self, size: u32) -> Self {
        self.push_batch_size = size.max(1);
        self
    }

    /// Refresh window as a chrono duration.
    #[must_use]
    pub fn token_refresh_skew(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.token_refresh_skew_secs)
    }

    #[must_use]
    pub fn stale_sync_after(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.stale_sync_after_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = SyncConfig::default();
        assert_eq!(config.page_size, 200);
        assert_eq!(config.update_chunk_size, 500);
        assert_eq!(config.insert_chunk_size, 1000);
        assert_eq!(config.default_currency, "USD");
        assert_eq!(config.token_refresh_skew_secs, 300);
        assert_eq!(config.max_concurrent_runs, 4);
    }

    #[test]
    fn test_chunk_size_clamped() {
        assert_eq!(
            SyncConfig::default().with_update_chunk_size(0).update_chunk_size,
            1
        );
        assert_eq!(
            SyncConfig::default()
                .with_update_chunk_size(5000)
                .update_chunk_size,
            MAX_UPDATE_CHUNK_SIZE
        );
    }

    #[test]
    fn test_deserialize_fills_defaults() {
        let config: SyncConfig = serde_json::from_str(r#"{"page_size": 50}"#).unwrap();
        assert_eq!(config.page_size, 50);
        assert_eq!(config.update_chunk_size, 500);
    }
}
