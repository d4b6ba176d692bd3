//! Worker configuration loaded from the environment.

use std::env;

use donorsync_connector_salesforce::SalesforceConfig;
use donorsync_sync::SyncConfig;

/// Default log filter when `RUST_LOG` is unset.
pub const DEFAULT_LOG_FILTER: &str = "info,donorsync=debug";

/// Configuration error.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingVar(String),

    #[error("Invalid value for {var}: {message}")]
    InvalidValue { var: String, message: String },
}

/// Everything the worker needs to build its services.
#[derive(Clone)]
pub struct WorkerConfig {
    pub database_url: String,
    pub database_max_connections: u32,
    pub log_filter: String,
    /// `None` when the Salesforce connected app is not configured.
    pub salesforce: Option<SalesforceConfig>,
    pub sync: SyncConfig,
}

impl std::fmt::Debug for WorkerConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkerConfig")
            .field("database_url", &"[REDACTED]")
            .field("database_max_connections", &self.database_max_connections)
            .field("log_filter", &self.log_filter)
            .field("salesforce", &self.salesforce.is_some())
            .field("sync", &self.sync)
            .finish()
    }
}

impl WorkerConfig {
    /// Load from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        let database_url =
            env::var("DATABASE_URL").map_err(|_| ConfigError::MissingVar("DATABASE_URL".into()))?;

        let database_max_connections = match env::var("DATABASE_MAX_CONNECTIONS") {
            Ok(raw) => raw.parse().map_err(|_| ConfigError::InvalidValue {
                var: "DATABASE_MAX_CONNECTIONS".into(),
                message: format!("expected a positive integer, got {raw:?}"),
            })?,
            Err(_) => 10,
        };

        let log_filter = env::var("LOG_FILTER").unwrap_or_else(|_| DEFAULT_LOG_FILTER.to_string());

        let sync = SyncConfig::from_env();
        Ok(Self {
            database_url,
            database_max_connections,
            log_filter,
            salesforce: salesforce_from_env(&sync.default_currency)?,
            sync,
        })
    }
}

/// Salesforce connected-app settings, if `SALESFORCE_CLIENT_ID` is set.
fn salesforce_from_env(default_currency: &str) -> Result<Option<SalesforceConfig>, ConfigError> {
    let Ok(client_id) = env::var("SALESFORCE_CLIENT_ID") else {
        return Ok(None);
    };
    let client_secret = env::var("SALESFORCE_CLIENT_SECRET")
        .map_err(|_| ConfigError::MissingVar("SALESFORCE_CLIENT_SECRET".into()))?;

    let mut config = SalesforceConfig::new(client_id, client_secret);
    if let Ok(uri) = env::var("SALESFORCE_REDIRECT_URI") {
        config = config.with_redirect_uri(uri);
    }
    if let Ok(url) = env::var("SALESFORCE_LOGIN_URL") {
        config = config.with_login_url(url);
    }
    if let Ok(version) = env::var("SALESFORCE_API_VERSION") {
        config = config.with_api_version(version);
    }
    if let Ok(raw) = env::var("SALESFORCE_MULTI_CURRENCY") {
        config = config.with_multi_currency(matches!(
            raw.to_lowercase().as_str(),
            "true" | "1" | "yes"
        ));
    }
    config = config.with_default_currency(default_currency);

    config.validate().map_err(|e| ConfigError::InvalidValue {
        var: "SALESFORCE_*".into(),
        message: e.to_string(),
    })?;
    Ok(Some(config))
}
