//! Salesforce adapter configuration.

use serde::{Deserialize, Serialize};

use donorsync_connector::mapping::DEFAULT_CURRENCY;
use donorsync_connector::{ConnectorError, ConnectorResult};

use crate::retry::{LogVerbosity, RetryConfig};

/// Production login host.
pub const DEFAULT_LOGIN_URL: &str = "https://login.salesforce.com";

/// REST API version used in `/services/data/{version}` paths.
pub const DEFAULT_API_VERSION: &str = "v59.0";

/// Configuration for the Salesforce adapter.
///
/// The access token and instance URL are per integration and arrive with
/// every call through `ProviderCredentials`; this struct only carries the
/// connected-app settings shared by all organizations.
#[derive(Clone, Serialize, Deserialize)]
pub struct SalesforceConfig {
    /// Connected-app consumer key.
    pub client_id: String,

    /// Connected-app consumer secret.
    pub client_secret: String,

    /// OAuth callback registered on the connected app.
    #[serde(default)]
    pub redirect_uri: Option<String>,

    /// Login host for authorize/token requests (`https://test.salesforce.com`
    /// for sandboxes).
    #[serde(default = "default_login_url")]
    pub login_url: String,

    #[serde(default = "default_api_version")]
    pub api_version: String,

    #[serde(default = "default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,

    #[serde(default = "default_read_timeout_secs")]
    pub read_timeout_secs: u64,

    /// Lifetime assumed for an access token when the token endpoint does not
    /// report one. Salesforce's default session timeout is two hours.
    #[serde(default = "default_session_lifetime_secs")]
    pub session_lifetime_secs: i64,

    /// Currency used when a record carries none.
    #[serde(default = "default_currency")]
    pub default_currency: String,

    /// Query `CurrencyIsoCode` on opportunities. Only valid for orgs with
    /// multi-currency enabled; the field does not exist otherwise.
    #[serde(default)]
    pub multi_currency: bool,

    #[serde(default)]
    pub retry: RetryConfig,

    #[serde(default)]
    pub log_verbosity: LogVerbosity,
}

fn default_login_url() -> String {
    DEFAULT_LOGIN_URL.to_string()
}

fn default_api_version() -> String {
    DEFAULT_API_VERSION.to_string()
}

fn default_connect_timeout_secs() -> u64 {
    10
}

fn default_read_timeout_secs() -> u64 {
    60
}

fn default_session_lifetime_secs() -> i64 {
    7200
}

fn default_currency() -> String {
    DEFAULT_CURRENCY.to_string()
}

impl SalesforceConfig {
    /// Create a config with the connected-app credentials.
    pub fn new(client_id: impl Into<String>, client_secret: impl Into<String>) -> Self {
        Self {
            client_id: client_id.into(),
            client_secret: client_secret.into(),
            redirect_uri: None,
            login_url: default_login_url(),
            api_version: default_api_version(),
            connect_timeout_secs: default_connect_timeout_secs(),
            read_timeout_secs: default_read_timeout_secs(),
            session_lifetime_secs: default_session_lifetime_secs(),
            default_currency: default_currency(),
            multi_currency: false,
            retry: RetryConfig::default(),
            log_verbosity: LogVerbosity::default(),
        }
    }

    #[must_use]
    pub fn with_redirect_uri(mut self, uri: impl Into<String>) -> Self {
        self.redirect_uri = Some(uri.into());
        self
    }

    #[must_use]
    pub fn with_login_url(mut self, url: impl Into<String>) -> Self {
        self.login_url = url.into();
        self
    }

    #[must_use]
    pub fn with_api_version(mut self, version: impl Into<String>) -> Self {
        self.api_version = version.into();
        self
    }

    #[must_use]
    pub fn with_default_currency(mut self, currency: impl Into<String>) -> Self {
        self.default_currency = currency.into();
        self
    }

    #[must_use]
    pub fn with_multi_currency(mut self, enabled: bool) -> Self {
        self.multi_currency = enabled;
        self
    }

    #[must_use]
    pub fn with_retry(mut self, config: RetryConfig) -> Self {
        self.retry = config;
        self
    }

    #[must_use]
    pub fn with_log_verbosity(mut self, verbosity: LogVerbosity) -> Self {
        self.log_verbosity = verbosity;
        self
    }

    #[must_use]
    pub fn with_timeouts(mut self, connect_secs: u64, read_secs: u64) -> Self {
        self.connect_timeout_secs = connect_secs;
        self.read_timeout_secs = read_secs;
        self
    }

    /// Check required fields and URL shapes.
    pub fn validate(&self) -> ConnectorResult<()> {
        if self.client_id.trim().is_empty() {
            return Err(ConnectorError::invalid_configuration("client_id is required"));
        }
        if self.client_secret.trim().is_empty() {
            return Err(ConnectorError::invalid_configuration(
                "client_secret is required",
            ));
        }
        let login = url::Url::parse(&self.login_url).map_err(|e| {
            ConnectorError::invalid_configuration(format!("invalid login_url: {e}"))
        })?;
        if login.scheme() != "https" && login.scheme() != "http" {
            return Err(ConnectorError::invalid_configuration(format!(
                "unsupported login_url scheme: {}",
                login.scheme()
            )));
        }
        if let Some(redirect) = &self.redirect_uri {
            url::Url::parse(redirect).map_err(|e| {
                ConnectorError::invalid_configuration(format!("invalid redirect_uri: {e}"))
            })?;
        }
        if !self.api_version.starts_with('v') {
            return Err(ConnectorError::invalid_configuration(format!(
                "api_version must look like v59.0, got {}",
                self.api_version
            )));
        }
        Ok(())
    }

    /// `{login_url}/services/oauth2/{endpoint}`.
    #[must_use]
    pub fn oauth_url(&self, endpoint: &str) -> String {
        format!(
            "{}/services/oauth2/{}",
            self.login_url.trim_end_matches('/'),
            endpoint
        )
    }
}

impl std::fmt::Debug for SalesforceConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SalesforceConfig")
            .field("client_id", &self.client_id)
            .field("client_secret", &"[REDACTED]")
            .field("redirect_uri", &self.redirect_uri)
            .field("login_url", &self.login_url)
            .field("api_version", &self.api_version)
            .field("multi_currency", &self.multi_currency)
            .field("retry", &self.retry)
            .field("log_verbosity", &self.log_verbosity)
            .finish_non_exhaustive()
    }
}
