//! Provider adapter errors.
//!
//! Transient variants are the ones a later run may get past without operator
//! action; the sync engine reports them as retryable.

use thiserror::Error;

/// Error that can occur while talking to a CRM provider.
#[derive(Debug, Error)]
pub enum ConnectorError {
    // Transient
    /// Request timed out.
    #[error("connection timeout after {timeout_secs} seconds")]
    ConnectionTimeout { timeout_secs: u64 },

    /// Vendor API is temporarily unavailable or rate limiting.
    #[error("target system unavailable: {message}")]
    TargetUnavailable { message: String },

    /// Transport failure while talking to the vendor.
    #[error("network error: {message}")]
    NetworkError {
        message: String,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    // Credentials
    /// Access token rejected by the vendor.
    #[error("authentication failed: invalid credentials")]
    AuthenticationFailed,

    /// Access token has expired.
    #[error("authentication failed: credentials expired")]
    CredentialsExpired,

    /// Token exchange or refresh was rejected.
    #[error("token request failed: {message}")]
    TokenRequestFailed { message: String },

    /// Insufficient permissions for the operation.
    #[error("authorization failed: insufficient permissions for {operation}")]
    AuthorizationFailed { operation: String },

    // Configuration
    /// Adapter configuration or integration metadata is invalid.
    #[error("invalid configuration: {message}")]
    InvalidConfiguration { message: String },

    /// Provider is not registered.
    #[error("unsupported provider: {provider}")]
    UnsupportedProvider { provider: String },

    /// Page token could not be decoded.
    #[error("invalid page token: {message}")]
    InvalidPageToken { message: String },

    // Vendor responses
    /// The vendor answered with an error the adapter does not classify further.
    #[error("operation failed: {message}")]
    OperationFailed { message: String },

    /// Record not found on the vendor (update target missing).
    #[error("object not found: {identifier}")]
    ObjectNotFound { identifier: String },

    /// Vendor payload could not be mapped.
    #[error("invalid data: {message}")]
    InvalidData { message: String },

    /// Serialization error.
    #[error("serialization error: {message}")]
    Serialization { message: String },
}

impl ConnectorError {
    /// Whether a later attempt may succeed unchanged.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            ConnectorError::ConnectionTimeout { .. }
                | ConnectorError::TargetUnavailable { .. }
                | ConnectorError::NetworkError { .. }
        )
    }

    /// Whether the stored credentials are no longer usable.
    pub fn is_auth_error(&self) -> bool {
        matches!(
            self,
            ConnectorError::AuthenticationFailed
                | ConnectorError::CredentialsExpired
                | ConnectorError::TokenRequestFailed { .. }
        )
    }

    /// Stable code for logs and run reports.
    pub fn error_code(&self) -> &'static str {
        match self {
            ConnectorError::ConnectionTimeout { .. } => "CONNECTION_TIMEOUT",
            ConnectorError::TargetUnavailable { .. } => "TARGET_UNAVAILABLE",
            ConnectorError::NetworkError { .. } => "NETWORK_ERROR",
            ConnectorError::AuthenticationFailed => "AUTH_FAILED",
            ConnectorError::CredentialsExpired => "CREDENTIALS_EXPIRED",
            ConnectorError::TokenRequestFailed { .. } => "TOKEN_REQUEST_FAILED",
            ConnectorError::AuthorizationFailed { .. } => "AUTHORIZATION_FAILED",
            ConnectorError::InvalidConfiguration { .. } => "INVALID_CONFIG",
            ConnectorError::UnsupportedProvider { .. } => "UNSUPPORTED_PROVIDER",
            ConnectorError::InvalidPageToken { .. } => "INVALID_PAGE_TOKEN",
            ConnectorError::OperationFailed { .. } => "OPERATION_FAILED",
            ConnectorError::ObjectNotFound { .. } => "OBJECT_NOT_FOUND",
            ConnectorError::InvalidData { .. } => "INVALID_DATA",
            ConnectorError::Serialization { .. } => "SERIALIZATION_ERROR",
        }
    }

    pub fn operation_failed(message: impl Into<String>) -> Self {
        ConnectorError::OperationFailed {
            message: message.into(),
        }
    }

    /// Transport failure carrying the underlying error.
    pub fn network_with_source(
        message: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        ConnectorError::NetworkError {
            message: message.into(),
            source: Box::new(source),
        }
    }

    pub fn invalid_configuration(message: impl Into<String>) -> Self {
        ConnectorError::InvalidConfiguration {
            message: message.into(),
        }
    }


    pub fn invalid_data(message: impl Into<String>) -> Self {
        ConnectorError::InvalidData {
            message: message.into(),
        }
    }
}

impl From<serde_json::Error> for ConnectorError {
    fn from(err: serde_json::Error) -> Self {
        ConnectorError::Serialization {
            message: err.to_string(),
        }
    }
}

/// Result type for connector operations.
pub type ConnectorResult<T> = Result<T, ConnectorError>;
