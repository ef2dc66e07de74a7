//! Error types for the DNS reconciliation engine
//!
//! Adapters return the specific variant to their caller; the sync driver
//! logs and moves on to the next hostname.

use thiserror::Error;

/// Result type alias for engine operations
pub type Result<T> = std::result::Result<T, Error>;

/// Core error type for the DNS reconciliation engine
#[derive(Error, Debug)]
pub enum Error {
    /// Missing or malformed provider credentials/settings
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// Hostname has no registrable suffix
    #[error("Invalid hostname: {0}")]
    InvalidHostname(String),

    /// The provider account has no zone for the hostname
    #[error("Zone not found: {0}")]
    ZoneNotFound(String),

    /// Non-2xx or error-envelope response from a backend
    #[error("Provider error ({provider}) during {operation}: {message}")]
    ProviderApi {
        /// Provider name
        provider: String,
        /// The operation that failed (e.g. "create record")
        operation: String,
        /// Raw backend message
        message: String,
    },

    /// Delete attempted on a subdomain without the ownership marker
    #[error("Records for {0} are not managed by mantrae (ownership marker missing)")]
    NotManaged(String),

    /// Provider type tag has no registered factory
    #[error("Unknown provider type: {0}")]
    UnknownProviderType(String),

    /// Requested entity does not exist
    #[error("Not found: {0}")]
    NotFound(String),

    /// Authentication errors
    #[error("Authentication failed: {0}")]
    Authentication(String),

    /// Rate limiting errors
    #[error("Rate limited: {0}")]
    RateLimited(String),

    /// Transport-level HTTP failure
    #[error("HTTP error: {0}")]
    Http(String),

    /// Operation exceeded its deadline
    #[error("Timed out: {0}")]
    Timeout(String),

    /// JSON serialization/deserialization errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Filesystem errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Generic error with context
    #[error("{0}")]
    Other(String),
}

impl Error {
    /// Create a configuration error
    pub fn config(msg: impl Into<String>) -> Self {
        Self::InvalidConfig(msg.into())
    }

    /// Create an invalid hostname error
    pub fn invalid_hostname(msg: impl Into<String>) -> Self {
        Self::InvalidHostname(msg.into())
    }

    /// Create a "zone not found" error
    pub fn zone_not_found(zone: impl Into<String>) -> Self {
        Self::ZoneNotFound(zone.into())
    }

    /// Create a provider API error
    pub fn provider(
        provider: impl Into<String>,
        operation: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self::ProviderApi {
            provider: provider.into(),
            operation: operation.into(),
            message: message.into(),
        }
    }

    /// Create an ownership error
    pub fn not_managed(subdomain: impl Into<String>) -> Self {
        Self::NotManaged(subdomain.into())
    }

    /// Create a "not found" error
    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::NotFound(msg.into())
    }

    /// Create an authentication error
    pub fn auth(msg: impl Into<String>) -> Self {
        Self::Authentication(msg.into())
    }

    /// Create a rate limit error
    pub fn rate_limited(msg: impl Into<String>) -> Self {
        Self::RateLimited(msg.into())
    }

    /// Create an HTTP error
    pub fn http(msg: impl Into<String>) -> Self {
        Self::Http(msg.into())
    }

    /// Whether the next scheduled cycle may simply try again.
    ///
    /// Ownership conflicts need an operator and are never retryable.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::ProviderApi { .. } | Self::Http(_) | Self::RateLimited(_) | Self::Timeout(_)
        )
    }
}

impl From<anyhow::Error> for Error {
    fn from(err: anyhow::Error) -> Self {
        Self::Other(err.to_string())
    }
}
