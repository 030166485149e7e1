//! Error taxonomy for the ingestion core
//!
//! Token and secret errors fail the endpoint task that hit them, never the
//! whole run. The orchestrator turns each error into a reported
//! [`ErrorKind`] via [`IngestError::kind`].

use tally_common::types::ErrorKind;
use thiserror::Error;

/// Result type alias for ingestion operations
pub type Result<T> = std::result::Result<T, IngestError>;

#[derive(Error, Debug)]
pub enum IngestError {
    /// Missing or invalid setting; fatal at startup
    #[error("Configuration error: {0}")]
    Config(String),

    /// Secret read or write failed
    #[error("Secret backend error: {0}")]
    SecretBackend(String),

    /// No token material stored for the tenant
    #[error("No stored credentials for tenant {tenant}")]
    TokenUnavailable { tenant: String },

    /// Stored token material could not be decoded
    #[error("Invalid token payload for tenant {tenant}: {reason}")]
    TokenRetrieval { tenant: String, reason: String },

    /// The identity provider rejected or failed the refresh grant
    #[error("Token refresh failed for tenant {tenant}: {reason}")]
    TokenRefreshFailed { tenant: String, reason: String },

    /// Non-retriable response from the source API
    #[error("Upstream returned {status} for {url}: {body}")]
    Upstream {
        status: u16,
        url: String,
        body: String,
    },

    /// Retries exhausted on 5xx, 429 or transport failures
    #[error("Gave up after {attempts} attempts: {last_error}")]
    Transient { attempts: u32, last_error: String },

    /// Page body was not the expected shape
    #[error("Unexpected payload: {0}")]
    Payload(String),

    /// Object store write failed
    #[error("Object store error: {0}")]
    Sink(String),
}

impl IngestError {
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    pub fn secret_backend(msg: impl Into<String>) -> Self {
        Self::SecretBackend(msg.into())
    }

    pub fn payload(msg: impl Into<String>) -> Self {
        Self::Payload(msg.into())
    }

    pub fn sink(msg: impl Into<String>) -> Self {
        Self::Sink(msg.into())
    }

    /// Category reported in run outcomes
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Config(_) => ErrorKind::Config,
            Self::SecretBackend(_) => ErrorKind::SecretBackend,
            Self::TokenUnavailable { .. } => ErrorKind::TokenUnavailable,
            Self::TokenRetrieval { .. } => ErrorKind::TokenRetrieval,
            Self::TokenRefreshFailed { .. } => ErrorKind::TokenRefreshFailed,
            Self::Upstream { .. } => ErrorKind::Upstream,
            Self::Transient { .. } => ErrorKind::Transient,
            Self::Payload(_) => ErrorKind::Payload,
            Self::Sink(_) => ErrorKind::Sink,
        }
    }

    /// Whether the owning endpoint could succeed if simply run again
    pub fn is_retriable(&self) -> bool {
        matches!(self, Self::Transient { .. } | Self::Sink(_))
    }
}

impl From<tally_common::TallyError> for IngestError {
    fn from(err: tally_common::TallyError) -> Self {
        match err {
            tally_common::TallyError::Config(msg) => Self::Config(msg),
            other => Self::Payload(other.to_string()),
        }
    }
}
