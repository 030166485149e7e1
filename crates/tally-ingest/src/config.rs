//! Configuration management
//!
//! Everything is read from the environment once at startup (`.env` is
//! honoured). Missing required settings are fatal: no run starts.

use crate::endpoints::{self, DEFAULT_API_BASE};
use crate::error::{IngestError, Result};
use crate::fetcher::{
    FetchConfig, PageParam, RetryPolicy, DEFAULT_MAX_ATTEMPTS, DEFAULT_MAX_RATE_LIMIT_RETRIES,
    DEFAULT_TENANT_HEADER,
};
use crate::rate_limit::{RateLimiter, DEFAULT_RATE_LIMIT_CALLS};
use crate::sink::S3Config;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;
use tally_common::types::{EndpointDescriptor, TenantId};

// ============================================================================
// Defaults
// ============================================================================

/// Default OAuth token endpoint.
pub const DEFAULT_TOKEN_URL: &str = "https://identity.xero.com/connect/token";

/// Default rate-limit window in seconds.
pub const DEFAULT_RATE_LIMIT_PERIOD_SECS: u64 = 60;

/// Default first backoff delay in milliseconds.
pub const DEFAULT_BACKOFF_BASE_MS: u64 = 1000;

/// Default per-request timeout in seconds.
pub const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 30;

/// Default directory of the filesystem secret backend.
pub const DEFAULT_SECRETS_DIR: &str = "./secrets";

/// Ingestion settings
#[derive(Debug, Clone)]
pub struct IngestConfig {
    /// Keys token secrets, the tenant header and the run report
    pub tenant: TenantId,
    pub project_id: String,
    pub bucket: String,
    pub page_size: usize,

    pub token_url: String,
    pub api_base: String,
    pub tenant_header: String,
    pub pagination: PageParam,

    pub rate_limit_calls: usize,
    pub rate_limit_period_secs: u64,
    pub max_attempts: u32,
    pub backoff_base_ms: u64,
    pub max_rate_limit_retries: u32,
    pub request_timeout_secs: u64,

    pub secrets_dir: PathBuf,
    pub endpoints_file: Option<PathBuf>,
    pub client_id_secret: String,
    pub client_secret_secret: String,

    pub storage: S3Config,
}

fn required(name: &str) -> Result<String> {
    match std::env::var(name) {
        Ok(value) if !value.trim().is_empty() => Ok(value.trim().to_string()),
        _ => Err(IngestError::config(format!(
            "Environment variable {} is not set",
            name
        ))),
    }
}

fn optional(name: &str, default: &str) -> String {
    std::env::var(name)
        .ok()
        .filter(|v| !v.trim().is_empty())
        .unwrap_or_else(|| default.to_string())
}

fn parsed<T: FromStr>(name: &str, default: T) -> Result<T> {
    match std::env::var(name) {
        Ok(raw) if !raw.trim().is_empty() => raw.trim().parse().map_err(|_| {
            IngestError::config(format!("Environment variable {} has invalid value '{}'", name, raw))
        }),
        _ => Ok(default),
    }
}

impl IngestConfig {
    /// Load `.env`, then read the environment
    pub fn load() -> Result<Self> {
        dotenvy::dotenv().ok();
        Self::from_env()
    }

    pub fn from_env() -> Result<Self> {
        let page_size = required("TALLY_PAGE_SIZE")?;
        let page_size = page_size.parse().map_err(|_| {
            IngestError::config(format!("TALLY_PAGE_SIZE must be a positive integer, got '{}'", page_size))
        })?;

        let config = Self {
            tenant: TenantId::new(required("TALLY_TENANT_ID")?),
            project_id: required("TALLY_PROJECT_ID")?,
            bucket: required("TALLY_BUCKET")?,
            page_size,
            token_url: optional("TALLY_TOKEN_URL", DEFAULT_TOKEN_URL),
            api_base: optional("TALLY_API_BASE", DEFAULT_API_BASE),
            tenant_header: optional("TALLY_TENANT_HEADER", DEFAULT_TENANT_HEADER),
            pagination: optional("TALLY_PAGINATION", "page").parse()?,
            rate_limit_calls: parsed("TALLY_RATE_LIMIT_CALLS", DEFAULT_RATE_LIMIT_CALLS)?,
            rate_limit_period_secs: parsed(
                "TALLY_RATE_LIMIT_PERIOD_SECS",
                DEFAULT_RATE_LIMIT_PERIOD_SECS,
            )?,
            max_attempts: parsed("TALLY_MAX_ATTEMPTS", DEFAULT_MAX_ATTEMPTS)?,
            backoff_base_ms: parsed("TALLY_BACKOFF_BASE_MS", DEFAULT_BACKOFF_BASE_MS)?,
            max_rate_limit_retries: parsed(
                "TALLY_MAX_RATE_LIMIT_RETRIES",
                DEFAULT_MAX_RATE_LIMIT_RETRIES,
            )?,
            request_timeout_secs: parsed(
                "TALLY_REQUEST_TIMEOUT_SECS",
                DEFAULT_REQUEST_TIMEOUT_SECS,
            )?,
            secrets_dir: PathBuf::from(optional("TALLY_SECRETS_DIR", DEFAULT_SECRETS_DIR)),
            endpoints_file: std::env::var("TALLY_ENDPOINTS_FILE")
                .ok()
                .filter(|v| !v.trim().is_empty())
                .map(PathBuf::from),
            client_id_secret: optional(
                "TALLY_APP_CLIENT_ID_SECRET",
                crate::auth::store::DEFAULT_CLIENT_ID_SECRET,
            ),
            client_secret_secret: optional(
                "TALLY_APP_CLIENT_SECRET_SECRET",
                crate::auth::store::DEFAULT_CLIENT_SECRET_SECRET,
            ),
            storage: S3Config::from_env(),
        };

        config.validate()?;
        Ok(config)
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        if self.page_size == 0 {
            return Err(IngestError::config("TALLY_PAGE_SIZE must be greater than 0"));
        }
        if self.rate_limit_calls == 0 || self.rate_limit_period_secs == 0 {
            return Err(IngestError::config(
                "Rate limit calls and period must be greater than 0",
            ));
        }
        if self.max_attempts == 0 {
            return Err(IngestError::config("TALLY_MAX_ATTEMPTS must be greater than 0"));
        }
        if self.request_timeout_secs == 0 {
            return Err(IngestError::config(
                "TALLY_REQUEST_TIMEOUT_SECS must be greater than 0",
            ));
        }
        for (name, url) in [("TALLY_TOKEN_URL", &self.token_url), ("TALLY_API_BASE", &self.api_base)] {
            if !(url.starts_with("http://") || url.starts_with("https://")) {
                return Err(IngestError::config(format!("{} must be an http(s) URL", name)));
            }
        }
        Ok(())
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.max_attempts,
            backoff_base: Duration::from_millis(self.backoff_base_ms),
            max_rate_limit_retries: self.max_rate_limit_retries,
        }
    }

    pub fn fetch_config(&self) -> FetchConfig {
        FetchConfig::new(self.page_size)
            .with_pagination(self.pagination)
            .with_tenant_header(self.tenant_header.clone())
            .with_retry(self.retry_policy())
    }

    pub fn rate_limiter(&self) -> RateLimiter {
        RateLimiter::new(
            self.rate_limit_calls,
            Duration::from_secs(self.rate_limit_period_secs),
        )
    }

    pub fn http_client(&self) -> Result<reqwest::Client> {
        reqwest::Client::builder()
            .timeout(Duration::from_secs(self.request_timeout_secs))
            .user_agent(concat!("tally-ingest/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| IngestError::config(format!("Failed to build HTTP client: {}", e)))
    }

    /// The TOML catalogue if configured, else the built-in one
    pub fn endpoints(&self) -> Result<Vec<EndpointDescriptor>> {
        match &self.endpoints_file {
            Some(path) => endpoints::load_catalogue(path, &self.api_base),
            None => Ok(endpoints::default_catalogue(&self.api_base)),
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use serial_test::serial;

    const VARS: &[&str] = &[
        "TALLY_TENANT_ID",
        "TALLY_PROJECT_ID",
        "TALLY_BUCKET",
        "TALLY_PAGE_SIZE",
        "TALLY_PAGINATION",
        "TALLY_RATE_LIMIT_CALLS",
        "TALLY_ENDPOINTS_FILE",
    ];

    fn clear() {
        for var in VARS {
            std::env::remove_var(var);
        }
    }

    fn set_required() {
        std::env::set_var("TALLY_TENANT_ID", "acme");
        std::env::set_var("TALLY_PROJECT_ID", "warehouse");
        std::env::set_var("TALLY_BUCKET", "acme-raw");
        std::env::set_var("TALLY_PAGE_SIZE", "100");
    }

    #[test]
    #[serial]
    fn test_from_env_defaults() {
        clear();
        set_required();

        let config = IngestConfig::from_env().unwrap();
        assert_eq!(config.tenant.as_str(), "acme");
        assert_eq!(config.page_size, 100);
        assert_eq!(config.pagination, PageParam::Page);
        assert_eq!(config.rate_limit_calls, 60);
        assert_eq!(config.rate_limit_period_secs, 60);
        assert_eq!(config.retry_policy(), RetryPolicy::default());
        assert_eq!(config.token_url, DEFAULT_TOKEN_URL);
        assert_eq!(config.endpoints().unwrap().len(), 32);

        clear();
    }

    #[test]
    #[serial]
    fn test_missing_required_is_fatal() {
        clear();
        set_required();
        std::env::remove_var("TALLY_BUCKET");

        let err = IngestConfig::from_env().unwrap_err();
        assert!(err.to_string().contains("TALLY_BUCKET"));

        clear();
    }

    #[test]
    #[serial]
    fn test_invalid_values_rejected() {
        clear();
        set_required();

        std::env::set_var("TALLY_PAGE_SIZE", "0");
        assert!(IngestConfig::from_env().is_err());

        std::env::set_var("TALLY_PAGE_SIZE", "lots");
        assert!(IngestConfig::from_env().is_err());

        std::env::set_var("TALLY_PAGE_SIZE", "50");
        std::env::set_var("TALLY_PAGINATION", "cursor");
        assert!(IngestConfig::from_env().is_err());

        std::env::set_var("TALLY_PAGINATION", "offset");
        std::env::set_var("TALLY_RATE_LIMIT_CALLS", "many");
        assert!(IngestConfig::from_env().is_err());

        clear();
    }

    #[test]
    #[serial]
    fn test_endpoints_file_override() {
        clear();
        set_required();
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("endpoints.toml");
        std::fs::write(&path, "[[endpoints]]\nname = \"invoices\"\nurl = \"Invoices\"\n").unwrap();
        std::env::set_var("TALLY_ENDPOINTS_FILE", &path);

        let endpoints = IngestConfig::from_env().unwrap().endpoints().unwrap();
        assert_eq!(endpoints.len(), 1);
        assert_eq!(endpoints[0].url, "https://api.xero.com/api.xro/2.0/Invoices");

        clear();
    }
}
