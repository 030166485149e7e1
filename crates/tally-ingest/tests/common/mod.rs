//! Shared fixtures for ingestion integration tests
#![allow(dead_code, clippy::unwrap_used, clippy::expect_used)]

use serde_json::{json, Value};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tally_common::types::{EndpointDescriptor, TenantId};
use tally_ingest::auth::{HttpIdentityProvider, TokenManager, TokenStore};
use tally_ingest::config::IngestConfig;
use tally_ingest::fetcher::{FetchConfig, PageParam, PaginatedFetcher, RetryPolicy};
use tally_ingest::rate_limit::RateLimiter;
use tally_ingest::secrets::MemorySecretBackend;
use tally_ingest::sink::S3Config;

pub const TENANT: &str = "acme";
pub const BUCKET: &str = "acme-raw";
pub const TOKEN_SECRET: &str = "client-acme-token";

pub fn tenant() -> TenantId {
    TenantId::from(TENANT)
}

/// Token secret payload expiring `expires_in_secs` from now (negative = expired)
pub fn token_payload(access_token: &str, expires_in_secs: i64) -> String {
    let expires_at = chrono::Utc::now().timestamp() + expires_in_secs;
    json!({
        "access_token": access_token,
        "refresh_token": "refresh-1",
        "expires_in": 1800,
        "token_type": "Bearer",
        "scope": "offline_access accounting.transactions.read",
        "expires_at": expires_at as f64
    })
    .to_string()
}

/// Backend holding app credentials and a token for [`TENANT`]
pub fn secrets(access_token: &str, expires_in_secs: i64) -> Arc<MemorySecretBackend> {
    Arc::new(
        MemorySecretBackend::new()
            .with_secret("app-client-id", "tally-app")
            .with_secret("app-client-secret", "tally-app-secret")
            .with_secret(TOKEN_SECRET, token_payload(access_token, expires_in_secs)),
    )
}

pub fn fast_retry() -> RetryPolicy {
    RetryPolicy {
        max_attempts: 5,
        backoff_base: Duration::from_millis(1),
        max_rate_limit_retries: 3,
    }
}

pub fn grant_response(access_token: &str) -> Value {
    json!({
        "access_token": access_token,
        "refresh_token": "refresh-2",
        "expires_in": 1800,
        "token_type": "Bearer",
        "scope": "offline_access accounting.transactions.read"
    })
}

pub fn token_manager(token_url: &str, secrets: Arc<MemorySecretBackend>) -> Arc<TokenManager> {
    let provider = HttpIdentityProvider::new(reqwest::Client::new(), token_url);
    Arc::new(TokenManager::new(TokenStore::new(secrets), Arc::new(provider)))
}

pub fn fetcher(
    server_uri: &str,
    secrets: Arc<MemorySecretBackend>,
    page_size: usize,
    pagination: PageParam,
) -> PaginatedFetcher {
    let config = FetchConfig::new(page_size)
        .with_pagination(pagination)
        .with_retry(fast_retry());
    PaginatedFetcher::new(
        reqwest::Client::new(),
        token_manager(&format!("{}/connect/token", server_uri), secrets),
        Arc::new(RateLimiter::new(1000, Duration::from_secs(60))),
        config,
    )
}

pub fn endpoint(server_uri: &str, name: &str, path: &str) -> EndpointDescriptor {
    EndpointDescriptor::new(name, format!("{}/api.xro/2.0/{}", server_uri, path))
}

/// Settings pointing every outbound call at `server_uri`
pub fn ingest_config(server_uri: &str, page_size: usize) -> IngestConfig {
    IngestConfig {
        tenant: tenant(),
        project_id: "warehouse".to_string(),
        bucket: BUCKET.to_string(),
        page_size,
        token_url: format!("{}/connect/token", server_uri),
        api_base: format!("{}/api.xro/2.0/", server_uri),
        tenant_header: "xero-tenant-id".to_string(),
        pagination: PageParam::Page,
        rate_limit_calls: 1000,
        rate_limit_period_secs: 60,
        max_attempts: 3,
        backoff_base_ms: 1,
        max_rate_limit_retries: 3,
        request_timeout_secs: 5,
        secrets_dir: PathBuf::from("./unused"),
        endpoints_file: None,
        client_id_secret: "app-client-id".to_string(),
        client_secret_secret: "app-client-secret".to_string(),
        storage: S3Config::default(),
    }
}

/// `n` invoices numbered from `start`
pub fn invoices(start: usize, n: usize) -> Vec<Value> {
    (start..start + n)
        .map(|i| json!({"InvoiceID": i.to_string(), "Total": i * 10}))
        .collect()
}
