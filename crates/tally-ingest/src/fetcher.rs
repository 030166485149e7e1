//! Paginated, rate-limited retrieval of one endpoint
//!
//! Every page request re-acquires a token and a rate-limiter slot, so a long
//! fetch survives token expiry and shares the quota fairly with its siblings.
//!
//! # Retry policy
//!
//! | Response | Handling |
//! |----------|----------|
//! | 2xx | parse, extract records |
//! | 429 | wait `Retry-After` (or backoff), separate retry budget |
//! | 5xx, transport error | backoff `base * 2^(n-1)`, up to `max_attempts` |
//! | other | [`IngestError::Upstream`] immediately |

use crate::auth::TokenManager;
use crate::error::{IngestError, Result};
use crate::rate_limit::RateLimiter;
use reqwest::header::{HeaderMap, ACCEPT, RETRY_AFTER};
use reqwest::StatusCode;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tally_common::types::{EndpointDescriptor, TenantId};
use tracing::{debug, info, instrument, warn};

/// Default number of attempts for 5xx and transport failures
pub const DEFAULT_MAX_ATTEMPTS: u32 = 5;

/// Default first backoff delay
pub const DEFAULT_BACKOFF_BASE: Duration = Duration::from_millis(1000);

/// Default number of 429 responses tolerated for one page
pub const DEFAULT_MAX_RATE_LIMIT_RETRIES: u32 = 10;

/// Default tenant header sent with every source request
pub const DEFAULT_TENANT_HEADER: &str = "xero-tenant-id";

/// Longest error body kept in an [`IngestError::Upstream`]
const MAX_ERROR_BODY: usize = 512;

// ============================================================================
// Pagination
// ============================================================================

/// Query scheme used to walk pages
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PageParam {
    /// `page=1,2,3..&pageSize=n`
    #[default]
    Page,
    /// `offset=0,n,2n..&pageSize=n`
    Offset,
}

impl PageParam {
    fn first(self) -> usize {
        match self {
            PageParam::Page => 1,
            PageParam::Offset => 0,
        }
    }

    fn next(self, cursor: usize, page_size: usize) -> usize {
        match self {
            PageParam::Page => cursor + 1,
            PageParam::Offset => cursor + page_size,
        }
    }

    fn name(self) -> &'static str {
        match self {
            PageParam::Page => "page",
            PageParam::Offset => "offset",
        }
    }
}

impl std::str::FromStr for PageParam {
    type Err = IngestError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "page" => Ok(PageParam::Page),
            "offset" => Ok(PageParam::Offset),
            other => Err(IngestError::config(format!(
                "Unknown pagination scheme '{}', expected 'page' or 'offset'",
                other
            ))),
        }
    }
}

/// One page of records plus the cursor that produced it
#[derive(Debug, Clone)]
pub struct FetchBatch {
    pub cursor: usize,
    pub records: Vec<Value>,
    /// Pagination metadata reported this as the final page
    pub last_page: bool,
}

impl FetchBatch {
    /// Split a page body into records according to the endpoint's payload field.
    ///
    /// A top-level array is the payload. Otherwise the array under
    /// [`EndpointDescriptor::payload_key`] is; a missing key is an empty page.
    pub fn from_body(endpoint: &EndpointDescriptor, cursor: usize, body: Value) -> Result<Self> {
        let last_page = reports_last_page(&body);

        let records = match body {
            Value::Array(items) => items,
            Value::Object(mut map) => {
                let key = endpoint.payload_key();
                match map.remove(key) {
                    Some(Value::Array(items)) => items,
                    None | Some(Value::Null) => Vec::new(),
                    Some(other) => {
                        return Err(IngestError::payload(format!(
                            "{}: field '{}' is {}, expected an array",
                            endpoint.name,
                            key,
                            json_type(&other)
                        )))
                    },
                }
            },
            other => {
                return Err(IngestError::payload(format!(
                    "{}: response body is {}, expected an object or array",
                    endpoint.name,
                    json_type(&other)
                )))
            },
        };

        Ok(Self {
            cursor,
            records,
            last_page,
        })
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

/// `{"pagination": {"page": n, "pageCount": m}}` with `n >= m`
fn reports_last_page(body: &Value) -> bool {
    let Some(pagination) = body.get("pagination") else {
        return false;
    };
    match (
        pagination.get("page").and_then(Value::as_u64),
        pagination.get("pageCount").and_then(Value::as_u64),
    ) {
        (Some(page), Some(count)) => page >= count,
        _ => false,
    }
}

fn json_type(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

// ============================================================================
// Retry
// ============================================================================

/// Attempt budgets and backoff for page requests
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub backoff_base: Duration,
    pub max_rate_limit_retries: u32,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            backoff_base: DEFAULT_BACKOFF_BASE,
            max_rate_limit_retries: DEFAULT_MAX_RATE_LIMIT_RETRIES,
        }
    }
}

impl RetryPolicy {
    /// Delay after the `attempt`-th failure (1-based): `base * 2^(attempt-1)`
    pub fn backoff(&self, attempt: u32) -> Duration {
        let exp = attempt.saturating_sub(1).min(16);
        self.backoff_base.saturating_mul(1u32 << exp)
    }
}

fn retry_after(headers: &HeaderMap) -> Option<Duration> {
    headers
        .get(RETRY_AFTER)?
        .to_str()
        .ok()?
        .trim()
        .parse::<u64>()
        .ok()
        .map(Duration::from_secs)
}

// ============================================================================
// Fetcher
// ============================================================================

/// Request shape shared by every endpoint
#[derive(Debug, Clone)]
pub struct FetchConfig {
    pub page_size: usize,
    pub pagination: PageParam,
    pub tenant_header: String,
    pub retry: RetryPolicy,
}

impl FetchConfig {
    pub fn new(page_size: usize) -> Self {
        Self {
            page_size: page_size.max(1),
            pagination: PageParam::default(),
            tenant_header: DEFAULT_TENANT_HEADER.to_string(),
            retry: RetryPolicy::default(),
        }
    }

    pub fn with_pagination(mut self, pagination: PageParam) -> Self {
        self.pagination = pagination;
        self
    }

    pub fn with_tenant_header(mut self, header: impl Into<String>) -> Self {
        self.tenant_header = header.into();
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }
}

/// Fetches every page of an endpoint
pub struct PaginatedFetcher {
    client: reqwest::Client,
    tokens: Arc<TokenManager>,
    limiter: Arc<RateLimiter>,
    config: FetchConfig,
}

impl PaginatedFetcher {
    pub fn new(
        client: reqwest::Client,
        tokens: Arc<TokenManager>,
        limiter: Arc<RateLimiter>,
        config: FetchConfig,
    ) -> Self {
        Self {
            client,
            tokens,
            limiter,
            config,
        }
    }

    pub fn config(&self) -> &FetchConfig {
        &self.config
    }

    /// All records of the endpoint, pages in cursor order.
    ///
    /// Stops after an empty page, a short page, or a page the pagination
    /// metadata marks as last.
    #[instrument(skip(self, endpoint), fields(endpoint = %endpoint.name, tenant = %tenant))]
    pub async fn fetch_all(
        &self,
        endpoint: &EndpointDescriptor,
        tenant: &TenantId,
    ) -> Result<Vec<Value>> {
        let page_size = self.config.page_size;
        let scheme = self.config.pagination;
        let mut cursor = scheme.first();
        let mut records = Vec::new();
        let mut pages = 0usize;

        loop {
            let batch = self.fetch_page(endpoint, tenant, cursor).await?;
            pages += 1;
            let count = batch.len();
            debug!(cursor, count, "Fetched page");
            records.extend(batch.records);

            if count == 0 || count < page_size || batch.last_page {
                break;
            }
            cursor = scheme.next(cursor, page_size);
        }

        info!(pages, records = records.len(), "Fetched endpoint");
        Ok(records)
    }

    /// One page, retried per [`RetryPolicy`]
    pub async fn fetch_page(
        &self,
        endpoint: &EndpointDescriptor,
        tenant: &TenantId,
        cursor: usize,
    ) -> Result<FetchBatch> {
        let retry = self.config.retry;
        let mut failures = 0u32;
        let mut throttled = 0u32;

        loop {
            let token = self.tokens.get_token(tenant).await?;
            self.limiter.acquire().await;

            let sent = self
                .client
                .get(&endpoint.url)
                .bearer_auth(&token.access_token)
                .header(self.config.tenant_header.as_str(), tenant.as_str())
                .header(ACCEPT, "application/json")
                .query(&[
                    (self.config.pagination.name(), cursor),
                    ("pageSize", self.config.page_size),
                ])
                .send()
                .await;

            let response = match sent {
                Ok(response) => response,
                Err(e) => {
                    failures += 1;
                    throttled = 0;
                    self.back_off(endpoint, failures, format!("request failed: {}", e)).await?;
                    continue;
                },
            };

            let status = response.status();

            if status.is_success() {
                let bytes = match response.bytes().await {
                    Ok(bytes) => bytes,
                    // Connection dropped or timed out mid-body
                    Err(e) => {
                        failures += 1;
                        throttled = 0;
                        self.back_off(endpoint, failures, format!("reading body failed: {}", e))
                            .await?;
                        continue;
                    },
                };
                let body: Value = serde_json::from_slice(&bytes).map_err(|e| {
                    IngestError::payload(format!("{}: invalid JSON body: {}", endpoint.name, e))
                })?;
                return FetchBatch::from_body(endpoint, cursor, body);
            }

            if status == StatusCode::TOO_MANY_REQUESTS {
                throttled += 1;
                if throttled > retry.max_rate_limit_retries {
                    return Err(IngestError::Transient {
                        attempts: failures + throttled,
                        last_error: format!("rate limited ({})", status),
                    });
                }
                let delay = retry_after(response.headers()).unwrap_or_else(|| retry.backoff(throttled));
                warn!(
                    endpoint = %endpoint.name,
                    cursor,
                    delay_ms = delay.as_millis() as u64,
                    "Rate limited by upstream, backing off"
                );
                tokio::time::sleep(delay).await;
                continue;
            }

            if status.is_server_error() {
                failures += 1;
                throttled = 0;
                self.back_off(endpoint, failures, format!("HTTP {}", status)).await?;
                continue;
            }

            let url = response.url().to_string();
            let mut body = response.text().await.unwrap_or_default();
            if body.len() > MAX_ERROR_BODY {
                let mut end = MAX_ERROR_BODY;
                while !body.is_char_boundary(end) {
                    end -= 1;
                }
                body.truncate(end);
            }
            return Err(IngestError::Upstream {
                status: status.as_u16(),
                url,
                body,
            });
        }
    }

    /// Sleep before the next attempt, or give up once the attempt budget is spent
    async fn back_off(
        &self,
        endpoint: &EndpointDescriptor,
        failures: u32,
        last_error: String,
    ) -> Result<()> {
        let retry = self.config.retry;
        if failures >= retry.max_attempts {
            return Err(IngestError::Transient {
                attempts: failures,
                last_error,
            });
        }
        let delay = retry.backoff(failures);
        warn!(
            endpoint = %endpoint.name,
            attempt = failures,
            delay_ms = delay.as_millis() as u64,
            error = %last_error,
            "Request failed, retrying"
        );
        tokio::time::sleep(delay).await;
        Ok(())
    }
}
