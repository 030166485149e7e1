//! Common types used across Tally

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use uuid::Uuid;

use crate::error::Result;

/// Field injected into every persisted record.
pub const INGESTION_TIME_FIELD: &str = "ingestion_time";

/// Key used when a non-object record has to be wrapped before stamping.
pub const WRAPPED_VALUE_FIELD: &str = "value";

// ============================================================================
// Tenants and Tokens
// ============================================================================

/// Opaque identifier of one customer organization.
///
/// Keys every piece of per-tenant state: token secrets, the tenant header sent
/// to the source API, and the run report.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TenantId(String);

impl TenantId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for TenantId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for TenantId {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

impl From<String> for TenantId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl AsRef<str> for TenantId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// OAuth token material for one tenant.
///
/// `expires_at` is always populated: a stored record without it gets the
/// Unix epoch, so it counts as expired and is refreshed before it reaches a
/// cache. A record is replaced wholesale on refresh and never mutated in place.
#[derive(Clone, PartialEq, Eq)]
pub struct TokenRecord {
    pub access_token: String,
    pub refresh_token: String,
    pub token_type: String,
    pub scope: String,
    pub expires_at: DateTime<Utc>,
}

impl TokenRecord {
    /// A record is valid while its expiry lies strictly in the future.
    pub fn is_valid_at(&self, now: DateTime<Utc>) -> bool {
        self.expires_at > now
    }

    pub fn is_valid(&self) -> bool {
        self.is_valid_at(Utc::now())
    }

    /// Value for the `Authorization` header of source API calls.
    pub fn bearer(&self) -> String {
        format!("Bearer {}", self.access_token)
    }
}

// Token strings never reach logs.
impl std::fmt::Debug for TokenRecord {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenRecord")
            .field("access_token", &"<redacted>")
            .field("refresh_token", &"<redacted>")
            .field("token_type", &self.token_type)
            .field("scope", &self.scope)
            .field("expires_at", &self.expires_at)
            .finish()
    }
}

// ============================================================================
// Endpoints
// ============================================================================

/// One paginated resource of the source API.
///
/// Loaded once at startup and never mutated afterwards.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EndpointDescriptor {
    /// Unique name; also the object key stem and warehouse table suffix
    pub name: String,

    /// Absolute resource URL
    pub url: String,

    /// Response field holding the page's records.
    ///
    /// Defaults to the last path segment of `url` when unset.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payload_field: Option<String>,
}

impl EndpointDescriptor {
    pub fn new(name: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            url: url.into(),
            payload_field: None,
        }
    }

    pub fn with_payload_field(mut self, field: impl Into<String>) -> Self {
        self.payload_field = Some(field.into());
        self
    }

    /// Field name the page's records are read from.
    pub fn payload_key(&self) -> &str {
        match &self.payload_field {
            Some(field) => field,
            None => self
                .url
                .split(['?', '#'])
                .next()
                .unwrap_or_default()
                .trim_end_matches('/')
                .rsplit('/')
                .next()
                .unwrap_or_default(),
        }
    }

    /// Object-store key the endpoint's NDJSON is written to.
    pub fn object_key(&self) -> String {
        format!("{}.json", self.name)
    }
}

// ============================================================================
// Ingestion Records
// ============================================================================

/// An upstream record with its injected `ingestion_time`.
///
/// Serializes as the upstream fields plus `ingestion_time`. An upstream field
/// of the same name is overwritten.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct IngestionRecord {
    #[serde(flatten)]
    fields: Map<String, Value>,
    ingestion_time: String,
}

impl IngestionRecord {
    pub fn new(raw: Value, ingestion_time: impl Into<String>) -> Self {
        let mut fields = match raw {
            Value::Object(map) => map,
            other => {
                let mut map = Map::new();
                map.insert(WRAPPED_VALUE_FIELD.to_string(), other);
                map
            },
        };
        fields.remove(INGESTION_TIME_FIELD);

        Self {
            fields,
            ingestion_time: ingestion_time.into(),
        }
    }

    pub fn fields(&self) -> &Map<String, Value> {
        &self.fields
    }

    pub fn ingestion_time(&self) -> &str {
        &self.ingestion_time
    }
}

/// All records of one endpoint run, stamped with a single timestamp.
#[derive(Debug, Clone)]
pub struct IngestionBatch {
    ingestion_time: DateTime<Utc>,
    records: Vec<IngestionRecord>,
}

impl IngestionBatch {
    /// Stamp raw records with the current time
    pub fn stamp(raw: Vec<Value>) -> Self {
        Self::stamp_at(raw, Utc::now())
    }

    /// Stamp raw records with a fixed time
    pub fn stamp_at(raw: Vec<Value>, ingestion_time: DateTime<Utc>) -> Self {
        let stamp = ingestion_time.to_rfc3339_opts(SecondsFormat::Micros, true);
        let records = raw
            .into_iter()
            .map(|record| IngestionRecord::new(record, stamp.clone()))
            .collect();

        Self {
            ingestion_time,
            records,
        }
    }

    pub fn ingestion_time(&self) -> DateTime<Utc> {
        self.ingestion_time
    }

    pub fn records(&self) -> &[IngestionRecord] {
        &self.records
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Render as newline-delimited JSON, one record per `\n`-terminated line.
    pub fn to_ndjson(&self) -> Result<String> {
        let mut out = String::new();
        for record in &self.records {
            out.push_str(&serde_json::to_string(record)?);
            out.push('\n');
        }
        Ok(out)
    }
}

// ============================================================================
// Run Reports
// ============================================================================

/// Failure category reported for an endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Config,
    SecretBackend,
    TokenUnavailable,
    TokenRetrieval,
    TokenRefreshFailed,
    Upstream,
    Transient,
    Payload,
    Sink,
    Internal,
}

/// Outcome of one endpoint within a run. Never persisted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum EndpointRunResult {
    /// Records were fetched and written to the object store
    Written {
        records: usize,
        key: String,
        size: u64,
        checksum: String,
    },
    /// The endpoint returned no records; nothing was written
    NoData,
    /// The endpoint failed; siblings were unaffected
    Failed { kind: ErrorKind, message: String },
}

impl EndpointRunResult {
    pub fn failed(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self::Failed {
            kind,
            message: message.into(),
        }
    }

    pub fn is_failure(&self) -> bool {
        matches!(self, Self::Failed { .. })
    }

    pub fn record_count(&self) -> usize {
        match self {
            Self::Written { records, .. } => *records,
            _ => 0,
        }
    }
}

/// Overall status derived from the endpoint outcomes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    /// No endpoint failed
    Succeeded,
    /// Some endpoints failed, at least one did not
    Partial,
    /// Every endpoint failed
    Failed,
}

/// Per-endpoint summary of one orchestrator pass.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunReport {
    pub run_id: Uuid,
    pub tenant: TenantId,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub outcomes: BTreeMap<String, EndpointRunResult>,
}

impl RunReport {
    pub fn new(tenant: TenantId) -> Self {
        Self {
            run_id: Uuid::new_v4(),
            tenant,
            started_at: Utc::now(),
            finished_at: None,
            outcomes: BTreeMap::new(),
        }
    }

    pub fn record(&mut self, endpoint: impl Into<String>, result: EndpointRunResult) {
        self.outcomes.insert(endpoint.into(), result);
    }

    pub fn finish(mut self) -> Self {
        self.finished_at = Some(Utc::now());
        self
    }

    pub fn outcome(&self, endpoint: &str) -> Option<&EndpointRunResult> {
        self.outcomes.get(endpoint)
    }

    pub fn failed_count(&self) -> usize {
        self.outcomes.values().filter(|o| o.is_failure()).count()
    }

    pub fn written_count(&self) -> usize {
        self.outcomes
            .values()
            .filter(|o| matches!(o, EndpointRunResult::Written { .. }))
            .count()
    }

    pub fn total_records(&self) -> usize {
        self.outcomes.values().map(EndpointRunResult::record_count).sum()
    }

    pub fn status(&self) -> RunStatus {
        let failed = self.failed_count();
        if failed == 0 {
            RunStatus::Succeeded
        } else if failed == self.outcomes.len() {
            RunStatus::Failed
        } else {
            RunStatus::Partial
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use serde_json::json;

    #[test]
    fn test_payload_key_defaults_to_last_path_segment() {
        let endpoint =
            EndpointDescriptor::new("invoices", "https://api.example.com/api.xro/2.0/Invoices/");
        assert_eq!(endpoint.payload_key(), "Invoices");
        assert_eq!(endpoint.object_key(), "invoices.json");

        let report = EndpointDescriptor::new(
            "reports__trial_balance",
            "https://api.example.com/Reports/TrialBalance?date=2024-01-01",
        );
        assert_eq!(report.payload_key(), "TrialBalance");
        assert_eq!(report.with_payload_field("Reports").payload_key(), "Reports");
    }

    #[test]
    fn test_token_record_validity_and_redaction() {
        let now = Utc::now();
        let token = TokenRecord {
            access_token: "secret-access".to_string(),
            refresh_token: "secret-refresh".to_string(),
            token_type: "Bearer".to_string(),
            scope: "accounting.transactions".to_string(),
            expires_at: now + chrono::Duration::seconds(10),
        };

        assert!(token.is_valid_at(now));
        assert!(!token.is_valid_at(token.expires_at));
        assert_eq!(token.bearer(), "Bearer secret-access");

        let debug = format!("{:?}", token);
        assert!(!debug.contains("secret-access"));
        assert!(!debug.contains("secret-refresh"));
    }

    #[test]
    fn test_batch_stamps_every_record_identically() {
        let at = Utc.with_ymd_and_hms(2024, 3, 1, 12, 30, 0).unwrap();
        let batch = IngestionBatch::stamp_at(
            vec![
                json!({"InvoiceID": "1"}),
                json!({"InvoiceID": "2", "ingestion_time": "stale"}),
                json!(42),
            ],
            at,
        );

        let ndjson = batch.to_ndjson().unwrap();
        let lines: Vec<Value> = ndjson
            .lines()
            .map(|line| serde_json::from_str(line).unwrap())
            .collect();

        assert_eq!(lines.len(), 3);
        assert!(ndjson.ends_with('\n'));
        for line in &lines {
            assert_eq!(line["ingestion_time"], "2024-03-01T12:30:00.000000Z");
        }
        assert_eq!(lines[1]["InvoiceID"], "2");
        assert_eq!(lines[2]["value"], 42);
    }

    #[test]
    fn test_run_status() {
        let mut report = RunReport::new(TenantId::from("acme"));
        assert_eq!(report.status(), RunStatus::Succeeded);

        report.record("accounts", EndpointRunResult::NoData);
        report.record(
            "invoices",
            EndpointRunResult::Written {
                records: 102,
                key: "invoices.json".to_string(),
                size: 2048,
                checksum: "abc".to_string(),
            },
        );
        assert_eq!(report.status(), RunStatus::Succeeded);
        assert_eq!(report.total_records(), 102);

        report.record("contacts", EndpointRunResult::failed(ErrorKind::Upstream, "404"));
        assert_eq!(report.status(), RunStatus::Partial);
        assert_eq!(report.failed_count(), 1);
        assert_eq!(report.written_count(), 1);

        let mut all_failed = RunReport::new(TenantId::from("acme"));
        all_failed.record("contacts", EndpointRunResult::failed(ErrorKind::Transient, "500"));
        assert_eq!(all_failed.finish().status(), RunStatus::Failed);
    }

    #[test]
    fn test_outcome_serialization_is_tagged() {
        let value = serde_json::to_value(EndpointRunResult::failed(
            ErrorKind::TokenRefreshFailed,
            "invalid_grant",
        ))
        .unwrap();
        assert_eq!(value["outcome"], "failed");
        assert_eq!(value["kind"], "token_refresh_failed");
    }
}
