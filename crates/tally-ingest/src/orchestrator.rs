//! Ingestion orchestrator
//!
//! Fans out one task per endpoint. Each task fetches every page, stamps the
//! records with a single `ingestion_time` and writes one NDJSON object. A
//! failing endpoint is recorded in the report and never cancels or delays its
//! siblings.

use crate::auth::{HttpIdentityProvider, TokenManager, TokenStore};
use crate::config::IngestConfig;
use crate::error::Result;
use crate::fetcher::PaginatedFetcher;
use crate::secrets::{FsSecretBackend, SecretBackend};
use crate::sink::{ObjectSink, S3Sink, NDJSON_CONTENT_TYPE};
use futures::future::join_all;
use std::sync::Arc;
use tally_common::types::{
    EndpointDescriptor, EndpointRunResult, ErrorKind, IngestionBatch, RunReport, TenantId,
};
use tracing::{error, info, instrument, warn};

#[derive(Clone)]
pub struct IngestionOrchestrator {
    fetcher: Arc<PaginatedFetcher>,
    sink: Arc<dyn ObjectSink>,
    bucket: String,
    tenant: TenantId,
}

impl IngestionOrchestrator {
    pub fn new(
        fetcher: Arc<PaginatedFetcher>,
        sink: Arc<dyn ObjectSink>,
        bucket: impl Into<String>,
        tenant: TenantId,
    ) -> Self {
        Self {
            fetcher,
            sink,
            bucket: bucket.into(),
            tenant,
        }
    }

    /// Wire the production stack: filesystem secrets, HTTP identity provider,
    /// S3 sink.
    pub async fn from_config(config: &IngestConfig) -> Result<Self> {
        let backend: Arc<dyn SecretBackend> = Arc::new(FsSecretBackend::new(&config.secrets_dir));
        let sink = Arc::new(S3Sink::new(config.storage.clone()).await);
        Self::with_backends(config, backend, sink)
    }

    /// Wire the stack over the given secret backend and sink
    pub fn with_backends(
        config: &IngestConfig,
        secrets: Arc<dyn SecretBackend>,
        sink: Arc<dyn ObjectSink>,
    ) -> Result<Self> {
        let client = config.http_client()?;
        let store = TokenStore::new(secrets)
            .with_credential_ids(&config.client_id_secret, &config.client_secret_secret);
        let provider = Arc::new(HttpIdentityProvider::new(client.clone(), &config.token_url));
        let tokens = Arc::new(TokenManager::new(store, provider));
        let fetcher = PaginatedFetcher::new(
            client,
            tokens,
            Arc::new(config.rate_limiter()),
            config.fetch_config(),
        );

        Ok(Self::new(
            Arc::new(fetcher),
            sink,
            &config.bucket,
            config.tenant.clone(),
        ))
    }

    pub fn tenant(&self) -> &TenantId {
        &self.tenant
    }

    pub fn bucket(&self) -> &str {
        &self.bucket
    }

    /// Run every endpoint concurrently and report each outcome
    #[instrument(skip(self, endpoints), fields(tenant = %self.tenant, endpoints = endpoints.len()))]
    pub async fn run(&self, endpoints: &[EndpointDescriptor]) -> RunReport {
        let mut report = RunReport::new(self.tenant.clone());
        info!(run_id = %report.run_id, "Starting ingestion run");

        let (names, tasks): (Vec<_>, Vec<_>) = endpoints
            .iter()
            .cloned()
            .map(|endpoint| {
                let this = self.clone();
                let name = endpoint.name.clone();
                let task = tokio::spawn(async move { this.run_endpoint(&endpoint).await });
                (name, task)
            })
            .unzip();

        for (name, joined) in names.into_iter().zip(join_all(tasks).await) {
            let outcome = joined.unwrap_or_else(|e| {
                error!(endpoint = %name, error = %e, "Endpoint task aborted");
                EndpointRunResult::failed(ErrorKind::Internal, format!("task aborted: {}", e))
            });
            report.record(name, outcome);
        }

        let report = report.finish();
        info!(
            run_id = %report.run_id,
            status = ?report.status(),
            written = report.written_count(),
            failed = report.failed_count(),
            records = report.total_records(),
            "Ingestion run finished"
        );
        report
    }

    /// Ingest one endpoint, folding any error into the outcome
    pub async fn run_endpoint(&self, endpoint: &EndpointDescriptor) -> EndpointRunResult {
        match self.ingest(endpoint).await {
            Ok(outcome) => outcome,
            Err(e) => {
                error!(endpoint = %endpoint.name, kind = ?e.kind(), error = %e, "Endpoint failed");
                EndpointRunResult::failed(e.kind(), e.to_string())
            },
        }
    }

    #[instrument(skip(self, endpoint), fields(endpoint = %endpoint.name))]
    async fn ingest(&self, endpoint: &EndpointDescriptor) -> Result<EndpointRunResult> {
        let raw = self.fetcher.fetch_all(endpoint, &self.tenant).await?;
        if raw.is_empty() {
            warn!("No data found for endpoint");
            return Ok(EndpointRunResult::NoData);
        }

        let batch = IngestionBatch::stamp(raw);
        let content = batch.to_ndjson()?;
        let upload = self
            .sink
            .write(
                &self.bucket,
                &endpoint.object_key(),
                content.into_bytes(),
                NDJSON_CONTENT_TYPE,
            )
            .await?;

        info!(
            records = batch.len(),
            key = %upload.key,
            bytes = upload.size,
            "Endpoint written"
        );
        Ok(EndpointRunResult::Written {
            records: batch.len(),
            key: upload.key,
            size: upload.size,
            checksum: upload.checksum,
        })
    }
}
