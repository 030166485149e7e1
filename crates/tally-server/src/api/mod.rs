pub mod runs;

use crate::config::ServerConfig;
use crate::error::AppError;
use crate::middleware;
use axum::{
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
    Router,
};
use std::sync::Arc;
use tally_common::types::EndpointDescriptor;
use tally_ingest::{config::IngestConfig, orchestrator::IngestionOrchestrator};
use tokio::sync::Mutex;

#[derive(Clone)]
pub struct AppState {
    pub orchestrator: Arc<IngestionOrchestrator>,
    pub endpoints: Arc<Vec<EndpointDescriptor>>,
    pub trigger_secret: Arc<str>,
    /// Held for the duration of a run
    pub run_lock: Arc<Mutex<()>>,
}

impl AppState {
    pub fn new(
        orchestrator: IngestionOrchestrator,
        endpoints: Vec<EndpointDescriptor>,
        trigger_secret: impl Into<Arc<str>>,
    ) -> Self {
        Self {
            orchestrator: Arc::new(orchestrator),
            endpoints: Arc::new(endpoints),
            trigger_secret: trigger_secret.into(),
            run_lock: Arc::new(Mutex::new(())),
        }
    }

    pub async fn from_config(server: &ServerConfig, ingest: &IngestConfig) -> Result<Self, AppError> {
        let endpoints = ingest.endpoints()?;
        let orchestrator = IngestionOrchestrator::from_config(ingest).await?;
        Ok(Self::new(orchestrator, endpoints, server.trigger_secret.as_str()))
    }
}

pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/runs", post(runs::trigger_run))
        .with_state(state)
        .layer(middleware::tracing_layer())
}

async fn health() -> impl IntoResponse {
    (StatusCode::OK, "OK")
}
