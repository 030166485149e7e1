//! `POST /runs`

use super::AppState;
use crate::config::TRIGGER_SECRET_HEADER;
use crate::error::AppError;
use axum::{
    extract::State,
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use subtle::ConstantTimeEq;
use tally_common::types::RunStatus;
use tracing::{info, warn};

fn authorize(headers: &HeaderMap, expected: &str) -> Result<(), AppError> {
    let provided = headers
        .get(TRIGGER_SECRET_HEADER)
        .map(|value| value.as_bytes())
        .unwrap_or_default();

    if bool::from(provided.ct_eq(expected.as_bytes())) {
        Ok(())
    } else {
        warn!("Rejected run trigger with missing or invalid secret");
        Err(AppError::Unauthorized("Invalid trigger secret".to_string()))
    }
}

/// Run every configured endpoint once and return the report.
///
/// 200 when at least one endpoint did not fail, 502 when all failed.
pub async fn trigger_run(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Response, AppError> {
    authorize(&headers, &state.trigger_secret)?;

    let guard = state
        .run_lock
        .clone()
        .try_lock_owned()
        .map_err(|_| AppError::Conflict("An ingestion run is already in progress".to_string()))?;

    info!(endpoints = state.endpoints.len(), "Run triggered over HTTP");

    // Detached so a dropped connection does not abandon the run half way.
    let orchestrator = state.orchestrator.clone();
    let endpoints = state.endpoints.clone();
    let report = tokio::spawn(async move {
        let _guard = guard;
        orchestrator.run(&endpoints).await
    })
    .await
    .map_err(|e| AppError::Internal(format!("Run task failed: {}", e)))?;

    let status = match report.status() {
        RunStatus::Failed => StatusCode::BAD_GATEWAY,
        RunStatus::Succeeded | RunStatus::Partial => StatusCode::OK,
    };

    Ok((status, Json(report)).into_response())
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_authorize() {
        let mut headers = HeaderMap::new();
        assert!(authorize(&headers, "s3cret").is_err());

        headers.insert(TRIGGER_SECRET_HEADER, "wrong".parse().unwrap());
        assert!(authorize(&headers, "s3cret").is_err());

        headers.insert(TRIGGER_SECRET_HEADER, "s3cret".parse().unwrap());
        assert!(authorize(&headers, "s3cret").is_ok());
    }
}
