//! Token lifecycle against a mock identity provider
#![allow(clippy::unwrap_used, clippy::expect_used)]

mod common;

use common::*;
use tally_ingest::IngestError;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

#[tokio::test]
async fn test_cached_token_served_without_backend_call() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/connect/token"))
        .respond_with(ResponseTemplate::new(200).set_body_json(grant_response("unused")))
        .expect(0)
        .mount(&server)
        .await;

    let backend = secrets("stored-access", 600);
    let manager = token_manager(&format!("{}/connect/token", server.uri()), backend.clone());

    let first = manager.get_token(&tenant()).await.unwrap();
    let reads_after_first = backend.reads();
    let second = manager.get_token(&tenant()).await.unwrap();

    assert_eq!(first.access_token, "stored-access");
    assert_eq!(second.access_token, "stored-access");
    assert_eq!(reads_after_first, 1);
    assert_eq!(backend.reads(), reads_after_first);
    assert_eq!(backend.writes(), 0);
}

#[tokio::test]
async fn test_expired_token_refreshed_exactly_once_under_concurrency() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/connect/token"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(grant_response("fresh-access"))
                .set_delay(std::time::Duration::from_millis(50)),
        )
        .expect(1)
        .mount(&server)
        .await;

    let backend = secrets("stale-access", -60);
    let manager = token_manager(&format!("{}/connect/token", server.uri()), backend.clone());

    let tasks: Vec<_> = (0..25)
        .map(|_| {
            let manager = manager.clone();
            tokio::spawn(async move { manager.get_token(&tenant()).await })
        })
        .collect();

    for task in tasks {
        let token = task.await.unwrap().unwrap();
        assert_eq!(token.access_token, "fresh-access");
        assert_eq!(token.refresh_token, "refresh-2");
        assert!(token.is_valid());
    }

    // Refreshed material was persisted as a new version
    assert_eq!(backend.version_count(TOKEN_SECRET), 2);
    let stored: serde_json::Value =
        serde_json::from_slice(&backend.latest(TOKEN_SECRET).unwrap()).unwrap();
    assert_eq!(stored["access_token"], "fresh-access");
    assert!(stored["expires_at"].as_f64().is_some());
}

#[tokio::test]
async fn test_refresh_rejection_surfaces_and_caches_nothing() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/connect/token"))
        .respond_with(ResponseTemplate::new(401).set_body_string("invalid_client"))
        .expect(2)
        .mount(&server)
        .await;

    let backend = secrets("stale-access", -60);
    let manager = token_manager(&format!("{}/connect/token", server.uri()), backend.clone());

    for _ in 0..2 {
        let err = manager.get_token(&tenant()).await.unwrap_err();
        assert!(matches!(err, IngestError::TokenRefreshFailed { .. }), "{err:?}");
    }
    assert!(manager.cache().is_empty());
    assert_eq!(backend.writes(), 0);
}

#[tokio::test]
async fn test_unknown_tenant_is_unavailable() {
    let backend = secrets("stored-access", 600);
    let manager = token_manager("http://127.0.0.1:9/connect/token", backend);

    let err = manager
        .get_token(&tally_common::types::TenantId::from("globex"))
        .await
        .unwrap_err();
    assert!(matches!(err, IngestError::TokenUnavailable { ref tenant } if tenant == "globex"));
}
