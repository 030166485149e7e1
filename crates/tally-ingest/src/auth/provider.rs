//! OAuth identity provider client (refresh-token grant only)

use super::store::ClientCredentials;
use crate::error::{IngestError, Result};
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use serde::Deserialize;
use tally_common::types::{TenantId, TokenRecord};
use tracing::{debug, instrument};

/// Lifetime assumed when the provider omits `expires_in`
pub const DEFAULT_EXPIRES_IN_SECS: i64 = 3600;

/// Provider response to a refresh grant
#[derive(Clone, Deserialize)]
pub struct TokenGrant {
    pub access_token: String,
    pub refresh_token: String,
    #[serde(default)]
    pub expires_in: Option<i64>,
    #[serde(default = "default_token_type")]
    pub token_type: String,
    #[serde(default)]
    pub scope: Option<String>,
}

fn default_token_type() -> String {
    "Bearer".to_string()
}

impl std::fmt::Debug for TokenGrant {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenGrant")
            .field("expires_in", &self.expires_in)
            .field("token_type", &self.token_type)
            .field("scope", &self.scope)
            .finish_non_exhaustive()
    }
}

impl TokenGrant {
    pub fn expires_in_secs(&self) -> i64 {
        self.expires_in.unwrap_or(DEFAULT_EXPIRES_IN_SECS)
    }

    /// Build the replacement record. Scope carries over when the provider omits it.
    pub fn into_record(self, previous: &TokenRecord, now: DateTime<Utc>) -> TokenRecord {
        let expires_at = now + Duration::seconds(self.expires_in_secs());
        TokenRecord {
            access_token: self.access_token,
            refresh_token: self.refresh_token,
            token_type: self.token_type,
            scope: self.scope.unwrap_or_else(|| previous.scope.clone()),
            expires_at,
        }
    }
}

/// Exchanges a refresh token for a new access token
#[async_trait]
pub trait IdentityProvider: Send + Sync {
    async fn refresh(
        &self,
        tenant: &TenantId,
        refresh_token: &str,
        credentials: &ClientCredentials,
    ) -> Result<TokenGrant>;
}

/// Refresh grant over HTTP, client credentials sent as basic auth
#[derive(Debug, Clone)]
pub struct HttpIdentityProvider {
    client: reqwest::Client,
    token_url: String,
}

impl HttpIdentityProvider {
    pub fn new(client: reqwest::Client, token_url: impl Into<String>) -> Self {
        Self {
            client,
            token_url: token_url.into(),
        }
    }

    pub fn token_url(&self) -> &str {
        &self.token_url
    }
}

#[async_trait]
impl IdentityProvider for HttpIdentityProvider {
    #[instrument(skip(self, refresh_token, credentials), fields(tenant = %tenant))]
    async fn refresh(
        &self,
        tenant: &TenantId,
        refresh_token: &str,
        credentials: &ClientCredentials,
    ) -> Result<TokenGrant> {
        let failed = |reason: String| IngestError::TokenRefreshFailed {
            tenant: tenant.to_string(),
            reason,
        };

        debug!(url = %self.token_url, "Requesting refresh grant");

        let response = self
            .client
            .post(&self.token_url)
            .basic_auth(&credentials.client_id, Some(&credentials.client_secret))
            .form(&[
                ("grant_type", "refresh_token"),
                ("refresh_token", refresh_token),
                ("token_type", "Bearer"),
            ])
            .send()
            .await
            .map_err(|e| failed(format!("request failed: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(failed(format!("identity provider returned {}: {}", status, body)));
        }

        response
            .json::<TokenGrant>()
            .await
            .map_err(|e| failed(format!("invalid grant response: {}", e)))
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use serde_json::json;
    use wiremock::matchers::{body_string_contains, header_exists, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn credentials() -> ClientCredentials {
        ClientCredentials {
            client_id: "client".to_string(),
            client_secret: "secret".to_string(),
        }
    }

    fn previous() -> TokenRecord {
        TokenRecord {
            access_token: "old".to_string(),
            refresh_token: "rt-old".to_string(),
            token_type: "Bearer".to_string(),
            scope: "accounting.reports.read".to_string(),
            expires_at: Utc::now(),
        }
    }

    #[test]
    fn test_grant_defaults() {
        let grant: TokenGrant =
            serde_json::from_value(json!({"access_token": "a", "refresh_token": "r"})).unwrap();
        let now = Utc::now();
        let record = grant.into_record(&previous(), now);

        assert_eq!(record.expires_at, now + Duration::seconds(3600));
        assert_eq!(record.scope, "accounting.reports.read");
        assert_eq!(record.token_type, "Bearer");
    }

    #[tokio::test]
    async fn test_refresh_posts_form_with_basic_auth() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/connect/token"))
            .and(header_exists("authorization"))
            .and(body_string_contains("grant_type=refresh_token"))
            .and(body_string_contains("refresh_token=rt-old"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "access_token": "new",
                "refresh_token": "rt-new",
                "expires_in": 1800,
                "token_type": "Bearer",
                "scope": "offline_access"
            })))
            .expect(1)
            .mount(&server)
            .await;

        let provider = HttpIdentityProvider::new(
            reqwest::Client::new(),
            format!("{}/connect/token", server.uri()),
        );
        let grant = provider
            .refresh(&TenantId::from("acme"), "rt-old", &credentials())
            .await
            .unwrap();

        assert_eq!(grant.access_token, "new");
        assert_eq!(grant.expires_in_secs(), 1800);
    }

    #[tokio::test]
    async fn test_rejected_grant_is_refresh_failure() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(400).set_body_string("invalid_grant"))
            .mount(&server)
            .await;

        let provider = HttpIdentityProvider::new(reqwest::Client::new(), server.uri());
        let err = provider
            .refresh(&TenantId::from("acme"), "revoked", &credentials())
            .await
            .unwrap_err();

        match err {
            IngestError::TokenRefreshFailed { tenant, reason } => {
                assert_eq!(tenant, "acme");
                assert!(reason.contains("invalid_grant"));
            },
            other => panic!("unexpected error: {other:?}"),
        }
    }
}
