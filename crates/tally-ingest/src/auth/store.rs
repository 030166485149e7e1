//! Durable token material on top of a [`SecretBackend`]

use crate::error::{IngestError, Result};
use crate::secrets::{SecretBackend, SecretError};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tally_common::types::{TenantId, TokenRecord};
use tracing::{debug, instrument};

/// Default secret id holding the application's OAuth client id
pub const DEFAULT_CLIENT_ID_SECRET: &str = "app-client-id";

/// Default secret id holding the application's OAuth client secret
pub const DEFAULT_CLIENT_SECRET_SECRET: &str = "app-client-secret";

/// Secret id of a tenant's token material
pub fn token_secret_id(tenant: &TenantId) -> String {
    format!("client-{}-token", tenant)
}

/// Application credentials for the refresh grant
#[derive(Clone)]
pub struct ClientCredentials {
    pub client_id: String,
    pub client_secret: String,
}

impl std::fmt::Debug for ClientCredentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClientCredentials")
            .field("client_id", &self.client_id)
            .field("client_secret", &"<redacted>")
            .finish()
    }
}

/// On-disk shape of a token secret.
///
/// All provider fields are required. `expires_at` is epoch seconds and may be
/// absent in material written by hand, in which case the token is treated as
/// expired and refreshed on first use.
#[derive(Serialize, Deserialize)]
struct StoredToken {
    access_token: String,
    refresh_token: String,
    expires_in: i64,
    token_type: String,
    scope: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    expires_at: Option<f64>,
}

impl StoredToken {
    fn from_record(record: &TokenRecord, expires_in: i64) -> Self {
        Self {
            access_token: record.access_token.clone(),
            refresh_token: record.refresh_token.clone(),
            expires_in,
            token_type: record.token_type.clone(),
            scope: record.scope.clone(),
            expires_at: Some(record.expires_at.timestamp_micros() as f64 / 1_000_000.0),
        }
    }

    fn into_record(self) -> TokenRecord {
        let expires_at = self
            .expires_at
            .and_then(|secs| DateTime::from_timestamp_micros((secs * 1_000_000.0).round() as i64))
            .unwrap_or(DateTime::<Utc>::UNIX_EPOCH);

        TokenRecord {
            access_token: self.access_token,
            refresh_token: self.refresh_token,
            token_type: self.token_type,
            scope: self.scope,
            expires_at,
        }
    }
}

/// Reads and writes per-tenant token material
#[derive(Clone)]
pub struct TokenStore {
    backend: Arc<dyn SecretBackend>,
    client_id_secret: String,
    client_secret_secret: String,
}

impl TokenStore {
    pub fn new(backend: Arc<dyn SecretBackend>) -> Self {
        Self {
            backend,
            client_id_secret: DEFAULT_CLIENT_ID_SECRET.to_string(),
            client_secret_secret: DEFAULT_CLIENT_SECRET_SECRET.to_string(),
        }
    }

    /// Override the secret ids holding the application credentials
    pub fn with_credential_ids(
        mut self,
        client_id_secret: impl Into<String>,
        client_secret_secret: impl Into<String>,
    ) -> Self {
        self.client_id_secret = client_id_secret.into();
        self.client_secret_secret = client_secret_secret.into();
        self
    }

    #[instrument(skip(self), fields(tenant = %tenant))]
    pub async fn load(&self, tenant: &TenantId) -> Result<TokenRecord> {
        let id = token_secret_id(tenant);
        let payload = self.backend.get_secret(&id).await.map_err(|e| match e {
            SecretError::NotFound(_) => IngestError::TokenUnavailable {
                tenant: tenant.to_string(),
            },
            other => IngestError::secret_backend(format!("reading {}: {}", id, other)),
        })?;

        let stored: StoredToken =
            serde_json::from_slice(&payload).map_err(|e| IngestError::TokenRetrieval {
                tenant: tenant.to_string(),
                reason: e.to_string(),
            })?;

        let record = stored.into_record();
        debug!(expires_at = %record.expires_at, "Loaded stored token");
        Ok(record)
    }

    #[instrument(skip(self, record), fields(tenant = %tenant))]
    pub async fn save(&self, tenant: &TenantId, record: &TokenRecord, expires_in: i64) -> Result<()> {
        let id = token_secret_id(tenant);
        let payload = serde_json::to_vec(&StoredToken::from_record(record, expires_in))
            .map_err(|e| IngestError::secret_backend(e.to_string()))?;

        self.backend
            .put_secret_version(&id, &payload)
            .await
            .map_err(|e| IngestError::secret_backend(format!("writing {}: {}", id, e)))
    }

    pub async fn client_credentials(&self) -> Result<ClientCredentials> {
        Ok(ClientCredentials {
            client_id: self.read_text(&self.client_id_secret).await?,
            client_secret: self.read_text(&self.client_secret_secret).await?,
        })
    }

    async fn read_text(&self, id: &str) -> Result<String> {
        let bytes = self
            .backend
            .get_secret(id)
            .await
            .map_err(|e| IngestError::secret_backend(format!("reading {}: {}", id, e)))?;

        String::from_utf8(bytes)
            .map(|s| s.trim().to_string())
            .map_err(|_| IngestError::secret_backend(format!("secret {} is not UTF-8", id)))
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::secrets::MemorySecretBackend;
    use serde_json::json;

    fn store_with(payload: serde_json::Value) -> TokenStore {
        let backend = MemorySecretBackend::new()
            .with_secret("client-acme-token", payload.to_string());
        TokenStore::new(Arc::new(backend))
    }

    #[tokio::test]
    async fn test_load_valid_payload() {
        let store = store_with(json!({
            "access_token": "at",
            "refresh_token": "rt",
            "expires_in": 1800,
            "token_type": "Bearer",
            "scope": "offline_access",
            "expires_at": 4_102_444_800.5
        }));

        let record = store.load(&TenantId::from("acme")).await.unwrap();
        assert_eq!(record.access_token, "at");
        assert_eq!(record.expires_at.timestamp(), 4_102_444_800);
        assert!(record.is_valid());
    }

    #[tokio::test]
    async fn test_missing_expires_at_is_expired() {
        let store = store_with(json!({
            "access_token": "at",
            "refresh_token": "rt",
            "expires_in": 1800,
            "token_type": "Bearer",
            "scope": "offline_access"
        }));

        let record = store.load(&TenantId::from("acme")).await.unwrap();
        assert!(!record.is_valid());
    }

    #[tokio::test]
    async fn test_missing_field_is_retrieval_error() {
        let store = store_with(json!({
            "access_token": "at",
            "refresh_token": "rt",
            "expires_in": 1800,
            "token_type": "Bearer"
        }));

        let err = store.load(&TenantId::from("acme")).await.unwrap_err();
        match err {
            IngestError::TokenRetrieval { tenant, reason } => {
                assert_eq!(tenant, "acme");
                assert!(reason.contains("scope"));
            },
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_unknown_tenant_is_unavailable() {
        let store = TokenStore::new(Arc::new(MemorySecretBackend::new()));
        let err = store.load(&TenantId::from("nobody")).await.unwrap_err();
        assert!(matches!(err, IngestError::TokenUnavailable { .. }));
    }

    #[tokio::test]
    async fn test_save_then_load() {
        let backend = Arc::new(MemorySecretBackend::new());
        let store = TokenStore::new(backend.clone());
        let tenant = TenantId::from("acme");
        let record = TokenRecord {
            access_token: "fresh".to_string(),
            refresh_token: "rt2".to_string(),
            token_type: "Bearer".to_string(),
            scope: "offline_access".to_string(),
            expires_at: Utc::now() + chrono::Duration::seconds(1800),
        };

        store.save(&tenant, &record, 1800).await.unwrap();
        let loaded = store.load(&tenant).await.unwrap();

        assert_eq!(loaded.access_token, "fresh");
        assert_eq!(loaded.expires_at.timestamp(), record.expires_at.timestamp());

        let raw: serde_json::Value =
            serde_json::from_slice(&backend.latest("client-acme-token").unwrap()).unwrap();
        assert_eq!(raw["expires_in"], 1800);
    }

    #[tokio::test]
    async fn test_client_credentials_trimmed() {
        let backend = MemorySecretBackend::new()
            .with_secret("xero-client-id", "client-123\n")
            .with_secret("xero-client-secret", "s3cret");
        let store = TokenStore::new(Arc::new(backend))
            .with_credential_ids("xero-client-id", "xero-client-secret");

        let creds = store.client_credentials().await.unwrap();
        assert_eq!(creds.client_id, "client-123");
        assert_eq!(creds.client_secret, "s3cret");
        assert!(!format!("{creds:?}").contains("s3cret"));
    }
}
