//! Token lifecycle: cache, load, refresh, persist

use super::cache::TokenCache;
use super::provider::IdentityProvider;
use super::store::TokenStore;
use crate::error::Result;
use chrono::Utc;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tally_common::types::{TenantId, TokenRecord};
use tokio::sync::Mutex as AsyncMutex;
use tracing::{debug, error, info, instrument, trace};

/// Serves valid tokens per tenant.
///
/// A valid cached token is returned without I/O or locking. Otherwise the
/// caller takes the tenant's lock, so at most one load or refresh per tenant
/// is in flight and waiters pick up its result from the cache.
///
/// The identity provider rotates refresh tokens, so a refreshed record is
/// never dropped. If persisting it fails the call errors, the record is held
/// as unsaved and the next call retries the save instead of refreshing with
/// the spent token.
pub struct TokenManager {
    store: TokenStore,
    provider: Arc<dyn IdentityProvider>,
    cache: TokenCache,
    locks: Mutex<HashMap<TenantId, Arc<AsyncMutex<()>>>>,
    unsaved: Mutex<HashMap<TenantId, (TokenRecord, i64)>>,
}

impl TokenManager {
    pub fn new(store: TokenStore, provider: Arc<dyn IdentityProvider>) -> Self {
        Self {
            store,
            provider,
            cache: TokenCache::new(),
            locks: Mutex::new(HashMap::new()),
            unsaved: Mutex::new(HashMap::new()),
        }
    }

    pub fn cache(&self) -> &TokenCache {
        &self.cache
    }

    /// Drop the cached token so the next call reloads from the store
    pub fn invalidate(&self, tenant: &TenantId) {
        self.cache.invalidate(tenant);
    }

    #[instrument(skip(self), fields(tenant = %tenant))]
    pub async fn get_token(&self, tenant: &TenantId) -> Result<TokenRecord> {
        if let Some(record) = self.cached(tenant) {
            trace!("Serving cached token");
            return Ok(record);
        }

        let lock = self.tenant_lock(tenant);
        let _guard = lock.lock().await;

        // Another caller may have finished while we queued.
        if let Some(record) = self.cached(tenant) {
            trace!("Token populated while waiting");
            return Ok(record);
        }

        let (record, expires_in) = match self.unsaved_record(tenant) {
            Some((record, expires_in)) if record.is_valid() => {
                debug!("Retrying save of refreshed token");
                (record, expires_in)
            },
            // Its refresh token is the only live one.
            Some((record, _)) => self.refresh(tenant, &record).await?,
            None => {
                let stored = self.store.load(tenant).await?;
                if stored.is_valid() {
                    debug!(expires_at = %stored.expires_at, "Stored token still valid");
                    self.cache.put(tenant.clone(), stored.clone());
                    return Ok(stored);
                }
                self.refresh(tenant, &stored).await?
            },
        };

        if let Err(e) = self.store.save(tenant, &record, expires_in).await {
            error!(error = %e, "Failed to persist refreshed token, will retry on next call");
            self.unsaved_map().insert(tenant.clone(), (record, expires_in));
            return Err(e);
        }
        self.unsaved_map().remove(tenant);

        self.cache.put(tenant.clone(), record.clone());
        Ok(record)
    }

    async fn refresh(&self, tenant: &TenantId, stale: &TokenRecord) -> Result<(TokenRecord, i64)> {
        let credentials = self.store.client_credentials().await?;
        let grant = self
            .provider
            .refresh(tenant, &stale.refresh_token, &credentials)
            .await?;

        let expires_in = grant.expires_in_secs();
        let record = grant.into_record(stale, Utc::now());

        info!(
            tenant = %tenant,
            expires_at = %record.expires_at,
            "Refreshed access token"
        );
        Ok((record, expires_in))
    }

    fn unsaved_map(&self) -> MutexGuard<'_, HashMap<TenantId, (TokenRecord, i64)>> {
        self.unsaved.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn unsaved_record(&self, tenant: &TenantId) -> Option<(TokenRecord, i64)> {
        self.unsaved_map().get(tenant).cloned()
    }

    fn cached(&self, tenant: &TenantId) -> Option<TokenRecord> {
        self.cache.get(tenant).filter(TokenRecord::is_valid)
    }

    fn tenant_lock(&self, tenant: &TenantId) -> Arc<AsyncMutex<()>> {
        self.locks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(tenant.clone())
            .or_default()
            .clone()
    }
}
