//! In-process token cache

use std::collections::HashMap;
use std::sync::{PoisonError, RwLock};
use tally_common::types::{TenantId, TokenRecord};

/// Per-tenant token records.
///
/// Entries are replaced wholesale; callers only see clones.
#[derive(Debug, Default)]
pub struct TokenCache {
    entries: RwLock<HashMap<TenantId, TokenRecord>>,
}

impl TokenCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Cached record for the tenant, valid or not
    pub fn get(&self, tenant: &TenantId) -> Option<TokenRecord> {
        self.entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(tenant)
            .cloned()
    }

    /// Replace the tenant's record
    pub fn put(&self, tenant: TenantId, record: TokenRecord) {
        self.entries
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(tenant, record);
    }

    /// Drop the tenant's record, returning it if present
    pub fn invalidate(&self, tenant: &TenantId) -> Option<TokenRecord> {
        self.entries
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(tenant)
    }

    pub fn clear(&self) {
        self.entries
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }

    pub fn len(&self) -> usize {
        self.entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use chrono::{Duration, Utc};

    fn record(access: &str) -> TokenRecord {
        TokenRecord {
            access_token: access.to_string(),
            refresh_token: "refresh".to_string(),
            token_type: "Bearer".to_string(),
            scope: "accounting.transactions.read".to_string(),
            expires_at: Utc::now() + Duration::minutes(30),
        }
    }

    #[test]
    fn test_put_replaces_record() {
        let cache = TokenCache::new();
        let tenant = TenantId::from("acme");

        cache.put(tenant.clone(), record("first"));
        cache.put(tenant.clone(), record("second"));

        assert_eq!(cache.len(), 1);
        assert_eq!(cache.get(&tenant).unwrap().access_token, "second");
    }

    #[test]
    fn test_invalidate_and_clear() {
        let cache = TokenCache::new();
        let acme = TenantId::from("acme");
        let globex = TenantId::from("globex");
        cache.put(acme.clone(), record("a"));
        cache.put(globex.clone(), record("g"));

        assert_eq!(cache.invalidate(&acme).unwrap().access_token, "a");
        assert!(cache.get(&acme).is_none());
        assert!(cache.get(&globex).is_some());

        cache.clear();
        assert!(cache.is_empty());
    }
}
