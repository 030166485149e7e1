//! Per-tenant OAuth token management
//!
//! - [`TokenStore`]: durable token material in the secret backend
//! - [`TokenCache`]: in-process records keyed by tenant
//! - [`IdentityProvider`]: the refresh-token grant
//! - [`TokenManager`]: ties them together with one refresh in flight per tenant

pub mod cache;
pub mod manager;
pub mod provider;
pub mod store;

pub use cache::TokenCache;
pub use manager::TokenManager;
pub use provider::{HttpIdentityProvider, IdentityProvider, TokenGrant};
pub use store::{token_secret_id, ClientCredentials, TokenStore};
