//! Tally Ingest Library
#![deny(clippy::unwrap_used, clippy::expect_used)]
//!
//! Pulls paginated records from a multi-tenant accounting API and writes them
//! to an object store as newline-delimited JSON.
//!
//! # Components
//!
//! - **auth**: per-tenant OAuth tokens (store, cache, refresh grant, manager)
//! - **rate_limit**: process-wide sliding-window call budget
//! - **fetcher**: paginated retrieval with retry and backoff
//! - **orchestrator**: concurrent per-endpoint runs with isolated failures
//! - **sink**: S3 and in-memory object sinks
//! - **secrets**: filesystem and in-memory secret backends
//!
//! # Example
//!
//! ```no_run
//! use tally_ingest::{config::IngestConfig, orchestrator::IngestionOrchestrator};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = IngestConfig::load()?;
//!     let orchestrator = IngestionOrchestrator::from_config(&config).await?;
//!     let report = orchestrator.run(&config.endpoints()?).await;
//!     println!("{:?}", report.status());
//!     Ok(())
//! }
//! ```

pub mod auth;
pub mod config;
pub mod endpoints;
pub mod error;
pub mod fetcher;
pub mod orchestrator;
pub mod rate_limit;
pub mod secrets;
pub mod sink;

pub use error::{IngestError, Result};
