//! Tally Server Library
//!
//! HTTP trigger for ingestion runs.
//!
//! # Routes
//!
//! - `GET /health`: liveness probe
//! - `POST /runs`: start one orchestrator run and return its report. Requires
//!   the `x-tally-trigger-secret` header. Only one run executes at a time;
//!   overlapping requests get `409 Conflict`.
//!
//! # Example
//!
//! ```no_run
//! use tally_server::{api, config::ServerConfig};
//! use tally_ingest::config::IngestConfig;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let server = ServerConfig::load()?;
//!     let ingest = IngestConfig::from_env()?;
//!     let state = api::AppState::from_config(&server, &ingest).await?;
//!     axum::serve(
//!         tokio::net::TcpListener::bind(server.addr()?).await?,
//!         api::create_router(state),
//!     )
//!     .await?;
//!     Ok(())
//! }
//! ```

pub mod api;
pub mod config;
pub mod error;
pub mod middleware;
