//! Tally Common Library
#![deny(clippy::unwrap_used, clippy::expect_used)]
//!
//! Shared types, utilities, and error handling for the Tally workspace.
//!
//! # Overview
//!
//! - **Types**: token material, endpoint descriptors, ingestion records and run reports
//! - **Error Handling**: the shared [`TallyError`] and [`Result`] alias
//! - **Checksums**: SHA-256 digests for uploaded objects
//! - **Logging**: `tracing` subscriber setup shared by every binary
//!
//! # Example
//!
//! ```no_run
//! use tally_common::types::{EndpointDescriptor, IngestionBatch};
//!
//! let endpoint = EndpointDescriptor::new("invoices", "https://api.example.com/Invoices");
//! let batch = IngestionBatch::stamp(vec![serde_json::json!({"InvoiceID": "1"})]);
//! let ndjson = batch.to_ndjson()?;
//! assert_eq!(endpoint.object_key(), "invoices.json");
//! # Ok::<(), tally_common::TallyError>(())
//! ```

pub mod checksum;
pub mod error;
pub mod logging;
pub mod types;

// Re-export commonly used types
pub use error::{Result, TallyError};
