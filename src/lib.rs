//! Avalanche: denormalizing loader for healthcare cost-report filings.
//!
//! This crate handles:
//! - Reading fixed-schema, headerless CSV shards for three record families
//!   (report headers, numeric detail items, alphanumeric detail items)
//! - Enforcing opaque-string representation for composite-key columns
//! - Joining detail items to a field-descriptor dictionary and to the
//!   report-header registry
//! - Unifying the two detail families under one schema with a provenance tag
//! - Writing a compressed, partitioned Parquet artifact with staged,
//!   atomic publication and an end-of-run data-quality summary

pub mod config;
pub mod dictionary;
pub mod error;
pub mod join;
pub mod metrics;
pub mod normalize;
pub mod pipeline;
pub mod report;
pub mod schema;
pub mod sink;
pub mod source;
pub mod tracing;
pub mod unify;

// Re-export commonly used items
pub use crate::tracing::init_tracing;
pub use config::Config;
pub use error::PipelineError;
pub use report::RunReport;
pub use schema::DetailFamily;
