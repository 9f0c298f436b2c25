//! Columnar export: Parquet serialization and staged publication.

mod parquet;
mod staging;

pub use parquet::{FinishedFile, ParquetWriter, ParquetWriterConfig};
pub use staging::{SUMMARY_FILE, StagingWriter};
