//! Headerless CSV shard reader.
//!
//! Converts one shard file into Arrow RecordBatches using the family's
//! declared column schema. All values are read as raw strings; there is no
//! type inference anywhere in the read path.

use std::fs::File;
use std::io::{BufRead, BufReader};
use std::ops::ControlFlow;
use std::path::Path;

use arrow::array::RecordBatch;
use arrow::csv::ReaderBuilder;
use arrow::datatypes::SchemaRef;
use tracing::debug;

use crate::error::SourceError;

/// A reader for headerless CSV shards that yields Arrow RecordBatches.
pub struct CsvShardReader {
    schema: SchemaRef,
    batch_size: usize,
}

impl CsvShardReader {
    /// Create a new shard reader with the given declared schema.
    pub fn new(schema: SchemaRef, batch_size: usize) -> Self {
        Self { schema, batch_size }
    }

    /// The declared schema shards are checked against.
    pub fn schema(&self) -> &SchemaRef {
        &self.schema
    }

    /// Read one shard and stream parsed batches via callback.
    ///
    /// Returns the total number of records read. Fails with a
    /// column-count mismatch before decoding anything if the shard's first
    /// record disagrees with the declared schema.
    pub fn read_batches(
        &self,
        path: &Path,
        on_batch: &mut dyn FnMut(RecordBatch) -> ControlFlow<()>,
    ) -> Result<usize, SourceError> {
        let display_path = path.display().to_string();

        self.check_column_count(path, &display_path)?;

        let file = File::open(path).map_err(|source| SourceError::ReadShard {
            path: display_path.clone(),
            source,
        })?;

        let csv_reader = ReaderBuilder::new(self.schema.clone())
            .with_header(false)
            .with_batch_size(self.batch_size)
            .build(BufReader::new(file))
            .map_err(|source| SourceError::CsvDecode {
                path: display_path.clone(),
                source,
            })?;

        let mut total_records = 0;
        let mut batch_count = 0;

        for batch_result in csv_reader {
            let batch = batch_result.map_err(|source| SourceError::CsvDecode {
                path: display_path.clone(),
                source,
            })?;

            total_records += batch.num_rows();
            batch_count += 1;

            if on_batch(batch).is_break() {
                break;
            }
        }

        debug!(
            "Parsed {} batches ({} records) from {}",
            batch_count, total_records, display_path
        );

        Ok(total_records)
    }

    /// Compare the first record's field count against the declared schema.
    fn check_column_count(&self, path: &Path, display_path: &str) -> Result<(), SourceError> {
        let file = File::open(path).map_err(|source| SourceError::ReadShard {
            path: display_path.to_string(),
            source,
        })?;

        let mut first_line = String::new();
        BufReader::new(file)
            .read_line(&mut first_line)
            .map_err(|source| SourceError::ReadShard {
                path: display_path.to_string(),
                source,
            })?;

        // Empty shard: nothing to check, the decode loop yields no batches.
        let trimmed = first_line.trim_end_matches(['\r', '\n']);
        if trimmed.is_empty() {
            return Ok(());
        }

        let expected = self.schema.fields().len();
        // A first record with an unterminated quote spans multiple lines;
        // leave those to the decoder.
        if let Some(actual) = count_csv_fields(trimmed)
            && actual != expected
        {
            return Err(SourceError::ColumnCountMismatch {
                path: display_path.to_string(),
                expected,
                actual,
            });
        }

        Ok(())
    }
}

/// Count comma-separated fields in one CSV record, honoring double quotes.
/// Returns `None` when the record does not end on a quote boundary.
fn count_csv_fields(line: &str) -> Option<usize> {
    let mut fields = 1;
    let mut in_quotes = false;
    for ch in line.chars() {
        match ch {
            '"' => in_quotes = !in_quotes,
            ',' if !in_quotes => fields += 1,
            _ => {}
        }
    }
    (!in_quotes).then_some(fields)
}
