//! Key normalization: fixed-format keys stay opaque strings.
//!
//! Worksheet codes, line numbers, and column numbers are fixed-width,
//! zero-padded tokens. `00100` and `00001` are different worksheet lines;
//! any representation that re-types them as numbers destroys that
//! distinction. The normalizer enforces string representation for the
//! designated key columns and validates that each value looks like an
//! opaque token.

use std::sync::Arc;

use arrow::array::{Array, ArrayRef, BooleanArray, RecordBatch, StringArray};
use arrow::compute;
use arrow::datatypes::{DataType, Field, Schema};
use tracing::warn;

use crate::config::ViolationPolicy;
use crate::error::NormalizeError;

/// A normalized batch plus the number of rows removed under the skip policy.
#[derive(Debug)]
pub struct Normalized {
    pub batch: RecordBatch,
    pub violations: u64,
}

/// Enforces opaque-string representation for designated key columns.
#[derive(Debug, Clone)]
pub struct KeyNormalizer {
    columns: Vec<String>,
    policy: ViolationPolicy,
}

impl KeyNormalizer {
    pub fn new(columns: Vec<String>, policy: ViolationPolicy) -> Self {
        Self { columns, policy }
    }

    /// Normalize the key columns of a batch.
    ///
    /// Non-string key columns are cast to `Utf8`; string columns pass
    /// through untouched, so re-normalizing an already-normalized batch is
    /// a no-op. Values are then validated as opaque tokens (non-empty,
    /// printable ASCII, no embedded whitespace); offending rows are
    /// filtered out and counted, or fail the run, per the configured
    /// policy.
    pub fn normalize(&self, batch: &RecordBatch) -> Result<Normalized, NormalizeError> {
        let batch = self.coerce_to_strings(batch)?;

        let row_count = batch.num_rows();
        let mut valid = vec![true; row_count];
        let mut violations = 0u64;

        for column in &self.columns {
            let array = key_column(&batch, column)?;
            for row in 0..row_count {
                if !valid[row] {
                    continue;
                }
                let ok = !array.is_null(row) && is_opaque_token(array.value(row));
                if !ok {
                    if self.policy == ViolationPolicy::Abort {
                        let value = if array.is_null(row) {
                            String::new()
                        } else {
                            array.value(row).to_string()
                        };
                        return Err(NormalizeError::KeyFormat {
                            column: column.clone(),
                            row,
                            value,
                        });
                    }
                    valid[row] = false;
                    violations += 1;
                }
            }
        }

        if violations == 0 {
            return Ok(Normalized {
                batch,
                violations: 0,
            });
        }

        warn!(
            violations,
            "Filtered rows with malformed key values from batch"
        );

        let mask = BooleanArray::from(valid);
        let filtered = compute::filter_record_batch(&batch, &mask)
            .map_err(|source| NormalizeError::Filter { source })?;

        Ok(Normalized {
            batch: filtered,
            violations,
        })
    }

    /// Cast any non-`Utf8` key column to `Utf8`, leaving everything else alone.
    fn coerce_to_strings(&self, batch: &RecordBatch) -> Result<RecordBatch, NormalizeError> {
        let mut changed = false;
        let mut columns: Vec<ArrayRef> = batch.columns().to_vec();
        let mut fields: Vec<Field> = batch
            .schema()
            .fields()
            .iter()
            .map(|f| f.as_ref().clone())
            .collect();

        for column in &self.columns {
            let index = batch.schema().index_of(column).map_err(|_| {
                NormalizeError::MissingColumn {
                    column: column.clone(),
                }
            })?;

            if fields[index].data_type() != &DataType::Utf8 {
                let cast = compute::cast(&columns[index], &DataType::Utf8).map_err(|source| {
                    NormalizeError::Cast {
                        column: column.clone(),
                        source,
                    }
                })?;
                columns[index] = cast;
                fields[index] =
                    Field::new(column, DataType::Utf8, fields[index].is_nullable());
                changed = true;
            }
        }

        if !changed {
            return Ok(batch.clone());
        }

        let schema = Arc::new(Schema::new(fields));
        RecordBatch::try_new(schema, columns).map_err(|source| NormalizeError::Cast {
            column: String::new(),
            source,
        })
    }
}

fn key_column<'a>(
    batch: &'a RecordBatch,
    column: &str,
) -> Result<&'a StringArray, NormalizeError> {
    batch
        .column_by_name(column)
        .and_then(|array| array.as_any().downcast_ref::<StringArray>())
        .ok_or_else(|| NormalizeError::MissingColumn {
            column: column.to_string(),
        })
}

/// A key token is non-empty printable ASCII with no whitespace.
fn is_opaque_token(value: &str) -> bool {
    !value.is_empty() && value.bytes().all(|b| b.is_ascii_graphic())
}

#[cfg(test)]
mod tests {
    use super::*;
    use arrow::array::Int64Array;
    use arrow::datatypes::SchemaRef;

    fn key_columns() -> Vec<String> {
        vec!["wksht_cd".to_string(), "line_num".to_string()]
    }

    fn string_batch(wksht: Vec<Option<&str>>, line: Vec<Option<&str>>) -> RecordBatch {
        let schema: SchemaRef = Arc::new(Schema::new(vec![
            Field::new("wksht_cd", DataType::Utf8, true),
            Field::new("line_num", DataType::Utf8, true),
        ]));
        RecordBatch::try_new(
            schema,
            vec![
                Arc::new(StringArray::from(wksht)),
                Arc::new(StringArray::from(line)),
            ],
        )
        .unwrap()
    }

    #[test]
    fn preserves_leading_zeros_exactly() {
        let normalizer = KeyNormalizer::new(key_columns(), ViolationPolicy::Skip);
        let batch = string_batch(
            vec![Some("A000000"), Some("G300000")],
            vec![Some("00100"), Some("00001")],
        );

        let normalized = normalizer.normalize(&batch).unwrap();
        assert_eq!(normalized.violations, 0);

        let line = key_column(&normalized.batch, "line_num").unwrap();
        assert_eq!(line.value(0), "00100");
        assert_eq!(line.value(1), "00001");
    }

    #[test]
    fn is_idempotent() {
        let normalizer = KeyNormalizer::new(key_columns(), ViolationPolicy::Skip);
        let batch = string_batch(vec![Some("A000000")], vec![Some("00100")]);

        let once = normalizer.normalize(&batch).unwrap();
        let twice = normalizer.normalize(&once.batch).unwrap();

        assert_eq!(twice.violations, 0);
        assert_eq!(once.batch, twice.batch);
    }

    #[test]
    fn casts_numeric_key_column_to_strings() {
        let schema: SchemaRef = Arc::new(Schema::new(vec![
            Field::new("wksht_cd", DataType::Utf8, true),
            Field::new("line_num", DataType::Int64, true),
        ]));
        let batch = RecordBatch::try_new(
            schema,
            vec![
                Arc::new(StringArray::from(vec![Some("A000000")])),
                Arc::new(Int64Array::from(vec![Some(100)])),
            ],
        )
        .unwrap();

        let normalizer = KeyNormalizer::new(key_columns(), ViolationPolicy::Skip);
        let normalized = normalizer.normalize(&batch).unwrap();

        let line = key_column(&normalized.batch, "line_num").unwrap();
        assert_eq!(line.value(0), "100");
    }

    #[test]
    fn skip_policy_filters_and_counts_violations() {
        let normalizer = KeyNormalizer::new(key_columns(), ViolationPolicy::Skip);
        let batch = string_batch(
            vec![Some("A000000"), Some("bad code"), None, Some("B000000")],
            vec![Some("00100"), Some("00200"), Some("00300"), Some("00400")],
        );

        let normalized = normalizer.normalize(&batch).unwrap();

        assert_eq!(normalized.violations, 2);
        assert_eq!(normalized.batch.num_rows(), 2);
        let wksht = key_column(&normalized.batch, "wksht_cd").unwrap();
        assert_eq!(wksht.value(0), "A000000");
        assert_eq!(wksht.value(1), "B000000");
    }

    #[test]
    fn abort_policy_fails_on_first_violation() {
        let normalizer = KeyNormalizer::new(key_columns(), ViolationPolicy::Abort);
        let batch = string_batch(vec![Some("bad code")], vec![Some("00100")]);

        let err = normalizer.normalize(&batch).unwrap_err();
        match err {
            NormalizeError::KeyFormat { column, value, .. } => {
                assert_eq!(column, "wksht_cd");
                assert_eq!(value, "bad code");
            }
            other => panic!("expected KeyFormat, got {other:?}"),
        }
    }

    #[test]
    fn missing_key_column_is_an_error() {
        let normalizer =
            KeyNormalizer::new(vec!["clmn_num".to_string()], ViolationPolicy::Skip);
        let batch = string_batch(vec![Some("A000000")], vec![Some("00100")]);

        let err = normalizer.normalize(&batch).unwrap_err();
        assert!(matches!(err, NormalizeError::MissingColumn { .. }));
    }
}
