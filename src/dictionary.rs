//! Field-descriptor dictionary loading.
//!
//! The dictionary maps the composite key (worksheet code, line number,
//! column number) to descriptive attributes. It is fetched once per run,
//! from a local path or an HTTP location, and held as a read-only broadcast
//! join input. A missing dictionary is fatal: no denormalization is
//! possible without it.

use std::io::Cursor;
use std::sync::Arc;

use arrow::array::RecordBatch;
use arrow::compute::concat_batches;
use arrow::csv::ReaderBuilder;
use bytes::Bytes;
use tracing::{info, warn};

use crate::config::{DictionaryConfig, KeyConfig};
use crate::error::{DictionaryError, NormalizeError};
use crate::join::KeyIndex;
use crate::normalize::KeyNormalizer;
use crate::schema::family_schema;

/// The loaded, indexed field-descriptor dictionary.
#[derive(Debug)]
pub struct Dictionary {
    index: Arc<KeyIndex>,
    /// Rows removed by key normalization under the skip policy.
    key_violations: u64,
}

impl Dictionary {
    /// Fetch, parse, normalize, and index the dictionary.
    pub async fn load(
        config: &DictionaryConfig,
        keys: &KeyConfig,
    ) -> Result<Self, DictionaryError> {
        let raw = fetch(&config.source).await?;
        Self::from_csv_bytes(raw, keys)
    }

    /// Build a dictionary from raw CSV bytes (first row is the header).
    pub fn from_csv_bytes(raw: Bytes, keys: &KeyConfig) -> Result<Self, DictionaryError> {
        let columns = header_columns(&raw)?;

        for key in &keys.columns {
            if !columns.contains(key) {
                return Err(DictionaryError::MissingKeyColumn {
                    column: key.clone(),
                });
            }
        }

        let schema = family_schema(&columns);
        let reader = ReaderBuilder::new(schema.clone())
            .with_header(true)
            .with_batch_size(8192)
            .build(Cursor::new(raw))
            .map_err(|source| DictionaryError::Parse { source })?;

        let batches: Vec<RecordBatch> = reader
            .collect::<Result<_, _>>()
            .map_err(|source| DictionaryError::Parse { source })?;

        let table =
            concat_batches(&schema, &batches).map_err(|source| DictionaryError::Parse { source })?;
        if table.num_rows() == 0 {
            return Err(DictionaryError::Empty);
        }

        let normalizer = KeyNormalizer::new(keys.columns.clone(), keys.on_violation);
        let normalized = normalizer.normalize(&table).map_err(normalize_to_parse)?;
        if normalized.violations > 0 {
            warn!(
                violations = normalized.violations,
                "Dictionary rows removed by key normalization"
            );
        }

        let index = KeyIndex::build(normalized.batch, &keys.columns).map_err(|error| {
            DictionaryError::Parse {
                source: arrow::error::ArrowError::CsvError(error.to_string()),
            }
        })?;

        if index.duplicate_keys() > 0 {
            warn!(
                duplicate_keys = index.duplicate_keys(),
                "Dictionary contains duplicate composite keys; joins will fan out"
            );
        }

        info!(
            rows = index.num_rows(),
            duplicate_keys = index.duplicate_keys(),
            "Loaded field-descriptor dictionary"
        );

        Ok(Self {
            index: Arc::new(index),
            key_violations: normalized.violations,
        })
    }

    /// The broadcast join index.
    pub fn index(&self) -> Arc<KeyIndex> {
        Arc::clone(&self.index)
    }

    /// Rows removed by key normalization at load time.
    pub fn key_violations(&self) -> u64 {
        self.key_violations
    }
}

/// The dictionary normalization only fails structurally (missing/uncastable
/// key column), which at load time means the source is unusable.
fn normalize_to_parse(error: NormalizeError) -> DictionaryError {
    DictionaryError::Parse {
        source: arrow::error::ArrowError::CsvError(error.to_string()),
    }
}

async fn fetch(source: &str) -> Result<Bytes, DictionaryError> {
    if source.starts_with("http://") || source.starts_with("https://") {
        let response = reqwest::get(source)
            .await
            .map_err(|source_err| DictionaryError::Fetch {
                url: source.to_string(),
                source: source_err,
            })?;

        let status = response.status();
        if !status.is_success() {
            return Err(DictionaryError::HttpStatus {
                url: source.to_string(),
                status: status.as_u16(),
            });
        }

        response.bytes().await.map_err(|source_err| DictionaryError::Fetch {
            url: source.to_string(),
            source: source_err,
        })
    } else {
        tokio::fs::read(source)
            .await
            .map(Bytes::from)
            .map_err(|source_err| DictionaryError::Read {
                path: source.to_string(),
                source: source_err,
            })
    }
}

/// Extract column names from the CSV header row, honoring double quotes.
fn header_columns(raw: &Bytes) -> Result<Vec<String>, DictionaryError> {
    let text = std::str::from_utf8(raw).map_err(|_| DictionaryError::Parse {
        source: arrow::error::ArrowError::CsvError("dictionary is not valid UTF-8".to_string()),
    })?;

    let header = text.lines().next().unwrap_or("");
    if header.is_empty() {
        return Err(DictionaryError::Empty);
    }

    let mut columns = Vec::new();
    let mut field = String::new();
    let mut in_quotes = false;
    for ch in header.chars() {
        match ch {
            '"' => in_quotes = !in_quotes,
            ',' if !in_quotes => columns.push(std::mem::take(&mut field)),
            _ => field.push(ch),
        }
    }
    columns.push(field);

    Ok(columns.into_iter().map(|c| c.trim().to_string()).collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ViolationPolicy;

    fn key_config() -> KeyConfig {
        KeyConfig {
            columns: vec![
                "wksht_cd".to_string(),
                "line_num".to_string(),
                "clmn_num".to_string(),
            ],
            on_violation: ViolationPolicy::Skip,
        }
    }

    const DICT_CSV: &str = "\
wksht_cd,line_num,clmn_num,item_desc,category
A000000,00100,00100,Number of beds,Statistics
G300000,00200,00100,Total patient revenue,Revenue
";

    #[test]
    fn loads_and_indexes_a_dictionary() {
        let dict = Dictionary::from_csv_bytes(Bytes::from(DICT_CSV), &key_config()).unwrap();

        assert_eq!(dict.index().num_rows(), 2);
        assert_eq!(dict.index().duplicate_keys(), 0);
        assert_eq!(dict.key_violations(), 0);
    }

    #[test]
    fn counts_duplicate_composite_keys() {
        let csv = "\
wksht_cd,line_num,clmn_num,item_desc
A000000,00100,00100,Number of beds
A000000,00100,00100,Number of beds (revised)
";
        let dict = Dictionary::from_csv_bytes(Bytes::from(csv), &key_config()).unwrap();
        assert_eq!(dict.index().duplicate_keys(), 1);
    }

    #[test]
    fn missing_key_column_is_fatal() {
        let csv = "wksht_cd,line_num,item_desc\nA000000,00100,Beds\n";
        let err = Dictionary::from_csv_bytes(Bytes::from(csv), &key_config()).unwrap_err();
        match err {
            DictionaryError::MissingKeyColumn { column } => assert_eq!(column, "clmn_num"),
            other => panic!("expected MissingKeyColumn, got {other:?}"),
        }
    }

    #[test]
    fn empty_dictionary_is_fatal() {
        let csv = "wksht_cd,line_num,clmn_num,item_desc\n";
        let err = Dictionary::from_csv_bytes(Bytes::from(csv), &key_config()).unwrap_err();
        assert!(matches!(err, DictionaryError::Empty));
    }

    #[test]
    fn quoted_header_fields_parse() {
        let csv = "wksht_cd,line_num,clmn_num,\"item, description\"\nA000000,00100,00100,Beds\n";
        let dict = Dictionary::from_csv_bytes(Bytes::from(csv), &key_config()).unwrap();
        assert!(
            dict.index()
                .batch()
                .schema()
                .index_of("item, description")
                .is_ok()
        );
    }

    #[tokio::test]
    async fn loads_from_a_local_path() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("dictionary.csv");
        std::fs::write(&path, DICT_CSV).unwrap();

        let config = DictionaryConfig {
            source: path.to_str().unwrap().to_string(),
        };
        let dict = Dictionary::load(&config, &key_config()).await.unwrap();
        assert_eq!(dict.index().num_rows(), 2);
    }

    #[tokio::test]
    async fn unreadable_local_path_is_fatal() {
        let config = DictionaryConfig {
            source: "/nonexistent/dictionary.csv".to_string(),
        };
        let err = Dictionary::load(&config, &key_config()).await.unwrap_err();
        assert!(matches!(err, DictionaryError::Read { .. }));
    }
}
