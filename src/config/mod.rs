//! Configuration for the avalanche loader.
//!
//! The column layout of every record family is configuration, not inference:
//! each family declares an ordered column list and a shard filename pattern,
//! and the composite-key columns are named explicitly so their string-format
//! enforcement stays auditable.

mod vars;

pub use vars::{InterpolationResult, interpolate};

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// Byte size constants (binary/IEC units).
pub const KB: usize = 1024;
pub const MB: usize = 1024 * KB;

/// Configuration for the input directory of extracted shard files.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InputConfig {
    /// Directory containing the already-extracted shard files.
    pub dir: String,
    /// Number of records per batch.
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    /// Maximum shards resident and processing concurrently.
    #[serde(default = "default_max_concurrent_shards")]
    pub max_concurrent_shards: usize,
}

fn default_batch_size() -> usize {
    8192
}

fn default_max_concurrent_shards() -> usize {
    4
}

/// Column layout and shard pattern for the report-header family.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FamilyConfig {
    /// Shard filename glob (`*` and `?` wildcards).
    pub pattern: String,
    /// Ordered column names; shards are headerless so this is the schema.
    pub columns: Vec<String>,
}

/// Column layout for a detail-item family (numeric or alphanumeric).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DetailFamilyConfig {
    /// Shard filename glob (`*` and `?` wildcards).
    pub pattern: String,
    /// Ordered column names; shards are headerless so this is the schema.
    pub columns: Vec<String>,
    /// The family-specific value column, renamed to the unified value
    /// column when the two families are merged.
    pub value_column: String,
}

/// The three record families of a cost-report filing collection.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FamiliesConfig {
    /// One row per submitted filing.
    pub report: FamilyConfig,
    /// Numeric worksheet entries.
    pub numeric: DetailFamilyConfig,
    /// Alphanumeric worksheet entries.
    pub alphanumeric: DetailFamilyConfig,
}

/// Source of the field-descriptor dictionary.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DictionaryConfig {
    /// Local path or http(s) URL of a header-rowed CSV.
    pub source: String,
}

/// Policy for rows whose key columns fail fixed-format validation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ViolationPolicy {
    /// Filter the offending row out and count it.
    #[default]
    Skip,
    /// Fail the run on the first offending row.
    Abort,
}

/// Composite-key columns requiring opaque-string enforcement.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KeyConfig {
    /// Key column names shared by both detail families and the dictionary.
    pub columns: Vec<String>,
    /// What to do with rows that fail key-format validation.
    #[serde(default)]
    pub on_violation: ViolationPolicy,
}

/// Policy for join stages that drop unmatched rows.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GapPolicy {
    /// Report the dropped count and continue.
    #[default]
    Warn,
    /// Fail the run if any join stage drops rows.
    Abort,
}

/// Join behavior configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct JoinConfig {
    /// Behavior when a join stage drops unmatched rows.
    #[serde(default)]
    pub on_referential_gap: GapPolicy,
}

/// Parquet compression codec.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ParquetCompression {
    Uncompressed,
    Snappy,
    Gzip,
    #[default]
    Zstd,
}

impl ParquetCompression {
    /// Convert to the parquet crate's compression type.
    pub fn to_parquet(self) -> parquet::basic::Compression {
        use parquet::basic::{Compression, GzipLevel, ZstdLevel};
        match self {
            ParquetCompression::Uncompressed => Compression::UNCOMPRESSED,
            ParquetCompression::Snappy => Compression::SNAPPY,
            ParquetCompression::Gzip => Compression::GZIP(GzipLevel::default()),
            ParquetCompression::Zstd => Compression::ZSTD(ZstdLevel::default()),
        }
    }
}

/// Configuration for the columnar output artifact.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SinkConfig {
    /// Output directory for the published artifact.
    pub dir: String,
    /// Target Parquet file size in MB before rolling.
    #[serde(default = "default_file_size_mb")]
    pub file_size_mb: usize,
    /// Default compression codec.
    #[serde(default)]
    pub compression: ParquetCompression,
    /// Per-column codec overrides (e.g. a lightweight codec for
    /// repetitive categorical key columns).
    #[serde(default)]
    pub column_compression: HashMap<String, ParquetCompression>,
    /// Name the family-specific value columns are unified under.
    #[serde(default = "default_value_column")]
    pub value_column: String,
    /// Name of the provenance tag column.
    #[serde(default = "default_family_column")]
    pub family_column: String,
}

fn default_file_size_mb() -> usize {
    128
}

fn default_value_column() -> String {
    "itm_val".to_string()
}

fn default_family_column() -> String {
    "source_family".to_string()
}

/// Main configuration for avalanche.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Input configuration.
    pub input: InputConfig,
    /// Record family layouts.
    pub families: FamiliesConfig,
    /// Field-descriptor dictionary source.
    pub dictionary: DictionaryConfig,
    /// Composite-key enforcement.
    pub keys: KeyConfig,
    /// Join behavior.
    #[serde(default)]
    pub join: JoinConfig,
    /// Output artifact configuration.
    pub sink: SinkConfig,
}

impl Config {
    /// Load configuration from a file.
    pub fn from_file(path: &str) -> Result<Self, ConfigError> {
        let contents =
            std::fs::read_to_string(path).map_err(|source| ConfigError::ReadFile { source })?;
        Self::parse(&contents)
    }

    /// Parse configuration from a YAML string.
    pub fn parse(contents: &str) -> Result<Self, ConfigError> {
        let result = interpolate(contents);
        if !result.is_ok() {
            return Err(ConfigError::EnvInterpolation {
                message: result.errors.join("\n"),
            });
        }

        let config: Config = serde_yaml::from_str(&result.text)
            .map_err(|source| ConfigError::YamlParse { source })?;

        config.validate()?;

        Ok(config)
    }

    /// The report-identifier column: the leading column of the report family.
    pub fn report_key(&self) -> &str {
        &self.families.report.columns[0]
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.input.dir.is_empty() {
            return Err(ConfigError::EmptyInputDir);
        }
        if self.sink.dir.is_empty() {
            return Err(ConfigError::EmptySinkDir);
        }
        if self.dictionary.source.is_empty() {
            return Err(ConfigError::EmptyDictionarySource);
        }

        validate_columns("report", &self.families.report.columns)?;
        let report_key = &self.families.report.columns[0];

        for (name, detail) in [
            ("numeric", &self.families.numeric),
            ("alphanumeric", &self.families.alphanumeric),
        ] {
            validate_columns(name, &detail.columns)?;

            if &detail.columns[0] != report_key {
                return Err(ConfigError::ReportKeyMismatch {
                    family: name.to_string(),
                    expected: report_key.clone(),
                    actual: detail.columns[0].clone(),
                });
            }

            if !detail.columns.contains(&detail.value_column) {
                return Err(ConfigError::UnknownValueColumn {
                    family: name.to_string(),
                    column: detail.value_column.clone(),
                });
            }

            for key in &self.keys.columns {
                if !detail.columns.contains(key) {
                    return Err(ConfigError::UnknownKeyColumn {
                        family: name.to_string(),
                        column: key.clone(),
                    });
                }
            }
        }

        Ok(())
    }
}

fn validate_columns(family: &str, columns: &[String]) -> Result<(), ConfigError> {
    if columns.is_empty() {
        return Err(ConfigError::EmptyColumns {
            family: family.to_string(),
        });
    }
    let mut seen = std::collections::HashSet::new();
    for column in columns {
        if !seen.insert(column.as_str()) {
            return Err(ConfigError::DuplicateColumn {
                family: family.to_string(),
                column: column.clone(),
            });
        }
    }
    Ok(())
}
