//! Error types for the avalanche loader.

use snafu::prelude::*;

/// Errors that can occur while loading or validating configuration.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum ConfigError {
    /// Failed to read the config file.
    #[snafu(display("Failed to read config file: {source}"))]
    ReadFile { source: std::io::Error },

    /// Environment variable interpolation failed.
    #[snafu(display("Environment variable interpolation failed:\n{message}"))]
    EnvInterpolation { message: String },

    /// Failed to parse YAML.
    #[snafu(display("Failed to parse config YAML: {source}"))]
    YamlParse { source: serde_yaml::Error },

    /// Input directory is empty in config.
    #[snafu(display("Config error: input.dir must not be empty"))]
    EmptyInputDir,

    /// Sink directory is empty in config.
    #[snafu(display("Config error: sink.dir must not be empty"))]
    EmptySinkDir,

    /// A family has an empty column list.
    #[snafu(display("Config error: family '{family}' declares no columns"))]
    EmptyColumns { family: String },

    /// A family declares the same column twice.
    #[snafu(display("Config error: family '{family}' declares column '{column}' twice"))]
    DuplicateColumn { family: String, column: String },

    /// A configured key column is not present in a family's column list.
    #[snafu(display("Config error: key column '{column}' not declared by family '{family}'"))]
    UnknownKeyColumn { family: String, column: String },

    /// A detail family's value column is not in its column list.
    #[snafu(display("Config error: value column '{column}' not declared by family '{family}'"))]
    UnknownValueColumn { family: String, column: String },

    /// Detail families must lead with the same report-identifier column as the report family.
    #[snafu(display(
        "Config error: family '{family}' leads with '{actual}', expected report key '{expected}'"
    ))]
    ReportKeyMismatch {
        family: String,
        expected: String,
        actual: String,
    },

    /// Dictionary source is empty in config.
    #[snafu(display("Config error: dictionary.source must not be empty"))]
    EmptyDictionarySource,
}

/// Errors that can occur during shard discovery and CSV parsing.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum SourceError {
    /// Failed to list the input directory.
    #[snafu(display("Failed to list input directory {dir}: {source}"))]
    ListDir {
        dir: String,
        source: std::io::Error,
    },

    /// A family's glob pattern could not be compiled.
    #[snafu(display("Invalid shard pattern '{pattern}': {source}"))]
    BadPattern {
        pattern: String,
        source: regex::Error,
    },

    /// No shards matched a configured family pattern.
    #[snafu(display("No shards in {dir} match pattern '{pattern}' for family '{family}'"))]
    NoShards {
        family: String,
        dir: String,
        pattern: String,
    },

    /// Failed to read a shard file.
    #[snafu(display("Failed to read shard {path}: {source}"))]
    ReadShard {
        path: String,
        source: std::io::Error,
    },

    /// A shard's column count disagrees with the declared schema.
    #[snafu(display("Schema mismatch in {path}: declared {expected} columns, found {actual}"))]
    ColumnCountMismatch {
        path: String,
        expected: usize,
        actual: usize,
    },

    /// CSV decode failure.
    #[snafu(display("Failed to decode CSV in {path}: {source}"))]
    CsvDecode {
        path: String,
        source: arrow::error::ArrowError,
    },
}

/// Errors that can occur while loading the field-descriptor dictionary.
///
/// All variants are fatal for the run: no denormalization is possible
/// without the dictionary.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum DictionaryError {
    /// HTTP fetch failed.
    #[snafu(display("Failed to fetch dictionary from {url}: {source}"))]
    Fetch { url: String, source: reqwest::Error },

    /// HTTP fetch returned a non-success status.
    #[snafu(display("Dictionary fetch from {url} returned HTTP {status}"))]
    HttpStatus { url: String, status: u16 },

    /// Local read failed.
    #[snafu(display("Failed to read dictionary {path}: {source}"))]
    Read {
        path: String,
        source: std::io::Error,
    },

    /// CSV parse failure.
    #[snafu(display("Failed to parse dictionary CSV: {source}"))]
    Parse { source: arrow::error::ArrowError },

    /// A configured key column is missing from the dictionary header.
    #[snafu(display("Dictionary is missing key column '{column}'"))]
    MissingKeyColumn { column: String },

    /// The dictionary contains no rows.
    #[snafu(display("Dictionary contains no rows"))]
    Empty,
}

/// Errors that can occur during key normalization.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum NormalizeError {
    /// A designated key column is absent from the batch.
    #[snafu(display("Key column '{column}' not present in batch"))]
    MissingColumn { column: String },

    /// A key column could not be cast to a string representation.
    #[snafu(display("Failed to cast key column '{column}' to string: {source}"))]
    Cast {
        column: String,
        source: arrow::error::ArrowError,
    },

    /// A key value failed fixed-format validation under the abort policy.
    #[snafu(display("Key format violation in column '{column}' at row {row}: {value:?}"))]
    KeyFormat {
        column: String,
        row: usize,
        value: String,
    },

    /// Row filtering failed.
    #[snafu(display("Failed to filter rows: {source}"))]
    Filter { source: arrow::error::ArrowError },
}

/// Errors that can occur during the denormalization joins.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum JoinError {
    /// A join key column is absent from the probe batch.
    #[snafu(display("Join key column '{column}' not present in batch"))]
    MissingProbeColumn { column: String },

    /// Two join inputs carry the same non-key column name.
    #[snafu(display("Join would produce duplicate output column '{column}'"))]
    DuplicateOutputColumn { column: String },

    /// Arrow gather/concat failure.
    #[snafu(display("Join gather failed: {source}"))]
    Gather { source: arrow::error::ArrowError },

    /// The run is configured to abort on referential gaps and one occurred.
    #[snafu(display("Referential gap: {dropped} row(s) dropped at the {stage} join stage"))]
    ReferentialGap { stage: &'static str, dropped: u64 },
}

/// Errors that can occur while unifying the two detail families.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum UnifyError {
    /// The two families' column sets cannot be reconciled.
    #[snafu(display("Family column sets differ: missing {missing:?}, unexpected {extra:?}"))]
    ColumnSetMismatch {
        missing: Vec<String>,
        extra: Vec<String>,
    },

    /// The family's value column is absent.
    #[snafu(display("Value column '{column}' not present in joined batch"))]
    MissingValueColumn { column: String },

    /// Arrow projection failure.
    #[snafu(display("Failed to project unified batch: {source}"))]
    Project { source: arrow::error::ArrowError },
}

/// Errors that can occur during Parquet export and publication.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum ExportError {
    /// Failed to create the Parquet writer.
    #[snafu(display("Failed to create Parquet writer: {source}"))]
    WriterCreate {
        source: parquet::errors::ParquetError,
    },

    /// Failed to write a batch to Parquet.
    #[snafu(display("Failed to write to Parquet: {source}"))]
    ParquetWrite {
        source: parquet::errors::ParquetError,
    },

    /// Writer buffer still shared when closing.
    #[snafu(display("Parquet buffer still in use by another task"))]
    BufferInUse,

    /// Failed to write a staged file.
    #[snafu(display("Failed to write staged file {path}: {source}"))]
    StagingWrite {
        path: String,
        source: object_store::Error,
    },

    /// Failed to publish a staged file to its final path.
    #[snafu(display("Failed to publish {path}: {source}"))]
    Publish {
        path: String,
        source: object_store::Error,
    },

    /// Failed to serialize the run summary.
    #[snafu(display("Failed to serialize run summary: {source}"))]
    SummarySerialize { source: serde_json::Error },

    /// Failed to open the output location.
    #[snafu(display("Failed to open output location {dir}: {source}"))]
    OpenOutput {
        dir: String,
        source: object_store::Error,
    },

    /// Failed to create the output directory.
    #[snafu(display("Failed to create output directory {dir}: {source}"))]
    CreateDir {
        dir: String,
        source: std::io::Error,
    },
}

/// Top-level pipeline errors.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum PipelineError {
    /// Configuration error.
    #[snafu(display("Configuration error: {source}"))]
    Config { source: ConfigError },

    /// Source error.
    #[snafu(display("Source error: {source}"))]
    Source { source: SourceError },

    /// Metadata dictionary unavailable.
    #[snafu(display("Metadata unavailable: {source}"))]
    MetadataUnavailable { source: DictionaryError },

    /// Key normalization error.
    #[snafu(display("Key normalization error: {source}"))]
    Normalize { source: NormalizeError },

    /// Join error.
    #[snafu(display("Join error: {source}"))]
    Join { source: JoinError },

    /// Family unification error.
    #[snafu(display("Unification error: {source}"))]
    Unify { source: UnifyError },

    /// Export error. The artifact was not published.
    #[snafu(display("Export incomplete: {source}"))]
    ExportIncomplete { source: ExportError },

    /// Task join error.
    #[snafu(display("Task join error: {source}"))]
    TaskJoin { source: tokio::task::JoinError },

    /// Channel closed.
    #[snafu(display("Channel closed unexpectedly"))]
    ChannelClosed,
}

impl From<ConfigError> for PipelineError {
    fn from(source: ConfigError) -> Self {
        PipelineError::Config { source }
    }
}

impl From<SourceError> for PipelineError {
    fn from(source: SourceError) -> Self {
        PipelineError::Source { source }
    }
}

impl From<DictionaryError> for PipelineError {
    fn from(source: DictionaryError) -> Self {
        PipelineError::MetadataUnavailable { source }
    }
}

impl From<NormalizeError> for PipelineError {
    fn from(source: NormalizeError) -> Self {
        PipelineError::Normalize { source }
    }
}

impl From<JoinError> for PipelineError {
    fn from(source: JoinError) -> Self {
        PipelineError::Join { source }
    }
}

impl From<UnifyError> for PipelineError {
    fn from(source: UnifyError) -> Self {
        PipelineError::Unify { source }
    }
}

impl From<ExportError> for PipelineError {
    fn from(source: ExportError) -> Self {
        PipelineError::ExportIncomplete { source }
    }
}
