//! Internal events for metrics emission.
//!
//! Each event struct represents a measurable occurrence in the pipeline.
//! Events implement the `InternalEvent` trait which emits the corresponding
//! counter metric, labeled by record family where that distinction matters.

use metrics::counter;
use tracing::trace;

/// Trait for internal events that can be emitted as metrics.
pub trait InternalEvent {
    /// Emit this event as a metric.
    fn emit(self);
}

/// Event emitted when a shard has been parsed and joined.
pub struct ShardProcessed {
    pub records: u64,
    /// Record family label.
    pub family: &'static str,
}

impl InternalEvent for ShardProcessed {
    fn emit(self) {
        trace!(records = self.records, family = self.family, "Shard processed");
        counter!("avalanche_shards_processed_total", "family" => self.family).increment(1);
        counter!("avalanche_records_read_total", "family" => self.family).increment(self.records);
    }
}

/// Event emitted when a join stage drops unmatched rows.
pub struct RowsDropped {
    pub count: u64,
    /// Join stage label: "descriptor" or "header".
    pub stage: &'static str,
    pub family: &'static str,
}

impl InternalEvent for RowsDropped {
    fn emit(self) {
        trace!(
            count = self.count,
            stage = self.stage,
            family = self.family,
            "Rows dropped by join"
        );
        counter!(
            "avalanche_rows_dropped_total",
            "stage" => self.stage,
            "family" => self.family
        )
        .increment(self.count);
    }
}

/// Event emitted when duplicate build-side keys multiply output rows.
pub struct FanoutRows {
    pub count: u64,
    pub stage: &'static str,
    pub family: &'static str,
}

impl InternalEvent for FanoutRows {
    fn emit(self) {
        trace!(
            count = self.count,
            stage = self.stage,
            family = self.family,
            "Join fan-out rows"
        );
        counter!(
            "avalanche_fanout_rows_total",
            "stage" => self.stage,
            "family" => self.family
        )
        .increment(self.count);
    }
}

/// Event emitted when rows are removed by key-format validation.
pub struct KeyViolations {
    pub count: u64,
    pub family: &'static str,
}

impl InternalEvent for KeyViolations {
    fn emit(self) {
        trace!(count = self.count, family = self.family, "Key format violations");
        counter!("avalanche_key_violations_total", "family" => self.family)
            .increment(self.count);
    }
}

/// Event emitted when combined rows are handed to the exporter.
pub struct RowsWritten {
    pub count: u64,
}

impl InternalEvent for RowsWritten {
    fn emit(self) {
        trace!(count = self.count, "Rows written");
        counter!("avalanche_rows_written_total").increment(self.count);
    }
}

/// Event emitted when Parquet bytes are persisted.
pub struct BytesWritten {
    pub bytes: u64,
}

impl InternalEvent for BytesWritten {
    fn emit(self) {
        trace!(bytes = self.bytes, "Bytes written");
        counter!("avalanche_bytes_written_total").increment(self.bytes);
    }
}

/// Event emitted when staged files are published to their final paths.
pub struct FilesPublished {
    pub count: u64,
}

impl InternalEvent for FilesPublished {
    fn emit(self) {
        trace!(count = self.count, "Files published");
        counter!("avalanche_files_published_total").increment(self.count);
    }
}
