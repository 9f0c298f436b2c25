//! End-of-run accounting.
//!
//! Inner joins silently drop unmatched rows and duplicate dictionary keys
//! silently multiply them; in a regulatory dataset both are correctness
//! hazards. Every such count is aggregated here, logged at end of run, and
//! published next to the artifact as `_SUMMARY.json`.

use serde::Serialize;
use tracing::{info, warn};

use crate::join::BatchJoinStats;
use crate::schema::DetailFamily;

/// Per-family ingestion and join accounting.
#[derive(Debug, Default, Clone, Serialize)]
pub struct FamilyReport {
    /// Shard files processed.
    pub shards: u64,
    /// Detail rows read from the shards.
    pub rows_read: u64,
    /// Rows removed by key-format validation (skip policy).
    pub key_violations: u64,
    /// Rows dropped at the metadata join (no matching field descriptor).
    pub dropped_missing_descriptor: u64,
    /// Rows dropped at the header join (no matching report header).
    pub dropped_missing_header: u64,
    /// Extra rows emitted by duplicate descriptor keys.
    pub descriptor_fanout_rows: u64,
    /// Extra rows emitted by duplicate report identifiers.
    pub header_fanout_rows: u64,
    /// Combined rows produced for this family.
    pub rows_out: u64,
}

impl FamilyReport {
    /// Fold one batch's join accounting into the family totals.
    pub fn absorb(&mut self, stats: &BatchJoinStats) {
        self.dropped_missing_descriptor += stats.descriptor.dropped;
        self.dropped_missing_header += stats.header.dropped;
        self.descriptor_fanout_rows += stats.descriptor.fanout_extra;
        self.header_fanout_rows += stats.header.fanout_extra;
        self.rows_out += stats.header.output_rows;
    }

    /// Total rows dropped by inner-join semantics.
    pub fn dropped(&self) -> u64 {
        self.dropped_missing_descriptor + self.dropped_missing_header
    }
}

/// Accounting for one full pipeline run.
#[derive(Debug, Default, Clone, Serialize)]
pub struct RunReport {
    /// Dictionary rows indexed.
    pub dictionary_rows: u64,
    /// Distinct dictionary composite keys held by more than one row.
    pub dictionary_duplicate_keys: u64,
    /// Dictionary rows removed by key-format validation.
    pub dictionary_key_violations: u64,
    /// Report headers indexed.
    pub header_rows: u64,
    /// Distinct report identifiers held by more than one header row.
    pub header_duplicate_ids: u64,
    /// Numeric family accounting.
    pub numeric: FamilyReport,
    /// Alphanumeric family accounting.
    pub alphanumeric: FamilyReport,
    /// Combined rows persisted to the artifact.
    pub rows_written: u64,
    /// Parquet files published.
    pub files_published: u64,
}

impl RunReport {
    pub fn family_mut(&mut self, family: DetailFamily) -> &mut FamilyReport {
        match family {
            DetailFamily::Numeric => &mut self.numeric,
            DetailFamily::Alphanumeric => &mut self.alphanumeric,
        }
    }

    pub fn family(&self, family: DetailFamily) -> &FamilyReport {
        match family {
            DetailFamily::Numeric => &self.numeric,
            DetailFamily::Alphanumeric => &self.alphanumeric,
        }
    }

    /// Rows dropped across both families and both join stages.
    pub fn total_dropped(&self) -> u64 {
        self.numeric.dropped() + self.alphanumeric.dropped()
    }

    /// Log the end-of-run summary, warning on every data-quality hazard.
    pub fn log_summary(&self) {
        info!(
            rows_written = self.rows_written,
            files = self.files_published,
            "Run complete"
        );

        for family in DetailFamily::all() {
            let report = self.family(family);
            info!(
                family = %family,
                shards = report.shards,
                rows_read = report.rows_read,
                rows_out = report.rows_out,
                "Family processed"
            );

            if report.dropped() > 0 {
                warn!(
                    family = %family,
                    missing_descriptor = report.dropped_missing_descriptor,
                    missing_header = report.dropped_missing_header,
                    "Referential gap: unmatched detail rows were dropped"
                );
            }
            if report.descriptor_fanout_rows + report.header_fanout_rows > 0 {
                warn!(
                    family = %family,
                    descriptor = report.descriptor_fanout_rows,
                    header = report.header_fanout_rows,
                    "Duplicate join keys multiplied output rows"
                );
            }
            if report.key_violations > 0 {
                warn!(
                    family = %family,
                    violations = report.key_violations,
                    "Rows removed by key-format validation"
                );
            }
        }

        if self.dictionary_duplicate_keys > 0 {
            warn!(
                duplicate_keys = self.dictionary_duplicate_keys,
                "Dictionary carries duplicate composite keys"
            );
        }
        if self.header_duplicate_ids > 0 {
            warn!(
                duplicate_ids = self.header_duplicate_ids,
                "Report registry carries duplicate report identifiers"
            );
        }
    }
}
