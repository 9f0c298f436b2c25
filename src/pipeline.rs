//! Pipeline orchestration.
//!
//! Loads the two broadcast join inputs (field-descriptor dictionary and
//! report-header registry), then streams each detail family's shards
//! through parse → normalize → join → unify on blocking workers, bounded
//! by `max_concurrent_shards`, into the staged Parquet exporter. Nothing
//! is published until every partition has been written.

use std::ops::ControlFlow;
use std::path::PathBuf;
use std::sync::Arc;

use arrow::array::RecordBatch;
use arrow::datatypes::SchemaRef;
use futures::StreamExt;
use futures::stream;
use snafu::ResultExt;
use tracing::info;

use crate::config::{Config, DetailFamilyConfig, GapPolicy};
use crate::dictionary::Dictionary;
use crate::emit;
use crate::error::{JoinError, PipelineError, TaskJoinSnafu};
use crate::join::{BatchJoinStats, Denormalizer, KeyIndex};
use crate::metrics::events::{
    BytesWritten, FanoutRows, FilesPublished, KeyViolations, RowsDropped, RowsWritten,
    ShardProcessed,
};
use crate::normalize::KeyNormalizer;
use crate::report::RunReport;
use crate::schema::{DetailFamily, family_schema};
use crate::sink::{ParquetWriter, ParquetWriterConfig, StagingWriter};
use crate::source::{CsvShardReader, discover_shards};
use crate::unify;

/// Everything a blocking worker needs to turn one shard into unified
/// output batches. Cloned per shard; the broadcast indexes are shared.
#[derive(Clone)]
struct FamilyContext {
    family: DetailFamily,
    schema: SchemaRef,
    batch_size: usize,
    normalizer: KeyNormalizer,
    denormalizer: Arc<Denormalizer>,
    value_column: String,
    unified_value: String,
    family_column: String,
    target: SchemaRef,
}

/// Per-shard accounting returned by the blocking workers.
#[derive(Default)]
struct ShardOutcome {
    rows_read: u64,
    key_violations: u64,
    join: BatchJoinStats,
}

/// Run the full pipeline. Returns the end-of-run report.
pub async fn run(config: Config) -> Result<RunReport, PipelineError> {
    let mut report = RunReport::default();

    // Broadcast side inputs: both joins' build sides are fully resident
    // before any detail shard is probed.
    let dictionary = Dictionary::load(&config.dictionary, &config.keys).await?;
    report.dictionary_rows = dictionary.index().num_rows() as u64;
    report.dictionary_duplicate_keys = dictionary.index().duplicate_keys();
    report.dictionary_key_violations = dictionary.key_violations();

    let headers = load_header_registry(&config).await?;
    report.header_rows = headers.num_rows() as u64;
    report.header_duplicate_ids = headers.duplicate_keys();

    let denormalizer = Arc::new(Denormalizer::new(
        dictionary.index(),
        Arc::clone(&headers),
        config.keys.columns.clone(),
        config.report_key().to_string(),
    ));

    // Establish the unified output schema from the numeric family and
    // verify the alphanumeric family lands in the same one before any
    // shard work starts.
    let unified = unified_family_schema(&config, &denormalizer, DetailFamily::Numeric)?;
    let alphanumeric = unified_family_schema(&config, &denormalizer, DetailFamily::Alphanumeric)?;
    unify::check_compatible(&unified, &alphanumeric)?;

    let writer_config = ParquetWriterConfig {
        target_file_size: config.sink.file_size_mb * crate::config::MB,
        compression: config.sink.compression,
        column_compression: config.sink.column_compression.clone(),
    };
    let mut writer = ParquetWriter::new(unified.clone(), writer_config)?;
    let mut staging = StagingWriter::new(&config.sink.dir)?;

    for family in DetailFamily::all() {
        let detail = detail_config(&config, family);
        let context = FamilyContext {
            family,
            schema: family_schema(&detail.columns),
            batch_size: config.input.batch_size,
            normalizer: KeyNormalizer::new(config.keys.columns.clone(), config.keys.on_violation),
            denormalizer: Arc::clone(&denormalizer),
            value_column: detail.value_column.clone(),
            unified_value: config.sink.value_column.clone(),
            family_column: config.sink.family_column.clone(),
            target: unified.clone(),
        };

        process_family(&config, detail, context, &mut writer, &mut staging, &mut report)
            .await?;
    }

    for file in writer.close()? {
        report.rows_written += file.record_count as u64;
        emit!(BytesWritten {
            bytes: file.size as u64
        });
        staging.stage(file).await?;
    }
    emit!(RowsWritten {
        count: report.rows_written
    });

    enforce_gap_policy(&config, &report)?;

    report.files_published = staging.staged_count() as u64;
    staging.publish(&report).await?;
    emit!(FilesPublished {
        count: report.files_published
    });

    report.log_summary();
    Ok(report)
}

fn detail_config(config: &Config, family: DetailFamily) -> &DetailFamilyConfig {
    match family {
        DetailFamily::Numeric => &config.families.numeric,
        DetailFamily::Alphanumeric => &config.families.alphanumeric,
    }
}

/// The unified schema one family's joined output maps to.
fn unified_family_schema(
    config: &Config,
    denormalizer: &Denormalizer,
    family: DetailFamily,
) -> Result<SchemaRef, PipelineError> {
    let detail = detail_config(config, family);
    let joined = denormalizer.joined_schema(&family_schema(&detail.columns))?;
    let unified = unify::unified_schema(
        &joined,
        &detail.value_column,
        &config.sink.value_column,
        &config.sink.family_column,
    )?;
    Ok(unified)
}

/// Load every report-header shard and index the registry by report id.
async fn load_header_registry(config: &Config) -> Result<Arc<KeyIndex>, PipelineError> {
    let report = &config.families.report;
    let shards = discover_shards(&config.input.dir, "report", &report.pattern)?;
    let schema = family_schema(&report.columns);
    let batch_size = config.input.batch_size;

    let mut handles = Vec::with_capacity(shards.len());
    for shard in shards {
        let schema = schema.clone();
        handles.push(tokio::task::spawn_blocking(move || {
            let reader = CsvShardReader::new(schema, batch_size);
            let mut batches = Vec::new();
            reader.read_batches(&shard, &mut |batch| {
                batches.push(batch);
                ControlFlow::Continue(())
            })?;
            Ok::<_, crate::error::SourceError>(batches)
        }));
    }

    let mut batches: Vec<RecordBatch> = Vec::new();
    for handle in handles {
        batches.extend(handle.await.context(TaskJoinSnafu)??);
    }

    let table = arrow::compute::concat_batches(&schema, &batches)
        .map_err(|source| JoinError::Gather { source })?;

    let registry = KeyIndex::build(table, &[config.report_key().to_string()])?;
    info!(
        headers = registry.num_rows(),
        duplicate_ids = registry.duplicate_keys(),
        "Loaded report-header registry"
    );

    Ok(Arc::new(registry))
}

/// Stream one family's shards through the blocking workers into the writer.
async fn process_family(
    config: &Config,
    detail: &DetailFamilyConfig,
    context: FamilyContext,
    writer: &mut ParquetWriter,
    staging: &mut StagingWriter,
    report: &mut RunReport,
) -> Result<(), PipelineError> {
    let family = context.family;
    let shards = discover_shards(&config.input.dir, family.tag(), &detail.pattern)?;
    info!(family = %family, shards = shards.len(), "Processing detail family");

    writer.set_partition(&format!("{}={}", config.sink.family_column, family.tag()))?;

    let mut results = stream::iter(shards.into_iter().map(|shard| {
        let context = context.clone();
        tokio::task::spawn_blocking(move || process_shard(shard, context))
    }))
    .buffer_unordered(config.input.max_concurrent_shards);

    while let Some(joined) = results.next().await {
        let (batches, outcome) = joined.context(TaskJoinSnafu)??;

        for batch in batches {
            writer.write_batch(&batch)?;
        }
        for file in writer.take_finished() {
            report.rows_written += file.record_count as u64;
            emit!(BytesWritten {
                bytes: file.size as u64
            });
            staging.stage(file).await?;
        }

        let family_report = report.family_mut(family);
        family_report.shards += 1;
        family_report.rows_read += outcome.rows_read;
        family_report.key_violations += outcome.key_violations;
        family_report.absorb(&outcome.join);

        emit!(ShardProcessed {
            records: outcome.rows_read,
            family: family.tag()
        });
        emit!(RowsDropped {
            count: outcome.join.descriptor.dropped,
            stage: "descriptor",
            family: family.tag()
        });
        emit!(RowsDropped {
            count: outcome.join.header.dropped,
            stage: "header",
            family: family.tag()
        });
        emit!(FanoutRows {
            count: outcome.join.descriptor.fanout_extra,
            stage: "descriptor",
            family: family.tag()
        });
        emit!(FanoutRows {
            count: outcome.join.header.fanout_extra,
            stage: "header",
            family: family.tag()
        });
        emit!(KeyViolations {
            count: outcome.key_violations,
            family: family.tag()
        });
    }

    Ok(())
}

/// Parse, normalize, join, and unify one shard. Runs on a blocking worker.
fn process_shard(
    shard: PathBuf,
    context: FamilyContext,
) -> Result<(Vec<RecordBatch>, ShardOutcome), PipelineError> {
    let reader = CsvShardReader::new(context.schema.clone(), context.batch_size);

    let mut outcome = ShardOutcome::default();
    let mut unified: Vec<RecordBatch> = Vec::new();
    let mut failure: Option<PipelineError> = None;

    let rows_read = reader.read_batches(&shard, &mut |batch| {
        let result = (|| -> Result<(), PipelineError> {
            let normalized = context.normalizer.normalize(&batch)?;
            outcome.key_violations += normalized.violations;

            let (combined, stats) = context.denormalizer.denormalize(&normalized.batch)?;
            outcome.join.merge(&stats);

            if combined.num_rows() > 0 {
                let batch = unify::unify_batch(
                    &combined,
                    context.family,
                    &context.value_column,
                    &context.unified_value,
                    &context.family_column,
                    &context.target,
                )?;
                unified.push(batch);
            }
            Ok(())
        })();

        match result {
            Ok(()) => ControlFlow::Continue(()),
            Err(error) => {
                failure = Some(error);
                ControlFlow::Break(())
            }
        }
    })?;

    if let Some(error) = failure {
        return Err(error);
    }

    outcome.rows_read = rows_read as u64;
    Ok((unified, outcome))
}

/// Under the abort policy, any dropped rows fail the run before publish.
fn enforce_gap_policy(config: &Config, report: &RunReport) -> Result<(), PipelineError> {
    if config.join.on_referential_gap != GapPolicy::Abort {
        return Ok(());
    }

    let missing_descriptor = report.numeric.dropped_missing_descriptor
        + report.alphanumeric.dropped_missing_descriptor;
    if missing_descriptor > 0 {
        return Err(JoinError::ReferentialGap {
            stage: "descriptor",
            dropped: missing_descriptor,
        }
        .into());
    }

    let missing_header =
        report.numeric.dropped_missing_header + report.alphanumeric.dropped_missing_header;
    if missing_header > 0 {
        return Err(JoinError::ReferentialGap {
            stage: "header",
            dropped: missing_header,
        }
        .into());
    }

    Ok(())
}
