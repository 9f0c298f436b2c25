//! The two-stage denormalization join.
//!
//! Both stages are hash joins with a replicated, read-only build side:
//! detail rows probe the field-descriptor index on the composite key
//! (worksheet code, line number, column number), then the result probes the
//! report-header index on the report identifier. Inner-join semantics:
//! unmatched probe rows are dropped, and every drop is counted. Duplicate
//! build-side keys fan out — each match is emitted, inherited from the
//! source data rather than corrected.

use std::collections::HashMap;
use std::sync::Arc;

use arrow::array::{Array, ArrayRef, RecordBatch, StringArray, UInt32Array};
use arrow::compute;
use arrow::datatypes::{Field, Schema, SchemaRef};

use crate::error::JoinError;

/// Separator for composing multi-column keys; cannot occur in key tokens.
const KEY_SEPARATOR: char = '\x1f';

/// A broadcast, read-only join input: one table indexed by key.
///
/// Shared via `Arc` across every partition's join task; no task mutates it.
#[derive(Debug)]
pub struct KeyIndex {
    batch: RecordBatch,
    key_columns: Vec<String>,
    map: HashMap<String, Vec<u32>>,
    duplicate_keys: u64,
}

impl KeyIndex {
    /// Build an index over a table on the given key columns.
    ///
    /// Rows whose key contains a null never match and are unreachable from
    /// the map. Keys held by more than one row are counted as duplicates.
    pub fn build(batch: RecordBatch, key_columns: &[String]) -> Result<Self, JoinError> {
        let arrays = key_arrays(&batch, key_columns)?;

        let mut map: HashMap<String, Vec<u32>> = HashMap::with_capacity(batch.num_rows());
        for row in 0..batch.num_rows() {
            if let Some(key) = compose_key(&arrays, row) {
                map.entry(key).or_default().push(row as u32);
            }
        }

        let duplicate_keys = map.values().filter(|rows| rows.len() > 1).count() as u64;

        Ok(Self {
            batch,
            key_columns: key_columns.to_vec(),
            map,
            duplicate_keys,
        })
    }

    /// The indexed table.
    pub fn batch(&self) -> &RecordBatch {
        &self.batch
    }

    /// Number of distinct keys held by more than one row.
    pub fn duplicate_keys(&self) -> u64 {
        self.duplicate_keys
    }

    /// Number of indexed rows.
    pub fn num_rows(&self) -> usize {
        self.batch.num_rows()
    }

    /// The build-side columns carried into join output: everything except
    /// the key columns (the probe side already has those).
    fn carried_fields(&self) -> Vec<(usize, Field)> {
        self.batch
            .schema()
            .fields()
            .iter()
            .enumerate()
            .filter(|(_, field)| !self.key_columns.contains(field.name()))
            .map(|(index, field)| (index, field.as_ref().clone()))
            .collect()
    }
}

/// Per-stage join accounting.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StageStats {
    /// Probe rows entering the stage.
    pub input_rows: u64,
    /// Rows emitted (>= matched probe rows when the build side fans out).
    pub output_rows: u64,
    /// Probe rows with no build-side match, dropped by inner-join semantics.
    pub dropped: u64,
    /// Extra rows emitted beyond one per matched probe row.
    pub fanout_extra: u64,
}

impl StageStats {
    pub fn merge(&mut self, other: StageStats) {
        self.input_rows += other.input_rows;
        self.output_rows += other.output_rows;
        self.dropped += other.dropped;
        self.fanout_extra += other.fanout_extra;
    }
}

/// Accounting for one batch through both join stages.
#[derive(Debug, Clone, Copy, Default)]
pub struct BatchJoinStats {
    pub descriptor: StageStats,
    pub header: StageStats,
}

impl BatchJoinStats {
    pub fn merge(&mut self, other: &BatchJoinStats) {
        self.descriptor.merge(other.descriptor);
        self.header.merge(other.header);
    }
}

/// Inner hash join: probe `batch` against `index` on `probe_keys`.
///
/// Output columns are the probe columns followed by the build side's
/// non-key columns. Every build-side match is emitted.
pub fn hash_join(
    batch: &RecordBatch,
    probe_keys: &[String],
    index: &KeyIndex,
) -> Result<(RecordBatch, StageStats), JoinError> {
    let probe_arrays = key_arrays(batch, probe_keys)?;

    let mut probe_indices: Vec<u32> = Vec::with_capacity(batch.num_rows());
    let mut build_indices: Vec<u32> = Vec::with_capacity(batch.num_rows());
    let mut stats = StageStats {
        input_rows: batch.num_rows() as u64,
        ..StageStats::default()
    };

    for row in 0..batch.num_rows() {
        let matches = compose_key(&probe_arrays, row)
            .and_then(|key| index.map.get(&key));
        match matches {
            Some(rows) => {
                stats.fanout_extra += (rows.len() - 1) as u64;
                for build_row in rows {
                    probe_indices.push(row as u32);
                    build_indices.push(*build_row);
                }
            }
            None => stats.dropped += 1,
        }
    }

    stats.output_rows = probe_indices.len() as u64;

    let probe_take = UInt32Array::from(probe_indices);
    let build_take = UInt32Array::from(build_indices);

    let mut fields: Vec<Field> = batch
        .schema()
        .fields()
        .iter()
        .map(|f| f.as_ref().clone())
        .collect();
    let mut columns: Vec<ArrayRef> = batch
        .columns()
        .iter()
        .map(|column| compute::take(column, &probe_take, None))
        .collect::<Result<_, _>>()
        .map_err(|source| JoinError::Gather { source })?;

    for (index_col, field) in index.carried_fields() {
        let taken = compute::take(index.batch.column(index_col), &build_take, None)
            .map_err(|source| JoinError::Gather { source })?;
        fields.push(field);
        columns.push(taken);
    }

    let schema = Arc::new(Schema::new(fields));
    let joined = RecordBatch::try_new(schema, columns)
        .map_err(|source| JoinError::Gather { source })?;

    Ok((joined, stats))
}

/// Two-stage denormalizer for one detail family.
///
/// Metadata join first, header join second. The order is a broadcast-size
/// optimization; the emitted row set does not depend on it.
pub struct Denormalizer {
    dictionary: Arc<KeyIndex>,
    headers: Arc<KeyIndex>,
    composite_keys: Vec<String>,
    report_key: Vec<String>,
}

impl Denormalizer {
    pub fn new(
        dictionary: Arc<KeyIndex>,
        headers: Arc<KeyIndex>,
        composite_keys: Vec<String>,
        report_key: String,
    ) -> Self {
        Self {
            dictionary,
            headers,
            composite_keys,
            report_key: vec![report_key],
        }
    }

    /// The schema the joins produce for a given detail-family schema.
    ///
    /// Fails if the three inputs would collide on a non-key column name.
    pub fn joined_schema(&self, detail_schema: &SchemaRef) -> Result<SchemaRef, JoinError> {
        let mut fields: Vec<Field> = detail_schema
            .fields()
            .iter()
            .map(|f| f.as_ref().clone())
            .collect();
        for (_, field) in self.dictionary.carried_fields() {
            fields.push(field);
        }
        for (_, field) in self.headers.carried_fields() {
            fields.push(field);
        }

        let mut seen = std::collections::HashSet::new();
        for field in &fields {
            if !seen.insert(field.name().clone()) {
                return Err(JoinError::DuplicateOutputColumn {
                    column: field.name().clone(),
                });
            }
        }

        Ok(Arc::new(Schema::new(fields)))
    }

    /// Run one detail batch through both join stages.
    pub fn denormalize(
        &self,
        batch: &RecordBatch,
    ) -> Result<(RecordBatch, BatchJoinStats), JoinError> {
        let (described, descriptor) = hash_join(batch, &self.composite_keys, &self.dictionary)?;
        let (combined, header) = hash_join(&described, &self.report_key, &self.headers)?;

        Ok((combined, BatchJoinStats { descriptor, header }))
    }
}

fn key_arrays<'a>(
    batch: &'a RecordBatch,
    columns: &[String],
) -> Result<Vec<&'a StringArray>, JoinError> {
    columns
        .iter()
        .map(|column| {
            batch
                .column_by_name(column)
                .and_then(|array| array.as_any().downcast_ref::<StringArray>())
                .ok_or_else(|| JoinError::MissingProbeColumn {
                    column: column.clone(),
                })
        })
        .collect()
}

/// Compose one row's key, or `None` when any component is null.
fn compose_key(arrays: &[&StringArray], row: usize) -> Option<String> {
    let mut key = String::new();
    for (position, array) in arrays.iter().enumerate() {
        if array.is_null(row) {
            return None;
        }
        if position > 0 {
            key.push(KEY_SEPARATOR);
        }
        key.push_str(array.value(row));
    }
    Some(key)
}

#[cfg(test)]
mod tests {
    use super::*;
    use arrow::datatypes::DataType;

    fn string_batch(columns: Vec<(&str, Vec<Option<&str>>)>) -> RecordBatch {
        let fields: Vec<Field> = columns
            .iter()
            .map(|(name, _)| Field::new(*name, DataType::Utf8, true))
            .collect();
        let arrays: Vec<ArrayRef> = columns
            .into_iter()
            .map(|(_, values)| Arc::new(StringArray::from(values)) as ArrayRef)
            .collect();
        RecordBatch::try_new(Arc::new(Schema::new(fields)), arrays).unwrap()
    }

    fn composite_keys() -> Vec<String> {
        vec![
            "wksht_cd".to_string(),
            "line_num".to_string(),
            "clmn_num".to_string(),
        ]
    }

    fn descriptor_index(rows: Vec<(&str, &str, &str, &str)>) -> KeyIndex {
        let batch = string_batch(vec![
            ("wksht_cd", rows.iter().map(|r| Some(r.0)).collect()),
            ("line_num", rows.iter().map(|r| Some(r.1)).collect()),
            ("clmn_num", rows.iter().map(|r| Some(r.2)).collect()),
            ("item_desc", rows.iter().map(|r| Some(r.3)).collect()),
        ]);
        KeyIndex::build(batch, &composite_keys()).unwrap()
    }

    fn header_index(ids: Vec<&str>) -> KeyIndex {
        let batch = string_batch(vec![
            ("rpt_rec_num", ids.iter().map(|id| Some(*id)).collect()),
            ("prvdr_num", ids.iter().map(|_| Some("330024")).collect()),
        ]);
        KeyIndex::build(batch, &["rpt_rec_num".to_string()]).unwrap()
    }

    fn detail_batch(rows: Vec<(&str, &str, &str, &str, &str)>) -> RecordBatch {
        string_batch(vec![
            ("rpt_rec_num", rows.iter().map(|r| Some(r.0)).collect()),
            ("wksht_cd", rows.iter().map(|r| Some(r.1)).collect()),
            ("line_num", rows.iter().map(|r| Some(r.2)).collect()),
            ("clmn_num", rows.iter().map(|r| Some(r.3)).collect()),
            ("itm_val_num", rows.iter().map(|r| Some(r.4)).collect()),
        ])
    }

    #[test]
    fn orphaned_detail_rows_are_dropped_and_counted() {
        // R1 exists; R4 does not. One descriptor matches the R1 item's key.
        let dictionary = Arc::new(descriptor_index(vec![(
            "A000000", "00100", "00100", "Beds",
        )]));
        let headers = Arc::new(header_index(vec!["R1", "R2", "R3"]));
        let denorm = Denormalizer::new(
            dictionary,
            headers,
            composite_keys(),
            "rpt_rec_num".to_string(),
        );

        let batch = detail_batch(vec![
            ("R1", "A000000", "00100", "00100", "250"),
            ("R4", "A000000", "00100", "00100", "100"),
        ]);

        let (combined, stats) = denorm.denormalize(&batch).unwrap();

        assert_eq!(combined.num_rows(), 1);
        assert_eq!(stats.descriptor.dropped, 0);
        assert_eq!(stats.header.dropped, 1);

        let ids = combined
            .column_by_name("rpt_rec_num")
            .unwrap()
            .as_any()
            .downcast_ref::<StringArray>()
            .unwrap();
        assert_eq!(ids.value(0), "R1");
    }

    #[test]
    fn duplicate_descriptor_keys_fan_out() {
        let dictionary = Arc::new(descriptor_index(vec![
            ("A000000", "00100", "00100", "Beds"),
            ("A000000", "00100", "00100", "Beds (revised)"),
        ]));
        assert_eq!(dictionary.duplicate_keys(), 1);

        let headers = Arc::new(header_index(vec!["R1"]));
        let denorm = Denormalizer::new(
            dictionary,
            headers,
            composite_keys(),
            "rpt_rec_num".to_string(),
        );

        let batch = detail_batch(vec![("R1", "A000000", "00100", "00100", "250")]);
        let (combined, stats) = denorm.denormalize(&batch).unwrap();

        assert_eq!(combined.num_rows(), 2);
        assert_eq!(stats.descriptor.fanout_extra, 1);
        assert_eq!(stats.descriptor.output_rows, 2);
        assert_eq!(stats.header.dropped, 0);
    }

    #[test]
    fn rows_missing_a_descriptor_are_dropped_at_stage_one() {
        let dictionary = Arc::new(descriptor_index(vec![(
            "A000000", "00100", "00100", "Beds",
        )]));
        let headers = Arc::new(header_index(vec!["R1"]));
        let denorm = Denormalizer::new(
            dictionary,
            headers,
            composite_keys(),
            "rpt_rec_num".to_string(),
        );

        let batch = detail_batch(vec![
            ("R1", "A000000", "00100", "00100", "250"),
            ("R1", "Z999999", "00100", "00100", "1"),
        ]);

        let (combined, stats) = denorm.denormalize(&batch).unwrap();
        assert_eq!(combined.num_rows(), 1);
        assert_eq!(stats.descriptor.dropped, 1);
        assert_eq!(stats.descriptor.input_rows, 2);
        assert_eq!(stats.header.input_rows, 1);
    }

    #[test]
    fn join_order_does_not_change_the_row_set() {
        let dictionary = Arc::new(descriptor_index(vec![
            ("A000000", "00100", "00100", "Beds"),
            ("G300000", "00200", "00100", "Total revenue"),
        ]));
        let headers = Arc::new(header_index(vec!["R1", "R2"]));

        let batch = detail_batch(vec![
            ("R1", "A000000", "00100", "00100", "250"),
            ("R2", "G300000", "00200", "00100", "17"),
            ("R9", "A000000", "00100", "00100", "3"),
            ("R1", "X000000", "00100", "00100", "8"),
        ]);

        let report_key = vec!["rpt_rec_num".to_string()];

        let (meta_first, s1) = hash_join(&batch, &composite_keys(), &dictionary).unwrap();
        let (meta_then_header, s2) = hash_join(&meta_first, &report_key, &headers).unwrap();

        let (header_first, _) = hash_join(&batch, &report_key, &headers).unwrap();
        let (header_then_meta, _) =
            hash_join(&header_first, &composite_keys(), &dictionary).unwrap();

        assert_eq!(meta_then_header.num_rows(), 2);
        assert_eq!(header_then_meta.num_rows(), 2);
        assert_eq!(s1.dropped + s2.dropped, 2);

        // Same surviving report ids regardless of stage order.
        let collect_ids = |batch: &RecordBatch| {
            let ids = batch
                .column_by_name("rpt_rec_num")
                .unwrap()
                .as_any()
                .downcast_ref::<StringArray>()
                .unwrap();
            let mut values: Vec<String> =
                (0..ids.len()).map(|i| ids.value(i).to_string()).collect();
            values.sort();
            values
        };
        assert_eq!(collect_ids(&meta_then_header), collect_ids(&header_then_meta));
    }

    #[test]
    fn joined_schema_carries_all_non_key_columns_once() {
        let dictionary = Arc::new(descriptor_index(vec![(
            "A000000", "00100", "00100", "Beds",
        )]));
        let headers = Arc::new(header_index(vec!["R1"]));
        let denorm = Denormalizer::new(
            dictionary,
            headers,
            composite_keys(),
            "rpt_rec_num".to_string(),
        );

        let detail = detail_batch(vec![("R1", "A000000", "00100", "00100", "250")]);
        let schema = denorm.joined_schema(&detail.schema()).unwrap();

        let names: Vec<&str> = schema.fields().iter().map(|f| f.name().as_str()).collect();
        assert_eq!(
            names,
            vec![
                "rpt_rec_num",
                "wksht_cd",
                "line_num",
                "clmn_num",
                "itm_val_num",
                "item_desc",
                "prvdr_num",
            ]
        );
    }

    #[test]
    fn colliding_attribute_names_are_rejected() {
        // Dictionary carries a column also present on the detail side.
        let batch = string_batch(vec![
            ("wksht_cd", vec![Some("A000000")]),
            ("line_num", vec![Some("00100")]),
            ("clmn_num", vec![Some("00100")]),
            ("itm_val_num", vec![Some("clash")]),
        ]);
        let dictionary = Arc::new(KeyIndex::build(batch, &composite_keys()).unwrap());
        let headers = Arc::new(header_index(vec!["R1"]));
        let denorm = Denormalizer::new(
            dictionary,
            headers,
            composite_keys(),
            "rpt_rec_num".to_string(),
        );

        let detail = detail_batch(vec![("R1", "A000000", "00100", "00100", "250")]);
        let err = denorm.joined_schema(&detail.schema()).unwrap_err();
        assert!(matches!(err, JoinError::DuplicateOutputColumn { .. }));
    }

    #[test]
    fn null_key_components_never_match() {
        let dictionary = descriptor_index(vec![("A000000", "00100", "00100", "Beds")]);
        let probe = string_batch(vec![
            ("wksht_cd", vec![None]),
            ("line_num", vec![Some("00100")]),
            ("clmn_num", vec![Some("00100")]),
        ]);

        let (joined, stats) = hash_join(&probe, &composite_keys(), &dictionary).unwrap();
        assert_eq!(joined.num_rows(), 0);
        assert_eq!(stats.dropped, 1);
    }
}
