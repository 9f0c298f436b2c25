//! Family unification: two denormalized detail families, one output schema.
//!
//! The numeric and alphanumeric families differ only in their value column's
//! name. Unification renames that column to the shared value column, tags
//! every row with its originating family, and aligns column order to the
//! unified schema. Column-set differences are a hard error; nothing is
//! silently null-filled.

use std::collections::HashMap;
use std::sync::Arc;

use arrow::array::{ArrayRef, RecordBatch, StringArray};
use arrow::datatypes::{DataType, Field, Schema, SchemaRef};

use crate::error::UnifyError;
use crate::schema::DetailFamily;

/// The unified output schema for one family's joined schema.
///
/// Renames the family's value column to `unified_value` and appends the
/// provenance tag column.
pub fn unified_schema(
    joined: &SchemaRef,
    value_column: &str,
    unified_value: &str,
    family_column: &str,
) -> Result<SchemaRef, UnifyError> {
    if joined.index_of(value_column).is_err() {
        return Err(UnifyError::MissingValueColumn {
            column: value_column.to_string(),
        });
    }

    let mut fields: Vec<Field> = joined
        .fields()
        .iter()
        .map(|field| {
            if field.name() == value_column {
                Field::new(unified_value, DataType::Utf8, true)
            } else {
                field.as_ref().clone()
            }
        })
        .collect();
    fields.push(Field::new(family_column, DataType::Utf8, false));

    Ok(Arc::new(Schema::new(fields)))
}

/// Verify a candidate unified schema matches the established one.
///
/// Column order may differ (batches are re-aligned); column sets may not.
pub fn check_compatible(expected: &SchemaRef, candidate: &SchemaRef) -> Result<(), UnifyError> {
    let expected_names: Vec<&String> =
        expected.fields().iter().map(|field| field.name()).collect();
    let candidate_names: Vec<&String> =
        candidate.fields().iter().map(|field| field.name()).collect();

    let missing: Vec<String> = expected_names
        .iter()
        .filter(|name| !candidate_names.contains(name))
        .map(|name| name.to_string())
        .collect();
    let extra: Vec<String> = candidate_names
        .iter()
        .filter(|name| !expected_names.contains(name))
        .map(|name| name.to_string())
        .collect();

    if !missing.is_empty() || !extra.is_empty() {
        return Err(UnifyError::ColumnSetMismatch { missing, extra });
    }

    Ok(())
}

/// Bring one family's joined batch into the unified schema.
pub fn unify_batch(
    batch: &RecordBatch,
    family: DetailFamily,
    value_column: &str,
    unified_value: &str,
    family_column: &str,
    target: &SchemaRef,
) -> Result<RecordBatch, UnifyError> {
    let mut by_name: HashMap<String, ArrayRef> = HashMap::with_capacity(batch.num_columns() + 1);
    for (index, field) in batch.schema().fields().iter().enumerate() {
        let name = if field.name() == value_column {
            unified_value.to_string()
        } else {
            field.name().clone()
        };
        by_name.insert(name, batch.column(index).clone());
    }

    let tag: ArrayRef = Arc::new(StringArray::from(vec![family.tag(); batch.num_rows()]));
    by_name.insert(family_column.to_string(), tag);

    let mut columns: Vec<ArrayRef> = Vec::with_capacity(target.fields().len());
    let mut missing: Vec<String> = Vec::new();
    for field in target.fields() {
        match by_name.remove(field.name()) {
            Some(array) => columns.push(array),
            None => missing.push(field.name().clone()),
        }
    }

    if !missing.is_empty() || !by_name.is_empty() {
        return Err(UnifyError::ColumnSetMismatch {
            missing,
            extra: by_name.into_keys().collect(),
        });
    }

    RecordBatch::try_new(target.clone(), columns)
        .map_err(|source| UnifyError::Project { source })
}
