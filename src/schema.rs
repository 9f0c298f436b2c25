//! Schema construction from configured column lists.
//!
//! Shards are headerless and every column is read as a raw string. Building
//! the Arrow schema from the configured column list (rather than inferring
//! it) is what keeps fixed-width key tokens like `00100` intact: no reader
//! ever gets the chance to re-type them as numbers.

use std::fmt;
use std::sync::Arc;

use arrow::datatypes::{DataType, Field, Schema, SchemaRef};
use serde::{Deserialize, Serialize};

/// The two detail-item record families.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DetailFamily {
    Numeric,
    Alphanumeric,
}

impl DetailFamily {
    /// Provenance tag value written to the output's family column.
    pub fn tag(self) -> &'static str {
        match self {
            DetailFamily::Numeric => "numeric",
            DetailFamily::Alphanumeric => "alphanumeric",
        }
    }

    /// Both families, in processing order.
    pub fn all() -> [DetailFamily; 2] {
        [DetailFamily::Numeric, DetailFamily::Alphanumeric]
    }
}

impl fmt::Display for DetailFamily {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.tag())
    }
}

/// Build the explicit all-string schema for a family's column list.
///
/// Every field is `Utf8` and nullable (empty CSV fields decode to null).
pub fn family_schema(columns: &[String]) -> SchemaRef {
    let fields: Vec<Field> = columns
        .iter()
        .map(|name| Field::new(name, DataType::Utf8, true))
        .collect();
    Arc::new(Schema::new(fields))
}
