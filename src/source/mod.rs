//! Shard discovery and typed CSV loading.
//!
//! Each record family spans an arbitrary number of headerless CSV shard
//! files matched by a filename glob. Discovery lists the input directory
//! once per family and returns the matches in sorted order so runs are
//! deterministic.

mod reader;

pub use reader::CsvShardReader;

use std::path::PathBuf;

use regex::Regex;

use crate::error::{BadPatternSnafu, SourceError};
use snafu::ResultExt;

/// Compile a filename glob (`*` and `?` wildcards) into an anchored regex.
///
/// Everything except the two wildcards is matched literally, so patterns
/// like `*_2022_NMRC.CSV` treat the dot as a dot.
pub fn compile_pattern(pattern: &str) -> Result<Regex, SourceError> {
    let mut expr = String::with_capacity(pattern.len() + 8);
    expr.push('^');
    for ch in pattern.chars() {
        match ch {
            '*' => expr.push_str(".*"),
            '?' => expr.push('.'),
            other => expr.push_str(&regex::escape(&other.to_string())),
        }
    }
    expr.push('$');
    Regex::new(&expr).context(BadPatternSnafu { pattern })
}

/// List the shard files for one family.
///
/// Fails with [`SourceError::NoShards`] when nothing matches: a configured
/// family with zero shards is a misconfiguration, not an empty dataset.
pub fn discover_shards(
    dir: &str,
    family: &str,
    pattern: &str,
) -> Result<Vec<PathBuf>, SourceError> {
    let matcher = compile_pattern(pattern)?;

    let entries = std::fs::read_dir(dir).map_err(|source| SourceError::ListDir {
        dir: dir.to_string(),
        source,
    })?;

    let mut shards: Vec<PathBuf> = entries
        .filter_map(|entry| entry.ok())
        .map(|entry| entry.path())
        .filter(|path| {
            path.is_file()
                && path
                    .file_name()
                    .and_then(|name| name.to_str())
                    .is_some_and(|name| matcher.is_match(name))
        })
        .collect();

    if shards.is_empty() {
        return Err(SourceError::NoShards {
            family: family.to_string(),
            dir: dir.to_string(),
            pattern: pattern.to_string(),
        });
    }

    shards.sort();
    Ok(shards)
}
