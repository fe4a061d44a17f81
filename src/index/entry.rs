// Copyright 2026 TierIndex Project Authors. Licensed under Apache-2.0.

//! The index record for a single opaque data file.

use std::collections::BTreeMap;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use super::{IndexResult, TracedIndexError};

/// Extension of the data files managed by the writer.
pub const DATA_FILE_EXT: &str = "parquet";

/// One data file as seen by the index. Immutable after insertion; an update
/// is a delete plus an insert. Identity and equality are by `path` alone.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct IndexEntry {
    #[serde(default)]
    pub layer: String,
    #[serde(default)]
    pub database: String,
    #[serde(default)]
    pub table: String,
    /// Partition-relative path of the form
    /// `date=YYYY-MM-DD/hour=HH/<name>.<iteration>.<ext>`.
    pub path: String,
    #[serde(default)]
    pub size_bytes: i64,
    #[serde(default)]
    pub row_count: i64,
    /// Creation time of the file, in nanoseconds.
    #[serde(default)]
    pub chunk_time: i64,
    /// Smallest row timestamp in the file, ns. 0 means unset.
    #[serde(default)]
    pub min_time: i64,
    /// Largest row timestamp in the file, ns. 0 means unset.
    #[serde(default)]
    pub max_time: i64,
    #[serde(default)]
    pub writer_id: String,
    /// Per-column minima, when the writer recorded them.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min: Option<BTreeMap<String, serde_json::Value>>,
    /// Per-column maxima, when the writer recorded them.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max: Option<BTreeMap<String, serde_json::Value>>,
}

impl PartialEq for IndexEntry {
    fn eq(&self, other: &Self) -> bool {
        self.path == other.path
    }
}

impl Eq for IndexEntry {}

/// Components of a parsed data-file path.
#[derive(Debug, PartialEq, Eq)]
pub struct ParsedPath<'a> {
    /// The `date=…/hour=…` partition key.
    pub partition: &'a str,
    pub date: NaiveDate,
    pub hour: u32,
    /// File name without the `.<iteration>.<ext>` tail.
    pub name: &'a str,
    pub iteration: u32,
    pub ext: &'a str,
}

impl ParsedPath<'_> {
    /// Start of the partition's hour as a unix timestamp in seconds.
    pub fn hour_unix(&self) -> i64 {
        let midnight = self.date.and_hms_opt(0, 0, 0).expect("midnight is valid");
        midnight.and_utc().timestamp() + i64::from(self.hour) * 3600
    }
}

/// Parse `date=YYYY-MM-DD/hour=HH/<name>.<iteration>.<ext>`.
pub fn parse_path(path: &str) -> IndexResult<ParsedPath<'_>> {
    let malformed = || TracedIndexError::malformed_path(path);

    let mut components = path.split('/');
    let date_dir = components.next().ok_or_else(malformed)?;
    let hour_dir = components.next().ok_or_else(malformed)?;
    let file = components.next().ok_or_else(malformed)?;
    if components.next().is_some() {
        return Err(malformed());
    }

    let date_str = date_dir.strip_prefix("date=").ok_or_else(malformed)?;
    let date = NaiveDate::parse_from_str(date_str, "%Y-%m-%d").map_err(|_| malformed())?;
    let hour_str = hour_dir.strip_prefix("hour=").ok_or_else(malformed)?;
    let hour: u32 = hour_str.parse().map_err(|_| malformed())?;
    if hour > 23 {
        return Err(malformed());
    }

    let (stem, ext) = file.rsplit_once('.').ok_or_else(malformed)?;
    let (name, iteration_str) = stem.rsplit_once('.').ok_or_else(malformed)?;
    let iteration: u32 = iteration_str.parse().map_err(|_| malformed())?;
    if iteration == 0 || name.is_empty() || ext.is_empty() {
        return Err(malformed());
    }

    Ok(ParsedPath {
        partition: &path[..date_dir.len() + 1 + hour_dir.len()],
        date,
        hour,
        name,
        iteration,
        ext,
    })
}

/// The `date=…/hour=…` prefix of a path, or the whole path when it has no
/// directory component.
pub fn partition_dir(path: &str) -> &str {
    match path.rsplit_once('/') {
        Some((dir, _)) => dir,
        None => path,
    }
}

/// First path component, the `date=…` directory.
pub fn day_dir(path: &str) -> &str {
    match path.split_once('/') {
        Some((day, _)) => day,
        None => path,
    }
}

/// Path suffix shared by all files of one merge iteration.
pub fn iteration_suffix(iteration: u32) -> String {
    format!(".{}.{}", iteration, DATA_FILE_EXT)
}
