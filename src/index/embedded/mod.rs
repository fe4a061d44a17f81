// Copyright 2026 TierIndex Project Authors. Licensed under Apache-2.0.

//! Embedded backend: per-partition JSON snapshots on local `file://` layers.

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use chrono::{TimeZone, Utc};
use parking_lot::Mutex;
use tracing::info;

mod db_index;
mod drop;
mod kv;
mod merge;
mod part;
mod tiering;

#[cfg(test)]
mod tests;

pub use db_index::EmbeddedDbIndex;
pub use kv::EmbeddedKvStore;
pub use part::PartIndex;

use part::METADATA_FILE;

use super::entry::partition_dir;
use super::{
    IndexConfig, IndexEntry, IndexResult, Layer, QueryOptions, Token, TracedIndexError,
};

/// Aggregator over all (layer, partition) pairs of one table. Routes
/// batches and queries to the right [`PartIndex`], discovering partitions
/// on demand.
pub struct EmbeddedTableIndex {
    database: String,
    table: String,
    layers: Arc<Vec<Layer>>,
    config: Arc<IndexConfig>,
    /// layer name → partition dir → part.
    parts: Mutex<HashMap<String, HashMap<String, Arc<PartIndex>>>>,
}

impl EmbeddedTableIndex {
    /// Open the table index, loading every partition that already has a
    /// snapshot under `<layer>/<database>/<table>/data/`.
    pub fn open(
        database: &str,
        table: &str,
        layers: Vec<Layer>,
        config: IndexConfig,
    ) -> IndexResult<Self> {
        let index = Self {
            database: database.to_string(),
            table: table.to_string(),
            layers: Arc::new(layers),
            config: Arc::new(config),
            parts: Mutex::new(HashMap::new()),
        };
        let layers = index.layers.clone();
        for layer in layers.iter() {
            let Some(root) = layer.local_path() else {
                continue;
            };
            let data_root = Path::new(root).join(database).join(table).join("data");
            let mut found = Vec::new();
            collect_snapshot_dirs(&data_root, &data_root, &mut found)?;
            for part_path in found {
                index.populate(&layer.name, &part_path)?;
            }
        }
        info!(
            database,
            table,
            parts = index.parts.lock().values().map(|m| m.len()).sum::<usize>(),
            "opened embedded table index"
        );
        Ok(index)
    }

    /// Get or create the part for (layer, partition dir). Creation loads
    /// the on-disk snapshot and starts the part's flush loop.
    fn populate(&self, layer: &str, part_path: &str) -> IndexResult<Arc<PartIndex>> {
        let mut parts = self.parts.lock();
        if let Some(part) = parts.get(layer).and_then(|m| m.get(part_path)) {
            return Ok(part.clone());
        }
        let layer_conf = self
            .layers
            .iter()
            .find(|l| l.name == layer)
            .ok_or_else(|| TracedIndexError::not_found("layer", layer))?;
        let root = layer_conf
            .local_path()
            .ok_or_else(|| TracedIndexError::unsupported_layer(&layer_conf.url))?;
        let data_root = Path::new(root)
            .join(&self.database)
            .join(&self.table)
            .join("data");
        let part = Arc::new(PartIndex::new(
            data_root,
            layer.to_string(),
            self.database.clone(),
            self.table.clone(),
            part_path.to_string(),
            self.layers.clone(),
            self.config.clone(),
        )?);
        part.run();
        parts
            .entry(layer.to_string())
            .or_default()
            .insert(part_path.to_string(), part.clone());
        Ok(part)
    }

    /// Group entries by (layer, partition dir) and forward the sub-batches.
    /// The token resolves once every involved part has flushed.
    pub fn batch(&self, add: Vec<IndexEntry>, rm: Vec<IndexEntry>) -> Token {
        type Group = (Vec<IndexEntry>, Vec<IndexEntry>);
        let mut groups: HashMap<(String, String), Group> = HashMap::new();
        for entry in add {
            let key = (entry.layer.clone(), partition_dir(&entry.path).to_string());
            groups.entry(key).or_default().0.push(entry);
        }
        for entry in rm {
            let key = (entry.layer.clone(), partition_dir(&entry.path).to_string());
            groups.entry(key).or_default().1.push(entry);
        }

        let mut tokens = Vec::with_capacity(groups.len());
        for ((layer, part_path), (add, rm)) in groups {
            let part = match self.populate(&layer, &part_path) {
                Ok(part) => part,
                Err(e) => return Token::failed(e),
            };
            tokens.push(part.batch(add, &rm));
        }
        Token::all(tokens)
    }

    pub fn get(&self, layer: &str, path: &str) -> Option<IndexEntry> {
        let part = self.populate(layer, partition_dir(path)).ok()?;
        part.get(path)
    }

    /// Union of part queries across every layer with a local path, visiting
    /// only the `(date, hour)` directories the options allow.
    pub fn query(&self, options: &QueryOptions) -> IndexResult<Vec<IndexEntry>> {
        let mut entries = Vec::new();
        let layers = self.layers.clone();
        for layer in layers.iter() {
            let Some(root) = layer.local_path() else {
                continue;
            };
            let data_root = Path::new(root)
                .join(&self.database)
                .join(&self.table)
                .join("data");
            for hour_unix in find_hours(&data_root, options)? {
                let at = Utc
                    .timestamp_opt(hour_unix, 0)
                    .single()
                    .ok_or_else(|| TracedIndexError::malformed_path(hour_unix.to_string()))?;
                let part_path = format!("date={}/hour={}", at.format("%Y-%m-%d"), at.format("%H"));
                let part = self.populate(&layer.name, &part_path)?;
                entries.extend(part.query(options));
            }
        }
        Ok(entries)
    }

    /// Parts of one layer, snapshot of the current map.
    pub(super) fn layer_parts(&self, layer: &str) -> Vec<Arc<PartIndex>> {
        let parts = self.parts.lock();
        parts
            .get(layer)
            .map(|m| m.values().cloned().collect())
            .unwrap_or_default()
    }

    pub(super) fn lookup_part(&self, layer: &str, part_path: &str) -> Option<Arc<PartIndex>> {
        let parts = self.parts.lock();
        parts.get(layer).and_then(|m| m.get(part_path)).cloned()
    }

    /// Stop every part's flush loop and wait for them.
    pub async fn stop(&self) {
        let all: Vec<Arc<PartIndex>> = {
            let parts = self.parts.lock();
            parts.values().flat_map(|m| m.values().cloned()).collect()
        };
        for part in all {
            part.stop().await;
        }
    }
}

/// Directories under `root` that contain a partition snapshot, as
/// `root`-relative paths. Does not descend into matched partitions.
fn collect_snapshot_dirs(root: &Path, dir: &Path, out: &mut Vec<String>) -> IndexResult<()> {
    let read = match std::fs::read_dir(dir) {
        Ok(read) => read,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(()),
        Err(e) => return Err(e.into()),
    };
    if dir.join(METADATA_FILE).is_file() {
        if let Ok(rel) = dir.strip_prefix(root) {
            out.push(rel.to_string_lossy().into_owned());
        }
        return Ok(());
    }
    for dirent in read {
        let dirent = dirent.map_err(|e| TracedIndexError::from(e))?;
        let path = dirent.path();
        if path.is_dir() {
            collect_snapshot_dirs(root, &path, out)?;
        }
    }
    Ok(())
}

/// Hour-partition start times (unix seconds) under the table's data root
/// that pass the query's folder/time filters.
fn find_hours(data_root: &Path, options: &QueryOptions) -> IndexResult<Vec<i64>> {
    let mut hours = Vec::new();
    let read = match std::fs::read_dir(data_root) {
        Ok(read) => read,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(hours),
        Err(e) => return Err(e.into()),
    };
    for date_ent in read {
        let date_ent = date_ent.map_err(TracedIndexError::from)?;
        if !date_ent.path().is_dir() {
            continue;
        }
        let date_name = date_ent.file_name().to_string_lossy().into_owned();
        let Some(date_str) = date_name.strip_prefix("date=") else {
            continue;
        };
        let Ok(date) = chrono::NaiveDate::parse_from_str(date_str, "%Y-%m-%d") else {
            continue;
        };
        for hour_ent in std::fs::read_dir(date_ent.path()).map_err(TracedIndexError::from)? {
            let hour_ent = hour_ent.map_err(TracedIndexError::from)?;
            if !hour_ent.path().is_dir() {
                continue;
            }
            let hour_name = hour_ent.file_name().to_string_lossy().into_owned();
            let Some(hour_str) = hour_name.strip_prefix("hour=") else {
                continue;
            };
            let Ok(hour) = hour_str.parse::<u32>() else {
                continue;
            };
            if let Some(folder) = &options.folder {
                let part_path = format!("{date_name}/{hour_name}");
                if &part_path != folder {
                    continue;
                }
            }
            let hour_unix = date.and_hms_opt(0, 0, 0).expect("midnight is valid").and_utc().timestamp()
                + i64::from(hour) * 3600;
            hours.push(hour_unix);
        }
    }

    if let Some(before) = options.before {
        let before_s = before.div_euclid(1_000_000_000);
        hours.retain(|h| *h < before_s);
    }
    if let Some(after) = options.after {
        let after_s = after.div_euclid(1_000_000_000);
        let after_hour = after_s - after_s.rem_euclid(3600);
        hours.retain(|h| *h >= after_hour);
    }
    Ok(hours)
}
