// Copyright 2026 TierIndex Project Authors. Licensed under Apache-2.0.

//! Filesystem navigator over databases, tables and hour partitions.

use std::collections::BTreeSet;
use std::path::Path;
use std::sync::Arc;

use crate::index::{IndexResult, Layer, TracedIndexError};

/// Enumerates the directory hierarchy of every `file://` layer. Results are
/// the union across layers.
pub struct EmbeddedDbIndex {
    layers: Arc<Vec<Layer>>,
}

impl EmbeddedDbIndex {
    pub fn new(layers: Vec<Layer>) -> Self {
        Self {
            layers: Arc::new(layers),
        }
    }

    pub fn databases(&self) -> IndexResult<Vec<String>> {
        let mut res = BTreeSet::new();
        for layer in self.layers.iter() {
            let Some(root) = layer.local_path() else {
                continue;
            };
            list_dirs(Path::new(root), &mut res)?;
        }
        Ok(res.into_iter().collect())
    }

    pub fn tables(&self, database: &str) -> IndexResult<Vec<String>> {
        let mut res = BTreeSet::new();
        for layer in self.layers.iter() {
            let Some(root) = layer.local_path() else {
                continue;
            };
            list_dirs(&Path::new(root).join(database), &mut res)?;
        }
        Ok(res.into_iter().collect())
    }

    /// Table-relative paths of the hour partitions, one per
    /// `…/hour=HH` directory found under any layer.
    pub fn paths(&self, database: &str, table: &str) -> IndexResult<Vec<String>> {
        let mut res = BTreeSet::new();
        for layer in self.layers.iter() {
            let Some(root) = layer.local_path() else {
                continue;
            };
            let table_root = Path::new(root).join(database).join(table);
            walk_to_hours(&table_root, &table_root, &mut res)?;
        }
        Ok(res.into_iter().collect())
    }
}

fn list_dirs(dir: &Path, out: &mut BTreeSet<String>) -> IndexResult<()> {
    let read = match std::fs::read_dir(dir) {
        Ok(read) => read,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(()),
        Err(e) => return Err(e.into()),
    };
    for dirent in read {
        let dirent = dirent.map_err(TracedIndexError::from)?;
        if dirent.path().is_dir() {
            out.insert(dirent.file_name().to_string_lossy().into_owned());
        }
    }
    Ok(())
}

/// Descend until a directory named `hour=…` is found, then record its
/// root-relative path and stop descending.
fn walk_to_hours(root: &Path, dir: &Path, out: &mut BTreeSet<String>) -> IndexResult<()> {
    let read = match std::fs::read_dir(dir) {
        Ok(read) => read,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(()),
        Err(e) => return Err(e.into()),
    };
    for dirent in read {
        let dirent = dirent.map_err(TracedIndexError::from)?;
        let path = dirent.path();
        if !path.is_dir() {
            continue;
        }
        if dirent.file_name().to_string_lossy().starts_with("hour=") {
            if let Ok(rel) = path.strip_prefix(root) {
                out.insert(rel.to_string_lossy().into_owned());
            }
            continue;
        }
        walk_to_hours(root, &path, out)?;
    }
    Ok(())
}
