// Copyright 2026 TierIndex Project Authors. Licensed under Apache-2.0.

//! Hot in-memory index of one partition.
//!
//! A `PartIndex` owns the authoritative entry set of a single
//! (layer, database, table, partition) tuple, together with its drop queue
//! and in-flight tracking sets. Mutations are applied in memory under the
//! part lock and batched into an atomic snapshot: a background task writes
//! `metadata.json.bak` and renames it over `metadata.json`. The rename is
//! the commit point; tokens armed before a flush resolve when it lands.

use std::collections::{HashMap, HashSet};
use std::mem;
use std::path::PathBuf;
use std::sync::Arc;

use chrono::Utc;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::io::AsyncWriteExt;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::index::entry::parse_path;
use crate::index::token::{resolve_waiters, FlushWaiter};
use crate::index::{
    IndexConfig, IndexEntry, IndexResult, Layer, QueryOptions, Token, TracedIndexError,
};

pub(crate) const METADATA_FILE: &str = "metadata.json";
const METADATA_BAK_FILE: &str = "metadata.json.bak";

/// Persisted form of one entry inside the partition snapshot.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub(crate) struct PartEntry {
    #[serde(default)]
    pub id: u32,
    #[serde(default)]
    pub layer: String,
    #[serde(default)]
    pub database: String,
    #[serde(default)]
    pub table: String,
    pub path: String,
    #[serde(default)]
    pub size_bytes: i64,
    #[serde(default)]
    pub row_count: i64,
    #[serde(default)]
    pub chunk_time: i64,
    #[serde(default)]
    pub min_time: i64,
    #[serde(default)]
    pub max_time: i64,
    #[serde(default)]
    pub writer_id: String,
    #[serde(default = "default_range")]
    pub range: String,
    #[serde(rename = "type", default = "default_file_type")]
    pub file_type: String,
}

fn default_range() -> String {
    "1h".to_string()
}

fn default_file_type() -> String {
    "compacted".to_string()
}

/// On-disk snapshot document. Unknown top-level keys are skipped on load;
/// absent keys default to zero/empty.
#[derive(Serialize, Deserialize)]
struct PartSnapshot {
    #[serde(rename = "type", default)]
    table: String,
    #[serde(default)]
    parquet_size_bytes: i64,
    #[serde(default)]
    row_count: i64,
    #[serde(default)]
    min_time: i64,
    #[serde(default)]
    max_time: i64,
    #[serde(default)]
    wal_sequence: i64,
    #[serde(default)]
    drop_queue: Vec<crate::index::DropPlan>,
    #[serde(default)]
    files: Vec<PartEntry>,
}

pub(super) struct PartInner {
    pub entries: HashMap<String, PartEntry>,
    pub drop_queue: Vec<crate::index::DropPlan>,
    pub files_in_merge: HashSet<String>,
    pub files_in_move: HashSet<String>,
    pub parquet_size_bytes: i64,
    pub row_count: i64,
    pub min_time: i64,
    pub max_time: i64,
    pub last_id: u32,
    pub waiters: Vec<FlushWaiter>,
}

impl PartInner {
    fn empty() -> Self {
        Self {
            entries: HashMap::new(),
            drop_queue: Vec::new(),
            files_in_merge: HashSet::new(),
            files_in_move: HashSet::new(),
            parquet_size_bytes: 0,
            row_count: 0,
            min_time: 0,
            max_time: 0,
            last_id: 0,
            waiters: Vec::new(),
        }
    }

    fn insert(&mut self, entry: PartEntry) {
        self.parquet_size_bytes += entry.size_bytes;
        self.row_count += entry.row_count;
        // 0 means unset and never participates in the extrema.
        if entry.min_time != 0 {
            self.min_time = if self.min_time == 0 {
                entry.min_time
            } else {
                self.min_time.min(entry.min_time)
            };
        }
        if entry.max_time != 0 {
            self.max_time = if self.max_time == 0 {
                entry.max_time
            } else {
                self.max_time.max(entry.max_time)
            };
        }
        self.entries.insert(entry.path.clone(), entry);
    }

    fn remove(&mut self, path: &str) -> Option<PartEntry> {
        let entry = self.entries.remove(path)?;
        self.parquet_size_bytes -= entry.size_bytes;
        self.row_count -= entry.row_count;
        if entry.min_time == self.min_time {
            self.recalc_min();
        }
        if entry.max_time == self.max_time {
            self.recalc_max();
        }
        Some(entry)
    }

    fn recalc_min(&mut self) {
        self.min_time = self
            .entries
            .values()
            .map(|e| e.min_time)
            .filter(|t| *t != 0)
            .min()
            .unwrap_or(0);
    }

    fn recalc_max(&mut self) {
        self.max_time = self
            .entries
            .values()
            .map(|e| e.max_time)
            .filter(|t| *t != 0)
            .max()
            .unwrap_or(0);
    }
}

/// Index of one partition. See the module docs for the persistence model.
pub struct PartIndex {
    pub(super) layer: String,
    pub(super) database: String,
    pub(super) table: String,
    /// Partition directory relative to the table data root,
    /// `date=YYYY-MM-DD/hour=HH`.
    pub(super) part_path: String,
    /// Absolute directory holding `metadata.json` and the data files.
    dir: PathBuf,
    pub(super) layers: Arc<Vec<Layer>>,
    pub(super) config: Arc<IndexConfig>,
    pub(super) inner: Mutex<PartInner>,
    flush_tx: mpsc::UnboundedSender<()>,
    flush_rx: Mutex<Option<mpsc::UnboundedReceiver<()>>>,
    task: Mutex<(Option<oneshot::Sender<()>>, Option<JoinHandle<()>>)>,
}

impl PartIndex {
    /// Construct the part and rehydrate it from `metadata.json` when one
    /// exists. A missing file is an empty part; a transient `.bak` left by
    /// a crashed flush is ignored. `run` must be called to start flushing.
    pub(super) fn new(
        table_data_root: PathBuf,
        layer: String,
        database: String,
        table: String,
        part_path: String,
        layers: Arc<Vec<Layer>>,
        config: Arc<IndexConfig>,
    ) -> IndexResult<Self> {
        let dir = table_data_root.join(&part_path);
        let (flush_tx, flush_rx) = mpsc::unbounded_channel();
        let part = Self {
            layer,
            database,
            table,
            part_path,
            dir,
            layers,
            config,
            inner: Mutex::new(PartInner::empty()),
            flush_tx,
            flush_rx: Mutex::new(Some(flush_rx)),
            task: Mutex::new((None, None)),
        };
        part.populate()?;
        Ok(part)
    }

    fn populate(&self) -> IndexResult<()> {
        let path = self.dir.join(METADATA_FILE);
        let data = match std::fs::read(&path) {
            Ok(data) => data,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(()),
            Err(e) => return Err(e.into()),
        };
        let snapshot: PartSnapshot = serde_json::from_slice(&data)?;

        let mut inner = self.inner.lock();
        inner.parquet_size_bytes = snapshot.parquet_size_bytes;
        inner.row_count = snapshot.row_count;
        inner.min_time = snapshot.min_time;
        inner.max_time = snapshot.max_time;
        inner.drop_queue = snapshot.drop_queue;
        for entry in snapshot.files {
            inner.last_id = inner.last_id.max(entry.id);
            inner.entries.insert(entry.path.clone(), entry);
        }
        debug!(
            database = %self.database,
            table = %self.table,
            part = %self.part_path,
            files = inner.entries.len(),
            "recovered partition snapshot"
        );
        Ok(())
    }

    /// Insert `add`, remove `rm` by path and enqueue a drop plan for every
    /// entry actually removed. The returned token resolves with the next
    /// flush; when nothing changed it resolves immediately.
    pub fn batch(&self, add: Vec<IndexEntry>, rm: &[IndexEntry]) -> Token {
        for entry in &add {
            if let Err(e) = parse_path(&entry.path) {
                return Token::failed(e);
            }
        }
        let now = Utc::now();
        let now_s = now.timestamp();

        let mut inner = self.inner.lock();
        let add_empty = add.is_empty();
        for entry in add {
            inner.last_id += 1;
            let id = inner.last_id;
            inner.insert(self.to_part_entry(entry, id));
        }
        let mut removed = Vec::new();
        for entry in rm {
            if let Some(old) = inner.remove(&entry.path) {
                removed.push(old);
            }
        }
        if add_empty && removed.is_empty() {
            return Token::fulfilled();
        }
        for old in removed {
            inner.drop_queue.push(crate::index::DropPlan {
                id: Uuid::new_v4().to_string(),
                writer_id: old.writer_id,
                layer: self.layer.clone(),
                database: self.database.clone(),
                table: self.table.clone(),
                path: old.path,
                time_s: now_s + self.config.drop_grace_sec,
            });
        }
        self.arm_flush(&mut inner)
    }

    fn to_part_entry(&self, entry: IndexEntry, id: u32) -> PartEntry {
        PartEntry {
            id,
            layer: self.layer.clone(),
            database: self.database.clone(),
            table: self.table.clone(),
            path: entry.path,
            size_bytes: entry.size_bytes,
            row_count: entry.row_count,
            chunk_time: entry.chunk_time,
            min_time: entry.min_time,
            max_time: entry.max_time,
            writer_id: entry.writer_id,
            range: default_range(),
            file_type: default_file_type(),
        }
    }

    pub(super) fn to_entry(&self, entry: &PartEntry) -> IndexEntry {
        IndexEntry {
            layer: entry.layer.clone(),
            database: entry.database.clone(),
            table: entry.table.clone(),
            path: entry.path.clone(),
            size_bytes: entry.size_bytes,
            row_count: entry.row_count,
            chunk_time: entry.chunk_time,
            min_time: entry.min_time,
            max_time: entry.max_time,
            writer_id: entry.writer_id.clone(),
            min: None,
            max: None,
        }
    }

    /// In-memory lookup, no I/O.
    pub fn get(&self, path: &str) -> Option<IndexEntry> {
        let inner = self.inner.lock();
        inner.entries.get(path).map(|e| self.to_entry(e))
    }

    /// Linear scan with path/time filters. Order is unspecified.
    pub fn query(&self, options: &QueryOptions) -> Vec<IndexEntry> {
        let suffix = options.iteration.map(crate::index::iteration_suffix);
        let inner = self.inner.lock();
        inner
            .entries
            .values()
            .filter(|e| match &suffix {
                Some(suffix) => e.path.ends_with(suffix),
                None => true,
            })
            .filter(|e| match options.before {
                Some(before) => e.min_time <= before,
                None => true,
            })
            .filter(|e| match options.after {
                Some(after) => e.max_time >= after,
                None => true,
            })
            .map(|e| self.to_entry(e))
            .collect()
    }

    /// Queue a waiter for the next flush and wake the flush task.
    pub(super) fn arm_flush(&self, inner: &mut PartInner) -> Token {
        let (tx, rx) = oneshot::channel();
        inner.waiters.push(tx);
        match self.flush_tx.send(()) {
            Ok(()) => Token::flush(rx),
            Err(_) => {
                // The flush loop is gone and will never drain this waiter.
                inner.waiters.pop();
                Token::failed(TracedIndexError::shutdown())
            }
        }
    }

    pub(super) fn part_path(&self) -> &str {
        &self.part_path
    }

    /// Spawn the single-writer flush task. Mutations arm the next flush;
    /// `stop` drains.
    pub fn run(self: &Arc<Self>) {
        let mut rx = self
            .flush_rx
            .lock()
            .take()
            .expect("part flush loop started twice");
        let (stop_tx, mut stop_rx) = oneshot::channel();
        let part = self.clone();
        let handle = tokio::spawn(async move {
            loop {
                tokio::select! {
                    received = rx.recv() => {
                        if received.is_none() {
                            break;
                        }
                        // Collapse queued wakeups into one snapshot.
                        while rx.try_recv().is_ok() {}
                        part.flush().await;
                    }
                    _ = &mut stop_rx => {
                        // Refuse new wakeups, then drain what is queued.
                        rx.close();
                        while rx.try_recv().is_ok() {}
                        part.flush().await;
                        break;
                    }
                }
            }
        });
        *self.task.lock() = (Some(stop_tx), Some(handle));
    }

    /// Stop the flush loop and wait for it. Pending mutations are flushed
    /// once more on the way out.
    pub async fn stop(&self) {
        let (stop_tx, handle) = {
            let mut task = self.task.lock();
            (task.0.take(), task.1.take())
        };
        if let Some(tx) = stop_tx {
            let _ = tx.send(());
        }
        if let Some(handle) = handle {
            let _ = handle.await;
        }
    }

    /// Snapshot the in-memory state and commit it via temp-file + rename.
    /// Failures resolve the waiting tokens; the part stays usable and the
    /// next flush rewrites the full snapshot.
    async fn flush(self: &Arc<Self>) {
        let (snapshot, waiters) = {
            let mut inner = self.inner.lock();
            let waiters = mem::take(&mut inner.waiters);
            if waiters.is_empty() {
                return;
            }
            let mut files: Vec<PartEntry> = inner.entries.values().cloned().collect();
            files.sort_unstable_by_key(|e| e.id);
            let snapshot = PartSnapshot {
                table: self.table.clone(),
                parquet_size_bytes: inner.parquet_size_bytes,
                row_count: inner.row_count,
                min_time: inner.min_time,
                max_time: inner.max_time,
                wal_sequence: 0,
                drop_queue: inner.drop_queue.clone(),
                files,
            };
            (snapshot, waiters)
        };

        let res = self.write_snapshot(&snapshot).await;
        if let Err(e) = &res {
            warn!(
                part = %self.part_path,
                error = %e,
                "partition flush failed"
            );
        }
        resolve_waiters(waiters, res);
    }

    async fn write_snapshot(&self, snapshot: &PartSnapshot) -> IndexResult<()> {
        let bytes = serde_json::to_vec(snapshot)?;
        tokio::fs::create_dir_all(&self.dir).await?;
        let bak = self.dir.join(METADATA_BAK_FILE);
        let mut file = tokio::fs::File::create(&bak).await?;
        file.write_all(&bytes).await?;
        if self.config.enable_fsync {
            file.sync_data().await?;
        }
        drop(file);
        tokio::fs::rename(&bak, self.dir.join(METADATA_FILE)).await?;
        Ok(())
    }
}
