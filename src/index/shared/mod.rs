// Copyright 2026 TierIndex Project Authors. Licensed under Apache-2.0.

//! Shared-store backend: the index lives in a single-instance store reached
//! over `redis://` / `rediss://`, with all multi-step transitions executed
//! server-side.
//!
//! Key layout:
//! - `files:<db>:<table>:<date=…>` — hash, field = full path, value = entry.
//! - `folders:<db>:<table>` — membership hash of partition directories.
//! - `merge:<db>:<table>:<iteration>:<partition>:{idle,<writer>:processing}`
//! - `move:<db>:<table>:…`, `drop:<db>:<table>:…` — same pattern.

use std::sync::Arc;

use chrono::{DateTime, TimeZone, Utc};
use itertools::Itertools;
use redis::aio::ConnectionManager;
use serde::{Deserialize, Serialize};
use tokio::sync::oneshot;
use tracing::info;

mod db_index;
mod drop;
mod kv;
mod merge;
mod scripts;
mod task_queue;
mod tiering;

pub use db_index::SharedDbIndex;
pub use kv::SharedKvStore;

use scripts::PATCH_INDEX;

use super::entry::{day_dir, parse_path};
use super::{IndexConfig, IndexEntry, IndexResult, QueryOptions, Token, TracedIndexError};

/// Wire form of an entry in the shared store. Row timestamps travel as
/// strings next to the zeroed numeric fields, keeping full 64-bit precision
/// through the store's JSON handling.
#[derive(Serialize, Deserialize)]
pub(super) struct SharedEntry {
    #[serde(flatten)]
    entry: IndexEntry,
    #[serde(default)]
    str_min_time: String,
    #[serde(default)]
    str_max_time: String,
    /// ADD or DELETE.
    #[serde(default)]
    cmd: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    drop_id: String,
    #[serde(default, skip_serializing_if = "i64_is_zero")]
    drop_time_s: i64,
}

fn i64_is_zero(v: &i64) -> bool {
    *v == 0
}

impl SharedEntry {
    fn to_wire(mut entry: IndexEntry, cmd: &str) -> Self {
        let str_min_time = entry.min_time.to_string();
        let str_max_time = entry.max_time.to_string();
        entry.min_time = 0;
        entry.max_time = 0;
        Self {
            entry,
            str_min_time,
            str_max_time,
            cmd: cmd.to_string(),
            drop_id: String::new(),
            drop_time_s: 0,
        }
    }

    fn into_entry(mut self) -> IndexEntry {
        if let Ok(t) = self.str_min_time.parse() {
            self.entry.min_time = t;
        }
        if let Ok(t) = self.str_max_time.parse() {
            self.entry.max_time = t;
        }
        self.entry
    }
}

/// Table index backed by the shared store.
pub struct SharedTableIndex {
    pub(super) database: String,
    pub(super) table: String,
    pub(super) config: Arc<IndexConfig>,
    pub(super) conn: ConnectionManager,
}

impl SharedTableIndex {
    /// Connect to the store at `url` (`redis://…`, `rediss://…`; TLS
    /// verification options ride on the URL).
    pub async fn open(
        url: &str,
        database: &str,
        table: &str,
        config: IndexConfig,
    ) -> IndexResult<Self> {
        let client = redis::Client::open(url).map_err(TracedIndexError::from)?;
        let conn = ConnectionManager::new(client)
            .await
            .map_err(TracedIndexError::from)?;
        info!(database, table, "connected shared table index");
        Ok(Self {
            database: database.to_string(),
            table: table.to_string(),
            config: Arc::new(config),
            conn,
        })
    }

    /// Apply the batch through the server-side patch script. The token
    /// resolves when the script has run; transport errors fail it.
    pub async fn batch(&self, add: Vec<IndexEntry>, rm: Vec<IndexEntry>) -> Token {
        if add.is_empty() && rm.is_empty() {
            return Token::fulfilled();
        }
        let now_s = Utc::now().timestamp();
        let mut payloads = Vec::with_capacity(add.len() + rm.len());
        for entry in add {
            if let Err(e) = parse_path(&entry.path) {
                return Token::failed(e);
            }
            match serde_json::to_string(&SharedEntry::to_wire(entry, "ADD")) {
                Ok(raw) => payloads.push(raw),
                Err(e) => return Token::failed(e.into()),
            }
        }
        for entry in rm {
            if let Err(e) = parse_path(&entry.path) {
                return Token::failed(e);
            }
            let mut wire = SharedEntry::to_wire(entry, "DELETE");
            wire.drop_id = uuid::Uuid::new_v4().to_string();
            wire.drop_time_s = now_s + self.config.drop_grace_sec;
            match serde_json::to_string(&wire) {
                Ok(raw) => payloads.push(raw),
                Err(e) => return Token::failed(e.into()),
            }
        }
        let max_sizes = self
            .config
            .merge
            .iter()
            .map(|m| m.max_size_bytes)
            .collect::<Vec<_>>();
        let max_sizes = match serde_json::to_string(&max_sizes) {
            Ok(raw) => raw,
            Err(e) => return Token::failed(e.into()),
        };

        let database = self.database.clone();
        let table = self.table.clone();
        let mut conn = self.conn.clone();
        let (tx, rx) = oneshot::channel();
        tokio::spawn(async move {
            let script = redis::Script::new(PATCH_INDEX);
            let mut invocation = script.prepare_invoke();
            invocation.arg(database).arg(table).arg(max_sizes);
            for payload in &payloads {
                invocation.arg(payload);
            }
            let res: Result<i64, _> = invocation.invoke_async(&mut conn).await;
            let res = res
                .map(|_| ())
                .map_err(|e| Arc::new(TracedIndexError::from(e)));
            let _ = tx.send(res);
        });
        Token::flush(rx)
    }

    /// Entry lookup from the day's file hash.
    pub async fn get(&self, _layer: &str, path: &str) -> Option<IndexEntry> {
        let key = format!("files:{}:{}:{}", self.database, self.table, day_dir(path));
        let mut conn = self.conn.clone();
        let raw: Option<String> = redis::cmd("HGET")
            .arg(&key)
            .arg(path)
            .query_async(&mut conn)
            .await
            .ok()?;
        let wire: SharedEntry = serde_json::from_str(&raw?).ok()?;
        Some(wire.into_entry())
    }

    pub async fn query(&self, options: &QueryOptions) -> IndexResult<Vec<IndexEntry>> {
        let mut conn = self.conn.clone();
        let mut entries = Vec::new();
        for key in self.main_keys(&mut conn, options).await? {
            for (path, raw) in hscan_pairs(&mut conn, &key).await? {
                let Ok(parsed) = parse_path(&path) else {
                    continue;
                };
                if let Some(folder) = &options.folder {
                    if parsed.partition != folder {
                        continue;
                    }
                }
                if let Some(iteration) = options.iteration {
                    if parsed.iteration != iteration {
                        continue;
                    }
                }
                let hour_unix = parsed.hour_unix();
                if let Some(after) = options.after {
                    let after_s = after.div_euclid(1_000_000_000);
                    if hour_unix < after_s - after_s.rem_euclid(3600) {
                        continue;
                    }
                }
                if let Some(before) = options.before {
                    if hour_unix >= before.div_euclid(1_000_000_000) {
                        continue;
                    }
                }
                let Ok(wire) = serde_json::from_str::<SharedEntry>(&raw) else {
                    continue;
                };
                let entry = wire.into_entry();
                if let Some(before) = options.before {
                    if entry.min_time > before {
                        continue;
                    }
                }
                if let Some(after) = options.after {
                    if entry.max_time < after {
                        continue;
                    }
                }
                entries.push(entry);
            }
        }
        Ok(entries)
    }

    /// The day hashes a query has to visit.
    async fn main_keys(
        &self,
        conn: &mut ConnectionManager,
        options: &QueryOptions,
    ) -> IndexResult<Vec<String>> {
        let files_prefix = format!("files:{}:{}:", self.database, self.table);

        if let Some(folder) = &options.folder {
            let key = format!("{files_prefix}{}", day_dir(folder.trim_start_matches('/')));
            let exists: i64 = redis::cmd("EXISTS")
                .arg(&key)
                .query_async(conn)
                .await
                .map_err(TracedIndexError::from)?;
            return Ok(if exists > 0 { vec![key] } else { vec![] });
        }

        if let (Some(after), Some(before)) = (options.after, options.before) {
            let mut keys = Vec::new();
            let mut day = ns_to_datetime(after).date_naive();
            // `before` is an exclusive bound on row time; the last calendar
            // day it can touch is the one containing `before - 1ns`.
            let last = ns_to_datetime(before.saturating_sub(1)).date_naive();
            while day <= last {
                let key = format!("{files_prefix}date={}", day.format("%Y-%m-%d"));
                let exists: i64 = redis::cmd("EXISTS")
                    .arg(&key)
                    .query_async(conn)
                    .await
                    .map_err(TracedIndexError::from)?;
                if exists > 0 {
                    keys.push(key);
                }
                let Some(next) = day.succ_opt() else {
                    break;
                };
                day = next;
            }
            return Ok(keys);
        }

        let pattern = format!("{files_prefix}date=*");
        let mut keys = scan_keys(conn, &pattern).await?;
        keys.sort_unstable();
        let day_after = options
            .after
            .map(|after| ns_to_datetime(after).date_naive());
        let day_before = options.before.map(ns_to_datetime);
        keys.retain(|key| {
            let Some(date_str) = key.rsplit(':').next().and_then(|s| s.strip_prefix("date=")) else {
                return false;
            };
            let Ok(date) = chrono::NaiveDate::parse_from_str(date_str, "%Y-%m-%d") else {
                return false;
            };
            if let Some(after) = day_after {
                if date < after {
                    return false;
                }
            }
            if let Some(before) = day_before {
                let day_start = Utc
                    .from_utc_datetime(&date.and_hms_opt(0, 0, 0).expect("midnight is valid"));
                if day_start >= before {
                    return false;
                }
            }
            true
        });
        Ok(keys)
    }

    pub async fn stop(&self) {}
}

fn ns_to_datetime(ns: i64) -> DateTime<Utc> {
    Utc.timestamp_opt(ns.div_euclid(1_000_000_000), 0)
        .single()
        .unwrap_or_else(|| Utc.timestamp_opt(0, 0).unwrap())
}

/// SCAN the whole keyspace for `pattern`.
pub(super) async fn scan_keys(
    conn: &mut ConnectionManager,
    pattern: &str,
) -> IndexResult<Vec<String>> {
    let mut keys = Vec::new();
    let mut cursor: u64 = 0;
    loop {
        let (next, batch): (u64, Vec<String>) = redis::cmd("SCAN")
            .arg(cursor)
            .arg("MATCH")
            .arg(pattern)
            .arg("COUNT")
            .arg(1000)
            .query_async(conn)
            .await
            .map_err(TracedIndexError::from)?;
        keys.extend(batch);
        cursor = next;
        if cursor == 0 {
            break;
        }
    }
    Ok(keys)
}

/// HSCAN every (field, value) pair of `key`.
pub(super) async fn hscan_pairs(
    conn: &mut ConnectionManager,
    key: &str,
) -> IndexResult<Vec<(String, String)>> {
    let mut pairs = Vec::new();
    let mut cursor: u64 = 0;
    loop {
        let (next, flat): (u64, Vec<String>) = redis::cmd("HSCAN")
            .arg(key)
            .arg(cursor)
            .arg("COUNT")
            .arg(10_000)
            .query_async(conn)
            .await
            .map_err(TracedIndexError::from)?;
        pairs.extend(flat.into_iter().tuples());
        cursor = next;
        if cursor == 0 {
            break;
        }
    }
    Ok(pairs)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wire_entries_keep_timestamps_as_strings() {
        let entry = IndexEntry {
            layer: "l1".into(),
            database: "db".into(),
            table: "tbl".into(),
            path: "date=2026-08-02/hour=10/a.1.parquet".into(),
            size_bytes: 7,
            min_time: 1_722_576_000_000_000_001,
            max_time: 1_722_579_600_000_000_002,
            writer_id: "w1".into(),
            ..Default::default()
        };
        let wire = SharedEntry::to_wire(entry, "ADD");
        let raw = serde_json::to_string(&wire).unwrap();
        let value: serde_json::Value = serde_json::from_str(&raw).unwrap();
        assert_eq!(value["min_time"], 0);
        assert_eq!(value["str_min_time"], "1722576000000000001");
        assert_eq!(value["cmd"], "ADD");

        let back: SharedEntry = serde_json::from_str(&raw).unwrap();
        let entry = back.into_entry();
        assert_eq!(entry.min_time, 1_722_576_000_000_000_001);
        assert_eq!(entry.max_time, 1_722_579_600_000_000_002);
    }

    #[tokio::test]
    #[ignore = "requires a redis server on localhost:6379"]
    async fn batch_then_query_round_trip() {
        let index = SharedTableIndex::open(
            "redis://localhost:6379/0",
            "default",
            "test",
            IndexConfig::default_for_test(),
        )
        .await
        .unwrap();
        let now = Utc::now();
        let entry = IndexEntry {
            layer: "l1".into(),
            database: "default".into(),
            table: "test".into(),
            path: format!(
                "date={}/hour={}/{}.1.parquet",
                now.format("%Y-%m-%d"),
                now.format("%H"),
                uuid::Uuid::new_v4()
            ),
            size_bytes: 1_000_000,
            chunk_time: now.timestamp_nanos_opt().unwrap(),
            min_time: now.timestamp_nanos_opt().unwrap(),
            max_time: now.timestamp_nanos_opt().unwrap(),
            writer_id: "w1".into(),
            ..Default::default()
        };
        index
            .batch(vec![entry.clone()], vec![])
            .await
            .wait()
            .await
            .unwrap();

        let got = index.get("l1", &entry.path).await.unwrap();
        assert_eq!(got.size_bytes, 1_000_000);

        let found = index.query(&QueryOptions::default()).await.unwrap();
        assert!(found.iter().any(|e| e.path == entry.path));

        index.batch(vec![], vec![entry]).await.wait().await.unwrap();
    }
}
