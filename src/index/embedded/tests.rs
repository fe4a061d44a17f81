// Copyright 2026 TierIndex Project Authors. Licensed under Apache-2.0.

//! End-to-end scenarios against a temporary directory tree.

use chrono::{Duration, Utc};
use uuid::Uuid;

use super::EmbeddedTableIndex;
use crate::index::{IndexConfig, IndexEntry, Layer, MergeConfig, QueryOptions};

fn file_layers(root: &std::path::Path) -> Vec<Layer> {
    vec![Layer {
        name: "l1".into(),
        url: format!("file://{}", root.display()),
        ..Default::default()
    }]
}

fn test_config() -> IndexConfig {
    IndexConfig {
        merge: vec![MergeConfig {
            timeout_sec: 10,
            max_size_bytes: 10 * 1024 * 1024,
            merge_iteration_id: 1,
        }],
        drop_grace_sec: 30,
        enable_fsync: false,
    }
}

fn open_index(root: &std::path::Path, config: IndexConfig) -> EmbeddedTableIndex {
    EmbeddedTableIndex::open("default", "test", file_layers(root), config).unwrap()
}

/// One entry every 15 seconds for the trailing three days.
fn three_days_of_entries(now: chrono::DateTime<Utc>) -> Vec<IndexEntry> {
    let mut entries = Vec::new();
    let mut ts = now - Duration::days(3);
    while ts < now {
        entries.push(IndexEntry {
            layer: "l1".into(),
            database: "default".into(),
            table: "test".into(),
            path: format!(
                "date={}/hour={}/{}.1.parquet",
                ts.format("%Y-%m-%d"),
                ts.format("%H"),
                Uuid::new_v4()
            ),
            size_bytes: 1_000_000,
            row_count: 100,
            chunk_time: now.timestamp_nanos_opt().unwrap(),
            min_time: ts.timestamp_nanos_opt().unwrap(),
            max_time: (ts + Duration::seconds(15)).timestamp_nanos_opt().unwrap(),
            writer_id: "w1".into(),
            ..Default::default()
        });
        ts += Duration::seconds(15);
    }
    entries
}

#[tokio::test]
async fn s1_save_and_query() {
    let dir = tempfile::tempdir().unwrap();
    let index = open_index(dir.path(), test_config());
    let now = Utc::now();
    let entries = three_days_of_entries(now);
    assert_eq!(entries.len(), 17_280);

    index.batch(entries, vec![]).wait().await.unwrap();

    let found = index
        .query(&QueryOptions {
            after: Some((now - Duration::days(3)).timestamp_nanos_opt().unwrap()),
            ..Default::default()
        })
        .unwrap();
    assert_eq!(found.len(), 17_280);
    assert_eq!(
        found.iter().map(|e| e.size_bytes).sum::<i64>(),
        17_280_000_000
    );
    index.stop().await;
}

#[tokio::test]
async fn s2_save_then_delete() {
    let dir = tempfile::tempdir().unwrap();
    let index = open_index(dir.path(), test_config());
    let now = Utc::now();
    let entries = three_days_of_entries(now);
    let total = entries.len();

    index.batch(entries.clone(), vec![]).wait().await.unwrap();
    index.batch(vec![], entries).wait().await.unwrap();

    assert!(index.query(&QueryOptions::default()).unwrap().is_empty());

    let mut queued_drops = 0;
    for part in index.layer_parts("l1") {
        let inner = part.inner.lock();
        assert_eq!(inner.parquet_size_bytes, 0);
        assert_eq!(inner.row_count, 0);
        assert_eq!(inner.min_time, 0);
        assert_eq!(inner.max_time, 0);
        queued_drops += inner.drop_queue.len();
    }
    assert_eq!(queued_drops, total);
    index.stop().await;
}

#[tokio::test]
async fn s3_merge_hand_out() {
    let dir = tempfile::tempdir().unwrap();
    let index = open_index(
        dir.path(),
        IndexConfig {
            merge: vec![MergeConfig {
                timeout_sec: 10,
                max_size_bytes: 30_000_000,
                merge_iteration_id: 1,
            }],
            drop_grace_sec: 30,
            enable_fsync: false,
        },
    );
    let now = Utc::now();
    let chunk_time = (now - Duration::minutes(1)).timestamp_nanos_opt().unwrap();
    let entries: Vec<IndexEntry> = (0..100)
        .map(|i| IndexEntry {
            layer: "l1".into(),
            database: "default".into(),
            table: "test".into(),
            path: format!("date={}/hour={}/f{i}.1.parquet", now.format("%Y-%m-%d"), now.format("%H")),
            size_bytes: 1_000_000,
            chunk_time,
            writer_id: "w1".into(),
            ..Default::default()
        })
        .collect();
    index.batch(entries, vec![]).wait().await.unwrap();

    let plan = index.get_merge_plan("w1", "l1", 1).unwrap().unwrap();
    assert_eq!(plan.from.len(), 30);
    assert_eq!(plan.iteration, 1);
    assert!(plan.to.ends_with(".2.parquet"));

    // A second caller sees only what is not in flight.
    let second = index.get_merge_plan("w2", "l1", 1).unwrap().unwrap();
    assert_eq!(second.from.len(), 30);
    assert!(second.from.iter().all(|p| !plan.from.contains(p)));
    index.stop().await;
}

#[tokio::test]
async fn s4_move_on_ttl() {
    let dir = tempfile::tempdir().unwrap();
    let layers = vec![
        Layer {
            name: "l1".into(),
            url: format!("file://{}", dir.path().display()),
            ttl_sec: 20,
            ..Default::default()
        },
        Layer {
            name: "l2".into(),
            url: format!("file://{}/l2", dir.path().display()),
            ..Default::default()
        },
    ];
    let index =
        EmbeddedTableIndex::open("default", "test", layers, test_config()).unwrap();
    let now = Utc::now();
    let entry = IndexEntry {
        layer: "l1".into(),
        database: "default".into(),
        table: "test".into(),
        path: format!("date={}/hour={}/a.1.parquet", now.format("%Y-%m-%d"), now.format("%H")),
        size_bytes: 1_000_000,
        chunk_time: (now - Duration::seconds(30)).timestamp_nanos_opt().unwrap(),
        writer_id: "w1".into(),
        ..Default::default()
    };
    index.batch(vec![entry], vec![]).wait().await.unwrap();

    let plan = index.get_move_plan("w1", "l1").unwrap().unwrap();
    assert_eq!(plan.layer_from, "l1");
    assert_eq!(plan.layer_to, "l2");
    assert_eq!(plan.path_from, plan.path_to);

    assert!(index.get_move_plan("w1", "l1").unwrap().is_none());
    index.stop().await;
}

#[tokio::test]
async fn s5_crash_safe_flush() {
    let dir = tempfile::tempdir().unwrap();
    let now = Utc::now();
    let part_dir = format!("date={}/hour={}", now.format("%Y-%m-%d"), now.format("%H"));
    let entries: Vec<IndexEntry> = (0..10)
        .map(|i| IndexEntry {
            layer: "l1".into(),
            database: "default".into(),
            table: "test".into(),
            path: format!("{part_dir}/f{i}.1.parquet"),
            size_bytes: 100,
            chunk_time: now.timestamp_nanos_opt().unwrap(),
            writer_id: "w1".into(),
            ..Default::default()
        })
        .collect();

    {
        let index = open_index(dir.path(), test_config());
        index.batch(entries, vec![]).wait().await.unwrap();
        index.stop().await;
    }

    // A crash mid-flush leaves a half-written .bak behind; the renamed
    // snapshot must win on restart.
    let abs_part = dir.path().join("default/test/data").join(&part_dir);
    std::fs::write(abs_part.join("metadata.json.bak"), b"{\"type\":\"tr").unwrap();

    let reopened = open_index(dir.path(), test_config());
    let found = reopened.query(&QueryOptions::default()).unwrap();
    assert_eq!(found.len(), 10);

    // And the surviving snapshot is a complete, parseable document whose
    // aggregates match its file list.
    let raw = std::fs::read(abs_part.join("metadata.json")).unwrap();
    let doc: serde_json::Value = serde_json::from_slice(&raw).unwrap();
    let files = doc["files"].as_array().unwrap();
    assert_eq!(files.len(), 10);
    assert_eq!(
        doc["parquet_size_bytes"].as_i64().unwrap(),
        files.iter().map(|f| f["size_bytes"].as_i64().unwrap()).sum::<i64>()
    );
    assert_eq!(doc["wal_sequence"].as_i64(), Some(0));
    reopened.stop().await;
}

#[tokio::test]
async fn s6_drop_scheduling() {
    let dir = tempfile::tempdir().unwrap();
    let index = open_index(dir.path(), test_config());
    let now = Utc::now();
    let entries: Vec<IndexEntry> = (0..100)
        .map(|i| IndexEntry {
            layer: "l1".into(),
            database: "default".into(),
            table: "test".into(),
            path: format!(
                "date={}/hour={}/f{i}.1.parquet",
                now.format("%Y-%m-%d"),
                now.format("%H")
            ),
            size_bytes: 100,
            chunk_time: now.timestamp_nanos_opt().unwrap(),
            writer_id: "w1".into(),
            ..Default::default()
        })
        .collect();
    index.batch(entries.clone(), vec![]).wait().await.unwrap();
    index.batch(vec![], entries).wait().await.unwrap();

    // Plans are scheduled one grace period out...
    let now_s = Utc::now().timestamp();
    for part in index.layer_parts("l1") {
        let inner = part.inner.lock();
        assert_eq!(inner.drop_queue.len(), 100);
        for plan in &inner.drop_queue {
            assert!((plan.time_s - (now_s + 30)).abs() <= 2);
        }
    }
    // ...and are withheld until then.
    assert!(index.get_drop_queue("w1", "l1").unwrap().is_none());
    index.stop().await;

    // With no grace the plan is immediately returnable.
    let dir2 = tempfile::tempdir().unwrap();
    let immediate = open_index(
        dir2.path(),
        IndexConfig {
            drop_grace_sec: 0,
            ..test_config()
        },
    );
    let entry = IndexEntry {
        layer: "l1".into(),
        database: "default".into(),
        table: "test".into(),
        path: format!(
            "date={}/hour={}/g.1.parquet",
            now.format("%Y-%m-%d"),
            now.format("%H")
        ),
        size_bytes: 100,
        chunk_time: now.timestamp_nanos_opt().unwrap(),
        writer_id: "w1".into(),
        ..Default::default()
    };
    immediate.batch(vec![entry.clone()], vec![]).wait().await.unwrap();
    immediate.batch(vec![], vec![entry]).wait().await.unwrap();
    let plan = immediate.get_drop_queue("w1", "l1").unwrap().unwrap();
    assert!((plan.time_s - Utc::now().timestamp()).abs() <= 2);

    immediate.rm_from_drop_queue(&plan).wait().await.unwrap();
    assert!(immediate.get_drop_queue("w1", "l1").unwrap().is_none());
    immediate.stop().await;
}

#[tokio::test]
async fn folder_option_restricts_the_query() {
    let dir = tempfile::tempdir().unwrap();
    let index = open_index(dir.path(), test_config());
    let e1 = IndexEntry {
        layer: "l1".into(),
        database: "default".into(),
        table: "test".into(),
        path: "date=2026-08-01/hour=10/a.1.parquet".into(),
        size_bytes: 1,
        min_time: 1,
        max_time: 2,
        ..Default::default()
    };
    let e2 = IndexEntry {
        path: "date=2026-08-01/hour=11/b.1.parquet".into(),
        ..e1.clone()
    };
    index.batch(vec![e1, e2], vec![]).wait().await.unwrap();

    let found = index
        .query(&QueryOptions {
            folder: Some("date=2026-08-01/hour=10".into()),
            ..Default::default()
        })
        .unwrap();
    assert_eq!(found.len(), 1);
    assert!(found[0].path.ends_with("a.1.parquet"));
    index.stop().await;
}

#[tokio::test]
async fn discovery_reloads_existing_partitions() {
    let dir = tempfile::tempdir().unwrap();
    let e = IndexEntry {
        layer: "l1".into(),
        database: "default".into(),
        table: "test".into(),
        path: "date=2026-08-01/hour=10/a.1.parquet".into(),
        size_bytes: 42,
        min_time: 1,
        max_time: 2,
        writer_id: "w1".into(),
        ..Default::default()
    };
    {
        let index = open_index(dir.path(), test_config());
        index.batch(vec![e.clone()], vec![]).wait().await.unwrap();
        index.stop().await;
    }

    let reopened = open_index(dir.path(), test_config());
    // The partition was discovered by the startup walk, not recreated.
    assert_eq!(reopened.layer_parts("l1").len(), 1);
    let got = reopened.get("l1", &e.path).unwrap();
    assert_eq!(got.size_bytes, 42);
    reopened.stop().await;
}

#[tokio::test]
async fn tokens_armed_before_stop_still_resolve() {
    let dir = tempfile::tempdir().unwrap();
    let index = open_index(dir.path(), test_config());
    let e = IndexEntry {
        layer: "l1".into(),
        database: "default".into(),
        table: "test".into(),
        path: "date=2026-08-01/hour=10/a.1.parquet".into(),
        size_bytes: 1,
        ..Default::default()
    };
    let token = index.batch(vec![e], vec![]);
    index.stop().await;
    token.wait().await.unwrap();
}

#[tokio::test]
async fn unknown_layer_fails_the_batch() {
    let dir = tempfile::tempdir().unwrap();
    let index = open_index(dir.path(), test_config());
    let e = IndexEntry {
        layer: "l9".into(),
        database: "default".into(),
        table: "test".into(),
        path: "date=2026-08-01/hour=10/a.1.parquet".into(),
        ..Default::default()
    };
    let err = index.batch(vec![e], vec![]).wait().await.unwrap_err();
    assert!(err.to_string().contains("l9"));
    index.stop().await;
}
