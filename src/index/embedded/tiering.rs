// Copyright 2026 TierIndex Project Authors. Licensed under Apache-2.0.

//! Move planning: files past their layer's TTL relocate to the next layer
//! in the configured sequence.

use chrono::Utc;
use uuid::Uuid;

use super::{EmbeddedTableIndex, PartIndex};
use crate::index::entry::partition_dir;
use crate::index::{IndexResult, MovePlan, Token};

impl PartIndex {
    /// First entry of this part older than the layer's TTL, as a move plan
    /// to the next layer (empty `layer_to` when this is the last one).
    /// The file is marked in-flight until `end_move`.
    pub fn get_move_plan(&self, writer_id: &str, layer: &str) -> IndexResult<Option<MovePlan>> {
        let Some(layer_idx) = self.layers.iter().position(|l| l.name == layer) else {
            return Ok(None);
        };
        let ttl_sec = self.layers[layer_idx].ttl_sec;
        if ttl_sec <= 0 {
            return Ok(None);
        }
        let layer_to = self
            .layers
            .get(layer_idx + 1)
            .map(|l| l.name.clone())
            .unwrap_or_default();
        let now_ns = Utc::now().timestamp_nanos_opt().unwrap_or(i64::MAX);

        let mut inner = self.inner.lock();
        let candidate = inner
            .entries
            .values()
            .find(|e| {
                e.layer == layer
                    && !inner.files_in_merge.contains(&e.path)
                    && !inner.files_in_move.contains(&e.path)
                    && now_ns - e.chunk_time >= ttl_sec * 1_000_000_000
            })
            .map(|e| e.path.clone());
        let Some(path) = candidate else {
            return Ok(None);
        };
        inner.files_in_move.insert(path.clone());

        Ok(Some(MovePlan {
            id: Uuid::new_v4().to_string(),
            writer_id: writer_id.to_string(),
            database: self.database.clone(),
            table: self.table.clone(),
            path_from: path.clone(),
            layer_from: layer.to_string(),
            path_to: path,
            layer_to,
        }))
    }

    /// Release the moved file from the in-flight set and arm a flush.
    /// Unknown plans are a no-op.
    pub fn end_move(&self, plan: &MovePlan) -> Token {
        let mut inner = self.inner.lock();
        if !inner.files_in_move.remove(&plan.path_from) {
            return Token::fulfilled();
        }
        self.arm_flush(&mut inner)
    }
}

impl EmbeddedTableIndex {
    pub fn get_move_plan(&self, writer_id: &str, layer: &str) -> IndexResult<Option<MovePlan>> {
        for part in self.layer_parts(layer) {
            if let Some(plan) = part.get_move_plan(writer_id, layer)? {
                return Ok(Some(plan));
            }
        }
        Ok(None)
    }

    pub fn end_move(&self, plan: &MovePlan) -> Token {
        match self.lookup_part(&plan.layer_from, partition_dir(&plan.path_from)) {
            Some(part) => part.end_move(plan),
            None => Token::fulfilled(),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use chrono::Utc;

    use crate::index::embedded::PartIndex;
    use crate::index::{IndexConfig, IndexEntry, Layer};

    fn two_layer_part(dir: &std::path::Path, ttl_sec: i64) -> Arc<PartIndex> {
        let layers = Arc::new(vec![
            Layer {
                name: "l1".into(),
                url: format!("file://{}", dir.display()),
                ttl_sec,
                ..Default::default()
            },
            Layer {
                name: "l2".into(),
                url: "redis://localhost:6379/0".into(),
                ..Default::default()
            },
        ]);
        let part = Arc::new(
            PartIndex::new(
                dir.join("db/tbl/data"),
                "l1".into(),
                "db".into(),
                "tbl".into(),
                "date=2026-08-02/hour=10".into(),
                layers,
                Arc::new(IndexConfig::default_for_test()),
            )
            .unwrap(),
        );
        part.run();
        part
    }

    fn aged_entry(age_secs: i64) -> IndexEntry {
        IndexEntry {
            layer: "l1".into(),
            database: "db".into(),
            table: "tbl".into(),
            path: "date=2026-08-02/hour=10/a.1.parquet".into(),
            size_bytes: 100,
            chunk_time: Utc::now().timestamp_nanos_opt().unwrap() - age_secs * 1_000_000_000,
            writer_id: "w1".into(),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn expired_file_moves_to_the_next_layer() {
        let dir = tempfile::tempdir().unwrap();
        let part = two_layer_part(dir.path(), 20);
        part.batch(vec![aged_entry(30)], &[]).wait().await.unwrap();

        let plan = part.get_move_plan("w1", "l1").unwrap().unwrap();
        assert_eq!(plan.layer_from, "l1");
        assert_eq!(plan.layer_to, "l2");
        assert_eq!(plan.path_from, plan.path_to);

        // In flight until end_move.
        assert!(part.get_move_plan("w1", "l1").unwrap().is_none());
        part.end_move(&plan).wait().await.unwrap();

        // Ending an already-ended plan is a no-op.
        part.end_move(&plan).wait().await.unwrap();

        // The file is eligible again once released.
        assert!(part.get_move_plan("w1", "l1").unwrap().is_some());
        part.stop().await;
    }

    #[tokio::test]
    async fn layers_without_ttl_never_move() {
        let dir = tempfile::tempdir().unwrap();
        let part = two_layer_part(dir.path(), 0);
        part.batch(vec![aged_entry(3600)], &[]).wait().await.unwrap();
        assert!(part.get_move_plan("w1", "l1").unwrap().is_none());
        part.stop().await;
    }

    #[tokio::test]
    async fn fresh_files_stay_put() {
        let dir = tempfile::tempdir().unwrap();
        let part = two_layer_part(dir.path(), 3600);
        part.batch(vec![aged_entry(10)], &[]).wait().await.unwrap();
        assert!(part.get_move_plan("w1", "l1").unwrap().is_none());
        part.stop().await;
    }
}
