// Copyright 2026 TierIndex Project Authors. Licensed under Apache-2.0.

//! Drop-queue hand-out over the shared store. The batch script enqueues a
//! plan per removed entry; hand-out skips plans scheduled in the future.

use chrono::Utc;

use super::task_queue::TaskQueue;
use super::SharedTableIndex;
use crate::index::{DropPlan, IndexResult, Token};

impl SharedTableIndex {
    fn drop_queue(&self) -> TaskQueue<DropPlan> {
        TaskQueue::new("drop", &self.database, &self.table, "", self.conn.clone())
    }

    pub async fn get_drop_queue(
        &self,
        writer_id: &str,
        _layer: &str,
    ) -> IndexResult<Option<DropPlan>> {
        let now_s = Utc::now().timestamp();
        let mut plan = self.drop_queue().pop(writer_id, Some(now_s)).await?;
        if let Some(plan) = plan.as_mut() {
            if plan.writer_id.is_empty() {
                plan.writer_id = writer_id.to_string();
            }
        }
        Ok(plan.filter(|p| !p.path.is_empty()))
    }

    pub async fn rm_from_drop_queue(&self, plan: &DropPlan) -> Token {
        Token::from_result(self.drop_queue().finish(&plan.writer_id, plan).await)
    }
}

#[cfg(test)]
mod tests {
    use crate::index::{IndexConfig, IndexEntry};

    use super::*;

    #[tokio::test]
    #[ignore = "requires a redis server on localhost:6379"]
    async fn removal_schedules_a_drop_plan() {
        let index = SharedTableIndex::open(
            "redis://localhost:6379/0",
            "default",
            "drop_test",
            IndexConfig {
                drop_grace_sec: 0,
                ..IndexConfig::default_for_test()
            },
        )
        .await
        .unwrap();
        let entry = IndexEntry {
            layer: "l1".into(),
            database: "default".into(),
            table: "drop_test".into(),
            path: format!(
                "date=2026-08-02/hour=10/{}.1.parquet",
                uuid::Uuid::new_v4()
            ),
            size_bytes: 10,
            writer_id: "w1".into(),
            ..Default::default()
        };
        index
            .batch(vec![entry.clone()], vec![])
            .await
            .wait()
            .await
            .unwrap();
        index
            .batch(vec![], vec![entry.clone()])
            .await
            .wait()
            .await
            .unwrap();

        let plan = index.get_drop_queue("w1", "l1").await.unwrap().unwrap();
        assert_eq!(plan.path, entry.path);
        index.rm_from_drop_queue(&plan).await.wait().await.unwrap();
    }
}
