// Copyright 2026 TierIndex Project Authors. Licensed under Apache-2.0.

//! Merge planning over the shared store.
//!
//! The batch script keeps per-(iteration, partition) lists of open buckets;
//! handing out a plan pops one bucket into the writer's processing list and
//! wraps it into a [`MergePlan`] with a freshly named target file.

use itertools::Itertools;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::task_queue::TaskQueue;
use super::{scan_keys, SharedTableIndex};
use crate::index::entry::{partition_dir, DATA_FILE_EXT};
use crate::index::{Identified, IndexError, IndexResult, MergePlan, Token};

/// One size-capped group of same-iteration files, as maintained by the
/// batch script.
#[derive(Debug, Default, Serialize, Deserialize)]
pub(super) struct MergeBucket {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub paths: Vec<String>,
    #[serde(default)]
    pub size: i64,
}

impl Identified for MergeBucket {
    fn id(&self) -> &str {
        &self.id
    }
}

impl SharedTableIndex {
    fn merge_queue(&self, iteration: u32, partition: &str) -> TaskQueue<MergeBucket> {
        TaskQueue::new(
            "merge",
            &self.database,
            &self.table,
            format!("{iteration}:{partition}"),
            self.conn.clone(),
        )
    }

    pub async fn get_merge_plan(
        &self,
        writer_id: &str,
        layer: &str,
        iteration: u32,
    ) -> IndexResult<Option<MergePlan>> {
        if iteration == 0 || iteration as usize > self.config.merge.len() {
            return Err(IndexError::InvalidIteration(iteration).into());
        }
        let mut conn = self.conn.clone();
        let pattern = format!(
            "merge:{}:{}:{}:*:idle",
            self.database, self.table, iteration
        );
        let keys = scan_keys(&mut conn, &pattern).await?.into_iter().sorted();
        for key in keys {
            // merge:<db>:<table>:<iteration>:<partition>:idle
            let Some(partition) = key.split(':').nth(4) else {
                continue;
            };
            let mut queue = self.merge_queue(iteration, partition);
            let Some(bucket) = queue.pop(writer_id, None).await? else {
                continue;
            };
            if bucket.paths.is_empty() {
                continue;
            }
            return Ok(Some(MergePlan {
                id: bucket.id,
                writer_id: writer_id.to_string(),
                layer: layer.to_string(),
                database: self.database.clone(),
                table: self.table.clone(),
                to: format!(
                    "{}/{}.{}.{}",
                    partition,
                    Uuid::new_v4(),
                    iteration + 1,
                    DATA_FILE_EXT
                ),
                from: bucket.paths,
                iteration,
            }));
        }
        Ok(None)
    }

    pub async fn end_merge(&self, plan: &MergePlan) -> Token {
        if plan.from.is_empty() {
            return Token::fulfilled();
        }
        let mut queue = self.merge_queue(plan.iteration, partition_dir(&plan.to));
        let bucket = MergeBucket {
            id: plan.id.clone(),
            ..Default::default()
        };
        Token::from_result(queue.finish(&plan.writer_id, &bucket).await)
    }
}
