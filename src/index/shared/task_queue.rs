// Copyright 2026 TierIndex Project Authors. Licensed under Apache-2.0.

//! Generic hand-out protocol over the shared store.
//!
//! A queue is a pair of lists under one base key: `<key>:idle` holds newly
//! minted tasks, `<key>:<writer>:processing` the tasks currently assigned
//! to a writer. `pop` runs the server-side script that moves a task between
//! them atomically; `finish` reconciles completion by id.

use std::marker::PhantomData;

use redis::aio::ConnectionManager;
use serde::de::DeserializeOwned;
use serde::Serialize;
use uuid::Uuid;

use super::scripts::POP_TASK;
use crate::index::{Identified, IndexResult, TracedIndexError};

/// `<prefix>:<db>:<table>[:<suffix>]`.
pub(super) fn queue_key(prefix: &str, database: &str, table: &str, suffix: &str) -> String {
    if suffix.is_empty() {
        format!("{prefix}:{database}:{table}")
    } else {
        format!("{prefix}:{database}:{table}:{suffix}")
    }
}

pub(super) struct TaskQueue<T> {
    prefix: &'static str,
    database: String,
    table: String,
    /// Extra key segments, e.g. `<iteration>:<partition>` for merge queues.
    suffix: String,
    conn: ConnectionManager,
    _task: PhantomData<T>,
}

impl<T> TaskQueue<T>
where
    T: Identified + Serialize + DeserializeOwned,
{
    pub fn new(
        prefix: &'static str,
        database: &str,
        table: &str,
        suffix: impl Into<String>,
        conn: ConnectionManager,
    ) -> Self {
        Self {
            prefix,
            database: database.to_string(),
            table: table.to_string(),
            suffix: suffix.into(),
            conn,
            _task: PhantomData,
        }
    }

    pub fn base_key(&self) -> String {
        queue_key(self.prefix, &self.database, &self.table, &self.suffix)
    }

    /// Hand the first idle task to `writer`. With `now_s` set, tasks whose
    /// `time_s` lies in the future stay queued.
    pub async fn pop(&mut self, writer: &str, now_s: Option<i64>) -> IndexResult<Option<T>> {
        let script = redis::Script::new(POP_TASK);
        let raw: Option<String> = script
            .key(self.base_key())
            .arg(writer)
            .arg(Uuid::new_v4().to_string())
            .arg(now_s.map(|s| s.to_string()).unwrap_or_default())
            .invoke_async(&mut self.conn)
            .await
            .map_err(TracedIndexError::from)?;
        match raw {
            Some(raw) if !raw.is_empty() => Ok(Some(serde_json::from_str(&raw)?)),
            _ => Ok(None),
        }
    }

    /// Remove the task with `entry`'s id from the writer's processing list.
    /// Unknown ids are a no-op.
    pub async fn finish(&mut self, writer: &str, entry: &T) -> IndexResult<()> {
        let key = format!("{}:{}:processing", self.base_key(), writer);
        let raw_tasks: Vec<String> = redis::cmd("LRANGE")
            .arg(&key)
            .arg(0)
            .arg(-1)
            .query_async(&mut self.conn)
            .await
            .map_err(TracedIndexError::from)?;
        for raw in raw_tasks {
            let Ok(task) = serde_json::from_str::<T>(&raw) else {
                continue;
            };
            if task.id() == entry.id() {
                let _: i64 = redis::cmd("LREM")
                    .arg(&key)
                    .arg(1)
                    .arg(&raw)
                    .query_async(&mut self.conn)
                    .await
                    .map_err(TracedIndexError::from)?;
                return Ok(());
            }
        }
        Ok(())
    }

    /// Enqueue a task for later hand-out.
    pub async fn push(&mut self, entry: &T) -> IndexResult<()> {
        let raw = serde_json::to_string(entry)?;
        let key = format!("{}:idle", self.base_key());
        let _: i64 = redis::cmd("RPUSH")
            .arg(&key)
            .arg(raw)
            .query_async(&mut self.conn)
            .await
            .map_err(TracedIndexError::from)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::index::MovePlan;

    #[test]
    fn base_key_omits_an_empty_suffix() {
        assert_eq!(queue_key("move", "db", "tbl", ""), "move:db:tbl");
        assert_eq!(
            queue_key("merge", "db", "tbl", "2:date=2026-08-02/hour=10"),
            "merge:db:tbl:2:date=2026-08-02/hour=10"
        );
    }

    #[tokio::test]
    #[ignore = "requires a redis server on localhost:6379"]
    async fn push_pop_finish_round_trip() {
        let client = redis::Client::open("redis://localhost:6379/0").unwrap();
        let conn = ConnectionManager::new(client).await.unwrap();
        let mut q: TaskQueue<MovePlan> = TaskQueue::new("move", "db", "tbl", "", conn);
        let plan = MovePlan {
            id: "m-1".into(),
            writer_id: "w1".into(),
            database: "db".into(),
            table: "tbl".into(),
            path_from: "date=2026-08-02/hour=10/a.1.parquet".into(),
            layer_from: "l1".into(),
            path_to: "date=2026-08-02/hour=10/a.1.parquet".into(),
            layer_to: "l2".into(),
        };
        q.push(&plan).await.unwrap();
        let popped = q.pop("w1", None).await.unwrap().unwrap();
        assert_eq!(popped.id, "m-1");
        q.finish("w1", &popped).await.unwrap();
        assert!(q.pop("w1", None).await.unwrap().is_none());
    }
}
