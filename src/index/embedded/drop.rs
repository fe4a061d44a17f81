// Copyright 2026 TierIndex Project Authors. Licensed under Apache-2.0.

//! Drop-queue hand-out for the embedded backend.
//!
//! Removal through `batch` schedules a drop plan `drop_grace_sec` in the
//! future; the queue is served FIFO, skipping plans whose time has not come.

use chrono::Utc;

use super::{EmbeddedTableIndex, PartIndex};
use crate::index::entry::partition_dir;
use crate::index::{DropPlan, IndexResult, Token};

impl PartIndex {
    /// Head of the drop queue among plans whose `time_s` has passed.
    pub fn get_drop_queue(&self, _writer_id: &str, _layer: &str) -> IndexResult<Option<DropPlan>> {
        let now_s = Utc::now().timestamp();
        let inner = self.inner.lock();
        Ok(inner
            .drop_queue
            .iter()
            .find(|plan| plan.time_s <= now_s)
            .cloned())
    }

    /// Remove the plan with a matching path, scanning from the tail.
    /// Idempotent; a match arms a flush.
    pub fn rm_from_drop_queue(&self, plan: &DropPlan) -> Token {
        let mut inner = self.inner.lock();
        let Some(pos) = inner
            .drop_queue
            .iter()
            .rposition(|queued| queued.path == plan.path)
        else {
            return Token::fulfilled();
        };
        inner.drop_queue.swap_remove(pos);
        self.arm_flush(&mut inner)
    }
}

impl EmbeddedTableIndex {
    pub fn get_drop_queue(&self, writer_id: &str, layer: &str) -> IndexResult<Option<DropPlan>> {
        for part in self.layer_parts(layer) {
            if let Some(plan) = part.get_drop_queue(writer_id, layer)? {
                return Ok(Some(plan));
            }
        }
        Ok(None)
    }

    pub fn rm_from_drop_queue(&self, plan: &DropPlan) -> Token {
        match self.lookup_part(&plan.layer, partition_dir(&plan.path)) {
            Some(part) => part.rm_from_drop_queue(plan),
            None => Token::fulfilled(),
        }
    }
}
