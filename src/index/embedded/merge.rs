// Copyright 2026 TierIndex Project Authors. Licensed under Apache-2.0.

//! Merge planning for the embedded backend.
//!
//! Iteration-`i` files old enough per the iteration's merge configuration
//! are collected, in scan order, into one plan capped at the configured
//! size; the chosen files stay in `files_in_merge` until `end_merge` so no
//! file is ever issued to two workers concurrently.

use chrono::Utc;
use uuid::Uuid;

use super::{EmbeddedTableIndex, PartIndex};
use crate::index::entry::{iteration_suffix, partition_dir, DATA_FILE_EXT};
use crate::index::{IndexError, IndexResult, MergePlan, Token};

impl PartIndex {
    /// Cut a merge plan for `iteration` from this part, or `None` when no
    /// file is eligible. Chosen files are marked in-flight.
    pub fn get_merge_plan(
        &self,
        writer_id: &str,
        layer: &str,
        iteration: u32,
    ) -> IndexResult<Option<MergePlan>> {
        let conf = self
            .config
            .merge
            .get(iteration.checked_sub(1).ok_or(IndexError::InvalidIteration(iteration))? as usize)
            .ok_or(IndexError::InvalidIteration(iteration))?;
        let suffix = iteration_suffix(iteration);
        let now_ns = Utc::now().timestamp_nanos_opt().unwrap_or(i64::MAX);

        let mut inner = self.inner.lock();
        let mut from = Vec::new();
        let mut size: i64 = 0;
        for entry in inner.entries.values() {
            if !entry.path.ends_with(&suffix) {
                continue;
            }
            if inner.files_in_merge.contains(&entry.path) {
                continue;
            }
            if entry.chunk_time + conf.timeout_sec * 1_000_000_000 >= now_ns {
                continue;
            }
            // The entry that would overflow the cap is excluded and the
            // scan stops.
            if size + entry.size_bytes > conf.max_size_bytes {
                break;
            }
            from.push(entry.path.clone());
            size += entry.size_bytes;
        }
        if from.is_empty() {
            return Ok(None);
        }
        for path in &from {
            inner.files_in_merge.insert(path.clone());
        }

        let id = Uuid::new_v4();
        Ok(Some(MergePlan {
            id: id.to_string(),
            writer_id: writer_id.to_string(),
            layer: layer.to_string(),
            database: self.database.clone(),
            table: self.table.clone(),
            from,
            to: format!(
                "{}/{}.{}.{}",
                self.part_path(),
                id,
                iteration + 1,
                DATA_FILE_EXT
            ),
            iteration,
        }))
    }

    /// Release the plan's files from the in-flight set. The worker commits
    /// the merged file and removes the inputs through `batch`; this call
    /// resolves immediately and is idempotent.
    pub fn end_merge(&self, plan: &MergePlan) -> Token {
        let mut inner = self.inner.lock();
        for path in &plan.from {
            inner.files_in_merge.remove(path);
        }
        Token::fulfilled()
    }
}

impl EmbeddedTableIndex {
    pub fn get_merge_plan(
        &self,
        writer_id: &str,
        layer: &str,
        iteration: u32,
    ) -> IndexResult<Option<MergePlan>> {
        for part in self.layer_parts(layer) {
            if let Some(plan) = part.get_merge_plan(writer_id, layer, iteration)? {
                return Ok(Some(plan));
            }
        }
        Ok(None)
    }

    pub fn end_merge(&self, plan: &MergePlan) -> Token {
        if plan.from.is_empty() {
            return Token::fulfilled();
        }
        match self.lookup_part(&plan.layer, partition_dir(&plan.to)) {
            Some(part) => part.end_merge(plan),
            None => Token::fulfilled(),
        }
    }
}
