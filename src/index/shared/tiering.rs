// Copyright 2026 TierIndex Project Authors. Licensed under Apache-2.0.

//! Move-plan hand-out over the shared store. Plans are seeded onto the
//! table's move queue by an external tiering scheduler and drained here.

use super::task_queue::TaskQueue;
use super::SharedTableIndex;
use crate::index::{IndexResult, MovePlan, Token};

impl SharedTableIndex {
    fn move_queue(&self) -> TaskQueue<MovePlan> {
        TaskQueue::new("move", &self.database, &self.table, "", self.conn.clone())
    }

    pub async fn get_move_plan(
        &self,
        writer_id: &str,
        _layer: &str,
    ) -> IndexResult<Option<MovePlan>> {
        let mut plan = self.move_queue().pop(writer_id, None).await?;
        if let Some(plan) = plan.as_mut() {
            if plan.writer_id.is_empty() {
                plan.writer_id = writer_id.to_string();
            }
        }
        Ok(plan.filter(|p| !p.path_from.is_empty()))
    }

    pub async fn end_move(&self, plan: &MovePlan) -> Token {
        Token::from_result(self.move_queue().finish(&plan.writer_id, plan).await)
    }

    /// Enqueue a move plan for later hand-out.
    pub async fn add_move_plan(&self, plan: &MovePlan) -> IndexResult<()> {
        self.move_queue().push(plan).await
    }
}
