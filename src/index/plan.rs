// Copyright 2026 TierIndex Project Authors. Licensed under Apache-2.0.

//! Work plans handed to external merge/move/drop executors.

use serde::{Deserialize, Serialize};

/// Capability the generic task queue is parameterized over: every plan kind
/// carries a string identity.
pub trait Identified {
    fn id(&self) -> &str;
}

/// Merge `from` (all of one iteration) into the single file `to` of the
/// next iteration.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct MergePlan {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub writer_id: String,
    #[serde(default)]
    pub layer: String,
    #[serde(default)]
    pub database: String,
    #[serde(default)]
    pub table: String,
    #[serde(default)]
    pub from: Vec<String>,
    #[serde(default)]
    pub to: String,
    #[serde(default)]
    pub iteration: u32,
}

impl Identified for MergePlan {
    fn id(&self) -> &str {
        &self.id
    }
}

/// Relocate one file to the next storage layer. Paths are
/// partition-relative and identical on both sides.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct MovePlan {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub writer_id: String,
    #[serde(default)]
    pub database: String,
    #[serde(default)]
    pub table: String,
    #[serde(default)]
    pub path_from: String,
    #[serde(default)]
    pub layer_from: String,
    #[serde(default)]
    pub path_to: String,
    #[serde(default)]
    pub layer_to: String,
}

impl Identified for MovePlan {
    fn id(&self) -> &str {
        &self.id
    }
}

/// Physically delete one already-removed file, no earlier than `time_s`
/// (unix seconds).
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct DropPlan {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub writer_id: String,
    #[serde(default)]
    pub layer: String,
    #[serde(default)]
    pub database: String,
    #[serde(default)]
    pub table: String,
    #[serde(default)]
    pub path: String,
    #[serde(default)]
    pub time_s: i64,
}

impl Identified for DropPlan {
    fn id(&self) -> &str {
        &self.id
    }
}
