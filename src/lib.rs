// Copyright 2026 TierIndex Project Authors. Licensed under Apache-2.0.

//! Metadata index of a multi-tier, time-partitioned columnar data store.
//!
//! The index does not store the columnar payload itself. It records which
//! data files exist, where they live, and which maintenance actions (merge,
//! move, drop) they are eligible for. Writers append file descriptors after
//! flushing data, readers enumerate files for a time range, and background
//! workers poll for work plans and report completion.
//!
//! Two interchangeable backends expose the same contract: an embedded one
//! persisting per-partition JSON snapshots on local disk (`file://` layers)
//! and a networked one backed by a single-instance shared store
//! (`redis://` / `rediss://` layers). Callers program against
//! [`TableIndexImpl`], [`DbIndexImpl`] and [`KvStoreImpl`].

#![deny(unused_must_use)]

pub mod index;

pub use self::index::{
    DbIndexImpl, DropPlan, IndexConfig, IndexEntry, IndexError, IndexResult, KvStoreImpl, Layer,
    MergeConfig, MergePlan, MovePlan, QueryOptions, TableIndexImpl, Token, TracedIndexError,
};
