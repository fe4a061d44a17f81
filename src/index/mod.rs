// Copyright 2026 TierIndex Project Authors. Licensed under Apache-2.0.

//! Hierarchical, partition-scoped metadata index.
//!
//! The index is keyed by (database, table, partition, layer) and durably
//! persisted. Two backends implement the same contract; callers hold one of
//! the tagged wrappers below and never name a backend directly.

use std::sync::Arc;

mod entry;
mod error;
mod options;
mod plan;
mod token;

pub mod embedded;
pub mod shared;

pub use entry::{iteration_suffix, parse_path, partition_dir, IndexEntry, DATA_FILE_EXT};
pub use error::{IndexError, IndexResult, TracedIndexError};
pub use options::{IndexConfig, Layer, MergeConfig};
pub use plan::{DropPlan, Identified, MergePlan, MovePlan};
pub use token::Token;

use embedded::{EmbeddedDbIndex, EmbeddedKvStore, EmbeddedTableIndex};
use shared::{SharedDbIndex, SharedKvStore, SharedTableIndex};

/// Path-level filters for [`TableIndexImpl::query`]. `None` means
/// unconstrained.
#[derive(Clone, Debug, Default)]
pub struct QueryOptions {
    /// Restrict to a single `date=…/hour=…` partition directory.
    pub folder: Option<String>,
    /// Keep entries with `max_time >= after` (ns).
    pub after: Option<i64>,
    /// Keep entries with `min_time <= before` (ns).
    pub before: Option<i64>,
    /// Keep entries of one merge iteration.
    pub iteration: Option<u32>,
}

/// A table's metadata index, embedded or shared-store backed.
#[derive(Clone)]
pub enum TableIndexImpl {
    Embedded(Arc<EmbeddedTableIndex>),
    Shared(Arc<SharedTableIndex>),
}

impl TableIndexImpl {
    /// Open the index of one table. The first layer's URL scheme selects
    /// the backend: `file://` is embedded, everything else goes through
    /// the shared store.
    pub async fn open(
        database: &str,
        table: &str,
        layers: Vec<Layer>,
        config: IndexConfig,
    ) -> IndexResult<Self> {
        let first = layers.first().ok_or(IndexError::NoLayers)?;
        if first.is_local() {
            Ok(Self::Embedded(Arc::new(EmbeddedTableIndex::open(
                database, table, layers, config,
            )?)))
        } else {
            let url = first.url.clone();
            Ok(Self::Shared(Arc::new(
                SharedTableIndex::open(&url, database, table, config).await?,
            )))
        }
    }

    /// Insert `add` and remove `rm` (by path); removal enqueues drop plans.
    /// The token resolves when the mutations are durable.
    pub async fn batch(&self, add: Vec<IndexEntry>, rm: Vec<IndexEntry>) -> Token {
        match self {
            Self::Embedded(idx) => idx.batch(add, rm),
            Self::Shared(idx) => idx.batch(add, rm).await,
        }
    }

    /// Look up one entry by path. Unknown paths are `None`, not an error.
    pub async fn get(&self, layer: &str, path: &str) -> Option<IndexEntry> {
        match self {
            Self::Embedded(idx) => idx.get(layer, path),
            Self::Shared(idx) => idx.get(layer, path).await,
        }
    }

    pub async fn query(&self, options: QueryOptions) -> IndexResult<Vec<IndexEntry>> {
        match self {
            Self::Embedded(idx) => idx.query(&options),
            Self::Shared(idx) => idx.query(&options).await,
        }
    }

    pub async fn get_merge_plan(
        &self,
        writer_id: &str,
        layer: &str,
        iteration: u32,
    ) -> IndexResult<Option<MergePlan>> {
        match self {
            Self::Embedded(idx) => idx.get_merge_plan(writer_id, layer, iteration),
            Self::Shared(idx) => idx.get_merge_plan(writer_id, layer, iteration).await,
        }
    }

    pub async fn end_merge(&self, plan: MergePlan) -> Token {
        match self {
            Self::Embedded(idx) => idx.end_merge(&plan),
            Self::Shared(idx) => idx.end_merge(&plan).await,
        }
    }

    pub async fn get_move_plan(
        &self,
        writer_id: &str,
        layer: &str,
    ) -> IndexResult<Option<MovePlan>> {
        match self {
            Self::Embedded(idx) => idx.get_move_plan(writer_id, layer),
            Self::Shared(idx) => idx.get_move_plan(writer_id, layer).await,
        }
    }

    pub async fn end_move(&self, plan: MovePlan) -> Token {
        match self {
            Self::Embedded(idx) => idx.end_move(&plan),
            Self::Shared(idx) => idx.end_move(&plan).await,
        }
    }

    pub async fn get_drop_queue(
        &self,
        writer_id: &str,
        layer: &str,
    ) -> IndexResult<Option<DropPlan>> {
        match self {
            Self::Embedded(idx) => idx.get_drop_queue(writer_id, layer),
            Self::Shared(idx) => idx.get_drop_queue(writer_id, layer).await,
        }
    }

    pub async fn rm_from_drop_queue(&self, plan: DropPlan) -> Token {
        match self {
            Self::Embedded(idx) => idx.rm_from_drop_queue(&plan),
            Self::Shared(idx) => idx.rm_from_drop_queue(&plan).await,
        }
    }

    /// Stop background flush loops and wait for them to drain. Tokens armed
    /// before the stop still resolve.
    pub async fn stop(&self) {
        match self {
            Self::Embedded(idx) => idx.stop().await,
            Self::Shared(idx) => idx.stop().await,
        }
    }
}

/// Top-level navigator over databases, tables and partition paths.
#[derive(Clone)]
pub enum DbIndexImpl {
    Embedded(Arc<EmbeddedDbIndex>),
    Shared(Arc<SharedDbIndex>),
}

impl DbIndexImpl {
    pub async fn open(layers: Vec<Layer>) -> IndexResult<Self> {
        let first = layers.first().ok_or(IndexError::NoLayers)?;
        if first.is_local() {
            Ok(Self::Embedded(Arc::new(EmbeddedDbIndex::new(layers))))
        } else {
            Ok(Self::Shared(Arc::new(SharedDbIndex::open(&first.url).await?)))
        }
    }

    pub async fn databases(&self) -> IndexResult<Vec<String>> {
        match self {
            Self::Embedded(idx) => idx.databases(),
            Self::Shared(idx) => idx.databases().await,
        }
    }

    pub async fn tables(&self, database: &str) -> IndexResult<Vec<String>> {
        match self {
            Self::Embedded(idx) => idx.tables(database),
            Self::Shared(idx) => idx.tables(database).await,
        }
    }

    pub async fn paths(&self, database: &str, table: &str) -> IndexResult<Vec<String>> {
        match self {
            Self::Embedded(idx) => idx.paths(database, table),
            Self::Shared(idx) => idx.paths(database, table).await,
        }
    }
}

/// Small persistent map shared with collaborators; same dual-backend and
/// atomic-rename pattern as the index itself.
#[derive(Clone)]
pub enum KvStoreImpl {
    Embedded(Arc<EmbeddedKvStore>),
    Shared(Arc<SharedKvStore>),
}

impl KvStoreImpl {
    /// `file://<path-to-json-document>` opens the embedded store; any other
    /// scheme the shared one.
    pub async fn open(url: &str) -> IndexResult<Self> {
        match url.strip_prefix("file://") {
            Some(path) => Ok(Self::Embedded(EmbeddedKvStore::open(path)?)),
            None => Ok(Self::Shared(Arc::new(SharedKvStore::open(url).await?))),
        }
    }

    pub async fn get(&self, key: &str) -> IndexResult<Option<Vec<u8>>> {
        match self {
            Self::Embedded(store) => Ok(store.get(key)),
            Self::Shared(store) => store.get(key).await,
        }
    }

    pub async fn put(&self, key: &str, value: Vec<u8>) -> Token {
        match self {
            Self::Embedded(store) => store.put(key, value),
            Self::Shared(store) => store.put(key, value).await,
        }
    }

    pub async fn delete(&self, key: &str) -> Token {
        match self {
            Self::Embedded(store) => store.delete(key),
            Self::Shared(store) => store.delete(key).await,
        }
    }

    pub async fn destroy(&self) {
        match self {
            Self::Embedded(store) => store.destroy().await,
            Self::Shared(store) => store.destroy().await,
        }
    }
}
