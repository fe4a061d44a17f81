// Copyright 2026 TierIndex Project Authors. Licensed under Apache-2.0.

//! Configuration threaded through index constructors.

use serde::{Deserialize, Serialize};
use url::Url;

/// One storage tier. Lower tiers hold newer data; the URL scheme selects
/// the backend serving it.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct Layer {
    pub name: String,
    /// `file://<absolute-path>` for the embedded backend; any other scheme
    /// (`redis://`, `rediss://`) for the shared store.
    pub url: String,
    #[serde(default, rename = "type")]
    pub kind: String,
    /// Files older than this are eligible to move to the next layer.
    /// 0 disables tiering out of this layer.
    #[serde(default)]
    pub ttl_sec: i64,
}

impl Layer {
    /// Local filesystem root of the layer, when it is `file://`-backed.
    pub fn local_path(&self) -> Option<&str> {
        self.url.strip_prefix("file://")
    }

    pub fn is_local(&self) -> bool {
        self.local_path().is_some()
    }

    /// Scheme of the layer URL, for backend selection and diagnostics.
    pub fn scheme(&self) -> Option<String> {
        Url::parse(&self.url).ok().map(|u| u.scheme().to_string())
    }
}

/// Merge eligibility for one iteration: iteration-`i` files older than
/// `timeout_sec` merge into one iteration-`(i+1)` file of at most
/// `max_size_bytes`.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct MergeConfig {
    pub timeout_sec: i64,
    pub max_size_bytes: i64,
    pub merge_iteration_id: i64,
}

/// Index-wide configuration, supplied programmatically by the host and
/// injected at construction.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct IndexConfig {
    /// Ordered by iteration, 1-based: `merge[i-1]` governs iteration `i`.
    #[serde(default)]
    pub merge: Vec<MergeConfig>,
    /// Seconds between an entry's removal and its drop plan becoming
    /// eligible for execution.
    #[serde(default = "default_drop_grace")]
    pub drop_grace_sec: i64,
    /// Fsync snapshot files before renaming them into place.
    #[serde(default = "default_fsync")]
    pub enable_fsync: bool,
}

fn default_drop_grace() -> i64 {
    30
}

fn default_fsync() -> bool {
    true
}

impl Default for IndexConfig {
    fn default() -> Self {
        Self {
            merge: vec![],
            drop_grace_sec: default_drop_grace(),
            enable_fsync: default_fsync(),
        }
    }
}

impl IndexConfig {
    pub fn default_for_test() -> Self {
        Self {
            merge: vec![MergeConfig {
                timeout_sec: 10,
                max_size_bytes: 10 * 1024 * 1024,
                merge_iteration_id: 1,
            }],
            drop_grace_sec: 30,
            enable_fsync: false,
        }
    }
}
