// Copyright 2026 TierIndex Project Authors. Licensed under Apache-2.0.

use std::backtrace::Backtrace;
use std::sync::Arc;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum IndexError {
    #[error("{0}({1}) not found")]
    NotFound(&'static str, String),
    #[error("layer url \"{0}\" not supported")]
    UnsupportedLayer(String),
    #[error("no layers configured")]
    NoLayers,
    #[error("no merge configuration for iteration {0}")]
    InvalidIteration(u32),
    #[error("malformed data file path: {0}")]
    MalformedPath(String),
    #[error("index is shutting down")]
    Shutdown,
    #[error("IO error: {0}")]
    Io(#[from] Box<std::io::Error>),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("shared store error: {0}")]
    Store(#[from] redis::RedisError),
    #[error("{0}")]
    Nested(#[from] Arc<TracedIndexError>),
}

impl From<std::io::Error> for TracedIndexError {
    #[inline]
    fn from(e: std::io::Error) -> TracedIndexError {
        IndexError::Io(e.into()).into()
    }
}

impl From<serde_json::Error> for TracedIndexError {
    #[inline]
    fn from(e: serde_json::Error) -> TracedIndexError {
        IndexError::Json(e).into()
    }
}

impl From<redis::RedisError> for TracedIndexError {
    #[inline]
    fn from(e: redis::RedisError) -> TracedIndexError {
        IndexError::Store(e).into()
    }
}

impl From<Arc<TracedIndexError>> for TracedIndexError {
    #[inline]
    fn from(e: Arc<TracedIndexError>) -> TracedIndexError {
        IndexError::Nested(e).into()
    }
}

/// [`IndexResult`] with backtrace.
pub struct TracedIndexError {
    source: IndexError,
    backtrace: Backtrace,
}

impl std::fmt::Display for TracedIndexError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}\n{}", self.source, self.backtrace)
    }
}

impl std::error::Error for TracedIndexError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(&self.source)
    }
}

impl From<IndexError> for TracedIndexError {
    fn from(source: IndexError) -> Self {
        TracedIndexError {
            source,
            backtrace: Backtrace::capture(),
        }
    }
}

impl std::fmt::Debug for TracedIndexError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self)
    }
}

impl TracedIndexError {
    pub fn not_found(ty: &'static str, item: impl ToString) -> Self {
        IndexError::NotFound(ty, item.to_string()).into()
    }

    pub fn unsupported_layer(url: impl ToString) -> Self {
        IndexError::UnsupportedLayer(url.to_string()).into()
    }

    pub fn malformed_path(path: impl ToString) -> Self {
        IndexError::MalformedPath(path.to_string()).into()
    }

    pub fn shutdown() -> Self {
        IndexError::Shutdown.into()
    }
}

pub type IndexResult<T> = std::result::Result<T, TracedIndexError>;
