// Copyright 2026 TierIndex Project Authors. Licensed under Apache-2.0.

//! Embedded key-value store: one JSON document, flushed whole through the
//! same temp-file + rename and edge-triggered save task as the partition
//! snapshots.

use std::collections::HashMap;
use std::mem;
use std::path::PathBuf;
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::io::AsyncWriteExt;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::warn;

use crate::index::token::{resolve_waiters, FlushWaiter};
use crate::index::{IndexResult, Token, TracedIndexError};

struct KvInner {
    cache: HashMap<String, Vec<u8>>,
    waiters: Vec<FlushWaiter>,
}

/// Small persistent map of opaque bytes. `put`/`delete` attach a completion
/// token to the next save.
pub struct EmbeddedKvStore {
    path: PathBuf,
    inner: Mutex<KvInner>,
    save_tx: mpsc::UnboundedSender<()>,
    task: Mutex<(Option<oneshot::Sender<()>>, Option<JoinHandle<()>>)>,
}

impl EmbeddedKvStore {
    /// Load the document at `path`, seeding a fresh `{}` when none exists,
    /// and start the save task.
    pub fn open(path: impl Into<PathBuf>) -> IndexResult<Arc<Self>> {
        let path = path.into();
        let cache = match std::fs::read(&path) {
            Ok(data) => serde_json::from_slice(&data)?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                std::fs::write(&path, b"{}")?;
                HashMap::new()
            }
            Err(e) => return Err(e.into()),
        };
        let (save_tx, save_rx) = mpsc::unbounded_channel();
        let store = Arc::new(Self {
            path,
            inner: Mutex::new(KvInner {
                cache,
                waiters: Vec::new(),
            }),
            save_tx,
            task: Mutex::new((None, None)),
        });
        store.run(save_rx);
        Ok(store)
    }

    fn run(self: &Arc<Self>, mut rx: mpsc::UnboundedReceiver<()>) {
        let (stop_tx, mut stop_rx) = oneshot::channel();
        let store = self.clone();
        let handle = tokio::spawn(async move {
            loop {
                tokio::select! {
                    received = rx.recv() => {
                        if received.is_none() {
                            break;
                        }
                        while rx.try_recv().is_ok() {}
                        store.save().await;
                    }
                    _ = &mut stop_rx => {
                        rx.close();
                        while rx.try_recv().is_ok() {}
                        store.save().await;
                        break;
                    }
                }
            }
        });
        *self.task.lock() = (Some(stop_tx), Some(handle));
    }

    pub fn get(&self, key: &str) -> Option<Vec<u8>> {
        self.inner.lock().cache.get(key).cloned()
    }

    pub fn put(&self, key: &str, value: Vec<u8>) -> Token {
        let mut inner = self.inner.lock();
        inner.cache.insert(key.to_string(), value);
        self.arm_save(&mut inner)
    }

    pub fn delete(&self, key: &str) -> Token {
        let mut inner = self.inner.lock();
        inner.cache.remove(key);
        self.arm_save(&mut inner)
    }

    fn arm_save(&self, inner: &mut KvInner) -> Token {
        let (tx, rx) = oneshot::channel();
        inner.waiters.push(tx);
        match self.save_tx.send(()) {
            Ok(()) => Token::flush(rx),
            Err(_) => {
                inner.waiters.pop();
                Token::failed(TracedIndexError::shutdown())
            }
        }
    }

    /// Stop the save task, draining one final save when mutations are
    /// pending.
    pub async fn destroy(&self) {
        let (stop_tx, handle) = {
            let mut task = self.task.lock();
            (task.0.take(), task.1.take())
        };
        if let Some(tx) = stop_tx {
            let _ = tx.send(());
        }
        if let Some(handle) = handle {
            let _ = handle.await;
        }
    }

    async fn save(self: &Arc<Self>) {
        let (document, waiters) = {
            let mut inner = self.inner.lock();
            let waiters = mem::take(&mut inner.waiters);
            if waiters.is_empty() {
                return;
            }
            (inner.cache.clone(), waiters)
        };
        let res = self.write_document(&document).await;
        if let Err(e) = &res {
            warn!(path = %self.path.display(), error = %e, "kv store save failed");
        }
        resolve_waiters(waiters, res);
    }

    async fn write_document(&self, document: &HashMap<String, Vec<u8>>) -> IndexResult<()> {
        let bytes = serde_json::to_vec(document)?;
        let tmp = self.path.with_extension("tmp");
        let mut file = tokio::fs::File::create(&tmp).await?;
        file.write_all(&bytes).await?;
        file.sync_data().await?;
        drop(file);
        tokio::fs::rename(&tmp, &self.path).await?;
        Ok(())
    }
}
