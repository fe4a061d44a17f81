// Copyright 2026 TierIndex Project Authors. Licensed under Apache-2.0.

//! Navigator over the shared store's `folders:` keyspace.

use itertools::Itertools;

use super::{hscan_pairs, scan_keys};
use crate::index::{IndexResult, TracedIndexError};

pub struct SharedDbIndex {
    conn: redis::aio::ConnectionManager,
}

impl SharedDbIndex {
    pub async fn open(url: &str) -> IndexResult<Self> {
        let client = redis::Client::open(url).map_err(TracedIndexError::from)?;
        let conn = redis::aio::ConnectionManager::new(client)
            .await
            .map_err(TracedIndexError::from)?;
        Ok(Self { conn })
    }

    pub async fn databases(&self) -> IndexResult<Vec<String>> {
        let mut conn = self.conn.clone();
        let keys = scan_keys(&mut conn, "folders:*").await?;
        Ok(keys
            .iter()
            .filter_map(|key| key.split(':').nth(1))
            .map(str::to_string)
            .unique()
            .sorted()
            .collect())
    }

    pub async fn tables(&self, database: &str) -> IndexResult<Vec<String>> {
        let mut conn = self.conn.clone();
        let keys = scan_keys(&mut conn, &format!("folders:{database}:*")).await?;
        Ok(keys
            .iter()
            .filter_map(|key| key.split(':').nth(2))
            .map(str::to_string)
            .unique()
            .sorted()
            .collect())
    }

    /// Partition directories of one table, from its membership hash.
    pub async fn paths(&self, database: &str, table: &str) -> IndexResult<Vec<String>> {
        let mut conn = self.conn.clone();
        let pairs = hscan_pairs(&mut conn, &format!("folders:{database}:{table}")).await?;
        Ok(pairs.into_iter().map(|(field, _)| field).sorted().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    #[ignore = "requires a redis server on localhost:6379"]
    async fn folder_keys_drive_enumeration() {
        let idx = SharedDbIndex::open("redis://localhost:6379/0").await.unwrap();
        // Just exercise the scans; content depends on what batches ran.
        let dbs = idx.databases().await.unwrap();
        for db in dbs {
            let _ = idx.tables(&db).await.unwrap();
        }
    }
}
