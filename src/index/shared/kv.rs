// Copyright 2026 TierIndex Project Authors. Licensed under Apache-2.0.

//! Shared-store realization of the key-value contract: plain GET/SET/DEL,
//! durability delegated to the store.

use crate::index::{IndexResult, Token, TracedIndexError};

pub struct SharedKvStore {
    conn: redis::aio::ConnectionManager,
}

impl SharedKvStore {
    pub async fn open(url: &str) -> IndexResult<Self> {
        let client = redis::Client::open(url).map_err(TracedIndexError::from)?;
        let conn = redis::aio::ConnectionManager::new(client)
            .await
            .map_err(TracedIndexError::from)?;
        Ok(Self { conn })
    }

    pub async fn get(&self, key: &str) -> IndexResult<Option<Vec<u8>>> {
        let mut conn = self.conn.clone();
        let value: Option<Vec<u8>> = redis::cmd("GET")
            .arg(key)
            .query_async(&mut conn)
            .await
            .map_err(TracedIndexError::from)?;
        Ok(value)
    }

    pub async fn put(&self, key: &str, value: Vec<u8>) -> Token {
        let mut conn = self.conn.clone();
        let res: Result<(), _> = redis::cmd("SET")
            .arg(key)
            .arg(value)
            .query_async(&mut conn)
            .await;
        Token::from_result(res.map_err(TracedIndexError::from))
    }

    pub async fn delete(&self, key: &str) -> Token {
        let mut conn = self.conn.clone();
        let res: Result<i64, _> = redis::cmd("DEL").arg(key).query_async(&mut conn).await;
        Token::from_result(res.map(|_| ()).map_err(TracedIndexError::from))
    }

    pub async fn destroy(&self) {}
}
