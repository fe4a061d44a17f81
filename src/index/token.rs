// Copyright 2026 TierIndex Project Authors. Licensed under Apache-2.0.

//! Completion tokens for mutating index operations.
//!
//! A mutating call arms the next flush and hands back a [`Token`]; the flush
//! loop resolves every token armed before it ran. A single flush failure is
//! shared between all of its waiters through an `Arc`, the same way
//! [`IndexError::Nested`] fans one error out to many callers.

use std::sync::Arc;

use tokio::sync::oneshot;

use super::{IndexError, IndexResult, TracedIndexError};

/// The value a flush loop sends to its waiters.
pub(crate) type FlushResult = Result<(), Arc<TracedIndexError>>;
pub(crate) type FlushWaiter = oneshot::Sender<FlushResult>;

/// A single-shot handle resolved once the mutation it was returned for is
/// durable (or has failed). Waiting is optional; dropping a token never
/// blocks the flush.
#[must_use]
pub struct Token {
    inner: TokenInner,
}

enum TokenInner {
    Ready(Option<TracedIndexError>),
    Flush(oneshot::Receiver<FlushResult>),
    /// Flattened at construction, so `wait` never recurses.
    All(Vec<Token>),
}

impl Token {
    /// A token that is already resolved successfully. Returned when a call
    /// did not actually mutate anything.
    pub fn fulfilled() -> Self {
        Self {
            inner: TokenInner::Ready(None),
        }
    }

    /// A token that is already resolved with an error.
    pub fn failed(err: TracedIndexError) -> Self {
        Self {
            inner: TokenInner::Ready(Some(err)),
        }
    }

    pub fn from_result(res: IndexResult<()>) -> Self {
        match res {
            Ok(()) => Self::fulfilled(),
            Err(e) => Self::failed(e),
        }
    }

    /// A token resolved by the flush loop owning `rx`.
    pub(crate) fn flush(rx: oneshot::Receiver<FlushResult>) -> Self {
        Self {
            inner: TokenInner::Flush(rx),
        }
    }

    /// Wait-for-all combinator: resolves once every child has resolved,
    /// with the first error observed.
    pub fn all(tokens: Vec<Token>) -> Self {
        let mut flat = Vec::with_capacity(tokens.len());
        for token in tokens {
            match token.inner {
                TokenInner::All(children) => flat.extend(children),
                inner => flat.push(Token { inner }),
            }
        }
        Self {
            inner: TokenInner::All(flat),
        }
    }

    /// Resolve the token. Blocks only on the first call; completion is
    /// single-shot.
    pub async fn wait(self) -> IndexResult<()> {
        match self.inner {
            TokenInner::Ready(None) => Ok(()),
            TokenInner::Ready(Some(err)) => Err(err),
            TokenInner::Flush(rx) => Self::wait_flush(rx).await,
            TokenInner::All(tokens) => {
                let waits = tokens.into_iter().map(|token| async move {
                    match token.inner {
                        TokenInner::Ready(None) => Ok(()),
                        TokenInner::Ready(Some(err)) => Err(err),
                        TokenInner::Flush(rx) => Self::wait_flush(rx).await,
                        // `all` flattens, so this arm is unreachable.
                        TokenInner::All(_) => Ok(()),
                    }
                });
                let results = futures::future::join_all(waits).await;
                results.into_iter().find_map(Result::err).map_or(Ok(()), Err)
            }
        }
    }

    async fn wait_flush(rx: oneshot::Receiver<FlushResult>) -> IndexResult<()> {
        match rx.await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(shared)) => Err(IndexError::Nested(shared).into()),
            // The flush loop dropped the sender without resolving: the
            // index was stopped before this mutation was persisted.
            Err(_) => Err(TracedIndexError::shutdown()),
        }
    }
}

/// Resolve a drained set of waiters with one shared outcome.
pub(crate) fn resolve_waiters(waiters: Vec<FlushWaiter>, res: IndexResult<()>) {
    let shared: FlushResult = res.map_err(Arc::new);
    for waiter in waiters {
        // A dropped receiver means the caller did not care to wait.
        let _ = waiter.send(shared.clone());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn fulfilled_resolves_immediately() {
        Token::fulfilled().wait().await.unwrap();
    }

    #[tokio::test]
    async fn failed_carries_the_error() {
        let token = Token::failed(TracedIndexError::not_found("layer", "l9"));
        let err = token.wait().await.unwrap_err();
        assert!(err.to_string().contains("l9"));
    }

    #[tokio::test]
    async fn all_waits_for_every_child() {
        let (tx1, rx1) = oneshot::channel();
        let (tx2, rx2) = oneshot::channel();
        let joined = Token::all(vec![
            Token::flush(rx1),
            Token::all(vec![Token::flush(rx2), Token::fulfilled()]),
        ]);
        resolve_waiters(vec![tx1, tx2], Ok(()));
        joined.wait().await.unwrap();
    }

    #[tokio::test]
    async fn all_surfaces_the_first_error() {
        let (tx, rx) = oneshot::channel();
        let joined = Token::all(vec![Token::flush(rx), Token::fulfilled()]);
        resolve_waiters(vec![tx], Err(TracedIndexError::not_found("part", "p0")));
        assert!(joined.wait().await.is_err());
    }

    #[tokio::test]
    async fn dropped_sender_reads_as_shutdown() {
        let (tx, rx) = oneshot::channel::<FlushResult>();
        drop(tx);
        let err = Token::flush(rx).wait().await.unwrap_err();
        assert!(err.to_string().contains("shutting down"));
    }
}
