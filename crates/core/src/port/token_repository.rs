// Token Store Port (Interface)

use crate::domain::{QueueId, Token, TokenId, TokenStatus};
use crate::error::Result;
use async_trait::async_trait;

/// Repository interface for Token persistence.
///
/// `transition` and `call_next` are the two serialization points for the
/// contended status field: both must be implemented as a single conditional
/// update so that two concurrent actors can never act on the same token
/// from the same prior state.
#[async_trait]
pub trait TokenRepository: Send + Sync {
    /// Insert a new token
    async fn insert(&self, token: &Token) -> Result<()>;

    /// Find token by ID
    async fn find_by_id(&self, id: &TokenId) -> Result<Option<Token>>;

    /// Conditionally flip `status` from `expected_from` to `to`, stamping
    /// the timestamp column owned by the target status with `now_millis`.
    ///
    /// Returns the updated token. Fails with `DomainError::Conflict` when
    /// the row exists but its status no longer matches `expected_from`, and
    /// `DomainError::TokenNotFound` when it does not exist.
    async fn transition(
        &self,
        id: &TokenId,
        expected_from: TokenStatus,
        to: TokenStatus,
        now_millis: i64,
    ) -> Result<Token>;

    /// Atomically select and call the next pending token of a queue:
    /// highest priority tier first, then earliest issued, then lowest seq.
    /// Returns None when the queue has no pending token.
    async fn call_next(&self, queue_id: &QueueId, now_millis: i64) -> Result<Option<Token>>;

    /// All tokens of a queue in a given status, ordered by issued_at
    async fn list_by_status(&self, queue_id: &QueueId, status: TokenStatus)
        -> Result<Vec<Token>>;

    /// All tokens of a queue regardless of status
    async fn list_for_queue(&self, queue_id: &QueueId) -> Result<Vec<Token>>;

    /// Count tokens of a queue in a given status
    async fn count_by_status(&self, queue_id: &QueueId, status: TokenStatus) -> Result<i64>;

    /// Persist recomputed ranks; only changed tokens are passed in
    async fn update_positions(&self, assignments: &[(TokenId, i64)]) -> Result<()>;

    /// Tokens in CALLED whose called_at is strictly before the cutoff
    async fn find_called_before(&self, cutoff_millis: i64) -> Result<Vec<Token>>;

    /// Tokens in CALLED whose called_at falls in (from, to] - the warning
    /// slice of the sweeper
    async fn find_called_between(&self, from_millis: i64, to_millis: i64) -> Result<Vec<Token>>;

    /// Tokens in PENDING whose issued_at is strictly before the cutoff
    async fn find_pending_before(&self, cutoff_millis: i64) -> Result<Vec<Token>>;

    /// Most recently issued tokens of a queue, newest first
    async fn list_recent(&self, queue_id: &QueueId, limit: i64) -> Result<Vec<Token>>;

    /// Served tokens of a queue issued within [start, end)
    async fn list_served_between(
        &self,
        queue_id: &QueueId,
        start_millis: i64,
        end_millis: i64,
    ) -> Result<Vec<Token>>;

    /// Tokens of a queue issued within [start, end), any status
    async fn list_issued_between(
        &self,
        queue_id: &QueueId,
        start_millis: i64,
        end_millis: i64,
    ) -> Result<Vec<Token>>;
}

/// One unit of work for the Issue path: display-token sequence allocation,
/// daily-cap check, and insert must commit or roll back together.
#[async_trait]
pub trait TokenTransaction: Send {
    /// Allocate the next display-token sequence for a queue's service day
    async fn next_seq(&mut self, queue_id: &QueueId, service_day: &str) -> Result<i64>;

    /// Count non-terminal tokens issued for a queue since the given
    /// instant; served/cancelled/missed tokens free their daily-cap slot
    async fn count_active_issued_since(
        &mut self,
        queue_id: &QueueId,
        since_millis: i64,
    ) -> Result<i64>;

    /// Insert a new token within the transaction
    async fn insert(&mut self, token: &Token) -> Result<()>;

    async fn commit(self: Box<Self>) -> Result<()>;

    async fn rollback(self: Box<Self>) -> Result<()>;
}

/// Factory for token transactions
#[async_trait]
pub trait TransactionalTokenRepository: Send + Sync {
    async fn begin_transaction(&self) -> Result<Box<dyn TokenTransaction>>;
}

pub mod mocks {
    //! In-memory token store for unit tests. Mirrors the CAS semantics of
    //! the SQLite adapter; transactions apply writes immediately, so only
    //! the pre-write rejection paths (daily cap) behave transactionally.

    use super::*;
    use crate::domain::error::DomainError;
    use std::collections::HashMap;
    use std::sync::{Arc, Mutex};

    #[derive(Default)]
    struct StoreInner {
        tokens: HashMap<TokenId, Token>,
        counters: HashMap<(QueueId, String), i64>,
    }

    #[derive(Default, Clone)]
    pub struct InMemoryTokenStore {
        inner: Arc<Mutex<StoreInner>>,
    }

    impl InMemoryTokenStore {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn snapshot(&self) -> Vec<Token> {
            self.inner.lock().unwrap().tokens.values().cloned().collect()
        }

        fn apply(token: &mut Token, to: TokenStatus, now_millis: i64) -> Result<()> {
            match to {
                TokenStatus::Called => token.call(now_millis)?,
                TokenStatus::Served => token.serve(now_millis)?,
                TokenStatus::Missed => token.miss(now_millis)?,
                TokenStatus::Cancelled => token.cancel(now_millis)?,
                TokenStatus::Pending => {
                    return Err(DomainError::InvalidTransition {
                        from: token.status.to_string(),
                        to: to.to_string(),
                    }
                    .into())
                }
            }
            Ok(())
        }
    }

    #[async_trait]
    impl TokenRepository for InMemoryTokenStore {
        async fn insert(&self, token: &Token) -> Result<()> {
            self.inner
                .lock()
                .unwrap()
                .tokens
                .insert(token.id.clone(), token.clone());
            Ok(())
        }

        async fn find_by_id(&self, id: &TokenId) -> Result<Option<Token>> {
            Ok(self.inner.lock().unwrap().tokens.get(id).cloned())
        }

        async fn transition(
            &self,
            id: &TokenId,
            expected_from: TokenStatus,
            to: TokenStatus,
            now_millis: i64,
        ) -> Result<Token> {
            let mut inner = self.inner.lock().unwrap();
            let token = inner
                .tokens
                .get_mut(id)
                .ok_or_else(|| DomainError::TokenNotFound(id.clone()))?;

            if token.status != expected_from {
                return Err(DomainError::Conflict(id.clone()).into());
            }

            Self::apply(token, to, now_millis)?;
            Ok(token.clone())
        }

        async fn call_next(&self, queue_id: &QueueId, now_millis: i64) -> Result<Option<Token>> {
            let mut inner = self.inner.lock().unwrap();
            let next_id = inner
                .tokens
                .values()
                .filter(|t| &t.queue_id == queue_id && t.status == TokenStatus::Pending)
                .max_by(|a, b| {
                    a.priority
                        .rank()
                        .cmp(&b.priority.rank())
                        .then(b.issued_at.cmp(&a.issued_at))
                        .then(b.seq.cmp(&a.seq))
                })
                .map(|t| t.id.clone());

            match next_id {
                None => Ok(None),
                Some(id) => {
                    let token = inner.tokens.get_mut(&id).unwrap();
                    Self::apply(token, TokenStatus::Called, now_millis)?;
                    Ok(Some(token.clone()))
                }
            }
        }

        async fn list_by_status(
            &self,
            queue_id: &QueueId,
            status: TokenStatus,
        ) -> Result<Vec<Token>> {
            let inner = self.inner.lock().unwrap();
            let mut tokens: Vec<Token> = inner
                .tokens
                .values()
                .filter(|t| &t.queue_id == queue_id && t.status == status)
                .cloned()
                .collect();
            tokens.sort_by_key(|t| (t.issued_at, t.seq));
            Ok(tokens)
        }

        async fn list_for_queue(&self, queue_id: &QueueId) -> Result<Vec<Token>> {
            let inner = self.inner.lock().unwrap();
            let mut tokens: Vec<Token> = inner
                .tokens
                .values()
                .filter(|t| &t.queue_id == queue_id)
                .cloned()
                .collect();
            tokens.sort_by_key(|t| (t.issued_at, t.seq));
            Ok(tokens)
        }

        async fn count_by_status(&self, queue_id: &QueueId, status: TokenStatus) -> Result<i64> {
            Ok(self.list_by_status(queue_id, status).await?.len() as i64)
        }

        async fn update_positions(&self, assignments: &[(TokenId, i64)]) -> Result<()> {
            let mut inner = self.inner.lock().unwrap();
            for (id, position) in assignments {
                if let Some(token) = inner.tokens.get_mut(id) {
                    token.position = Some(*position);
                }
            }
            Ok(())
        }

        async fn find_called_before(&self, cutoff_millis: i64) -> Result<Vec<Token>> {
            let inner = self.inner.lock().unwrap();
            Ok(inner
                .tokens
                .values()
                .filter(|t| {
                    t.status == TokenStatus::Called
                        && t.called_at.is_some_and(|at| at < cutoff_millis)
                })
                .cloned()
                .collect())
        }

        async fn find_called_between(
            &self,
            from_millis: i64,
            to_millis: i64,
        ) -> Result<Vec<Token>> {
            let inner = self.inner.lock().unwrap();
            Ok(inner
                .tokens
                .values()
                .filter(|t| {
                    t.status == TokenStatus::Called
                        && t.called_at
                            .is_some_and(|at| at > from_millis && at <= to_millis)
                })
                .cloned()
                .collect())
        }

        async fn find_pending_before(&self, cutoff_millis: i64) -> Result<Vec<Token>> {
            let inner = self.inner.lock().unwrap();
            Ok(inner
                .tokens
                .values()
                .filter(|t| t.status == TokenStatus::Pending && t.issued_at < cutoff_millis)
                .cloned()
                .collect())
        }

        async fn list_recent(&self, queue_id: &QueueId, limit: i64) -> Result<Vec<Token>> {
            let mut tokens = self.list_for_queue(queue_id).await?;
            tokens.sort_by_key(|t| (std::cmp::Reverse(t.issued_at), std::cmp::Reverse(t.seq)));
            tokens.truncate(limit.max(0) as usize);
            Ok(tokens)
        }

        async fn list_served_between(
            &self,
            queue_id: &QueueId,
            start_millis: i64,
            end_millis: i64,
        ) -> Result<Vec<Token>> {
            let inner = self.inner.lock().unwrap();
            Ok(inner
                .tokens
                .values()
                .filter(|t| {
                    &t.queue_id == queue_id
                        && t.status == TokenStatus::Served
                        && t.issued_at >= start_millis
                        && t.issued_at < end_millis
                })
                .cloned()
                .collect())
        }

        async fn list_issued_between(
            &self,
            queue_id: &QueueId,
            start_millis: i64,
            end_millis: i64,
        ) -> Result<Vec<Token>> {
            let inner = self.inner.lock().unwrap();
            Ok(inner
                .tokens
                .values()
                .filter(|t| {
                    &t.queue_id == queue_id
                        && t.issued_at >= start_millis
                        && t.issued_at < end_millis
                })
                .cloned()
                .collect())
        }
    }

    pub struct InMemoryTokenTransaction {
        inner: Arc<Mutex<StoreInner>>,
    }

    #[async_trait]
    impl TokenTransaction for InMemoryTokenTransaction {
        async fn next_seq(&mut self, queue_id: &QueueId, service_day: &str) -> Result<i64> {
            let mut inner = self.inner.lock().unwrap();
            let counter = inner
                .counters
                .entry((queue_id.clone(), service_day.to_string()))
                .or_insert(0);
            *counter += 1;
            Ok(*counter)
        }

        async fn count_active_issued_since(
            &mut self,
            queue_id: &QueueId,
            since_millis: i64,
        ) -> Result<i64> {
            let inner = self.inner.lock().unwrap();
            Ok(inner
                .tokens
                .values()
                .filter(|t| {
                    &t.queue_id == queue_id
                        && t.issued_at >= since_millis
                        && !t.status.is_terminal()
                })
                .count() as i64)
        }

        async fn insert(&mut self, token: &Token) -> Result<()> {
            self.inner
                .lock()
                .unwrap()
                .tokens
                .insert(token.id.clone(), token.clone());
            Ok(())
        }

        async fn commit(self: Box<Self>) -> Result<()> {
            Ok(())
        }

        async fn rollback(self: Box<Self>) -> Result<()> {
            Ok(())
        }
    }

    #[async_trait]
    impl TransactionalTokenRepository for InMemoryTokenStore {
        async fn begin_transaction(&self) -> Result<Box<dyn TokenTransaction>> {
            Ok(Box::new(InMemoryTokenTransaction {
                inner: Arc::clone(&self.inner),
            }))
        }
    }
}
