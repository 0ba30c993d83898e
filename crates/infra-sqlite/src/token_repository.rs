// SQLite TokenRepository Implementation

use async_trait::async_trait;
use lineup_core::domain::error::DomainError;
use lineup_core::domain::{Priority, QueueId, Token, TokenId, TokenStatus};
use lineup_core::error::{AppError, Result};
use lineup_core::port::{TokenRepository, TokenTransaction, TransactionalTokenRepository};
use sqlx::SqlitePool;

use crate::transaction::SqliteTokenTransaction;

/// Convert sqlx::Error to AppError with structured information
pub(crate) fn map_sqlx_error(err: sqlx::Error) -> AppError {
    match &err {
        sqlx::Error::Database(db_err) => {
            if let Some(code) = db_err.code() {
                let code_str = code.as_ref();

                // SQLite error codes: https://www.sqlite.org/rescode.html
                match code_str {
                    "2067" | "1555" => AppError::Database(format!(
                        "Unique constraint violation: {} ({})",
                        db_err.message(),
                        code_str
                    )),
                    "787" | "3850" => AppError::Database(format!(
                        "Foreign key constraint violation: {} ({})",
                        db_err.message(),
                        code_str
                    )),
                    "5" => AppError::Database(format!(
                        "Database locked (SQLITE_BUSY): {}",
                        db_err.message()
                    )),
                    "13" => {
                        AppError::Database(format!("Database full: {}", db_err.message()))
                    }
                    _ => AppError::Database(format!(
                        "Database error [{}]: {}",
                        code_str,
                        db_err.message()
                    )),
                }
            } else {
                AppError::Database(format!("Database error: {}", db_err.message()))
            }
        }
        sqlx::Error::RowNotFound => AppError::Database("Row not found".to_string()),
        sqlx::Error::ColumnNotFound(col) => {
            AppError::Database(format!("Column not found: {}", col))
        }
        _ => AppError::Database(err.to_string()),
    }
}

/// The timestamp column a target status owns; set exactly once when the
/// transition into that status fires.
fn timestamp_column(to: TokenStatus) -> Result<&'static str> {
    match to {
        TokenStatus::Called => Ok("called_at"),
        TokenStatus::Served => Ok("served_at"),
        // Missed records its terminal moment in cancelled_at
        TokenStatus::Cancelled | TokenStatus::Missed => Ok("cancelled_at"),
        TokenStatus::Pending => Err(AppError::Internal(
            "no transition targets PENDING".to_string(),
        )),
    }
}

pub struct SqliteTokenRepository {
    pool: SqlitePool,
}

impl SqliteTokenRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl TokenRepository for SqliteTokenRepository {
    async fn insert(&self, token: &Token) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO tokens (
                id, display_token, queue_id, seq,
                user_id, visitor_name, visitor_contact,
                status, priority, position,
                issued_at, called_at, served_at, cancelled_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&token.id)
        .bind(&token.display_token)
        .bind(&token.queue_id)
        .bind(token.seq)
        .bind(&token.user_id)
        .bind(&token.visitor_name)
        .bind(&token.visitor_contact)
        .bind(token.status.as_str())
        .bind(token.priority.as_str())
        .bind(token.position)
        .bind(token.issued_at)
        .bind(token.called_at)
        .bind(token.served_at)
        .bind(token.cancelled_at)
        .execute(&self.pool)
        .await
        .map_err(map_sqlx_error)?;

        Ok(())
    }

    async fn find_by_id(&self, id: &TokenId) -> Result<Option<Token>> {
        let row = sqlx::query_as::<_, TokenRow>("SELECT * FROM tokens WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(map_sqlx_error)?;

        row.map(|r| r.into_token()).transpose()
    }

    async fn transition(
        &self,
        id: &TokenId,
        expected_from: TokenStatus,
        to: TokenStatus,
        now_millis: i64,
    ) -> Result<Token> {
        // Conditional update: the status check-and-set is one statement,
        // so two actors can never both win from the same prior state.
        let sql = format!(
            r#"
            UPDATE tokens
            SET status = ?, {} = ?, position = NULL
            WHERE id = ? AND status = ?
            RETURNING *
            "#,
            timestamp_column(to)?
        );

        let row = sqlx::query_as::<_, TokenRow>(&sql)
            .bind(to.as_str())
            .bind(now_millis)
            .bind(id)
            .bind(expected_from.as_str())
            .fetch_optional(&self.pool)
            .await
            .map_err(map_sqlx_error)?;

        match row {
            Some(r) => r.into_token(),
            None => {
                // Row missing, or another actor changed the status first
                let exists: Option<String> =
                    sqlx::query_scalar("SELECT status FROM tokens WHERE id = ?")
                        .bind(id)
                        .fetch_optional(&self.pool)
                        .await
                        .map_err(map_sqlx_error)?;

                match exists {
                    None => Err(DomainError::TokenNotFound(id.clone()).into()),
                    Some(_) => Err(DomainError::Conflict(id.clone()).into()),
                }
            }
        }
    }

    async fn call_next(&self, queue_id: &QueueId, now_millis: i64) -> Result<Option<Token>> {
        // Atomic pop: selection and status flip in one statement, so a
        // concurrent cancel or second call-next can never pick the same
        // token. Highest priority tier first, FIFO within a tier.
        let row = sqlx::query_as::<_, TokenRow>(
            r#"
            UPDATE tokens
            SET status = ?, called_at = ?, position = NULL
            WHERE id = (
                SELECT t.id FROM tokens t
                WHERE t.queue_id = ? AND t.status = ?
                ORDER BY
                    CASE t.priority
                        WHEN 'EMERGENCY' THEN 2
                        WHEN 'PRIORITY' THEN 1
                        ELSE 0
                    END DESC,
                    t.issued_at ASC,
                    t.seq ASC
                LIMIT 1
            )
            RETURNING *
            "#,
        )
        .bind(TokenStatus::Called.as_str())
        .bind(now_millis)
        .bind(queue_id)
        .bind(TokenStatus::Pending.as_str())
        .fetch_optional(&self.pool)
        .await
        .map_err(map_sqlx_error)?;

        row.map(|r| r.into_token()).transpose()
    }

    async fn list_by_status(
        &self,
        queue_id: &QueueId,
        status: TokenStatus,
    ) -> Result<Vec<Token>> {
        let rows: Vec<TokenRow> = sqlx::query_as(
            r#"
            SELECT * FROM tokens
            WHERE queue_id = ? AND status = ?
            ORDER BY issued_at ASC, seq ASC
            "#,
        )
        .bind(queue_id)
        .bind(status.as_str())
        .fetch_all(&self.pool)
        .await
        .map_err(map_sqlx_error)?;

        rows.into_iter().map(|r| r.into_token()).collect()
    }

    async fn list_for_queue(&self, queue_id: &QueueId) -> Result<Vec<Token>> {
        let rows: Vec<TokenRow> = sqlx::query_as(
            "SELECT * FROM tokens WHERE queue_id = ? ORDER BY issued_at ASC, seq ASC",
        )
        .bind(queue_id)
        .fetch_all(&self.pool)
        .await
        .map_err(map_sqlx_error)?;

        rows.into_iter().map(|r| r.into_token()).collect()
    }

    async fn count_by_status(&self, queue_id: &QueueId, status: TokenStatus) -> Result<i64> {
        let count: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM tokens WHERE queue_id = ? AND status = ?")
                .bind(queue_id)
                .bind(status.as_str())
                .fetch_one(&self.pool)
                .await
                .map_err(map_sqlx_error)?;

        Ok(count)
    }

    async fn update_positions(&self, assignments: &[(TokenId, i64)]) -> Result<()> {
        let mut tx = self.pool.begin().await.map_err(map_sqlx_error)?;
        for (id, position) in assignments {
            sqlx::query("UPDATE tokens SET position = ? WHERE id = ?")
                .bind(position)
                .bind(id)
                .execute(&mut *tx)
                .await
                .map_err(map_sqlx_error)?;
        }
        tx.commit().await.map_err(map_sqlx_error)?;
        Ok(())
    }

    async fn find_called_before(&self, cutoff_millis: i64) -> Result<Vec<Token>> {
        let rows: Vec<TokenRow> = sqlx::query_as(
            "SELECT * FROM tokens WHERE status = ? AND called_at < ?",
        )
        .bind(TokenStatus::Called.as_str())
        .bind(cutoff_millis)
        .fetch_all(&self.pool)
        .await
        .map_err(map_sqlx_error)?;

        rows.into_iter().map(|r| r.into_token()).collect()
    }

    async fn find_called_between(&self, from_millis: i64, to_millis: i64) -> Result<Vec<Token>> {
        let rows: Vec<TokenRow> = sqlx::query_as(
            "SELECT * FROM tokens WHERE status = ? AND called_at > ? AND called_at <= ?",
        )
        .bind(TokenStatus::Called.as_str())
        .bind(from_millis)
        .bind(to_millis)
        .fetch_all(&self.pool)
        .await
        .map_err(map_sqlx_error)?;

        rows.into_iter().map(|r| r.into_token()).collect()
    }

    async fn find_pending_before(&self, cutoff_millis: i64) -> Result<Vec<Token>> {
        let rows: Vec<TokenRow> = sqlx::query_as(
            "SELECT * FROM tokens WHERE status = ? AND issued_at < ?",
        )
        .bind(TokenStatus::Pending.as_str())
        .bind(cutoff_millis)
        .fetch_all(&self.pool)
        .await
        .map_err(map_sqlx_error)?;

        rows.into_iter().map(|r| r.into_token()).collect()
    }

    async fn list_recent(&self, queue_id: &QueueId, limit: i64) -> Result<Vec<Token>> {
        let rows: Vec<TokenRow> = sqlx::query_as(
            r#"
            SELECT * FROM tokens
            WHERE queue_id = ?
            ORDER BY issued_at DESC, seq DESC
            LIMIT ?
            "#,
        )
        .bind(queue_id)
        .bind(limit)
        .fetch_all(&self.pool)
        .await
        .map_err(map_sqlx_error)?;

        rows.into_iter().map(|r| r.into_token()).collect()
    }

    async fn list_served_between(
        &self,
        queue_id: &QueueId,
        start_millis: i64,
        end_millis: i64,
    ) -> Result<Vec<Token>> {
        let rows: Vec<TokenRow> = sqlx::query_as(
            r#"
            SELECT * FROM tokens
            WHERE queue_id = ? AND status = ? AND issued_at >= ? AND issued_at < ?
            "#,
        )
        .bind(queue_id)
        .bind(TokenStatus::Served.as_str())
        .bind(start_millis)
        .bind(end_millis)
        .fetch_all(&self.pool)
        .await
        .map_err(map_sqlx_error)?;

        rows.into_iter().map(|r| r.into_token()).collect()
    }

    async fn list_issued_between(
        &self,
        queue_id: &QueueId,
        start_millis: i64,
        end_millis: i64,
    ) -> Result<Vec<Token>> {
        let rows: Vec<TokenRow> = sqlx::query_as(
            "SELECT * FROM tokens WHERE queue_id = ? AND issued_at >= ? AND issued_at < ?",
        )
        .bind(queue_id)
        .bind(start_millis)
        .bind(end_millis)
        .fetch_all(&self.pool)
        .await
        .map_err(map_sqlx_error)?;

        rows.into_iter().map(|r| r.into_token()).collect()
    }
}

#[async_trait]
impl TransactionalTokenRepository for SqliteTokenRepository {
    async fn begin_transaction(&self) -> Result<Box<dyn TokenTransaction>> {
        let tx = self.pool.begin().await.map_err(map_sqlx_error)?;
        Ok(Box::new(SqliteTokenTransaction::new(tx)))
    }
}

/// SQLite row representation
#[derive(Debug, sqlx::FromRow)]
pub(crate) struct TokenRow {
    id: String,
    display_token: String,
    queue_id: String,
    seq: i64,
    user_id: Option<String>,
    visitor_name: Option<String>,
    visitor_contact: Option<String>,
    status: String,
    priority: String,
    position: Option<i64>,
    issued_at: i64,
    called_at: Option<i64>,
    served_at: Option<i64>,
    cancelled_at: Option<i64>,
}

impl TokenRow {
    pub(crate) fn into_token(self) -> Result<Token> {
        let status = TokenStatus::parse(&self.status).ok_or_else(|| {
            AppError::Database(format!("Unknown token status: {}", self.status))
        })?;
        let priority = Priority::parse(&self.priority).ok_or_else(|| {
            AppError::Database(format!("Unknown token priority: {}", self.priority))
        })?;

        Ok(Token {
            id: self.id,
            display_token: self.display_token,
            queue_id: self.queue_id,
            seq: self.seq,
            user_id: self.user_id,
            visitor_name: self.visitor_name,
            visitor_contact: self.visitor_contact,
            status,
            priority,
            position: self.position,
            issued_at: self.issued_at,
            called_at: self.called_at,
            served_at: self.served_at,
            cancelled_at: self.cancelled_at,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::queue_repository::SqliteQueueRepository;
    use crate::{create_pool, run_migrations};
    use lineup_core::domain::{IssuerRef, Queue};
    use lineup_core::port::QueueRepository;
    use std::sync::Arc;
    use tokio::task::JoinSet;

    async fn setup() -> (SqlitePool, SqliteTokenRepository) {
        let pool = create_pool("sqlite::memory:").await.unwrap();
        run_migrations(&pool).await.unwrap();

        let queues = SqliteQueueRepository::new(pool.clone());
        queues
            .insert(&Queue::new("q1", "org1", "Billing", 5, 0))
            .await
            .unwrap();

        let repo = SqliteTokenRepository::new(pool.clone());
        (pool, repo)
    }

    fn token(id: &str, seq: i64, priority: Priority, issued_at: i64) -> Token {
        Token::new(
            id,
            format!("A-{:03}", seq),
            "q1",
            seq,
            IssuerRef::Customer {
                user_id: format!("user-{}", id),
            },
            priority,
            issued_at,
        )
    }

    #[tokio::test]
    async fn test_insert_and_find() {
        let (_pool, repo) = setup().await;
        let t = token("t1", 1, Priority::Normal, 1000);
        repo.insert(&t).await.unwrap();

        let found = repo.find_by_id(&t.id).await.unwrap().unwrap();
        assert_eq!(found.id, t.id);
        assert_eq!(found.status, TokenStatus::Pending);
        assert_eq!(found.display_token, "A-001");
    }

    #[tokio::test]
    async fn test_transition_stamps_timestamp_once() {
        let (_pool, repo) = setup().await;
        repo.insert(&token("t1", 1, Priority::Normal, 1000))
            .await
            .unwrap();

        let called = repo
            .transition(&"t1".to_string(), TokenStatus::Pending, TokenStatus::Called, 5000)
            .await
            .unwrap();
        assert_eq!(called.status, TokenStatus::Called);
        assert_eq!(called.called_at, Some(5000));
        assert_eq!(called.position, None);

        let served = repo
            .transition(&"t1".to_string(), TokenStatus::Called, TokenStatus::Served, 6000)
            .await
            .unwrap();
        assert_eq!(served.served_at, Some(6000));
        // called_at survives later transitions
        assert_eq!(served.called_at, Some(5000));
    }

    #[tokio::test]
    async fn test_transition_conflict_on_stale_expectation() {
        let (_pool, repo) = setup().await;
        repo.insert(&token("t1", 1, Priority::Normal, 1000))
            .await
            .unwrap();

        repo.transition(&"t1".to_string(), TokenStatus::Pending, TokenStatus::Called, 5000)
            .await
            .unwrap();

        // Second actor still expects PENDING
        let err = repo
            .transition(&"t1".to_string(), TokenStatus::Pending, TokenStatus::Cancelled, 5001)
            .await
            .unwrap_err();
        assert!(err.is_conflict());

        // The losing write changed nothing
        let stored = repo.find_by_id(&"t1".to_string()).await.unwrap().unwrap();
        assert_eq!(stored.status, TokenStatus::Called);
        assert!(stored.cancelled_at.is_none());
    }

    #[tokio::test]
    async fn test_transition_unknown_token() {
        let (_pool, repo) = setup().await;
        let err = repo
            .transition(&"ghost".to_string(), TokenStatus::Pending, TokenStatus::Called, 1)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            AppError::Domain(DomainError::TokenNotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_call_next_priority_then_fifo() {
        let (_pool, repo) = setup().await;
        repo.insert(&token("normal-early", 1, Priority::Normal, 1000))
            .await
            .unwrap();
        repo.insert(&token("priority-late", 2, Priority::Priority, 2000))
            .await
            .unwrap();
        repo.insert(&token("normal-late", 3, Priority::Normal, 3000))
            .await
            .unwrap();

        let first = repo.call_next(&"q1".to_string(), 10_000).await.unwrap().unwrap();
        assert_eq!(first.id, "priority-late");

        let second = repo.call_next(&"q1".to_string(), 10_001).await.unwrap().unwrap();
        assert_eq!(second.id, "normal-early");

        let third = repo.call_next(&"q1".to_string(), 10_002).await.unwrap().unwrap();
        assert_eq!(third.id, "normal-late");

        assert!(repo.call_next(&"q1".to_string(), 10_003).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_call_next_is_atomic_under_concurrency() {
        let (_pool, repo) = setup().await;
        for i in 1..=5 {
            repo.insert(&token(&format!("t{}", i), i, Priority::Normal, 1000 * i))
                .await
                .unwrap();
        }

        let repo = Arc::new(repo);
        let mut tasks = JoinSet::new();
        for _ in 0..8 {
            let repo = Arc::clone(&repo);
            tasks.spawn(async move {
                repo.call_next(&"q1".to_string(), 99_000)
                    .await
                    .unwrap()
                    .map(|t| t.id)
            });
        }

        let mut called_ids = vec![];
        while let Some(result) = tasks.join_next().await {
            if let Some(id) = result.unwrap() {
                called_ids.push(id);
            }
        }

        // Exactly 5 tokens called, no duplicates
        called_ids.sort();
        called_ids.dedup();
        assert_eq!(called_ids.len(), 5);
    }

    #[tokio::test]
    async fn test_update_positions() {
        let (_pool, repo) = setup().await;
        repo.insert(&token("t1", 1, Priority::Normal, 1000))
            .await
            .unwrap();
        repo.insert(&token("t2", 2, Priority::Normal, 2000))
            .await
            .unwrap();

        repo.update_positions(&[("t1".to_string(), 1), ("t2".to_string(), 2)])
            .await
            .unwrap();

        let t2 = repo.find_by_id(&"t2".to_string()).await.unwrap().unwrap();
        assert_eq!(t2.position, Some(2));
    }

    #[tokio::test]
    async fn test_sweeper_scans() {
        let (_pool, repo) = setup().await;
        repo.insert(&token("old-pending", 1, Priority::Normal, 1000))
            .await
            .unwrap();
        repo.insert(&token("fresh-pending", 2, Priority::Normal, 900_000))
            .await
            .unwrap();

        let mut called = token("old-called", 3, Priority::Normal, 1000);
        called.call(10_000).unwrap();
        repo.insert(&called).await.unwrap();

        let stale_pending = repo.find_pending_before(500_000).await.unwrap();
        assert_eq!(stale_pending.len(), 1);
        assert_eq!(stale_pending[0].id, "old-pending");

        let stale_called = repo.find_called_before(20_000).await.unwrap();
        assert_eq!(stale_called.len(), 1);
        assert_eq!(stale_called[0].id, "old-called");

        let warned = repo.find_called_between(5_000, 15_000).await.unwrap();
        assert_eq!(warned.len(), 1);
        let warned = repo.find_called_between(15_000, 25_000).await.unwrap();
        assert!(warned.is_empty());
    }

    #[tokio::test]
    async fn test_issue_transaction_allocates_sequential_display_numbers() {
        let (_pool, repo) = setup().await;

        for expected_seq in 1..=3 {
            let mut tx = repo.begin_transaction().await.unwrap();
            let seq = tx.next_seq(&"q1".to_string(), "2024-01-15").await.unwrap();
            assert_eq!(seq, expected_seq);
            let t = token(&format!("t{}", seq), seq, Priority::Normal, 1000 * seq);
            tx.insert(&t).await.unwrap();
            tx.commit().await.unwrap();
        }

        // A new service day restarts the counter
        let mut tx = repo.begin_transaction().await.unwrap();
        let seq = tx.next_seq(&"q1".to_string(), "2024-01-16").await.unwrap();
        assert_eq!(seq, 1);
        tx.rollback().await.unwrap();
    }

    #[tokio::test]
    async fn test_count_active_issued_since() {
        let (_pool, repo) = setup().await;
        repo.insert(&token("t1", 1, Priority::Normal, 1000))
            .await
            .unwrap();
        repo.insert(&token("t2", 2, Priority::Normal, 5000))
            .await
            .unwrap();

        let mut called = token("t3", 3, Priority::Normal, 6000);
        called.call(7000).unwrap();
        repo.insert(&called).await.unwrap();

        let mut cancelled = token("t4", 4, Priority::Normal, 8000);
        cancelled.cancel(9000).unwrap();
        repo.insert(&cancelled).await.unwrap();

        let mut tx = repo.begin_transaction().await.unwrap();
        // Terminal t4 does not consume a cap slot
        assert_eq!(
            tx.count_active_issued_since(&"q1".to_string(), 0)
                .await
                .unwrap(),
            3
        );
        assert_eq!(
            tx.count_active_issued_since(&"q1".to_string(), 2000)
                .await
                .unwrap(),
            2
        );
        tx.rollback().await.unwrap();
    }
}
