// SQLite Token Transaction - atomic Issue path

use async_trait::async_trait;
use lineup_core::domain::{QueueId, Token, TokenStatus};
use lineup_core::error::Result;
use lineup_core::port::TokenTransaction;
use sqlx::{Sqlite, Transaction as SqlxTransaction};

use crate::token_repository::map_sqlx_error;

pub struct SqliteTokenTransaction {
    tx: SqlxTransaction<'static, Sqlite>,
}

impl SqliteTokenTransaction {
    pub fn new(tx: SqlxTransaction<'static, Sqlite>) -> Self {
        Self { tx }
    }
}

#[async_trait]
impl TokenTransaction for SqliteTokenTransaction {
    async fn next_seq(&mut self, queue_id: &QueueId, service_day: &str) -> Result<i64> {
        // Upsert keeps the counter row per (queue, service day); the
        // RETURNING value is the freshly allocated sequence.
        let seq: i64 = sqlx::query_scalar(
            r#"
            INSERT INTO queue_counters (queue_id, service_day, next_seq)
            VALUES (?, ?, 1)
            ON CONFLICT(queue_id, service_day)
            DO UPDATE SET next_seq = next_seq + 1
            RETURNING next_seq
            "#,
        )
        .bind(queue_id)
        .bind(service_day)
        .fetch_one(&mut *self.tx)
        .await
        .map_err(map_sqlx_error)?;

        Ok(seq)
    }

    async fn count_active_issued_since(
        &mut self,
        queue_id: &QueueId,
        since_millis: i64,
    ) -> Result<i64> {
        let count: i64 = sqlx::query_scalar(
            r#"
            SELECT COUNT(*) FROM tokens
            WHERE queue_id = ? AND issued_at >= ? AND status IN (?, ?)
            "#,
        )
        .bind(queue_id)
        .bind(since_millis)
        .bind(TokenStatus::Pending.as_str())
        .bind(TokenStatus::Called.as_str())
        .fetch_one(&mut *self.tx)
        .await
        .map_err(map_sqlx_error)?;

        Ok(count)
    }

    async fn insert(&mut self, token: &Token) -> Result<()> {
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
        .execute(&mut *self.tx)
        .await
        .map_err(map_sqlx_error)?;

        Ok(())
    }

    async fn commit(self: Box<Self>) -> Result<()> {
        self.tx.commit().await.map_err(map_sqlx_error)?;
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> Result<()> {
        self.tx.rollback().await.map_err(map_sqlx_error)?;
        Ok(())
    }
}
