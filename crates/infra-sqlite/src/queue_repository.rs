// SQLite QueueRepository Implementation

use async_trait::async_trait;
use lineup_core::domain::error::DomainError;
use lineup_core::domain::{Queue, QueueId};
use lineup_core::error::Result;
use lineup_core::port::QueueRepository;
use sqlx::SqlitePool;

use crate::token_repository::map_sqlx_error;

pub struct SqliteQueueRepository {
    pool: SqlitePool,
}

impl SqliteQueueRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl QueueRepository for SqliteQueueRepository {
    async fn insert(&self, queue: &Queue) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO queues (
                id, organisation_id, name, prefix,
                average_minutes, is_active, max_tokens, created_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(id) DO UPDATE SET
                name = excluded.name,
                prefix = excluded.prefix,
                average_minutes = excluded.average_minutes,
                is_active = excluded.is_active,
                max_tokens = excluded.max_tokens
            "#,
        )
        .bind(&queue.id)
        .bind(&queue.organisation_id)
        .bind(&queue.name)
        .bind(&queue.prefix)
        .bind(queue.average_minutes)
        .bind(if queue.is_active { 1 } else { 0 })
        .bind(queue.max_tokens)
        .bind(queue.created_at)
        .execute(&self.pool)
        .await
        .map_err(map_sqlx_error)?;

        Ok(())
    }

    async fn find_by_id(&self, id: &QueueId) -> Result<Option<Queue>> {
        let row = sqlx::query_as::<_, QueueRow>("SELECT * FROM queues WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(map_sqlx_error)?;

        Ok(row.map(|r| r.into_queue()))
    }

    async fn set_active(&self, id: &QueueId, is_active: bool) -> Result<Queue> {
        let row = sqlx::query_as::<_, QueueRow>(
            "UPDATE queues SET is_active = ? WHERE id = ? RETURNING *",
        )
        .bind(if is_active { 1 } else { 0 })
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(map_sqlx_error)?;

        match row {
            Some(r) => Ok(r.into_queue()),
            None => Err(DomainError::QueueNotFound(id.clone()).into()),
        }
    }
}

/// SQLite row representation
#[derive(Debug, sqlx::FromRow)]
struct QueueRow {
    id: String,
    organisation_id: String,
    name: String,
    prefix: String,
    average_minutes: i64,
    is_active: i64, // SQLite boolean as integer
    max_tokens: Option<i64>,
    created_at: i64,
}

impl QueueRow {
    fn into_queue(self) -> Queue {
        Queue {
            id: self.id,
            organisation_id: self.organisation_id,
            name: self.name,
            prefix: self.prefix,
            average_minutes: self.average_minutes,
            is_active: self.is_active != 0,
            max_tokens: self.max_tokens,
            created_at: self.created_at,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{create_pool, run_migrations};

    async fn setup() -> SqliteQueueRepository {
        let pool = create_pool("sqlite::memory:").await.unwrap();
        run_migrations(&pool).await.unwrap();
        SqliteQueueRepository::new(pool)
    }

    #[tokio::test]
    async fn test_insert_and_find() {
        let repo = setup().await;
        let queue = Queue::new("q1", "org1", "Billing", 5, 1000);
        repo.insert(&queue).await.unwrap();

        let found = repo.find_by_id(&"q1".to_string()).await.unwrap().unwrap();
        assert_eq!(found.name, "Billing");
        assert!(found.is_active);
        assert_eq!(found.max_tokens, None);
    }

    #[tokio::test]
    async fn test_set_active_round_trip() {
        let repo = setup().await;
        repo.insert(&Queue::new("q1", "org1", "Billing", 5, 1000))
            .await
            .unwrap();

        let paused = repo.set_active(&"q1".to_string(), false).await.unwrap();
        assert!(!paused.is_active);

        let resumed = repo.set_active(&"q1".to_string(), true).await.unwrap();
        assert!(resumed.is_active);
    }

    #[tokio::test]
    async fn test_set_active_unknown_queue() {
        let repo = setup().await;
        let err = repo.set_active(&"ghost".to_string(), false).await.unwrap_err();
        assert!(matches!(
            err,
            lineup_core::error::AppError::Domain(DomainError::QueueNotFound(_))
        ));
    }
}
