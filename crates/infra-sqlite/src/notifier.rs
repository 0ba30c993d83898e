// SQLite Notifier - persists notification records.
// Actual delivery (email/SMS/push) is a separate consumer of these rows.

use async_trait::async_trait;
use lineup_core::error::Result;
use lineup_core::port::{Notification, Notifier, TimeProvider};
use sqlx::SqlitePool;
use std::sync::Arc;
use tracing::debug;

use crate::token_repository::map_sqlx_error;

pub struct SqliteNotifier {
    pool: SqlitePool,
    time_provider: Arc<dyn TimeProvider>,
}

impl SqliteNotifier {
    pub fn new(pool: SqlitePool, time_provider: Arc<dyn TimeProvider>) -> Self {
        Self {
            pool,
            time_provider,
        }
    }
}

#[async_trait]
impl Notifier for SqliteNotifier {
    async fn notify(&self, notification: Notification) -> Result<()> {
        debug!(
            kind = %notification.kind,
            user_id = ?notification.user_id,
            "Recording notification"
        );

        sqlx::query(
            r#"
            INSERT INTO notifications (
                user_id, organisation_id, kind, title, message, data, created_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&notification.user_id)
        .bind(&notification.organisation_id)
        .bind(notification.kind.as_str())
        .bind(&notification.title)
        .bind(&notification.message)
        .bind(notification.data.to_string())
        .bind(self.time_provider.now_millis())
        .execute(&self.pool)
        .await
        .map_err(map_sqlx_error)?;

        Ok(())
    }
}
