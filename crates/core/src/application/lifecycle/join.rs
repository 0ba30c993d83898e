// Join Queue Use Case

use serde::{Deserialize, Serialize};

use crate::domain::error::DomainError;
use crate::domain::{IssuerRef, Priority, Queue, QueueId, Token};
use crate::error::Result;
use crate::port::{IdProvider, TimeProvider, TransactionalTokenRepository};

const DAY_MILLIS: i64 = 24 * 60 * 60 * 1000;

/// Join request: a customer self-joins, or staff registers a walk-in
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JoinRequest {
    pub queue_id: QueueId,
    pub issuer: IssuerRef,

    #[serde(default = "default_priority")]
    pub priority: Priority,
}

fn default_priority() -> Priority {
    Priority::Normal
}

/// Issue a token in one transaction: daily-cap check, display-token
/// sequence allocation, and insert commit or roll back together, so a
/// rejected join never leaves a partial token behind.
///
/// The caller has already verified the queue exists and is active.
pub async fn execute(
    token_repo: &dyn TransactionalTokenRepository,
    id_provider: &dyn IdProvider,
    time_provider: &dyn TimeProvider,
    queue: &Queue,
    req: JoinRequest,
) -> Result<Token> {
    let now = time_provider.now_millis();
    let service_day = time_provider.service_day();

    let mut tx = token_repo.begin_transaction().await?;

    // Daily cap counts non-terminal tokens only: a served or cancelled
    // customer frees their slot for the next join.
    if let Some(max_tokens) = queue.max_tokens {
        let issued_today = tx
            .count_active_issued_since(&queue.id, start_of_day(now))
            .await?;
        if issued_today >= max_tokens {
            tx.rollback().await?;
            return Err(DomainError::QueueFull {
                queue_id: queue.id.clone(),
                max_tokens,
            }
            .into());
        }
    }

    let seq = tx.next_seq(&queue.id, &service_day).await?;

    let token = Token::new(
        id_provider.generate_id(),
        queue.display_token(seq),
        &queue.id,
        seq,
        req.issuer,
        req.priority,
        now,
    );

    tx.insert(&token).await?;
    tx.commit().await?;

    Ok(token)
}

/// UTC midnight of the instant's day
fn start_of_day(now_millis: i64) -> i64 {
    now_millis - now_millis.rem_euclid(DAY_MILLIS)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_start_of_day() {
        // 2024-01-15T12:34:56Z
        let noonish = 1_705_322_096_000;
        let midnight = start_of_day(noonish);
        assert_eq!(midnight % DAY_MILLIS, 0);
        assert!(noonish - midnight < DAY_MILLIS);
    }
}
