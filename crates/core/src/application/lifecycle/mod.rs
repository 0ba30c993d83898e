// Token Lifecycle Manager - the state machine behind every queue operation

pub mod join;

pub use join::JoinRequest;

use std::sync::Arc;

use serde_json::json;
use tracing::{debug, warn};

use crate::application::positions::{self, PositionUpdate};
use crate::application::stats::{self, QueuePerformance, QueueStats, TimelineEntry};
use crate::domain::error::DomainError;
use crate::domain::{Actor, Queue, QueueId, Token, TokenId, TokenStatus};
use crate::error::Result;
use crate::port::{
    Event, EventKind, EventPublisher, IdProvider, Notification, NotificationKind, Notifier,
    QueueRepository, Room, TimeProvider, TokenRepository, TransactionalTokenRepository,
};

/// Queue Service - validates transitions, writes through the token store,
/// recomputes positions, and fans out events.
///
/// All collaborators are injected; the service holds no authoritative state
/// of its own. Per-token linearizability comes from the store's conditional
/// updates, not from locks held here.
pub struct QueueService {
    tokens: Arc<dyn TokenRepository>,
    tx_tokens: Arc<dyn TransactionalTokenRepository>,
    queues: Arc<dyn QueueRepository>,
    notifier: Arc<dyn Notifier>,
    events: Arc<dyn EventPublisher>,
    id_provider: Arc<dyn IdProvider>,
    time_provider: Arc<dyn TimeProvider>,
}

impl QueueService {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        tokens: Arc<dyn TokenRepository>,
        tx_tokens: Arc<dyn TransactionalTokenRepository>,
        queues: Arc<dyn QueueRepository>,
        notifier: Arc<dyn Notifier>,
        events: Arc<dyn EventPublisher>,
        id_provider: Arc<dyn IdProvider>,
        time_provider: Arc<dyn TimeProvider>,
    ) -> Self {
        Self {
            tokens,
            tx_tokens,
            queues,
            notifier,
            events,
            id_provider,
            time_provider,
        }
    }

    /// Issue a new token. Rejects before anything is written when the
    /// queue is missing, paused, or at its daily cap.
    pub async fn join_queue(&self, req: JoinRequest) -> Result<Token> {
        let queue = self.require_queue(&req.queue_id).await?;
        if !queue.is_active {
            return Err(DomainError::QueueInactive(queue.id.clone()).into());
        }

        let mut token = join::execute(
            self.tx_tokens.as_ref(),
            self.id_provider.as_ref(),
            self.time_provider.as_ref(),
            &queue,
            req,
        )
        .await?;

        let updates = self.recompute_positions(&queue).await?;
        if let Some(update) = updates.iter().find(|u| u.token_id == token.id) {
            token.position = Some(update.position);
        }

        debug!(
            token_id = %token.id,
            display_token = %token.display_token,
            queue_id = %queue.id,
            position = ?token.position,
            "Token issued"
        );

        self.publish(
            Room::Queue(queue.id.clone()),
            EventKind::TokenAdded,
            json!({
                "token_id": token.id,
                "display_token": token.display_token,
                "queue_id": queue.id,
                "priority": token.priority,
                "position": token.position,
            }),
        );

        Ok(token)
    }

    /// Call the next pending token: highest priority tier first, FIFO
    /// within a tier. Atomic against concurrent cancels and sweeps.
    pub async fn call_next(&self, queue_id: &QueueId) -> Result<Token> {
        let queue = self.require_queue(queue_id).await?;
        if !queue.is_active {
            return Err(DomainError::QueueInactive(queue.id.clone()).into());
        }

        let now = self.time_provider.now_millis();
        let token = self
            .tokens
            .call_next(queue_id, now)
            .await?
            .ok_or_else(|| DomainError::QueueEmpty(queue_id.clone()))?;

        self.recompute_positions(&queue).await?;

        debug!(
            token_id = %token.id,
            display_token = %token.display_token,
            queue_id = %queue.id,
            "Token called"
        );

        let payload = json!({
            "token_id": token.id,
            "display_token": token.display_token,
            "queue_id": queue.id,
        });
        self.publish(
            Room::Token(token.id.clone()),
            EventKind::TokenCalled,
            payload.clone(),
        );
        self.publish(Room::Queue(queue.id.clone()), EventKind::TokenCalled, payload);

        if token.user_id.is_some() {
            self.notify_best_effort(Notification {
                user_id: token.user_id.clone(),
                organisation_id: queue.organisation_id.clone(),
                kind: NotificationKind::TokenCalled,
                title: "It's your turn".to_string(),
                message: format!(
                    "Token {} has been called. Please proceed to the counter.",
                    token.display_token
                ),
                data: json!({ "token_id": token.id, "queue_id": queue.id }),
            })
            .await;
        }

        Ok(token)
    }

    /// Staff confirms the called customer was served
    pub async fn serve(&self, token_id: &TokenId) -> Result<Token> {
        let token = self.require_token(token_id).await?;
        let served = self
            .checked_transition(&token, TokenStatus::Served)
            .await?;

        self.publish_token_update(&served);
        Ok(served)
    }

    /// Staff skips a no-show. Legal from PENDING or CALLED; the token is
    /// marked MISSED, distinct from a cancel.
    pub async fn skip(&self, token_id: &TokenId) -> Result<Token> {
        let token = self.require_token(token_id).await?;
        let was_pending = token.status == TokenStatus::Pending;
        let missed = self
            .checked_transition(&token, TokenStatus::Missed)
            .await?;

        if was_pending {
            let queue = self.require_queue(&missed.queue_id).await?;
            self.recompute_positions(&queue).await?;
        }

        self.publish_token_update(&missed);
        Ok(missed)
    }

    /// Cancel a token. Customers may only cancel their own; staff and the
    /// system may cancel any token in their organisation's queues.
    pub async fn cancel(&self, token_id: &TokenId, actor: Actor) -> Result<Token> {
        let token = self.require_token(token_id).await?;

        if let Actor::Customer(user_id) = &actor {
            if !token.is_owned_by(user_id) {
                return Err(DomainError::Forbidden(token_id.clone()).into());
            }
        }

        let was_pending = token.status == TokenStatus::Pending;
        let cancelled = self
            .checked_transition(&token, TokenStatus::Cancelled)
            .await?;

        if was_pending {
            let queue = self.require_queue(&cancelled.queue_id).await?;
            self.recompute_positions(&queue).await?;
        }

        self.publish_token_update(&cancelled);
        Ok(cancelled)
    }

    /// System-only expiry, invoked by the timeout sweeper. Semantically a
    /// cancel tagged reason=timeout: the customer is notified and the
    /// queue room sees a token-timeout update.
    pub async fn expire(&self, token_id: &TokenId) -> Result<Token> {
        let token = self.require_token(token_id).await?;
        let queue = self.require_queue(&token.queue_id).await?;

        let was_pending = token.status == TokenStatus::Pending;
        let expired = self
            .checked_transition(&token, TokenStatus::Cancelled)
            .await?;

        if was_pending {
            self.recompute_positions(&queue).await?;
        }

        self.publish_token_update(&expired);
        self.publish(
            Room::Queue(queue.id.clone()),
            EventKind::QueueUpdate,
            json!({
                "action": "token-timeout",
                "token_id": expired.id,
                "display_token": expired.display_token,
                "reason": "timeout",
            }),
        );

        self.notify_best_effort(Notification {
            user_id: expired.user_id.clone(),
            organisation_id: queue.organisation_id.clone(),
            kind: NotificationKind::TokenExpired,
            title: "Token expired".to_string(),
            message: format!(
                "Token {} timed out and was removed from the queue.",
                expired.display_token
            ),
            data: json!({ "token_id": expired.id, "queue_id": queue.id, "reason": "timeout" }),
        })
        .await;

        Ok(expired)
    }

    /// Pause or resume a queue. Pausing rejects new joins and calls but
    /// leaves already-pending tokens untouched.
    pub async fn set_queue_active(&self, queue_id: &QueueId, is_active: bool) -> Result<Queue> {
        let queue = self.queues.set_active(queue_id, is_active).await?;

        let action = if is_active { "resumed" } else { "paused" };
        self.publish(
            Room::Queue(queue.id.clone()),
            EventKind::QueueUpdate,
            json!({ "action": action, "queue_id": queue.id }),
        );
        self.publish(
            Room::Organisation(queue.organisation_id.clone()),
            EventKind::OrgUpdate,
            json!({ "action": action, "queue_id": queue.id }),
        );

        Ok(queue)
    }

    /// Counts by status plus the throughput-proxy wait estimate
    pub async fn get_queue_stats(&self, queue_id: &QueueId) -> Result<QueueStats> {
        let queue = self.require_queue(queue_id).await?;
        let tokens = self.tokens.list_for_queue(queue_id).await?;
        Ok(stats::compute_queue_stats(&queue, &tokens))
    }

    /// Measured wait and miss rate over tokens issued in [start, end)
    pub async fn get_queue_performance(
        &self,
        queue_id: &QueueId,
        start_millis: i64,
        end_millis: i64,
    ) -> Result<QueuePerformance> {
        self.require_queue(queue_id).await?;
        let served = self
            .tokens
            .list_served_between(queue_id, start_millis, end_millis)
            .await?;
        let issued = self
            .tokens
            .list_issued_between(queue_id, start_millis, end_millis)
            .await?;
        Ok(stats::compute_queue_performance(&served, &issued))
    }

    /// Most recent tokens of a queue, newest first
    pub async fn get_queue_timeline(
        &self,
        queue_id: &QueueId,
        limit: i64,
    ) -> Result<Vec<TimelineEntry>> {
        self.require_queue(queue_id).await?;
        let tokens = self.tokens.list_recent(queue_id, limit).await?;
        Ok(stats::timeline_entries(tokens))
    }

    /// Recompute ranks for a queue's pending set and persist only the
    /// changed ones. Single enforcement point for the position invariant.
    pub async fn recompute_positions(&self, queue: &Queue) -> Result<Vec<PositionUpdate>> {
        let pending = self
            .tokens
            .list_by_status(&queue.id, TokenStatus::Pending)
            .await?;
        let ordered = positions::order_pending(pending);
        let updates = positions::assign_positions(&ordered, queue.average_minutes);
        let changed = positions::changed_positions(&ordered, &updates);

        if !changed.is_empty() {
            self.tokens.update_positions(&changed).await?;
        }

        Ok(updates)
    }

    /// Validate the requested transition against the observed status, then
    /// compare-and-swap from exactly that status. A legal request that
    /// loses the race surfaces as Conflict; an illegal one never writes.
    async fn checked_transition(&self, token: &Token, to: TokenStatus) -> Result<Token> {
        if !token.status.can_transition_to(to) {
            return Err(DomainError::InvalidTransition {
                from: token.status.to_string(),
                to: to.to_string(),
            }
            .into());
        }

        let now = self.time_provider.now_millis();
        self.tokens.transition(&token.id, token.status, to, now).await
    }

    async fn require_queue(&self, queue_id: &QueueId) -> Result<Queue> {
        self.queues
            .find_by_id(queue_id)
            .await?
            .ok_or_else(|| DomainError::QueueNotFound(queue_id.clone()).into())
    }

    async fn require_token(&self, token_id: &TokenId) -> Result<Token> {
        self.tokens
            .find_by_id(token_id)
            .await?
            .ok_or_else(|| DomainError::TokenNotFound(token_id.clone()).into())
    }

    fn publish_token_update(&self, token: &Token) {
        self.publish(
            Room::Token(token.id.clone()),
            EventKind::TokenUpdate,
            json!({
                "token_id": token.id,
                "display_token": token.display_token,
                "queue_id": token.queue_id,
                "status": token.status,
            }),
        );
    }

    fn publish(&self, room: Room, kind: EventKind, payload: serde_json::Value) {
        self.events.publish(Event {
            room,
            kind,
            payload,
            emitted_at: self.time_provider.now_millis(),
        });
    }

    /// Notification failures are logged and swallowed: they must never
    /// fail the state transition that triggered them.
    async fn notify_best_effort(&self, notification: Notification) {
        let kind = notification.kind;
        if let Err(e) = self.notifier.notify(notification).await {
            warn!(kind = %kind, error = %e, "Notification delivery failed");
        }
    }
}
