//! Timeout Sweeper - periodic liveness enforcement.
//!
//! Three independent passes per tick, each idempotent and safe to retry:
//! called tokens that blocked a counter too long are expired, pending
//! tokens nobody will ever call are expired, and called tokens close to
//! their deadline get a pre-timeout warning. A failure on one token never
//! aborts the rest of a pass, and the sweeper itself never raises to its
//! caller - a failed pass simply reports a partial count and the next
//! cadence tick retries.

mod shutdown;

pub use shutdown::{shutdown_channel, ShutdownSender, ShutdownToken};

use std::sync::Arc;
use std::time::Duration;

use serde_json::json;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, error, info, warn};

use crate::application::lifecycle::QueueService;
use crate::port::{
    Event, EventKind, EventPublisher, Notification, NotificationKind, Notifier, QueueRepository,
    Room, TimeProvider, TokenRepository,
};

/// Timeout thresholds and cadence, injected at construction so deployments
/// can tune them and tests can shrink them.
#[derive(Debug, Clone)]
pub struct SweeperConfig {
    /// How long a CALLED token may block a counter before expiry
    pub called_timeout: Duration,
    /// How long a PENDING token may wait before expiry
    pub pending_timeout: Duration,
    /// Warning fires this long before the called timeout hits
    pub warning_lead: Duration,
    /// Width of the warning slice; one cadence worth avoids duplicates
    pub warning_lookback: Duration,
    /// Interval between sweep ticks
    pub cadence: Duration,
}

impl Default for SweeperConfig {
    fn default() -> Self {
        Self {
            called_timeout: Duration::from_secs(10 * 60),
            pending_timeout: Duration::from_secs(120 * 60),
            warning_lead: Duration::from_secs(2 * 60),
            warning_lookback: Duration::from_secs(60),
            cadence: Duration::from_secs(60),
        }
    }
}

/// Counts from one sweep tick
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepOutcome {
    pub expired_called: usize,
    pub expired_pending: usize,
    pub warned: usize,
}

impl SweepOutcome {
    pub fn total(&self) -> usize {
        self.expired_called + self.expired_pending + self.warned
    }
}

/// Background sweeper. Drives the same lifecycle transitions as any
/// external actor, through the same QueueService.
pub struct TokenSweeper {
    service: Arc<QueueService>,
    tokens: Arc<dyn TokenRepository>,
    queues: Arc<dyn QueueRepository>,
    notifier: Arc<dyn Notifier>,
    events: Arc<dyn EventPublisher>,
    time_provider: Arc<dyn TimeProvider>,
    config: SweeperConfig,
}

impl TokenSweeper {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        service: Arc<QueueService>,
        tokens: Arc<dyn TokenRepository>,
        queues: Arc<dyn QueueRepository>,
        notifier: Arc<dyn Notifier>,
        events: Arc<dyn EventPublisher>,
        time_provider: Arc<dyn TimeProvider>,
        config: SweeperConfig,
    ) -> Self {
        Self {
            service,
            tokens,
            queues,
            notifier,
            events,
            time_provider,
            config,
        }
    }

    /// Run the sweep loop until shutdown. Should be spawned in
    /// tokio::spawn. A tick that overruns the cadence delays the next
    /// tick; ticks never overlap.
    pub async fn run(self, mut shutdown: ShutdownToken) {
        info!(
            cadence_secs = self.config.cadence.as_secs(),
            called_timeout_secs = self.config.called_timeout.as_secs(),
            pending_timeout_secs = self.config.pending_timeout.as_secs(),
            "Timeout sweeper started"
        );

        let mut tick = interval(self.config.cadence);
        tick.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = tick.tick() => {
                    let outcome = self.sweep().await;
                    if outcome.total() > 0 {
                        info!(
                            expired_called = outcome.expired_called,
                            expired_pending = outcome.expired_pending,
                            warned = outcome.warned,
                            "Sweep tick completed"
                        );
                    }
                }
                _ = shutdown.wait() => {
                    info!("Timeout sweeper stopping");
                    break;
                }
            }
        }
    }

    /// One full sweep: called-timeout pass, pending-timeout pass, warning
    /// pass. Never errors; per-token failures are logged and skipped.
    pub async fn sweep(&self) -> SweepOutcome {
        let now = self.time_provider.now_millis();
        SweepOutcome {
            expired_called: self.expire_called_pass(now).await,
            expired_pending: self.expire_pending_pass(now).await,
            warned: self.warning_pass(now).await,
        }
    }

    /// Expire CALLED tokens whose customer never showed up at the counter
    async fn expire_called_pass(&self, now_millis: i64) -> usize {
        let cutoff = now_millis - self.config.called_timeout.as_millis() as i64;
        let stale = match self.tokens.find_called_before(cutoff).await {
            Ok(tokens) => tokens,
            Err(e) => {
                error!(error = %e, "Called-timeout scan failed");
                return 0;
            }
        };
        self.expire_all(stale).await
    }

    /// Expire PENDING tokens that have waited past the pending timeout
    async fn expire_pending_pass(&self, now_millis: i64) -> usize {
        let cutoff = now_millis - self.config.pending_timeout.as_millis() as i64;
        let stale = match self.tokens.find_pending_before(cutoff).await {
            Ok(tokens) => tokens,
            Err(e) => {
                error!(error = %e, "Pending-timeout scan failed");
                return 0;
            }
        };
        self.expire_all(stale).await
    }

    async fn expire_all(&self, stale: Vec<crate::domain::Token>) -> usize {
        let mut expired = 0;
        for token in stale {
            match self.service.expire(&token.id).await {
                Ok(_) => expired += 1,
                // Lost race: another actor already resolved the token
                Err(e) if e.is_conflict() => {
                    debug!(token_id = %token.id, "Token already resolved, skipping");
                }
                Err(e) => {
                    warn!(token_id = %token.id, error = %e, "Failed to expire token");
                }
            }
        }
        expired
    }

    /// Warn CALLED tokens whose expiry is imminent, without changing
    /// status. The slice (window_start, window_end] covers exactly one
    /// lookback, so a token is warned once even across adjacent ticks.
    async fn warning_pass(&self, now_millis: i64) -> usize {
        let called_timeout = self.config.called_timeout.as_millis() as i64;
        let window_end =
            now_millis - (called_timeout - self.config.warning_lead.as_millis() as i64);
        let window_start = window_end - self.config.warning_lookback.as_millis() as i64;

        let expiring = match self.tokens.find_called_between(window_start, window_end).await {
            Ok(tokens) => tokens,
            Err(e) => {
                error!(error = %e, "Warning scan failed");
                return 0;
            }
        };

        let mut warned = 0;
        for token in expiring {
            let Some(called_at) = token.called_at else {
                continue;
            };
            let remaining_ms = called_at + called_timeout - now_millis;
            let remaining_min = (remaining_ms.max(0) + 59_999) / 60_000;

            self.events.publish(Event {
                room: Room::Token(token.id.clone()),
                kind: EventKind::TokenUpdate,
                payload: json!({
                    "token_id": token.id,
                    "display_token": token.display_token,
                    "queue_id": token.queue_id,
                    "action": "expiry-warning",
                    "remaining_minutes": remaining_min,
                }),
                emitted_at: now_millis,
            });

            let organisation_id = match self.queues.find_by_id(&token.queue_id).await {
                Ok(Some(queue)) => queue.organisation_id,
                Ok(None) | Err(_) => {
                    warn!(token_id = %token.id, queue_id = %token.queue_id,
                          "Queue lookup failed during warning pass");
                    continue;
                }
            };

            let notification = Notification {
                user_id: token.user_id.clone(),
                organisation_id,
                kind: NotificationKind::TokenExpiringSoon,
                title: "Your token is about to expire".to_string(),
                message: format!(
                    "Token {} will expire in about {} minute(s). Please proceed to the counter.",
                    token.display_token, remaining_min
                ),
                data: json!({ "token_id": token.id, "queue_id": token.queue_id }),
            };
            if let Err(e) = self.notifier.notify(notification).await {
                warn!(token_id = %token.id, error = %e, "Warning notification failed");
            }
            warned += 1;
        }
        warned
    }
}
