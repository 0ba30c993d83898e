// Notification Port (Interface)
// Delivery mechanics (email/SMS/push) live behind this boundary.

use crate::domain::{OrganisationId, UserId};
use crate::error::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// Notification categories the engine emits
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum NotificationKind {
    TokenCalled,
    TokenExpired,
    TokenExpiringSoon,
}

impl NotificationKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            NotificationKind::TokenCalled => "TOKEN_CALLED",
            NotificationKind::TokenExpired => "TOKEN_EXPIRED",
            NotificationKind::TokenExpiringSoon => "TOKEN_EXPIRING_SOON",
        }
    }
}

impl std::fmt::Display for NotificationKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One notification to a customer (or an organisation-wide record when no
/// user is attached, e.g. a walk-in token expiring)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Notification {
    pub user_id: Option<UserId>,
    pub organisation_id: OrganisationId,
    pub kind: NotificationKind,
    pub title: String,
    pub message: String,
    pub data: serde_json::Value,
}

/// Fire-and-forget from the engine's perspective: callers log failures and
/// never propagate them into the state transition that triggered them.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(&self, notification: Notification) -> Result<()>;
}

pub mod mocks {
    use super::*;
    use std::sync::Mutex;

    /// Test double collecting every notification it receives
    #[derive(Default)]
    pub struct RecordingNotifier {
        pub sent: Mutex<Vec<Notification>>,
    }

    impl RecordingNotifier {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn count_of(&self, kind: NotificationKind) -> usize {
            self.sent
                .lock()
                .unwrap()
                .iter()
                .filter(|n| n.kind == kind)
                .count()
        }
    }

    #[async_trait]
    impl Notifier for RecordingNotifier {
        async fn notify(&self, notification: Notification) -> Result<()> {
            self.sent.lock().unwrap().push(notification);
            Ok(())
        }
    }

    /// Test double that always fails, for failure-isolation tests
    pub struct FailingNotifier;

    #[async_trait]
    impl Notifier for FailingNotifier {
        async fn notify(&self, _notification: Notification) -> Result<()> {
            Err(crate::error::AppError::Internal(
                "notifier unavailable".to_string(),
            ))
        }
    }
}
