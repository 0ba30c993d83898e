// Token Domain Model

use serde::{Deserialize, Serialize};

use crate::domain::error::{DomainError, Result};

/// Token ID (UUID v4)
pub type TokenId = String;

/// Queue identifier
pub type QueueId = String;

/// User identifier (registered customer account)
pub type UserId = String;

/// Token lifecycle status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TokenStatus {
    Pending,
    Called,
    Served,
    Cancelled,
    Missed,
}

impl TokenStatus {
    /// Terminal states never transition again
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            TokenStatus::Served | TokenStatus::Cancelled | TokenStatus::Missed
        )
    }

    /// Single source of truth for the transition table
    pub fn can_transition_to(&self, to: TokenStatus) -> bool {
        use TokenStatus::*;
        matches!(
            (self, to),
            (Pending, Called)
                | (Pending, Cancelled)
                | (Pending, Missed)
                | (Called, Served)
                | (Called, Cancelled)
                | (Called, Missed)
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            TokenStatus::Pending => "PENDING",
            TokenStatus::Called => "CALLED",
            TokenStatus::Served => "SERVED",
            TokenStatus::Cancelled => "CANCELLED",
            TokenStatus::Missed => "MISSED",
        }
    }

    pub fn parse(s: &str) -> Option<TokenStatus> {
        match s {
            "PENDING" => Some(TokenStatus::Pending),
            "CALLED" => Some(TokenStatus::Called),
            "SERVED" => Some(TokenStatus::Served),
            "CANCELLED" => Some(TokenStatus::Cancelled),
            "MISSED" => Some(TokenStatus::Missed),
            _ => None,
        }
    }
}

impl std::fmt::Display for TokenStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Priority tier. Influences call ordering only, never preempts an
/// already-called token.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Priority {
    Normal,
    Priority,
    Emergency,
}

impl Priority {
    /// Explicit total order: higher rank is called first
    pub fn rank(&self) -> i32 {
        match self {
            Priority::Normal => 0,
            Priority::Priority => 1,
            Priority::Emergency => 2,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Priority::Normal => "NORMAL",
            Priority::Priority => "PRIORITY",
            Priority::Emergency => "EMERGENCY",
        }
    }

    pub fn parse(s: &str) -> Option<Priority> {
        match s {
            "NORMAL" => Some(Priority::Normal),
            "PRIORITY" => Some(Priority::Priority),
            "EMERGENCY" => Some(Priority::Emergency),
            _ => None,
        }
    }
}

impl std::fmt::Display for Priority {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Who a token was issued for: a registered customer, or a walk-in
/// registered at the counter by staff.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum IssuerRef {
    Customer { user_id: UserId },
    WalkIn { name: String, contact: Option<String> },
}

/// The actor performing a lifecycle operation. The engine only enforces
/// token ownership for customer cancels; full authorization lives above it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Actor {
    Customer(UserId),
    Staff,
    System,
}

/// Token Entity - one customer's claim on a queue slot.
///
/// Timestamps are epoch milliseconds, each set exactly once by its
/// transition and never cleared. `Missed` records its terminal moment in
/// `cancelled_at`; there is no separate missed column.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Token {
    pub id: TokenId,
    /// Human-readable code shown to the customer, e.g. "A-042".
    /// Unique within a queue's service day.
    pub display_token: String,
    pub queue_id: QueueId,
    /// Queue-scoped monotonic sequence; FIFO tie-break when two tokens
    /// share an `issued_at` millisecond.
    pub seq: i64,
    /// None for walk-ins
    pub user_id: Option<UserId>,
    pub visitor_name: Option<String>,
    pub visitor_contact: Option<String>,
    pub status: TokenStatus,
    pub priority: Priority,
    /// Denormalized 1-based rank among pending tokens. Derived, never a
    /// source of truth for transition decisions.
    pub position: Option<i64>,
    pub issued_at: i64,
    pub called_at: Option<i64>,
    pub served_at: Option<i64>,
    pub cancelled_at: Option<i64>,
}

impl Token {
    pub fn new(
        id: impl Into<String>,
        display_token: impl Into<String>,
        queue_id: impl Into<String>,
        seq: i64,
        issuer: IssuerRef,
        priority: Priority,
        issued_at: i64,
    ) -> Self {
        let (user_id, visitor_name, visitor_contact) = match issuer {
            IssuerRef::Customer { user_id } => (Some(user_id), None, None),
            IssuerRef::WalkIn { name, contact } => (None, Some(name), contact),
        };

        Self {
            id: id.into(),
            display_token: display_token.into(),
            queue_id: queue_id.into(),
            seq,
            user_id,
            visitor_name,
            visitor_contact,
            status: TokenStatus::Pending,
            priority,
            position: None,
            issued_at,
            called_at: None,
            served_at: None,
            cancelled_at: None,
        }
    }

    fn guard(&self, to: TokenStatus) -> Result<()> {
        if self.status.can_transition_to(to) {
            Ok(())
        } else {
            Err(DomainError::InvalidTransition {
                from: self.status.to_string(),
                to: to.to_string(),
            })
        }
    }

    /// Transition to Called with explicit timestamp
    pub fn call(&mut self, now_millis: i64) -> Result<()> {
        self.guard(TokenStatus::Called)?;
        self.status = TokenStatus::Called;
        self.called_at = Some(now_millis);
        self.position = None;
        Ok(())
    }

    /// Transition to Served with explicit timestamp
    pub fn serve(&mut self, now_millis: i64) -> Result<()> {
        self.guard(TokenStatus::Served)?;
        self.status = TokenStatus::Served;
        self.served_at = Some(now_millis);
        Ok(())
    }

    /// Mark as Missed (staff skip / no-show)
    pub fn miss(&mut self, now_millis: i64) -> Result<()> {
        self.guard(TokenStatus::Missed)?;
        self.status = TokenStatus::Missed;
        self.cancelled_at = Some(now_millis);
        self.position = None;
        Ok(())
    }

    /// Mark as Cancelled (customer cancel or timeout expiry)
    pub fn cancel(&mut self, now_millis: i64) -> Result<()> {
        self.guard(TokenStatus::Cancelled)?;
        self.status = TokenStatus::Cancelled;
        self.cancelled_at = Some(now_millis);
        self.position = None;
        Ok(())
    }

    /// True when this token belongs to the given registered customer
    pub fn is_owned_by(&self, user_id: &str) -> bool {
        self.user_id.as_deref() == Some(user_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicI64, Ordering};

    static TEST_SEQ: AtomicI64 = AtomicI64::new(1);

    /// Deterministic test token: ids tok-1, tok-2, ... issued 1000ms apart
    fn new_test_token(queue_id: &str, priority: Priority) -> Token {
        let seq = TEST_SEQ.fetch_add(1, Ordering::SeqCst);
        Token::new(
            format!("tok-{}", seq),
            format!("A-{:03}", seq),
            queue_id,
            seq,
            IssuerRef::Customer {
                user_id: format!("user-{}", seq),
            },
            priority,
            seq * 1000,
        )
    }

    #[test]
    fn test_new_token_starts_pending() {
        let token = new_test_token("q1", Priority::Normal);
        assert_eq!(token.status, TokenStatus::Pending);
        assert!(token.called_at.is_none());
        assert!(token.served_at.is_none());
        assert!(token.cancelled_at.is_none());
    }

    #[test]
    fn test_full_happy_path() {
        let mut token = new_test_token("q1", Priority::Normal);
        token.call(5000).unwrap();
        assert_eq!(token.status, TokenStatus::Called);
        assert_eq!(token.called_at, Some(5000));

        token.serve(6000).unwrap();
        assert_eq!(token.status, TokenStatus::Served);
        assert_eq!(token.served_at, Some(6000));
        assert!(token.cancelled_at.is_none());
    }

    #[test]
    fn test_serve_requires_called() {
        let mut token = new_test_token("q1", Priority::Normal);
        let err = token.serve(5000).unwrap_err();
        assert!(matches!(err, DomainError::InvalidTransition { .. }));
        // Failed transition leaves status and timestamps untouched
        assert_eq!(token.status, TokenStatus::Pending);
        assert!(token.served_at.is_none());
    }

    #[test]
    fn test_terminal_states_are_final() {
        let mut token = new_test_token("q1", Priority::Normal);
        token.cancel(5000).unwrap();

        assert!(token.call(6000).is_err());
        assert!(token.serve(6000).is_err());
        assert!(token.miss(6000).is_err());
        assert_eq!(token.status, TokenStatus::Cancelled);
        assert_eq!(token.cancelled_at, Some(5000));
    }

    #[test]
    fn test_skip_from_pending_and_called() {
        let mut pending = new_test_token("q1", Priority::Normal);
        pending.miss(5000).unwrap();
        assert_eq!(pending.status, TokenStatus::Missed);
        assert!(pending.called_at.is_none());

        let mut called = new_test_token("q1", Priority::Normal);
        called.call(5000).unwrap();
        called.miss(7000).unwrap();
        assert_eq!(called.status, TokenStatus::Missed);
        assert_eq!(called.cancelled_at, Some(7000));
    }

    #[test]
    fn test_transition_table_exhaustive() {
        use TokenStatus::*;
        let legal = [
            (Pending, Called),
            (Pending, Cancelled),
            (Pending, Missed),
            (Called, Served),
            (Called, Cancelled),
            (Called, Missed),
        ];
        let all = [Pending, Called, Served, Cancelled, Missed];
        for from in all {
            for to in all {
                let expected = legal.contains(&(from, to));
                assert_eq!(
                    from.can_transition_to(to),
                    expected,
                    "transition {} -> {}",
                    from,
                    to
                );
            }
        }
    }

    #[test]
    fn test_priority_rank_order() {
        assert!(Priority::Emergency.rank() > Priority::Priority.rank());
        assert!(Priority::Priority.rank() > Priority::Normal.rank());
    }

    #[test]
    fn test_walk_in_has_no_user() {
        let token = Token::new(
            "tok-w",
            "A-001",
            "q1",
            1,
            IssuerRef::WalkIn {
                name: "Counter guest".to_string(),
                contact: None,
            },
            Priority::Normal,
            1000,
        );
        assert!(token.user_id.is_none());
        assert_eq!(token.visitor_name.as_deref(), Some("Counter guest"));
        assert!(!token.is_owned_by("user-1"));
    }
}
