//! Position Calculator - pure ranking of a queue's pending set.
//!
//! A token's rank is a deterministic function of the pending tokens:
//! highest priority tier first, FIFO within a tier (issued_at, then the
//! queue-scoped seq as tie-break for equal millisecond timestamps).
//! Every mutation that changes pending membership funnels through
//! `QueueService::recompute_positions`, which persists the output of this
//! module - the single enforcement point for the no-gaps/no-duplicates
//! invariant.

use crate::domain::{Token, TokenId, TokenStatus};

/// One recomputed rank
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PositionUpdate {
    pub token_id: TokenId,
    pub position: i64,
    pub estimated_wait_minutes: i64,
}

/// Sort pending tokens into call order. Non-pending tokens are filtered
/// out so callers can pass a raw queue snapshot.
pub fn order_pending(mut tokens: Vec<Token>) -> Vec<Token> {
    tokens.retain(|t| t.status == TokenStatus::Pending);
    tokens.sort_by(|a, b| {
        b.priority
            .rank()
            .cmp(&a.priority.rank())
            .then(a.issued_at.cmp(&b.issued_at))
            .then(a.seq.cmp(&b.seq))
    });
    tokens
}

/// Assign 1-based positions in call order and derive the wait estimate
/// `(position - 1) * average_minutes`.
pub fn assign_positions(ordered: &[Token], average_minutes: i64) -> Vec<PositionUpdate> {
    ordered
        .iter()
        .enumerate()
        .map(|(idx, token)| {
            let position = idx as i64 + 1;
            PositionUpdate {
                token_id: token.id.clone(),
                position,
                estimated_wait_minutes: (position - 1) * average_minutes,
            }
        })
        .collect()
}

/// Updates whose rank differs from the token's stored position. Tokens
/// with an up-to-date rank are skipped to keep store writes minimal.
pub fn changed_positions(ordered: &[Token], updates: &[PositionUpdate]) -> Vec<(TokenId, i64)> {
    ordered
        .iter()
        .zip(updates.iter())
        .filter(|(token, update)| token.position != Some(update.position))
        .map(|(_, update)| (update.token_id.clone(), update.position))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{IssuerRef, Priority, Token};

    fn token(id: &str, priority: Priority, issued_at: i64, seq: i64) -> Token {
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

    #[test]
    fn test_fifo_within_tier() {
        let tokens = vec![
            token("t2", Priority::Normal, 2000, 2),
            token("t1", Priority::Normal, 1000, 1),
            token("t3", Priority::Normal, 3000, 3),
        ];
        let ordered = order_pending(tokens);
        let ids: Vec<&str> = ordered.iter().map(|t| t.id.as_str()).collect();
        assert_eq!(ids, vec!["t1", "t2", "t3"]);
    }

    #[test]
    fn test_priority_tier_beats_arrival_order() {
        let tokens = vec![
            token("normal", Priority::Normal, 1000, 1),
            token("emergency", Priority::Emergency, 3000, 3),
            token("priority", Priority::Priority, 2000, 2),
        ];
        let ordered = order_pending(tokens);
        let ids: Vec<&str> = ordered.iter().map(|t| t.id.as_str()).collect();
        assert_eq!(ids, vec!["emergency", "priority", "normal"]);
    }

    #[test]
    fn test_seq_breaks_equal_millisecond() {
        let tokens = vec![
            token("b", Priority::Normal, 1000, 2),
            token("a", Priority::Normal, 1000, 1),
        ];
        let ordered = order_pending(tokens);
        assert_eq!(ordered[0].id, "a");
        assert_eq!(ordered[1].id, "b");
    }

    #[test]
    fn test_non_pending_filtered_out() {
        let mut called = token("called", Priority::Emergency, 500, 1);
        called.call(900).unwrap();
        let tokens = vec![called, token("pending", Priority::Normal, 1000, 2)];
        let ordered = order_pending(tokens);
        assert_eq!(ordered.len(), 1);
        assert_eq!(ordered[0].id, "pending");
    }

    #[test]
    fn test_positions_are_gapless_permutation() {
        let tokens: Vec<Token> = (1..=20)
            .map(|i| {
                let priority = match i % 3 {
                    0 => Priority::Emergency,
                    1 => Priority::Priority,
                    _ => Priority::Normal,
                };
                token(&format!("t{}", i), priority, 1000 * i, i)
            })
            .collect();

        let ordered = order_pending(tokens);
        let updates = assign_positions(&ordered, 5);

        let mut positions: Vec<i64> = updates.iter().map(|u| u.position).collect();
        positions.sort_unstable();
        let expected: Vec<i64> = (1..=20).collect();
        assert_eq!(positions, expected);
    }

    #[test]
    fn test_wait_estimate_from_rank() {
        let tokens = vec![
            token("t1", Priority::Normal, 1000, 1),
            token("t2", Priority::Normal, 2000, 2),
            token("t3", Priority::Normal, 3000, 3),
        ];
        let ordered = order_pending(tokens);
        let updates = assign_positions(&ordered, 5);
        let waits: Vec<i64> = updates.iter().map(|u| u.estimated_wait_minutes).collect();
        assert_eq!(waits, vec![0, 5, 10]);
    }

    #[test]
    fn test_changed_positions_skips_up_to_date_ranks() {
        let mut t1 = token("t1", Priority::Normal, 1000, 1);
        t1.position = Some(1); // already correct
        let mut t2 = token("t2", Priority::Normal, 2000, 2);
        t2.position = Some(3); // stale

        let ordered = order_pending(vec![t1, t2]);
        let updates = assign_positions(&ordered, 5);
        let changed = changed_positions(&ordered, &updates);

        assert_eq!(changed, vec![("t2".to_string(), 2)]);
    }
}
