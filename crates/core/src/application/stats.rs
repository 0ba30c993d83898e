//! Queue Stats Aggregator - per-queue summaries for dashboards.
//!
//! The wait estimate here is a throughput proxy (`pending * average_minutes`),
//! not a historical measurement; `QueuePerformance` is the measured view.

use serde::Serialize;

use crate::domain::{Queue, Token, TokenStatus};

/// Counts by status plus the throughput-proxy wait estimate.
/// `total` always equals the sum of the per-status counts.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct QueueStats {
    pub pending: i64,
    pub called: i64,
    pub served: i64,
    pub cancelled: i64,
    pub missed: i64,
    pub total: i64,
    pub estimated_wait_minutes: i64,
}

/// Measured service quality over a time window
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct QueuePerformance {
    pub served: i64,
    pub missed: i64,
    /// Mean of (served_at - issued_at) in minutes over served tokens
    pub average_wait_minutes: f64,
    /// missed / (served + missed); 0.0 when nothing was resolved
    pub miss_rate: f64,
}

/// One row of the queue timeline (most recent tokens first)
#[derive(Debug, Clone, Serialize)]
pub struct TimelineEntry {
    pub token_id: String,
    pub display_token: String,
    pub status: TokenStatus,
    pub priority: crate::domain::Priority,
    pub issued_at: i64,
    pub called_at: Option<i64>,
    pub served_at: Option<i64>,
    pub cancelled_at: Option<i64>,
}

/// Group a queue's tokens by status in one pass
pub fn compute_queue_stats(queue: &Queue, tokens: &[Token]) -> QueueStats {
    let mut stats = QueueStats::default();
    for token in tokens {
        match token.status {
            TokenStatus::Pending => stats.pending += 1,
            TokenStatus::Called => stats.called += 1,
            TokenStatus::Served => stats.served += 1,
            TokenStatus::Cancelled => stats.cancelled += 1,
            TokenStatus::Missed => stats.missed += 1,
        }
    }
    stats.total = stats.pending + stats.called + stats.served + stats.cancelled + stats.missed;
    stats.estimated_wait_minutes = stats.pending * queue.average_minutes;
    stats
}

/// Measured wait and miss rate over tokens issued in a window.
/// `served` must hold the window's SERVED tokens, `issued` every token
/// issued in the same window.
pub fn compute_queue_performance(served: &[Token], issued: &[Token]) -> QueuePerformance {
    let mut perf = QueuePerformance::default();

    let mut wait_total_ms: i64 = 0;
    for token in served {
        if let Some(served_at) = token.served_at {
            perf.served += 1;
            wait_total_ms += served_at - token.issued_at;
        }
    }
    if perf.served > 0 {
        perf.average_wait_minutes = wait_total_ms as f64 / perf.served as f64 / 60_000.0;
    }

    perf.missed = issued
        .iter()
        .filter(|t| t.status == TokenStatus::Missed)
        .count() as i64;

    let resolved = perf.served + perf.missed;
    if resolved > 0 {
        perf.miss_rate = perf.missed as f64 / resolved as f64;
    }

    perf
}

/// Flatten recent tokens into timeline rows
pub fn timeline_entries(tokens: Vec<Token>) -> Vec<TimelineEntry> {
    tokens
        .into_iter()
        .map(|t| TimelineEntry {
            token_id: t.id,
            display_token: t.display_token,
            status: t.status,
            priority: t.priority,
            issued_at: t.issued_at,
            called_at: t.called_at,
            served_at: t.served_at,
            cancelled_at: t.cancelled_at,
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{IssuerRef, Priority, Queue, Token};

    fn queue() -> Queue {
        Queue::new("q1", "org1", "Billing", 5, 0)
    }

    fn token(id: &str, seq: i64, issued_at: i64) -> Token {
        Token::new(
            id,
            format!("A-{:03}", seq),
            "q1",
            seq,
            IssuerRef::Customer {
                user_id: "u1".to_string(),
            },
            Priority::Normal,
            issued_at,
        )
    }

    #[test]
    fn test_total_equals_sum_of_counts() {
        let mut tokens = vec![token("t1", 1, 1000), token("t2", 2, 2000), token("t3", 3, 3000)];
        tokens[1].call(4000).unwrap();
        tokens[2].cancel(5000).unwrap();

        let stats = compute_queue_stats(&queue(), &tokens);
        assert_eq!(stats.total, 3);
        assert_eq!(
            stats.total,
            stats.pending + stats.called + stats.served + stats.cancelled + stats.missed
        );
        assert_eq!(stats.pending, 1);
        assert_eq!(stats.called, 1);
        assert_eq!(stats.cancelled, 1);
    }

    #[test]
    fn test_wait_estimate_is_throughput_proxy() {
        let tokens = vec![token("t1", 1, 1000), token("t2", 2, 2000)];
        let stats = compute_queue_stats(&queue(), &tokens);
        assert_eq!(stats.estimated_wait_minutes, 10); // 2 pending * 5 min
    }

    #[test]
    fn test_empty_queue_stats() {
        let stats = compute_queue_stats(&queue(), &[]);
        assert_eq!(stats, QueueStats::default());
    }

    #[test]
    fn test_performance_average_wait() {
        let mut t1 = token("t1", 1, 0);
        t1.call(60_000).unwrap();
        t1.serve(300_000).unwrap(); // 5 minutes after issue

        let mut t2 = token("t2", 2, 0);
        t2.call(60_000).unwrap();
        t2.serve(900_000).unwrap(); // 15 minutes after issue

        let issued = vec![t1.clone(), t2.clone()];
        let perf = compute_queue_performance(&[t1, t2], &issued);
        assert_eq!(perf.served, 2);
        assert!((perf.average_wait_minutes - 10.0).abs() < 1e-9);
        assert_eq!(perf.miss_rate, 0.0);
    }

    #[test]
    fn test_miss_rate_guards_zero_denominator() {
        let pending = vec![token("t1", 1, 0)];
        let perf = compute_queue_performance(&[], &pending);
        assert_eq!(perf.miss_rate, 0.0);
        assert_eq!(perf.average_wait_minutes, 0.0);
    }

    #[test]
    fn test_miss_rate() {
        let mut served = token("t1", 1, 0);
        served.call(1000).unwrap();
        served.serve(2000).unwrap();

        let mut missed_a = token("t2", 2, 0);
        missed_a.miss(3000).unwrap();
        let mut missed_b = token("t3", 3, 0);
        missed_b.miss(3000).unwrap();

        let issued = vec![served.clone(), missed_a, missed_b];
        let perf = compute_queue_performance(&[served], &issued);
        assert_eq!(perf.served, 1);
        assert_eq!(perf.missed, 2);
        assert!((perf.miss_rate - 2.0 / 3.0).abs() < 1e-9);
    }
}
