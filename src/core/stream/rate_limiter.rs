//! Sliding-window cap on upstream subscription creations.
//!
//! The upstream allows at most `max_subscriptions` subscription creations
//! per window. Every creation (including resubscribes after stream errors)
//! records a ticket; the window is pruned on every call. This component
//! never fails — it only delays.

use std::collections::VecDeque;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::time::{sleep, Instant};
use tracing::debug;

use crate::core::domain::ConnectionId;

/// Default upstream cap: 100 creations per 60 seconds.
pub const MAX_SUBSCRIPTIONS: usize = 100;
pub const TIME_WINDOW: Duration = Duration::from_secs(60);

const POLL_INTERVAL: Duration = Duration::from_millis(500);

#[derive(Debug, Clone, Copy)]
struct Ticket {
    at: Instant,
    #[allow(dead_code)] // kept for operator introspection via `tickets_for`
    connection_id: ConnectionId,
}

/// Sliding-window subscription rate limiter.
pub struct SubscriptionRateLimiter {
    max: usize,
    window: Duration,
    tickets: Mutex<VecDeque<Ticket>>,
}

impl SubscriptionRateLimiter {
    pub fn new(max: usize, window: Duration) -> Self {
        Self {
            max,
            window,
            tickets: Mutex::new(VecDeque::new()),
        }
    }

    /// Limiter with the upstream's published cap.
    pub fn with_defaults() -> Self {
        Self::new(MAX_SUBSCRIPTIONS, TIME_WINDOW)
    }

    fn prune(&self, tickets: &mut VecDeque<Ticket>) {
        let now = Instant::now();
        while tickets
            .front()
            .is_some_and(|t| now.duration_since(t.at) >= self.window)
        {
            tickets.pop_front();
        }
    }

    /// Whether a subscription may be created right now.
    pub fn can_subscribe(&self) -> bool {
        let mut tickets = self.tickets.lock();
        self.prune(&mut tickets);
        tickets.len() < self.max
    }

    /// Wait until a slot is free. Polls at a fixed cadence rather than
    /// busy-looping; this cannot fail, only delay.
    pub async fn wait_for_slot(&self) {
        loop {
            if self.can_subscribe() {
                return;
            }
            debug!(in_window = self.in_window(), max = self.max, "Subscription cap reached, waiting");
            sleep(POLL_INTERVAL).await;
        }
    }

    /// Record a subscription creation at dispatch time.
    ///
    /// Tickets are appended strictly in acquisition order.
    pub fn record(&self, connection_id: ConnectionId) {
        let mut tickets = self.tickets.lock();
        self.prune(&mut tickets);
        tickets.push_back(Ticket {
            at: Instant::now(),
            connection_id,
        });
    }

    /// Number of tickets currently inside the window.
    pub fn in_window(&self) -> usize {
        let mut tickets = self.tickets.lock();
        self.prune(&mut tickets);
        tickets.len()
    }

    /// Tickets attributed to one connection, inside the window.
    pub fn tickets_for(&self, connection_id: ConnectionId) -> usize {
        let mut tickets = self.tickets.lock();
        self.prune(&mut tickets);
        tickets.iter().filter(|t| t.connection_id == connection_id).count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn allows_up_to_cap() {
        let limiter = SubscriptionRateLimiter::new(3, Duration::from_secs(60));
        for _ in 0..3 {
            assert!(limiter.can_subscribe());
            limiter.record(1);
        }
        assert!(!limiter.can_subscribe());
        assert_eq!(limiter.in_window(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn exactly_at_cap_blocks_until_oldest_ages_out() {
        let limiter = SubscriptionRateLimiter::new(100, Duration::from_secs(60));
        for i in 0..100 {
            limiter.record(i % 3);
        }
        assert!(!limiter.can_subscribe());

        // Not yet: window has 30s to go.
        tokio::time::advance(Duration::from_secs(30)).await;
        assert!(!limiter.can_subscribe());

        // Oldest ticket ages out past the 60s boundary.
        tokio::time::advance(Duration::from_secs(31)).await;
        assert!(limiter.can_subscribe());
        assert_eq!(limiter.in_window(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn wait_for_slot_unblocks_after_age_out() {
        let limiter = SubscriptionRateLimiter::new(2, Duration::from_secs(10));
        limiter.record(1);
        limiter.record(1);
        assert!(!limiter.can_subscribe());

        let start = Instant::now();
        limiter.wait_for_slot().await;
        let waited = start.elapsed();

        // The paused clock advances through the poll sleeps; the slot frees
        // once the first ticket leaves the 10s window.
        assert!(waited >= Duration::from_secs(10), "waited {waited:?}");
        assert!(limiter.can_subscribe());
    }

    #[tokio::test]
    async fn tickets_attributed_per_connection() {
        let limiter = SubscriptionRateLimiter::new(10, Duration::from_secs(60));
        limiter.record(1);
        limiter.record(1);
        limiter.record(2);
        assert_eq!(limiter.tickets_for(1), 2);
        assert_eq!(limiter.tickets_for(2), 1);
        assert_eq!(limiter.tickets_for(3), 0);
    }
}
