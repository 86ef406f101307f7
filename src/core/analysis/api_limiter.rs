//! Per-endpoint sliding-window rate limiter for external APIs.

use std::collections::VecDeque;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::time::{sleep_until, Instant};

/// Sliding-window limiter: at most `max_requests` starts per window.
///
/// `acquire` waits for the earliest free slot; it never fails. Request
/// start times count against the window, not completion times.
pub struct ApiRateLimiter {
    max_requests: usize,
    window: Duration,
    starts: Mutex<VecDeque<Instant>>,
}

impl ApiRateLimiter {
    pub fn new(max_requests: usize, window: Duration) -> Self {
        Self {
            max_requests: max_requests.max(1),
            window,
            starts: Mutex::new(VecDeque::new()),
        }
    }

    /// Limiter at `requests_per_second` over a one-second window.
    pub fn per_second(requests_per_second: usize) -> Self {
        Self::new(requests_per_second, Duration::from_secs(1))
    }

    /// Block until a request may start, then record the start.
    pub async fn acquire(&self) {
        loop {
            let wait_until = {
                let mut starts = self.starts.lock();
                let now = Instant::now();
                while starts
                    .front()
                    .is_some_and(|t| now.duration_since(*t) >= self.window)
                {
                    starts.pop_front();
                }
                if starts.len() < self.max_requests {
                    starts.push_back(now);
                    return;
                }
                *starts.front().expect("window is full") + self.window
            };
            sleep_until(wait_until).await;
        }
    }

    /// Requests started inside the current window.
    pub fn in_window(&self) -> usize {
        let mut starts = self.starts.lock();
        let now = Instant::now();
        while starts
            .front()
            .is_some_and(|t| now.duration_since(*t) >= self.window)
        {
            starts.pop_front();
        }
        starts.len()
    }
}
