use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::Duration;

use tokio::time::{sleep, Instant};
use tracing::debug;

const WINDOW: Duration = Duration::from_secs(60);

/// Sliding-window admission gate for outbound provider calls.
///
/// Holds the timestamps of calls accepted within the trailing window. A caller
/// that would push the count past the cap sleeps until the oldest entry ages
/// out, then re-checks. The check-and-append under the mutex is atomic, so two
/// concurrent callers can never both take the last slot; the lock is never
/// held across a sleep.
pub struct RateLimiter {
    max_requests: usize,
    accepted: Mutex<VecDeque<Instant>>,
}

impl RateLimiter {
    pub fn new(max_requests: usize) -> Self {
        RateLimiter {
            // A cap of zero would never admit anyone.
            max_requests: max_requests.max(1),
            accepted: Mutex::new(VecDeque::new()),
        }
    }

    /// Blocks until a slot is free, records the acceptance, and returns how
    /// long the caller waited (zero when a slot was immediately available).
    pub async fn acquire(&self) -> Duration {
        let mut waited = Duration::ZERO;
        loop {
            let wait = {
                let mut accepted = self.accepted.lock().unwrap();
                let now = Instant::now();
                while accepted
                    .front()
                    .is_some_and(|t| now.duration_since(*t) >= WINDOW)
                {
                    accepted.pop_front();
                }
                if accepted.len() < self.max_requests {
                    accepted.push_back(now);
                    return waited;
                }
                // Queue is full; the front entry is the next to age out.
                let oldest = *accepted.front().unwrap();
                WINDOW - now.duration_since(oldest)
            };

            debug!(wait_secs = wait.as_secs_f64(), "rate limit reached, waiting");
            sleep(wait).await;
            waited += wait;
        }
    }

    /// Free slots in the current window. Informational only; the answer can be
    /// stale by the time the caller acts on it.
    pub fn remaining(&self) -> usize {
        let mut accepted = self.accepted.lock().unwrap();
        let now = Instant::now();
        while accepted
            .front()
            .is_some_and(|t| now.duration_since(*t) >= WINDOW)
        {
            accepted.pop_front();
        }
        self.max_requests.saturating_sub(accepted.len())
    }
}
