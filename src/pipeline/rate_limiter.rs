use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use tracing::debug;

/// Fixed-window limiter for outbound catalog requests.
///
/// Counts acquisitions since the window opened; once the cap is reached,
/// `acquire()` sleeps out the remainder of the window and starts a fresh
/// one. Coarser than a sliding window: a full window's budget is never
/// spent twice across a window boundary.
#[derive(Debug)]
pub struct RateLimiter {
    max_requests: u32,
    interval: Duration,
    window: Mutex<RateWindow>,
}

#[derive(Debug)]
struct RateWindow {
    count: u32,
    started: Instant,
}

impl RateLimiter {
    pub fn new(max_requests: u32, interval: Duration) -> Self {
        Self {
            max_requests: max_requests.max(1),
            interval,
            window: Mutex::new(RateWindow {
                count: 0,
                started: Instant::now(),
            }),
        }
    }

    /// Block until a request slot is available. Never fails.
    pub async fn acquire(&self) {
        let mut window = self.window.lock().await;
        let now = Instant::now();
        let elapsed = now.duration_since(window.started);

        if elapsed >= self.interval {
            window.count = 0;
            window.started = now;
        } else if window.count >= self.max_requests {
            let wait = self.interval - elapsed;
            debug!("Rate limit reached, sleeping {:?}", wait);
            tokio::time::sleep(wait).await;
            window.count = 0;
            window.started = Instant::now();
        }

        window.count += 1;
    }
}
