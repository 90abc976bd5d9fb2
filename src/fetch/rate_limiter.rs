//! Sliding-window call quota.
//!
//! At most `max_calls` acquisitions complete in any trailing `period`.
//! Callers over quota wait rather than being rejected. The wait is an
//! ordinary `tokio` sleep, so dropping the `acquire()` future abandons it
//! without consuming a slot; a slot that was recorded is never refunded.

use std::collections::VecDeque;
use std::time::Duration;

use tokio::sync::Mutex;
use tokio::time::{sleep, Instant};
use tracing::info;

/// Slack added to each wait so the oldest call has definitely left the window.
const WAIT_BUFFER: Duration = Duration::from_millis(100);

/// Per provider+capability call limiter.
#[derive(Debug)]
pub struct RateLimiter {
    label: String,
    max_calls: usize,
    period: Duration,
    calls: Mutex<VecDeque<Instant>>,
}

impl RateLimiter {
    /// `max_calls` is clamped to at least one.
    pub fn new(label: impl Into<String>, max_calls: usize, period: Duration) -> Self {
        let max_calls = max_calls.max(1);
        Self {
            label: label.into(),
            max_calls,
            period,
            calls: Mutex::new(VecDeque::with_capacity(max_calls)),
        }
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn max_calls(&self) -> usize {
        self.max_calls
    }

    pub fn period(&self) -> Duration {
        self.period
    }

    /// Wait until a call is allowed, then record it.
    pub async fn acquire(&self) {
        loop {
            let wait = {
                let mut calls = self.calls.lock().await;
                let now = Instant::now();
                evict_expired(&mut calls, now, self.period);

                if calls.len() < self.max_calls {
                    calls.push_back(now);
                    return;
                }
                let oldest = calls.front().copied().unwrap_or(now);
                self.period.saturating_sub(now - oldest) + WAIT_BUFFER
            };

            info!(
                limiter = %self.label,
                wait_secs = wait.as_secs_f64(),
                "Rate limit reached, waiting"
            );
            sleep(wait).await;
        }
    }

    /// Calls recorded within the trailing window.
    pub async fn in_window(&self) -> usize {
        let mut calls = self.calls.lock().await;
        evict_expired(&mut calls, Instant::now(), self.period);
        calls.len()
    }
}

fn evict_expired(calls: &mut VecDeque<Instant>, now: Instant, period: Duration) {
    while let Some(&oldest) = calls.front() {
        if now - oldest >= period {
            calls.pop_front();
        } else {
            break;
        }
    }
}
