//! Per-identifier sliding-window admission control.
//!
//! Each identifier keeps the timestamps of its admitted requests. A check
//! first drops timestamps that have aged out of the window, then admits the
//! request if fewer than `max_requests` remain. Histories are pruned only when
//! their identifier is checked again; nothing removes idle identifiers.

use std::collections::{HashMap, VecDeque};
use std::time::Duration;

use parking_lot::Mutex;
use tokio::time::Instant;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimitDecision {
    pub allowed: bool,
    /// Admissions still available in the current window after this check.
    pub remaining: usize,
    /// When denied, how long until the oldest recorded request leaves the window.
    pub retry_after: Option<Duration>,
}

#[derive(Debug, Default)]
pub struct SlidingWindowLimiter {
    history: Mutex<HashMap<String, VecDeque<Instant>>>,
}

impl SlidingWindowLimiter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn check_limit(
        &self,
        identifier: &str,
        max_requests: usize,
        window: Duration,
    ) -> RateLimitDecision {
        let now = Instant::now();
        let mut history = self.history.lock();
        let timestamps = history.entry(identifier.to_string()).or_default();

        while let Some(oldest) = timestamps.front() {
            if now.duration_since(*oldest) >= window {
                timestamps.pop_front();
            } else {
                break;
            }
        }

        if timestamps.len() < max_requests {
            timestamps.push_back(now);
            return RateLimitDecision {
                allowed: true,
                remaining: max_requests - timestamps.len(),
                retry_after: None,
            };
        }

        let retry_after = timestamps
            .front()
            .map(|oldest| window.saturating_sub(now.duration_since(*oldest)));
        RateLimitDecision {
            allowed: false,
            remaining: 0,
            retry_after,
        }
    }

    /// Number of identifiers with a recorded history.
    pub fn tracked_identifiers(&self) -> usize {
        self.history.lock().len()
    }
}
