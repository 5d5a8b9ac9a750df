// src/governor/rate.rs

use std::collections::VecDeque;
use std::time::Duration;

use crate::types::Timestamp;

/// Hard rate limit: at most `limit` dispatches in any trailing `window`.
///
/// Unlike a bucket it never accumulates credit, so it bounds bursts even when
/// tokens are plentiful.
#[derive(Debug, Clone)]
pub struct HardRateLimit {
    limit: u32,
    window: Duration,
    recent: VecDeque<Timestamp>,
}

impl HardRateLimit {
    pub fn new(limit: u32, window: Duration) -> Self {
        Self {
            limit,
            window,
            recent: VecDeque::new(),
        }
    }

    /// Dispatches still inside the window at `now`.
    pub fn count(&mut self, now: Timestamp) -> usize {
        while let Some(at) = self.recent.front() {
            if now.duration_since(*at) >= self.window {
                self.recent.pop_front();
            } else {
                break;
            }
        }
        self.recent.len()
    }

    pub fn allows(&mut self, now: Timestamp) -> bool {
        self.count(now) < self.limit as usize
    }

    pub fn record(&mut self, now: Timestamp) {
        self.recent.push_back(now);
    }

    pub fn limit(&self) -> u32 {
        self.limit
    }
}
