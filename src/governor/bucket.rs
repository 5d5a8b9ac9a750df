// src/governor/bucket.rs

use std::time::Duration;

/// Token bucket: level in `[0, capacity]`, refilled continuously at
/// `refill_rate` tokens per second.
#[derive(Debug, Clone, PartialEq)]
pub struct TokenBucket {
    capacity: f64,
    tokens: f64,
    refill_rate: f64,
    consumed: u64,
}

impl TokenBucket {
    /// `initial` defaults to a full bucket and is clamped to capacity.
    pub fn new(capacity: f64, refill_rate: f64, initial: Option<f64>) -> Self {
        let tokens = initial.unwrap_or(capacity).clamp(0.0, capacity);
        Self {
            capacity,
            tokens,
            refill_rate,
            consumed: 0,
        }
    }

    pub fn refill(&mut self, elapsed: Duration) {
        self.tokens = (self.tokens + self.refill_rate * elapsed.as_secs_f64()).min(self.capacity);
    }

    pub fn has(&self, cost: u32) -> bool {
        self.tokens >= f64::from(cost)
    }

    /// Take `cost` tokens if available.
    pub fn try_consume(&mut self, cost: u32) -> bool {
        if !self.has(cost) {
            return false;
        }
        self.tokens -= f64::from(cost);
        self.consumed += u64::from(cost);
        true
    }

    pub fn level(&self) -> f64 {
        self.tokens
    }

    pub fn capacity(&self) -> f64 {
        self.capacity
    }

    pub fn refill_rate(&self) -> f64 {
        self.refill_rate
    }

    pub fn set_refill_rate(&mut self, rate: f64) {
        self.refill_rate = rate.max(0.0);
    }

    /// Overwrite the level (state restore); clamped to `[0, capacity]`.
    pub fn set_level(&mut self, tokens: f64) {
        self.tokens = tokens.clamp(0.0, self.capacity);
    }

    /// Total tokens taken since creation.
    pub fn consumed(&self) -> u64 {
        self.consumed
    }
}
