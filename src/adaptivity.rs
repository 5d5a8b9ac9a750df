// src/adaptivity.rs

//! Adaptivity loop: moves the global refill rate from observed metrics.
//!
//! The control law is pluggable through [`FeedbackLaw`]. Whatever the law
//! returns, the loop clamps the resulting rate to `[min_rate, max_rate]`.

use std::collections::VecDeque;
use std::fmt;
use std::time::Duration;

use tracing::debug;

use crate::config::AdaptivitySection;
use crate::types::Timestamp;

/// Metrics over the trailing window, handed to the feedback law.
#[derive(Debug, Clone, PartialEq)]
pub struct WindowMetrics {
    /// Finished tasks per second.
    pub throughput: f64,
    /// Mean time from submission to completion of successful tasks.
    pub mean_latency: Duration,
    /// Failed / finished, 0 with nothing finished.
    pub failure_rate: f64,
    /// Opaque external load signal.
    pub load_signal: f64,
    pub current_rate: f64,
    pub min_rate: f64,
    pub max_rate: f64,
}

/// A control law mapping metrics to a refill-rate delta.
///
/// Implementations must give a bounded output and settle without
/// oscillating after a sustained step change in their inputs.
pub trait FeedbackLaw: Send {
    fn rate_delta(&self, metrics: &WindowMetrics) -> f64;
}

/// Default law: moves a fixed fraction of the way to a target rate derived
/// from a health score.
///
/// `health = (1 - failure_rate) * min(1, target_latency / mean_latency) / (1 + load)`
/// and `target = min_rate + (max_rate - min_rate) * health`. With
/// `gain` in `(0, 1]` the rate approaches the target monotonically.
#[derive(Debug, Clone)]
pub struct ProportionalLaw {
    pub gain: f64,
    pub target_latency: Duration,
}

impl ProportionalLaw {
    pub fn from_config(params: &AdaptivitySection) -> Self {
        Self {
            gain: params.gain,
            target_latency: params.target_latency(),
        }
    }

    pub fn target_rate(&self, m: &WindowMetrics) -> f64 {
        let latency_factor = if m.mean_latency.is_zero() || self.target_latency.is_zero() {
            1.0
        } else {
            (self.target_latency.as_secs_f64() / m.mean_latency.as_secs_f64()).min(1.0)
        };
        let health = ((1.0 - m.failure_rate) * latency_factor / (1.0 + m.load_signal.max(0.0)))
            .clamp(0.0, 1.0);
        m.min_rate + (m.max_rate - m.min_rate) * health
    }
}

impl FeedbackLaw for ProportionalLaw {
    fn rate_delta(&self, metrics: &WindowMetrics) -> f64 {
        self.gain * (self.target_rate(metrics) - metrics.current_rate)
    }
}

#[derive(Debug, Clone, Copy)]
struct Outcome {
    at: Timestamp,
    latency: Duration,
    failed: bool,
}

pub struct AdaptivityLoop {
    params: AdaptivitySection,
    law: Box<dyn FeedbackLaw>,
    outcomes: VecDeque<Outcome>,
    load_signal: f64,
}

impl fmt::Debug for AdaptivityLoop {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AdaptivityLoop")
            .field("params", &self.params)
            .field("outcomes", &self.outcomes.len())
            .field("load_signal", &self.load_signal)
            .finish_non_exhaustive()
    }
}

impl AdaptivityLoop {
    pub fn new(params: AdaptivitySection) -> Self {
        let law = Box::new(ProportionalLaw::from_config(&params));
        Self::with_law(params, law)
    }

    pub fn with_law(params: AdaptivitySection, law: Box<dyn FeedbackLaw>) -> Self {
        Self {
            params,
            law,
            outcomes: VecDeque::new(),
            load_signal: 0.0,
        }
    }

    pub fn set_law(&mut self, law: Box<dyn FeedbackLaw>) {
        self.law = law;
    }

    pub fn load_signal(&self) -> f64 {
        self.load_signal
    }

    pub fn set_load_signal(&mut self, signal: f64) {
        self.load_signal = if signal.is_finite() { signal } else { 0.0 };
    }

    /// Record a task reaching a terminal state after running.
    pub fn record_outcome(&mut self, now: Timestamp, latency: Duration, failed: bool) {
        self.outcomes.push_back(Outcome {
            at: now,
            latency,
            failed,
        });
    }

    pub fn metrics(&mut self, now: Timestamp, current_rate: f64) -> WindowMetrics {
        let window = self.params.window();
        while let Some(o) = self.outcomes.front() {
            if now.duration_since(o.at) >= window {
                self.outcomes.pop_front();
            } else {
                break;
            }
        }

        let finished = self.outcomes.len();
        let failed = self.outcomes.iter().filter(|o| o.failed).count();
        let succeeded = finished - failed;
        let latency_total: Duration = self
            .outcomes
            .iter()
            .filter(|o| !o.failed)
            .map(|o| o.latency)
            .sum();

        WindowMetrics {
            throughput: finished as f64 / window.as_secs_f64().max(f64::EPSILON),
            mean_latency: if succeeded == 0 {
                Duration::ZERO
            } else {
                Duration::from_secs_f64(latency_total.as_secs_f64() / succeeded as f64)
            },
            failure_rate: if finished == 0 {
                0.0
            } else {
                failed as f64 / finished as f64
            },
            load_signal: self.load_signal,
            current_rate,
            min_rate: self.params.min_rate,
            max_rate: self.params.max_rate,
        }
    }

    /// Compute the next global refill rate, clamped to the configured bounds.
    pub fn next_rate(&mut self, now: Timestamp, current_rate: f64) -> f64 {
        let metrics = self.metrics(now, current_rate);
        let delta = self.law.rate_delta(&metrics);
        let delta = if delta.is_finite() { delta } else { 0.0 };
        let next = (current_rate + delta).clamp(self.params.min_rate, self.params.max_rate);

        debug!(
            throughput = metrics.throughput,
            failure_rate = metrics.failure_rate,
            load = metrics.load_signal,
            rate = next,
            "adaptivity update"
        );
        next
    }
}
