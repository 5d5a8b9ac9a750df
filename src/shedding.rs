// src/shedding.rs

//! Load shedder: admission-rate cap and its feedback from shed events.
//!
//! The queue-size check and eviction itself happen in the engine, which owns
//! the queue. This module counts admissions against the cap, remembers shed
//! events, and moves the cap down under sustained shedding and back up once
//! shedding stops.

use std::collections::VecDeque;

use tracing::{debug, info, warn};

use crate::config::SheddingSection;
use crate::types::Timestamp;

#[derive(Debug, Clone)]
pub struct LoadShedder {
    params: SheddingSection,
    threshold: f64,
    cap: f64,
    admissions: VecDeque<(Timestamp, usize)>,
    admitted_in_window: usize,
    sheds: VecDeque<Timestamp>,
}

impl LoadShedder {
    pub fn new(params: SheddingSection) -> Self {
        Self {
            threshold: params.threshold,
            cap: params.admission_cap,
            params,
            admissions: VecDeque::new(),
            admitted_in_window: 0,
            sheds: VecDeque::new(),
        }
    }

    /// Tasks below this priority are refused when the queue is full.
    pub fn threshold(&self) -> f64 {
        self.threshold
    }

    /// Non-finite values are ignored; negative ones clamp to zero.
    pub fn set_threshold(&mut self, threshold: f64) {
        if threshold.is_finite() {
            self.threshold = threshold.max(0.0);
        } else {
            warn!(threshold, "ignoring non-finite shed threshold");
        }
    }

    /// Current admission-rate cap, in submissions per second.
    pub fn admission_cap(&self) -> f64 {
        self.cap
    }

    pub fn set_admission_cap(&mut self, cap: f64) {
        self.cap = cap.max(0.0);
    }

    /// Whether `count` more submissions fit under the cap at `now`.
    pub fn admits(&mut self, now: Timestamp, count: usize) -> bool {
        self.expire_admissions(now);
        let allowed = (self.cap * self.params.admission_window().as_secs_f64()).floor();
        (self.admitted_in_window + count) as f64 <= allowed
    }

    pub fn record_admission(&mut self, now: Timestamp, count: usize) {
        self.admissions.push_back((now, count));
        self.admitted_in_window += count;
    }

    pub fn record_shed(&mut self, now: Timestamp, count: usize) {
        for _ in 0..count {
            self.sheds.push_back(now);
        }
    }

    /// Shed events inside the trailing window.
    pub fn recent_sheds(&mut self, now: Timestamp) -> usize {
        let window = self.params.window();
        while let Some(at) = self.sheds.front() {
            if now.duration_since(*at) >= window {
                self.sheds.pop_front();
            } else {
                break;
            }
        }
        self.sheds.len()
    }

    /// Per-tick cap update. Returns the new cap when it changed.
    pub fn update(&mut self, now: Timestamp) -> Option<f64> {
        let sheds = self.recent_sheds(now);
        let before = self.cap;

        if sheds > self.params.max_shed_events {
            self.cap = (self.cap * self.params.reduction_factor).max(self.params.min_admission_cap);
            if self.cap < before {
                info!(
                    sheds,
                    admission_cap = self.cap,
                    "sustained load shedding; admission cap reduced"
                );
            }
        } else if sheds == 0 {
            let ceiling = self.params.effective_max_admission_cap();
            if self.cap < ceiling {
                self.cap = (self.cap + self.params.recovery_step).min(ceiling);
                debug!(admission_cap = self.cap, "admission cap recovering");
            }
        }

        (self.cap != before).then_some(self.cap)
    }

    fn expire_admissions(&mut self, now: Timestamp) {
        let window = self.params.admission_window();
        while let Some((at, count)) = self.admissions.front() {
            if now.duration_since(*at) >= window {
                self.admitted_in_window -= *count;
                self.admissions.pop_front();
            } else {
                break;
            }
        }
    }
}
