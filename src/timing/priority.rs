// src/timing/priority.rs

//! Effective priority.
//!
//! `effective = max(floor, priority + aging_rate * age + group_adjustment + urgency)`
//! where `age` is the time spent in the ready queue.

use std::time::Duration;

use crate::config::SchedulerSection;
use crate::store::Task;
use crate::types::Timestamp;

/// Deadline urgency: `weight * (1 - slack / horizon)`, clamped to
/// `[0, weight]`.
///
/// Zero without a deadline or when the deadline is at least `horizon` away,
/// rising linearly to `weight` as the deadline arrives.
pub fn urgency(deadline: Option<Timestamp>, now: Timestamp, weight: f64, horizon: Duration) -> f64 {
    let Some(deadline) = deadline else {
        return 0.0;
    };
    let horizon_secs = horizon.as_secs_f64();
    let slack = deadline.secs_since(now);
    if horizon_secs <= 0.0 {
        return if slack <= 0.0 { weight } else { 0.0 };
    }
    weight * (1.0 - slack / horizon_secs).clamp(0.0, 1.0)
}

pub fn effective_priority(
    task: &Task,
    now: Timestamp,
    group_adjustment: f64,
    params: &SchedulerSection,
) -> f64 {
    let raw = task.priority
        + task.aging_rate * task.age_secs(now)
        + group_adjustment
        + urgency(
            task.deadline,
            now,
            params.urgency_weight,
            params.urgency_horizon(),
        );
    raw.max(params.min_effective_priority)
}
