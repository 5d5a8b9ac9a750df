// src/fairness.rs

//! Fairness controller.
//!
//! Each group's share of the tokens consumed in a trailing window is
//! compared with its share of the quota among *active* groups (groups with
//! live tasks or recent consumption):
//!
//! `utilization = (consumed_g / consumed_total) / (quota_g / quota_active_total)`
//!
//! A group running below its share (`utilization < 1 - tolerance`) is nudged
//! up, one running above is nudged down. Inside the tolerance band the
//! adjustment decays back to zero. The controller is the only writer of
//! group priority adjustments.

use std::collections::{BTreeMap, VecDeque};

use tracing::debug;

use crate::config::FairnessSection;
use crate::types::{GroupId, Timestamp};

#[derive(Debug, Clone, Default)]
struct GroupFairness {
    window: VecDeque<(Timestamp, u32)>,
    window_tokens: u64,
    utilization: f64,
    adjustment: f64,
}

impl GroupFairness {
    fn expire(&mut self, now: Timestamp, params: &FairnessSection) {
        while let Some((at, cost)) = self.window.front() {
            if now.duration_since(*at) >= params.window() {
                self.window_tokens -= u64::from(*cost);
                self.window.pop_front();
            } else {
                break;
            }
        }
    }
}

/// Input to [`FairnessController::update`] for one group.
#[derive(Debug, Clone)]
pub struct GroupQuota {
    pub group: GroupId,
    pub quota: f64,
    /// Group has at least one non-terminal task.
    pub live: bool,
}

#[derive(Debug, Clone)]
pub struct FairnessController {
    params: FairnessSection,
    groups: BTreeMap<GroupId, GroupFairness>,
}

impl FairnessController {
    pub fn new(params: FairnessSection) -> Self {
        Self {
            params,
            groups: BTreeMap::new(),
        }
    }

    /// Record `cost` tokens consumed by a dispatch from `group`.
    pub fn record(&mut self, group: &GroupId, cost: u32, now: Timestamp) {
        let state = self.groups.entry(group.clone()).or_default();
        state.window.push_back((now, cost));
        state.window_tokens += u64::from(cost);
    }

    pub fn adjustment(&self, group: &GroupId) -> f64 {
        self.groups.get(group).map_or(0.0, |g| g.adjustment)
    }

    /// Utilization computed by the last update (1.0 before any update).
    pub fn utilization(&self, group: &GroupId) -> f64 {
        self.groups.get(group).map_or(1.0, |g| g.utilization)
    }

    pub fn window_tokens(&self, group: &GroupId) -> u64 {
        self.groups.get(group).map_or(0, |g| g.window_tokens)
    }

    /// Seed an adjustment when restoring exported state.
    pub(crate) fn restore_adjustment(&mut self, group: &GroupId, adjustment: f64) {
        let bound = self.params.max_adjustment;
        self.groups.entry(group.clone()).or_default().adjustment =
            adjustment.clamp(-bound, bound);
    }

    /// Recompute utilizations and move every adjustment toward its target.
    pub fn update(&mut self, now: Timestamp, quotas: &[GroupQuota]) {
        for state in self.groups.values_mut() {
            state.expire(now, &self.params);
        }

        let active: Vec<&GroupQuota> = quotas
            .iter()
            .filter(|q| q.live || self.window_tokens(&q.group) > 0)
            .collect();
        let quota_total: f64 = active.iter().map(|q| q.quota).sum();
        let consumed_total: u64 = active.iter().map(|q| self.window_tokens(&q.group)).sum();

        for q in quotas {
            let state = self.groups.entry(q.group.clone()).or_default();
            let is_active = q.live || state.window_tokens > 0;

            state.utilization = if !is_active || consumed_total == 0 || quota_total <= 0.0 {
                1.0
            } else {
                let share = state.window_tokens as f64 / consumed_total as f64;
                let entitled = q.quota / quota_total;
                share / entitled
            };

            let target = target_adjustment(state.utilization, &self.params);
            let before = state.adjustment;
            state.adjustment += self.params.smoothing * (target - state.adjustment);
            if state.adjustment.abs() < 1e-9 {
                state.adjustment = 0.0;
            }

            if (state.adjustment - before).abs() > f64::EPSILON {
                debug!(
                    group = %q.group,
                    utilization = state.utilization,
                    adjustment = state.adjustment,
                    "fairness adjustment updated"
                );
            }
        }
    }
}

/// Zero inside `1 ± tolerance`, otherwise `gain * (1 - utilization)` clamped
/// to `±max_adjustment`.
fn target_adjustment(utilization: f64, params: &FairnessSection) -> f64 {
    let error = 1.0 - utilization;
    if error.abs() <= params.tolerance {
        0.0
    } else {
        (params.gain * error).clamp(-params.max_adjustment, params.max_adjustment)
    }
}
