#![allow(dead_code)]

use std::time::Duration;

use fairsched::config::{GroupOverride, RawSchedulerConfig, SchedulerConfig};
use fairsched::store::{DepRef, TaskSpec};
use fairsched::types::{TaskId, Timestamp};

/// Builder for `SchedulerConfig` to simplify test setup.
///
/// Starts from the same defaults as an empty TOML file.
pub struct ConfigBuilder {
    raw: RawSchedulerConfig,
}

impl ConfigBuilder {
    pub fn new() -> Self {
        Self {
            raw: RawSchedulerConfig::default(),
        }
    }

    /// Buckets, rate limits and admission cap large enough that they never
    /// gate anything, and a fixed global refill rate.
    pub fn unconstrained() -> Self {
        Self::new()
            .global(1_000_000.0, 1_000_000.0)
            .global_hard_limit(1_000_000)
            .group_defaults(1_000_000.0, 1_000_000.0)
            .group_hard_limit(1_000_000)
            .adaptivity_bounds(1_000_000.0, 1_000_000.0)
            .admission_cap(1_000_000.0)
    }

    pub fn max_queue_size(mut self, n: usize) -> Self {
        self.raw.scheduler.max_queue_size = n;
        self
    }

    pub fn min_effective_priority(mut self, floor: f64) -> Self {
        self.raw.scheduler.min_effective_priority = floor;
        self
    }

    pub fn urgency(mut self, weight: f64, horizon_ms: u64) -> Self {
        self.raw.scheduler.urgency_weight = weight;
        self.raw.scheduler.urgency_horizon_ms = horizon_ms;
        self
    }

    pub fn terminal_retention_ms(mut self, ms: u64) -> Self {
        self.raw.scheduler.terminal_retention_ms = ms;
        self
    }

    pub fn rate_window_ms(mut self, ms: u64) -> Self {
        self.raw.scheduler.rate_window_ms = ms;
        self
    }

    pub fn global(mut self, capacity: f64, refill_rate: f64) -> Self {
        self.raw.global.capacity = capacity;
        self.raw.global.refill_rate = refill_rate;
        self
    }

    pub fn global_initial_tokens(mut self, tokens: f64) -> Self {
        self.raw.global.initial_tokens = Some(tokens);
        self
    }

    pub fn global_hard_limit(mut self, limit: u32) -> Self {
        self.raw.global.hard_rate_limit = limit;
        self
    }

    pub fn group_defaults(mut self, capacity: f64, refill_rate: f64) -> Self {
        self.raw.group_defaults.capacity = capacity;
        self.raw.group_defaults.refill_rate = refill_rate;
        self
    }

    pub fn group_initial_tokens(mut self, tokens: f64) -> Self {
        self.raw.group_defaults.initial_tokens = Some(tokens);
        self
    }

    pub fn group_hard_limit(mut self, limit: u32) -> Self {
        self.raw.group_defaults.hard_rate_limit = limit;
        self
    }

    /// Override bucket settings for one group.
    pub fn group(mut self, name: &str, capacity: f64, refill_rate: f64) -> Self {
        let o = self.raw.group.entry(name.to_string()).or_default();
        o.capacity = Some(capacity);
        o.refill_rate = Some(refill_rate);
        self
    }

    pub fn group_override(mut self, name: &str, o: GroupOverride) -> Self {
        self.raw.group.insert(name.to_string(), o);
        self
    }

    pub fn quota(mut self, name: &str, quota: f64) -> Self {
        self.raw.group.entry(name.to_string()).or_default().quota = Some(quota);
        self
    }

    pub fn fairness(mut self, window_ms: u64, tolerance: f64, gain: f64) -> Self {
        self.raw.fairness.window_ms = window_ms;
        self.raw.fairness.tolerance = tolerance;
        self.raw.fairness.gain = gain;
        self
    }

    /// Zero gain: adjustments stay at 0.
    pub fn fairness_disabled(mut self) -> Self {
        self.raw.fairness.gain = 0.0;
        self
    }

    pub fn shed_threshold(mut self, threshold: f64) -> Self {
        self.raw.shedding.threshold = threshold;
        self
    }

    /// Sets the cap and its ceiling; the floor is lowered if needed.
    pub fn admission_cap(mut self, cap: f64) -> Self {
        self.raw.shedding.admission_cap = cap;
        self.raw.shedding.max_admission_cap = Some(cap);
        if self.raw.shedding.min_admission_cap > cap {
            self.raw.shedding.min_admission_cap = cap;
        }
        self
    }

    pub fn shedding_feedback(
        mut self,
        window_ms: u64,
        max_shed_events: usize,
        reduction_factor: f64,
        recovery_step: f64,
        min_cap: f64,
    ) -> Self {
        self.raw.shedding.window_ms = window_ms;
        self.raw.shedding.max_shed_events = max_shed_events;
        self.raw.shedding.reduction_factor = reduction_factor;
        self.raw.shedding.recovery_step = recovery_step;
        self.raw.shedding.min_admission_cap = min_cap;
        self
    }

    pub fn adaptivity_bounds(mut self, min_rate: f64, max_rate: f64) -> Self {
        self.raw.adaptivity.min_rate = min_rate;
        self.raw.adaptivity.max_rate = max_rate;
        self
    }

    pub fn adaptivity_gain(mut self, gain: f64) -> Self {
        self.raw.adaptivity.gain = gain;
        self
    }

    pub fn adaptivity_window_ms(mut self, ms: u64) -> Self {
        self.raw.adaptivity.window_ms = ms;
        self
    }

    /// Arbitrary tweak of the raw config.
    pub fn with(mut self, f: impl FnOnce(&mut RawSchedulerConfig)) -> Self {
        f(&mut self.raw);
        self
    }

    pub fn raw(self) -> RawSchedulerConfig {
        self.raw
    }

    pub fn build(self) -> SchedulerConfig {
        SchedulerConfig::try_from(self.raw).expect("Failed to build valid config from builder")
    }
}

impl Default for ConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Builder for `TaskSpec`.
pub struct TaskSpecBuilder {
    spec: TaskSpec,
}

impl TaskSpecBuilder {
    pub fn new(group: &str) -> Self {
        Self {
            spec: TaskSpec::new(group),
        }
    }

    pub fn priority(mut self, p: f64) -> Self {
        self.spec.priority = p;
        self
    }

    pub fn aging_rate(mut self, r: f64) -> Self {
        self.spec.aging_rate = r;
        self
    }

    pub fn maturation_ms(mut self, ms: u64) -> Self {
        self.spec.maturation = Timestamp::from_millis(ms);
        self
    }

    pub fn deadline_ms(mut self, ms: u64) -> Self {
        self.spec.deadline = Some(Timestamp::from_millis(ms));
        self
    }

    pub fn cost(mut self, tokens: u32) -> Self {
        self.spec.token_cost = tokens;
        self
    }

    pub fn max_exec_ms(mut self, ms: u64) -> Self {
        self.spec.max_execution_time = Duration::from_millis(ms);
        self
    }

    pub fn estimate_ms(mut self, ms: u64) -> Self {
        self.spec.job_time_estimate = Duration::from_millis(ms);
        self
    }

    pub fn after(mut self, dep: TaskId) -> Self {
        self.spec.dependencies.push(DepRef::Task(dep));
        self
    }

    /// Depend on the `index`-th spec of the same batch.
    pub fn after_batch(mut self, index: usize) -> Self {
        self.spec.dependencies.push(DepRef::Batch(index));
        self
    }

    pub fn payload(mut self, payload: &str) -> Self {
        self.spec.payload = payload.to_string();
        self
    }

    pub fn build(self) -> TaskSpec {
        self.spec
    }
}
