// src/config/model.rs

use std::collections::BTreeMap;
use std::time::Duration;

use serde::Deserialize;

use crate::types::{GroupId, LogLevel};

/// Scheduler configuration as read from a TOML file, before validation.
///
/// ```toml
/// [scheduler]
/// max_queue_size = 500
///
/// [global]
/// capacity = 100
/// refill_rate = 50.0
///
/// [group_defaults]
/// capacity = 10
/// refill_rate = 1.0
///
/// [group.batch]
/// quota = 0.5
/// ```
///
/// All sections are optional and have reasonable defaults.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RawSchedulerConfig {
    #[serde(default)]
    pub scheduler: SchedulerSection,

    /// Global token bucket and hard rate limit.
    #[serde(default)]
    pub global: BucketSection,

    /// Settings applied to every group created implicitly on first submission.
    #[serde(default)]
    pub group_defaults: GroupSection,

    /// Per-group overrides from `[group.<id>]`.
    #[serde(default)]
    pub group: BTreeMap<String, GroupOverride>,

    #[serde(default)]
    pub fairness: FairnessSection,

    #[serde(default)]
    pub shedding: SheddingSection,

    #[serde(default)]
    pub adaptivity: AdaptivitySection,

    #[serde(default)]
    pub logging: LoggingSection,
}

/// Validated configuration. Build it with `SchedulerConfig::try_from(raw)`
/// or one of the loaders in [`crate::config`].
#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    pub scheduler: SchedulerSection,
    pub global: BucketSection,
    pub group_defaults: GroupSection,
    pub group: BTreeMap<String, GroupOverride>,
    pub fairness: FairnessSection,
    pub shedding: SheddingSection,
    pub adaptivity: AdaptivitySection,
    pub logging: LoggingSection,
}

impl SchedulerConfig {
    pub(crate) fn new_unchecked(raw: RawSchedulerConfig) -> Self {
        Self {
            scheduler: raw.scheduler,
            global: raw.global,
            group_defaults: raw.group_defaults,
            group: raw.group,
            fairness: raw.fairness,
            shedding: raw.shedding,
            adaptivity: raw.adaptivity,
            logging: raw.logging,
        }
    }

    /// Effective settings for a group: `[group_defaults]` overlaid with
    /// `[group.<id>]` if present.
    pub fn group_settings(&self, group: &GroupId) -> GroupSection {
        let base = self.group_defaults.clone();
        match self.group.get(group.as_str()) {
            Some(o) => GroupSection {
                capacity: o.capacity.unwrap_or(base.capacity),
                refill_rate: o.refill_rate.unwrap_or(base.refill_rate),
                initial_tokens: o.initial_tokens.or(base.initial_tokens),
                hard_rate_limit: o.hard_rate_limit.unwrap_or(base.hard_rate_limit),
                quota: o.quota.unwrap_or(base.quota),
            },
            None => base,
        }
    }
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self::new_unchecked(RawSchedulerConfig::default())
    }
}

/// `[scheduler]` section.
#[derive(Debug, Clone, Deserialize)]
pub struct SchedulerSection {
    /// Maximum number of queued (Pending + Ready) tasks.
    #[serde(default = "default_max_queue_size")]
    pub max_queue_size: usize,

    /// Floor applied to every effective priority.
    #[serde(default)]
    pub min_effective_priority: f64,

    /// Maximum priority boost contributed by deadline urgency.
    #[serde(default = "default_urgency_weight")]
    pub urgency_weight: f64,

    /// Deadlines further away than this contribute no urgency.
    #[serde(default = "default_urgency_horizon_ms")]
    pub urgency_horizon_ms: u64,

    /// Short window over which hard rate limits count dispatches.
    #[serde(default = "default_rate_window_ms")]
    pub rate_window_ms: u64,

    /// Period of the background ticker started by `start_from_config`.
    #[serde(default = "default_tick_interval_ms")]
    pub tick_interval_ms: u64,

    /// How long finished tasks stay inspectable before `tick` drops them.
    /// A finished task is kept for as long as any dependent is still live.
    #[serde(default = "default_terminal_retention_ms")]
    pub terminal_retention_ms: u64,
}

impl SchedulerSection {
    pub fn urgency_horizon(&self) -> Duration {
        Duration::from_millis(self.urgency_horizon_ms)
    }

    pub fn rate_window(&self) -> Duration {
        Duration::from_millis(self.rate_window_ms)
    }

    pub fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.tick_interval_ms)
    }

    pub fn terminal_retention(&self) -> Duration {
        Duration::from_millis(self.terminal_retention_ms)
    }
}

impl Default for SchedulerSection {
    fn default() -> Self {
        Self {
            max_queue_size: default_max_queue_size(),
            min_effective_priority: 0.0,
            urgency_weight: default_urgency_weight(),
            urgency_horizon_ms: default_urgency_horizon_ms(),
            rate_window_ms: default_rate_window_ms(),
            tick_interval_ms: default_tick_interval_ms(),
            terminal_retention_ms: default_terminal_retention_ms(),
        }
    }
}

fn default_max_queue_size() -> usize {
    10_000
}

fn default_urgency_weight() -> f64 {
    1.0
}

fn default_urgency_horizon_ms() -> u64 {
    60_000
}

fn default_tick_interval_ms() -> u64 {
    100
}

fn default_terminal_retention_ms() -> u64 {
    300_000
}

fn default_rate_window_ms() -> u64 {
    1_000
}

/// `[global]` section: the process-wide bucket.
#[derive(Debug, Clone, Deserialize)]
pub struct BucketSection {
    #[serde(default = "default_global_capacity")]
    pub capacity: f64,

    /// Tokens per second. The adaptivity loop moves this within its bounds.
    #[serde(default = "default_global_refill_rate")]
    pub refill_rate: f64,

    /// Starting level; defaults to a full bucket.
    #[serde(default)]
    pub initial_tokens: Option<f64>,

    /// Maximum dispatches per rate window, regardless of tokens.
    #[serde(default = "default_global_hard_rate_limit")]
    pub hard_rate_limit: u32,
}

impl Default for BucketSection {
    fn default() -> Self {
        Self {
            capacity: default_global_capacity(),
            refill_rate: default_global_refill_rate(),
            initial_tokens: None,
            hard_rate_limit: default_global_hard_rate_limit(),
        }
    }
}

fn default_global_capacity() -> f64 {
    100.0
}

fn default_global_refill_rate() -> f64 {
    50.0
}

fn default_global_hard_rate_limit() -> u32 {
    1_000
}

/// `[group_defaults]` section.
#[derive(Debug, Clone, Deserialize)]
pub struct GroupSection {
    #[serde(default = "default_group_capacity")]
    pub capacity: f64,

    #[serde(default = "default_group_refill_rate")]
    pub refill_rate: f64,

    #[serde(default)]
    pub initial_tokens: Option<f64>,

    #[serde(default = "default_group_hard_rate_limit")]
    pub hard_rate_limit: u32,

    /// Target share of consumed tokens, relative to other active groups.
    #[serde(default = "default_quota")]
    pub quota: f64,
}

impl Default for GroupSection {
    fn default() -> Self {
        Self {
            capacity: default_group_capacity(),
            refill_rate: default_group_refill_rate(),
            initial_tokens: None,
            hard_rate_limit: default_group_hard_rate_limit(),
            quota: default_quota(),
        }
    }
}

fn default_group_capacity() -> f64 {
    10.0
}

fn default_group_refill_rate() -> f64 {
    1.0
}

fn default_group_hard_rate_limit() -> u32 {
    100
}

fn default_quota() -> f64 {
    1.0
}

/// `[group.<id>]` section. Unset fields fall back to `[group_defaults]`.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct GroupOverride {
    #[serde(default)]
    pub capacity: Option<f64>,
    #[serde(default)]
    pub refill_rate: Option<f64>,
    #[serde(default)]
    pub initial_tokens: Option<f64>,
    #[serde(default)]
    pub hard_rate_limit: Option<u32>,
    #[serde(default)]
    pub quota: Option<f64>,
}

/// `[fairness]` section.
#[derive(Debug, Clone, Deserialize)]
pub struct FairnessSection {
    /// Trailing window over which consumed tokens are counted.
    #[serde(default = "default_fairness_window_ms")]
    pub window_ms: u64,

    /// Utilization within `1 ± tolerance` counts as on-target.
    #[serde(default = "default_fairness_tolerance")]
    pub tolerance: f64,

    /// Priority units per unit of utilization error.
    #[serde(default = "default_fairness_gain")]
    pub gain: f64,

    /// Fraction of the distance to the target adjustment covered per tick.
    #[serde(default = "default_fairness_smoothing")]
    pub smoothing: f64,

    /// Adjustments are clamped to `[-max_adjustment, max_adjustment]`.
    #[serde(default = "default_max_adjustment")]
    pub max_adjustment: f64,
}

impl FairnessSection {
    pub fn window(&self) -> Duration {
        Duration::from_millis(self.window_ms)
    }
}

impl Default for FairnessSection {
    fn default() -> Self {
        Self {
            window_ms: default_fairness_window_ms(),
            tolerance: default_fairness_tolerance(),
            gain: default_fairness_gain(),
            smoothing: default_fairness_smoothing(),
            max_adjustment: default_max_adjustment(),
        }
    }
}

fn default_fairness_window_ms() -> u64 {
    10_000
}

fn default_fairness_tolerance() -> f64 {
    0.05
}

fn default_fairness_gain() -> f64 {
    5.0
}

fn default_fairness_smoothing() -> f64 {
    0.5
}

fn default_max_adjustment() -> f64 {
    2.0
}

/// `[shedding]` section.
#[derive(Debug, Clone, Deserialize)]
pub struct SheddingSection {
    /// Tasks below this priority are refused outright when the queue is full.
    #[serde(default = "default_shed_threshold")]
    pub threshold: f64,

    /// Initial admission-rate cap, in submissions per second.
    #[serde(default = "default_admission_cap")]
    pub admission_cap: f64,

    #[serde(default = "default_min_admission_cap")]
    pub min_admission_cap: f64,

    /// Ceiling the cap recovers to; defaults to `admission_cap`.
    #[serde(default)]
    pub max_admission_cap: Option<f64>,

    /// Trailing window over which submissions are counted against the cap.
    #[serde(default = "default_admission_window_ms")]
    pub admission_window_ms: u64,

    /// Trailing window over which shed events are counted.
    #[serde(default = "default_shed_window_ms")]
    pub window_ms: u64,

    /// More shed events than this inside the window reduces the cap.
    #[serde(default = "default_max_shed_events")]
    pub max_shed_events: usize,

    /// Multiplier applied to the cap on sustained shedding.
    #[serde(default = "default_reduction_factor")]
    pub reduction_factor: f64,

    /// Submissions/second added back per tick once shedding stops.
    #[serde(default = "default_recovery_step")]
    pub recovery_step: f64,
}

impl SheddingSection {
    pub fn admission_window(&self) -> Duration {
        Duration::from_millis(self.admission_window_ms)
    }

    pub fn window(&self) -> Duration {
        Duration::from_millis(self.window_ms)
    }

    pub fn effective_max_admission_cap(&self) -> f64 {
        self.max_admission_cap.unwrap_or(self.admission_cap)
    }
}

impl Default for SheddingSection {
    fn default() -> Self {
        Self {
            threshold: default_shed_threshold(),
            admission_cap: default_admission_cap(),
            min_admission_cap: default_min_admission_cap(),
            max_admission_cap: None,
            admission_window_ms: default_admission_window_ms(),
            window_ms: default_shed_window_ms(),
            max_shed_events: default_max_shed_events(),
            reduction_factor: default_reduction_factor(),
            recovery_step: default_recovery_step(),
        }
    }
}

fn default_shed_threshold() -> f64 {
    1.0
}

fn default_admission_cap() -> f64 {
    1_000.0
}

fn default_min_admission_cap() -> f64 {
    10.0
}

fn default_admission_window_ms() -> u64 {
    1_000
}

fn default_shed_window_ms() -> u64 {
    10_000
}

fn default_max_shed_events() -> usize {
    10
}

fn default_reduction_factor() -> f64 {
    0.5
}

fn default_recovery_step() -> f64 {
    10.0
}

/// `[adaptivity]` section.
#[derive(Debug, Clone, Deserialize)]
pub struct AdaptivitySection {
    /// Trailing window for throughput / latency / failure-rate metrics.
    #[serde(default = "default_adaptivity_window_ms")]
    pub window_ms: u64,

    /// Lower bound for the global refill rate (tokens/s).
    #[serde(default = "default_min_rate")]
    pub min_rate: f64,

    /// Upper bound for the global refill rate (tokens/s).
    #[serde(default = "default_max_rate")]
    pub max_rate: f64,

    /// Fraction of the gap to the target rate closed per tick, in `(0, 1]`.
    #[serde(default = "default_adaptivity_gain")]
    pub gain: f64,

    /// Mean end-to-end latency above this starts throttling the rate.
    #[serde(default = "default_target_latency_ms")]
    pub target_latency_ms: u64,
}

impl AdaptivitySection {
    pub fn window(&self) -> Duration {
        Duration::from_millis(self.window_ms)
    }

    pub fn target_latency(&self) -> Duration {
        Duration::from_millis(self.target_latency_ms)
    }
}

impl Default for AdaptivitySection {
    fn default() -> Self {
        Self {
            window_ms: default_adaptivity_window_ms(),
            min_rate: default_min_rate(),
            max_rate: default_max_rate(),
            gain: default_adaptivity_gain(),
            target_latency_ms: default_target_latency_ms(),
        }
    }
}

fn default_adaptivity_window_ms() -> u64 {
    10_000
}

fn default_min_rate() -> f64 {
    1.0
}

fn default_max_rate() -> f64 {
    100.0
}

fn default_adaptivity_gain() -> f64 {
    0.5
}

fn default_target_latency_ms() -> u64 {
    5_000
}

/// `[logging]` section.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct LoggingSection {
    /// If unset, `FAIRSCHED_LOG` or `info` is used.
    #[serde(default)]
    pub level: Option<LogLevel>,
}
