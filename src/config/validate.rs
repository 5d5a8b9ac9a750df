// src/config/validate.rs

use crate::config::model::{
    AdaptivitySection, BucketSection, FairnessSection, GroupSection, RawSchedulerConfig,
    SchedulerConfig, SheddingSection,
};
use crate::errors::{Result, SchedulerError};

impl TryFrom<RawSchedulerConfig> for SchedulerConfig {
    type Error = SchedulerError;

    fn try_from(raw: RawSchedulerConfig) -> std::result::Result<Self, Self::Error> {
        validate_raw_config(&raw)?;
        Ok(SchedulerConfig::new_unchecked(raw))
    }
}

fn validate_raw_config(cfg: &RawSchedulerConfig) -> Result<()> {
    validate_scheduler(cfg)?;
    validate_bucket("[global]", &cfg.global)?;
    validate_group("[group_defaults]", &cfg.group_defaults)?;
    validate_group_overrides(cfg)?;
    validate_fairness(&cfg.fairness)?;
    validate_shedding(&cfg.shedding)?;
    validate_adaptivity(&cfg.adaptivity, &cfg.global)?;
    Ok(())
}

fn config_error(msg: impl Into<String>) -> SchedulerError {
    SchedulerError::ConfigError(msg.into())
}

fn ensure_finite(section: &str, field: &str, value: f64) -> Result<()> {
    if !value.is_finite() {
        return Err(config_error(format!(
            "{section}.{field} must be a finite number (got {value})"
        )));
    }
    Ok(())
}

fn ensure_positive(section: &str, field: &str, value: f64) -> Result<()> {
    ensure_finite(section, field, value)?;
    if value <= 0.0 {
        return Err(config_error(format!(
            "{section}.{field} must be > 0 (got {value})"
        )));
    }
    Ok(())
}

fn ensure_non_negative(section: &str, field: &str, value: f64) -> Result<()> {
    ensure_finite(section, field, value)?;
    if value < 0.0 {
        return Err(config_error(format!(
            "{section}.{field} must be >= 0 (got {value})"
        )));
    }
    Ok(())
}

fn ensure_unit_interval(section: &str, field: &str, value: f64) -> Result<()> {
    ensure_positive(section, field, value)?;
    if value > 1.0 {
        return Err(config_error(format!(
            "{section}.{field} must be in (0, 1] (got {value})"
        )));
    }
    Ok(())
}

fn validate_scheduler(cfg: &RawSchedulerConfig) -> Result<()> {
    let s = &cfg.scheduler;
    if s.max_queue_size == 0 {
        return Err(config_error("[scheduler].max_queue_size must be >= 1 (got 0)"));
    }
    ensure_non_negative("[scheduler]", "min_effective_priority", s.min_effective_priority)?;
    ensure_non_negative("[scheduler]", "urgency_weight", s.urgency_weight)?;
    if s.urgency_horizon_ms == 0 {
        return Err(config_error("[scheduler].urgency_horizon_ms must be >= 1 (got 0)"));
    }
    if s.rate_window_ms == 0 {
        return Err(config_error("[scheduler].rate_window_ms must be >= 1 (got 0)"));
    }
    if s.tick_interval_ms == 0 {
        return Err(config_error("[scheduler].tick_interval_ms must be >= 1 (got 0)"));
    }
    Ok(())
}

fn validate_bucket(section: &str, b: &BucketSection) -> Result<()> {
    ensure_positive(section, "capacity", b.capacity)?;
    ensure_non_negative(section, "refill_rate", b.refill_rate)?;
    if let Some(initial) = b.initial_tokens {
        ensure_non_negative(section, "initial_tokens", initial)?;
        if initial > b.capacity {
            return Err(config_error(format!(
                "{section}.initial_tokens ({initial}) exceeds capacity ({})",
                b.capacity
            )));
        }
    }
    if b.hard_rate_limit == 0 {
        return Err(config_error(format!("{section}.hard_rate_limit must be >= 1 (got 0)")));
    }
    Ok(())
}

fn validate_group(section: &str, g: &GroupSection) -> Result<()> {
    validate_bucket(
        section,
        &BucketSection {
            capacity: g.capacity,
            refill_rate: g.refill_rate,
            initial_tokens: g.initial_tokens,
            hard_rate_limit: g.hard_rate_limit,
        },
    )?;
    ensure_positive(section, "quota", g.quota)?;
    Ok(())
}

fn validate_group_overrides(cfg: &RawSchedulerConfig) -> Result<()> {
    let merged = SchedulerConfig::new_unchecked(cfg.clone());
    for name in cfg.group.keys() {
        if name.trim().is_empty() {
            return Err(config_error("[group.<id>] ids must not be empty"));
        }
        let section = format!("[group.{name}]");
        validate_group(&section, &merged.group_settings(&name.as_str().into()))?;
    }
    Ok(())
}

fn validate_fairness(f: &FairnessSection) -> Result<()> {
    if f.window_ms == 0 {
        return Err(config_error("[fairness].window_ms must be >= 1 (got 0)"));
    }
    ensure_non_negative("[fairness]", "tolerance", f.tolerance)?;
    ensure_non_negative("[fairness]", "gain", f.gain)?;
    ensure_unit_interval("[fairness]", "smoothing", f.smoothing)?;
    ensure_non_negative("[fairness]", "max_adjustment", f.max_adjustment)?;
    Ok(())
}

fn validate_shedding(s: &SheddingSection) -> Result<()> {
    ensure_non_negative("[shedding]", "threshold", s.threshold)?;
    ensure_positive("[shedding]", "admission_cap", s.admission_cap)?;
    ensure_positive("[shedding]", "min_admission_cap", s.min_admission_cap)?;
    let max_cap = s.effective_max_admission_cap();
    ensure_positive("[shedding]", "max_admission_cap", max_cap)?;
    if !(s.min_admission_cap <= s.admission_cap && s.admission_cap <= max_cap) {
        return Err(config_error(format!(
            "[shedding] requires min_admission_cap <= admission_cap <= max_admission_cap \
             (got {} <= {} <= {})",
            s.min_admission_cap, s.admission_cap, max_cap
        )));
    }
    if s.admission_window_ms == 0 || s.window_ms == 0 {
        return Err(config_error("[shedding] windows must be >= 1ms"));
    }
    ensure_unit_interval("[shedding]", "reduction_factor", s.reduction_factor)?;
    ensure_non_negative("[shedding]", "recovery_step", s.recovery_step)?;
    Ok(())
}

fn validate_adaptivity(a: &AdaptivitySection, global: &BucketSection) -> Result<()> {
    if a.window_ms == 0 {
        return Err(config_error("[adaptivity].window_ms must be >= 1 (got 0)"));
    }
    ensure_non_negative("[adaptivity]", "min_rate", a.min_rate)?;
    ensure_positive("[adaptivity]", "max_rate", a.max_rate)?;
    if a.min_rate > a.max_rate {
        return Err(config_error(format!(
            "[adaptivity].min_rate ({}) exceeds max_rate ({})",
            a.min_rate, a.max_rate
        )));
    }
    ensure_unit_interval("[adaptivity]", "gain", a.gain)?;
    if global.refill_rate < a.min_rate || global.refill_rate > a.max_rate {
        return Err(config_error(format!(
            "[global].refill_rate ({}) must lie within [adaptivity] bounds [{}, {}]",
            global.refill_rate, a.min_rate, a.max_rate
        )));
    }
    Ok(())
}
