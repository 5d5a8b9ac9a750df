// tests/adaptivity.rs

mod common;
use crate::common::{ConfigBuilder, TaskSpecBuilder, TestResult, core, ms, pull_id};

use std::time::Duration;

use fairsched::adaptivity::{AdaptivityLoop, FeedbackLaw, ProportionalLaw, WindowMetrics};
use fairsched::config::{AdaptivitySection, SchedulerConfig};

fn approx(a: f64, b: f64) -> bool {
    (a - b).abs() < 1e-6
}

/// Refill between 10 and 100 tokens/s, starting at the top.
fn adaptive_config() -> SchedulerConfig {
    ConfigBuilder::unconstrained()
        .global(1_000_000.0, 100.0)
        .adaptivity_bounds(10.0, 100.0)
        .adaptivity_gain(0.5)
        .build()
}

#[test]
fn idle_healthy_system_stays_at_max_rate() {
    let mut core = core(adaptive_config());
    for t in 1..=5 {
        let report = core.tick(ms(t * 100));
        assert_eq!(report.global_refill_rate, 100.0);
    }
}

#[test]
fn load_step_settles_monotonically_on_the_new_target() {
    let mut core = core(adaptive_config());
    core.set_load_signal(1.0);
    assert_eq!(core.load_signal(), 1.0);

    // health = 1 / (1 + 1) → target = 10 + 90 * 0.5 = 55
    let mut previous = core.global_refill_rate();
    for t in 1..=10 {
        let rate = core.tick(ms(t * 100)).global_refill_rate;
        assert!(rate <= previous, "rate went back up: {previous} -> {rate}");
        assert!(rate >= 55.0);
        previous = rate;
    }
    assert!((previous - 55.0).abs() < 1.0, "rate {previous} not settled");

    // Load removed: climbs back toward the maximum without overshoot.
    core.set_load_signal(0.0);
    for t in 11..=40 {
        let rate = core.tick(ms(t * 100)).global_refill_rate;
        assert!(rate >= previous && rate <= 100.0);
        previous = rate;
    }
    assert!(previous > 99.0);
}

#[test]
fn failures_pull_the_rate_down() -> TestResult {
    let mut core = core(adaptive_config());
    for _ in 0..4 {
        core.submit(TaskSpecBuilder::new("g").build(), ms(0))?;
    }
    while let Some(id) = pull_id(&mut core, 10) {
        core.fail(id, "crash", ms(20))?;
    }

    // Failure rate 1.0 → target = min_rate
    let rate = core.tick(ms(100)).global_refill_rate;
    assert!(approx(rate, 55.0));
    let rate = core.tick(ms(200)).global_refill_rate;
    assert!(approx(rate, 32.5));
    Ok(())
}

#[test]
fn non_finite_load_signal_is_ignored() {
    let mut core = core(adaptive_config());
    core.set_load_signal(f64::NAN);
    assert_eq!(core.load_signal(), 0.0);
    assert_eq!(core.tick(ms(100)).global_refill_rate, 100.0);
}

struct Constant(f64);

impl FeedbackLaw for Constant {
    fn rate_delta(&self, _metrics: &WindowMetrics) -> f64 {
        self.0
    }
}

#[test]
fn custom_law_output_is_clamped_to_bounds() {
    let mut up = core(adaptive_config()).with_feedback_law(Box::new(Constant(1e12)));
    assert_eq!(up.tick(ms(100)).global_refill_rate, 100.0);

    let mut down = core(adaptive_config()).with_feedback_law(Box::new(Constant(-1e12)));
    assert_eq!(down.tick(ms(100)).global_refill_rate, 10.0);

    let mut broken = core(adaptive_config()).with_feedback_law(Box::new(Constant(f64::NAN)));
    assert_eq!(broken.tick(ms(100)).global_refill_rate, 100.0);
}

fn metrics() -> WindowMetrics {
    WindowMetrics {
        throughput: 0.0,
        mean_latency: Duration::ZERO,
        failure_rate: 0.0,
        load_signal: 0.0,
        current_rate: 50.0,
        min_rate: 0.0,
        max_rate: 100.0,
    }
}

#[test]
fn proportional_law_target_combines_health_signals() {
    let law = ProportionalLaw {
        gain: 0.5,
        target_latency: Duration::from_secs(5),
    };

    assert!(approx(law.target_rate(&metrics()), 100.0));

    let slow = WindowMetrics {
        mean_latency: Duration::from_secs(10),
        failure_rate: 0.2,
        ..metrics()
    };
    // 0.8 * (5 / 10)
    assert!(approx(law.target_rate(&slow), 40.0));
    assert!(approx(law.rate_delta(&slow), -5.0));

    let fast = WindowMetrics {
        mean_latency: Duration::from_secs(1),
        ..metrics()
    };
    assert!(approx(law.target_rate(&fast), 100.0));

    let negative_load = WindowMetrics {
        load_signal: -3.0,
        ..metrics()
    };
    assert!(approx(law.target_rate(&negative_load), 100.0));
}

#[test]
fn loop_metrics_cover_the_trailing_window() {
    let params = AdaptivitySection {
        window_ms: 10_000,
        ..AdaptivitySection::default()
    };
    let mut adaptivity = AdaptivityLoop::new(params);

    adaptivity.record_outcome(ms(0), Duration::from_secs(1), false);
    adaptivity.record_outcome(ms(100), Duration::from_secs(3), false);
    adaptivity.record_outcome(ms(200), Duration::from_secs(60), true);

    let m = adaptivity.metrics(ms(1_000), 42.0);
    assert_eq!(m.mean_latency, Duration::from_secs(2));
    assert!(approx(m.failure_rate, 1.0 / 3.0));
    assert!(approx(m.throughput, 0.3));
    assert_eq!(m.current_rate, 42.0);

    // The first outcome has aged out.
    let m = adaptivity.metrics(ms(10_050), 42.0);
    assert_eq!(m.mean_latency, Duration::from_secs(3));
    assert!(approx(m.failure_rate, 0.5));
}

#[test]
fn mean_latency_keeps_sub_unit_precision() {
    let mut adaptivity = AdaptivityLoop::new(AdaptivitySection::default());

    adaptivity.record_outcome(ms(0), Duration::from_secs(1), false);
    adaptivity.record_outcome(ms(10), Duration::from_secs(2), false);
    adaptivity.record_outcome(ms(20), Duration::from_secs(2), false);

    let m = adaptivity.metrics(ms(30), 1.0);
    assert!((m.mean_latency.as_secs_f64() - 5.0 / 3.0).abs() < 1e-6);

    let mut adaptivity = AdaptivityLoop::new(AdaptivitySection::default());
    adaptivity.record_outcome(ms(0), Duration::from_nanos(1), false);
    adaptivity.record_outcome(ms(0), Duration::from_nanos(2), false);
    assert!(adaptivity.metrics(ms(1), 1.0).mean_latency > Duration::ZERO);
}

#[test]
fn tasks_that_never_ran_do_not_move_the_rate() -> TestResult {
    let config = ConfigBuilder::unconstrained()
        .global(1_000_000.0, 100.0)
        .adaptivity_bounds(1.0, 100.0)
        .adaptivity_gain(0.5)
        .max_queue_size(2)
        .shed_threshold(0.0)
        .build();
    let mut core = core(config);

    // Each arrival outranks the queue, so all but the last two are evicted.
    for p in 1..=10 {
        core.submit(TaskSpecBuilder::new("g").priority(f64::from(p)).build(), ms(0))?;
    }
    core.submit(
        TaskSpecBuilder::new("g").priority(100.0).deadline_ms(10).build(),
        ms(0),
    )?;

    let report = core.tick(ms(20));
    assert_eq!(report.deadline_missed.len(), 1);
    let stats = core.group_stats(&"g".into()).ok_or("group g")?;
    assert_eq!(stats.failed, 10);
    assert_eq!(stats.dispatched, 0);

    assert_eq!(report.global_refill_rate, 100.0);
    assert_eq!(core.tick(ms(40)).global_refill_rate, 100.0);
    Ok(())
}
