// tests/resource_governor.rs

mod common;
use crate::common::{ConfigBuilder, TaskSpecBuilder, TestResult, core, ms, pull_id, state_of};

use std::time::Duration;

use fairsched::config::{BucketSection, GroupOverride, GroupSection};
use fairsched::errors::RejectReason;
use fairsched::governor::{Blocked, HardRateLimit, ResourceGovernor, TokenBucket};
use fairsched::store::TaskState;
use fairsched::types::GroupId;

fn drained_group(capacity: f64, refill_rate: f64, initial: f64) -> GroupOverride {
    GroupOverride {
        capacity: Some(capacity),
        refill_rate: Some(refill_rate),
        initial_tokens: Some(initial),
        ..GroupOverride::default()
    }
}

#[test]
fn group_tokens_are_conserved_without_refill() -> TestResult {
    let mut core = core(ConfigBuilder::unconstrained().group("g", 10.0, 0.0).build());

    let ids = core.submit_batch(
        (0..4).map(|_| TaskSpecBuilder::new("g").cost(3).build()).collect(),
        ms(0),
    )?;

    let leased: Vec<_> = (0..4).filter_map(|_| pull_id(&mut core, 1)).collect();
    assert_eq!(leased, ids[..3].to_vec());
    assert_eq!(state_of(&core, ids[3]), TaskState::Ready);

    let stats = core.group_stats(&GroupId::from("g")).expect("group");
    assert_eq!(stats.tokens_consumed, 9);
    assert_eq!(stats.tokens, 1.0);
    assert_eq!(stats.dispatched, 3);

    // Completion does not refund tokens, and nothing refills.
    for id in &ids[..3] {
        core.complete(*id, ms(2))?;
    }
    core.tick(ms(10_000));
    let stats = core.group_stats(&GroupId::from("g")).expect("group");
    assert_eq!(stats.tokens, 1.0);
    assert_eq!(pull_id(&mut core, 10_000), None);
    Ok(())
}

#[test]
fn blocked_head_does_not_stall_other_groups() -> TestResult {
    let mut core = core(
        ConfigBuilder::unconstrained()
            .group_override("big", drained_group(10.0, 0.0, 2.0))
            .urgency(0.0, 1)
            .build(),
    );

    let heavy = core.submit(TaskSpecBuilder::new("big").priority(5.0).cost(5).build(), ms(0))?;
    let light = core.submit(TaskSpecBuilder::new("small").priority(1.0).build(), ms(0))?;

    assert_eq!(pull_id(&mut core, 1), Some(light));
    assert_eq!(state_of(&core, heavy), TaskState::Ready);
    assert_eq!(core.ready_order(), vec![heavy]);
    Ok(())
}

#[test]
fn global_bucket_gates_every_group() -> TestResult {
    let mut core = core(
        ConfigBuilder::unconstrained()
            .global(5.0, 1.0)
            .adaptivity_bounds(1.0, 1.0)
            .build(),
    );

    let a = core.submit(TaskSpecBuilder::new("a").cost(2).build(), ms(0))?;
    let b = core.submit(TaskSpecBuilder::new("b").cost(2).build(), ms(0))?;
    let c = core.submit(TaskSpecBuilder::new("c").cost(2).build(), ms(0))?;

    assert_eq!(pull_id(&mut core, 0), Some(a));
    assert_eq!(pull_id(&mut core, 0), Some(b));
    assert_eq!(pull_id(&mut core, 0), None);
    assert_eq!(core.global_tokens(), 1.0);

    // One second at 1 token/s.
    core.tick(ms(1_000));
    assert_eq!(core.global_tokens(), 2.0);
    assert_eq!(pull_id(&mut core, 1_000), Some(c));
    Ok(())
}

#[test]
fn group_hard_rate_limit_caps_bursts() -> TestResult {
    let mut core = core(
        ConfigBuilder::unconstrained()
            .group_hard_limit(2)
            .rate_window_ms(1_000)
            .build(),
    );
    let ids = core.submit_batch(
        (0..3).map(|_| TaskSpecBuilder::new("g").build()).collect(),
        ms(0),
    )?;

    assert_eq!(pull_id(&mut core, 0), Some(ids[0]));
    assert_eq!(pull_id(&mut core, 0), Some(ids[1]));
    assert_eq!(pull_id(&mut core, 999), None);
    assert_eq!(pull_id(&mut core, 1_000), Some(ids[2]));
    Ok(())
}

#[test]
fn global_hard_rate_limit_spans_groups() -> TestResult {
    let mut core = core(
        ConfigBuilder::unconstrained()
            .global_hard_limit(2)
            .rate_window_ms(1_000)
            .build(),
    );
    core.submit(TaskSpecBuilder::new("a").build(), ms(0))?;
    core.submit(TaskSpecBuilder::new("b").build(), ms(0))?;
    let c = core.submit(TaskSpecBuilder::new("c").build(), ms(0))?;

    assert!(pull_id(&mut core, 0).is_some());
    assert!(pull_id(&mut core, 500).is_some());
    assert_eq!(pull_id(&mut core, 999), None);
    // The first dispatch left the window; the second has not.
    assert_eq!(pull_id(&mut core, 1_000), Some(c));
    Ok(())
}

#[test]
fn buckets_refill_on_tick_and_cap_at_capacity() -> TestResult {
    let mut core = core(
        ConfigBuilder::unconstrained()
            .group_override("g", drained_group(10.0, 5.0, 0.0))
            .build(),
    );
    let id = core.submit(TaskSpecBuilder::new("g").cost(5).build(), ms(0))?;

    // Refill only happens on tick.
    assert_eq!(pull_id(&mut core, 1_000), None);
    core.tick(ms(1_000));
    assert_eq!(pull_id(&mut core, 1_000), Some(id));

    core.tick(ms(60_000));
    let stats = core.group_stats(&GroupId::from("g")).expect("group");
    assert_eq!(stats.tokens, 10.0);
    assert_eq!(stats.capacity, 10.0);
    core.check_invariants()?;
    Ok(())
}

#[test]
fn cost_beyond_bucket_capacity_is_infeasible() {
    let mut core = core(ConfigBuilder::unconstrained().group("tiny", 5.0, 1.0).build());

    let result = core.submit(TaskSpecBuilder::new("tiny").cost(6).build(), ms(0));
    assert!(matches!(result, Err(RejectReason::InfeasibleSchedule(_))));

    let fits = core.submit(TaskSpecBuilder::new("tiny").cost(5).build(), ms(0));
    assert!(fits.is_ok());
}

#[test]
fn token_bucket_arithmetic() {
    let mut bucket = TokenBucket::new(10.0, 2.0, Some(4.0));
    assert_eq!(bucket.level(), 4.0);

    bucket.refill(Duration::from_secs(1));
    assert_eq!(bucket.level(), 6.0);
    bucket.refill(Duration::from_secs(10));
    assert_eq!(bucket.level(), 10.0);

    assert!(bucket.try_consume(3));
    assert_eq!(bucket.level(), 7.0);
    assert_eq!(bucket.consumed(), 3);

    assert!(!bucket.try_consume(8));
    assert_eq!(bucket.level(), 7.0);
    assert_eq!(bucket.consumed(), 3);

    bucket.set_refill_rate(-1.0);
    assert_eq!(bucket.refill_rate(), 0.0);
    bucket.set_level(20.0);
    assert_eq!(bucket.level(), 10.0);

    let clamped = TokenBucket::new(10.0, 1.0, Some(50.0));
    assert_eq!(clamped.level(), 10.0);
    let full = TokenBucket::new(10.0, 1.0, None);
    assert_eq!(full.level(), 10.0);
}

#[test]
fn hard_rate_limit_uses_a_sliding_window() {
    let mut limit = HardRateLimit::new(2, Duration::from_millis(1_000));

    assert!(limit.allows(ms(0)));
    limit.record(ms(0));
    limit.record(ms(500));
    assert!(!limit.allows(ms(900)));
    assert_eq!(limit.count(ms(1_000)), 1);
    assert!(limit.allows(ms(1_000)));
    assert_eq!(limit.count(ms(1_500)), 0);
}

#[test]
fn governor_reports_which_gate_blocked() {
    let global = BucketSection {
        capacity: 4.0,
        refill_rate: 0.0,
        initial_tokens: None,
        hard_rate_limit: 1,
    };
    let mut governor = ResourceGovernor::new(&global, Duration::from_secs(1));
    let g = GroupId::from("g");

    assert_eq!(governor.check(&g, 1, ms(0)), Err(Blocked::GroupTokens));

    let settings = GroupSection {
        capacity: 3.0,
        ..GroupSection::default()
    };
    governor.ensure_group(&g, &settings);

    assert_eq!(governor.check(&g, 4, ms(0)), Err(Blocked::GroupTokens));
    assert_eq!(governor.check(&g, 2, ms(0)), Ok(()));
    governor.charge(&g, 2, ms(0), Duration::ZERO);

    // Group has 1 token, global has 2, and the global limit of 1 is spent.
    assert_eq!(governor.check(&g, 1, ms(10)), Err(Blocked::GlobalRate));
    assert_eq!(governor.check(&g, 1, ms(1_000)), Ok(()));

    let account = governor.group(&g).expect("group");
    assert_eq!(account.running, 1);
    assert_eq!(account.dispatched, 1);
}
