#![allow(dead_code)]

pub use fairsched_test_utils::{ConfigBuilder, TaskSpecBuilder, init_tracing};

use fairsched::config::SchedulerConfig;
use fairsched::engine::CoreScheduler;
use fairsched::store::TaskState;
use fairsched::types::{TaskId, Timestamp, WorkerId};

pub type TestResult = Result<(), Box<dyn std::error::Error>>;

/// Shorthand for a millisecond timestamp.
pub fn ms(n: u64) -> Timestamp {
    Timestamp::from_millis(n)
}

pub fn worker() -> WorkerId {
    WorkerId::from("worker-1")
}

pub fn core(config: SchedulerConfig) -> CoreScheduler {
    init_tracing();
    CoreScheduler::new(config)
}

/// A scheduler whose buckets, rate limits and admission cap never gate.
pub fn unconstrained_core() -> CoreScheduler {
    core(ConfigBuilder::unconstrained().build())
}

pub fn state_of(core: &CoreScheduler, id: TaskId) -> TaskState {
    core.inspect(id).expect("task should exist").state
}

/// Pull one task at `now` and return its id.
pub fn pull_id(core: &mut CoreScheduler, now: u64) -> Option<TaskId> {
    core.pull(worker(), ms(now)).map(|lease| lease.task)
}
