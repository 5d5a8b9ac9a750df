// src/engine/mod.rs

//! Scheduling engine.
//!
//! The synchronous core state machine lives in [`core`]: every operation
//! takes an explicit `now` and mutates all structures (store, graph, heaps,
//! queue, buckets) as one step. [`service`] is the async shell that owns a
//! core on a single tokio task and serves a cloneable handle. [`clock`]
//! supplies time to the shell.

use std::time::Duration;

use crate::types::{GroupId, TaskId, Timestamp, WorkerId};

/// A dispatched task, handed to the worker that pulled it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Lease {
    pub task: TaskId,
    pub group: GroupId,
    pub payload: String,
    pub token_cost: u32,
    pub worker: WorkerId,
    pub leased_at: Timestamp,
    /// `leased_at + max_execution_time`; the task is failed with `Timeout`
    /// on the first tick after this.
    pub expires_at: Timestamp,
}

/// What a single `tick` did.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TickReport {
    pub now: Timestamp,
    /// Pending tasks moved to Ready.
    pub promoted: Vec<TaskId>,
    pub deadline_missed: Vec<TaskId>,
    pub timed_out: Vec<TaskId>,
    /// Dependents failed because a dependency ended without completing.
    pub cascaded: Vec<TaskId>,
    /// Finished tasks dropped after their retention period.
    pub swept: Vec<TaskId>,
    pub admission_cap: f64,
    pub global_refill_rate: f64,
}

/// Read-only view of a group, as returned by `group_stats`.
#[derive(Debug, Clone, PartialEq)]
pub struct GroupStats {
    pub group: GroupId,
    pub tokens: f64,
    pub capacity: f64,
    pub refill_rate: f64,
    pub hard_rate_limit: u32,
    pub quota: f64,
    /// Tokens taken from the group bucket since creation.
    pub tokens_consumed: u64,
    /// Tokens consumed inside the fairness window.
    pub window_tokens: u64,
    pub utilization: f64,
    pub priority_adjustment: f64,
    /// Non-terminal tasks.
    pub live: usize,
    pub running: usize,
    pub dispatched: u64,
    pub completed: u64,
    pub failed: u64,
    pub cancelled: u64,
    /// Cumulative ready-queue wait of dispatched tasks.
    pub total_wait: Duration,
}

pub mod clock;
pub mod core;
pub mod service;
pub mod state;

pub use clock::{Clock, ManualClock, TokioClock};
pub use core::CoreScheduler;
pub use service::{SchedulerHandle, SchedulerService, ShutdownReport};
pub use state::{GroupRecord, SchedulerState, TaskRecord};
