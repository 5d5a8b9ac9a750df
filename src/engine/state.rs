// src/engine/state.rs

//! Exportable scheduler state.
//!
//! Contains exactly what is needed to rebuild an equivalent scheduler: the
//! non-terminal tasks (in topological order), bucket levels, fairness
//! adjustments and the shedding knobs. Serialisation format and storage are
//! up to the host.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::store::{Task, TaskState};
use crate::types::{GroupId, TaskId, Timestamp, WorkerId};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SchedulerState {
    /// Scheduler time at export.
    pub now: Timestamp,
    /// Next id to hand out.
    pub next_id: u64,
    /// Non-terminal tasks, dependencies first.
    pub tasks: Vec<TaskRecord>,
    pub groups: Vec<GroupRecord>,
    pub global_tokens: f64,
    pub global_refill_rate: f64,
    pub admission_cap: f64,
    pub shed_threshold: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskRecord {
    pub id: TaskId,
    pub group: GroupId,
    pub state: TaskState,
    pub priority: f64,
    pub aging_rate: f64,
    pub declared_maturation: Timestamp,
    pub declared_deadline: Option<Timestamp>,
    pub maturation: Timestamp,
    pub deadline: Option<Timestamp>,
    pub token_cost: u32,
    pub max_execution_time: Duration,
    pub job_time_estimate: Duration,
    /// Only dependencies that were still non-terminal at export; the rest
    /// had completed.
    pub dependencies: Vec<TaskId>,
    pub payload: String,
    pub submitted_at: Timestamp,
    pub enqueued_at: Option<Timestamp>,
    pub started_at: Option<Timestamp>,
    pub worker: Option<WorkerId>,
}

impl TaskRecord {
    pub(crate) fn from_task(task: &Task, live_deps: Vec<TaskId>) -> Self {
        Self {
            id: task.id,
            group: task.group.clone(),
            state: task.state().clone(),
            priority: task.priority,
            aging_rate: task.aging_rate,
            declared_maturation: task.declared_maturation,
            declared_deadline: task.declared_deadline,
            maturation: task.maturation,
            deadline: task.deadline,
            token_cost: task.token_cost,
            max_execution_time: task.max_execution_time,
            job_time_estimate: task.job_time_estimate,
            dependencies: live_deps,
            payload: task.payload.clone(),
            submitted_at: task.submitted_at,
            enqueued_at: task.enqueued_at,
            started_at: task.started_at,
            worker: task.worker.clone(),
        }
    }

    pub(crate) fn into_task(self) -> Task {
        Task {
            id: self.id,
            group: self.group,
            priority: self.priority,
            aging_rate: self.aging_rate,
            declared_maturation: self.declared_maturation,
            declared_deadline: self.declared_deadline,
            maturation: self.maturation,
            deadline: self.deadline,
            token_cost: self.token_cost,
            max_execution_time: self.max_execution_time,
            job_time_estimate: self.job_time_estimate,
            dependencies: self.dependencies,
            payload: self.payload,
            submitted_at: self.submitted_at,
            enqueued_at: self.enqueued_at,
            started_at: self.started_at,
            finished_at: None,
            worker: self.worker,
            effective_priority: self.priority,
            state: self.state,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GroupRecord {
    pub group: GroupId,
    pub tokens: f64,
    pub priority_adjustment: f64,
}
