// src/store/task.rs

//! Task records, submission specs and the task state machine.

use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::errors::FailureReason;
use crate::types::{GroupId, TaskId, Timestamp, WorkerId};

/// Reference to a dependency in a submission.
///
/// `Batch(i)` points at the `i`-th spec of the same `submit_batch` call and
/// is the only way to express a forward reference (and therefore a cycle).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DepRef {
    Task(TaskId),
    Batch(usize),
}

impl From<TaskId> for DepRef {
    fn from(id: TaskId) -> Self {
        DepRef::Task(id)
    }
}

impl fmt::Display for DepRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DepRef::Task(id) => write!(f, "{id}"),
            DepRef::Batch(i) => write!(f, "batch entry #{i}"),
        }
    }
}

/// What a producer submits.
#[derive(Debug, Clone)]
pub struct TaskSpec {
    pub group: GroupId,
    /// Non-negative base priority.
    pub priority: f64,
    /// Priority units gained per second spent in the ready queue.
    pub aging_rate: f64,
    /// Earliest permitted start, independent of dependencies.
    pub maturation: Timestamp,
    /// Latest permitted start; `None` means no deadline.
    pub deadline: Option<Timestamp>,
    pub token_cost: u32,
    pub max_execution_time: Duration,
    /// Used only for maturation/deadline propagation.
    pub job_time_estimate: Duration,
    pub dependencies: Vec<DepRef>,
    /// Opaque reference handed back to the worker on dispatch.
    pub payload: String,
}

impl TaskSpec {
    pub fn new(group: impl Into<GroupId>) -> Self {
        Self {
            group: group.into(),
            priority: 1.0,
            aging_rate: 0.0,
            maturation: Timestamp::ZERO,
            deadline: None,
            token_cost: 1,
            max_execution_time: Duration::from_secs(60),
            job_time_estimate: Duration::ZERO,
            dependencies: Vec::new(),
            payload: String::new(),
        }
    }
}

/// Lifecycle of a task.
///
/// `Pending → Ready → Running → {Completed, Failed, Cancelled}`; `Pending` and
/// `Ready` may also end directly in `Failed` or `Cancelled`. Nothing moves
/// backwards.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum TaskState {
    /// Blocked on maturation or dependencies.
    Pending,
    /// Eligible for dispatch; present in the ready queue.
    Ready,
    /// Leased to a worker.
    Running,
    Completed,
    Failed(FailureReason),
    Cancelled,
}

impl TaskState {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            TaskState::Completed | TaskState::Failed(_) | TaskState::Cancelled
        )
    }

    /// Pending or Ready: counts against the queue size.
    pub fn is_queued(&self) -> bool {
        matches!(self, TaskState::Pending | TaskState::Ready)
    }

    pub fn can_transition_to(&self, next: &TaskState) -> bool {
        use TaskState::*;
        matches!(
            (self, next),
            (Pending, Ready)
                | (Pending, Failed(_))
                | (Pending, Cancelled)
                | (Ready, Running)
                | (Ready, Failed(_))
                | (Ready, Cancelled)
                | (Running, Completed)
                | (Running, Failed(_))
                | (Running, Cancelled)
        )
    }
}

impl fmt::Display for TaskState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TaskState::Pending => f.write_str("Pending"),
            TaskState::Ready => f.write_str("Ready"),
            TaskState::Running => f.write_str("Running"),
            TaskState::Completed => f.write_str("Completed"),
            TaskState::Failed(reason) => write!(f, "Failed({reason})"),
            TaskState::Cancelled => f.write_str("Cancelled"),
        }
    }
}

/// The authoritative task record, owned by [`TaskStore`](super::TaskStore).
#[derive(Debug, Clone)]
pub struct Task {
    pub id: TaskId,
    pub group: GroupId,
    pub priority: f64,
    pub aging_rate: f64,
    pub declared_maturation: Timestamp,
    pub declared_deadline: Option<Timestamp>,
    /// Maturation after propagation from dependencies.
    pub maturation: Timestamp,
    /// Deadline after propagation from dependents.
    pub deadline: Option<Timestamp>,
    pub token_cost: u32,
    pub max_execution_time: Duration,
    pub job_time_estimate: Duration,
    pub dependencies: Vec<TaskId>,
    pub payload: String,
    pub submitted_at: Timestamp,
    /// When the task entered the ready queue.
    pub enqueued_at: Option<Timestamp>,
    pub started_at: Option<Timestamp>,
    pub finished_at: Option<Timestamp>,
    pub worker: Option<WorkerId>,
    /// Last computed effective priority.
    pub effective_priority: f64,
    pub(crate) state: TaskState,
}

impl Task {
    pub fn state(&self) -> &TaskState {
        &self.state
    }

    /// Seconds spent in the ready queue as of `now`.
    pub fn age_secs(&self, now: Timestamp) -> f64 {
        self.enqueued_at.map(|t| now.secs_since(t)).unwrap_or(0.0)
    }

    pub fn snapshot(&self, now: Timestamp) -> TaskSnapshot {
        TaskSnapshot {
            id: self.id,
            group: self.group.clone(),
            state: self.state.clone(),
            priority: self.priority,
            effective_priority: self.effective_priority,
            age: Duration::from_secs_f64(self.age_secs(now)),
            maturation: self.maturation,
            deadline: self.deadline,
            token_cost: self.token_cost,
            dependencies: self.dependencies.clone(),
            submitted_at: self.submitted_at,
            started_at: self.started_at,
            finished_at: self.finished_at,
            worker: self.worker.clone(),
        }
    }
}

/// Read-only view returned by `inspect`.
#[derive(Debug, Clone, PartialEq)]
pub struct TaskSnapshot {
    pub id: TaskId,
    pub group: GroupId,
    pub state: TaskState,
    pub priority: f64,
    pub effective_priority: f64,
    pub age: Duration,
    pub maturation: Timestamp,
    pub deadline: Option<Timestamp>,
    pub token_cost: u32,
    pub dependencies: Vec<TaskId>,
    pub submitted_at: Timestamp,
    pub started_at: Option<Timestamp>,
    pub finished_at: Option<Timestamp>,
    pub worker: Option<WorkerId>,
}
