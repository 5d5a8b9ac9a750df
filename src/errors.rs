// src/errors.rs

//! Crate-wide error types.
//!
//! The taxonomy follows the three kinds of failure the scheduler can report:
//! - [`RejectReason`]: admission errors, returned synchronously by `submit`.
//! - [`FailureReason`]: scheduling failures, recorded as a terminal task state.
//! - [`OperationError`]: caller mistakes on `complete` / `fail` / `cancel`.
//!
//! [`SchedulerError`] wraps all of them for the async service and the config
//! layer.

use thiserror::Error;

use crate::store::{DepRef, TaskState};
use crate::types::TaskId;

/// Why a submission was refused. No state is mutated when this is returned.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RejectReason {
    #[error("unknown dependency: {0}")]
    UnknownDependency(DepRef),

    #[error("submission would create a dependency cycle")]
    CyclicDependency,

    #[error("task constraints cannot be met: {0}")]
    InfeasibleSchedule(String),

    #[error("queue is full and the task was shed")]
    LoadShed,

    #[error("admission rate cap exceeded")]
    RateCapped,

    #[error("scheduler is shutting down")]
    ShuttingDown,
}

/// Why a task ended in the `Failed` state.
#[derive(Error, Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum FailureReason {
    #[error("deadline missed before the task could start")]
    DeadlineMissed,

    #[error("dependency chain cannot meet its constraints")]
    InfeasibleSchedule,

    #[error("maximum execution time exceeded")]
    Timeout,

    #[error("evicted by load shedding")]
    LoadShed,

    #[error("worker reported failure: {0}")]
    Worker(String),
}

/// Errors from operations on existing tasks.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum OperationError {
    #[error("unknown task: {0}")]
    UnknownTask(TaskId),

    #[error("invalid transition for {task}: cannot {operation} a task in state {from}")]
    InvalidTransition {
        task: TaskId,
        from: TaskState,
        operation: &'static str,
    },
}

#[derive(Error, Debug)]
pub enum SchedulerError {
    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("TOML parsing error: {0}")]
    TomlError(#[from] toml::de::Error),

    #[error("Submission rejected: {0}")]
    Rejected(#[from] RejectReason),

    #[error(transparent)]
    Operation(#[from] OperationError),

    #[error("Invalid scheduler state: {0}")]
    InvalidState(String),

    #[error("Scheduler service has stopped")]
    ServiceStopped,
}

pub type Result<T> = std::result::Result<T, SchedulerError>;
