// src/lib.rs

//! fairsched: an adaptive, fairness-aware task scheduler.
//!
//! Producers submit tasks tagged with a group, priority, timing constraints
//! and a token cost; workers pull leases. Between the two sit a dependency
//! DAG, maturation / deadline heaps, a lazily reprioritized ready queue,
//! per-group and global token buckets, and three feedback controllers
//! (fairness, load shedding, adaptivity).
//!
//! [`engine::CoreScheduler`] is the synchronous state machine;
//! [`engine::SchedulerService`] runs it on a tokio task behind a cloneable
//! [`engine::SchedulerHandle`].

pub mod adaptivity;
pub mod config;
pub mod dag;
pub mod engine;
pub mod errors;
pub mod fairness;
pub mod governor;
pub mod logging;
pub mod shedding;
pub mod store;
pub mod timing;
pub mod types;

use std::path::Path;

use tracing::info;

pub use engine::{CoreScheduler, Lease, SchedulerHandle, SchedulerService, TickReport};
pub use errors::{FailureReason, OperationError, RejectReason, Result, SchedulerError};
pub use store::{DepRef, TaskSnapshot, TaskSpec, TaskState};
pub use types::{GroupId, TaskId, Timestamp, WorkerId};

use crate::config::load_and_validate;
use crate::engine::TokioClock;

/// Load a config file, install logging as configured, and start a scheduler
/// service on the current tokio runtime with a background ticker.
///
/// Returns the handle; the service stops once `shutdown` has drained it or
/// every handle is dropped.
pub fn start_from_config(path: &Path) -> Result<SchedulerHandle> {
    let cfg = load_and_validate(path)?;

    if let Err(e) = logging::init_logging(cfg.logging.level) {
        // A host that already installed a subscriber keeps it.
        tracing::debug!(error = %e, "logging already initialised");
    }

    let tick = cfg.scheduler.tick_interval();
    info!(
        config = %path.display(),
        max_queue_size = cfg.scheduler.max_queue_size,
        tick_ms = tick.as_millis() as u64,
        "starting fairsched"
    );

    let core = CoreScheduler::new(cfg);
    let (handle, _join) = SchedulerService::spawn(core, TokioClock::new(), 256);
    handle.spawn_ticker(tick);
    Ok(handle)
}
