use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use fairsched::engine::SchedulerHandle;
use fairsched::errors::Result;
use fairsched::types::{TaskId, WorkerId};
use tokio::task::JoinHandle;

/// A fake worker that:
/// - pulls leases through a `SchedulerHandle`
/// - records which tasks it "ran"
/// - immediately reports completion (or failure, for ids in `fail_ids`).
#[derive(Clone)]
pub struct FakeWorker {
    handle: SchedulerHandle,
    id: WorkerId,
    executed: Arc<Mutex<Vec<TaskId>>>,
    fail_ids: Arc<Mutex<HashSet<TaskId>>>,
}

impl FakeWorker {
    pub fn new(handle: SchedulerHandle, id: &str) -> Self {
        Self {
            handle,
            id: WorkerId::from(id),
            executed: Arc::new(Mutex::new(Vec::new())),
            fail_ids: Arc::new(Mutex::new(HashSet::new())),
        }
    }

    /// Report failure instead of completion for `task`.
    pub fn fail_on(&self, task: TaskId) {
        self.fail_ids.lock().unwrap().insert(task);
    }

    /// Tasks run so far, in order.
    pub fn executed(&self) -> Vec<TaskId> {
        self.executed.lock().unwrap().clone()
    }

    /// Pull one task (waiting up to `wait`), run it, and report back.
    pub async fn work_once(&self, wait: Duration) -> Result<Option<TaskId>> {
        let Some(lease) = self.handle.pull(self.id.clone(), wait).await? else {
            return Ok(None);
        };

        self.executed.lock().unwrap().push(lease.task);

        let fail = self.fail_ids.lock().unwrap().contains(&lease.task);
        if fail {
            self.handle.fail(lease.task, "fake failure").await?;
        } else {
            self.handle.complete(lease.task).await?;
        }
        Ok(Some(lease.task))
    }

    /// Keep working until the service stops.
    pub fn spawn(self, wait: Duration) -> JoinHandle<()> {
        tokio::spawn(async move {
            while self.work_once(wait).await.is_ok() {}
        })
    }
}
