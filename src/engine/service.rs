// src/engine/service.rs

use std::collections::VecDeque;
use std::fmt;
use std::time::Duration;

use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

use crate::engine::core::CoreScheduler;
use crate::engine::state::SchedulerState;
use crate::engine::{Clock, GroupStats, Lease, TickReport};
use crate::errors::{OperationError, RejectReason, Result, SchedulerError};
use crate::store::{TaskSnapshot, TaskSpec};
use crate::types::{GroupId, TaskId, WorkerId};

type Reply<T> = oneshot::Sender<T>;

/// Requests served by the scheduler task.
#[derive(Debug)]
enum Command {
    Submit {
        specs: Vec<TaskSpec>,
        reply: Reply<std::result::Result<Vec<TaskId>, RejectReason>>,
    },
    Pull {
        worker: WorkerId,
        wait: Duration,
        reply: Reply<Option<Lease>>,
    },
    Complete {
        task: TaskId,
        reply: Reply<std::result::Result<(), OperationError>>,
    },
    Fail {
        task: TaskId,
        reason: String,
        reply: Reply<std::result::Result<(), OperationError>>,
    },
    Cancel {
        task: TaskId,
        reply: Reply<std::result::Result<(), OperationError>>,
    },
    Tick {
        reply: Reply<TickReport>,
    },
    Inspect {
        task: TaskId,
        reply: Reply<std::result::Result<TaskSnapshot, OperationError>>,
    },
    GroupStats {
        group: GroupId,
        reply: Reply<Option<GroupStats>>,
    },
    AdmissionCap {
        set: Option<f64>,
        reply: Reply<f64>,
    },
    ShedThreshold {
        set: Option<f64>,
        reply: Reply<f64>,
    },
    SetLoadSignal {
        signal: f64,
    },
    ExportState {
        reply: Reply<SchedulerState>,
    },
    Shutdown {
        reply: Reply<ShutdownReport>,
    },
}

/// Outcome of a graceful shutdown.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ShutdownReport {
    /// Tasks that never started and were discarded as `Cancelled`.
    pub cancelled: Vec<TaskId>,
    /// Tasks still running when the service stopped without a drain
    /// (all handles dropped).
    pub abandoned_running: usize,
}

/// A worker parked in a bounded-wait `pull`.
struct Waiter {
    worker: WorkerId,
    expires: Instant,
    reply: Reply<Option<Lease>>,
}

/// Single-writer async shell around [`CoreScheduler`].
///
/// All operations are serialized through one tokio task, so every command
/// sees (and leaves) a consistent core. Workers blocked in `pull` wait in a
/// FIFO list that is re-served after every command.
pub struct SchedulerService<C: Clock> {
    core: CoreScheduler,
    clock: C,
    rx: mpsc::Receiver<Command>,
    waiters: VecDeque<Waiter>,
    shutdown_replies: Vec<Reply<ShutdownReport>>,
}

impl<C: Clock> fmt::Debug for SchedulerService<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SchedulerService")
            .field("core", &self.core)
            .field("waiters", &self.waiters.len())
            .finish_non_exhaustive()
    }
}

impl<C: Clock> SchedulerService<C> {
    /// Spawn the service on the current tokio runtime.
    ///
    /// The join handle resolves once the service has drained (after
    /// `shutdown`) or every handle has been dropped.
    pub fn spawn(
        core: CoreScheduler,
        clock: C,
        capacity: usize,
    ) -> (SchedulerHandle, JoinHandle<ShutdownReport>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        let service = Self {
            core,
            clock,
            rx,
            waiters: VecDeque::new(),
            shutdown_replies: Vec::new(),
        };
        let join = tokio::spawn(service.run());
        (SchedulerHandle { tx }, join)
    }

    async fn run(mut self) -> ShutdownReport {
        info!("scheduler service started");

        loop {
            let next_expiry = self.waiters.iter().map(|w| w.expires).min();

            let command = tokio::select! {
                command = self.rx.recv() => command,
                _ = wait_until(next_expiry) => {
                    self.expire_waiters();
                    continue;
                }
            };

            let Some(command) = command else {
                info!("all scheduler handles dropped; stopping");
                let now = self.clock.now();
                let abandoned_running = self.core.running_len();
                let cancelled = self.core.finish_shutdown(now);
                self.release_waiters();
                return ShutdownReport {
                    cancelled,
                    abandoned_running,
                };
            };

            self.handle(command);
            self.serve_waiters();

            if self.core.is_drained() && !self.shutdown_replies.is_empty() {
                let cancelled = self.core.finish_shutdown(self.clock.now());
                let report = ShutdownReport {
                    cancelled,
                    abandoned_running: 0,
                };
                for reply in self.shutdown_replies.drain(..) {
                    let _ = reply.send(report.clone());
                }
                info!("scheduler service stopped");
                return report;
            }
        }
    }

    fn handle(&mut self, command: Command) {
        let now = self.clock.now();
        match command {
            Command::Submit { specs, reply } => {
                let _ = reply.send(self.core.submit_batch(specs, now));
            }
            Command::Pull {
                worker,
                wait,
                reply,
            } => {
                if wait.is_zero() {
                    self.serve_waiters();
                    if reply.is_closed() {
                        debug!(%worker, "worker gone before its pull was served");
                        return;
                    }
                    let lease = self.core.pull(worker, now);
                    self.deliver(reply, lease);
                } else if self.core.is_draining() {
                    let _ = reply.send(None);
                } else {
                    debug!(%worker, wait_ms = wait.as_millis() as u64, "worker waiting for a task");
                    self.waiters.push_back(Waiter {
                        worker,
                        expires: Instant::now() + wait,
                        reply,
                    });
                }
            }
            Command::Complete { task, reply } => {
                let _ = reply.send(self.core.complete(task, now));
            }
            Command::Fail {
                task,
                reason,
                reply,
            } => {
                let _ = reply.send(self.core.fail(task, reason, now));
            }
            Command::Cancel { task, reply } => {
                let _ = reply.send(self.core.cancel(task, now));
            }
            Command::Tick { reply } => {
                let _ = reply.send(self.core.tick(now));
            }
            Command::Inspect { task, reply } => {
                let _ = reply.send(self.core.inspect(task));
            }
            Command::GroupStats { group, reply } => {
                let _ = reply.send(self.core.group_stats(&group));
            }
            Command::AdmissionCap { set, reply } => {
                if let Some(cap) = set {
                    self.core.set_admission_cap(cap);
                }
                let _ = reply.send(self.core.admission_cap());
            }
            Command::ShedThreshold { set, reply } => {
                if let Some(threshold) = set {
                    self.core.set_shed_threshold(threshold);
                }
                let _ = reply.send(self.core.shed_threshold());
            }
            Command::SetLoadSignal { signal } => {
                self.core.set_load_signal(signal);
            }
            Command::ExportState { reply } => {
                let _ = reply.send(self.core.export_state());
            }
            Command::Shutdown { reply } => {
                self.core.begin_shutdown(now);
                self.release_waiters();
                self.shutdown_replies.push(reply);
            }
        }
    }

    /// Hand ready tasks to parked workers, oldest waiter first.
    fn serve_waiters(&mut self) {
        while let Some(front) = self.waiters.front() {
            if front.reply.is_closed() {
                self.waiters.pop_front();
                continue;
            }
            let lease = self.core.pull(front.worker.clone(), self.clock.now());
            let Some(lease) = lease else {
                break;
            };
            if let Some(waiter) = self.waiters.pop_front() {
                self.deliver(waiter.reply, Some(lease));
            }
        }
    }

    /// Send a lease; if the worker is gone, take the task back by
    /// cancelling it.
    fn deliver(&mut self, reply: Reply<Option<Lease>>, lease: Option<Lease>) {
        if let Err(Some(lease)) = reply.send(lease) {
            warn!(task = %lease.task, worker = %lease.worker, "worker left before receiving lease; cancelling");
            if let Err(e) = self.core.cancel(lease.task, self.clock.now()) {
                warn!(task = %lease.task, error = %e, "could not cancel undelivered lease");
            }
        }
    }

    fn expire_waiters(&mut self) {
        let now = Instant::now();
        let mut kept = VecDeque::with_capacity(self.waiters.len());
        for waiter in self.waiters.drain(..) {
            if waiter.expires <= now {
                let _ = waiter.reply.send(None);
            } else {
                kept.push_back(waiter);
            }
        }
        self.waiters = kept;
    }

    fn release_waiters(&mut self) {
        for waiter in self.waiters.drain(..) {
            let _ = waiter.reply.send(None);
        }
    }
}

async fn wait_until(deadline: Option<Instant>) {
    match deadline {
        Some(at) => tokio::time::sleep_until(at).await,
        None => std::future::pending().await,
    }
}

/// Cloneable client of a running [`SchedulerService`].
#[derive(Debug, Clone)]
pub struct SchedulerHandle {
    tx: mpsc::Sender<Command>,
}

impl SchedulerHandle {
    async fn request<T>(&self, make: impl FnOnce(Reply<T>) -> Command) -> Result<T> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(make(reply))
            .await
            .map_err(|_| SchedulerError::ServiceStopped)?;
        rx.await.map_err(|_| SchedulerError::ServiceStopped)
    }

    pub async fn submit(&self, spec: TaskSpec) -> Result<TaskId> {
        let ids = self.submit_batch(vec![spec]).await?;
        ids.into_iter()
            .next()
            .ok_or_else(|| SchedulerError::InvalidState("empty submission result".into()))
    }

    pub async fn submit_batch(&self, specs: Vec<TaskSpec>) -> Result<Vec<TaskId>> {
        let outcome = self
            .request(|reply| Command::Submit { specs, reply })
            .await?;
        Ok(outcome?)
    }

    /// Lease a task, waiting up to `wait` for one to become dispatchable.
    pub async fn pull(&self, worker: impl Into<WorkerId>, wait: Duration) -> Result<Option<Lease>> {
        let worker = worker.into();
        self.request(|reply| Command::Pull {
            worker,
            wait,
            reply,
        })
        .await
    }

    /// Non-blocking `pull`.
    pub async fn try_pull(&self, worker: impl Into<WorkerId>) -> Result<Option<Lease>> {
        self.pull(worker, Duration::ZERO).await
    }

    pub async fn complete(&self, task: TaskId) -> Result<()> {
        Ok(self
            .request(|reply| Command::Complete { task, reply })
            .await??)
    }

    pub async fn fail(&self, task: TaskId, reason: impl Into<String>) -> Result<()> {
        let reason = reason.into();
        Ok(self
            .request(|reply| Command::Fail {
                task,
                reason,
                reply,
            })
            .await??)
    }

    pub async fn cancel(&self, task: TaskId) -> Result<()> {
        Ok(self
            .request(|reply| Command::Cancel { task, reply })
            .await??)
    }

    pub async fn tick(&self) -> Result<TickReport> {
        self.request(|reply| Command::Tick { reply }).await
    }

    pub async fn inspect(&self, task: TaskId) -> Result<TaskSnapshot> {
        Ok(self
            .request(|reply| Command::Inspect { task, reply })
            .await??)
    }

    pub async fn group_stats(&self, group: impl Into<GroupId>) -> Result<Option<GroupStats>> {
        let group = group.into();
        self.request(|reply| Command::GroupStats { group, reply })
            .await
    }

    pub async fn admission_cap(&self) -> Result<f64> {
        self.request(|reply| Command::AdmissionCap { set: None, reply })
            .await
    }

    pub async fn set_admission_cap(&self, cap: f64) -> Result<()> {
        self.request(|reply| Command::AdmissionCap {
            set: Some(cap),
            reply,
        })
        .await
        .map(|_| ())
    }

    pub async fn shed_threshold(&self) -> Result<f64> {
        self.request(|reply| Command::ShedThreshold { set: None, reply })
            .await
    }

    pub async fn set_shed_threshold(&self, threshold: f64) -> Result<()> {
        self.request(|reply| Command::ShedThreshold {
            set: Some(threshold),
            reply,
        })
        .await
        .map(|_| ())
    }

    pub async fn set_load_signal(&self, signal: f64) -> Result<()> {
        self.tx
            .send(Command::SetLoadSignal { signal })
            .await
            .map_err(|_| SchedulerError::ServiceStopped)
    }

    pub async fn export_state(&self) -> Result<SchedulerState> {
        self.request(|reply| Command::ExportState { reply }).await
    }

    /// Stop accepting work, wait for running tasks to finish or time out,
    /// then discard whatever never started.
    ///
    /// Resolves once the drain is complete, so something must keep calling
    /// `complete`/`fail` or `tick` while it waits.
    pub async fn shutdown(&self) -> Result<ShutdownReport> {
        self.request(|reply| Command::Shutdown { reply }).await
    }

    /// Call `tick` every `period` until the service stops.
    pub fn spawn_ticker(&self, period: Duration) -> JoinHandle<()> {
        let handle = self.clone();
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                interval.tick().await;
                if handle.tick().await.is_err() {
                    debug!("ticker stopping: scheduler service gone");
                    break;
                }
            }
        })
    }
}
