// src/engine/core.rs

//! Pure core scheduler state machine.
//!
//! [`CoreScheduler`] owns every structure of the scheduler: the task store,
//! the dependency graph, the timing heaps, the ready queue, the resource
//! governor and the three feedback controllers. Each public operation is
//! one atomic step over all of them.
//!
//! The core has no channels, no tokio types and never reads a clock: the
//! caller passes `now` to every operation. Time never moves backwards inside
//! the core; an earlier `now` is treated as the latest time already seen.
//!
//! Whenever an operation observes a later time, matured tasks whose
//! dependencies are complete are promoted first, so the readiness invariant
//! holds at every observed point. Deadlines, timeouts, refills and the
//! controllers only run from `tick` (deadlines are also enforced by `pull`).

use std::collections::{HashSet, VecDeque};

use tracing::{debug, info, trace, warn};

use crate::adaptivity::{AdaptivityLoop, FeedbackLaw};
use crate::config::SchedulerConfig;
use crate::dag::{BatchNode, DependencyGraph, InsertionPlan, plan_insertion};
use crate::engine::state::{GroupRecord, SchedulerState, TaskRecord};
use crate::engine::{GroupStats, Lease, TickReport};
use crate::errors::{FailureReason, OperationError, RejectReason, SchedulerError};
use crate::fairness::{FairnessController, GroupQuota};
use crate::governor::ResourceGovernor;
use crate::shedding::LoadShedder;
use crate::store::{Task, TaskSnapshot, TaskSpec, TaskState, TaskStore};
use crate::timing::{ReadyKey, ReadyQueue, TimerHeap, effective_priority};
use crate::types::{GroupId, TaskId, Timestamp, WorkerId};

#[derive(Debug)]
pub struct CoreScheduler {
    config: SchedulerConfig,
    store: TaskStore,
    graph: DependencyGraph,
    maturation_heap: TimerHeap,
    deadline_heap: TimerHeap,
    timeout_heap: TimerHeap,
    ready: ReadyQueue,
    governor: ResourceGovernor,
    fairness: FairnessController,
    shedder: LoadShedder,
    adaptivity: AdaptivityLoop,
    /// Finished tasks in the order they finished, awaiting the sweep.
    retired: VecDeque<(Timestamp, TaskId)>,
    now: Timestamp,
    last_refill: Timestamp,
    draining: bool,
}

impl CoreScheduler {
    pub fn new(config: SchedulerConfig) -> Self {
        Self::starting_at(config, Timestamp::ZERO)
    }

    /// Create a scheduler whose clock starts at `now`.
    pub fn starting_at(config: SchedulerConfig, now: Timestamp) -> Self {
        Self {
            store: TaskStore::new(),
            graph: DependencyGraph::new(),
            maturation_heap: TimerHeap::new(),
            deadline_heap: TimerHeap::new(),
            timeout_heap: TimerHeap::new(),
            ready: ReadyQueue::new(),
            governor: ResourceGovernor::new(&config.global, config.scheduler.rate_window()),
            fairness: FairnessController::new(config.fairness.clone()),
            shedder: LoadShedder::new(config.shedding.clone()),
            adaptivity: AdaptivityLoop::new(config.adaptivity.clone()),
            retired: VecDeque::new(),
            now,
            last_refill: now,
            draining: false,
            config,
        }
    }

    /// Replace the default adaptivity control law.
    pub fn with_feedback_law(mut self, law: Box<dyn FeedbackLaw>) -> Self {
        self.adaptivity.set_law(law);
        self
    }

    pub fn config(&self) -> &SchedulerConfig {
        &self.config
    }

    /// Latest time observed by the core.
    pub fn now(&self) -> Timestamp {
        self.now
    }

    pub fn graph(&self) -> &DependencyGraph {
        &self.graph
    }

    /// Pending + Ready tasks.
    pub fn queue_len(&self) -> usize {
        self.store.queued_len()
    }

    pub fn running_len(&self) -> usize {
        self.store.running_len()
    }

    pub fn topological_order(&self) -> Vec<TaskId> {
        self.graph.topological_order()
    }

    /// Ready tasks in the order the last reprioritization left them.
    pub fn ready_order(&self) -> Vec<TaskId> {
        self.ready.iter().collect()
    }

    /// Ids of all tasks currently in `state`, ascending.
    pub fn tasks_in_state(&self, state: &TaskState) -> Vec<TaskId> {
        if state.is_queued() {
            return self
                .store
                .queued_ids()
                .filter(|id| self.store.state_of(*id) == Some(state))
                .collect();
        }
        let mut ids: Vec<TaskId> = self
            .store
            .iter()
            .filter(|t| t.state() == state)
            .map(|t| t.id)
            .collect();
        ids.sort_unstable();
        ids
    }

    pub fn is_draining(&self) -> bool {
        self.draining
    }

    /// Draining and nothing left running.
    pub fn is_drained(&self) -> bool {
        self.draining && self.store.running_len() == 0
    }

    pub fn admission_cap(&self) -> f64 {
        self.shedder.admission_cap()
    }

    pub fn set_admission_cap(&mut self, cap: f64) {
        self.shedder.set_admission_cap(cap);
    }

    pub fn shed_threshold(&self) -> f64 {
        self.shedder.threshold()
    }

    pub fn set_shed_threshold(&mut self, threshold: f64) {
        self.shedder.set_threshold(threshold);
    }

    pub fn load_signal(&self) -> f64 {
        self.adaptivity.load_signal()
    }

    /// External load signal consumed by the adaptivity loop on `tick`.
    pub fn set_load_signal(&mut self, signal: f64) {
        self.adaptivity.set_load_signal(signal);
    }

    pub fn global_refill_rate(&self) -> f64 {
        self.governor.global().refill_rate()
    }

    pub fn global_tokens(&self) -> f64 {
        self.governor.global().level()
    }

    // ---------------------------------------------------------------------
    // Submission
    // ---------------------------------------------------------------------

    pub fn submit(&mut self, spec: TaskSpec, now: Timestamp) -> Result<TaskId, RejectReason> {
        let ids = self.submit_batch(vec![spec], now)?;
        Ok(ids[0])
    }

    /// Admit several tasks atomically. Ids are returned in input order.
    ///
    /// Either every spec is accepted or none is, and a rejection leaves the
    /// scheduler untouched apart from shed accounting.
    pub fn submit_batch(
        &mut self,
        specs: Vec<TaskSpec>,
        now: Timestamp,
    ) -> Result<Vec<TaskId>, RejectReason> {
        let now = self.observe(now);
        if specs.is_empty() {
            return Ok(Vec::new());
        }

        match self.admit(&specs, now) {
            Ok((plan, victims)) => {
                let cascaded = self.evict(&victims, now);
                let ids = self.commit(specs, plan, now);
                self.shedder.record_admission(now, ids.len());
                debug!(
                    tasks = ?ids,
                    evicted = victims.len(),
                    cascaded = cascaded.len(),
                    "submission accepted"
                );
                Ok(ids)
            }
            Err(reason) => {
                warn!(%reason, tasks = specs.len(), "submission rejected");
                Err(reason)
            }
        }
    }

    /// Every admission check, without mutating anything but shed counters.
    fn admit(
        &mut self,
        specs: &[TaskSpec],
        now: Timestamp,
    ) -> Result<(InsertionPlan, Vec<TaskId>), RejectReason> {
        if self.draining {
            return Err(RejectReason::ShuttingDown);
        }
        for (i, spec) in specs.iter().enumerate() {
            self.validate_spec(i, spec)?;
        }

        if !self.shedder.admits(now, specs.len()) {
            return Err(RejectReason::RateCapped);
        }

        let max = self.config.scheduler.max_queue_size;
        let overflow = (self.store.queued_len() + specs.len()).saturating_sub(max);
        if overflow > 0 {
            let lowest = specs
                .iter()
                .map(|s| s.priority)
                .fold(f64::INFINITY, f64::min);
            if lowest < self.shedder.threshold() || specs.len() > max {
                self.shedder.record_shed(now, specs.len());
                return Err(RejectReason::LoadShed);
            }
        }

        let plan = plan_insertion(&self.store, &self.graph, specs, now)?;

        let victims = if overflow > 0 {
            match self.select_victims(overflow, &plan.ancestors) {
                Some(v) => v,
                None => {
                    self.shedder.record_shed(now, specs.len());
                    return Err(RejectReason::LoadShed);
                }
            }
        } else {
            Vec::new()
        };

        Ok((plan, victims))
    }

    fn validate_spec(&self, i: usize, spec: &TaskSpec) -> Result<(), RejectReason> {
        if !spec.priority.is_finite() || spec.priority < 0.0 || !spec.aging_rate.is_finite() {
            return Err(RejectReason::InfeasibleSchedule(format!(
                "batch entry #{i}: priority must be finite and non-negative"
            )));
        }

        let group_capacity = match self.governor.group(&spec.group) {
            Some(account) => account.bucket.capacity(),
            None => self.config.group_settings(&spec.group).capacity,
        };
        let cost = f64::from(spec.token_cost);
        if cost > group_capacity || cost > self.governor.global().capacity() {
            return Err(RejectReason::InfeasibleSchedule(format!(
                "batch entry #{i}: token cost {} exceeds bucket capacity",
                spec.token_cost
            )));
        }
        Ok(())
    }

    /// The `count` queued tasks that would be dispatched last, excluding
    /// anything the incoming batch depends on. `None` if there are not enough.
    fn select_victims(&self, count: usize, protected: &HashSet<TaskId>) -> Option<Vec<TaskId>> {
        let now = self.now;
        let mut candidates: Vec<ReadyKey> = self
            .store
            .queued_ids()
            .filter(|id| !protected.contains(id))
            .filter_map(|id| self.store.get(id))
            .map(|t| self.ready_key(t, now))
            .collect();
        if candidates.len() < count {
            return None;
        }
        candidates.sort_unstable_by(|a, b| b.cmp(a));
        Some(candidates.into_iter().take(count).map(|k| k.id).collect())
    }

    fn evict(&mut self, victims: &[TaskId], now: Timestamp) -> Vec<TaskId> {
        let mut cascaded = Vec::new();
        for &id in victims {
            if self.store.state_of(id).is_some_and(TaskState::is_queued) {
                warn!(task = %id, "evicting task to admit new work");
                cascaded.extend(self.fail_task(id, FailureReason::LoadShed, now));
            }
        }
        if !victims.is_empty() {
            self.shedder.record_shed(now, victims.len());
        }
        cascaded
    }

    fn commit(&mut self, specs: Vec<TaskSpec>, plan: InsertionPlan, now: Timestamp) -> Vec<TaskId> {
        let ids: Vec<TaskId> = specs.iter().map(|_| self.store.allocate_id()).collect();
        let mut specs: Vec<Option<TaskSpec>> = specs.into_iter().map(Some).collect();

        for &i in &plan.order {
            let Some(spec) = specs[i].take() else {
                continue;
            };
            let id = ids[i];
            let deps: Vec<TaskId> = plan.deps[i]
                .iter()
                .map(|d| match *d {
                    BatchNode::Existing(dep) => dep,
                    BatchNode::Sibling(j) => ids[j],
                })
                .collect();

            let settings = self.config.group_settings(&spec.group);
            self.governor.ensure_group(&spec.group, &settings).live += 1;

            let mut task = Task {
                id,
                group: spec.group,
                priority: spec.priority,
                aging_rate: spec.aging_rate,
                declared_maturation: spec.maturation,
                declared_deadline: spec.deadline,
                maturation: plan.maturation[i],
                deadline: plan.deadline[i],
                token_cost: spec.token_cost,
                max_execution_time: spec.max_execution_time,
                job_time_estimate: spec.job_time_estimate,
                dependencies: deps.clone(),
                payload: spec.payload,
                submitted_at: now,
                enqueued_at: None,
                started_at: None,
                finished_at: None,
                worker: None,
                effective_priority: 0.0,
                state: TaskState::Pending,
            };
            task.effective_priority = self.priority_of(&task, now);

            let (maturation, deadline) = (task.maturation, task.deadline);
            self.graph.insert(id, &deps);
            self.store.insert(task);

            if let Some(d) = deadline {
                self.deadline_heap.push(d, id);
            }
            if maturation > now {
                self.maturation_heap.push(maturation, id);
            }
            if self.is_eligible(id, now) {
                self.make_ready(id, now);
            }
        }

        for (id, d) in plan.ancestor_deadlines {
            if let Some(task) = self.store.get_mut(id) {
                debug!(task = %id, deadline = %d, "deadline tightened by new dependent");
                task.deadline = Some(d);
            }
            self.deadline_heap.push(d, id);
            if let Some(key) = self.ready.key(id).copied() {
                self.ready.insert(ReadyKey {
                    deadline: Some(d),
                    ..key
                });
            }
        }

        ids
    }

    // ---------------------------------------------------------------------
    // Dispatch
    // ---------------------------------------------------------------------

    /// Lease the highest-priority ready task that clears the resource
    /// governor, or `None`.
    ///
    /// Missed deadlines are enforced and every ready task is reprioritized
    /// first. If the head of the queue is blocked, the queue is scanned in
    /// order; the queue itself is not reordered by the scan.
    pub fn pull(&mut self, worker: WorkerId, now: Timestamp) -> Option<Lease> {
        let now = self.observe(now);
        if self.draining {
            return None;
        }

        self.expire_deadlines(now);
        self.reprioritize(now);

        let mut chosen = None;
        for id in self.ready.iter() {
            let Some(task) = self.store.get(id) else {
                continue;
            };
            match self.governor.check(&task.group, task.token_cost, now) {
                Ok(()) => {
                    chosen = Some(id);
                    break;
                }
                Err(blocked) => {
                    trace!(task = %id, group = %task.group, %blocked, "ready task held back");
                }
            }
        }
        let id = chosen?;

        self.ready.remove(id);
        self.force_transition(id, TaskState::Running, now, "dispatch");

        let task = self.store.get_mut(id)?;
        task.worker = Some(worker.clone());
        let waited = now.duration_since(task.enqueued_at.unwrap_or(now));
        let lease = Lease {
            task: id,
            group: task.group.clone(),
            payload: task.payload.clone(),
            token_cost: task.token_cost,
            worker,
            leased_at: now,
            expires_at: now + task.max_execution_time,
        };

        self.governor
            .charge(&lease.group, lease.token_cost, now, waited);
        self.fairness.record(&lease.group, lease.token_cost, now);
        self.timeout_heap.push(lease.expires_at, id);

        debug!(
            task = %id,
            group = %lease.group,
            worker = %lease.worker,
            waited_ms = waited.as_millis() as u64,
            "task dispatched"
        );
        Some(lease)
    }

    // ---------------------------------------------------------------------
    // Completion, failure, cancellation
    // ---------------------------------------------------------------------

    /// Mark a running task as completed and release its dependents.
    pub fn complete(&mut self, id: TaskId, now: Timestamp) -> Result<(), OperationError> {
        let now = self.observe(now);
        self.require_running(id, "complete")?;
        self.finish(id, TaskState::Completed, now, "complete")?;
        debug!(task = %id, "task completed");

        let dependents = self.graph.dependents_of(id).to_vec();
        for dependent in dependents {
            if self.is_eligible(dependent, now) {
                self.make_ready(dependent, now);
            }
        }
        Ok(())
    }

    /// Mark a running task as failed by its worker. Dependents can no
    /// longer run and are failed as well.
    pub fn fail(
        &mut self,
        id: TaskId,
        reason: impl Into<String>,
        now: Timestamp,
    ) -> Result<(), OperationError> {
        let now = self.observe(now);
        self.require_running(id, "fail")?;
        let reason = reason.into();
        info!(task = %id, %reason, "task failed by worker");
        self.fail_task(id, FailureReason::Worker(reason), now);
        Ok(())
    }

    /// Cancel a task in any non-terminal state.
    ///
    /// Cancelling a running task only changes its state and accounting; the
    /// worker is expected to notice through `inspect`.
    pub fn cancel(&mut self, id: TaskId, now: Timestamp) -> Result<(), OperationError> {
        let now = self.observe(now);
        self.finish(id, TaskState::Cancelled, now, "cancel")?;
        info!(task = %id, "task cancelled");
        self.cascade(id, now);
        Ok(())
    }

    fn require_running(&self, id: TaskId, operation: &'static str) -> Result<(), OperationError> {
        match self.store.state_of(id) {
            None => Err(OperationError::UnknownTask(id)),
            Some(TaskState::Running) => Ok(()),
            Some(other) => Err(OperationError::InvalidTransition {
                task: id,
                from: other.clone(),
                operation,
            }),
        }
    }

    /// Move a task to a terminal state and settle its accounting.
    fn finish(
        &mut self,
        id: TaskId,
        next: TaskState,
        now: Timestamp,
        operation: &'static str,
    ) -> Result<TaskState, OperationError> {
        let prev = self.store.transition(id, next.clone(), now, operation)?;
        self.ready.remove(id);
        self.retired.push_back((now, id));

        let Some(task) = self.store.get(id) else {
            return Ok(prev);
        };
        let group = task.group.clone();
        let latency = now.duration_since(task.submitted_at);

        if let Some(account) = self.governor.group_mut(&group) {
            account.live = account.live.saturating_sub(1);
            if prev == TaskState::Running {
                account.running = account.running.saturating_sub(1);
            }
            match next {
                TaskState::Completed => account.completed += 1,
                TaskState::Failed(_) => account.failed += 1,
                TaskState::Cancelled => account.cancelled += 1,
                _ => {}
            }
        }

        // Only work a worker actually ran feeds the adaptivity metrics.
        if prev == TaskState::Running {
            match next {
                TaskState::Completed => self.adaptivity.record_outcome(now, latency, false),
                TaskState::Failed(_) => self.adaptivity.record_outcome(now, latency, true),
                _ => {}
            }
        }

        Ok(prev)
    }

    /// Fail a task the scheduler itself gave up on, plus its dependents.
    /// Returns the cascaded dependents.
    fn fail_task(&mut self, id: TaskId, reason: FailureReason, now: Timestamp) -> Vec<TaskId> {
        if let Err(e) = self.finish(id, TaskState::Failed(reason), now, "fail") {
            panic!("scheduler could not fail {id}: {e}");
        }
        self.cascade(id, now)
    }

    /// Fail every non-terminal transitive dependent of `id`.
    fn cascade(&mut self, id: TaskId, now: Timestamp) -> Vec<TaskId> {
        let mut failed = Vec::new();
        for dependent in self.graph.descendants(id) {
            if !self.store.state_of(dependent).is_some_and(|s| !s.is_terminal()) {
                continue;
            }
            let next = TaskState::Failed(FailureReason::InfeasibleSchedule);
            if let Err(e) = self.finish(dependent, next, now, "cascade") {
                panic!("scheduler could not fail dependent {dependent}: {e}");
            }
            warn!(task = %dependent, dependency = %id, "dependency did not complete; task failed");
            failed.push(dependent);
        }
        failed
    }

    // ---------------------------------------------------------------------
    // Tick
    // ---------------------------------------------------------------------

    /// Periodic maintenance: refill buckets, enforce timeouts and deadlines,
    /// promote matured tasks, then run the fairness, shedding and adaptivity
    /// controllers.
    pub fn tick(&mut self, now: Timestamp) -> TickReport {
        let now = self.advance_clock(now);
        let mut report = TickReport {
            now,
            ..TickReport::default()
        };

        self.governor.refill(now.duration_since(self.last_refill));
        self.last_refill = now;

        for (at, id) in self.timeout_heap.pop_expired(now) {
            let Some(task) = self.store.get(id) else {
                continue;
            };
            let expired = *task.state() == TaskState::Running
                && task.started_at.map(|s| s + task.max_execution_time) == Some(at);
            if !expired {
                continue;
            }
            warn!(task = %id, expired_at = %at, "task exceeded max execution time");
            report.timed_out.push(id);
            let cascaded = self.fail_task(id, FailureReason::Timeout, now);
            report.cascaded.extend(cascaded);
        }

        let (missed, cascaded) = self.expire_deadlines(now);
        report.deadline_missed = missed;
        report.cascaded.extend(cascaded);

        report.promoted = self.promote_matured(now);
        report.swept = self.sweep_retired(now);

        let quotas: Vec<GroupQuota> = self
            .governor
            .groups()
            .map(|(group, account)| GroupQuota {
                group: group.clone(),
                quota: account.quota,
                live: account.live > 0,
            })
            .collect();
        self.fairness.update(now, &quotas);

        self.shedder.update(now);
        report.admission_cap = self.shedder.admission_cap();

        let rate = self
            .adaptivity
            .next_rate(now, self.governor.global().refill_rate());
        self.governor.global_mut().set_refill_rate(rate);
        report.global_refill_rate = rate;

        debug!(
            now = %now,
            promoted = report.promoted.len(),
            deadline_missed = report.deadline_missed.len(),
            timed_out = report.timed_out.len(),
            queued = self.store.queued_len(),
            running = self.store.running_len(),
            "tick"
        );
        report
    }

    /// Forget finished tasks older than the retention period.
    ///
    /// A task that some live dependent still points at is kept and looked at
    /// again one retention period later.
    fn sweep_retired(&mut self, now: Timestamp) -> Vec<TaskId> {
        let retention = self.config.scheduler.terminal_retention();
        let mut due = Vec::new();
        while let Some(&(at, id)) = self.retired.front() {
            if at + retention > now {
                break;
            }
            self.retired.pop_front();
            due.push(id);
        }

        let mut swept = Vec::new();
        for id in due {
            let needed = self
                .graph
                .dependents_of(id)
                .iter()
                .any(|d| self.store.state_of(*d).is_some_and(|s| !s.is_terminal()));
            if needed {
                self.retired.push_back((now, id));
                continue;
            }
            if self.store.remove(id).is_some() {
                self.graph.remove(id);
                swept.push(id);
            }
        }
        if !swept.is_empty() {
            debug!(swept = swept.len(), retained = self.store.len(), "finished tasks dropped");
        }
        swept
    }

    fn expire_deadlines(&mut self, now: Timestamp) -> (Vec<TaskId>, Vec<TaskId>) {
        let mut missed = Vec::new();
        let mut cascaded = Vec::new();
        for (at, id) in self.deadline_heap.pop_due(now) {
            let Some(task) = self.store.get(id) else {
                continue;
            };
            if !task.state().is_queued() || task.deadline != Some(at) {
                continue;
            }
            warn!(task = %id, deadline = %at, "deadline missed");
            missed.push(id);
            cascaded.extend(self.fail_task(id, FailureReason::DeadlineMissed, now));
        }
        (missed, cascaded)
    }

    fn promote_matured(&mut self, now: Timestamp) -> Vec<TaskId> {
        let mut promoted = Vec::new();
        for (_, id) in self.maturation_heap.pop_due(now) {
            if self.is_eligible(id, now) {
                self.make_ready(id, now);
                promoted.push(id);
            }
        }
        promoted
    }

    // ---------------------------------------------------------------------
    // Readiness and priority
    // ---------------------------------------------------------------------

    /// Pending, matured and every dependency completed.
    fn is_eligible(&self, id: TaskId, now: Timestamp) -> bool {
        let Some(task) = self.store.get(id) else {
            return false;
        };
        *task.state() == TaskState::Pending
            && task.maturation <= now
            && self.dependencies_complete(id)
    }

    fn dependencies_complete(&self, id: TaskId) -> bool {
        self.graph
            .dependencies_of(id)
            .iter()
            .all(|d| self.store.state_of(*d) == Some(&TaskState::Completed))
    }

    fn make_ready(&mut self, id: TaskId, now: Timestamp) {
        self.force_transition(id, TaskState::Ready, now, "promote");
        let Some(task) = self.store.get(id) else {
            return;
        };
        let key = self.ready_key(task, now);
        if let Some(task) = self.store.get_mut(id) {
            task.effective_priority = key.priority;
        }
        self.ready.insert(key);
        debug!(task = %id, priority = key.priority, "task ready");
    }

    fn priority_of(&self, task: &Task, now: Timestamp) -> f64 {
        effective_priority(
            task,
            now,
            self.fairness.adjustment(&task.group),
            &self.config.scheduler,
        )
    }

    fn ready_key(&self, task: &Task, now: Timestamp) -> ReadyKey {
        ReadyKey {
            priority: self.priority_of(task, now),
            deadline: task.deadline,
            submitted_at: task.submitted_at,
            id: task.id,
        }
    }

    fn reprioritize(&mut self, now: Timestamp) {
        let store = &mut self.store;
        let fairness = &self.fairness;
        let params = &self.config.scheduler;
        self.ready.reprioritize(|key| {
            let Some(task) = store.get_mut(key.id) else {
                return *key;
            };
            let priority =
                effective_priority(task, now, fairness.adjustment(&task.group), params);
            task.effective_priority = priority;
            ReadyKey {
                priority,
                deadline: task.deadline,
                ..*key
            }
        });
    }

    fn force_transition(&mut self, id: TaskId, next: TaskState, now: Timestamp, op: &'static str) {
        if let Err(e) = self.store.transition(id, next, now, op) {
            panic!("scheduler state machine violated: {e}");
        }
    }

    fn advance_clock(&mut self, now: Timestamp) -> Timestamp {
        if now > self.now {
            self.now = now;
        } else if now < self.now {
            trace!(given = %now, current = %self.now, "clock regression clamped");
        }
        self.now
    }

    fn observe(&mut self, now: Timestamp) -> Timestamp {
        let now = self.advance_clock(now);
        self.promote_matured(now);
        now
    }

    // ---------------------------------------------------------------------
    // Inspection
    // ---------------------------------------------------------------------

    pub fn inspect(&self, id: TaskId) -> Result<TaskSnapshot, OperationError> {
        self.store
            .get(id)
            .map(|t| t.snapshot(self.now))
            .ok_or(OperationError::UnknownTask(id))
    }

    pub fn group_stats(&self, group: &GroupId) -> Option<GroupStats> {
        let account = self.governor.group(group)?;
        Some(GroupStats {
            group: group.clone(),
            tokens: account.bucket.level(),
            capacity: account.bucket.capacity(),
            refill_rate: account.bucket.refill_rate(),
            hard_rate_limit: account.limit.limit(),
            quota: account.quota,
            tokens_consumed: account.bucket.consumed(),
            window_tokens: self.fairness.window_tokens(group),
            utilization: self.fairness.utilization(group),
            priority_adjustment: self.fairness.adjustment(group),
            live: account.live,
            running: account.running,
            dispatched: account.dispatched,
            completed: account.completed,
            failed: account.failed,
            cancelled: account.cancelled,
            total_wait: account.total_wait,
        })
    }

    /// Ids of every group seen so far.
    pub fn groups(&self) -> Vec<GroupId> {
        self.governor.groups().map(|(g, _)| g.clone()).collect()
    }

    // ---------------------------------------------------------------------
    // Shutdown
    // ---------------------------------------------------------------------

    /// Stop accepting submissions and stop dispatching.
    pub fn begin_shutdown(&mut self, now: Timestamp) {
        self.observe(now);
        if !self.draining {
            info!(
                running = self.store.running_len(),
                queued = self.store.queued_len(),
                "scheduler draining"
            );
        }
        self.draining = true;
    }

    /// Cancel every task that never started. Returns their ids.
    pub fn finish_shutdown(&mut self, now: Timestamp) -> Vec<TaskId> {
        let now = self.advance_clock(now);
        self.draining = true;

        let queued: Vec<TaskId> = self.store.queued_ids().collect();

        for &id in &queued {
            if let Err(e) = self.finish(id, TaskState::Cancelled, now, "shutdown") {
                panic!("could not discard {id} on shutdown: {e}");
            }
        }
        info!(cancelled = queued.len(), "scheduler drained");
        queued
    }

    // ---------------------------------------------------------------------
    // State export / restore
    // ---------------------------------------------------------------------

    pub fn export_state(&self) -> SchedulerState {
        let tasks = self
            .graph
            .topological_order()
            .into_iter()
            .filter_map(|id| self.store.get(id))
            .filter(|t| !t.state().is_terminal())
            .map(|t| {
                let live_deps = t
                    .dependencies
                    .iter()
                    .copied()
                    .filter(|d| self.store.state_of(*d).is_some_and(|s| !s.is_terminal()))
                    .collect();
                TaskRecord::from_task(t, live_deps)
            })
            .collect();

        let groups = self
            .governor
            .groups()
            .map(|(group, account)| GroupRecord {
                group: group.clone(),
                tokens: account.bucket.level(),
                priority_adjustment: self.fairness.adjustment(group),
            })
            .collect();

        SchedulerState {
            now: self.now,
            next_id: self.store.peek_next_id().0,
            tasks,
            groups,
            global_tokens: self.governor.global().level(),
            global_refill_rate: self.governor.global().refill_rate(),
            admission_cap: self.shedder.admission_cap(),
            shed_threshold: self.shedder.threshold(),
        }
    }

    /// Rebuild a scheduler from exported state.
    ///
    /// Dependencies missing from the state are taken to have completed.
    pub fn restore(config: SchedulerConfig, state: SchedulerState) -> Result<Self, SchedulerError> {
        let now = state.now;
        let mut core = Self::starting_at(config, now);

        core.governor.global_mut().set_level(state.global_tokens);
        core.governor
            .global_mut()
            .set_refill_rate(state.global_refill_rate);
        core.shedder.set_admission_cap(state.admission_cap);
        core.shedder.set_threshold(state.shed_threshold);

        for g in &state.groups {
            let settings = core.config.group_settings(&g.group);
            core.governor
                .ensure_group(&g.group, &settings)
                .bucket
                .set_level(g.tokens);
            core.fairness
                .restore_adjustment(&g.group, g.priority_adjustment);
        }

        let listed: HashSet<TaskId> = state.tasks.iter().map(|r| r.id).collect();
        let mut max_id = 0;

        for record in state.tasks {
            let id = record.id;
            if core.store.contains(id) {
                return Err(SchedulerError::InvalidState(format!("duplicate task {id}")));
            }
            if record.state.is_terminal() {
                return Err(SchedulerError::InvalidState(format!(
                    "{id} is {} but only live tasks can be restored",
                    record.state
                )));
            }

            let mut deps = Vec::with_capacity(record.dependencies.len());
            for dep in &record.dependencies {
                if core.graph.contains(*dep) {
                    deps.push(*dep);
                } else if listed.contains(dep) {
                    return Err(SchedulerError::InvalidState(format!(
                        "{id} is listed before its dependency {dep}"
                    )));
                }
            }
            if record.state != TaskState::Pending && !deps.is_empty() {
                return Err(SchedulerError::InvalidState(format!(
                    "{id} is {} while dependencies are unfinished",
                    record.state
                )));
            }

            let mut task = record.into_task();
            task.dependencies = deps.clone();
            max_id = max_id.max(id.0 + 1);

            let settings = core.config.group_settings(&task.group);
            let account = core.governor.ensure_group(&task.group, &settings);
            account.live += 1;
            if *task.state() == TaskState::Running {
                account.running += 1;
            }

            core.graph.insert(id, &deps);
            match task.state() {
                TaskState::Running => {
                    let started = task.started_at.unwrap_or(now);
                    core.timeout_heap.push(started + task.max_execution_time, id);
                }
                TaskState::Ready => {
                    let key = core.ready_key(&task, now);
                    task.effective_priority = key.priority;
                    core.ready.insert(key);
                }
                _ => {
                    task.effective_priority = core.priority_of(&task, now);
                    if task.maturation > now {
                        core.maturation_heap.push(task.maturation, id);
                    }
                }
            }
            if let (Some(d), true) = (task.deadline, task.state().is_queued()) {
                core.deadline_heap.push(d, id);
            }
            core.store.insert(task);
        }

        core.store.bump_next_id(state.next_id.max(max_id));

        let pending = core.tasks_in_state(&TaskState::Pending);
        for id in pending {
            if core.is_eligible(id, now) {
                core.make_ready(id, now);
            }
        }

        info!(
            tasks = core.store.len(),
            groups = core.governor.groups().count(),
            "scheduler state restored"
        );
        Ok(core)
    }

    // ---------------------------------------------------------------------
    // Diagnostics
    // ---------------------------------------------------------------------

    /// Re-check the structural invariants from scratch.
    pub fn check_invariants(&self) -> Result<(), String> {
        self.graph.verify()?;

        if self.graph.len() != self.store.len() {
            return Err(format!(
                "graph has {} nodes but the store has {} tasks",
                self.graph.len(),
                self.store.len()
            ));
        }

        let mut ready = 0;
        for task in self.store.iter() {
            if !task.state().is_queued() {
                continue;
            }
            let should_be_ready =
                task.maturation <= self.now && self.dependencies_complete(task.id);
            let is_ready = *task.state() == TaskState::Ready;
            if should_be_ready != is_ready {
                return Err(format!(
                    "{} is {} but eligible={should_be_ready} (maturation {}, now {})",
                    task.id,
                    task.state(),
                    task.maturation,
                    self.now
                ));
            }
            if is_ready {
                ready += 1;
                if !self.ready.contains(task.id) {
                    return Err(format!("{} is Ready but not queued", task.id));
                }
            }
        }
        if ready != self.ready.len() {
            return Err(format!(
                "ready queue holds {} entries for {ready} ready tasks",
                self.ready.len()
            ));
        }

        let global = self.governor.global();
        if global.level() < 0.0 || global.level() > global.capacity() {
            return Err(format!("global bucket level {} out of bounds", global.level()));
        }
        for (group, account) in self.governor.groups() {
            let level = account.bucket.level();
            if level < 0.0 || level > account.bucket.capacity() {
                return Err(format!("bucket of group {group} at {level} out of bounds"));
            }
        }

        if self.store.queued_len() > self.config.scheduler.max_queue_size {
            return Err(format!(
                "{} queued tasks exceed max queue size {}",
                self.store.queued_len(),
                self.config.scheduler.max_queue_size
            ));
        }
        Ok(())
    }
}
