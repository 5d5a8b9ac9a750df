// src/store/store.rs

//! The task store: single owner of task records and their state.

use std::collections::{BTreeSet, HashMap};

use tracing::debug;

use crate::errors::OperationError;
use crate::store::task::{Task, TaskState};
use crate::types::{TaskId, Timestamp};

/// Owns every task record and is the only place task state changes.
///
/// Other components keep ids (plus whatever they need for their own index)
/// and go through the store for everything else.
#[derive(Debug, Default)]
pub struct TaskStore {
    tasks: HashMap<TaskId, Task>,
    /// Pending + Ready ids, so queue-wide scans skip finished tasks.
    queued: BTreeSet<TaskId>,
    next_id: u64,
    pending: usize,
    ready: usize,
    running: usize,
}

impl TaskStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Id the next inserted task will receive.
    pub fn peek_next_id(&self) -> TaskId {
        TaskId(self.next_id)
    }

    /// Reserve the next id.
    pub fn allocate_id(&mut self) -> TaskId {
        let id = TaskId(self.next_id);
        self.next_id += 1;
        id
    }

    /// Raise the id counter so restored ids are never reused.
    pub(crate) fn bump_next_id(&mut self, at_least: u64) {
        self.next_id = self.next_id.max(at_least);
    }

    pub(crate) fn insert(&mut self, task: Task) {
        self.count(&task.state, 1);
        if task.state.is_queued() {
            self.queued.insert(task.id);
        }
        debug!(task = %task.id, group = %task.group, state = %task.state, "task stored");
        self.tasks.insert(task.id, task);
    }

    /// Drop a finished task. Live tasks are never removed.
    pub(crate) fn remove(&mut self, id: TaskId) -> Option<Task> {
        if !self.tasks.get(&id)?.state.is_terminal() {
            return None;
        }
        self.tasks.remove(&id)
    }

    pub fn get(&self, id: TaskId) -> Option<&Task> {
        self.tasks.get(&id)
    }

    /// Mutable access for index fields (effective priority, propagated
    /// times). State changes must go through [`TaskStore::transition`].
    pub(crate) fn get_mut(&mut self, id: TaskId) -> Option<&mut Task> {
        self.tasks.get_mut(&id)
    }

    pub fn contains(&self, id: TaskId) -> bool {
        self.tasks.contains_key(&id)
    }

    pub fn state_of(&self, id: TaskId) -> Option<&TaskState> {
        self.tasks.get(&id).map(|t| &t.state)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Task> {
        self.tasks.values()
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    /// Pending + Ready.
    pub fn queued_len(&self) -> usize {
        self.pending + self.ready
    }

    /// Ids of Pending and Ready tasks, ascending.
    pub fn queued_ids(&self) -> impl Iterator<Item = TaskId> + '_ {
        self.queued.iter().copied()
    }

    pub fn pending_len(&self) -> usize {
        self.pending
    }

    pub fn ready_len(&self) -> usize {
        self.ready
    }

    pub fn running_len(&self) -> usize {
        self.running
    }

    /// Apply a state transition, stamping start/finish times.
    ///
    /// Returns the previous state, or `InvalidTransition` if the state
    /// machine forbids the move. Nothing changes on error.
    pub fn transition(
        &mut self,
        id: TaskId,
        next: TaskState,
        now: Timestamp,
        operation: &'static str,
    ) -> Result<TaskState, OperationError> {
        let task = self
            .tasks
            .get_mut(&id)
            .ok_or(OperationError::UnknownTask(id))?;

        if !task.state.can_transition_to(&next) {
            return Err(OperationError::InvalidTransition {
                task: id,
                from: task.state.clone(),
                operation,
            });
        }

        match next {
            TaskState::Ready => task.enqueued_at = Some(now),
            TaskState::Running => task.started_at = Some(now),
            ref s if s.is_terminal() => task.finished_at = Some(now),
            _ => {}
        }

        let prev = std::mem::replace(&mut task.state, next);
        debug!(task = %id, from = %prev, to = %task.state, "task transition");

        let new_state = task.state.clone();
        self.count(&prev, -1);
        self.count(&new_state, 1);
        if new_state.is_queued() {
            self.queued.insert(id);
        } else {
            self.queued.remove(&id);
        }
        Ok(prev)
    }

    fn count(&mut self, state: &TaskState, delta: isize) {
        let slot = match state {
            TaskState::Pending => &mut self.pending,
            TaskState::Ready => &mut self.ready,
            TaskState::Running => &mut self.running,
            _ => return,
        };
        *slot = slot.saturating_add_signed(delta);
    }
}
