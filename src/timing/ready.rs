// src/timing/ready.rs

use std::cmp::Ordering;
use std::collections::{BTreeSet, HashMap};

use crate::types::{TaskId, Timestamp};

/// Sort key of a ready task.
///
/// Orders by effective priority (highest first), then earlier deadline (no
/// deadline last), earlier submission, lower id. The order is total and
/// deterministic.
#[derive(Debug, Clone, Copy)]
pub struct ReadyKey {
    pub priority: f64,
    pub deadline: Option<Timestamp>,
    pub submitted_at: Timestamp,
    pub id: TaskId,
}

impl Ord for ReadyKey {
    fn cmp(&self, other: &Self) -> Ordering {
        other
            .priority
            .total_cmp(&self.priority)
            .then_with(|| match (self.deadline, other.deadline) {
                (Some(a), Some(b)) => a.cmp(&b),
                (Some(_), None) => Ordering::Less,
                (None, Some(_)) => Ordering::Greater,
                (None, None) => Ordering::Equal,
            })
            .then_with(|| self.submitted_at.cmp(&other.submitted_at))
            .then_with(|| self.id.cmp(&other.id))
    }
}

impl PartialOrd for ReadyKey {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl PartialEq for ReadyKey {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for ReadyKey {}

/// Ordered set of ready tasks.
///
/// Holds only `(id, key)` pairs; the task record stays in the store. Keys are
/// refreshed explicitly with [`ReadyQueue::reprioritize`] before each
/// selection rather than continuously.
#[derive(Debug, Default, Clone)]
pub struct ReadyQueue {
    order: BTreeSet<ReadyKey>,
    keys: HashMap<TaskId, ReadyKey>,
}

impl ReadyQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a task, replacing its previous key if present.
    pub fn insert(&mut self, key: ReadyKey) {
        if let Some(old) = self.keys.insert(key.id, key) {
            self.order.remove(&old);
        }
        self.order.insert(key);
    }

    pub fn remove(&mut self, id: TaskId) -> bool {
        match self.keys.remove(&id) {
            Some(key) => {
                self.order.remove(&key);
                true
            }
            None => false,
        }
    }

    pub fn contains(&self, id: TaskId) -> bool {
        self.keys.contains_key(&id)
    }

    pub fn key(&self, id: TaskId) -> Option<&ReadyKey> {
        self.keys.get(&id)
    }

    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    /// Task ids in dispatch order.
    pub fn iter(&self) -> impl Iterator<Item = TaskId> + '_ {
        self.order.iter().map(|k| k.id)
    }

    /// Recompute every key with `update` and rebuild the order.
    pub fn reprioritize(&mut self, mut update: impl FnMut(&ReadyKey) -> ReadyKey) {
        let refreshed: Vec<ReadyKey> = self.order.iter().map(&mut update).collect();
        self.order = refreshed.iter().copied().collect();
        self.keys = refreshed.into_iter().map(|k| (k.id, k)).collect();
    }
}
