// src/timing/heaps.rs

use std::cmp::Reverse;
use std::collections::BinaryHeap;

use crate::types::{TaskId, Timestamp};

/// Min-heap of `(time, task)` entries.
///
/// Entries are never removed eagerly when a task changes state or its time
/// moves; whoever pops an entry re-validates it against the task store and
/// drops it if stale. A task may therefore appear more than once.
#[derive(Debug, Default, Clone)]
pub struct TimerHeap {
    heap: BinaryHeap<Reverse<(Timestamp, TaskId)>>,
}

impl TimerHeap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, at: Timestamp, task: TaskId) {
        self.heap.push(Reverse((at, task)));
    }

    /// Earliest entry without removing it.
    pub fn peek(&self) -> Option<(Timestamp, TaskId)> {
        self.heap.peek().map(|Reverse(e)| *e)
    }

    /// Remove and return every entry with `time <= now`, earliest first.
    pub fn pop_due(&mut self, now: Timestamp) -> Vec<(Timestamp, TaskId)> {
        self.pop_while(|at| at <= now)
    }

    /// Remove and return every entry with `time < now`, earliest first.
    pub fn pop_expired(&mut self, now: Timestamp) -> Vec<(Timestamp, TaskId)> {
        self.pop_while(|at| at < now)
    }

    fn pop_while(&mut self, due: impl Fn(Timestamp) -> bool) -> Vec<(Timestamp, TaskId)> {
        let mut out = Vec::new();
        while let Some(Reverse((at, _))) = self.heap.peek() {
            if !due(*at) {
                break;
            }
            if let Some(Reverse(entry)) = self.heap.pop() {
                out.push(entry);
            }
        }
        out
    }

    pub fn len(&self) -> usize {
        self.heap.len()
    }

    pub fn is_empty(&self) -> bool {
        self.heap.is_empty()
    }
}
