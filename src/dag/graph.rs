// src/dag/graph.rs

use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashMap, HashSet, VecDeque};

use petgraph::algo::toposort;
use petgraph::graphmap::DiGraphMap;

use crate::types::TaskId;

/// Internal node structure: immediate deps, dependents and the node's slot in
/// the cached topological order.
#[derive(Debug, Clone, PartialEq, Eq)]
struct DagNode {
    /// Direct dependencies: tasks that must complete before this one can run.
    deps: Vec<TaskId>,
    /// Direct dependents: tasks that list this one as a dependency.
    dependents: Vec<TaskId>,
    /// Position in the cached topological order (deps always sort first).
    position: u64,
}

/// Arena-style dependency DAG keyed by task id.
///
/// Dependencies are immutable once a task is accepted and may only point at
/// tasks that already exist, so a new node always has a valid slot at the end
/// of the cached order. The order is therefore extended incrementally and
/// never recomputed. Forward references are only possible inside a batch,
/// and [`DependencyGraph::plan_batch_order`] checks those before anything is
/// mutated.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DependencyGraph {
    nodes: HashMap<TaskId, DagNode>,
    next_position: u64,
}

/// Batch-local dependency structure contains a cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BatchCycle;

impl DependencyGraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Order in which the entries of a batch can be appended to the
    /// topological order, given each entry's dependencies on *other entries
    /// of the same batch* (indices). Dependencies on existing tasks never
    /// constrain the batch since existing tasks already precede it.
    pub fn plan_batch_order(batch_deps: &[Vec<usize>]) -> Result<Vec<usize>, BatchCycle> {
        let n = batch_deps.len();
        let mut indegree = vec![0usize; n];
        let mut dependents: Vec<Vec<usize>> = vec![Vec::new(); n];

        for (i, deps) in batch_deps.iter().enumerate() {
            for &d in deps {
                if d == i {
                    return Err(BatchCycle);
                }
                indegree[i] += 1;
                dependents[d].push(i);
            }
        }

        // Lowest index first keeps the order deterministic.
        let mut ready: BinaryHeap<Reverse<usize>> = indegree
            .iter()
            .enumerate()
            .filter(|(_, deg)| **deg == 0)
            .map(|(i, _)| Reverse(i))
            .collect();

        let mut order = Vec::with_capacity(n);
        while let Some(Reverse(i)) = ready.pop() {
            order.push(i);
            for &j in &dependents[i] {
                indegree[j] -= 1;
                if indegree[j] == 0 {
                    ready.push(Reverse(j));
                }
            }
        }

        if order.len() == n {
            Ok(order)
        } else {
            Err(BatchCycle)
        }
    }

    /// Append a node after all existing nodes.
    ///
    /// Callers must have validated that `id` is new and every dependency
    /// exists; anything else is an internal invariant violation.
    pub fn insert(&mut self, id: TaskId, deps: &[TaskId]) {
        assert!(
            !self.nodes.contains_key(&id),
            "dependency graph: duplicate node {id}"
        );
        for dep in deps {
            match self.nodes.get_mut(dep) {
                Some(node) => node.dependents.push(id),
                None => panic!("dependency graph: {id} depends on missing node {dep}"),
            }
        }

        let position = self.next_position;
        self.next_position += 1;
        self.nodes.insert(
            id,
            DagNode {
                deps: deps.to_vec(),
                dependents: Vec::new(),
                position,
            },
        );
    }

    /// Drop a node and every edge touching it. Returns false if absent.
    ///
    /// Used to forget finished tasks; the caller only removes a node once
    /// none of its dependents can still need it.
    pub fn remove(&mut self, id: TaskId) -> bool {
        let Some(node) = self.nodes.remove(&id) else {
            return false;
        };
        for dep in &node.deps {
            if let Some(n) = self.nodes.get_mut(dep) {
                n.dependents.retain(|d| *d != id);
            }
        }
        for dependent in &node.dependents {
            if let Some(n) = self.nodes.get_mut(dependent) {
                n.deps.retain(|d| *d != id);
            }
        }
        true
    }

    pub fn contains(&self, id: TaskId) -> bool {
        self.nodes.contains_key(&id)
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Immediate dependencies of a task.
    pub fn dependencies_of(&self, id: TaskId) -> &[TaskId] {
        self.nodes
            .get(&id)
            .map(|n| n.deps.as_slice())
            .unwrap_or(&[])
    }

    /// Immediate dependents of a task.
    pub fn dependents_of(&self, id: TaskId) -> &[TaskId] {
        self.nodes
            .get(&id)
            .map(|n| n.dependents.as_slice())
            .unwrap_or(&[])
    }

    pub fn position(&self, id: TaskId) -> Option<u64> {
        self.nodes.get(&id).map(|n| n.position)
    }

    /// All nodes in the cached topological order (dependencies first).
    pub fn topological_order(&self) -> Vec<TaskId> {
        let mut ids: Vec<(u64, TaskId)> =
            self.nodes.iter().map(|(id, n)| (n.position, *id)).collect();
        ids.sort_unstable();
        ids.into_iter().map(|(_, id)| id).collect()
    }

    /// Transitive dependencies of `roots` (excluding the roots themselves
    /// unless reachable from another root).
    pub fn ancestors(&self, roots: impl IntoIterator<Item = TaskId>) -> HashSet<TaskId> {
        let mut seen = HashSet::new();
        let mut stack: Vec<TaskId> = roots
            .into_iter()
            .flat_map(|r| self.dependencies_of(r).to_vec())
            .collect();

        while let Some(id) = stack.pop() {
            if seen.insert(id) {
                stack.extend(self.dependencies_of(id).iter().copied());
            }
        }
        seen
    }

    /// Transitive dependents of `root`, in topological order.
    pub fn descendants(&self, root: TaskId) -> Vec<TaskId> {
        let mut seen = HashSet::new();
        let mut queue: VecDeque<TaskId> = self.dependents_of(root).iter().copied().collect();

        while let Some(id) = queue.pop_front() {
            if seen.insert(id) {
                queue.extend(self.dependents_of(id).iter().copied());
            }
        }

        let mut out: Vec<TaskId> = seen.into_iter().collect();
        out.sort_by_key(|id| self.position(*id));
        out
    }

    /// Independently re-check acyclicity and that the cached order respects
    /// every edge.
    pub fn verify(&self) -> Result<(), String> {
        let mut graph: DiGraphMap<TaskId, ()> = DiGraphMap::new();
        for id in self.nodes.keys() {
            graph.add_node(*id);
        }

        for (id, node) in &self.nodes {
            for dep in &node.deps {
                let dep_node = self
                    .nodes
                    .get(dep)
                    .ok_or_else(|| format!("{id} depends on missing node {dep}"))?;
                if dep_node.position >= node.position {
                    return Err(format!(
                        "cached order places {dep} (pos {}) after its dependent {id} (pos {})",
                        dep_node.position, node.position
                    ));
                }
                if !dep_node.dependents.contains(id) {
                    return Err(format!("{dep} is missing reverse edge to {id}"));
                }
                graph.add_edge(*dep, *id, ());
            }
        }

        toposort(&graph, None)
            .map(|_| ())
            .map_err(|cycle| format!("cycle detected involving {}", cycle.node_id()))
    }
}
