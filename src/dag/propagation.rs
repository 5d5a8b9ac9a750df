// src/dag/propagation.rs

//! Dry-run planning of a batch insertion.
//!
//! Everything that can make a submission fail on graph grounds is decided
//! here, against read-only views of the store and the graph:
//! dependency resolution, the batch-local cycle check, maturation
//! propagation (downward) and deadline propagation (upward, including
//! existing ancestors). The caller commits the plan only if it is `Ok`.

use std::collections::{BinaryHeap, HashMap, HashSet};
use std::time::Duration;

use crate::dag::graph::DependencyGraph;
use crate::errors::RejectReason;
use crate::store::{DepRef, TaskSpec, TaskState, TaskStore};
use crate::types::{TaskId, Timestamp};

/// A resolved dependency of a batch entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BatchNode {
    Existing(TaskId),
    Sibling(usize),
}

/// Result of a successful dry run.
#[derive(Debug, Clone)]
pub struct InsertionPlan {
    /// Batch indices in the order they must be appended to the graph.
    pub order: Vec<usize>,
    /// Deduplicated dependencies per batch entry.
    pub deps: Vec<Vec<BatchNode>>,
    /// Propagated maturation per batch entry.
    pub maturation: Vec<Timestamp>,
    /// Propagated deadline per batch entry.
    pub deadline: Vec<Option<Timestamp>>,
    /// Existing, not yet started tasks whose deadline tightens.
    pub ancestor_deadlines: Vec<(TaskId, Timestamp)>,
    /// Every existing task the batch transitively depends on.
    pub ancestors: HashSet<TaskId>,
}

/// Validate and propagate a batch without mutating anything.
pub fn plan_insertion(
    store: &TaskStore,
    graph: &DependencyGraph,
    specs: &[TaskSpec],
    now: Timestamp,
) -> Result<InsertionPlan, RejectReason> {
    let deps = resolve_dependencies(store, specs)?;

    let sibling_deps: Vec<Vec<usize>> = deps
        .iter()
        .map(|ds| {
            ds.iter()
                .filter_map(|d| match d {
                    BatchNode::Sibling(j) => Some(*j),
                    BatchNode::Existing(_) => None,
                })
                .collect()
        })
        .collect();
    let order = DependencyGraph::plan_batch_order(&sibling_deps)
        .map_err(|_| RejectReason::CyclicDependency)?;

    let maturation = propagate_maturation(store, specs, &deps, &order);
    let (deadline, ancestor_deadlines) =
        propagate_deadlines(store, graph, specs, &deps, &order)?;

    for (i, spec) in specs.iter().enumerate() {
        check_window(deadline[i], maturation[i], now, || {
            format!("batch entry #{i} (group {})", spec.group)
        })?;
    }
    for (id, d) in &ancestor_deadlines {
        let task = store
            .get(*id)
            .expect("ancestor deadline planned for a task missing from the store");
        check_window(Some(*d), task.maturation, now, || {
            format!("dependency {id} would need to start by {d}")
        })?;
    }

    let existing: Vec<TaskId> = deps
        .iter()
        .flatten()
        .filter_map(|d| match d {
            BatchNode::Existing(id) => Some(*id),
            BatchNode::Sibling(_) => None,
        })
        .collect();
    let mut ancestors = graph.ancestors(existing.iter().copied());
    ancestors.extend(existing);

    Ok(InsertionPlan {
        order,
        deps,
        maturation,
        deadline,
        ancestor_deadlines,
        ancestors,
    })
}

fn resolve_dependencies(
    store: &TaskStore,
    specs: &[TaskSpec],
) -> Result<Vec<Vec<BatchNode>>, RejectReason> {
    let mut resolved = Vec::with_capacity(specs.len());

    for (i, spec) in specs.iter().enumerate() {
        let mut out: Vec<BatchNode> = Vec::with_capacity(spec.dependencies.len());
        for dep in &spec.dependencies {
            let node = match *dep {
                DepRef::Task(id) => match store.state_of(id) {
                    Some(TaskState::Failed(_)) | Some(TaskState::Cancelled) | None => {
                        return Err(RejectReason::UnknownDependency(*dep));
                    }
                    Some(_) => BatchNode::Existing(id),
                },
                DepRef::Batch(j) if j == i => return Err(RejectReason::CyclicDependency),
                DepRef::Batch(j) if j < specs.len() => BatchNode::Sibling(j),
                DepRef::Batch(_) => return Err(RejectReason::UnknownDependency(*dep)),
            };
            if !out.contains(&node) {
                out.push(node);
            }
        }
        resolved.push(out);
    }

    Ok(resolved)
}

/// `maturation(t) = max(declared(t), max over deps d of maturation(d) + estimate(d))`.
fn propagate_maturation(
    store: &TaskStore,
    specs: &[TaskSpec],
    deps: &[Vec<BatchNode>],
    order: &[usize],
) -> Vec<Timestamp> {
    let mut maturation: Vec<Timestamp> = specs.iter().map(|s| s.maturation).collect();

    for &i in order {
        let mut m = specs[i].maturation;
        for dep in &deps[i] {
            let earliest = match *dep {
                BatchNode::Existing(id) => match store.get(id) {
                    Some(t) => t.maturation + t.job_time_estimate,
                    None => continue,
                },
                BatchNode::Sibling(j) => maturation[j] + specs[j].job_time_estimate,
            };
            m = m.max(earliest);
        }
        maturation[i] = m;
    }

    maturation
}

type Deadlines = (Vec<Option<Timestamp>>, Vec<(TaskId, Timestamp)>);

/// `deadline(d) = min(declared(d), min over dependents t of deadline(t) - estimate(d))`.
///
/// Batch entries are handled in reverse batch order; the resulting bounds on
/// existing tasks are then pushed up the graph in descending topological
/// position so every ancestor is final when visited. Propagation stops at
/// tasks that have already started.
fn propagate_deadlines(
    store: &TaskStore,
    graph: &DependencyGraph,
    specs: &[TaskSpec],
    deps: &[Vec<BatchNode>],
    order: &[usize],
) -> Result<Deadlines, RejectReason> {
    let mut deadline: Vec<Option<Timestamp>> = specs.iter().map(|s| s.deadline).collect();
    let mut bounds: HashMap<TaskId, Timestamp> = HashMap::new();

    for &i in order.iter().rev() {
        let Some(d) = deadline[i] else { continue };
        for dep in &deps[i] {
            match *dep {
                BatchNode::Sibling(j) => {
                    let bound = shift_back(d, specs[j].job_time_estimate)?;
                    deadline[j] = Some(deadline[j].map_or(bound, |cur| cur.min(bound)));
                }
                BatchNode::Existing(id) => {
                    let Some(task) = store.get(id) else { continue };
                    let bound = shift_back(d, task.job_time_estimate)?;
                    tighten(&mut bounds, id, bound);
                }
            }
        }
    }

    let mut worklist: BinaryHeap<(u64, TaskId)> = bounds
        .keys()
        .filter_map(|id| graph.position(*id).map(|p| (p, *id)))
        .collect();
    let mut visited: HashSet<TaskId> = HashSet::new();
    let mut changed = Vec::new();

    while let Some((_, id)) = worklist.pop() {
        if !visited.insert(id) {
            continue;
        }
        let Some(task) = store.get(id) else { continue };
        if !task.state().is_queued() {
            continue;
        }
        let bound = bounds[&id];
        if task.deadline.is_some_and(|cur| cur <= bound) {
            continue;
        }
        changed.push((id, bound));

        for dep in graph.dependencies_of(id) {
            let Some(dep_task) = store.get(*dep) else { continue };
            let dep_bound = shift_back(bound, dep_task.job_time_estimate)?;
            tighten(&mut bounds, *dep, dep_bound);
            if let Some(p) = graph.position(*dep) {
                worklist.push((p, *dep));
            }
        }
    }

    Ok((deadline, changed))
}

fn tighten(bounds: &mut HashMap<TaskId, Timestamp>, id: TaskId, bound: Timestamp) {
    bounds
        .entry(id)
        .and_modify(|cur| *cur = (*cur).min(bound))
        .or_insert(bound);
}

fn shift_back(deadline: Timestamp, estimate: Duration) -> Result<Timestamp, RejectReason> {
    deadline.checked_sub(estimate).ok_or_else(|| {
        RejectReason::InfeasibleSchedule(format!(
            "deadline {deadline} leaves no room for a {estimate:?} dependency"
        ))
    })
}

fn check_window(
    deadline: Option<Timestamp>,
    maturation: Timestamp,
    now: Timestamp,
    what: impl Fn() -> String,
) -> Result<(), RejectReason> {
    let Some(d) = deadline else { return Ok(()) };
    if d <= now {
        return Err(RejectReason::InfeasibleSchedule(format!(
            "{}: deadline {d} is not after now ({now})",
            what()
        )));
    }
    if d < maturation {
        return Err(RejectReason::InfeasibleSchedule(format!(
            "{}: deadline {d} precedes maturation {maturation}",
            what()
        )));
    }
    Ok(())
}
