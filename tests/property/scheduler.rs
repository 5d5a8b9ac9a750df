use std::collections::{HashMap, HashSet};

use fairsched::engine::CoreScheduler;
use fairsched::errors::RejectReason;
use fairsched::store::{DepRef, TaskState};
use fairsched::types::{TaskId, Timestamp, WorkerId};
use fairsched_test_utils::{ConfigBuilder, TaskSpecBuilder};
use proptest::prelude::*;

#[derive(Debug, Clone)]
enum Op {
    Submit {
        group: u8,
        priority: u8,
        maturation: u16,
        deadline: Option<u16>,
        cost: u8,
        // Indices into the tasks seen so far, taken modulo their count.
        deps: Vec<usize>,
    },
    Pull,
    Complete(usize),
    Fail(usize),
    Cancel(usize),
    Tick,
}

fn op_strategy() -> impl Strategy<Value = Op> {
    let submit = (
        0..3u8,
        0..5u8,
        0..500u16,
        proptest::option::of(0..2_000u16),
        1..4u8,
        proptest::collection::vec(any::<usize>(), 0..3),
    )
        .prop_map(|(group, priority, maturation, deadline, cost, deps)| Op::Submit {
            group,
            priority,
            maturation,
            deadline,
            cost,
            deps,
        });

    prop_oneof![
        3 => submit,
        3 => Just(Op::Pull),
        2 => any::<usize>().prop_map(Op::Complete),
        1 => any::<usize>().prop_map(Op::Fail),
        1 => any::<usize>().prop_map(Op::Cancel),
        2 => Just(Op::Tick),
    ]
}

/// Small queue and tight buckets so shedding and throttling both happen, and
/// a short retention so finished tasks are swept mid-run.
fn tight_core() -> CoreScheduler {
    CoreScheduler::new(
        ConfigBuilder::new()
            .max_queue_size(8)
            .global(20.0, 10.0)
            .group_defaults(6.0, 3.0)
            .group_hard_limit(3)
            .adaptivity_bounds(2.0, 20.0)
            .terminal_retention_ms(400)
            .build(),
    )
}

fn pick(known: &[TaskId], i: usize) -> Option<TaskId> {
    (!known.is_empty()).then(|| known[i % known.len()])
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(128))]

    #[test]
    fn invariants_hold_after_every_operation(
        steps in proptest::collection::vec((op_strategy(), 0..200u64), 1..120)
    ) {
        let mut core = tight_core();
        let mut known: Vec<TaskId> = Vec::new();
        let worker = WorkerId::from("prop");
        let mut now = 0u64;

        for (op, dt) in steps {
            now += dt;
            let at = Timestamp::from_millis(now);

            match op {
                Op::Submit { group, priority, maturation, deadline, cost, deps } => {
                    let mut spec = TaskSpecBuilder::new(&format!("g{group}"))
                        .priority(f64::from(priority))
                        .cost(u32::from(cost))
                        .maturation_ms(now + u64::from(maturation))
                        .estimate_ms(50)
                        .build();
                    if let Some(d) = deadline {
                        spec.deadline = Some(Timestamp::from_millis(now + u64::from(d)));
                    }
                    let deps: HashSet<TaskId> =
                        deps.into_iter().filter_map(|i| pick(&known, i)).collect();
                    spec.dependencies = deps.into_iter().map(DepRef::Task).collect();

                    let graph_before = core.graph().clone();
                    let queued_before = core.queue_len();
                    match core.submit(spec, at) {
                        Ok(id) => known.push(id),
                        Err(_) => {
                            prop_assert_eq!(core.graph(), &graph_before);
                            prop_assert_eq!(core.queue_len(), queued_before);
                        }
                    }
                }
                Op::Pull => {
                    if let Some(lease) = core.pull(worker.clone(), at) {
                        let snap = core.inspect(lease.task).expect("leased task exists");
                        prop_assert_eq!(snap.state, TaskState::Running);
                        for dep in &snap.dependencies {
                            let dep_state = core.inspect(*dep).expect("dependency exists").state;
                            prop_assert_eq!(dep_state, TaskState::Completed);
                        }
                        if let Some(deadline) = snap.deadline {
                            prop_assert!(deadline > core.now());
                        }
                        prop_assert!(snap.maturation <= core.now());
                    }
                }
                Op::Complete(i) | Op::Fail(i) | Op::Cancel(i) => {
                    let Some(id) = pick(&known, i) else { continue };
                    let Ok(before) = core.inspect(id) else {
                        // Swept after finishing; every operation must refuse it.
                        prop_assert!(core.cancel(id, at).is_err());
                        continue;
                    };
                    let result = match op {
                        Op::Complete(_) => core.complete(id, at),
                        Op::Fail(_) => core.fail(id, "prop", at),
                        _ => core.cancel(id, at),
                    };
                    if result.is_err() {
                        let after = core.inspect(id).expect("task survives a refused operation").state;
                        // Advancing the clock may still promote a pending task.
                        let promoted =
                            before.state == TaskState::Pending && after == TaskState::Ready;
                        prop_assert!(after == before.state || promoted);
                    }
                }
                Op::Tick => {
                    core.tick(at);
                }
            }

            if let Err(msg) = core.check_invariants() {
                return Err(TestCaseError::fail(msg));
            }
            prop_assert_eq!(
                core.tasks_in_state(&TaskState::Running).len(),
                core.running_len()
            );
        }
    }

    #[test]
    fn cyclic_batches_are_rejected_whole(
        edges in (1..6usize).prop_flat_map(|n| {
            proptest::collection::vec(proptest::collection::vec(0..n, 0..3), n)
        })
    ) {
        let mut core = CoreScheduler::new(ConfigBuilder::unconstrained().build());
        let root = core
            .submit(TaskSpecBuilder::new("g").build(), Timestamp::ZERO)
            .expect("root accepted");

        let specs = edges
            .iter()
            .map(|deps| {
                deps.iter()
                    .fold(TaskSpecBuilder::new("g").after(root), |b, j| b.after_batch(*j))
                    .build()
            })
            .collect();

        let graph_before = core.graph().clone();
        let result = core.submit_batch(specs, Timestamp::ZERO);

        if has_cycle(&edges) {
            prop_assert_eq!(result, Err(RejectReason::CyclicDependency));
            prop_assert_eq!(core.graph(), &graph_before);
        } else {
            let ids = result.expect("acyclic batch accepted");
            let order = core.topological_order();
            let pos: HashMap<TaskId, usize> =
                order.iter().enumerate().map(|(i, id)| (*id, i)).collect();
            for (i, deps) in edges.iter().enumerate() {
                for j in deps {
                    prop_assert!(pos[&ids[*j]] < pos[&ids[i]]);
                }
                prop_assert!(pos[&root] < pos[&ids[i]]);
            }
        }
        if let Err(msg) = core.check_invariants() {
            return Err(TestCaseError::fail(msg));
        }
    }
}

/// `edges[i]` lists what entry `i` depends on.
fn has_cycle(edges: &[Vec<usize>]) -> bool {
    let n = edges.len();
    let mut indegree = vec![0usize; n];
    let mut dependents = vec![Vec::new(); n];
    for (i, deps) in edges.iter().enumerate() {
        let unique: HashSet<usize> = deps.iter().copied().collect();
        for j in unique {
            indegree[i] += 1;
            dependents[j].push(i);
        }
    }

    let mut ready: Vec<usize> = (0..n).filter(|i| indegree[*i] == 0).collect();
    let mut seen = 0;
    while let Some(i) = ready.pop() {
        seen += 1;
        for &d in &dependents[i] {
            indegree[d] -= 1;
            if indegree[d] == 0 {
                ready.push(d);
            }
        }
    }
    seen < n
}
