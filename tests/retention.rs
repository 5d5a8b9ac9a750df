// tests/retention.rs

mod common;
use crate::common::{ConfigBuilder, TaskSpecBuilder, TestResult, core, ms, pull_id, state_of};

use fairsched::errors::{OperationError, RejectReason};
use fairsched::store::{DepRef, TaskState};

#[test]
fn long_running_loop_keeps_memory_bounded() -> TestResult {
    let mut core = core(
        ConfigBuilder::unconstrained()
            .terminal_retention_ms(1_000)
            .build(),
    );

    let mut now = 0;
    for _ in 0..5_000 {
        now += 10;
        let id = core.submit(TaskSpecBuilder::new("g").build(), ms(now))?;
        assert_eq!(pull_id(&mut core, now), Some(id));
        core.complete(id, ms(now))?;
        core.tick(ms(now));
    }

    // Only tasks finished within the last second are still held.
    assert_eq!(core.queue_len(), 0);
    assert!(core.graph().len() <= 101, "graph holds {} nodes", core.graph().len());
    core.check_invariants()?;
    Ok(())
}

#[test]
fn finished_task_is_inspectable_until_swept() -> TestResult {
    let mut core = core(
        ConfigBuilder::unconstrained()
            .terminal_retention_ms(500)
            .build(),
    );

    let id = core.submit(TaskSpecBuilder::new("g").build(), ms(0))?;
    pull_id(&mut core, 0);
    core.complete(id, ms(100))?;

    assert!(core.tick(ms(599)).swept.is_empty());
    assert_eq!(state_of(&core, id), TaskState::Completed);

    assert_eq!(core.tick(ms(600)).swept, vec![id]);
    assert_eq!(core.inspect(id), Err(OperationError::UnknownTask(id)));
    assert!(!core.graph().contains(id));

    // A swept id can no longer be depended on.
    let mut spec = TaskSpecBuilder::new("g").build();
    spec.dependencies.push(DepRef::Task(id));
    assert!(matches!(
        core.submit(spec, ms(700)),
        Err(RejectReason::UnknownDependency(_))
    ));
    core.check_invariants()?;
    Ok(())
}

#[test]
fn dependency_is_kept_while_a_dependent_is_live() -> TestResult {
    let mut core = core(
        ConfigBuilder::unconstrained()
            .terminal_retention_ms(500)
            .build(),
    );

    let a = core.submit(TaskSpecBuilder::new("g").build(), ms(0))?;
    let b = core.submit(
        TaskSpecBuilder::new("g").after(a).maturation_ms(5_000).build(),
        ms(0),
    )?;
    pull_id(&mut core, 0);
    core.complete(a, ms(0))?;

    // `b` is still pending on its maturation, so `a` stays.
    assert!(core.tick(ms(1_000)).swept.is_empty());
    assert_eq!(state_of(&core, a), TaskState::Completed);
    assert_eq!(core.graph().dependencies_of(b), &[a]);

    assert_eq!(core.tick(ms(5_000)).promoted, vec![b]);
    assert_eq!(pull_id(&mut core, 5_000), Some(b));
    core.complete(b, ms(5_000))?;

    // `a` was deferred again at t=5000, the tick that made `b` ready.
    assert_eq!(core.tick(ms(5_500)).swept, vec![a, b]);
    assert_eq!(core.graph().len(), 0);
    core.check_invariants()?;
    Ok(())
}
