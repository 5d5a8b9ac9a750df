// tests/service.rs

mod common;
use crate::common::{ConfigBuilder, TaskSpecBuilder, TestResult, init_tracing, ms};

use std::future::Future;
use std::task::Poll;
use std::time::{Duration, Instant};

use fairsched::engine::{
    CoreScheduler, ManualClock, SchedulerHandle, SchedulerService, ShutdownReport,
};
use fairsched::errors::{FailureReason, OperationError, RejectReason, SchedulerError};
use fairsched::store::{DepRef, TaskState};
use fairsched::types::TaskId;
use fairsched_test_utils::{FakeWorker, with_timeout};
use tokio::task::JoinHandle;

fn start() -> (SchedulerHandle, JoinHandle<ShutdownReport>, ManualClock) {
    init_tracing();
    let clock = ManualClock::new(ms(0));
    let core = CoreScheduler::new(ConfigBuilder::unconstrained().build());
    let (handle, join) = SchedulerService::spawn(core, clock.clone(), 16);
    (handle, join, clock)
}

#[tokio::test]
async fn submit_pull_complete_through_the_handle() -> TestResult {
    let (handle, _join, clock) = start();

    let id = handle
        .submit(TaskSpecBuilder::new("g").payload("job").build())
        .await?;
    clock.advance(Duration::from_millis(25));

    let lease = handle.try_pull("w1").await?.expect("a ready task");
    assert_eq!(lease.task, id);
    assert_eq!(lease.payload, "job");
    assert_eq!(lease.leased_at, ms(25));

    handle.complete(id).await?;
    assert_eq!(handle.inspect(id).await?.state, TaskState::Completed);

    let stats = handle.group_stats("g").await?.expect("group");
    assert_eq!(stats.completed, 1);
    Ok(())
}

#[tokio::test]
async fn bounded_pull_times_out_empty() -> TestResult {
    let (handle, _join, _clock) = start();

    let started = Instant::now();
    let lease = with_timeout(handle.pull("w1", Duration::from_millis(50))).await?;
    assert!(lease.is_none());
    assert!(started.elapsed() >= Duration::from_millis(40));
    Ok(())
}

#[tokio::test]
async fn parked_worker_is_woken_by_a_submission() -> TestResult {
    let (handle, _join, _clock) = start();

    let waiting = {
        let handle = handle.clone();
        tokio::spawn(async move { handle.pull("w1", Duration::from_secs(5)).await })
    };
    tokio::time::sleep(Duration::from_millis(20)).await;

    let id = handle.submit(TaskSpecBuilder::new("g").build()).await?;
    let lease = with_timeout(waiting).await??;
    assert_eq!(lease.map(|l| l.task), Some(id));
    Ok(())
}

#[tokio::test]
async fn abandoned_waiter_does_not_swallow_a_task() -> TestResult {
    let (handle, _join, _clock) = start();

    let waiting = {
        let handle = handle.clone();
        tokio::spawn(async move { handle.pull("gone", Duration::from_secs(5)).await })
    };
    tokio::time::sleep(Duration::from_millis(20)).await;
    waiting.abort();
    tokio::time::sleep(Duration::from_millis(20)).await;

    let id = handle.submit(TaskSpecBuilder::new("g").build()).await?;
    let lease = handle.try_pull("w2").await?;
    assert_eq!(lease.map(|l| l.task), Some(id));
    Ok(())
}

#[tokio::test]
async fn fake_worker_runs_a_chain_in_dependency_order() -> TestResult {
    let (handle, _join, _clock) = start();

    let ids = handle
        .submit_batch(vec![
            TaskSpecBuilder::new("g").build(),
            TaskSpecBuilder::new("g").after_batch(0).build(),
            TaskSpecBuilder::new("g").after_batch(1).build(),
        ])
        .await?;

    let worker = FakeWorker::new(handle.clone(), "fake");
    for _ in 0..3 {
        with_timeout(worker.work_once(Duration::from_secs(1))).await?;
    }
    assert_eq!(worker.executed(), ids);
    for id in &ids {
        assert_eq!(handle.inspect(*id).await?.state, TaskState::Completed);
    }
    Ok(())
}

#[tokio::test]
async fn worker_failure_cascades_through_the_service() -> TestResult {
    let (handle, _join, _clock) = start();

    let ids = handle
        .submit_batch(vec![
            TaskSpecBuilder::new("g").build(),
            TaskSpecBuilder::new("g").after_batch(0).build(),
        ])
        .await?;

    let worker = FakeWorker::new(handle.clone(), "fake");
    worker.fail_on(ids[0]);
    assert_eq!(worker.work_once(Duration::from_secs(1)).await?, Some(ids[0]));
    assert_eq!(worker.work_once(Duration::from_millis(20)).await?, None);

    assert_eq!(
        handle.inspect(ids[1]).await?.state,
        TaskState::Failed(FailureReason::InfeasibleSchedule)
    );
    Ok(())
}

#[tokio::test]
async fn errors_map_onto_scheduler_error() -> TestResult {
    let (handle, _join, _clock) = start();

    let ghost = TaskId(77);
    assert!(matches!(
        handle.complete(ghost).await,
        Err(SchedulerError::Operation(OperationError::UnknownTask(id))) if id == ghost
    ));

    let mut spec = TaskSpecBuilder::new("g").build();
    spec.dependencies.push(DepRef::Task(ghost));
    assert!(matches!(
        handle.submit(spec).await,
        Err(SchedulerError::Rejected(RejectReason::UnknownDependency(_)))
    ));
    Ok(())
}

#[tokio::test]
async fn service_time_comes_from_its_clock() -> TestResult {
    let (handle, _join, clock) = start();

    let id = handle
        .submit(TaskSpecBuilder::new("g").deadline_ms(500).build())
        .await?;
    clock.set(ms(600));

    assert!(handle.try_pull("w1").await?.is_none());
    assert_eq!(
        handle.inspect(id).await?.state,
        TaskState::Failed(FailureReason::DeadlineMissed)
    );
    assert_eq!(handle.tick().await?.now, ms(600));
    Ok(())
}

#[tokio::test]
async fn ticker_drives_maturation() -> TestResult {
    let (handle, _join, clock) = start();

    let id = handle
        .submit(TaskSpecBuilder::new("g").maturation_ms(1_000).build())
        .await?;
    let ticker = handle.spawn_ticker(Duration::from_millis(5));

    clock.set(ms(1_000));
    with_timeout(async {
        while !matches!(handle.inspect(id).await, Ok(ref s) if s.state == TaskState::Ready) {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await;

    ticker.abort();
    Ok(())
}

#[tokio::test]
async fn runtime_knobs_round_trip() -> TestResult {
    let (handle, _join, _clock) = start();

    handle.set_admission_cap(12.0).await?;
    assert_eq!(handle.admission_cap().await?, 12.0);
    handle.set_shed_threshold(4.5).await?;
    assert_eq!(handle.shed_threshold().await?, 4.5);

    handle.set_load_signal(0.7).await?;
    let state = handle.export_state().await?;
    assert_eq!(state.admission_cap, 12.0);
    assert_eq!(state.shed_threshold, 4.5);
    Ok(())
}

#[tokio::test]
async fn shutdown_drains_running_work_then_stops() -> TestResult {
    let (handle, join, _clock) = start();

    let running = handle
        .submit(TaskSpecBuilder::new("g").priority(5.0).build())
        .await?;
    let queued = handle.submit(TaskSpecBuilder::new("g").build()).await?;
    let lease = handle.try_pull("w1").await?.expect("lease");
    assert_eq!(lease.task, running);

    let shutdown = {
        let handle = handle.clone();
        tokio::spawn(async move { handle.shutdown().await })
    };
    tokio::time::sleep(Duration::from_millis(20)).await;

    assert!(matches!(
        handle.submit(TaskSpecBuilder::new("g").build()).await,
        Err(SchedulerError::Rejected(RejectReason::ShuttingDown))
    ));
    assert!(handle.pull("w2", Duration::from_secs(1)).await?.is_none());

    handle.complete(running).await?;

    let report = with_timeout(shutdown).await??;
    assert_eq!(report.cancelled, vec![queued]);
    assert_eq!(with_timeout(join).await?, report);

    assert!(matches!(
        handle.inspect(queued).await,
        Err(SchedulerError::ServiceStopped)
    ));
    Ok(())
}

#[tokio::test]
async fn dropping_every_handle_stops_the_service() -> TestResult {
    let (handle, join, _clock) = start();

    let running = handle
        .submit(TaskSpecBuilder::new("g").priority(2.0).build())
        .await?;
    let queued = handle.submit(TaskSpecBuilder::new("g").build()).await?;
    assert_eq!(handle.try_pull("w1").await?.map(|l| l.task), Some(running));
    drop(handle);

    let report = with_timeout(join).await?;
    assert_eq!(report.cancelled, vec![queued]);
    assert_eq!(report.abandoned_running, 1);
    Ok(())
}

#[tokio::test]
async fn background_workers_drain_the_queue() -> TestResult {
    let (handle, join, _clock) = start();

    let workers: Vec<_> = ["w1", "w2"]
        .into_iter()
        .map(|id| FakeWorker::new(handle.clone(), id).spawn(Duration::from_millis(50)))
        .collect();

    handle
        .submit_batch((0..10).map(|_| TaskSpecBuilder::new("g").build()).collect())
        .await?;

    with_timeout(async {
        loop {
            let done = handle
                .group_stats("g")
                .await
                .ok()
                .flatten()
                .map_or(0, |s| s.completed);
            if done == 10 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await;

    let report = with_timeout(handle.shutdown()).await?;
    assert!(report.cancelled.is_empty());
    with_timeout(join).await?;
    for worker in workers {
        with_timeout(worker).await?;
    }
    Ok(())
}

#[tokio::test]
async fn start_from_config_serves_requests() -> TestResult {
    let dir = tempfile::tempdir()?;
    let path = dir.path().join("Fairsched.toml");
    std::fs::write(&path, "[scheduler]\ntick_interval_ms = 10\n")?;

    let handle = fairsched::start_from_config(&path)?;
    let id = handle.submit(TaskSpecBuilder::new("g").build()).await?;
    let lease = with_timeout(handle.pull("w1", Duration::from_secs(1))).await?;
    assert_eq!(lease.map(|l| l.task), Some(id));
    handle.complete(id).await?;

    let report = with_timeout(handle.shutdown()).await?;
    assert!(report.cancelled.is_empty());
    Ok(())
}

#[tokio::test]
async fn pull_dropped_before_service_runs_leaves_task_queued() -> TestResult {
    let (handle, _join, _clock) = start();

    let id = handle.submit(TaskSpecBuilder::new("g").build()).await?;

    // The request is queued on the first poll, then the caller gives up
    // before the service gets to it.
    let mut pull = Box::pin(handle.try_pull("gone"));
    std::future::poll_fn(|cx| {
        assert!(pull.as_mut().poll(cx).is_pending());
        Poll::Ready(())
    })
    .await;
    drop(pull);

    assert_eq!(handle.inspect(id).await?.state, TaskState::Ready);
    let lease = handle.try_pull("w2").await?;
    assert_eq!(lease.map(|l| l.task), Some(id));
    Ok(())
}
