//! End-to-end scheduler tests driving the tick loop directly.

use foreman_core::{CostCategory, TaskId, TaskPriority, TaskSpec, TaskStatus};
use foreman_ledger::CostLedger;
use foreman_liveness::LivenessMonitor;
use foreman_scheduler::{handler_fn, Scheduler, SchedulerConfig};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;

/// Tick until the task settles (terminal or budget-paused).
async fn settle(scheduler: &Scheduler, id: TaskId) -> TaskStatus {
    for _ in 0..200 {
        scheduler.tick().await;
        if let Some(snapshot) = scheduler.get_task(id).await {
            if snapshot.status.is_terminal() || snapshot.status == TaskStatus::Paused {
                return snapshot.status;
            }
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("task {id} did not settle");
}

/// Handler that appends the task name to a shared log.
fn recording_handler(log: Arc<Mutex<Vec<String>>>) -> Arc<dyn foreman_scheduler::TaskHandler> {
    handler_fn(move |task| {
        let log = Arc::clone(&log);
        async move {
            log.lock().await.push(task.name.clone());
            Ok(serde_json::json!({ "name": task.name }))
        }
    })
}

#[tokio::test]
async fn higher_priority_runs_first_under_a_concurrency_cap() {
    let scheduler = Scheduler::new(SchedulerConfig::default().with_max_concurrent(1));
    let log = Arc::new(Mutex::new(Vec::new()));
    scheduler
        .register_handler("record", recording_handler(Arc::clone(&log)))
        .await;

    // The low-priority task is created first, so priority must beat
    // admission order.
    let low = scheduler
        .create_task(TaskSpec::new("background", "record").with_priority(TaskPriority::Low))
        .await
        .unwrap();
    let high = scheduler
        .create_task(TaskSpec::new("urgent", "record").with_priority(TaskPriority::High))
        .await
        .unwrap();

    assert_eq!(settle(&scheduler, high).await, TaskStatus::Completed);
    assert_eq!(settle(&scheduler, low).await, TaskStatus::Completed);
    assert_eq!(*log.lock().await, vec!["urgent", "background"]);

    let snapshot = scheduler.get_task(high).await.unwrap();
    assert!(snapshot.started_at.is_some());
    assert!(snapshot.completed_at.unwrap() >= snapshot.started_at.unwrap());
    assert_eq!(snapshot.result.unwrap()["name"], "urgent");
}

#[tokio::test]
async fn equal_priority_runs_in_admission_order() {
    let scheduler = Scheduler::new(SchedulerConfig::default().with_max_concurrent(1));
    let log = Arc::new(Mutex::new(Vec::new()));
    scheduler
        .register_handler("record", recording_handler(Arc::clone(&log)))
        .await;

    let mut ids = Vec::new();
    for name in ["first", "second", "third"] {
        ids.push(
            scheduler
                .create_task(TaskSpec::new(name, "record"))
                .await
                .unwrap(),
        );
    }
    for id in ids {
        assert_eq!(settle(&scheduler, id).await, TaskStatus::Completed);
    }
    assert_eq!(*log.lock().await, vec!["first", "second", "third"]);
}

#[tokio::test]
async fn dependencies_gate_launching() {
    let scheduler = Scheduler::new(SchedulerConfig::default());
    let log = Arc::new(Mutex::new(Vec::new()));
    scheduler
        .register_handler("record", recording_handler(Arc::clone(&log)))
        .await;

    let parent = scheduler
        .create_task(TaskSpec::new("parent", "record"))
        .await
        .unwrap();
    let child = scheduler
        .create_task(
            TaskSpec::new("child", "record")
                .with_priority(TaskPriority::Critical)
                .with_dependencies([parent]),
        )
        .await
        .unwrap();

    // The child outranks the parent but cannot start before it.
    assert_eq!(settle(&scheduler, parent).await, TaskStatus::Completed);
    assert_eq!(settle(&scheduler, child).await, TaskStatus::Completed);
    assert_eq!(*log.lock().await, vec!["parent", "child"]);
}

#[tokio::test]
async fn budget_rejection_pauses_without_running_the_handler() {
    let ledger = Arc::new(CostLedger::with_limits([(CostCategory::Compute, 100.0)]));
    let scheduler = Scheduler::with_components(
        SchedulerConfig::default(),
        Arc::new(LivenessMonitor::default()),
        Arc::clone(&ledger),
    );

    let runs = Arc::new(AtomicUsize::new(0));
    let runs_in_handler = Arc::clone(&runs);
    scheduler
        .register_handler(
            "expensive",
            handler_fn(move |_| {
                let runs = Arc::clone(&runs_in_handler);
                async move {
                    runs.fetch_add(1, Ordering::SeqCst);
                    Ok(serde_json::Value::Null)
                }
            }),
        )
        .await;

    let id = scheduler
        .create_task(TaskSpec::new("train model", "expensive").with_estimated_cost(150.0))
        .await
        .unwrap();

    assert_eq!(settle(&scheduler, id).await, TaskStatus::Paused);
    let snapshot = scheduler.get_task(id).await.unwrap();
    assert!(snapshot.error_message.unwrap().contains("budget"));
    assert!(ledger.is_task_paused(id).await);
    assert_eq!(runs.load(Ordering::SeqCst), 0);
    assert_eq!(snapshot.actual_cost, 0.0);

    // Budget pauses never auto-resume.
    scheduler.tick().await;
    assert_eq!(
        scheduler.get_task(id).await.unwrap().status,
        TaskStatus::Paused
    );

    // Explicit resume releases the hold; with a raised budget the task
    // then completes normally.
    ledger
        .set_budget(CostCategory::Compute, 1000.0, Duration::from_secs(3600))
        .await;
    assert!(scheduler.resume_task(id).await);
    assert_eq!(
        scheduler.get_task(id).await.unwrap().status,
        TaskStatus::Pending
    );

    assert_eq!(settle(&scheduler, id).await, TaskStatus::Completed);
    assert_eq!(runs.load(Ordering::SeqCst), 1);
    assert_eq!(scheduler.get_task(id).await.unwrap().actual_cost, 150.0);
}

#[tokio::test]
async fn failed_tasks_retry_up_to_the_limit() {
    let scheduler = Scheduler::new(SchedulerConfig::default());
    let attempts = Arc::new(AtomicUsize::new(0));
    let attempts_in_handler = Arc::clone(&attempts);
    scheduler
        .register_handler(
            "flaky",
            handler_fn(move |_| {
                let attempts = Arc::clone(&attempts_in_handler);
                async move {
                    attempts.fetch_add(1, Ordering::SeqCst);
                    Err(anyhow::anyhow!("boom"))
                }
            }),
        )
        .await;

    let id = scheduler
        .create_task(TaskSpec::new("unreliable", "flaky").with_max_retries(2))
        .await
        .unwrap();

    assert_eq!(settle(&scheduler, id).await, TaskStatus::Failed);
    let snapshot = scheduler.get_task(id).await.unwrap();
    assert_eq!(snapshot.retry_count, 2);
    assert_eq!(snapshot.error_message.unwrap(), "boom");
    // Initial attempt plus two retries.
    assert_eq!(attempts.load(Ordering::SeqCst), 3);
    assert!(!scheduler.monitor().is_monitored(id).await);
}

#[tokio::test]
async fn a_recovering_task_keeps_its_retry_count() {
    let scheduler = Scheduler::new(SchedulerConfig::default());
    let attempts = Arc::new(AtomicUsize::new(0));
    let attempts_in_handler = Arc::clone(&attempts);
    scheduler
        .register_handler(
            "second_try",
            handler_fn(move |_| {
                let attempts = Arc::clone(&attempts_in_handler);
                async move {
                    if attempts.fetch_add(1, Ordering::SeqCst) == 0 {
                        Err(anyhow::anyhow!("transient"))
                    } else {
                        Ok(serde_json::json!("ok"))
                    }
                }
            }),
        )
        .await;

    let id = scheduler
        .create_task(TaskSpec::new("eventually fine", "second_try").with_max_retries(3))
        .await
        .unwrap();

    assert_eq!(settle(&scheduler, id).await, TaskStatus::Completed);
    let snapshot = scheduler.get_task(id).await.unwrap();
    assert_eq!(snapshot.retry_count, 1);
    assert_eq!(attempts.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn stuck_tasks_are_cancelled_not_retried() {
    let scheduler = Scheduler::new(SchedulerConfig::default());
    scheduler
        .register_handler(
            "hang",
            handler_fn(|_| async {
                tokio::time::sleep(Duration::from_secs(300)).await;
                Ok(serde_json::Value::Null)
            }),
        )
        .await;

    let id = scheduler
        .create_task(
            TaskSpec::new("hung job", "hang")
                .with_timeout(Duration::from_millis(50))
                .with_max_retries(3),
        )
        .await
        .unwrap();

    scheduler.tick().await;
    assert_eq!(
        scheduler.get_task(id).await.unwrap().status,
        TaskStatus::Running
    );

    tokio::time::sleep(Duration::from_millis(100)).await;
    scheduler.tick().await;

    let snapshot = scheduler.get_task(id).await.unwrap();
    assert_eq!(snapshot.status, TaskStatus::Failed);
    assert_eq!(
        snapshot.error_message.unwrap(),
        "task cancelled due to timeout"
    );
    // The retry budget was untouched.
    assert_eq!(snapshot.retry_count, 0);
    assert!(!scheduler.monitor().is_monitored(id).await);
}

#[tokio::test]
async fn handler_panics_are_contained_as_failures() {
    let scheduler = Scheduler::new(SchedulerConfig::default());
    scheduler
        .register_handler(
            "bad",
            handler_fn(|_| async { panic!("handler bug") }),
        )
        .await;

    let id = scheduler
        .create_task(TaskSpec::new("panicky", "bad").with_max_retries(0))
        .await
        .unwrap();

    assert_eq!(settle(&scheduler, id).await, TaskStatus::Failed);
    let snapshot = scheduler.get_task(id).await.unwrap();
    assert!(snapshot.error_message.unwrap().contains("panicked"));
}

#[tokio::test]
async fn pausing_the_scheduler_defers_launches() {
    let scheduler = Scheduler::new(SchedulerConfig::default());
    let log = Arc::new(Mutex::new(Vec::new()));
    scheduler
        .register_handler("record", recording_handler(Arc::clone(&log)))
        .await;

    scheduler.pause().await;
    let id = scheduler
        .create_task(TaskSpec::new("held", "record"))
        .await
        .unwrap();

    for _ in 0..3 {
        scheduler.tick().await;
    }
    assert_eq!(
        scheduler.get_task(id).await.unwrap().status,
        TaskStatus::Pending
    );

    scheduler.resume().await;
    assert_eq!(settle(&scheduler, id).await, TaskStatus::Completed);
}

#[tokio::test]
async fn cancelling_a_running_task_aborts_its_execution() {
    let scheduler = Scheduler::new(SchedulerConfig::default());
    scheduler
        .register_handler(
            "hang",
            handler_fn(|_| async {
                tokio::time::sleep(Duration::from_secs(300)).await;
                Ok(serde_json::Value::Null)
            }),
        )
        .await;

    let id = scheduler
        .create_task(TaskSpec::new("doomed", "hang"))
        .await
        .unwrap();
    scheduler.tick().await;
    assert_eq!(
        scheduler.get_task(id).await.unwrap().status,
        TaskStatus::Running
    );

    assert!(scheduler.cancel_task(id).await);
    let snapshot = scheduler.get_task(id).await.unwrap();
    assert_eq!(snapshot.status, TaskStatus::Cancelled);
    assert!(!scheduler.monitor().is_monitored(id).await);

    // Later ticks must not resurrect or re-reap the task.
    scheduler.tick().await;
    assert_eq!(
        scheduler.get_task(id).await.unwrap().status,
        TaskStatus::Cancelled
    );
}

#[tokio::test]
async fn shutdown_drains_in_flight_tasks() {
    let scheduler = Arc::new(Scheduler::new(
        SchedulerConfig::default().with_tick_interval(Duration::from_millis(10)),
    ));
    scheduler
        .register_handler(
            "hang",
            handler_fn(|_| async {
                tokio::time::sleep(Duration::from_secs(300)).await;
                Ok(serde_json::Value::Null)
            }),
        )
        .await;
    let id = scheduler
        .create_task(TaskSpec::new("interrupted", "hang"))
        .await
        .unwrap();

    let runner = tokio::spawn({
        let scheduler = Arc::clone(&scheduler);
        async move { scheduler.run().await }
    });

    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(scheduler.get_system_status().await.active);

    scheduler.shutdown().await;
    runner.await.unwrap();

    let status = scheduler.get_system_status().await;
    assert!(!status.active);
    assert_eq!(status.running_tasks, 0);

    let snapshot = scheduler.get_task(id).await.unwrap();
    assert_eq!(snapshot.status, TaskStatus::Cancelled);
    assert_eq!(snapshot.error_message.unwrap(), "cancelled at shutdown");
}

#[tokio::test]
async fn system_status_aggregates_all_three_components() {
    let scheduler = Scheduler::new(SchedulerConfig::default().with_max_concurrent(3));
    let log = Arc::new(Mutex::new(Vec::new()));
    scheduler
        .register_handler("record", recording_handler(Arc::clone(&log)))
        .await;

    let a = scheduler
        .create_task(TaskSpec::new("a", "record").with_estimated_cost(2.5))
        .await
        .unwrap();
    let b = scheduler
        .create_task(TaskSpec::new("b", "record"))
        .await
        .unwrap();
    assert_eq!(settle(&scheduler, a).await, TaskStatus::Completed);
    assert_eq!(settle(&scheduler, b).await, TaskStatus::Completed);

    let status = scheduler.get_system_status().await;
    assert_eq!(status.total_tasks, 2);
    assert_eq!(status.running_tasks, 0);
    assert_eq!(status.max_concurrent, 3);
    assert_eq!(status.task_counts[&TaskStatus::Completed], 2);
    assert_eq!(status.task_counts[&TaskStatus::Pending], 0);
    assert_eq!(status.monitor.monitored_tasks, 0);
    assert_eq!(status.ledger.total_costs_24h, 2.5);

    // Snapshots serialize for dashboards.
    let json = serde_json::to_value(&status).unwrap();
    assert_eq!(json["total_tasks"], 2);
}
