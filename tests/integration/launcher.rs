//! End-to-end runs of shell tasks through launcher, bus, registry,
//! sequencer and the headless UI.

#![cfg(unix)]

use std::time::Duration;

use tokio::sync::mpsc;

use orca::event::{Event, TaskEvent, TaskStatus, Topic};
use orca::headless::HeadlessUi;
use orca::shutdown::{ShutdownState, Teardown, Trigger};
use orca::signals::Signal;

use crate::fixtures::{collect, sh, task_events, wait_until, Harness, SharedBuf};

/// Test: Headless run to natural completion
/// Given three tasks that succeed, fail and write to stderr
/// When they run under the headless UI
/// Then the UI exits once the bus closes and prints every lifecycle event
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_headless_run_completes_when_work_is_done() {
    let harness = Harness::new(256, Duration::from_secs(1));
    let buf = SharedBuf::default();
    let ui = HeadlessUi::with_writer(&harness.bus, Box::new(buf.clone()));

    let specs = vec![
        sh("ok", "echo hello; echo world"),
        sh("bad", "echo oops >&2; exit 3"),
        sh("noisy", "echo to-stderr >&2"),
    ];
    let launcher = harness.launcher.clone();
    let bus = harness.bus.clone();
    let work = tokio::spawn(async move {
        let outcomes = launcher.run_all(specs).await;
        bus.close();
        outcomes
    });

    let (_signal_tx, signals) = mpsc::channel(4);
    let report = tokio::time::timeout(Duration::from_secs(10), harness.sequencer.run(ui, signals))
        .await
        .expect("headless UI should exit after the bus closes");
    let outcomes = work.await.unwrap();

    assert_eq!(report.trigger, Trigger::UiExited);
    assert!(report.ui_result.is_ok());
    assert_eq!(harness.processes.count(), 0);

    let by_label = |label: &str| outcomes.iter().find(|o| o.label == label).unwrap();
    assert_eq!(by_label("ok").status, TaskStatus::Completed);
    assert_eq!(by_label("bad").status, TaskStatus::Failed);
    assert_eq!(by_label("bad").exit_code, Some(3));
    assert_eq!(by_label("noisy").status, TaskStatus::Completed);

    let lines = buf.json_lines();
    let completed = lines
        .iter()
        .filter(|l| l["topic"] == "task" && l["event"]["kind"] == "completed")
        .count();
    let failed = lines
        .iter()
        .filter(|l| l["topic"] == "task" && l["event"]["kind"] == "failed")
        .count();
    assert_eq!((completed, failed), (2, 1));
    assert!(lines
        .iter()
        .any(|l| l["event"]["kind"] == "output" && l["event"]["line"] == "hello"));

    let last_progress = lines
        .iter()
        .filter(|l| l["topic"] == "dag")
        .last()
        .expect("progress events");
    assert_eq!(last_progress["event"]["total"], 3);
    assert_eq!(last_progress["event"]["completed"], 2);
    assert_eq!(last_progress["event"]["failed"], 1);
    assert_eq!(last_progress["event"]["running"], 0);
}

/// Test: Per-task event order
/// Given one task that prints several lines
/// Then its events arrive as running, outputs in order, completed, final status
#[tokio::test]
async fn test_task_events_arrive_in_lifecycle_order() {
    let harness = Harness::new(256, Duration::from_secs(1));
    let sub = harness.bus.subscribe(Topic::Task);

    let outcome = harness
        .launcher
        .run_task(sh("lines", "for i in 1 2 3; do echo line-$i; done"))
        .await;
    harness.bus.close();
    assert_eq!(outcome.status, TaskStatus::Completed);

    let events = collect(sub, Duration::from_secs(1)).await;
    let kinds: Vec<String> = task_events(&events)
        .into_iter()
        .map(|e| match e {
            TaskEvent::StatusChanged { to, .. } => format!("status:{}", to),
            TaskEvent::Output { line, .. } => format!("out:{}", line),
            TaskEvent::Completed { exit_code, .. } => format!("completed:{}", exit_code),
            TaskEvent::Failed { error, .. } => format!("failed:{}", error),
        })
        .collect();
    assert_eq!(
        kinds,
        vec![
            "status:running",
            "out:line-1",
            "out:line-2",
            "out:line-3",
            "completed:0",
            "status:completed",
        ]
    );
}

/// Test: Signal during a run
/// Given two long-running tasks under the headless UI
/// When an interrupt arrives
/// Then the sequencer kills both groups, the UI quits cleanly, the tasks end
/// as failed, the registry empties, and later launches are cancelled
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_signal_stops_running_work() {
    let harness = Harness::new(256, Duration::from_secs(2));
    let ui = HeadlessUi::with_writer(&harness.bus, Box::new(SharedBuf::default()));

    let launcher = harness.launcher.clone();
    let work = tokio::spawn(async move {
        launcher
            .run_all(vec![sh("slow-a", "sleep 30"), sh("slow-b", "sleep 30 & wait")])
            .await
    });

    let processes = harness.processes.clone();
    assert!(wait_until(Duration::from_secs(5), || processes.count() == 2).await);

    let (signal_tx, signals) = mpsc::channel(4);
    signal_tx.send(Signal::Interrupt).await.unwrap();
    let report = tokio::time::timeout(Duration::from_secs(5), harness.sequencer.run(ui, signals))
        .await
        .expect("sequencer should complete");

    assert_eq!(report.trigger, Trigger::Signal(Signal::Interrupt));
    assert_eq!(report.teardown, Teardown::Clean);
    assert!(report.kill_error.is_none());
    assert_eq!(harness.sequencer.state(), ShutdownState::Complete);

    let outcomes = tokio::time::timeout(Duration::from_secs(5), work)
        .await
        .expect("killed tasks should finish")
        .unwrap();
    assert!(outcomes.iter().all(|o| o.status == TaskStatus::Failed));
    assert_eq!(harness.processes.count(), 0);

    assert!(harness.work_token().is_cancelled());
    let sub = harness.bus.subscribe(Topic::Task);
    let late = harness.launcher.run_task(sh("late", "echo never")).await;
    assert_eq!(late.status, TaskStatus::Cancelled);
    harness.bus.close();
    let events = collect(sub, Duration::from_secs(1)).await;
    assert!(matches!(
        events.first(),
        Some(Event::Task(TaskEvent::StatusChanged {
            to: TaskStatus::Cancelled,
            ..
        }))
    ));
}
