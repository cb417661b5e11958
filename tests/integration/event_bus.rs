//! Event bus behaviour seen from several concurrent publishers and
//! subscribers.

use std::sync::Arc;
use std::time::Duration;

use orca::bus::EventBus;
use orca::event::{DagEvent, Event, OutputStream, ProgressCounts, TaskEvent, TaskId, Topic};

use crate::fixtures::{collect, task_events};

fn line(event: &TaskEvent) -> &str {
    match event {
        TaskEvent::Output { line, .. } => line,
        other => panic!("expected output, got {:?}", other),
    }
}

/// Test: Topic isolation
/// Given one subscriber per topic
/// When events are published to both topics
/// Then each subscriber sees only its own topic
#[tokio::test]
async fn test_topics_are_isolated() {
    let bus = EventBus::new(32);
    let task_sub = bus.subscribe(Topic::Task);
    let dag_sub = bus.subscribe(Topic::Dag);
    let id = TaskId::new();

    for i in 0..5 {
        bus.emit(TaskEvent::output(id, OutputStream::Stdout, format!("{i}")));
        bus.emit(DagEvent::progress(ProgressCounts {
            total: 5,
            completed: i,
            ..Default::default()
        }));
    }
    bus.close();

    let tasks = collect(task_sub, Duration::from_secs(1)).await;
    let dags = collect(dag_sub, Duration::from_secs(1)).await;
    assert_eq!(tasks.len(), 5);
    assert_eq!(dags.len(), 5);
    assert!(tasks.iter().all(|e| e.topic() == Topic::Task));
    assert!(dags.iter().all(|e| matches!(e, Event::Dag(_))));
}

/// Test: Per-topic ordering
/// Given three subscribers on one topic
/// When a single publisher emits a sequence
/// Then every subscriber receives the identical sequence
#[tokio::test]
async fn test_all_subscribers_see_the_same_order() {
    let bus = EventBus::new(256);
    let subs: Vec<_> = (0..3).map(|_| bus.subscribe(Topic::Task)).collect();
    let id = TaskId::new();

    for i in 0..200 {
        bus.emit(TaskEvent::output(id, OutputStream::Stdout, format!("{i}")));
    }
    bus.close();

    let mut seen = Vec::new();
    for sub in subs {
        let events = collect(sub, Duration::from_secs(1)).await;
        let lines: Vec<String> = task_events(&events)
            .into_iter()
            .map(|e| line(e).to_string())
            .collect();
        seen.push(lines);
    }
    let expected: Vec<String> = (0..200).map(|i| i.to_string()).collect();
    for lines in &seen {
        assert_eq!(lines, &expected);
    }
}

/// Test: Concurrent publishers
/// Given four publishers on separate tasks
/// When they publish at the same time
/// Then nothing is lost and each publisher's own order is preserved
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_publishers_keep_their_order() {
    let bus = Arc::new(EventBus::new(1024));
    let sub = bus.subscribe(Topic::Task);
    let ids: Vec<TaskId> = (0..4).map(|_| TaskId::new()).collect();

    let mut handles = Vec::new();
    for id in ids.clone() {
        let bus = bus.clone();
        handles.push(tokio::spawn(async move {
            for i in 0..100 {
                bus.emit(TaskEvent::output(id, OutputStream::Stdout, format!("{i}")));
                if i % 10 == 0 {
                    tokio::task::yield_now().await;
                }
            }
        }));
    }
    for handle in handles {
        handle.await.unwrap();
    }
    bus.close();

    let events = collect(sub, Duration::from_secs(1)).await;
    assert_eq!(events.len(), 400);
    for id in ids {
        let lines: Vec<usize> = task_events(&events)
            .into_iter()
            .filter(|e| e.task_id() == id)
            .map(|e| line(e).parse().unwrap())
            .collect();
        assert_eq!(lines, (0..100).collect::<Vec<_>>());
    }
}

/// Test: Overflow drops newest for the slow subscriber only
/// Given a fast and a stalled subscriber with capacity 8
/// When 20 events are published while the stalled one never reads
/// Then the stalled one keeps the first 8 and the fast one keeps up
#[tokio::test]
async fn test_stalled_subscriber_loses_only_its_own_events() {
    let bus = EventBus::new(8);
    let mut fast = bus.subscribe(Topic::Task);
    let stalled = bus.subscribe(Topic::Task);
    let id = TaskId::new();

    let mut fast_lines = Vec::new();
    for i in 0..20 {
        bus.emit(TaskEvent::output(id, OutputStream::Stdout, format!("{i}")));
        if let Some(Event::Task(event)) = fast.recv().await {
            fast_lines.push(line(&event).to_string());
        }
    }
    bus.close();

    assert_eq!(fast_lines.len(), 20);
    assert_eq!(fast.dropped(), 0);
    assert_eq!(stalled.dropped(), 12);

    let kept = collect(stalled, Duration::from_secs(1)).await;
    let kept: Vec<String> = task_events(&kept)
        .into_iter()
        .map(|e| line(e).to_string())
        .collect();
    assert_eq!(kept, (0..8).map(|i| i.to_string()).collect::<Vec<_>>());
}

/// Test: Close is idempotent and terminal
/// Given an open bus with a pending event
/// When close is called twice and more events are published
/// Then the buffered event is still delivered, nothing after it, and the
/// subscription ends
#[tokio::test]
async fn test_close_twice_then_publish_is_harmless() {
    let bus = EventBus::new(8);
    let mut sub = bus.subscribe(Topic::Task);
    let id = TaskId::new();

    bus.emit(TaskEvent::output(id, OutputStream::Stdout, "before".to_string()));
    bus.close();
    bus.close();
    bus.emit(TaskEvent::output(id, OutputStream::Stdout, "after".to_string()));

    assert!(bus.is_closed());
    match sub.recv().await {
        Some(Event::Task(event)) => assert_eq!(line(&event), "before"),
        other => panic!("expected buffered event, got {:?}", other),
    }
    assert!(sub.recv().await.is_none());
    assert!(bus.subscribe(Topic::Dag).recv().await.is_none());
}

/// Test: Close wakes a suspended consumer
/// Given a consumer waiting on an empty subscription
/// When the bus is closed from another task
/// Then the consumer observes the end of the stream
#[tokio::test]
async fn test_close_wakes_waiting_consumer() {
    let bus = Arc::new(EventBus::new(8));
    let mut sub = bus.subscribe(Topic::Dag);

    let waiter = tokio::spawn(async move { sub.recv().await });
    tokio::time::sleep(Duration::from_millis(20)).await;
    assert!(!waiter.is_finished());

    bus.close();
    let received = tokio::time::timeout(Duration::from_secs(1), waiter)
        .await
        .expect("consumer should wake on close")
        .unwrap();
    assert!(received.is_none());
}

/// Test: Unsubscribe ends one stream only
#[tokio::test]
async fn test_unsubscribe_leaves_other_subscribers() {
    let bus = EventBus::new(8);
    let mut leaving = bus.subscribe(Topic::Task);
    let staying = bus.subscribe(Topic::Task);

    bus.unsubscribe(&leaving);
    bus.emit(TaskEvent::output(TaskId::new(), OutputStream::Stderr, "x".to_string()));
    bus.close();

    assert!(leaving.recv().await.is_none());
    assert_eq!(collect(staying, Duration::from_secs(1)).await.len(), 1);
}
