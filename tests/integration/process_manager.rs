//! Process registry against real processes.

use std::sync::Arc;
use std::time::Duration;

use orca::process::{ProcessHandle, ProcessManager};

/// Test: Count consistency under concurrency
/// Given many tasks tracking and untracking at once
/// When they all finish
/// Then the count equals tracked minus untracked
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_count_matches_track_minus_untrack() {
    let manager = Arc::new(ProcessManager::new());

    let mut handles = Vec::new();
    for i in 0..50u32 {
        let manager = manager.clone();
        handles.push(tokio::spawn(async move {
            let handle = ProcessHandle::new(20_000 + i, format!("agent-{i}"));
            manager.track(handle.clone());
            tokio::task::yield_now().await;
            if i % 2 == 0 {
                manager.untrack(&handle);
                // A second untrack must not disturb anyone else.
                manager.untrack(&handle);
            }
        }));
    }
    for handle in handles {
        handle.await.unwrap();
    }

    assert_eq!(manager.count(), 25);
    assert_eq!(manager.tracked().len(), 25);
}

#[cfg(unix)]
mod unix {
    use super::*;
    use std::os::unix::process::ExitStatusExt;

    use orca::Error;

    use crate::fixtures::spawn_sleeper;

    /// Test: Group kill reaches live processes
    /// Given two sleeping processes, each leading its own group
    /// When kill_all runs
    /// Then both die from SIGKILL and both are still tracked
    #[test]
    fn test_kill_all_kills_live_groups_and_keeps_tracking() {
        let manager = ProcessManager::new();
        let mut children = vec![spawn_sleeper(30), spawn_sleeper(30)];
        let handles: Vec<ProcessHandle> = children
            .iter()
            .map(|c| ProcessHandle::new(c.id(), "sleeper"))
            .collect();
        for handle in &handles {
            manager.track(handle.clone());
        }

        manager.kill_all().unwrap();

        for child in &mut children {
            let status = child.wait().unwrap();
            assert_eq!(status.signal(), Some(9), "expected SIGKILL, got {:?}", status);
        }
        assert_eq!(manager.count(), 2, "kill_all never untracks");

        for handle in &handles {
            manager.untrack(handle);
        }
        assert_eq!(manager.count(), 0);
    }

    /// Test: Kill completeness with a failure in the middle
    /// Given a live process, an already exited one, and another live one
    /// When kill_all runs
    /// Then the exited one is reported and both live ones are still killed
    #[test]
    fn test_kill_all_continues_past_failures() {
        let manager = ProcessManager::new();

        let mut gone = spawn_sleeper(0);
        gone.wait().unwrap();
        let gone_handle = ProcessHandle::new(gone.id(), "gone");

        let mut first = spawn_sleeper(30);
        let mut last = spawn_sleeper(30);
        manager.track(ProcessHandle::new(first.id(), "first"));
        manager.track(gone_handle.clone());
        manager.track(ProcessHandle::new(last.id(), "last"));

        let err = manager.kill_all().unwrap_err();
        match &err {
            Error::KillAll(failures) => {
                assert_eq!(failures.len(), 1);
                assert_eq!(failures[0].pid, gone_handle.pid());
                assert_eq!(failures[0].label, "gone");
            }
            other => panic!("expected KillAll, got {:?}", other),
        }
        assert!(err.to_string().contains("gone"));

        assert_eq!(first.wait().unwrap().signal(), Some(9));
        assert_eq!(last.wait().unwrap().signal(), Some(9));
        assert_eq!(manager.count(), 3);
    }

    /// Test: Scoped tracking around a real child
    #[tokio::test]
    async fn test_scoped_guard_untracks_after_exit() {
        let manager = Arc::new(ProcessManager::new());
        let mut child = tokio::process::Command::new("sleep")
            .arg("0.05")
            .process_group(0)
            .spawn()
            .unwrap();
        let pid = child.id().unwrap();

        {
            let guard = manager.track_scoped(ProcessHandle::new(pid, "short"));
            assert!(manager.is_tracked(guard.handle()));
            let status = tokio::time::timeout(Duration::from_secs(5), child.wait())
                .await
                .unwrap()
                .unwrap();
            assert!(status.success());
        }
        assert_eq!(manager.count(), 0);
    }
}
