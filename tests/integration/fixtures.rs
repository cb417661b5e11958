//! Test fixtures for integration tests.
//!
//! Provides helpers for:
//! - Wiring a bus, registry and launcher together
//! - Shell task specs
//! - Scripted UIs for the shutdown sequencer
//! - Collecting events and polling for conditions

use std::io::{self, Write};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use tokio_util::sync::CancellationToken;

use orca::app::{QuitHandle, UiRunner};
use orca::bus::{EventBus, Subscription};
use orca::event::{Event, TaskEvent};
use orca::launcher::{Launcher, TaskSpec};
use orca::process::ProcessManager;
use orca::shutdown::ShutdownSequencer;

/// Bus, registry, sequencer and launcher sharing one work token.
pub struct Harness {
    pub bus: Arc<EventBus>,
    pub processes: Arc<ProcessManager>,
    pub sequencer: ShutdownSequencer,
    pub launcher: Launcher,
}

impl Harness {
    pub fn new(capacity: usize, grace: Duration) -> Self {
        let bus = Arc::new(EventBus::new(capacity));
        let processes = Arc::new(ProcessManager::new());
        let sequencer = ShutdownSequencer::new(processes.clone(), grace)
            .with_force_exit(Arc::new(|_| {}));
        let launcher = Launcher::new(bus.clone(), processes.clone(), sequencer.work_token());
        Self {
            bus,
            processes,
            sequencer,
            launcher,
        }
    }

    pub fn work_token(&self) -> CancellationToken {
        self.sequencer.work_token()
    }
}

/// A task running `script` under `sh -c`.
pub fn sh(label: &str, script: &str) -> TaskSpec {
    TaskSpec::new(
        label,
        vec!["sh".to_string(), "-c".to_string(), script.to_string()],
    )
}

/// Drain a subscription until the bus closes, failing after `limit`.
pub async fn collect(mut sub: Subscription, limit: Duration) -> Vec<Event> {
    let mut events = Vec::new();
    let deadline = tokio::time::Instant::now() + limit;
    loop {
        match tokio::time::timeout_at(deadline, sub.recv()).await {
            Ok(Some(event)) => events.push(event),
            Ok(None) => return events,
            Err(_) => panic!("subscription still open after {:?}", limit),
        }
    }
}

/// Only the task events of `events`.
pub fn task_events(events: &[Event]) -> Vec<&TaskEvent> {
    events
        .iter()
        .filter_map(|e| match e {
            Event::Task(task) => Some(task),
            _ => None,
        })
        .collect()
}

/// Poll `cond` until it holds or `limit` elapses.
pub async fn wait_until(limit: Duration, mut cond: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + limit;
    while Instant::now() < deadline {
        if cond() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    cond()
}

/// How a [`ScriptedUi`] behaves.
#[derive(Clone, Copy)]
pub enum Script {
    /// Exit when asked to.
    Cooperative,
    /// Exit on its own after the delay, or earlier when asked.
    ExitAfter(Duration),
    /// Ignore quit requests until released by the test.
    Stubborn,
}

pub struct ScriptedUi {
    quit: QuitHandle,
    script: Script,
    release: Arc<AtomicBool>,
}

impl ScriptedUi {
    pub fn new(script: Script) -> Self {
        Self {
            quit: QuitHandle::new(),
            script,
            release: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Lets a stubborn UI finish so the runtime can shut down.
    pub fn release(&self) -> Arc<AtomicBool> {
        self.release.clone()
    }
}

impl UiRunner for ScriptedUi {
    fn quit_handle(&self) -> QuitHandle {
        self.quit.clone()
    }

    fn run(self) -> orca::Result<()> {
        let started = Instant::now();
        loop {
            let done = match self.script {
                Script::Cooperative => self.quit.is_quit(),
                Script::ExitAfter(after) => self.quit.is_quit() || started.elapsed() >= after,
                Script::Stubborn => self.release.load(Ordering::SeqCst),
            };
            if done {
                return Ok(());
            }
            std::thread::sleep(Duration::from_millis(1));
        }
    }
}

/// In-memory writer shared between a UI and the test.
#[derive(Clone, Default)]
pub struct SharedBuf(Arc<Mutex<Vec<u8>>>);

impl SharedBuf {
    pub fn json_lines(&self) -> Vec<serde_json::Value> {
        let bytes = self.0.lock().unwrap().clone();
        String::from_utf8(bytes)
            .unwrap()
            .lines()
            .map(|line| serde_json::from_str(line).unwrap())
            .collect()
    }
}

impl Write for SharedBuf {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.lock().unwrap().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// Start `sleep` as the leader of its own process group.
#[cfg(unix)]
pub fn spawn_sleeper(secs: u32) -> std::process::Child {
    use std::os::unix::process::CommandExt;

    std::process::Command::new("sleep")
        .arg(secs.to_string())
        .process_group(0)
        .spawn()
        .expect("spawn sleep")
}
