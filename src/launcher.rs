//! Launching agent processes and reporting on them.
//!
//! The launcher is the only producer of task events. For each task it:
//! 1. checks the work token (no new launches once shutdown has begun),
//! 2. spawns the command in its own process group,
//! 3. tracks the child with a scoped guard so the child is untracked exactly
//!    when this code path is done with it,
//! 4. streams stdout/stderr lines onto the bus,
//! 5. publishes the final status and result.
//!
//! `run_all` starts every task at once. There is no ordering between tasks
//! and nothing is retried.

use std::collections::{BTreeMap, VecDeque};
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Instant;

use chrono::Utc;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::Command;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

use crate::bus::EventBus;
use crate::event::{DagEvent, OutputStream, ProgressCounts, TaskEvent, TaskId, TaskStatus};
use crate::process::{ProcessHandle, ProcessManager};
use crate::{olog, olog_debug, olog_error, olog_trace, Error, Result};

/// Lines of output kept for the result string.
const RESULT_TAIL_LINES: usize = 20;

/// One command to run as one task.
#[derive(Debug, Clone)]
pub struct TaskSpec {
    pub id: TaskId,
    pub label: String,
    pub argv: Vec<String>,
    pub env: BTreeMap<String, String>,
    pub cwd: Option<PathBuf>,
}

impl TaskSpec {
    pub fn new(label: &str, argv: Vec<String>) -> Self {
        Self {
            id: TaskId::new(),
            label: label.to_string(),
            argv,
            env: BTreeMap::new(),
            cwd: None,
        }
    }

    pub fn with_env(mut self, env: BTreeMap<String, String>) -> Self {
        self.env = env;
        self
    }

    pub fn with_cwd(mut self, cwd: PathBuf) -> Self {
        self.cwd = Some(cwd);
        self
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct TaskOutcome {
    pub id: TaskId,
    pub label: String,
    pub status: TaskStatus,
    pub exit_code: Option<i32>,
    pub duration_ms: u64,
}

/// Running counts for one batch, published on the dag topic on every change.
pub struct Tally {
    bus: Arc<EventBus>,
    counts: Mutex<ProgressCounts>,
}

impl Tally {
    pub fn new(bus: Arc<EventBus>, total: usize) -> Self {
        Self {
            bus,
            counts: Mutex::new(ProgressCounts {
                total,
                pending: total,
                ..Default::default()
            }),
        }
    }

    pub fn snapshot(&self) -> ProgressCounts {
        *self.counts.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn publish(&self) {
        self.bus.emit(DagEvent::progress(self.snapshot()));
    }

    fn started(&self) {
        self.apply(|c| {
            c.pending = c.pending.saturating_sub(1);
            c.running += 1;
        });
    }

    fn finished(&self, was_running: bool, status: TaskStatus) {
        self.apply(|c| {
            if was_running {
                c.running = c.running.saturating_sub(1);
            } else {
                c.pending = c.pending.saturating_sub(1);
            }
            match status {
                TaskStatus::Completed => c.completed += 1,
                // Cancelled work never ran to completion; it counts as failed.
                _ => c.failed += 1,
            }
        });
    }

    fn apply(&self, f: impl FnOnce(&mut ProgressCounts)) {
        // Publish while holding the lock so snapshots reach the bus in order.
        let mut counts = self.counts.lock().unwrap_or_else(PoisonError::into_inner);
        f(&mut counts);
        self.bus.emit(DagEvent::progress(*counts));
    }
}

#[derive(Clone)]
pub struct Launcher {
    bus: Arc<EventBus>,
    processes: Arc<ProcessManager>,
    work: CancellationToken,
}

impl Launcher {
    pub fn new(bus: Arc<EventBus>, processes: Arc<ProcessManager>, work: CancellationToken) -> Self {
        Self {
            bus,
            processes,
            work,
        }
    }

    /// Launch every task concurrently and wait for all of them.
    pub async fn run_all(&self, specs: Vec<TaskSpec>) -> Vec<TaskOutcome> {
        let tally = Arc::new(Tally::new(self.bus.clone(), specs.len()));
        tally.publish();

        let mut set = JoinSet::new();
        for spec in specs {
            let launcher = self.clone();
            let tally = tally.clone();
            set.spawn(async move { launcher.run_tracked(spec, Some(&tally)).await });
        }

        let mut outcomes = Vec::new();
        while let Some(joined) = set.join_next().await {
            match joined {
                Ok(outcome) => outcomes.push(outcome),
                Err(e) => olog_error!("launcher task panicked: {}", e),
            }
        }
        olog!(
            "run_all finished: {} tasks, {} completed",
            outcomes.len(),
            outcomes
                .iter()
                .filter(|o| o.status == TaskStatus::Completed)
                .count()
        );
        outcomes
    }

    /// Run a single task outside of any batch.
    pub async fn run_task(&self, spec: TaskSpec) -> TaskOutcome {
        self.run_tracked(spec, None).await
    }

    async fn run_tracked(&self, spec: TaskSpec, tally: Option<&Tally>) -> TaskOutcome {
        let started = Instant::now();

        if self.work.is_cancelled() {
            olog_debug!("launch of {} skipped: shutting down", spec.label);
            return self.finish_without_running(&spec, started, tally, TaskStatus::Cancelled, None);
        }

        let mut child = match self.spawn(&spec) {
            Ok(child) => child,
            Err(e) => {
                olog_error!("failed to launch {}: {}", spec.label, e);
                return self.finish_without_running(
                    &spec,
                    started,
                    tally,
                    TaskStatus::Failed,
                    Some(e.to_string()),
                );
            }
        };

        let Some(pid) = child.id() else {
            // Already reaped; nothing left to track.
            let _ = child.wait().await;
            return self.finish_without_running(
                &spec,
                started,
                tally,
                TaskStatus::Failed,
                Some("process exited before it could be tracked".to_string()),
            );
        };
        let _guard = self
            .processes
            .track_scoped(ProcessHandle::new(pid, spec.label.as_str()));

        self.bus.emit(TaskEvent::status_changed(
            spec.id,
            &spec.label,
            TaskStatus::Pending,
            TaskStatus::Running,
        ));
        if let Some(tally) = tally {
            tally.started();
        }
        olog!("started {} pid={} id={}", spec.label, pid, spec.id.short());

        let tail = Arc::new(Mutex::new(VecDeque::with_capacity(RESULT_TAIL_LINES)));
        let mut readers = JoinSet::new();
        if let Some(stdout) = child.stdout.take() {
            readers.spawn(pump_lines(
                self.bus.clone(),
                spec.id,
                OutputStream::Stdout,
                stdout,
                Some(tail.clone()),
            ));
        }
        if let Some(stderr) = child.stderr.take() {
            readers.spawn(pump_lines(
                self.bus.clone(),
                spec.id,
                OutputStream::Stderr,
                stderr,
                None,
            ));
        }

        let waited = child.wait().await;
        // Descendants may keep the pipes open after a group kill misses them;
        // the readers end once every writer is gone.
        while readers.join_next().await.is_some() {}

        let duration_ms = elapsed_ms(started);
        let (status, exit_code) = match waited {
            Ok(exit) if exit.success() => {
                let result = tail
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner)
                    .iter()
                    .cloned()
                    .collect::<Vec<_>>()
                    .join("\n");
                self.bus.emit(TaskEvent::Completed {
                    task_id: spec.id,
                    duration_ms,
                    result,
                    exit_code: exit.code().unwrap_or(0),
                    at: Utc::now(),
                });
                (TaskStatus::Completed, exit.code())
            }
            Ok(exit) => {
                self.bus.emit(TaskEvent::Failed {
                    task_id: spec.id,
                    duration_ms,
                    error: format!("process exited with {}", exit),
                    exit_code: exit.code(),
                    at: Utc::now(),
                });
                (TaskStatus::Failed, exit.code())
            }
            Err(e) => {
                self.bus.emit(TaskEvent::Failed {
                    task_id: spec.id,
                    duration_ms,
                    error: format!("wait failed: {}", e),
                    exit_code: None,
                    at: Utc::now(),
                });
                (TaskStatus::Failed, None)
            }
        };

        self.bus.emit(TaskEvent::status_changed(
            spec.id,
            &spec.label,
            TaskStatus::Running,
            status,
        ));
        if let Some(tally) = tally {
            tally.finished(true, status);
        }
        olog!(
            "{} {} in {}ms (exit {:?})",
            spec.label,
            status,
            duration_ms,
            exit_code
        );

        TaskOutcome {
            id: spec.id,
            label: spec.label,
            status,
            exit_code,
            duration_ms,
        }
    }

    fn spawn(&self, spec: &TaskSpec) -> Result<tokio::process::Child> {
        let Some((program, args)) = spec.argv.split_first() else {
            return Err(Error::Spawn {
                command: String::new(),
                source: std::io::Error::new(std::io::ErrorKind::InvalidInput, "empty command"),
            });
        };

        let mut cmd = Command::new(program);
        cmd.args(args)
            .envs(&spec.env)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        if let Some(cwd) = &spec.cwd {
            cmd.current_dir(cwd);
        }
        // Own process group, so kill_all reaches the agent's children too.
        #[cfg(unix)]
        cmd.process_group(0);

        olog_debug!("spawn {:?}", spec.argv);
        cmd.spawn().map_err(|source| Error::Spawn {
            command: program.clone(),
            source,
        })
    }

    fn finish_without_running(
        &self,
        spec: &TaskSpec,
        started: Instant,
        tally: Option<&Tally>,
        status: TaskStatus,
        error: Option<String>,
    ) -> TaskOutcome {
        let duration_ms = elapsed_ms(started);
        if let Some(error) = error {
            self.bus.emit(TaskEvent::Failed {
                task_id: spec.id,
                duration_ms,
                error,
                exit_code: None,
                at: Utc::now(),
            });
        }
        self.bus.emit(TaskEvent::status_changed(
            spec.id,
            &spec.label,
            TaskStatus::Pending,
            status,
        ));
        if let Some(tally) = tally {
            tally.finished(false, status);
        }
        TaskOutcome {
            id: spec.id,
            label: spec.label.clone(),
            status,
            exit_code: None,
            duration_ms,
        }
    }
}

async fn pump_lines<R>(
    bus: Arc<EventBus>,
    task_id: TaskId,
    stream: OutputStream,
    reader: R,
    tail: Option<Arc<Mutex<VecDeque<String>>>>,
) where
    R: AsyncRead + Unpin,
{
    let mut lines = BufReader::new(reader).lines();
    loop {
        match lines.next_line().await {
            Ok(Some(line)) => {
                olog_trace!("{} {:?}: {}", task_id.short(), stream, line);
                if let Some(tail) = &tail {
                    let mut tail = tail.lock().unwrap_or_else(PoisonError::into_inner);
                    if tail.len() == RESULT_TAIL_LINES {
                        tail.pop_front();
                    }
                    tail.push_back(line.clone());
                }
                bus.emit(TaskEvent::output(task_id, stream, line));
            }
            Ok(None) => break,
            Err(e) => {
                olog_debug!("{} {:?} read error: {}", task_id.short(), stream, e);
                break;
            }
        }
    }
}

fn elapsed_ms(started: Instant) -> u64 {
    u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX)
}
