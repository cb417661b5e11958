//! Events carried by the bus.
//!
//! Every event belongs to exactly one [`Topic`]. Events are plain values:
//! once published they are only ever cloned, never mutated.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Identifier for one unit of work (one launched agent).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TaskId(pub Uuid);

impl TaskId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn short(&self) -> String {
        self.0.to_string()[..8].to_string()
    }
}

impl Default for TaskId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl TaskStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            TaskStatus::Completed | TaskStatus::Failed | TaskStatus::Cancelled
        )
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            TaskStatus::Pending => "pending",
            TaskStatus::Running => "running",
            TaskStatus::Completed => "completed",
            TaskStatus::Failed => "failed",
            TaskStatus::Cancelled => "cancelled",
        };
        f.pad(s)
    }
}

/// A named channel of event traffic with its own subscribers and ordering.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Topic {
    /// Per-task lifecycle and output.
    Task,
    /// Aggregate progress across all tasks of a run.
    Dag,
}

impl Topic {
    pub const ALL: [Topic; 2] = [Topic::Task, Topic::Dag];

    pub fn name(&self) -> &'static str {
        match self {
            Topic::Task => "task",
            Topic::Dag => "dag",
        }
    }
}

impl fmt::Display for Topic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutputStream {
    Stdout,
    Stderr,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TaskEvent {
    StatusChanged {
        task_id: TaskId,
        label: String,
        from: TaskStatus,
        to: TaskStatus,
        at: DateTime<Utc>,
    },
    Output {
        task_id: TaskId,
        stream: OutputStream,
        line: String,
        at: DateTime<Utc>,
    },
    Completed {
        task_id: TaskId,
        duration_ms: u64,
        result: String,
        exit_code: i32,
        at: DateTime<Utc>,
    },
    Failed {
        task_id: TaskId,
        duration_ms: u64,
        error: String,
        exit_code: Option<i32>,
        at: DateTime<Utc>,
    },
}

impl TaskEvent {
    pub fn task_id(&self) -> TaskId {
        match self {
            TaskEvent::StatusChanged { task_id, .. }
            | TaskEvent::Output { task_id, .. }
            | TaskEvent::Completed { task_id, .. }
            | TaskEvent::Failed { task_id, .. } => *task_id,
        }
    }

    pub fn status_changed(task_id: TaskId, label: &str, from: TaskStatus, to: TaskStatus) -> Self {
        TaskEvent::StatusChanged {
            task_id,
            label: label.to_string(),
            from,
            to,
            at: Utc::now(),
        }
    }

    pub fn output(task_id: TaskId, stream: OutputStream, line: String) -> Self {
        TaskEvent::Output {
            task_id,
            stream,
            line,
            at: Utc::now(),
        }
    }
}

/// Counts of work items across one run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ProgressCounts {
    pub total: usize,
    pub completed: usize,
    pub running: usize,
    pub failed: usize,
    pub pending: usize,
}

impl ProgressCounts {
    pub fn finished(&self) -> usize {
        self.completed + self.failed
    }

    pub fn is_done(&self) -> bool {
        self.total > 0 && self.running == 0 && self.pending == 0
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum DagEvent {
    Progress {
        total: usize,
        completed: usize,
        running: usize,
        failed: usize,
        pending: usize,
        at: DateTime<Utc>,
    },
}

impl DagEvent {
    pub fn progress(counts: ProgressCounts) -> Self {
        DagEvent::Progress {
            total: counts.total,
            completed: counts.completed,
            running: counts.running,
            failed: counts.failed,
            pending: counts.pending,
            at: Utc::now(),
        }
    }

    pub fn counts(&self) -> ProgressCounts {
        match *self {
            DagEvent::Progress {
                total,
                completed,
                running,
                failed,
                pending,
                ..
            } => ProgressCounts {
                total,
                completed,
                running,
                failed,
                pending,
            },
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "topic", content = "event", rename_all = "snake_case")]
pub enum Event {
    Task(TaskEvent),
    Dag(DagEvent),
}

impl Event {
    pub fn topic(&self) -> Topic {
        match self {
            Event::Task(_) => Topic::Task,
            Event::Dag(_) => Topic::Dag,
        }
    }
}

impl From<TaskEvent> for Event {
    fn from(ev: TaskEvent) -> Self {
        Event::Task(ev)
    }
}

impl From<DagEvent> for Event {
    fn from(ev: DagEvent) -> Self {
        Event::Dag(ev)
    }
}
