//! Immutable snapshots handed from the logic loop to the render thread.

use std::sync::atomic::{AtomicU64, Ordering};

use crate::event::{ProgressCounts, TaskId, TaskStatus};
use crate::tea::Notification;

#[derive(Debug, Clone)]
pub struct TaskView {
    pub id: TaskId,
    pub label: String,
    pub status: TaskStatus,
    pub exit_code: Option<i32>,
    pub duration_ms: Option<u64>,
    pub error: Option<String>,
}

static VERSION_COUNTER: AtomicU64 = AtomicU64::new(1);

pub fn next_version() -> u64 {
    VERSION_COUNTER.fetch_add(1, Ordering::Relaxed)
}

#[derive(Debug, Clone, Default)]
pub struct RenderState {
    pub version: u64,
    pub tasks: Vec<TaskView>,
    pub selected: usize,
    /// Output of the selected task, newline separated, may contain ANSI.
    pub output: String,
    pub progress: ProgressCounts,
    pub follow: bool,
    pub notification: Option<Notification>,
    pub show_keymap: bool,
    pub bus_closed: bool,
}

impl RenderState {
    pub fn selected_task(&self) -> Option<&TaskView> {
        self.tasks.get(self.selected)
    }

    /// Share of finished tasks, 0-100.
    pub fn percent_done(&self) -> u16 {
        if self.progress.total == 0 {
            return 0;
        }
        let done = self.progress.finished().min(self.progress.total);
        ((done * 100) / self.progress.total) as u16
    }
}
