//! Model for the TEA pattern.
//!
//! The Model is pure dashboard state: no channels, no handles. It is rebuilt
//! entirely from bus events, so it knows only what has been published.

use std::collections::{HashMap, VecDeque};

use crate::event::{ProgressCounts, TaskId, TaskStatus};
use crate::render::{next_version, RenderState, TaskView};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NotificationLevel {
    /// Displayed in red with an "Error:" prefix
    Error,
    /// Displayed in green
    Info,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notification {
    pub level: NotificationLevel,
    pub message: String,
}

/// One task as seen through its events.
#[derive(Debug, Clone)]
pub struct TaskRow {
    pub id: TaskId,
    pub label: String,
    pub status: TaskStatus,
    /// Most recent output lines, oldest first.
    pub output: VecDeque<String>,
    pub exit_code: Option<i32>,
    pub duration_ms: Option<u64>,
    pub error: Option<String>,
}

impl TaskRow {
    fn new(id: TaskId, label: String) -> Self {
        Self {
            id,
            label,
            status: TaskStatus::Pending,
            output: VecDeque::new(),
            exit_code: None,
            duration_ms: None,
            error: None,
        }
    }

    fn view(&self) -> TaskView {
        TaskView {
            id: self.id,
            label: self.label.clone(),
            status: self.status,
            exit_code: self.exit_code,
            duration_ms: self.duration_ms,
            error: self.error.clone(),
        }
    }
}

#[derive(Debug)]
pub struct Model {
    /// Tasks in the order they were first seen.
    pub tasks: Vec<TaskRow>,
    index: HashMap<TaskId, usize>,
    pub selected: usize,
    /// Move the selection to whichever task printed most recently.
    pub follow: bool,
    pub progress: ProgressCounts,
    pub output_lines: usize,
    pub notification: Option<Notification>,
    /// Whether the keymap legend is expanded (toggled by '?')
    pub show_keymap: bool,
    pub bus_closed: bool,
    pub dirty: bool,
}

impl Model {
    pub fn new(output_lines: usize) -> Self {
        Self {
            tasks: Vec::new(),
            index: HashMap::new(),
            selected: 0,
            follow: true,
            progress: ProgressCounts::default(),
            output_lines: output_lines.max(1),
            notification: None,
            show_keymap: false,
            bus_closed: false,
            dirty: true,
        }
    }

    /// Position of `id`, inserting a new row when the task is unknown.
    pub fn row_index(&mut self, id: TaskId, label: &str) -> usize {
        if let Some(&idx) = self.index.get(&id) {
            if self.tasks[idx].label.is_empty() && !label.is_empty() {
                self.tasks[idx].label = label.to_string();
            }
            return idx;
        }
        let idx = self.tasks.len();
        self.tasks.push(TaskRow::new(id, label.to_string()));
        self.index.insert(id, idx);
        idx
    }

    pub fn task(&self, id: TaskId) -> Option<&TaskRow> {
        self.index.get(&id).map(|&idx| &self.tasks[idx])
    }

    /// Append a line to a task's output, evicting the oldest past the cap.
    pub fn push_output(&mut self, idx: usize, line: String) {
        let cap = self.output_lines;
        let output = &mut self.tasks[idx].output;
        output.push_back(line);
        while output.len() > cap {
            output.pop_front();
        }
    }

    pub fn selected_task(&self) -> Option<&TaskRow> {
        self.tasks.get(self.selected)
    }

    pub fn snapshot(&self) -> RenderState {
        let output = self
            .selected_task()
            .map(|t| t.output.iter().cloned().collect::<Vec<_>>().join("\n"))
            .unwrap_or_default();

        RenderState {
            version: next_version(),
            tasks: self.tasks.iter().map(TaskRow::view).collect(),
            selected: self.selected,
            output,
            progress: self.progress,
            follow: self.follow,
            notification: self.notification.clone(),
            show_keymap: self.show_keymap,
            bus_closed: self.bus_closed,
        }
    }
}
