//! Pure update function for the TEA pattern.
//!
//! The update function takes a model and a message, mutates the model,
//! and returns a list of commands to execute.

use crossterm::event::{KeyCode, KeyEvent, KeyModifiers};

use crate::event::{TaskEvent, TaskStatus};
use crate::{olog_debug, olog_warn};

use super::command::Command;
use super::message::Message;
use super::model::{Model, Notification, NotificationLevel};

fn set_error(model: &mut Model, message: String) {
    olog_warn!("UI Error: {}", message);
    model.notification = Some(Notification {
        level: NotificationLevel::Error,
        message,
    });
    model.dirty = true;
}

fn set_info(model: &mut Model, message: String) {
    model.notification = Some(Notification {
        level: NotificationLevel::Info,
        message,
    });
    model.dirty = true;
}

/// Pure update function: Model + Message → Commands
pub fn update(model: &mut Model, msg: Message) -> Vec<Command> {
    let mut cmds = Vec::new();

    match msg {
        Message::Key(key) => {
            model.notification = None;
            model.dirty = true;
            update_keys(model, key, &mut cmds);
        }

        Message::Resize(_, _) => {
            model.dirty = true;
        }

        Message::Task(event) => update_task(model, event),

        Message::Progress(counts) => {
            if model.progress != counts {
                model.progress = counts;
                model.dirty = true;
            }
        }

        Message::BusClosed => {
            if !model.bus_closed {
                olog_debug!("Message::BusClosed");
                model.bus_closed = true;
                let p = model.progress;
                if p.failed > 0 {
                    set_error(
                        model,
                        format!("{} of {} tasks failed. Press q to exit.", p.failed, p.total),
                    );
                } else {
                    set_info(model, "All tasks finished. Press q to exit.".to_string());
                }
            }
        }
    }

    cmds
}

fn update_keys(model: &mut Model, key: KeyEvent, cmds: &mut Vec<Command>) {
    if key.modifiers.contains(KeyModifiers::CONTROL) && key.code == KeyCode::Char('c') {
        cmds.push(Command::Quit);
        return;
    }

    match key.code {
        KeyCode::Char('j') | KeyCode::Down => {
            if !model.tasks.is_empty() {
                model.selected = (model.selected + 1) % model.tasks.len();
                model.follow = false;
            }
        }

        KeyCode::Char('k') | KeyCode::Up => {
            if !model.tasks.is_empty() {
                model.selected = model
                    .selected
                    .checked_sub(1)
                    .unwrap_or(model.tasks.len() - 1);
                model.follow = false;
            }
        }

        KeyCode::Char('f') => {
            model.follow = !model.follow;
            let state = if model.follow { "on" } else { "off" };
            set_info(model, format!("Follow {}", state));
        }

        KeyCode::Char('q') | KeyCode::Esc => {
            cmds.push(Command::Quit);
        }

        KeyCode::Char('?') => {
            model.show_keymap = !model.show_keymap;
        }

        _ => {}
    }
}

fn update_task(model: &mut Model, event: TaskEvent) {
    match event {
        TaskEvent::StatusChanged {
            task_id, label, to, ..
        } => {
            let idx = model.row_index(task_id, &label);
            model.tasks[idx].status = to;
            if to == TaskStatus::Running && model.follow {
                model.selected = idx;
            }
        }

        TaskEvent::Output { task_id, line, .. } => {
            let idx = model.row_index(task_id, "");
            model.push_output(idx, line);
            if model.follow {
                model.selected = idx;
            }
        }

        TaskEvent::Completed {
            task_id,
            duration_ms,
            exit_code,
            ..
        } => {
            let idx = model.row_index(task_id, "");
            let row = &mut model.tasks[idx];
            row.exit_code = Some(exit_code);
            row.duration_ms = Some(duration_ms);
        }

        TaskEvent::Failed {
            task_id,
            duration_ms,
            error,
            exit_code,
            ..
        } => {
            let idx = model.row_index(task_id, "");
            let row = &mut model.tasks[idx];
            row.exit_code = exit_code;
            row.duration_ms = Some(duration_ms);
            row.error = Some(error.clone());
            let label = if row.label.is_empty() {
                task_id.short()
            } else {
                row.label.clone()
            };
            set_error(model, format!("{} failed: {}", label, error));
        }
    }
    model.dirty = true;
}
