//! Messages for the TEA pattern.
//!
//! Messages come from the terminal (keys, resizes) or from bus
//! subscriptions drained by the logic loop.

use crossterm::event::KeyEvent;

use crate::event::{ProgressCounts, TaskEvent};

#[derive(Debug, Clone)]
pub enum Message {
    // Terminal
    Key(KeyEvent),
    Resize(u16, u16),

    // Bus
    Task(TaskEvent),
    Progress(ProgressCounts),
    /// Every subscription has terminated; no more events will arrive.
    BusClosed,
}
