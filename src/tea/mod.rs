//! The Elm Architecture (TEA) for the orca dashboard.
//!
//! - `Model`: dashboard state built from bus events
//! - `Message`: keyboard, terminal and bus inputs
//! - `Command`: side effects requested by `update`
//! - `update`: pure function that transforms state

pub mod command;
pub mod message;
pub mod model;
pub mod update;

pub use command::Command;
pub use message::Message;
pub use model::{Model, Notification, NotificationLevel, TaskRow};
pub use update::update;
