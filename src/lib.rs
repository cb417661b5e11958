pub mod agent;
pub mod config;
pub mod error;
pub mod log;

// Orchestration core
pub mod bus;
pub mod event;
pub mod launcher;
pub mod process;
pub mod shutdown;
pub mod signals;

// Decoupled game loop architecture
pub mod app;
pub mod headless;
pub mod render;
pub mod tea;
pub mod ui;

pub use error::{Error, KillFailure, Result};
