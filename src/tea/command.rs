//! Commands for the TEA pattern.
//!
//! Commands are outputs from the update function, executed by the logic loop.

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    Quit,
}
