use std::fmt;
use std::path::PathBuf;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Config parse error in {}: {source}", path.display())]
    ConfigParse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("No home directory")]
    NoHomeDir,

    #[error("Unknown agent: {0}")]
    UnknownAgent(String),

    #[error("Unknown provider '{provider}' for agent '{agent}'")]
    UnknownProvider { agent: String, provider: String },

    #[error("Agent not available: {0}")]
    AgentNotAvailable(String),

    #[error("Failed to spawn '{command}': {source}")]
    Spawn {
        command: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to kill {} process(es): {}", .0.len(), join_failures(.0))]
    KillAll(Vec<KillFailure>),

    #[error("Task join error: {0}")]
    TaskJoin(String),
}

pub type Result<T> = std::result::Result<T, Error>;

/// One process that could not be signalled during a kill sweep.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KillFailure {
    pub pid: u32,
    pub label: String,
    pub reason: String,
}

impl fmt::Display for KillFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} (pid {}): {}", self.label, self.pid, self.reason)
    }
}

fn join_failures(failures: &[KillFailure]) -> String {
    failures
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}
