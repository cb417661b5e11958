use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::{olog_debug, Error, Result};

pub const DEFAULT_SHUTDOWN_GRACE_MS: u64 = 3_000;
pub const DEFAULT_EVENT_BUFFER: usize = 256;
pub const DEFAULT_OUTPUT_LINES: usize = 500;

/// How to invoke one agent CLI.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(default)]
pub struct ProviderConfig {
    pub command: String,
    pub args: Vec<String>,
    /// Flag that precedes the system prompt, e.g. `--append-system-prompt`.
    pub system_prompt_flag: Option<String>,
    pub env: BTreeMap<String, String>,
}

/// A named agent: a provider plus its own prompt and extra arguments.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(default)]
pub struct AgentConfig {
    pub provider: String,
    pub system_prompt: Option<String>,
    pub args: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct Config {
    pub default_agent: String,
    pub providers: BTreeMap<String, ProviderConfig>,
    pub agents: BTreeMap<String, AgentConfig>,
    pub shutdown_grace_ms: u64,
    pub event_buffer: usize,
    pub output_lines: usize,
    pub log_level: Option<String>,
}

impl Default for Config {
    fn default() -> Self {
        let mut providers = BTreeMap::new();
        providers.insert(
            "claude".to_string(),
            ProviderConfig {
                command: "claude".to_string(),
                args: vec!["-p".to_string()],
                system_prompt_flag: Some("--append-system-prompt".to_string()),
                env: BTreeMap::new(),
            },
        );
        providers.insert(
            "codex".to_string(),
            ProviderConfig {
                command: "codex".to_string(),
                args: vec!["exec".to_string()],
                system_prompt_flag: None,
                env: BTreeMap::new(),
            },
        );

        let mut agents = BTreeMap::new();
        agents.insert(
            "coder".to_string(),
            AgentConfig {
                provider: "claude".to_string(),
                system_prompt: None,
                args: Vec::new(),
            },
        );
        agents.insert(
            "tester".to_string(),
            AgentConfig {
                provider: "claude".to_string(),
                system_prompt: Some(
                    "You are a testing agent. Write and run tests for the requested change \
                     and report failures precisely."
                        .to_string(),
                ),
                args: Vec::new(),
            },
        );

        Self {
            default_agent: "coder".to_string(),
            providers,
            agents,
            shutdown_grace_ms: DEFAULT_SHUTDOWN_GRACE_MS,
            event_buffer: DEFAULT_EVENT_BUFFER,
            output_lines: DEFAULT_OUTPUT_LINES,
            log_level: None,
        }
    }
}

impl Config {
    pub fn orca_dir() -> Result<PathBuf> {
        Ok(dirs::home_dir().ok_or(Error::NoHomeDir)?.join(".orca"))
    }

    pub fn global_path() -> Result<PathBuf> {
        Ok(Self::orca_dir()?.join("config.json"))
    }

    pub fn project_path(project_dir: &Path) -> PathBuf {
        project_dir.join(".orca").join("config.json")
    }

    /// Load defaults, then the global file, then the project file.
    ///
    /// Missing files are skipped. Objects merge key by key, so a project file
    /// can add one agent without repeating the global ones.
    pub fn load(global_path: &Path, project_path: &Path) -> Result<Self> {
        let mut merged = serde_json::to_value(Self::default())?;
        for path in [global_path, project_path] {
            if let Some(layer) = read_layer(path)? {
                olog_debug!("Config::load merging {}", path.display());
                merge_json(&mut merged, layer);
            } else {
                olog_debug!("Config::load skipping missing {}", path.display());
            }
        }
        let config: Self = serde_json::from_value(merged)?;
        olog_debug!(
            "Config loaded: default_agent={} agents={} grace={}ms buffer={}",
            config.default_agent,
            config.agents.len(),
            config.shutdown_grace_ms,
            config.event_buffer
        );
        Ok(config)
    }

    /// UI teardown grace period; never zero.
    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_millis(self.shutdown_grace_ms.max(1))
    }

    /// Per-subscriber buffer size; never zero.
    pub fn event_buffer(&self) -> usize {
        self.event_buffer.max(1)
    }
}

fn read_layer(path: &Path) -> Result<Option<Value>> {
    if !path.exists() {
        return Ok(None);
    }
    let text = fs::read_to_string(path)?;
    if text.trim().is_empty() {
        return Ok(None);
    }
    let value = serde_json::from_str(&text).map_err(|source| Error::ConfigParse {
        path: path.to_path_buf(),
        source,
    })?;
    Ok(Some(value))
}

/// Merge `overlay` into `base`. Objects merge recursively; anything else in
/// the overlay replaces the base value, including arrays and nulls.
pub fn merge_json(base: &mut Value, overlay: Value) {
    match (base, overlay) {
        (Value::Object(base_map), Value::Object(overlay_map)) => {
            for (key, value) in overlay_map {
                match base_map.get_mut(&key) {
                    Some(existing) => merge_json(existing, value),
                    None => {
                        base_map.insert(key, value);
                    }
                }
            }
        }
        (base, overlay) => *base = overlay,
    }
}
