use std::collections::BTreeMap;
use std::path::PathBuf;

use crate::config::Config;
use crate::launcher::TaskSpec;
use crate::{Error, Result};

/// A configured agent resolved against its provider.
#[derive(Debug, Clone, PartialEq)]
pub struct Agent {
    pub name: String,
    pub provider: String,
    base_command: Vec<String>,
    system_prompt: Option<(Option<String>, String)>,
    env: BTreeMap<String, String>,
}

impl Agent {
    pub fn resolve(config: &Config, name: &str) -> Result<Self> {
        let agent = config
            .agents
            .get(name)
            .ok_or_else(|| Error::UnknownAgent(name.to_string()))?;
        let provider = config.providers.get(&agent.provider).ok_or_else(|| {
            Error::UnknownProvider {
                agent: name.to_string(),
                provider: agent.provider.clone(),
            }
        })?;
        if provider.command.trim().is_empty() {
            return Err(Error::UnknownProvider {
                agent: name.to_string(),
                provider: agent.provider.clone(),
            });
        }

        let mut base_command = vec![provider.command.clone()];
        base_command.extend(provider.args.iter().cloned());
        base_command.extend(agent.args.iter().cloned());

        Ok(Self {
            name: name.to_string(),
            provider: agent.provider.clone(),
            base_command,
            system_prompt: agent
                .system_prompt
                .clone()
                .map(|prompt| (provider.system_prompt_flag.clone(), prompt)),
            env: provider.env.clone(),
        })
    }

    pub fn binary(&self) -> &str {
        self.base_command
            .first()
            .map(String::as_str)
            .unwrap_or_default()
    }

    /// Full argv for one run with `prompt`.
    ///
    /// A system prompt goes behind the provider's flag when it has one;
    /// otherwise it is prepended to the user prompt.
    pub fn command(&self, prompt: &str) -> Vec<String> {
        let mut cmd = self.base_command.clone();
        match &self.system_prompt {
            Some((Some(flag), system)) => {
                cmd.push(flag.clone());
                cmd.push(system.clone());
                cmd.push(prompt.to_string());
            }
            Some((None, system)) => cmd.push(format!("{system}\n\n{prompt}")),
            None => cmd.push(prompt.to_string()),
        }
        cmd
    }

    pub fn is_available(&self) -> bool {
        which::which(self.binary()).is_ok()
    }

    pub fn task(&self, prompt: &str, cwd: PathBuf) -> TaskSpec {
        TaskSpec::new(&self.name, self.command(prompt))
            .with_env(self.env.clone())
            .with_cwd(cwd)
    }
}
