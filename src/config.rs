use std::path::Path;

use crate::error::{CmdqueueError, Result};
use crate::scheduler::CommandSpec;

const DEFAULT_MAX_CONCURRENT: usize = 2;
const DEFAULT_MAX_FINISHED: usize = 100;

/// How many terminal records a session keeps around.
///
/// Queued and running records are never evicted. Once a job reaches a
/// terminal state the oldest terminal records beyond `max_finished` are
/// dropped from the store. `None` keeps everything until dismissed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetentionPolicy {
    pub max_finished: Option<usize>,
}

impl Default for RetentionPolicy {
    fn default() -> Self {
        Self {
            max_finished: Some(DEFAULT_MAX_FINISHED),
        }
    }
}

impl RetentionPolicy {
    pub fn unbounded() -> Self {
        Self { max_finished: None }
    }
}

/// Configuration for a single session.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Maximum number of processes executing at once
    pub max_concurrent: usize,
    /// Commands a caller may submit, selected by index
    pub commands: Vec<CommandSpec>,
    pub retention: RetentionPolicy,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            max_concurrent: DEFAULT_MAX_CONCURRENT,
            commands: default_catalog(),
            retention: RetentionPolicy::default(),
        }
    }
}

impl SessionConfig {
    pub fn new(max_concurrent: usize) -> Self {
        Self {
            max_concurrent,
            ..Default::default()
        }
    }

    pub fn with_commands(mut self, commands: Vec<CommandSpec>) -> Self {
        self.commands = commands;
        self
    }

    pub fn with_command(mut self, command: CommandSpec) -> Self {
        self.commands.push(command);
        self
    }

    pub fn with_retention(mut self, retention: RetentionPolicy) -> Self {
        self.retention = retention;
        self
    }

    /// Look up a catalog entry.
    pub fn command(&self, index: usize) -> Result<&CommandSpec> {
        self.commands
            .get(index)
            .ok_or(CmdqueueError::InvalidCommand {
                index,
                available: self.commands.len(),
            })
    }

    pub fn validate(&self) -> Result<()> {
        if self.max_concurrent == 0 {
            return Err(CmdqueueError::InvalidConfig(
                "max_concurrent must be at least 1".to_string(),
            ));
        }
        if let Some(pos) = self.commands.iter().position(|c| c.is_empty()) {
            return Err(CmdqueueError::InvalidConfig(format!(
                "command {} is empty",
                pos
            )));
        }
        Ok(())
    }
}

/// Built-in catalog used when no catalog file is given.
pub fn default_catalog() -> Vec<CommandSpec> {
    vec![
        CommandSpec::new([
            "sh",
            "-c",
            "echo 'hello world' && sleep 1 && echo 'goodbye world' >&2",
        ]),
        CommandSpec::new(["uptime"]),
        CommandSpec::new(["ls", "-l"]),
        CommandSpec::new([
            "sh",
            "-c",
            "sleep 5 && echo '5 hello world' && sleep 5 && echo '10 goodbye world' >&2",
        ]),
    ]
}

/// Load a catalog from a JSON file holding an array of argv arrays,
/// e.g. `[["echo", "hi"], ["sleep", "1"]]`.
pub fn load_catalog(path: &Path) -> Result<Vec<CommandSpec>> {
    let raw = std::fs::read_to_string(path)?;
    let commands: Vec<CommandSpec> = serde_json::from_str(&raw)?;
    Ok(commands)
}
