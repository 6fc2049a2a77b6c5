//! Built-in commands every server can expose: `ping`, `echo` and `commands/list`.

use std::sync::{Arc, Weak};

use async_trait::async_trait;
use serde_json::{json, Value};

use crate::command::{Command, CommandError, CommandResult};
use crate::config::CommandConfig;
use crate::registry::{CommandRegistry, CommandSet};

/// Liveness probe. Returns `{"pong": true}`.
pub struct PingCommand;

#[async_trait]
impl Command for PingCommand {
    fn name(&self) -> &str {
        "ping"
    }

    async fn execute(&self, _params: Value, _request_id: &str) -> Result<CommandResult, CommandError> {
        Ok(CommandResult::success(json!({"pong": true})))
    }
}

/// Returns its params unchanged.
pub struct EchoCommand;

#[async_trait]
impl Command for EchoCommand {
    fn name(&self) -> &str {
        "echo"
    }

    async fn execute(&self, params: Value, _request_id: &str) -> Result<CommandResult, CommandError> {
        Ok(CommandResult::success(params))
    }
}

/// Lists the names registered in the owning registry, sorted.
///
/// Holds a weak handle: the registry owns this command.
pub struct ListCommandsCommand {
    registry: Weak<CommandRegistry>,
}

impl ListCommandsCommand {
    pub fn new(registry: &Arc<CommandRegistry>) -> Self {
        Self {
            registry: Arc::downgrade(registry),
        }
    }
}

#[async_trait]
impl Command for ListCommandsCommand {
    fn name(&self) -> &str {
        "commands/list"
    }

    async fn execute(&self, _params: Value, _request_id: &str) -> Result<CommandResult, CommandError> {
        let registry = self
            .registry
            .upgrade()
            .ok_or_else(|| CommandError::execution("command registry is gone"))?;
        let mut names = registry.list_names();
        names.sort();
        Ok(CommandResult::success(json!({ "commands": names })))
    }
}

/// The built-in commands, filtered by per-command config.
pub struct BuiltinCommands {
    registry: Weak<CommandRegistry>,
    configs: Vec<CommandConfig>,
}

impl BuiltinCommands {
    pub fn new(registry: &Arc<CommandRegistry>, configs: Vec<CommandConfig>) -> Self {
        Self {
            registry: Arc::downgrade(registry),
            configs,
        }
    }
}

impl CommandSet for BuiltinCommands {
    fn load_commands(&self, registry: &CommandRegistry) {
        registry.register_with_config(PingCommand, &self.configs);
        registry.register_with_config(EchoCommand, &self.configs);
        registry.register_with_config(
            ListCommandsCommand {
                registry: self.registry.clone(),
            },
            &self.configs,
        );
    }
}
