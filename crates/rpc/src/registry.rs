use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};

use crate::command::Command;
use crate::config::CommandConfig;

/// Maps method names to commands.
///
/// Registration may race with dispatch, so writes and lookups go through an
/// `RwLock`. Share it as `Arc<CommandRegistry>` between the host and servers.
pub struct CommandRegistry {
    commands: RwLock<HashMap<String, Arc<dyn Command>>>,
}

impl CommandRegistry {
    pub fn new() -> Self {
        Self {
            commands: RwLock::new(HashMap::new()),
        }
    }

    /// Register a command. An existing binding for the same name is replaced.
    pub fn register(&self, command: impl Command + 'static) {
        self.register_arc(Arc::new(command));
    }

    /// Register an already shared command.
    pub fn register_arc(&self, command: Arc<dyn Command>) {
        let name = command.name().to_string();
        let previous = self
            .commands
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(name.clone(), command);
        if previous.is_some() {
            tracing::debug!(command = %name, "Replaced existing command");
        } else {
            tracing::debug!(command = %name, "Registered command");
        }
    }

    /// Register `command` unless `configs` has an entry for it with `enabled = false`.
    ///
    /// Returns whether the command was registered.
    pub fn register_with_config(
        &self,
        command: impl Command + 'static,
        configs: &[CommandConfig],
    ) -> bool {
        let disabled = configs
            .iter()
            .any(|c| c.name == command.name() && !c.enabled);
        if disabled {
            tracing::info!(command = %command.name(), "Command disabled by config, skipping");
            return false;
        }
        self.register(command);
        true
    }

    /// Let a [`CommandSet`] register its commands.
    pub fn load(&self, set: &dyn CommandSet) {
        set.load_commands(self);
    }

    /// Look up a command by name.
    pub fn try_get(&self, name: &str) -> Option<Arc<dyn Command>> {
        self.commands
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(name)
            .cloned()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.commands
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .contains_key(name)
    }

    /// Names of all registered commands, in no particular order.
    pub fn list_names(&self) -> Vec<String> {
        self.commands
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .cloned()
            .collect()
    }

    /// Remove every command.
    pub fn clear(&self) {
        self.commands
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }

    pub fn len(&self) -> usize {
        self.commands
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for CommandRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// A group of commands a host loads into a registry at startup.
pub trait CommandSet {
    fn load_commands(&self, registry: &CommandRegistry);
}
