use std::collections::HashSet;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::client::ClientConfig;
use crate::codec::DEFAULT_MAX_FRAME_BYTES;
use crate::error::RpcError;
use crate::server::ServerConfig;

/// Prefix of every environment override, e.g. `STUPID_RPC_PORT`.
pub const ENV_PREFIX: &str = "STUPID_RPC_";

// ── Top-level config ────────────────────────────────────────────────

/// Full configuration of an RPC host.
///
/// Parsed from a TOML file, then overridden from `STUPID_RPC_*` environment
/// variables, then validated.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FrameworkConfig {
    /// Service-wide settings.
    #[serde(default)]
    pub settings: ServiceSettings,

    /// Per-command switches.
    #[serde(default)]
    pub commands: Vec<CommandConfig>,
}

// ── Section configs ─────────────────────────────────────────────────

/// `[settings]` section.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServiceSettings {
    /// Default tracing filter when `RUST_LOG` is unset.
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Address the server binds to.
    #[serde(default = "default_host")]
    pub host: String,

    /// Port the server listens on (0 = pick an ephemeral port).
    #[serde(default = "default_port")]
    pub port: u16,

    /// Cap on concurrently served connections. Unset = unbounded.
    #[serde(default)]
    pub max_connections: Option<usize>,

    /// Largest accepted message, in bytes.
    #[serde(default = "default_max_frame_bytes")]
    pub max_frame_bytes: usize,

    /// How long an outbound call waits for its response.
    #[serde(default = "default_call_timeout_secs")]
    pub call_timeout_secs: u64,

    /// How long an outbound connect may take.
    #[serde(default = "default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,
}

fn default_log_level() -> String {
    "info".into()
}

fn default_host() -> String {
    "0.0.0.0".into()
}

fn default_port() -> u16 {
    8080
}

fn default_max_frame_bytes() -> usize {
    DEFAULT_MAX_FRAME_BYTES
}

fn default_call_timeout_secs() -> u64 {
    120
}

fn default_connect_timeout_secs() -> u64 {
    5
}

impl Default for ServiceSettings {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            host: default_host(),
            port: default_port(),
            max_connections: None,
            max_frame_bytes: default_max_frame_bytes(),
            call_timeout_secs: default_call_timeout_secs(),
            connect_timeout_secs: default_connect_timeout_secs(),
        }
    }
}

impl ServiceSettings {
    /// Runtime config for an [`RpcServer`](crate::server::RpcServer).
    pub fn server_config(&self) -> ServerConfig {
        ServerConfig {
            host: self.host.clone(),
            port: self.port,
            max_connections: self.max_connections,
            max_frame_bytes: self.max_frame_bytes,
        }
    }

    /// Runtime config for an [`RpcClient`](crate::client::RpcClient) talking to `host:port`.
    pub fn client_config(&self, host: impl Into<String>, port: u16) -> ClientConfig {
        ClientConfig {
            host: host.into(),
            port,
            call_timeout: Duration::from_secs(self.call_timeout_secs),
            connect_timeout: Duration::from_secs(self.connect_timeout_secs),
            max_frame_bytes: self.max_frame_bytes,
        }
    }
}

/// `[[commands]]` entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommandConfig {
    /// Method name of the command.
    pub name: String,

    /// Disabled commands are not registered.
    #[serde(default = "default_enabled")]
    pub enabled: bool,

    #[serde(default)]
    pub description: String,
}

fn default_enabled() -> bool {
    true
}

// ── Loading ─────────────────────────────────────────────────────────

impl FrameworkConfig {
    /// Parse config from a TOML string.
    pub fn from_toml(toml_str: &str) -> Result<Self, RpcError> {
        let mut config: Self = toml::from_str(toml_str)?;
        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    /// Load config from a file path.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, RpcError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .map_err(|e| RpcError::Config(format!("cannot read {}: {e}", path.display())))?;
        Self::from_toml(&content)
    }

    /// Load from `path` when given, otherwise start from defaults.
    pub fn load(path: Option<&Path>) -> Result<Self, RpcError> {
        match path {
            Some(p) => Self::from_file(p),
            None => {
                let mut config = Self::default();
                config.apply_env_overrides();
                config.validate()?;
                Ok(config)
            }
        }
    }

    /// Look up the entry for a command, if configured.
    pub fn command(&self, name: &str) -> Option<&CommandConfig> {
        self.commands.iter().find(|c| c.name == name)
    }

    // ── Environment variable overrides ──────────────────────────────

    /// Apply `STUPID_RPC_*` environment overrides.
    ///
    /// - `STUPID_RPC_LOG_LEVEL` -> `settings.log_level`
    /// - `STUPID_RPC_HOST` -> `settings.host`
    /// - `STUPID_RPC_PORT` -> `settings.port`
    /// - `STUPID_RPC_MAX_CONNECTIONS` -> `settings.max_connections`
    /// - `STUPID_RPC_CALL_TIMEOUT_SECS` -> `settings.call_timeout_secs`
    pub fn apply_env_overrides(&mut self) {
        self.apply_overrides_from(|key| std::env::var(format!("{ENV_PREFIX}{key}")).ok());
    }

    /// Apply overrides from an arbitrary lookup keyed by the unprefixed name.
    ///
    /// Values that fail to parse are ignored.
    pub fn apply_overrides_from(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        let settings = &mut self.settings;
        if let Some(v) = lookup("LOG_LEVEL") {
            settings.log_level = v;
        }
        if let Some(v) = lookup("HOST") {
            settings.host = v;
        }
        if let Some(port) = lookup("PORT").and_then(|v| v.parse().ok()) {
            settings.port = port;
        }
        if let Some(max) = lookup("MAX_CONNECTIONS").and_then(|v| v.parse().ok()) {
            settings.max_connections = Some(max);
        }
        if let Some(secs) = lookup("CALL_TIMEOUT_SECS").and_then(|v| v.parse().ok()) {
            settings.call_timeout_secs = secs;
        }
    }

    // ── Validation ──────────────────────────────────────────────────

    pub fn validate(&self) -> Result<(), RpcError> {
        let s = &self.settings;
        if s.host.trim().is_empty() {
            return Err(RpcError::Config("settings.host must not be empty".into()));
        }
        if s.max_frame_bytes == 0 {
            return Err(RpcError::Config("settings.max_frame_bytes must be positive".into()));
        }
        if s.max_connections == Some(0) {
            return Err(RpcError::Config(
                "settings.max_connections must be positive when set".into(),
            ));
        }
        if s.call_timeout_secs == 0 {
            return Err(RpcError::Config("settings.call_timeout_secs must be positive".into()));
        }
        if s.connect_timeout_secs == 0 {
            return Err(RpcError::Config(
                "settings.connect_timeout_secs must be positive".into(),
            ));
        }

        let mut seen = HashSet::new();
        for command in &self.commands {
            if command.name.is_empty() {
                return Err(RpcError::Config("command name must not be empty".into()));
            }
            if !seen.insert(command.name.as_str()) {
                return Err(RpcError::Config(format!(
                    "command '{}' is configured more than once",
                    command.name
                )));
            }
        }
        Ok(())
    }
}
