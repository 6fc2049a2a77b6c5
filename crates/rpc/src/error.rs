//! Error types shared by the inbound and outbound sides.

use std::time::Duration;

use serde_json::Value;

use crate::types::{error_codes, JsonRpcError};

/// Errors that can occur during RPC operations.
#[derive(Debug, thiserror::Error)]
pub enum RpcError {
    /// Transport I/O error.
    #[error("Transport error: {0}")]
    Io(#[from] std::io::Error),

    /// The TCP connection could not be established.
    #[error("Failed to connect to {addr}: {source}")]
    Connect {
        addr: String,
        #[source]
        source: std::io::Error,
    },

    /// The TCP connection was not established in time.
    #[error("Connecting to {addr} timed out after {timeout:?}")]
    ConnectTimeout { addr: String, timeout: Duration },

    /// No response arrived for the call within the call timeout.
    #[error("Command '{method}' timed out after {elapsed:?}")]
    Timeout { method: String, elapsed: Duration },

    /// The connection closed before the response arrived.
    #[error("Connection closed while waiting for '{method}'")]
    ConnectionClosed { method: String },

    /// Failed to encode or decode JSON.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// A single message exceeded the configured frame limit.
    #[error("Message exceeds maximum frame size of {limit} bytes")]
    FrameTooLarge { limit: usize },

    /// The peer answered with a JSON-RPC error envelope.
    #[error("Remote error {code}: {message}")]
    Remote {
        code: i64,
        message: String,
        data: Option<Value>,
    },

    /// The server could not bind its listening socket.
    #[error("Failed to bind {addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: std::io::Error,
    },

    /// Invalid configuration value.
    #[error("Config error: {0}")]
    Config(String),

    /// The configuration file is not valid TOML.
    #[error("Config parse error: {0}")]
    ConfigParse(#[from] toml::de::Error),
}

impl RpcError {
    /// The JSON-RPC error code carried by a remote error, if any.
    pub fn code(&self) -> Option<i64> {
        match self {
            RpcError::Remote { code, .. } => Some(*code),
            _ => None,
        }
    }

    /// Convert to a JSON-RPC error object.
    pub fn to_rpc_error(&self) -> JsonRpcError {
        match self {
            RpcError::Remote {
                code,
                message,
                data,
            } => JsonRpcError {
                code: *code,
                message: message.clone(),
                data: data.clone(),
            },
            RpcError::Json(_) => JsonRpcError {
                code: error_codes::PARSE_ERROR,
                message: self.to_string(),
                data: None,
            },
            RpcError::FrameTooLarge { .. } => JsonRpcError {
                code: error_codes::INVALID_REQUEST,
                message: self.to_string(),
                data: None,
            },
            _ => JsonRpcError {
                code: error_codes::INTERNAL_ERROR,
                message: self.to_string(),
                data: None,
            },
        }
    }

    /// Whether this error came from the transport rather than the peer.
    pub fn is_transport(&self) -> bool {
        matches!(
            self,
            RpcError::Io(_)
                | RpcError::Connect { .. }
                | RpcError::ConnectTimeout { .. }
                | RpcError::Timeout { .. }
                | RpcError::ConnectionClosed { .. }
        )
    }
}
