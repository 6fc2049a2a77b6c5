use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::types::{error_codes, JsonRpcError};

/// Domain-level outcome of a command.
///
/// The executor turns this into a wire envelope: a successful result becomes
/// the `result` field, a failed one becomes a `COMMAND_FAILED` error.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CommandResult {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
}

impl CommandResult {
    pub fn success(data: Value) -> Self {
        Self {
            success: true,
            data: Some(data),
            error_message: None,
        }
    }

    pub fn success_empty() -> Self {
        Self {
            success: true,
            data: None,
            error_message: None,
        }
    }

    pub fn failure(message: impl Into<String>) -> Self {
        Self {
            success: false,
            data: None,
            error_message: Some(message.into()),
        }
    }

    pub fn failure_with_data(message: impl Into<String>, data: Value) -> Self {
        Self {
            success: false,
            data: Some(data),
            error_message: Some(message.into()),
        }
    }
}

/// A named unit of work reachable through its method name.
///
/// Commands are object-safe, Send + Sync, and async. They receive the raw
/// `params` value and interpret its shape themselves.
#[async_trait]
pub trait Command: Send + Sync {
    /// Method name this command answers to.
    fn name(&self) -> &str;

    /// Run the command for one request.
    async fn execute(&self, params: Value, request_id: &str)
        -> Result<CommandResult, CommandError>;
}

#[derive(Debug, thiserror::Error)]
pub enum CommandError {
    /// Domain failure with an explicit code, forwarded to the caller verbatim.
    #[error("{message}")]
    Execution {
        code: i64,
        message: String,
        data: Option<Value>,
    },
    #[error("Invalid params: {0}")]
    InvalidParams(String),
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl CommandError {
    /// Execution failure reported as an internal error.
    pub fn execution(message: impl Into<String>) -> Self {
        Self::with_code(message, error_codes::INTERNAL_ERROR)
    }

    pub fn with_code(message: impl Into<String>, code: i64) -> Self {
        Self::Execution {
            code,
            message: message.into(),
            data: None,
        }
    }

    pub fn with_data(message: impl Into<String>, code: i64, data: Value) -> Self {
        Self::Execution {
            code,
            message: message.into(),
            data: Some(data),
        }
    }

    /// Wire error for this failure. Unexpected errors keep their cause chain
    /// but never a backtrace.
    pub fn to_rpc_error(&self) -> JsonRpcError {
        match self {
            CommandError::Execution {
                code,
                message,
                data,
            } => JsonRpcError {
                code: *code,
                message: message.clone(),
                data: data.clone(),
            },
            CommandError::InvalidParams(_) => JsonRpcError {
                code: error_codes::INVALID_PARAMS,
                message: self.to_string(),
                data: None,
            },
            CommandError::Other(e) => JsonRpcError {
                code: error_codes::INTERNAL_ERROR,
                message: format!("{e:#}"),
                data: None,
            },
        }
    }
}

/// Deserialize command params into a typed struct.
pub fn parse_params<T: DeserializeOwned>(params: Value) -> Result<T, CommandError> {
    serde_json::from_value(params).map_err(|e| CommandError::InvalidParams(e.to_string()))
}

/// Command backed by a synchronous closure.
pub struct FnCommand<F> {
    name: String,
    handler: F,
}

impl<F> FnCommand<F>
where
    F: Fn(Value, &str) -> Result<CommandResult, CommandError> + Send + Sync,
{
    pub fn new(name: impl Into<String>, handler: F) -> Self {
        Self {
            name: name.into(),
            handler,
        }
    }
}

#[async_trait]
impl<F> Command for FnCommand<F>
where
    F: Fn(Value, &str) -> Result<CommandResult, CommandError> + Send + Sync,
{
    fn name(&self) -> &str {
        &self.name
    }

    async fn execute(
        &self,
        params: Value,
        request_id: &str,
    ) -> Result<CommandResult, CommandError> {
        (self.handler)(params, request_id)
    }
}

/// Shorthand for [`FnCommand::new`].
pub fn command_fn<F>(name: impl Into<String>, handler: F) -> FnCommand<F>
where
    F: Fn(Value, &str) -> Result<CommandResult, CommandError> + Send + Sync,
{
    FnCommand::new(name, handler)
}
