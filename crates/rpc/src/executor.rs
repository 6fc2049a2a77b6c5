//! Dispatches a decoded request to its command and builds the response envelope.

use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Instant;

use futures::FutureExt;

use crate::command::CommandError;
use crate::registry::CommandRegistry;
use crate::types::{error_codes, JsonRpcRequest, JsonRpcResponse};

/// Runs commands from a registry. Every outcome becomes a valid envelope.
#[derive(Clone)]
pub struct CommandExecutor {
    registry: Arc<CommandRegistry>,
}

impl CommandExecutor {
    pub fn new(registry: Arc<CommandRegistry>) -> Self {
        Self { registry }
    }

    pub fn registry(&self) -> &Arc<CommandRegistry> {
        &self.registry
    }

    /// Execute `request` and return its response envelope.
    pub async fn execute(&self, request: &JsonRpcRequest) -> JsonRpcResponse {
        let id = request.id.clone();
        let method = request.method.as_str();

        let Some(command) = self.registry.try_get(method) else {
            tracing::warn!(method = %method, id = %id, "No command found");
            return JsonRpcResponse::error(
                Some(id),
                error_codes::METHOD_NOT_FOUND,
                format!("No command found with name: {method}"),
            );
        };

        tracing::debug!(method = %method, id = %id, "Command found");
        let started = Instant::now();

        let outcome = AssertUnwindSafe(command.execute(request.params.clone(), &id))
            .catch_unwind()
            .await;
        let elapsed_ms = started.elapsed().as_millis() as u64;

        match outcome {
            Ok(Ok(result)) if result.success => {
                tracing::info!(method = %method, id = %id, elapsed_ms, "Command executed successfully");
                JsonRpcResponse::success(id, result.data.unwrap_or_default())
            }
            Ok(Ok(result)) => {
                let message = result
                    .error_message
                    .unwrap_or_else(|| "Command failed".to_string());
                tracing::warn!(method = %method, id = %id, elapsed_ms, error = %message, "Command reported failure");
                JsonRpcResponse::error_with_data(
                    Some(id),
                    error_codes::COMMAND_FAILED,
                    message,
                    result.data,
                )
            }
            Ok(Err(err)) => {
                let rpc_error = err.to_rpc_error();
                match &err {
                    CommandError::Other(source) => tracing::error!(
                        method = %method,
                        id = %id,
                        elapsed_ms,
                        error = ?source,
                        "Unexpected error while executing command"
                    ),
                    _ => tracing::error!(
                        method = %method,
                        id = %id,
                        elapsed_ms,
                        code = rpc_error.code,
                        error = %rpc_error.message,
                        "Error while executing command"
                    ),
                }
                JsonRpcResponse::from_error(Some(id), rpc_error)
            }
            Err(panic) => {
                let message = panic_message(panic.as_ref());
                tracing::error!(method = %method, id = %id, panic = %message, "Command panicked");
                JsonRpcResponse::error(
                    Some(id),
                    error_codes::INTERNAL_ERROR,
                    format!("Internal error: {message}"),
                )
            }
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "command panicked".to_string()
    }
}
