//! JSON-RPC 2.0 wire types.
//!
//! Requests carry a string id; responses echo it back (or `null` when the
//! id of a rejected request could not be recovered).

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// The only protocol version this crate speaks.
pub const JSONRPC_VERSION: &str = "2.0";

// ── Envelopes ───────────────────────────────────────────────────────

/// A JSON-RPC 2.0 request message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JsonRpcRequest {
    pub jsonrpc: String,
    pub method: String,
    #[serde(default)]
    pub params: Value,
    pub id: String,
}

/// A JSON-RPC 2.0 response message (success or error).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JsonRpcResponse {
    pub jsonrpc: String,
    pub id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<JsonRpcError>,
}

/// A JSON-RPC 2.0 error object.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JsonRpcError {
    pub code: i64,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

// ── Standard JSON-RPC error codes ───────────────────────────────────

/// Standard JSON-RPC 2.0 error codes.
pub mod error_codes {
    pub const PARSE_ERROR: i64 = -32700;
    pub const INVALID_REQUEST: i64 = -32600;
    pub const METHOD_NOT_FOUND: i64 = -32601;
    pub const INVALID_PARAMS: i64 = -32602;
    pub const INTERNAL_ERROR: i64 = -32603;

    /// Upper bound of the implementation-defined server error range.
    pub const SERVER_ERROR_START: i64 = -32000;
    /// Lower bound of the implementation-defined server error range.
    pub const SERVER_ERROR_END: i64 = -32099;

    /// A command completed but reported `success: false`.
    pub const COMMAND_FAILED: i64 = SERVER_ERROR_START;

    /// Whether `code` lies in the reserved server error range.
    pub fn is_server_error(code: i64) -> bool {
        (SERVER_ERROR_END..=SERVER_ERROR_START).contains(&code)
    }

    /// Human-readable description of a standard code. Empty for custom codes.
    pub fn description(code: i64) -> &'static str {
        match code {
            PARSE_ERROR => "Invalid JSON was received by the server.",
            INVALID_REQUEST => "The JSON sent is not a valid Request object.",
            METHOD_NOT_FOUND => "The method does not exist / is not available.",
            INVALID_PARAMS => "Invalid method parameter(s).",
            INTERNAL_ERROR => "Internal JSON-RPC error.",
            c if is_server_error(c) => "Server error.",
            _ => "",
        }
    }
}

// ── Helpers ─────────────────────────────────────────────────────────

impl JsonRpcRequest {
    /// Create a new JSON-RPC 2.0 request.
    pub fn new(id: impl Into<String>, method: impl Into<String>, params: Value) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            method: method.into(),
            params,
            id: id.into(),
        }
    }

    /// Check the request-level invariants: version is "2.0", method is set.
    pub fn validate(&self) -> Result<(), &'static str> {
        if self.jsonrpc != JSONRPC_VERSION {
            return Err("jsonrpc must be \"2.0\"");
        }
        if self.method.is_empty() {
            return Err("method must not be empty");
        }
        Ok(())
    }
}

impl JsonRpcResponse {
    /// Create a successful response.
    pub fn success(id: impl Into<String>, result: Value) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            id: Some(id.into()),
            result: Some(result),
            error: None,
        }
    }

    /// Create an error response.
    pub fn error(id: Option<String>, code: i64, message: impl Into<String>) -> Self {
        Self::error_with_data(id, code, message, None)
    }

    /// Create an error response carrying structured `data`.
    pub fn error_with_data(
        id: Option<String>,
        code: i64,
        message: impl Into<String>,
        data: Option<Value>,
    ) -> Self {
        Self::from_error(
            id,
            JsonRpcError {
                code,
                message: message.into(),
                data,
            },
        )
    }

    /// Wrap an existing error object.
    pub fn from_error(id: Option<String>, error: JsonRpcError) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            id,
            result: None,
            error: Some(error),
        }
    }

    pub fn is_error(&self) -> bool {
        self.error.is_some()
    }
}
