//! Bidirectional JSON-RPC 2.0 command dispatch over TCP.
//!
//! The inbound side exposes a registry of named commands to remote callers.
//! The outbound side calls methods on a remote server and correlates the
//! responses with their requests by id.
//!
//! # Architecture
//!
//! - **types**: JSON-RPC 2.0 envelopes and error codes
//! - **codec**: newline-delimited framing and request decoding
//! - **command**: the `Command` trait and its result/error types
//! - **registry**: name → command table, shared between host and server
//! - **executor**: turns a request into exactly one response envelope
//! - **server**: TCP listener serving a registry
//! - **client**: outbound connection with pending-call correlation
//! - **config**: TOML + environment configuration
//! - **error**: unified error type
//!
//! # Usage
//!
//! ## Server
//! ```no_run
//! use std::sync::Arc;
//! use stupid_rpc::commands::PingCommand;
//! use stupid_rpc::{CommandRegistry, RpcServer, ServerConfig};
//!
//! # async fn example() {
//! let registry = Arc::new(CommandRegistry::new());
//! registry.register(PingCommand);
//! let server = RpcServer::new(ServerConfig::new("0.0.0.0", 8080), registry);
//! server.start().await.unwrap();
//! # }
//! ```
//!
//! ## Client
//! ```no_run
//! use serde_json::json;
//! use stupid_rpc::{ClientConfig, RpcClient};
//!
//! # async fn example() {
//! let client = RpcClient::new(ClientConfig::new("localhost", 8080));
//! let pong = client.call("ping", json!({})).await.unwrap();
//! # }
//! ```

pub mod types;
pub mod codec;
pub mod command;
pub mod commands;
pub mod registry;
pub mod executor;
pub mod server;
pub mod client;
pub mod config;
pub mod error;

pub use types::*;
pub use command::{command_fn, parse_params, Command, CommandError, CommandResult, FnCommand};
pub use registry::{CommandRegistry, CommandSet};
pub use executor::CommandExecutor;
pub use server::{RpcServer, ServerConfig, ServerState};
pub use client::{with_connection, ClientConfig, ConnectionState, RpcClient};
pub use config::{CommandConfig, FrameworkConfig, ServiceSettings};
pub use error::RpcError;
