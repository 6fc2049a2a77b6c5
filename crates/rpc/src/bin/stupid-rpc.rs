//! stupid-rpc: host and call JSON-RPC commands over TCP.
//!
//! # Usage
//!
//! ```bash
//! # Serve the built-in commands (ping, echo, commands/list)
//! stupid-rpc serve --config rpc.toml --port 8080
//!
//! # Call a method on a running server
//! stupid-rpc call ping
//! stupid-rpc call echo '{"message":"hi"}' --host 10.0.0.5 --port 8080
//!
//! # Via environment variables
//! STUPID_RPC_PORT=9000 stupid-rpc serve
//! ```

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::{Parser, Subcommand};
use serde_json::Value;
use stupid_rpc::commands::BuiltinCommands;
use stupid_rpc::{CommandRegistry, FrameworkConfig, RpcClient, RpcServer};

/// JSON-RPC 2.0 command host and client.
#[derive(Parser, Debug)]
#[command(name = "stupid-rpc", version, about)]
struct Cli {
    /// Path to a TOML config file.
    #[arg(long, global = true, env = "STUPID_RPC_CONFIG")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Cmd,
}

#[derive(Subcommand, Debug)]
enum Cmd {
    /// Serve the built-in commands until SIGINT/SIGTERM.
    Serve {
        /// Interface to bind (overrides the config file).
        #[arg(long, env = "STUPID_RPC_HOST")]
        host: Option<String>,

        /// Port to listen on (overrides the config file, 0 = ephemeral).
        #[arg(long, env = "STUPID_RPC_PORT")]
        port: Option<u16>,
    },

    /// Call one method on a remote server and print the result.
    Call {
        /// Method name, e.g. `ping`.
        method: String,

        /// Params as a JSON document.
        params: Option<String>,

        /// Server host.
        #[arg(long, default_value = "localhost")]
        host: String,

        /// Server port.
        #[arg(long, env = "STUPID_RPC_PORT", default_value_t = 8080)]
        port: u16,

        /// Seconds to wait for the response (overrides the config file).
        #[arg(long)]
        timeout: Option<u64>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    let cli = Cli::parse();
    let config = FrameworkConfig::load(cli.config.as_deref()).context("failed to load config")?;

    // Initialize structured logging; RUST_LOG wins over the configured level.
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&config.settings.log_level)),
        )
        .with_writer(std::io::stderr)
        .init();

    match cli.command {
        Cmd::Serve { host, port } => serve(config, host, port).await,
        Cmd::Call {
            method,
            params,
            host,
            port,
            timeout,
        } => call(config, method, params, host, port, timeout).await,
    }
}

async fn serve(
    config: FrameworkConfig,
    host: Option<String>,
    port: Option<u16>,
) -> anyhow::Result<()> {
    let mut server_config = config.settings.server_config();
    if let Some(host) = host {
        server_config.host = host;
    }
    if let Some(port) = port {
        server_config.port = port;
    }

    let registry = Arc::new(CommandRegistry::new());
    registry.load(&BuiltinCommands::new(&registry, config.commands.clone()));
    tracing::info!(commands = ?registry.list_names(), "registered commands");

    let server = RpcServer::new(server_config, registry);
    let addr = server.start().await?;
    tracing::info!(%addr, "starting stupid-rpc server");

    shutdown_signal().await;
    tracing::info!("shutdown signal received");
    server.stop().await;

    tracing::info!("stupid-rpc exited cleanly");
    Ok(())
}

async fn call(
    config: FrameworkConfig,
    method: String,
    params: Option<String>,
    host: String,
    port: u16,
    timeout: Option<u64>,
) -> anyhow::Result<()> {
    let params: Value = match params {
        Some(raw) => serde_json::from_str(&raw).context("params must be valid JSON")?,
        None => Value::Null,
    };

    let mut client_config = config.settings.client_config(host, port);
    if let Some(secs) = timeout {
        client_config.call_timeout = Duration::from_secs(secs);
    }

    let client = RpcClient::new(client_config);
    let outcome = client.call(&method, params).await;
    client.disconnect().await;

    let result = outcome.with_context(|| format!("call to '{method}' failed"))?;
    println!("{}", serde_json::to_string_pretty(&result)?);
    Ok(())
}

/// Wait for SIGINT or SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = tokio::signal::ctrl_c();

    #[cfg(unix)]
    {
        let mut sigterm =
            match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
                Ok(sigterm) => sigterm,
                Err(e) => {
                    tracing::warn!(error = %e, "failed to register SIGTERM handler");
                    let _ = ctrl_c.await;
                    return;
                }
            };
        tokio::select! {
            _ = ctrl_c => {},
            _ = sigterm.recv() => {},
        }
    }

    #[cfg(not(unix))]
    {
        if let Err(e) = ctrl_c.await {
            tracing::warn!(error = %e, "failed to listen for ctrl_c");
        }
    }
}
