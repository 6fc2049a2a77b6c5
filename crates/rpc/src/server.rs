//! Inbound JSON-RPC server.
//!
//! Binds a TCP listener and serves each accepted connection on its own task.
//! Within a connection, frames are handled strictly in arrival order and
//! every frame gets exactly one response frame; protocol errors never close
//! the connection.

use std::net::SocketAddr;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{watch, Semaphore};
use tokio::task::{JoinHandle, JoinSet};
use tokio_util::codec::{FramedRead, FramedWrite};
use tracing::{debug, error, info, instrument, warn};

use crate::codec::{decode_request, Frame, JsonLineCodec, DEFAULT_MAX_FRAME_BYTES};
use crate::error::RpcError;
use crate::executor::CommandExecutor;
use crate::registry::CommandRegistry;
use crate::types::{error_codes, JsonRpcResponse};

/// Size of the per-connection read buffer.
const READ_BUFFER_SIZE: usize = 8 * 1024;

/// Pause after a failed `accept` (e.g. out of file descriptors).
const ACCEPT_BACKOFF: Duration = Duration::from_millis(100);

/// Runtime configuration for [`RpcServer`].
#[derive(Debug, Clone, PartialEq)]
pub struct ServerConfig {
    /// Interface to bind.
    pub host: String,
    /// Port to bind (0 = ephemeral).
    pub port: u16,
    /// Cap on concurrently served connections. `None` = unbounded.
    pub max_connections: Option<usize>,
    /// Largest accepted message, in bytes.
    pub max_frame_bytes: usize,
}

impl ServerConfig {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
            max_connections: None,
            max_frame_bytes: DEFAULT_MAX_FRAME_BYTES,
        }
    }

    /// Loopback-only server on `port`.
    pub fn local(port: u16) -> Self {
        Self::new("127.0.0.1", port)
    }

    pub fn with_max_connections(mut self, max: usize) -> Self {
        self.max_connections = Some(max);
        self
    }

    pub fn with_max_frame_bytes(mut self, max: usize) -> Self {
        self.max_frame_bytes = max;
        self
    }

    fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self::new("0.0.0.0", 8080)
    }
}

/// Lifecycle of a server instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServerState {
    Stopped,
    Listening,
}

struct Running {
    addr: SocketAddr,
    shutdown: watch::Sender<bool>,
    accept_task: JoinHandle<()>,
}

/// TCP server exposing the commands of a [`CommandRegistry`].
pub struct RpcServer {
    config: ServerConfig,
    executor: CommandExecutor,
    running: Mutex<Option<Running>>,
}

impl RpcServer {
    pub fn new(config: ServerConfig, registry: Arc<CommandRegistry>) -> Self {
        Self {
            config,
            executor: CommandExecutor::new(registry),
            running: Mutex::new(None),
        }
    }

    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    /// The registry this server dispatches to.
    pub fn registry(&self) -> &Arc<CommandRegistry> {
        self.executor.registry()
    }

    pub fn state(&self) -> ServerState {
        if self.lock_running().is_some() {
            ServerState::Listening
        } else {
            ServerState::Stopped
        }
    }

    pub fn is_running(&self) -> bool {
        self.state() == ServerState::Listening
    }

    /// Address the listener is bound to, while listening.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.lock_running().as_ref().map(|r| r.addr)
    }

    /// Bind the listener and start accepting connections.
    ///
    /// Calling `start` while already listening is a no-op that returns the
    /// bound address.
    #[instrument(skip_all, fields(addr = %self.config.bind_addr()))]
    pub async fn start(&self) -> Result<SocketAddr, RpcError> {
        if let Some(addr) = self.local_addr() {
            debug!(%addr, "Server already listening");
            return Ok(addr);
        }

        let listener = TcpListener::bind((self.config.host.as_str(), self.config.port))
            .await
            .map_err(|source| RpcError::Bind {
                addr: self.config.bind_addr(),
                source,
            })?;
        let addr = listener.local_addr()?;

        let mut running = self.lock_running();
        if let Some(existing) = running.as_ref() {
            // Lost a race with a concurrent start(); keep the first listener.
            return Ok(existing.addr);
        }

        let (shutdown, shutdown_rx) = watch::channel(false);
        let limit = self
            .config
            .max_connections
            .map(|max| Arc::new(Semaphore::new(max)));
        let accept_task = tokio::spawn(accept_loop(
            listener,
            self.executor.clone(),
            limit,
            self.config.max_frame_bytes,
            shutdown_rx,
        ));

        *running = Some(Running {
            addr,
            shutdown,
            accept_task,
        });

        info!(
            %addr,
            max_connections = ?self.config.max_connections,
            "RPC server listening"
        );
        Ok(addr)
    }

    /// Stop accepting, close every open connection and release the port.
    ///
    /// Connection tasks are aborted, so a command still running for a
    /// request is cancelled and its response is never written.
    pub async fn stop(&self) {
        let Some(running) = self.lock_running().take() else {
            return;
        };
        let _ = running.shutdown.send(true);
        if let Err(e) = running.accept_task.await {
            warn!(error = %e, "Accept loop ended abnormally");
        }
        info!(addr = %running.addr, "RPC server stopped");
    }

    /// Handle one raw message as if it arrived on a connection.
    pub async fn handle_message(&self, frame: &[u8]) -> JsonRpcResponse {
        process_frame(&self.executor, frame).await
    }

    fn lock_running(&self) -> std::sync::MutexGuard<'_, Option<Running>> {
        self.running.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Drop for RpcServer {
    fn drop(&mut self) {
        let running = self
            .running
            .get_mut()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(running) = running {
            let _ = running.shutdown.send(true);
            running.accept_task.abort();
        }
    }
}

async fn accept_loop(
    listener: TcpListener,
    executor: CommandExecutor,
    limit: Option<Arc<Semaphore>>,
    max_frame_bytes: usize,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut connections = JoinSet::new();

    loop {
        // Reap finished connection tasks.
        while connections.try_join_next().is_some() {}

        let permit = match &limit {
            Some(semaphore) => tokio::select! {
                permit = Arc::clone(semaphore).acquire_owned() => match permit {
                    Ok(permit) => Some(permit),
                    Err(_) => break,
                },
                _ = shutdown.changed() => break,
            },
            None => None,
        };

        let accepted = tokio::select! {
            accepted = listener.accept() => accepted,
            _ = shutdown.changed() => break,
        };

        match accepted {
            Ok((stream, peer)) => {
                let executor = executor.clone();
                let shutdown = shutdown.clone();
                connections.spawn(async move {
                    let _permit = permit;
                    handle_connection(stream, peer, executor, max_frame_bytes, shutdown).await;
                });
            }
            Err(e) => {
                error!(error = %e, "Failed to accept connection");
                tokio::time::sleep(ACCEPT_BACKOFF).await;
            }
        }
    }

    if !connections.is_empty() {
        debug!(open = connections.len(), "Closing open connections");
    }
    connections.shutdown().await;
    debug!("Accept loop exited");
}

#[instrument(skip_all, fields(peer = %peer))]
async fn handle_connection(
    stream: TcpStream,
    peer: SocketAddr,
    executor: CommandExecutor,
    max_frame_bytes: usize,
    mut shutdown: watch::Receiver<bool>,
) {
    debug!("Client connected");
    if let Err(e) = stream.set_nodelay(true) {
        debug!(error = %e, "Could not disable Nagle");
    }

    let (reader, writer) = stream.into_split();
    let codec = JsonLineCodec::new(max_frame_bytes);
    let mut frames = FramedRead::with_capacity(reader, codec.clone(), READ_BUFFER_SIZE);
    let mut responses = FramedWrite::new(writer, codec);

    loop {
        if *shutdown.borrow() {
            break;
        }

        let next = tokio::select! {
            next = frames.next() => next,
            _ = shutdown.changed() => break,
        };

        let response = match next {
            None => break,
            Some(Err(e)) => {
                debug!(error = %e, "Read failed");
                break;
            }
            Some(Ok(Frame::Message(frame))) => process_frame(&executor, &frame).await,
            Some(Ok(Frame::TooLarge { limit })) => {
                let e = RpcError::FrameTooLarge { limit };
                warn!(error = %e, "Rejected oversized message");
                JsonRpcResponse::from_error(None, e.to_rpc_error())
            }
        };

        if let Err(e) = responses.send(response).await {
            debug!(error = %e, "Write failed");
            return;
        }
    }
    debug!("Client disconnected");
}

/// Decode one frame and produce its response envelope.
async fn process_frame(executor: &CommandExecutor, frame: &[u8]) -> JsonRpcResponse {
    match decode_request(frame) {
        Ok(request) => {
            debug!(method = %request.method, id = %request.id, "Received request");
            executor.execute(&request).await
        }
        Err(response) => {
            let code = response
                .error
                .as_ref()
                .map_or(error_codes::INVALID_REQUEST, |e| e.code);
            warn!(code, id = ?response.id, "Rejected malformed request");
            response
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::command::{command_fn, CommandResult};
    use serde_json::json;

    fn test_server() -> RpcServer {
        let registry = Arc::new(CommandRegistry::new());
        registry.register(command_fn("ping", |_, _| {
            Ok(CommandResult::success(json!({"pong": true})))
        }));
        RpcServer::new(ServerConfig::local(0), registry)
    }

    #[tokio::test]
    async fn test_handle_message_valid_and_malformed() {
        let server = test_server();

        let resp = server
            .handle_message(br#"{"jsonrpc":"2.0","method":"ping","params":{},"id":"1"}"#)
            .await;
        assert_eq!(resp.result, Some(json!({"pong": true})));

        let resp = server.handle_message(b"{{{{").await;
        assert_eq!(resp.error.unwrap().code, error_codes::PARSE_ERROR);
        assert_eq!(resp.id, None);
    }

    #[tokio::test]
    async fn test_start_is_idempotent_and_stop_returns_to_stopped() {
        let server = test_server();
        assert_eq!(server.state(), ServerState::Stopped);
        assert!(server.local_addr().is_none());

        let first = server.start().await.unwrap();
        let second = server.start().await.unwrap();
        assert_eq!(first, second);
        assert_eq!(server.state(), ServerState::Listening);

        server.stop().await;
        assert_eq!(server.state(), ServerState::Stopped);
        server.stop().await;

        let restarted = server.start().await.unwrap();
        assert!(server.is_running());
        assert_ne!(restarted.port(), 0);
        server.stop().await;
    }

    #[tokio::test]
    async fn test_bind_failure_is_reported() {
        let holder = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = holder.local_addr().unwrap().port();

        let server = RpcServer::new(ServerConfig::local(port), Arc::new(CommandRegistry::new()));
        let err = server.start().await.unwrap_err();
        assert!(matches!(err, RpcError::Bind { .. }));
        assert_eq!(server.state(), ServerState::Stopped);
    }

    #[test]
    fn test_server_config_builders() {
        let cfg = ServerConfig::local(9000)
            .with_max_connections(4)
            .with_max_frame_bytes(512);
        assert_eq!(cfg.bind_addr(), "127.0.0.1:9000");
        assert_eq!(cfg.max_connections, Some(4));
        assert_eq!(cfg.max_frame_bytes, 512);
        assert_eq!(ServerConfig::default().port, 8080);
    }
}
