//! Outbound JSON-RPC connection.
//!
//! Calls are correlated by request id: each call registers a pending
//! `oneshot` before its request is written, and a background receive loop
//! resolves the matching entry when the response arrives. Responses may
//! arrive in any order. Whoever removes an entry from the pending table
//! first (the receive loop or the timeout) wins; the other side is a no-op.

use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, PoisonError};
use std::time::{Duration, Instant};

use futures::{SinkExt, StreamExt};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::sync::{oneshot, Mutex};
use tokio::task::JoinHandle;
use tokio_util::codec::{FramedRead, FramedWrite};
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use crate::codec::{decode_response, Frame, JsonLineCodec, DEFAULT_MAX_FRAME_BYTES};
use crate::error::RpcError;
use crate::types::{JsonRpcRequest, JsonRpcResponse};

const READ_BUFFER_SIZE: usize = 8 * 1024;

/// Default wait for a single call's response.
pub const DEFAULT_CALL_TIMEOUT: Duration = Duration::from_secs(120);

/// Default wait for the TCP connect.
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

/// Runtime configuration for [`RpcClient`].
#[derive(Debug, Clone, PartialEq)]
pub struct ClientConfig {
    pub host: String,
    pub port: u16,
    pub call_timeout: Duration,
    pub connect_timeout: Duration,
    pub max_frame_bytes: usize,
}

impl ClientConfig {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
            call_timeout: DEFAULT_CALL_TIMEOUT,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            max_frame_bytes: DEFAULT_MAX_FRAME_BYTES,
        }
    }

    pub fn with_call_timeout(mut self, timeout: Duration) -> Self {
        self.call_timeout = timeout;
        self
    }

    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self::new("localhost", 8080)
    }
}

/// Lifecycle of the outbound connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
}

type PendingMap = HashMap<String, oneshot::Sender<JsonRpcResponse>>;

struct Link {
    state: ConnectionState,
    /// Bumped on every connect/disconnect so a stale receive loop cannot
    /// tear down a newer connection.
    generation: u64,
}

struct Shared {
    link: std::sync::Mutex<Link>,
    pending: Mutex<PendingMap>,
}

impl Shared {
    fn link(&self) -> std::sync::MutexGuard<'_, Link> {
        self.link.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Called by a receive loop when its stream ends.
    async fn connection_lost(&self, generation: u64) {
        {
            let mut link = self.link();
            if link.generation != generation {
                return;
            }
            link.state = ConnectionState::Disconnected;
        }
        self.fail_pending().await;
    }

    /// Drop every waiter; their callers observe `ConnectionClosed`.
    async fn fail_pending(&self) {
        let mut pending = self.pending.lock().await;
        if !pending.is_empty() {
            warn!(pending = pending.len(), "Failing calls pending on a closed connection");
        }
        pending.clear();
    }
}

struct Connection {
    writer: FramedWrite<OwnedWriteHalf, JsonLineCodec>,
    reader_task: JoinHandle<()>,
}

/// TCP client for a remote JSON-RPC server.
///
/// Safe to share (`Arc<RpcClient>`) between tasks; concurrent calls are
/// multiplexed over one connection.
pub struct RpcClient {
    config: ClientConfig,
    shared: Arc<Shared>,
    connection: Mutex<Option<Connection>>,
}

impl RpcClient {
    pub fn new(config: ClientConfig) -> Self {
        Self {
            config,
            shared: Arc::new(Shared {
                link: std::sync::Mutex::new(Link {
                    state: ConnectionState::Disconnected,
                    generation: 0,
                }),
                pending: Mutex::new(HashMap::new()),
            }),
            connection: Mutex::new(None),
        }
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    pub fn state(&self) -> ConnectionState {
        self.shared.link().state
    }

    pub fn is_connected(&self) -> bool {
        self.state() == ConnectionState::Connected
    }

    /// Number of calls currently waiting for a response.
    pub async fn pending_calls(&self) -> usize {
        self.shared.pending.lock().await.len()
    }

    /// Open the TCP connection and start its receive loop.
    ///
    /// No-op while already connected.
    #[instrument(skip_all, fields(addr = %self.config.addr()))]
    pub async fn connect(&self) -> Result<(), RpcError> {
        let mut connection = self.connection.lock().await;
        if connection.is_some() && self.is_connected() {
            return Ok(());
        }

        self.shared.link().state = ConnectionState::Connecting;
        let addr = self.config.addr();

        let connecting = TcpStream::connect((self.config.host.as_str(), self.config.port));
        let stream = match tokio::time::timeout(self.config.connect_timeout, connecting).await {
            Ok(Ok(stream)) => stream,
            Ok(Err(source)) => {
                self.shared.link().state = ConnectionState::Disconnected;
                return Err(RpcError::Connect { addr, source });
            }
            Err(_) => {
                self.shared.link().state = ConnectionState::Disconnected;
                return Err(RpcError::ConnectTimeout {
                    addr,
                    timeout: self.config.connect_timeout,
                });
            }
        };
        if let Err(e) = stream.set_nodelay(true) {
            debug!(error = %e, "Could not disable Nagle");
        }

        if let Some(stale) = connection.take() {
            stale.reader_task.abort();
        }

        let (read_half, write_half) = stream.into_split();
        let generation = {
            let mut link = self.shared.link();
            link.generation += 1;
            link.state = ConnectionState::Connected;
            link.generation
        };
        let reader_task = tokio::spawn(receive_loop(
            read_half,
            Arc::clone(&self.shared),
            generation,
            self.config.max_frame_bytes,
        ));

        *connection = Some(Connection {
            writer: FramedWrite::new(write_half, JsonLineCodec::new(self.config.max_frame_bytes)),
            reader_task,
        });
        info!("Connected to RPC server");
        Ok(())
    }

    /// Close the connection. Pending calls fail with `ConnectionClosed`.
    pub async fn disconnect(&self) {
        let connection = self.connection.lock().await.take();
        {
            let mut link = self.shared.link();
            link.generation += 1;
            link.state = ConnectionState::Disconnected;
        }
        if let Some(mut connection) = connection {
            let _ = SinkExt::<JsonRpcRequest>::close(&mut connection.writer).await;
            connection.reader_task.abort();
            info!(addr = %self.config.addr(), "Disconnected from RPC server");
        }
        self.shared.fail_pending().await;
    }

    /// Call `method` with `params` and wait for its result.
    ///
    /// Connects first when needed. Fails with [`RpcError::Remote`] when the
    /// server answers with an error, and with [`RpcError::Timeout`] when no
    /// answer arrives within the call timeout.
    pub async fn call(&self, method: &str, params: Value) -> Result<Value, RpcError> {
        self.connect().await?;

        let (tx, rx) = oneshot::channel();
        let (id, request) = {
            let mut pending = self.shared.pending.lock().await;
            let id = loop {
                let candidate = generate_request_id();
                if !pending.contains_key(&candidate) {
                    break candidate;
                }
            };
            pending.insert(id.clone(), tx);
            let request = JsonRpcRequest::new(id.clone(), method, params);
            (id, request)
        };

        let started = Instant::now();
        if let Err(e) = self.send_request(request).await {
            self.shared.pending.lock().await.remove(&id);
            return Err(e);
        }
        debug!(method = %method, id = %id, "Sent request");

        let response = match tokio::time::timeout(self.config.call_timeout, rx).await {
            Ok(Ok(response)) => response,
            Ok(Err(_)) => {
                return Err(RpcError::ConnectionClosed {
                    method: method.to_string(),
                })
            }
            Err(_) => {
                self.shared.pending.lock().await.remove(&id);
                let elapsed = started.elapsed();
                warn!(method = %method, id = %id, ?elapsed, "Call timed out");
                return Err(RpcError::Timeout {
                    method: method.to_string(),
                    elapsed,
                });
            }
        };

        debug!(
            method = %method,
            id = %id,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Received response"
        );

        if let Some(error) = response.error {
            return Err(RpcError::Remote {
                code: error.code,
                message: error.message,
                data: error.data,
            });
        }
        Ok(response.result.unwrap_or(Value::Null))
    }

    /// Typed wrapper around [`call`](Self::call).
    pub async fn call_typed<P, R>(&self, method: &str, params: &P) -> Result<R, RpcError>
    where
        P: Serialize + ?Sized,
        R: DeserializeOwned,
    {
        let params = serde_json::to_value(params)?;
        let result = self.call(method, params).await?;
        Ok(serde_json::from_value(result)?)
    }

    async fn send_request(&self, request: JsonRpcRequest) -> Result<(), RpcError> {
        let mut connection = self.connection.lock().await;
        let Some(conn) = connection.as_mut() else {
            return Err(RpcError::ConnectionClosed {
                method: request.method,
            });
        };
        if let Err(e) = conn.writer.send(request).await {
            if !matches!(e, RpcError::Io(_)) {
                return Err(e);
            }
            warn!(error = %e, "Write failed, dropping connection");
            if let Some(stale) = connection.take() {
                stale.reader_task.abort();
            }
            let generation = {
                let mut link = self.shared.link();
                link.state = ConnectionState::Disconnected;
                link.generation
            };
            drop(connection);
            self.shared.connection_lost(generation).await;
            return Err(e);
        }
        Ok(())
    }
}

impl Drop for RpcClient {
    fn drop(&mut self) {
        if let Some(connection) = self.connection.get_mut().take() {
            connection.reader_task.abort();
        }
    }
}

/// Run `op` against a fresh connection, disconnecting afterwards whatever
/// the outcome.
pub async fn with_connection<T, F, Fut>(config: ClientConfig, op: F) -> Result<T, RpcError>
where
    F: FnOnce(Arc<RpcClient>) -> Fut,
    Fut: Future<Output = Result<T, RpcError>>,
{
    let client = Arc::new(RpcClient::new(config));
    client.connect().await?;
    let result = op(Arc::clone(&client)).await;
    client.disconnect().await;
    result
}

/// Request id: unix millis plus a short random suffix.
pub fn generate_request_id() -> String {
    let suffix = Uuid::new_v4().simple().to_string();
    format!("{}-{}", chrono::Utc::now().timestamp_millis(), &suffix[..6])
}

async fn receive_loop(
    reader: OwnedReadHalf,
    shared: Arc<Shared>,
    generation: u64,
    max_frame_bytes: usize,
) {
    let mut frames =
        FramedRead::with_capacity(reader, JsonLineCodec::new(max_frame_bytes), READ_BUFFER_SIZE);

    while let Some(next) = frames.next().await {
        match next {
            Ok(Frame::Message(frame)) => dispatch_response(&shared, &frame).await,
            Ok(Frame::TooLarge { limit }) => {
                warn!(limit, "Discarding oversized response")
            }
            Err(e) => {
                warn!(error = %e, "Read failed");
                break;
            }
        }
    }
    debug!("Server connection closed");

    shared.connection_lost(generation).await;
}

/// Route an inbound response to the caller waiting on its id.
async fn dispatch_response(shared: &Shared, frame: &[u8]) {
    let response = match decode_response(frame) {
        Ok(response) => response,
        Err(e) => {
            warn!(error = %e, "Failed to decode response");
            return;
        }
    };

    let Some(id) = response.id.clone() else {
        warn!(error = ?response.error, "Received response without id");
        return;
    };

    let waiter = shared.pending.lock().await.remove(&id);
    match waiter {
        Some(tx) => {
            let _ = tx.send(response);
        }
        None => debug!(id = %id, "Dropping response for unknown or expired request id"),
    }
}
