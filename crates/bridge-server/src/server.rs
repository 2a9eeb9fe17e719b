//! Event socket server

use crate::dispatch::DispatchTable;
use bridge_proto::{EventCodec, EventMessage, Framing, DEFAULT_MAX_MESSAGE_SIZE};
use bytes::BytesMut;
use futures::FutureExt;
use serde::{Deserialize, Serialize};
use std::any::Any;
use std::net::SocketAddr;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::watch;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Read size for line-framed connections
const READ_CHUNK_SIZE: usize = 4096;

/// Pause after a failed accept (e.g. out of file descriptors)
const ACCEPT_ERROR_BACKOFF: Duration = Duration::from_millis(100);

/// Event server errors
#[derive(Debug, Error)]
pub enum ServerError {
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Failed to bind to {address}: {reason}\n\nTroubleshooting:\n  • Check if another process is using this port: lsof -i :{port}\n  • Try using a different address or port")]
    BindError {
        address: String,
        port: u16,
        reason: String,
    },
}

/// Event server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub bind_addr: SocketAddr,
    pub framing: Framing,
    pub max_message_size: usize,
    /// Upper bound on one handler call
    #[serde(with = "duration_secs")]
    pub request_timeout: Duration,
    /// Serve connections in parallel instead of one after another
    pub concurrent: bool,
    /// Stop once the first connection has closed
    pub single_connection: bool,
}

mod duration_secs {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_u64(duration.as_secs())
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let secs = u64::deserialize(deserializer)?;
        Ok(Duration::from_secs(secs))
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from(([127, 0, 0, 1], 8001)),
            framing: Framing::Lines,
            max_message_size: DEFAULT_MAX_MESSAGE_SIZE,
            request_timeout: Duration::from_secs(180),
            concurrent: false,
            single_connection: false,
        }
    }
}

/// Bound event server
pub struct EventServer {
    config: ServerConfig,
    table: Arc<DispatchTable>,
    listener: TcpListener,
    local_addr: SocketAddr,
    active: watch::Sender<usize>,
}

impl EventServer {
    /// Bind the listening socket
    pub async fn bind(config: ServerConfig, table: Arc<DispatchTable>) -> Result<Self, ServerError> {
        let listener = TcpListener::bind(config.bind_addr)
            .await
            .map_err(|e| ServerError::BindError {
                address: config.bind_addr.ip().to_string(),
                port: config.bind_addr.port(),
                reason: e.to_string(),
            })?;
        let local_addr = listener.local_addr()?;

        let (active, _) = watch::channel(0);

        Ok(Self {
            config,
            table,
            listener,
            local_addr,
            active,
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    /// Number of connections currently being served
    pub fn active_connections(&self) -> watch::Receiver<usize> {
        self.active.subscribe()
    }

    /// Accept and serve connections until `shutdown` is cancelled
    ///
    /// Connections already being served get to finish their current request.
    pub async fn serve(self, shutdown: CancellationToken) -> Result<(), ServerError> {
        info!(
            addr = %self.local_addr,
            framing = ?self.config.framing,
            concurrent = self.config.concurrent,
            events = ?self.table.kinds(),
            "Event server listening"
        );

        let mut connections = JoinSet::new();

        loop {
            let accepted = tokio::select! {
                _ = shutdown.cancelled() => {
                    info!("Shutdown requested, no longer accepting connections");
                    break;
                }
                Some(finished) = connections.join_next(), if !connections.is_empty() => {
                    if let Err(e) = finished {
                        error!("Connection task failed: {}", e);
                    }
                    self.active.send_replace(connections.len());
                    continue;
                }
                accepted = self.listener.accept() => accepted,
            };

            let (socket, peer_addr) = match accepted {
                Ok(pair) => pair,
                Err(e) => {
                    error!("Failed to accept connection: {}", e);
                    if accept_backoff(&shutdown).await {
                        continue;
                    }
                    break;
                }
            };

            info!(peer = %peer_addr, "Accepted event connection");
            let table = self.table.clone();
            let config = self.config.clone();
            let token = shutdown.clone();

            if self.config.concurrent {
                connections.spawn(async move {
                    if let Err(e) =
                        Self::handle_connection(socket, peer_addr, table, config, token).await
                    {
                        warn!(peer = %peer_addr, "Connection ended with error: {}", e);
                    }
                });
                self.active.send_replace(connections.len());
            } else {
                self.active.send_replace(1);
                if let Err(e) =
                    Self::handle_connection(socket, peer_addr, table, config, token).await
                {
                    warn!(peer = %peer_addr, "Connection ended with error: {}", e);
                }
                self.active.send_replace(0);
            }

            if self.config.single_connection {
                debug!("Single-connection mode, not accepting further connections");
                break;
            }
        }

        while connections.join_next().await.is_some() {
            self.active.send_replace(connections.len());
        }

        info!(addr = %self.local_addr, "Event server stopped");
        Ok(())
    }

    /// Serve one connection until the peer closes it or shutdown is requested
    ///
    /// Messages are answered strictly in the order they were received.
    pub async fn handle_connection(
        mut socket: TcpStream,
        peer_addr: SocketAddr,
        table: Arc<DispatchTable>,
        config: ServerConfig,
        shutdown: CancellationToken,
    ) -> Result<(), ServerError> {
        let connection_id = uuid::Uuid::new_v4();
        let started = Instant::now();
        let mut codec = EventCodec::new(config.framing, config.max_message_size);

        let chunk_size = match config.framing {
            Framing::Raw => config.max_message_size,
            Framing::Lines => READ_CHUNK_SIZE,
        };
        let mut chunk = vec![0u8; chunk_size];
        let mut inbound = BytesMut::with_capacity(chunk_size);
        let mut outbound = BytesMut::new();
        let mut handled = 0u64;

        loop {
            let n = tokio::select! {
                _ = shutdown.cancelled() => {
                    debug!(%connection_id, "Closing connection for shutdown");
                    break;
                }
                read = socket.read(&mut chunk) => read?,
            };

            if n == 0 {
                // Peer closed its write side; answer an unterminated final message
                let response = match codec.decode_eof(&mut inbound) {
                    Ok(Some(payload)) => {
                        Some(process_message(&table, &payload, config.request_timeout).await)
                    }
                    Ok(None) => None,
                    Err(e) => Some(e.response()),
                };
                if let Some(response) = response {
                    codec.encode_response(&response, &mut outbound);
                    handled += 1;
                }
                if !outbound.is_empty() {
                    socket.write_all(&outbound).await?;
                }
                break;
            }

            inbound.extend_from_slice(&chunk[..n]);

            loop {
                let response = match codec.decode(&mut inbound) {
                    Ok(Some(payload)) => {
                        process_message(&table, &payload, config.request_timeout).await
                    }
                    Ok(None) => break,
                    Err(e) => {
                        warn!(%connection_id, peer = %peer_addr, "Dropped message: {}", e);
                        e.response()
                    }
                };

                codec.encode_response(&response, &mut outbound);
                socket.write_all(&outbound).await?;
                outbound.clear();
                handled += 1;
            }
        }

        info!(
            %connection_id,
            peer = %peer_addr,
            messages = handled,
            duration_ms = started.elapsed().as_millis() as u64,
            "Event connection closed"
        );
        Ok(())
    }
}

/// Turn one raw message into its response string
///
/// Every outcome is a string: the handler's output, a fixed notice for bad
/// input or unknown kinds, or `Error: <message>` when the handler fails,
/// panics or runs past `request_timeout`.
pub async fn process_message(
    table: &DispatchTable,
    payload: &[u8],
    request_timeout: Duration,
) -> String {
    let message = match EventMessage::parse(payload) {
        Ok(message) => message,
        Err(e) => {
            warn!("Rejected event: {}", e);
            return e.response();
        }
    };

    debug!(
        event_type = %message.event_type,
        agent_id = %message.agent_id,
        "Received event"
    );

    let handler = match table.lookup(&message.event_type) {
        Ok(handler) => handler,
        Err(e) => {
            warn!(agent_id = %message.agent_id, "{}", e);
            return e.response();
        }
    };

    let call = AssertUnwindSafe(handler.handle(&message.agent_id, &message.data)).catch_unwind();

    match tokio::time::timeout(request_timeout, call).await {
        Ok(Ok(Ok(response))) => response,
        Ok(Ok(Err(e))) => {
            error!(
                event_type = %message.event_type,
                agent_id = %message.agent_id,
                "Handler failed: {}",
                e
            );
            format!("Error: {}", e)
        }
        Ok(Err(panic)) => {
            let reason = panic_message(panic.as_ref());
            error!(
                event_type = %message.event_type,
                agent_id = %message.agent_id,
                "Handler panicked: {}",
                reason
            );
            format!("Error: handler panicked: {}", reason)
        }
        Err(_) => {
            error!(
                event_type = %message.event_type,
                agent_id = %message.agent_id,
                timeout_secs = request_timeout.as_secs_f64(),
                "Handler timed out"
            );
            "Error: request timed out".to_string()
        }
    }
}

/// Wait out a failed accept; false when shutdown arrived first
async fn accept_backoff(shutdown: &CancellationToken) -> bool {
    tokio::select! {
        _ = shutdown.cancelled() => false,
        _ = tokio::time::sleep(ACCEPT_ERROR_BACKOFF) => true,
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
