//! Session handler for one WebSocket subscriber.
//!
//! Each subscriber gets its own `ConnectionHandler` that:
//! - Registers a fresh [`Connection`] and hands it to the registry
//! - Writes every frame the hub queues for it to the socket
//! - Logs whatever the subscriber sends
//! - Unregisters itself when the socket closes, fails, or is evicted
//!
//! # Panic-Free Guarantees
//!
//! This module follows the panic-free policy:
//! - No `.unwrap()`, `.expect()`, `panic!()`, `unreachable!()`, `todo!()`
//! - Connection errors are logged and result in graceful disconnect

use std::fmt;
use std::net::SocketAddr;
use std::time::Duration;

use axum::extract::ws::{Message, WebSocket};
use tokio::sync::mpsc;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use sensorhub_protocol::InboundPreview;

use crate::registry::{Connection, ConnectionId, ConnectionRegistry, Frame};

/// Maximum inbound message size (64 KiB)
pub const MAX_MESSAGE_SIZE: usize = 64 * 1024;

/// Write timeout for a single frame
const WRITE_TIMEOUT: Duration = Duration::from_secs(10);

/// Why a session ended.
#[derive(Debug)]
pub enum CloseReason {
    /// Subscriber closed the socket
    ClientClosed,
    /// The hub dropped this connection
    Evicted,
    /// Daemon is shutting down
    Shutdown,
    /// Socket failed
    Transport(ConnectionError),
}

impl fmt::Display for CloseReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ClientClosed => f.write_str("client closed"),
            Self::Evicted => f.write_str("evicted"),
            Self::Shutdown => f.write_str("shutdown"),
            Self::Transport(e) => write!(f, "{e}"),
        }
    }
}

/// Session handler for a single subscriber.
pub struct ConnectionHandler {
    socket: WebSocket,
    id: ConnectionId,
    peer: Option<SocketAddr>,
    outbound: mpsc::Receiver<Frame>,
    registry: ConnectionRegistry,
    cancel: CancellationToken,
}

impl ConnectionHandler {
    /// Creates the session's connection and registers it.
    ///
    /// The registry becomes the only owner of the send handle; the session
    /// keeps just the receiving end, so eviction ends the outbound stream.
    pub async fn accept(
        socket: WebSocket,
        peer: Option<SocketAddr>,
        registry: ConnectionRegistry,
        buffer: usize,
        cancel: CancellationToken,
    ) -> Self {
        let (conn, outbound) = Connection::new(registry.next_id(), peer, buffer);
        let id = conn.id();
        registry.register(conn).await;

        Self {
            socket,
            id,
            peer,
            outbound,
            registry,
            cancel,
        }
    }

    pub fn id(&self) -> ConnectionId {
        self.id
    }

    /// Runs the session until it ends, then unregisters it.
    pub async fn run(mut self) -> CloseReason {
        info!(connection_id = %self.id, peer = ?self.peer, "Subscriber connected");

        let reason = self.pump().await;

        self.registry.unregister(self.id).await;
        if !matches!(reason, CloseReason::ClientClosed | CloseReason::Transport(_)) {
            let _ = timeout(WRITE_TIMEOUT, self.socket.send(Message::Close(None))).await;
        }

        match &reason {
            CloseReason::Transport(e) => {
                warn!(connection_id = %self.id, peer = ?self.peer, error = %e, "Subscriber connection failed");
            }
            other => {
                info!(connection_id = %self.id, peer = ?self.peer, reason = %other, "Subscriber disconnected");
            }
        }
        reason
    }

    /// Main session loop.
    async fn pump(&mut self) -> CloseReason {
        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => return CloseReason::Shutdown,

                frame = self.outbound.recv() => match frame {
                    Some(frame) => {
                        if let Err(e) = self.write_frame(frame).await {
                            return CloseReason::Transport(e);
                        }
                    }
                    None => return CloseReason::Evicted,
                },

                inbound = self.socket.recv() => match inbound {
                    Some(Ok(Message::Text(text))) => {
                        info!(
                            connection_id = %self.id,
                            message = %InboundPreview::new(text.as_str()),
                            "Received message"
                        );
                    }
                    Some(Ok(Message::Binary(data))) => {
                        debug!(connection_id = %self.id, len = data.len(), "Received binary message");
                    }
                    Some(Ok(Message::Close(_))) | None => return CloseReason::ClientClosed,
                    // Ping/pong are answered by the transport
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        return CloseReason::Transport(ConnectionError::WebSocket(e.to_string()));
                    }
                },
            }
        }
    }

    async fn write_frame(&mut self, frame: Frame) -> Result<(), ConnectionError> {
        let message = Message::Text(frame.as_ref().to_owned().into());
        match timeout(WRITE_TIMEOUT, self.socket.send(message)).await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(e)) => Err(ConnectionError::WebSocket(e.to_string())),
            Err(_) => Err(ConnectionError::WriteTimeout),
        }
    }
}

/// Errors that can occur on a subscriber socket.
#[derive(Debug, thiserror::Error)]
pub enum ConnectionError {
    #[error("WebSocket error: {0}")]
    WebSocket(String),

    #[error("Write timeout")]
    WriteTimeout,
}
