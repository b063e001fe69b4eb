//! A single subscriber's live session as seen by the hub.
//!
//! A `Connection` is the send-capability half of a transport session: a
//! bounded outbound queue drained by the session's own task, plus a shared
//! liveness flag. The hub never touches the socket directly, so a slow or
//! dead socket can only ever fill its own queue.
//!
//! # Panic-Free Guarantees
//!
//! This module follows the panic-free policy:
//! - No `.unwrap()`, `.expect()`, `panic!()`, `unreachable!()`, `todo!()`
//! - Channel closure is reported as `DeliveryError::Closed`

use std::fmt;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::time::timeout;

/// One encoded reading, shared by every recipient of a publish.
pub type Frame = Arc<str>;

/// Identity of a connection.
///
/// Allocated from a monotonically increasing counter and never reused: a
/// reconnecting subscriber always gets a fresh id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(u64);

impl ConnectionId {
    pub const fn new(id: u64) -> Self {
        Self(id)
    }

    pub const fn as_u64(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "conn-{}", self.0)
    }
}

/// Handle used to push frames to one subscriber.
///
/// Cheap to clone; clones share the same queue and liveness flag.
#[derive(Debug, Clone)]
pub struct Connection {
    id: ConnectionId,
    peer: Option<SocketAddr>,
    outbound: mpsc::Sender<Frame>,
    alive: Arc<AtomicBool>,
}

impl Connection {
    /// Creates a connection and the receiving end of its outbound queue.
    ///
    /// The receiver belongs to the transport session, which writes every
    /// frame it yields to the socket. `buffer` bounds how far the session
    /// may fall behind before deliveries start waiting.
    pub fn new(
        id: ConnectionId,
        peer: Option<SocketAddr>,
        buffer: usize,
    ) -> (Self, mpsc::Receiver<Frame>) {
        let (outbound, rx) = mpsc::channel(buffer.max(1));
        let conn = Self {
            id,
            peer,
            outbound,
            alive: Arc::new(AtomicBool::new(true)),
        };
        (conn, rx)
    }

    pub fn id(&self) -> ConnectionId {
        self.id
    }

    pub fn peer(&self) -> Option<SocketAddr> {
        self.peer
    }

    /// Returns false once the session has closed or the hub evicted it.
    pub fn is_alive(&self) -> bool {
        self.alive.load(Ordering::Acquire) && !self.outbound.is_closed()
    }

    /// Clears the liveness flag. Idempotent.
    pub fn mark_closed(&self) {
        self.alive.store(false, Ordering::Release);
    }

    /// Queues a frame without waiting.
    ///
    /// On a full queue the frame is handed back so the caller can fall back
    /// to a bounded wait with [`Connection::deliver`].
    pub fn try_deliver(&self, frame: Frame) -> Result<(), TryDeliverError> {
        if !self.alive.load(Ordering::Acquire) {
            return Err(TryDeliverError::Closed);
        }
        match self.outbound.try_send(frame) {
            Ok(()) => Ok(()),
            Err(mpsc::error::TrySendError::Full(frame)) => Err(TryDeliverError::Full(frame)),
            Err(mpsc::error::TrySendError::Closed(_)) => Err(TryDeliverError::Closed),
        }
    }

    /// Queues a frame, waiting at most `bound` for room in the queue.
    ///
    /// # Errors
    ///
    /// - `DeliveryError::Closed` if the connection is not alive
    /// - `DeliveryError::Timeout` if the queue stayed full for `bound`
    pub async fn deliver(&self, frame: Frame, bound: Duration) -> Result<(), DeliveryError> {
        if !self.alive.load(Ordering::Acquire) {
            return Err(DeliveryError::Closed);
        }
        match timeout(bound, self.outbound.send(frame)).await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(_)) => Err(DeliveryError::Closed),
            Err(_) => Err(DeliveryError::Timeout(bound)),
        }
    }
}

/// Result of a non-waiting delivery attempt.
#[derive(Debug)]
pub enum TryDeliverError {
    /// Queue is full; the frame is returned untouched.
    Full(Frame),
    Closed,
}

/// Why a frame could not be handed to a connection.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DeliveryError {
    #[error("connection closed")]
    Closed,

    #[error("send blocked for more than {0:?}")]
    Timeout(Duration),
}
