//! Connection registry - the live set of subscribers.
//!
//! The registry is the single piece of shared mutable state in the daemon.
//! Transport sessions register and unregister themselves; the hub takes
//! point-in-time snapshots to publish against.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────┐  register/unregister  ┌──────────────────────┐
//! │ConnectionHandler│──────────────────────▶│  ConnectionRegistry  │
//! │   (per client)  │                       │ RwLock<HashMap<..>>  │
//! └─────────────────┘                       └──────────┬───────────┘
//!                                                      │ snapshot()
//!                                                      ▼
//!                                           ┌──────────────────────┐
//!                                           │    BroadcastHub      │
//!                                           │ (sends, lock free)   │
//!                                           └──────────────────────┘
//! ```
//!
//! The lock is held only while the map itself is touched: membership
//! changes take the write half, snapshots take the read half and clone the
//! handles out. No send ever happens under the lock.
//!
//! # Panic-Free Guarantees
//!
//! All operations in this module follow the panic-free policy:
//! - No `.unwrap()` or `.expect()` in production code
//! - Absence is reported, never raised

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tokio::sync::RwLock;
use tracing::debug;

mod connection;

pub use connection::{Connection, ConnectionId, DeliveryError, Frame, TryDeliverError};

/// Concurrency-safe set of live connections, keyed by identity.
///
/// This is a cheap-to-clone handle; clones share the same set.
#[derive(Clone, Default)]
pub struct ConnectionRegistry {
    connections: Arc<RwLock<HashMap<ConnectionId, Connection>>>,
    next_id: Arc<AtomicU64>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Allocates a fresh connection id. Ids are never reused.
    pub fn next_id(&self) -> ConnectionId {
        ConnectionId::new(self.next_id.fetch_add(1, Ordering::Relaxed))
    }

    /// Adds a live connection.
    ///
    /// Callers always register fresh identities; registering an id twice
    /// replaces the earlier handle.
    pub async fn register(&self, conn: Connection) {
        let id = conn.id();
        let total = {
            let mut map = self.connections.write().await;
            map.insert(id, conn);
            map.len()
        };
        debug!(connection_id = %id, total, "Connection registered");
    }

    /// Removes a connection if present.
    ///
    /// Returns whether anything was removed. Removing an absent id is a
    /// no-op, so a session closing and the hub evicting it can race freely.
    pub async fn unregister(&self, id: ConnectionId) -> bool {
        let (removed, total) = {
            let mut map = self.connections.write().await;
            let removed = map.remove(&id);
            (removed, map.len())
        };

        match removed {
            Some(conn) => {
                conn.mark_closed();
                debug!(connection_id = %id, total, "Connection unregistered");
                true
            }
            None => false,
        }
    }

    /// Returns a point-in-time copy of the live connections.
    ///
    /// The copy is independent of the registry, so it can be iterated while
    /// registrations continue.
    pub async fn snapshot(&self) -> Vec<Connection> {
        self.connections.read().await.values().cloned().collect()
    }

    pub async fn contains(&self, id: ConnectionId) -> bool {
        self.connections.read().await.contains_key(&id)
    }

    pub async fn len(&self) -> usize {
        self.connections.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.connections.read().await.is_empty()
    }

    /// Closes and forgets every connection.
    ///
    /// Dropping the registry's handles (together with the liveness flag)
    /// ends each session's outbound stream, which closes its socket.
    /// Returns how many connections were closed.
    pub async fn close_all(&self) -> usize {
        let drained: Vec<Connection> = {
            let mut map = self.connections.write().await;
            map.drain().map(|(_, conn)| conn).collect()
        };
        for conn in &drained {
            conn.mark_closed();
        }
        debug!(closed = drained.len(), "Closed all connections");
        drained.len()
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    fn new_conn(registry: &ConnectionRegistry) -> (Connection, tokio::sync::mpsc::Receiver<Frame>) {
        Connection::new(registry.next_id(), None, 8)
    }

    #[tokio::test]
    async fn test_register_and_snapshot() {
        let registry = ConnectionRegistry::new();
        let (a, _rx_a) = new_conn(&registry);
        let (b, _rx_b) = new_conn(&registry);

        registry.register(a.clone()).await;
        registry.register(b.clone()).await;

        let mut ids: Vec<_> = registry.snapshot().await.iter().map(Connection::id).collect();
        ids.sort();
        assert_eq!(ids, vec![a.id(), b.id()]);
        assert_eq!(registry.len().await, 2);
    }

    #[tokio::test]
    async fn test_ids_are_never_reused() {
        let registry = ConnectionRegistry::new();
        let first = registry.next_id();
        let second = registry.next_id();
        assert_ne!(first, second);
        assert!(second > first);
    }

    #[tokio::test]
    async fn test_unregister_absent_is_noop() {
        let registry = ConnectionRegistry::new();
        let (a, _rx) = new_conn(&registry);
        registry.register(a.clone()).await;

        assert!(registry.unregister(a.id()).await);
        assert!(!registry.unregister(a.id()).await);
        assert!(registry.is_empty().await);
    }

    #[tokio::test]
    async fn test_unregister_marks_closed() {
        let registry = ConnectionRegistry::new();
        let (a, _rx) = new_conn(&registry);
        registry.register(a.clone()).await;

        registry.unregister(a.id()).await;
        assert!(!a.is_alive());
    }

    #[tokio::test]
    async fn test_snapshot_unaffected_by_later_mutation() {
        let registry = ConnectionRegistry::new();
        let (a, _rx_a) = new_conn(&registry);
        let (b, _rx_b) = new_conn(&registry);
        registry.register(a.clone()).await;

        let snapshot = registry.snapshot().await;
        registry.register(b).await;
        registry.unregister(a.id()).await;

        assert_eq!(snapshot.len(), 1);
        assert_eq!(snapshot.first().map(Connection::id), Some(a.id()));
    }

    #[tokio::test]
    async fn test_close_all_ends_sessions() {
        let registry = ConnectionRegistry::new();
        let (a, mut rx_a) = new_conn(&registry);
        registry.register(a.clone()).await;

        // Session side keeps no sender, so once the registry and the test
        // drop theirs the stream ends.
        drop(a);
        assert_eq!(registry.close_all().await, 1);
        assert!(registry.is_empty().await);

        let next = tokio::time::timeout(Duration::from_secs(1), rx_a.recv())
            .await
            .unwrap();
        assert!(next.is_none());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_register_unregister_snapshot() {
        let registry = ConnectionRegistry::new();
        let mut tasks = Vec::new();

        for _ in 0..16 {
            let registry = registry.clone();
            tasks.push(tokio::spawn(async move {
                for _ in 0..50 {
                    let (conn, _rx) = Connection::new(registry.next_id(), None, 1);
                    let id = conn.id();
                    registry.register(conn).await;
                    let _ = registry.snapshot().await;
                    assert!(registry.unregister(id).await);
                }
            }));
        }

        for task in tasks {
            task.await.unwrap();
        }
        assert!(registry.is_empty().await);
    }
}
