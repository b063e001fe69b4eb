//! Integration tests for the HTTP/WebSocket listener.
//!
//! These tests run a real listener on an ephemeral port with a live hub
//! behind it, and talk to it with a WebSocket client and raw HTTP requests.
//!
//! Tests CAN use `.unwrap()` and `.expect()`; the panic-free behavior of
//! production code is checked through assertions.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use sensorhub_core::{Reading, Timestamp};
use sensorhubd::hub::BroadcastHub;
use sensorhubd::persistence::{MemoryStore, PersistenceSink, ReadingStore};
use sensorhubd::registry::ConnectionRegistry;
use sensorhubd::server::{AppState, HubServer, LIVENESS_TEXT};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::time::{sleep, timeout};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tokio_util::sync::CancellationToken;

// ============================================================================
// Constants
// ============================================================================

/// Maximum time to wait for a frame or a state change
const WAIT_TIMEOUT: Duration = Duration::from_secs(2);

/// Interval between registry checks
const POLL_INTERVAL: Duration = Duration::from_millis(10);

// ============================================================================
// Test Helpers
// ============================================================================

type Client = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Listener plus hub, torn down on `shutdown`.
struct TestServer {
    addr: SocketAddr,
    registry: ConnectionRegistry,
    store: Arc<MemoryStore>,
    ingest: mpsc::Sender<Reading>,
    cancel_token: CancellationToken,
}

impl TestServer {
    async fn spawn() -> Self {
        let registry = ConnectionRegistry::new();
        let store = Arc::new(MemoryStore::default());
        let cancel_token = CancellationToken::new();
        let (ingest, ingest_rx) = mpsc::channel(16);

        let sink = PersistenceSink::spawn(store.clone(), 64);
        let hub = BroadcastHub::new(registry.clone(), sink, Duration::from_millis(250));
        tokio::spawn(hub.run(ingest_rx, cancel_token.clone()));

        let state = AppState {
            registry: registry.clone(),
            store: store.clone(),
            ingest: ingest.clone(),
            connection_buffer: 8,
            recent_limit: 10,
            cancel: cancel_token.clone(),
        };
        let server = HubServer::bind("127.0.0.1:0".parse().unwrap(), None, state)
            .await
            .expect("bind listener");
        let addr = server.local_addr();

        tokio::spawn(async move {
            let _ = server.run().await;
        });

        Self {
            addr,
            registry,
            store,
            ingest,
            cancel_token,
        }
    }

    /// Opens a subscription on `path` and waits until it is registered.
    async fn subscribe(&self, path: &str) -> Client {
        let before = self.registry.len().await;
        let (client, _response) = connect_async(format!("ws://{}{}", self.addr, path))
            .await
            .expect("connect subscriber");
        self.wait_for_subscribers(before + 1).await;
        client
    }

    async fn wait_for_subscribers(&self, expected: usize) {
        let result = timeout(WAIT_TIMEOUT, async {
            while self.registry.len().await != expected {
                sleep(POLL_INTERVAL).await;
            }
        })
        .await;
        assert!(
            result.is_ok(),
            "expected {expected} subscribers, have {}",
            self.registry.len().await
        );
    }

    /// Sends a bare HTTP/1.1 GET and returns status and body.
    async fn get(&self, path: &str) -> (u16, String) {
        let mut stream = TcpStream::connect(self.addr).await.expect("connect http");
        let request = format!(
            "GET {path} HTTP/1.1\r\nHost: {}\r\nConnection: close\r\n\r\n",
            self.addr
        );
        stream.write_all(request.as_bytes()).await.unwrap();

        let mut response = String::new();
        timeout(WAIT_TIMEOUT, stream.read_to_string(&mut response))
            .await
            .unwrap()
            .unwrap();

        let status = response
            .split_whitespace()
            .nth(1)
            .and_then(|s| s.parse().ok())
            .expect("status code");
        let body = response
            .split_once("\r\n\r\n")
            .map(|(_, body)| body.to_string())
            .unwrap_or_default();
        (status, body)
    }

    async fn shutdown(self) {
        self.cancel_token.cancel();
        sleep(POLL_INTERVAL).await;
    }
}

fn reading(ts: i64) -> Reading {
    Reading::new(25.0, 55.0, Some(70.0), Timestamp::from_millis(ts)).unwrap()
}

/// Waits for the next text frame and decodes it.
async fn next_reading(client: &mut Client) -> Reading {
    loop {
        let message = timeout(WAIT_TIMEOUT, client.next())
            .await
            .expect("frame within timeout")
            .expect("stream open")
            .expect("valid frame");
        if let Message::Text(text) = message {
            return serde_json::from_str(text.as_str()).expect("reading JSON");
        }
    }
}

/// True if the server closes the stream within the timeout.
async fn closed_by_server(client: &mut Client) -> bool {
    let result = timeout(WAIT_TIMEOUT, async {
        loop {
            match client.next().await {
                None | Some(Err(_)) | Some(Ok(Message::Close(_))) => return,
                Some(Ok(_)) => {}
            }
        }
    })
    .await;
    result.is_ok()
}

// ============================================================================
// Subscription
// ============================================================================

#[tokio::test]
async fn test_subscriber_receives_published_readings_in_order() {
    let server = TestServer::spawn().await;
    let mut client = server.subscribe("/ws").await;

    for ts in 1..=3 {
        server.ingest.send(reading(ts)).await.unwrap();
    }

    for ts in 1..=3 {
        assert_eq!(next_reading(&mut client).await, reading(ts));
    }

    server.shutdown().await;
}

#[tokio::test]
async fn test_root_path_accepts_subscriptions() {
    let server = TestServer::spawn().await;
    let mut client = server.subscribe("/").await;

    server.ingest.send(reading(1000)).await.unwrap();
    assert_eq!(next_reading(&mut client).await, reading(1000));

    server.shutdown().await;
}

#[tokio::test]
async fn test_every_subscriber_gets_the_frame() {
    let server = TestServer::spawn().await;
    let mut a = server.subscribe("/ws").await;
    let mut b = server.subscribe("/").await;

    server.ingest.send(reading(7)).await.unwrap();

    assert_eq!(next_reading(&mut a).await, reading(7));
    assert_eq!(next_reading(&mut b).await, reading(7));

    server.shutdown().await;
}

#[tokio::test]
async fn test_client_close_unregisters() {
    let server = TestServer::spawn().await;
    let mut client = server.subscribe("/ws").await;

    client.close(None).await.unwrap();
    server.wait_for_subscribers(0).await;

    server.shutdown().await;
}

#[tokio::test]
async fn test_inbound_messages_do_not_disturb_delivery() {
    let server = TestServer::spawn().await;
    let mut client = server.subscribe("/ws").await;

    client
        .send(Message::text("hello from the field".to_string()))
        .await
        .unwrap();
    server.ingest.send(reading(5)).await.unwrap();

    assert_eq!(next_reading(&mut client).await, reading(5));
    assert_eq!(server.registry.len().await, 1);

    server.shutdown().await;
}

#[tokio::test]
async fn test_oversized_inbound_message_drops_subscriber() {
    let server = TestServer::spawn().await;
    let mut client = server.subscribe("/ws").await;

    let huge = "x".repeat(100 * 1024);
    let _ = client.send(Message::text(huge)).await;

    assert!(closed_by_server(&mut client).await);
    server.wait_for_subscribers(0).await;

    server.shutdown().await;
}

#[tokio::test]
async fn test_shutdown_closes_subscribers() {
    let server = TestServer::spawn().await;
    let mut client = server.subscribe("/ws").await;
    let registry = server.registry.clone();

    server.shutdown().await;

    assert!(closed_by_server(&mut client).await);
    assert!(registry.is_empty().await);
}

// ============================================================================
// HTTP endpoints
// ============================================================================

#[tokio::test]
async fn test_root_without_upgrade_is_liveness() {
    let server = TestServer::spawn().await;

    let (status, body) = server.get("/").await;
    assert_eq!(status, 200);
    assert_eq!(body, LIVENESS_TEXT);

    server.shutdown().await;
}

#[tokio::test]
async fn test_test_endpoint_reaches_subscribers_and_store() {
    let server = TestServer::spawn().await;
    let mut client = server.subscribe("/ws").await;

    let (status, body) = server.get("/test").await;
    assert_eq!(status, 200);
    assert!(body.starts_with("Test reading submitted"));

    let received = next_reading(&mut client).await;
    assert!((20.0..=30.0).contains(&received.temperature()));

    let stored = timeout(WAIT_TIMEOUT, async {
        loop {
            let recent = server.store.recent(10).await.unwrap();
            if !recent.is_empty() {
                return recent;
            }
            sleep(POLL_INTERVAL).await;
        }
    })
    .await
    .unwrap();
    assert_eq!(stored, vec![received]);

    server.shutdown().await;
}

#[tokio::test]
async fn test_sensor_data_returns_recent_history() {
    let server = TestServer::spawn().await;
    for ts in 0..12 {
        server.store.store(&reading(ts)).await.unwrap();
    }

    let (status, body) = server.get("/sensor-data").await;
    assert_eq!(status, 200);

    let readings: Vec<Reading> = serde_json::from_str(&body).unwrap();
    assert_eq!(readings.len(), 10);
    assert_eq!(readings.first().map(|r| r.timestamp().as_millis()), Some(2));
    assert_eq!(readings.last().map(|r| r.timestamp().as_millis()), Some(11));

    server.shutdown().await;
}
