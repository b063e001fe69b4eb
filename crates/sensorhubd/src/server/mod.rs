//! Transport listener - HTTP and WebSocket on one port.
//!
//! Plain mode serves with `axum::serve`; TLS mode serves the same router
//! through `axum-server` with rustls. Each WebSocket subscriber gets its own
//! [`ConnectionHandler`] task.
//!
//! # Routes
//!
//! | Path           | Behavior                                            |
//! |----------------|-----------------------------------------------------|
//! | `/`            | Liveness text, or subscribe if the request upgrades |
//! | `/ws`          | Subscribe                                           |
//! | `/sensor-data` | Recent stored readings as JSON                      |
//! | `/test`        | Inject one synthetic reading                        |
//!
//! # Panic-Free Guarantees
//!
//! - No `.unwrap()`, `.expect()`, `panic!()`, `unreachable!()`, `todo!()`
//! - Bind and TLS failures are returned as [`ServerError`]

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use axum::routing::get;
use axum::Router;
use axum_server::tls_rustls::RustlsConfig;
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use sensorhub_core::Reading;

use crate::config::TlsConfig;
use crate::persistence::ReadingStore;
use crate::registry::ConnectionRegistry;

mod connection;
mod routes;

pub use connection::{CloseReason, ConnectionError, ConnectionHandler, MAX_MESSAGE_SIZE};
pub use routes::LIVENESS_TEXT;

/// How long TLS connections get to finish once shutdown starts.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

/// Shared state handed to every request handler.
#[derive(Clone)]
pub struct AppState {
    pub registry: ConnectionRegistry,
    pub store: Arc<dyn ReadingStore>,
    /// Ingest side of the hub
    pub ingest: mpsc::Sender<Reading>,
    /// Outbound queue depth for each new subscriber
    pub connection_buffer: usize,
    /// How many readings `/sensor-data` returns
    pub recent_limit: usize,
    pub cancel: CancellationToken,
}

/// Builds the router for `state`.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/", get(routes::index))
        .route("/ws", get(routes::subscribe))
        .route("/sensor-data", get(routes::sensor_data))
        .route("/test", get(routes::inject_test_reading))
        .with_state(state)
}

enum Listener {
    Plain(TcpListener),
    Tls {
        listener: std::net::TcpListener,
        config: RustlsConfig,
    },
}

/// A bound listener, ready to serve.
pub struct HubServer {
    listener: Listener,
    local_addr: SocketAddr,
    state: AppState,
}

impl HubServer {
    /// Binds `addr`, loading TLS material first when `tls` is given.
    pub async fn bind(
        addr: SocketAddr,
        tls: Option<&TlsConfig>,
        state: AppState,
    ) -> Result<Self, ServerError> {
        let listener = match tls {
            None => {
                let listener = TcpListener::bind(addr)
                    .await
                    .map_err(|source| ServerError::Bind { addr, source })?;
                Listener::Plain(listener)
            }
            Some(tls) => {
                let config = RustlsConfig::from_pem_file(&tls.cert_path, &tls.key_path)
                    .await
                    .map_err(|source| ServerError::Tls {
                        cert_path: tls.cert_path.clone(),
                        key_path: tls.key_path.clone(),
                        source,
                    })?;
                let listener = std::net::TcpListener::bind(addr)
                    .and_then(|l| l.set_nonblocking(true).map(|()| l))
                    .map_err(|source| ServerError::Bind { addr, source })?;
                Listener::Tls { listener, config }
            }
        };

        let local_addr = match &listener {
            Listener::Plain(l) => l.local_addr(),
            Listener::Tls { listener, .. } => listener.local_addr(),
        }
        .map_err(|source| ServerError::Bind { addr, source })?;

        Ok(Self {
            listener,
            local_addr,
            state,
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn is_tls(&self) -> bool {
        matches!(self.listener, Listener::Tls { .. })
    }

    /// Serves until the state's cancellation token fires.
    ///
    /// Every remaining subscriber is closed before this returns.
    pub async fn run(self) -> Result<(), ServerError> {
        let cancel = self.state.cancel.clone();
        let registry = self.state.registry.clone();
        let app = router(self.state).into_make_service_with_connect_info::<SocketAddr>();

        match self.listener {
            Listener::Plain(listener) => {
                info!(addr = %self.local_addr, "Listening (plain)");
                let token = cancel.clone();
                axum::serve(listener, app)
                    .with_graceful_shutdown(async move { token.cancelled().await })
                    .await
                    .map_err(ServerError::Serve)?;
            }
            Listener::Tls { listener, config } => {
                info!(addr = %self.local_addr, "Listening (TLS)");
                let handle = axum_server::Handle::new();
                let shutdown = handle.clone();
                let token = cancel.clone();
                tokio::spawn(async move {
                    token.cancelled().await;
                    shutdown.graceful_shutdown(Some(SHUTDOWN_GRACE));
                });

                axum_server::from_tcp_rustls(listener, config)
                    .handle(handle)
                    .serve(app)
                    .await
                    .map_err(ServerError::Serve)?;
            }
        }

        // A serve error leaves the token untouched; sessions still need it.
        cancel.cancel();
        let closed = registry.close_all().await;
        debug!(closed, "Listener stopped");
        Ok(())
    }
}

/// Errors raised by the transport listener.
#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    #[error("failed to bind {addr}: {source}")]
    Bind {
        addr: SocketAddr,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to load TLS material ({}, {}): {source}", .cert_path.display(), .key_path.display())]
    Tls {
        cert_path: PathBuf,
        key_path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("listener failed: {0}")]
    Serve(#[source] std::io::Error),
}
