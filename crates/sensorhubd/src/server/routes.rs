//! HTTP handlers.

use std::net::SocketAddr;

use axum::extract::rejection::ExtensionRejection;
use axum::extract::ws::rejection::WebSocketUpgradeRejection;
use axum::extract::ws::WebSocketUpgrade;
use axum::extract::{ConnectInfo, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use tokio::sync::mpsc::error::TrySendError;
use tracing::{error, info, warn};

use super::connection::{ConnectionHandler, MAX_MESSAGE_SIZE};
use super::AppState;
use crate::source::generate_reading;

/// Body returned by the liveness probe.
pub const LIVENESS_TEXT: &str = "Sensor hub is running";

/// `GET /` - liveness text, or a subscription when the request is an upgrade.
pub(crate) async fn index(
    State(state): State<AppState>,
    upgrade: Result<WebSocketUpgrade, WebSocketUpgradeRejection>,
    peer: Result<ConnectInfo<SocketAddr>, ExtensionRejection>,
) -> Response {
    match upgrade {
        Ok(upgrade) => subscribe_with(upgrade, state, peer_addr(peer)),
        Err(_) => (StatusCode::OK, LIVENESS_TEXT).into_response(),
    }
}

/// `GET /ws` - dedicated subscription endpoint.
pub(crate) async fn subscribe(
    State(state): State<AppState>,
    upgrade: WebSocketUpgrade,
    peer: Result<ConnectInfo<SocketAddr>, ExtensionRejection>,
) -> Response {
    subscribe_with(upgrade, state, peer_addr(peer))
}

/// `GET /sensor-data` - the most recent stored readings, oldest first.
pub(crate) async fn sensor_data(State(state): State<AppState>) -> Response {
    match state.store.recent(state.recent_limit).await {
        Ok(readings) => Json(readings).into_response(),
        Err(e) => {
            error!(store = %state.store.name(), error = %e, "Failed to read recent readings");
            (StatusCode::INTERNAL_SERVER_ERROR, "Failed to read sensor data").into_response()
        }
    }
}

/// `GET /test` - injects one synthetic reading into the hub.
pub(crate) async fn inject_test_reading(State(state): State<AppState>) -> Response {
    let Some(reading) = generate_reading() else {
        return (StatusCode::INTERNAL_SERVER_ERROR, "Failed to generate reading").into_response();
    };

    match state.ingest.try_send(reading) {
        Ok(()) => {
            info!(reading = %reading, "Test reading submitted");
            (StatusCode::OK, format!("Test reading submitted: {reading}")).into_response()
        }
        Err(TrySendError::Full(_)) => {
            warn!("Ingest queue full, test reading rejected");
            (StatusCode::SERVICE_UNAVAILABLE, "Hub is busy").into_response()
        }
        Err(TrySendError::Closed(_)) => {
            (StatusCode::SERVICE_UNAVAILABLE, "Hub is not running").into_response()
        }
    }
}

fn peer_addr(peer: Result<ConnectInfo<SocketAddr>, ExtensionRejection>) -> Option<SocketAddr> {
    peer.ok().map(|ConnectInfo(addr)| addr)
}

fn subscribe_with(upgrade: WebSocketUpgrade, state: AppState, peer: Option<SocketAddr>) -> Response {
    upgrade
        .max_message_size(MAX_MESSAGE_SIZE)
        .on_failed_upgrade(move |e| {
            warn!(peer = ?peer, error = %e, "WebSocket upgrade failed");
        })
        .on_upgrade(move |socket| async move {
            let handler = ConnectionHandler::accept(
                socket,
                peer,
                state.registry,
                state.connection_buffer,
                state.cancel,
            )
            .await;
            handler.run().await;
        })
}
