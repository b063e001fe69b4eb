//! Process entry point.
//!
//! # Usage
//!
//! ```bash
//! # Plain HTTP/WebSocket on port 5000 with synthetic readings
//! sensorhubd
//!
//! # TLS on 443, readings from a serial link, history in a file
//! TLS_CERT_PATH=cert.pem TLS_KEY_PATH=key.pem \
//!     sensorhubd --source serial --device /dev/rfcomm0 --store file
//!
//! # Enable debug logging
//! RUST_LOG=sensorhubd=debug sensorhubd
//! ```
//!
//! # Signal Handling
//!
//! - SIGTERM/SIGINT: Graceful shutdown

use std::path::PathBuf;
use std::process;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use sensorhub_core::Reading;

use crate::config::{Config, SourceKind, StoreKind};
use crate::hub::BroadcastHub;
use crate::persistence::{FileStore, MemoryStore, PersistenceSink, ReadingStore};
use crate::registry::ConnectionRegistry;
use crate::server::{AppState, HubServer};
use crate::source::{LineSource, SyntheticSource};

/// Depth of the channel between sources and the hub.
const INGEST_CAPACITY: usize = 64;

/// sensorhub daemon - real-time sensor reading broadcast hub
#[derive(Parser, Debug, Default)]
#[command(name = "sensorhubd", version, about)]
pub struct Args {
    /// Configuration file (TOML)
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Listen port (defaults to 443 with TLS, 5000 without)
    #[arg(short, long)]
    pub port: Option<u16>,

    /// Reading source: synthetic or serial
    #[arg(long)]
    pub source: Option<SourceKind>,

    /// Serial device to read samples from
    #[arg(long)]
    pub device: Option<PathBuf>,

    /// Reading store: memory or file
    #[arg(long)]
    pub store: Option<StoreKind>,

    /// File used by the file store
    #[arg(long)]
    pub store_path: Option<PathBuf>,
}

impl Args {
    /// Layers command-line flags over `config`.
    pub fn apply(&self, config: &mut Config) {
        if let Some(port) = self.port {
            config.port = Some(port);
        }
        if let Some(kind) = self.source {
            config.source.kind = kind;
        }
        if let Some(device) = &self.device {
            config.source.device = Some(device.clone());
        }
        if let Some(kind) = self.store {
            config.store.kind = kind;
        }
        if let Some(path) = &self.store_path {
            config.store.path = path.clone();
        }
    }
}

/// Parses arguments, loads configuration and runs the daemon.
pub fn run() -> Result<()> {
    let args = Args::parse();

    let mut config = Config::load(args.config.as_deref())?;
    args.apply(&mut config);
    config.validate()?;

    run_daemon(config)
}

#[tokio::main]
async fn run_daemon(config: Config) -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::from_default_env()
                .add_directive("sensorhubd=info".parse()?)
                .add_directive("sensorhub_core=info".parse()?)
                .add_directive("sensorhub_protocol=info".parse()?),
        )
        .init();

    info!(
        version = env!("CARGO_PKG_VERSION"),
        pid = process::id(),
        "sensorhub daemon starting"
    );

    let cancel_token = CancellationToken::new();

    let shutdown_token = cancel_token.clone();
    tokio::spawn(async move {
        if let Err(e) = wait_for_shutdown_signal().await {
            error!(error = %e, "Error waiting for shutdown signal");
        }
        info!("Shutdown signal received");
        shutdown_token.cancel();
    });

    let store = open_store(&config).await?;
    let sink = PersistenceSink::spawn(Arc::clone(&store), config.hub.persistence_queue);
    info!(store = %store.name(), "Persistence sink started");

    let registry = ConnectionRegistry::new();
    let (ingest_tx, ingest_rx) = mpsc::channel(INGEST_CAPACITY);

    let source_handle = spawn_source(&config, ingest_tx.clone(), cancel_token.clone()).await?;

    let hub = BroadcastHub::new(registry.clone(), sink, config.hub.send_timeout());
    let hub_handle = tokio::spawn(hub.run(ingest_rx, cancel_token.clone()));

    let state = AppState {
        registry,
        store,
        ingest: ingest_tx,
        connection_buffer: config.hub.connection_buffer,
        recent_limit: config.recent_limit,
        cancel: cancel_token.clone(),
    };

    let server = HubServer::bind(config.listen_addr(), config.tls.as_ref(), state).await?;
    info!(addr = %server.local_addr(), tls = server.is_tls(), "Starting server");

    let served = server.run().await;
    if let Err(e) = &served {
        error!(error = %e, "Server error");
    }

    cancel_token.cancel();
    if let Err(e) = source_handle.await {
        error!(error = ?e, "Source task panicked");
    }
    if let Err(e) = hub_handle.await {
        error!(error = ?e, "Hub task panicked");
    }

    served?;
    info!("sensorhub daemon stopped");
    Ok(())
}

async fn open_store(config: &Config) -> Result<Arc<dyn ReadingStore>> {
    match config.store.kind {
        StoreKind::Memory => Ok(Arc::new(MemoryStore::default())),
        StoreKind::File => {
            let store = FileStore::open(&config.store.path)
                .await
                .context("Failed to open reading store")?;
            Ok(Arc::new(store))
        }
    }
}

async fn spawn_source(
    config: &Config,
    tx: mpsc::Sender<Reading>,
    cancel: CancellationToken,
) -> Result<JoinHandle<()>> {
    match config.source.kind {
        SourceKind::Synthetic => {
            Ok(SyntheticSource::new(config.source.period()).spawn(tx, cancel))
        }
        SourceKind::Serial => {
            let device = config
                .source
                .device
                .as_deref()
                .context("Serial source requires a device")?;
            let source = LineSource::open(device).await?;
            info!(device = %device.display(), "Serial source opened");
            Ok(source.spawn(tx, cancel))
        }
    }
}

async fn wait_for_shutdown_signal() -> Result<()> {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};

        let mut sigterm = signal(SignalKind::terminate())?;
        let mut sigint = signal(SignalKind::interrupt())?;

        tokio::select! {
            _ = sigterm.recv() => {
                info!("Received SIGTERM");
            }
            _ = sigint.recv() => {
                info!("Received SIGINT");
            }
        }
    }

    #[cfg(not(unix))]
    {
        tokio::signal::ctrl_c().await?;
        info!("Received Ctrl+C");
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_flags_override_config() {
        let args = Args::try_parse_from([
            "sensorhubd",
            "--port",
            "8080",
            "--source",
            "serial",
            "--device",
            "/dev/rfcomm0",
            "--store",
            "file",
            "--store-path",
            "/tmp/readings.jsonl",
        ])
        .unwrap();

        let mut config = Config::default();
        args.apply(&mut config);

        assert_eq!(config.effective_port(), 8080);
        assert_eq!(config.source.kind, SourceKind::Serial);
        assert_eq!(config.source.device, Some(PathBuf::from("/dev/rfcomm0")));
        assert_eq!(config.store.kind, StoreKind::File);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_no_flags_keep_config() {
        let args = Args::try_parse_from(["sensorhubd"]).unwrap();
        let mut config = Config::default();
        args.apply(&mut config);
        assert_eq!(config, Config::default());
    }

    #[test]
    fn test_unknown_source_is_rejected() {
        assert!(Args::try_parse_from(["sensorhubd", "--source", "carrier-pigeon"]).is_err());
    }

    #[tokio::test]
    async fn test_missing_serial_device_fails_startup() {
        let mut config = Config::default();
        config.source.kind = SourceKind::Serial;
        config.source.device = Some(PathBuf::from("/nonexistent/rfcomm0"));

        let (tx, _rx) = mpsc::channel(1);
        let result = spawn_source(&config, tx, CancellationToken::new()).await;
        assert!(result.is_err());
    }
}
