//! sensorhub daemon - connection registry and broadcast hub
//!
//! This crate provides the daemon side of sensorhub:
//! - `registry` - the live set of WebSocket subscribers
//! - `hub` - fans each reading out to subscribers and persistence
//! - `persistence` - reading stores behind a non-blocking sink
//! - `source` - synthetic and line-oriented sensor inputs
//! - `server` - HTTP/WebSocket listener, plain or TLS
//! - `config` / `cli` - configuration layering and process entry point
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                     sensorhubd daemon                       │
//! ├─────────────────────────────────────────────────────────────┤
//! │                                                             │
//! │  ┌─────────────────┐  readings  ┌─────────────────────────┐ │
//! │  │ SyntheticSource │───────────▶│      BroadcastHub       │ │
//! │  │   LineSource    │  (mpsc)    │  (one publish at a time)│ │
//! │  └─────────────────┘      ▲     └─────┬─────────────┬─────┘ │
//! │                           │           │ snapshot    │submit │
//! │  ┌─────────────────┐ /test│           ▼             ▼       │
//! │  │    HubServer    │──────┘ ┌──────────────┐ ┌───────────┐  │
//! │  │ (axum, ws, tls) │        │  Connection  │ │Persistence│  │
//! │  └────────┬────────┘        │   Registry   │ │   Sink    │  │
//! │           │ upgrade         └──────▲───────┘ └─────┬─────┘  │
//! │           ▼                        │               ▼        │
//! │  ┌─────────────────┐  register     │        ┌────────────┐  │
//! │  │ConnectionHandler│───────────────┘        │ReadingStore│  │
//! │  │  (per client)   │                        └────────────┘  │
//! │  └─────────────────┘                                        │
//! │                                                             │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Panic-Free Guarantees
//!
//! All production code in this crate follows the panic-free policy:
//! - No `.unwrap()`, `.expect()`, `panic!()`, `unreachable!()`, `todo!()`
//! - All fallible operations return `Result` or `Option`
//! - Channel operations handle closure gracefully

pub mod cli;
pub mod config;
pub mod hub;
pub mod persistence;
pub mod registry;
pub mod server;
pub mod source;
