//! sensorhub Core - Shared types for environmental sensor readings
//!
//! This crate provides the domain types shared between
//! the wire protocol (sensorhub-protocol) and the daemon (sensorhubd).
//!
//! All code follows the panic-free policy: no `.unwrap()`, `.expect()`,
//! `panic!()`, `unreachable!()`, `todo!()`, or direct indexing `[i]`.

pub mod error;
pub mod reading;

// Re-exports for convenience
pub use error::{DomainError, DomainResult};
pub use reading::{Field, Reading, Timestamp};
