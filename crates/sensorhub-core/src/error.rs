//! Domain-specific error types following panic-free policy.

use crate::Field;
use thiserror::Error;

/// Errors that can occur while constructing domain values.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum DomainError {
    /// A numeric field holds NaN or an infinity
    #[error("{field} must be finite, got {value}")]
    NonFinite { field: Field, value: f64 },

    /// A required field was not supplied
    #[error("missing required field: {field}")]
    MissingField { field: Field },

    /// Parse error for incoming data
    #[error("failed to parse {field}: {reason}")]
    ParseError { field: Field, reason: String },
}

/// Result type for domain operations.
pub type DomainResult<T> = Result<T, DomainError>;
