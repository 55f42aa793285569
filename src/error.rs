//! Error types for the Turnstile service.

use thiserror::Error;

/// Main error type for Turnstile operations.
#[derive(Error, Debug)]
pub enum TurnstileError {
    /// Malformed caller input (empty identifier, bad quota hint)
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// No quota could be resolved for the request
    #[error("No quota configured for request and no fallback supplied")]
    NoQuota,

    /// Administrative configuration errors
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Unexpected invariant violation
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Result type alias for Turnstile operations.
pub type Result<T> = std::result::Result<T, TurnstileError>;
