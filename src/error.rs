//! Error types for the Turnstile service.

use thiserror::Error;

use crate::store::StoreError;

/// Main error type for Turnstile operations.
///
/// A throttled request is not an error; it is a denied decision. These
/// variants cover setup, serving and administrative failures.
#[derive(Error, Debug)]
pub enum TurnstileError {
    /// Configuration-related errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// Counter store errors
    #[error("Counter store error: {0}")]
    Store(#[from] StoreError),

    /// Bulk reset failures
    #[error("Reset failed for pattern '{pattern}': {source}")]
    Reset {
        pattern: String,
        #[source]
        source: StoreError,
    },

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<config::ConfigError> for TurnstileError {
    fn from(e: config::ConfigError) -> Self {
        TurnstileError::Config(e.to_string())
    }
}

/// Result type alias for Turnstile operations.
pub type Result<T> = std::result::Result<T, TurnstileError>;
