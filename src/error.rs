//! Error types for the Gatekeeper admission gate.

use thiserror::Error;

/// Main error type for Gatekeeper operations.
#[derive(Error, Debug)]
pub enum GatekeeperError {
    /// Invalid policy values, malformed configuration, or a missing binding
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// The key builder could not derive a rate limit key from the call
    #[error("Parameter error: {0}")]
    Parameter(String),

    /// The shared counter store could not be reached
    #[error("Counter store unavailable: {0}")]
    StoreUnavailable(String),

    /// Terminal denial after the single retry
    #[error("Rate limit exceeded for {key}")]
    RateLimitExceeded { key: String },

    /// The caller cancelled while waiting to retry
    #[error("Admission check for {key} cancelled while waiting to retry")]
    Cancelled { key: String },

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl GatekeeperError {
    /// Whether this error is a definitive rate limit rejection.
    pub fn is_rate_limited(&self) -> bool {
        matches!(self, GatekeeperError::RateLimitExceeded { .. })
    }

    /// Whether the failure came from infrastructure rather than the call itself.
    ///
    /// A rate limit rejection is terminal and is never reported as retryable.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            GatekeeperError::StoreUnavailable(_) | GatekeeperError::Io(_)
        )
    }
}

/// Result type alias for Gatekeeper operations.
pub type Result<T> = std::result::Result<T, GatekeeperError>;
