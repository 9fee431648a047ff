//! Error types for session-guard.

use thiserror::Error;

use crate::session::ExpiryReason;

/// Main error type for session-guard operations.
#[derive(Error, Debug)]
pub enum GuardError {
    /// Configuration-related errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// The underlying storage medium rejected a read or write
    #[error("Storage error: {0}")]
    Storage(#[from] std::io::Error),

    /// Value could not be serialized for storage
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// A stored entry envelope could not be parsed
    #[error("Stored entry for '{0}' is corrupt")]
    StorageCorrupt(String),

    /// A stored payload could not be de-obfuscated or decoded
    #[error("Stored entry for '{0}' could not be decoded")]
    DecryptionFailed(String),

    /// Client-side throttle refused the request
    #[error("Rate limit exceeded. Try again in {retry_after_secs} seconds.")]
    RateLimited { retry_after_secs: u64 },

    /// The server answered 429
    #[error("Server rate limit exceeded")]
    ServerRateLimited { retry_after_secs: Option<u64> },

    /// The server rejected the CSRF token, including after one rotation
    #[error("CSRF token rejected")]
    CsrfRejected,

    /// The session is over and the user has been logged out
    #[error("Session expired: {0}")]
    SessionExpired(ExpiryReason),

    /// Any other unsuccessful HTTP status; `message` is already sanitized
    #[error("HTTP {status}: {message}")]
    Http { status: u16, message: String },

    /// The request never produced a response
    #[error("Transport error: {0}")]
    Transport(String),

    /// An interactive prompt could not be shown or answered
    #[error("Prompt failed: {0}")]
    Prompt(String),
}

impl GuardError {
    /// HTTP-like status code associated with this error, if any.
    pub fn status(&self) -> Option<u16> {
        match self {
            GuardError::RateLimited { .. } | GuardError::ServerRateLimited { .. } => Some(429),
            GuardError::CsrfRejected => Some(403),
            GuardError::SessionExpired(_) => Some(401),
            GuardError::Http { status, .. } => Some(*status),
            _ => None,
        }
    }
}

/// Result type alias for session-guard operations.
pub type Result<T> = std::result::Result<T, GuardError>;
