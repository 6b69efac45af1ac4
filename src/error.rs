//! # Error Types
//!
//! Custom error types for Scoot Link using `thiserror`.
//!
//! Note that the inbound decode path never produces these: a frame that
//! cannot be decoded yields an empty update plus a
//! [`DecodeIssue`](crate::protocol::decoder::DecodeIssue), not an error.

use thiserror::Error;

/// Main error type for Scoot Link
#[derive(Debug, Error)]
pub enum ScootLinkError {
    /// Wire protocol errors (command construction, capture parsing)
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// Outbound transport write failures
    #[error("Transport error: {0}")]
    Transport(String),

    /// Configuration errors
    #[error("Configuration error: {0}")]
    Config(#[from] toml::de::Error),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Snapshot serialization errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// The session was torn down while an operation was pending
    #[error("Session closed")]
    SessionClosed,
}

/// Result type alias for Scoot Link
pub type Result<T> = std::result::Result<T, ScootLinkError>;
