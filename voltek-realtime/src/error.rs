//! Error types for the realtime layer.
//!
//! These never reach subscribers. Session errors feed the reconnect loop,
//! which degrades to polling once the budget is spent; subscribers only ever
//! observe events or silence.

use thiserror::Error;

/// Result type for realtime operations.
pub type RealtimeResult<T> = Result<T, RealtimeError>;

/// Errors raised while running a live channel session.
#[derive(Debug, Error)]
pub enum RealtimeError {
    /// The socket could not be opened or died mid-session.
    #[error("connection failed: {0}")]
    Connect(String),

    /// The server rejected the auth frame or never answered it.
    #[error("authentication failed: {0}")]
    Auth(String),

    /// A frame could not be encoded or decoded.
    #[error("frame error: {0}")]
    Frame(#[from] serde_json::Error),
}
