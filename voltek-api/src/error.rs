//! Error types for the CMS client layer.

use thiserror::Error;

/// Result type for CMS operations.
pub type ApiResult<T> = Result<T, ApiError>;

/// Errors that can occur talking to the CMS.
///
/// All payloads are plain strings so errors can be cloned out to every
/// caller waiting on a deduplicated request.
#[derive(Debug, Clone, Error)]
pub enum ApiError {
    /// The item or collection does not exist.
    #[error("not found")]
    NotFound,

    /// The current role is not allowed to see the item.
    #[error("permission denied")]
    PermissionDenied,

    /// The session expired and could not be re-established.
    #[error("authentication expired")]
    AuthExpired,

    /// Login or token refresh was rejected.
    #[error("authentication failed: {0}")]
    AuthFailed(String),

    /// Network error.
    #[error("network error: {0}")]
    Network(String),

    /// Response body could not be decoded.
    #[error("decode error: {0}")]
    Decode(String),

    /// Any other non-success response from the CMS.
    #[error("api error (status {status}): {message}")]
    Api { status: u16, message: String },
}

impl ApiError {
    /// True for misses that readers resolve as "no content" instead of
    /// surfacing: unknown items and items the current role cannot see.
    #[must_use]
    pub fn is_expected(&self) -> bool {
        matches!(self, Self::NotFound | Self::PermissionDenied)
    }
}
