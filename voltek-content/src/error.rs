//! Error types for the content loading layer.

use thiserror::Error;
use voltek_api::ApiError;

/// Result type for content operations.
pub type ContentResult<T> = Result<T, ContentError>;

/// Errors surfaced by the content loader.
///
/// Expected CMS misses (unknown items, permission denials) never appear
/// here; the loader resolves those as absent content. Only real failures
/// reach callers.
#[derive(Debug, Clone, Error)]
pub enum ContentError {
    /// The underlying CMS call failed.
    #[error(transparent)]
    Api(#[from] ApiError),

    /// The request was dropped before it resolved (loader shut down).
    #[error("content request dropped before resolving")]
    Dropped,
}
