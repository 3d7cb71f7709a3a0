//! Cached, batched content access for Voltek.
//!
//! One storefront render touches many fields of few items. This crate turns
//! that access pattern into polite CMS traffic:
//!
//! - **Cache**: resolved reads (including not-found) stay fresh for a TTL,
//!   with per-key invalidation epochs so an in-flight response can never
//!   overwrite data fetched after an invalidation.
//! - **Loader**: concurrent reads of one item share one request, and reads
//!   arriving within a short window coalesce into one multi-id fetch per
//!   collection.
//! - **Formatter**: legacy rich-text fields are normalized before display.
//!
//! The entry point is [`ContentLoader`]; everything else exists to serve it.

mod cache;
mod error;
mod format;
mod loader;

pub use cache::{CacheStore, DEFAULT_CACHE_TTL};
pub use error::{ContentError, ContentResult};
pub use format::ContentFormatter;
pub use loader::{ContentLoader, LoaderConfig};
