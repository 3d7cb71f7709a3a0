//! CMS client layer for Voltek.
//!
//! The storefront renders service pages, product blurbs and hero banners
//! from collections in a headless CMS. This crate defines the
//! [`ContentSource`] seam the rest of the engine depends on and the
//! [`DirectusClient`] implementation speaking the Directus REST dialect.
//!
//! Error handling draws a hard line between expected misses (unknown items,
//! items the current role cannot read) and real failures. Callers upstream
//! render the former as empty content and only surface the latter.

mod config;
mod directus;
mod error;
pub mod source;

pub use config::{ApiConfig, AuthMode};
pub use directus::DirectusClient;
pub use error::{ApiError, ApiResult};
pub use source::ContentSource;
