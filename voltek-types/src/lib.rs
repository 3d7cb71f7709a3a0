//! Core type definitions for Voltek.
//!
//! This crate defines the fundamental, schema-agnostic types shared by the
//! content loader, the realtime channel and the editor session:
//! - Item records and their identifiers (CMS ids are opaque strings)
//! - Cache and edit-session keys
//! - Change events observed on collections
//!
//! Collection schemas live in the CMS, not here. Everything in this crate
//! treats an item as an open bag of JSON fields.

mod event;
mod item;
mod keys;

pub use event::{ChangeEvent, ChangeKind};
pub use item::{Item, ItemId};
pub use keys::{FieldKey, ItemKey, SINGLETON_ID};

/// Result type alias using the crate's error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in type operations.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("invalid field key: {0}")]
    InvalidFieldKey(String),

    #[error("invalid item key: {0}")]
    InvalidItemKey(String),
}
