//! Inline edit sessions for Voltek content.
//!
//! Tracks which fields are open for editing and the values staged for them,
//! and flushes those values through [`voltek_api::ContentSource`] in one
//! PATCH per item, keeping the [`voltek_content::ContentLoader`] cache
//! honest along the way.

mod session;

pub use session::{EditorSession, SaveReport};
