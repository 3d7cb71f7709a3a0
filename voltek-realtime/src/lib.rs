//! Live content updates for Voltek.
//!
//! [`RealtimeChannel`] keeps a websocket to the CMS open, turns its
//! subscription frames into [`voltek_types::ChangeEvent`]s and fans them out
//! to registered subscribers. When the socket cannot be kept alive it
//! degrades to polling snapshots and diffing them, so consumers see the same
//! event stream either way.

mod channel;
mod error;
mod fallback;
mod protocol;

pub use channel::{
    ChannelState, RealtimeChannel, RealtimeConfig, Subscription, WILDCARD, backoff_delay,
};
pub use error::{RealtimeError, RealtimeResult};
pub use fallback::{Snapshot, diff_snapshots, snapshot_items};
pub use protocol::{ClientFrame, DataEntry, ServerFrame};
