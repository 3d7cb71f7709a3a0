//! Wire frames for the CMS websocket.
//!
//! The channel speaks JSON text frames tagged by a `type` field. Client
//! frames authenticate and manage subscriptions; the server answers with
//! auth status, subscription notifications and keepalive pings.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use voltek_types::{Item, ItemId};

/// Frames sent by this client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ClientFrame {
    /// Presents the access token. Must be the first frame on the socket.
    Auth { access_token: String },

    /// Asks for change notifications on one collection.
    Subscribe {
        collection: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        query: Option<Value>,
    },

    /// Stops notifications for one collection.
    Unsubscribe { collection: String },

    /// Keepalive answer to a server ping.
    Pong,
}

impl ClientFrame {
    /// Plain subscribe frame without a query.
    #[must_use]
    pub fn subscribe(collection: impl Into<String>) -> Self {
        Self::Subscribe {
            collection: collection.into(),
            query: None,
        }
    }
}

/// Frames pushed by the server.
///
/// Unknown frame types decode as [`ServerFrame::Other`] so protocol
/// additions on the server side do not kill the session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ServerFrame {
    /// Handshake answer. `status` is `"ok"` on success.
    Auth { status: String },

    /// A change notification for a subscribed collection.
    ///
    /// `event` is a wire name mapped through `ChangeKind::from_wire`; the
    /// server also sends `init` here to confirm a subscription, which
    /// carries no item change.
    Subscription {
        event: String,
        collection: String,
        #[serde(default)]
        data: Vec<Value>,
    },

    /// Keepalive probe; answer with [`ClientFrame::Pong`].
    Ping,

    #[serde(other)]
    Other,
}

/// One entry of a subscription frame's `data` array.
///
/// Create and update notifications carry full records; delete notifications
/// carry bare ids, since the record is gone by the time the frame is sent.
#[derive(Debug, Clone, PartialEq)]
pub enum DataEntry {
    Record(ItemId, Item),
    Id(ItemId),
}

impl DataEntry {
    /// Classifies one raw data value. Returns `None` for entries carrying
    /// neither an id nor an identifiable record.
    #[must_use]
    pub fn from_value(value: Value) -> Option<Self> {
        if let Some(id) = ItemId::from_value(&value) {
            return Some(Self::Id(id));
        }
        let item = Item::from_value(value)?;
        let id = item.id()?;
        Some(Self::Record(id, item))
    }
}
