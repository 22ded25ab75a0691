use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::Message;

/// Events delivered on the backend change feed.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum FeedEvent {
    /// A new message row was inserted somewhere in the message store.
    MessageInserted {
        id: Uuid,
        room_id: Uuid,
        sender_id: Uuid,
        content: String,
        created_at: DateTime<Utc>,
    },

    /// A block edge was created (`active: true`) or removed (`active: false`).
    BlockChanged {
        blocker_id: Uuid,
        blocked_id: Uuid,
        active: bool,
    },
}

impl FeedEvent {
    /// Returns the room id if this event is scoped to a specific room.
    /// `BlockChanged` is global and returns `None`.
    pub fn room_id(&self) -> Option<Uuid> {
        match self {
            Self::MessageInserted { room_id, .. } => Some(*room_id),
            Self::BlockChanged { .. } => None,
        }
    }
}

impl From<&Message> for FeedEvent {
    fn from(msg: &Message) -> Self {
        Self::MessageInserted {
            id: msg.id,
            room_id: msg.room_id,
            sender_id: msg.sender_id,
            content: msg.content.clone(),
            created_at: msg.created_at,
        }
    }
}
