use std::collections::HashSet;

use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::timeline::Timeline;

/// Last-message preview shown in the conversation list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Preview {
    pub content: String,
    pub sender_id: Uuid,
    pub created_at: DateTime<Utc>,
}

/// One row of the conversation list, keyed by the other participant.
/// Derived state only — reconstructed per session, never persisted.
#[derive(Debug, Clone)]
pub struct ConversationEntry {
    pub other_participant: Uuid,
    pub preview: Option<Preview>,
    pub unread_count: u32,
}

impl ConversationEntry {
    pub fn new(other_participant: Uuid) -> Self {
        Self {
            other_participant,
            preview: None,
            unread_count: 0,
        }
    }
}

/// The currently selected conversation: the merged timeline over every room
/// shared with the other participant, plus the room new sends go to.
/// `primary_room_id` is always a member of `active_room_ids`.
#[derive(Debug)]
pub struct OpenConversation {
    pub other_participant: Uuid,
    pub primary_room_id: Uuid,
    pub active_room_ids: HashSet<Uuid>,
    pub timeline: Timeline,
}
