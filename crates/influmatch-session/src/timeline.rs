use std::collections::HashSet;

use influmatch_types::Message;
use uuid::Uuid;

/// Merged message timeline for one conversation.
///
/// Holds the union of messages across the conversation's active rooms,
/// deduplicated by id and kept non-decreasing in `created_at` on every
/// insert. Realtime delivery order is not creation order under concurrent
/// senders, so "append" is really insert-at-sorted-position; equal
/// timestamps keep local arrival order.
#[derive(Debug, Default, Clone)]
pub struct Timeline {
    messages: Vec<Message>,
    ids: HashSet<Uuid>,
}

impl Timeline {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_history(history: Vec<Message>) -> Self {
        let mut timeline = Self::new();
        for msg in history {
            timeline.insert(msg);
        }
        timeline
    }

    /// Insert a message, maintaining both invariants. Returns false for a
    /// duplicate id (the optimistic local copy and the feed echo are the
    /// same logical message).
    pub fn insert(&mut self, msg: Message) -> bool {
        if !self.ids.insert(msg.id) {
            return false;
        }
        let at = self
            .messages
            .partition_point(|m| m.created_at <= msg.created_at);
        self.messages.insert(at, msg);
        true
    }

    pub fn contains(&self, id: Uuid) -> bool {
        self.ids.contains(&id)
    }

    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    pub fn last(&self) -> Option<&Message> {
        self.messages.last()
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }
}
