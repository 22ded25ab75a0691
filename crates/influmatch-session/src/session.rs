use std::collections::HashMap;
use std::sync::Arc;

use tracing::{debug, warn};
use uuid::Uuid;

use influmatch_backend::{BackendError, ChatBackend};
use influmatch_types::{FeedEvent, Message, ReadReceipt, Role};

use crate::conversation::{ConversationEntry, OpenConversation, Preview};
use crate::error::{SendError, SessionError};
use crate::gate::SendGate;
use crate::resolver::{self, ResolvedConversation, RoomMap};

/// Per-session chat state: the room attribution map, the conversation list,
/// the open conversation, and the send gate. Owned by exactly one UI
/// session — no globals — and driven either directly (library use) or by the
/// actor task in [`crate::actor`].
pub struct ChatSession {
    backend: Arc<dyn ChatBackend>,
    self_id: Uuid,
    self_role: Role,
    room_map: RoomMap,
    entries: HashMap<Uuid, ConversationEntry>,
    open: Option<OpenConversation>,
    gate: SendGate,
}

impl ChatSession {
    pub fn new(backend: Arc<dyn ChatBackend>, self_id: Uuid, self_role: Role) -> Self {
        Self {
            backend,
            self_id,
            self_role,
            room_map: RoomMap::new(),
            entries: HashMap::new(),
            open: None,
            gate: SendGate::default(),
        }
    }

    pub fn self_id(&self) -> Uuid {
        self.self_id
    }

    pub fn self_role(&self) -> Role {
        self.self_role
    }

    pub fn backend(&self) -> Arc<dyn ChatBackend> {
        self.backend.clone()
    }

    pub fn open_conversation_view(&self) -> Option<&OpenConversation> {
        self.open.as_ref()
    }

    pub fn gate(&self) -> &SendGate {
        &self.gate
    }

    pub fn entry(&self, other_id: Uuid) -> Option<&ConversationEntry> {
        self.entries.get(&other_id)
    }

    /// Conversation list, most recent activity first; never-messaged
    /// conversations trail in stable order.
    pub fn conversations(&self) -> Vec<&ConversationEntry> {
        let mut list: Vec<&ConversationEntry> = self.entries.values().collect();
        list.sort_by(|a, b| {
            let at = a.preview.as_ref().map(|p| p.created_at);
            let bt = b.preview.as_ref().map(|p| p.created_at);
            bt.cmp(&at).then_with(|| a.other_participant.cmp(&b.other_participant))
        });
        list
    }

    /// Unread badge total across all conversations.
    pub fn total_unread(&self) -> u32 {
        self.entries.values().map(|e| e.unread_count).sum()
    }

    /// Rebuild the room attribution map. A fetch failure keeps the cached
    /// map — the conversation list degrades to last known state and the
    /// rebuild is retried on the next trigger.
    pub async fn refresh_rooms(&mut self) {
        match resolver::discover_rooms(self.backend.as_ref(), self.self_id).await {
            Ok(map) => {
                for other_id in map.values() {
                    self.entries
                        .entry(*other_id)
                        .or_insert_with(|| ConversationEntry::new(*other_id));
                }
                self.room_map = map;
            }
            Err(e) => warn!("room discovery failed, keeping cached map: {e}"),
        }
    }

    /// Build the conversation list: previews and unread counts for every
    /// participant the user shares a room with.
    pub async fn load_conversations(&mut self) -> Result<(), SessionError> {
        self.refresh_rooms().await;
        if self.room_map.is_empty() {
            return Ok(());
        }

        let room_ids: Vec<Uuid> = self.room_map.keys().copied().collect();
        let messages = self.backend.messages_in_rooms(&room_ids).await?;

        let inbound_ids: Vec<Uuid> = messages
            .iter()
            .filter(|m| m.sender_id != self.self_id)
            .map(|m| m.id)
            .collect();
        let read_ids = self
            .backend
            .read_message_ids(self.self_id, &inbound_ids)
            .await?;

        for entry in self.entries.values_mut() {
            entry.preview = None;
            entry.unread_count = 0;
        }

        // Ascending scan: the preview naturally ends at the newest message.
        for msg in &messages {
            let Some(other_id) = self.room_map.get(&msg.room_id) else {
                continue;
            };
            let entry = self
                .entries
                .entry(*other_id)
                .or_insert_with(|| ConversationEntry::new(*other_id));
            entry.preview = Some(Preview {
                content: msg.content.clone(),
                sender_id: msg.sender_id,
                created_at: msg.created_at,
            });
            if msg.sender_id != self.self_id && !read_ids.contains(&msg.id) {
                entry.unread_count += 1;
            }
        }

        Ok(())
    }

    /// Open the conversation with `other_id`, creating the first room for the
    /// pair if none exists. Direct-call path; the actor wraps the same steps
    /// with cancellation and a load timeout.
    pub async fn open_conversation(&mut self, other_id: Uuid) -> Result<(), SessionError> {
        let resolved = prepare_open(
            self.backend.as_ref(),
            self.self_id,
            self.self_role,
            other_id,
        )
        .await?;
        self.install_open(resolved);
        Ok(())
    }

    /// Install a resolved conversation: adopt the refreshed room map, zero
    /// the unread badge, sync the gate.
    pub fn install_open(&mut self, resolved: ResolvedConversation) {
        for other_id in resolved.room_map.values() {
            self.entries
                .entry(*other_id)
                .or_insert_with(|| ConversationEntry::new(*other_id));
        }
        self.room_map = resolved.room_map;

        let entry = self
            .entries
            .entry(resolved.other_participant)
            .or_insert_with(|| ConversationEntry::new(resolved.other_participant));
        entry.unread_count = 0;

        self.gate = SendGate::default();
        self.gate.apply_status(resolved.block_status);

        self.open = Some(OpenConversation {
            other_participant: resolved.other_participant,
            primary_room_id: resolved.primary_room_id,
            active_room_ids: resolved.active_room_ids,
            timeline: resolved.timeline,
        });
    }

    pub fn close_conversation(&mut self) {
        self.open = None;
    }

    /// Apply one change-feed event. Returns true when the open timeline
    /// changed (the caller uses this to arm the mark-as-read debounce).
    pub fn apply_feed_event(&mut self, event: &FeedEvent) -> bool {
        match event {
            FeedEvent::MessageInserted {
                id,
                room_id,
                sender_id,
                content,
                created_at,
            } => {
                // Attribution. An unknown room (created moments ago by the
                // counterpart) is dropped here and picked up on the next
                // room-map refresh.
                let Some(other_id) = self.room_map.get(room_id).copied() else {
                    debug!(room_id = %room_id, "feed event for unknown room dropped");
                    return false;
                };

                let in_open_conversation = self
                    .open
                    .as_ref()
                    .is_some_and(|open| open.active_room_ids.contains(room_id));

                let entry = self
                    .entries
                    .entry(other_id)
                    .or_insert_with(|| ConversationEntry::new(other_id));
                entry.preview = Some(Preview {
                    content: content.clone(),
                    sender_id: *sender_id,
                    created_at: *created_at,
                });
                // Unread suppression: messages arriving in a room the user is
                // actively viewing never bump the badge.
                if *sender_id != self.self_id && !in_open_conversation {
                    entry.unread_count += 1;
                }

                let Some(open) = self.open.as_mut() else {
                    return false;
                };
                if open.other_participant != other_id || !open.active_room_ids.contains(room_id)
                {
                    return false;
                }
                open.timeline.insert(Message {
                    id: *id,
                    room_id: *room_id,
                    sender_id: *sender_id,
                    content: content.clone(),
                    created_at: *created_at,
                })
            }
            FeedEvent::BlockChanged {
                blocker_id,
                blocked_id,
                active,
            } => {
                if let Some(open) = &self.open {
                    self.gate.apply_block_event(
                        self.self_id,
                        open.other_participant,
                        *blocker_id,
                        *blocked_id,
                        *active,
                    );
                }
                false
            }
        }
    }

    /// Send to the open conversation's primary room. The gate rejects
    /// locally while blocked; a server-side block rejection re-syncs the
    /// gate and hands the text back. On success the message is merged into
    /// the timeline with the same dedup rule the feed echo goes through.
    pub async fn send(&mut self, text: &str) -> Result<Message, SendError> {
        let Some(open) = self.open.as_ref() else {
            return Err(SendError::NoOpenConversation);
        };
        let primary_room_id = open.primary_room_id;
        let content = self.gate.check(text)?;

        match self
            .backend
            .insert_message(primary_room_id, self.self_id, &content)
            .await
        {
            Ok(msg) => {
                if let Some(open) = self.open.as_mut() {
                    open.timeline.insert(msg.clone());
                }
                Ok(msg)
            }
            Err(BackendError::Blocked { by_other }) => {
                self.gate.apply_server_rejection(by_other);
                Err(SendError::Blocked {
                    by_other,
                    text: content,
                })
            }
            Err(e) => Err(SendError::Backend {
                source: e,
                text: content,
            }),
        }
    }

    /// Debounced mark-as-read sweep: receipt every other-party message in
    /// the open timeline that lacks one. Idempotent — messages already
    /// receipted are skipped, so overlapping sweeps write nothing twice.
    /// Returns the number of receipts written.
    pub async fn mark_read_sweep(&mut self) -> Result<usize, SessionError> {
        let Some(open) = self.open.as_ref() else {
            return Ok(0);
        };

        let inbound_ids: Vec<Uuid> = open
            .timeline
            .messages()
            .iter()
            .filter(|m| m.sender_id != self.self_id)
            .map(|m| m.id)
            .collect();
        if inbound_ids.is_empty() {
            return Ok(0);
        }

        let already_read = self
            .backend
            .read_message_ids(self.self_id, &inbound_ids)
            .await?;
        let receipts: Vec<ReadReceipt> = inbound_ids
            .iter()
            .filter(|id| !already_read.contains(id))
            .map(|id| ReadReceipt {
                message_id: *id,
                user_id: self.self_id,
            })
            .collect();

        if !receipts.is_empty() {
            self.backend.upsert_read_receipts(&receipts).await?;
        }
        Ok(receipts.len())
    }
}

/// Resolve the conversation with `other_id`, creating the pair's first room
/// when none exists. Shared by the direct path and the actor's spawned load.
pub(crate) async fn prepare_open(
    backend: &dyn ChatBackend,
    self_id: Uuid,
    self_role: Role,
    other_id: Uuid,
) -> Result<ResolvedConversation, SessionError> {
    if let Some(resolved) = resolver::resolve_conversation(backend, self_id, other_id).await? {
        return Ok(resolved);
    }

    let room = resolver::find_or_create_room(backend, self_id, self_role, other_id).await?;
    let block_status = backend.block_status(self_id, other_id).await?;

    // Keep attribution for the user's other conversations intact.
    let mut room_map = resolver::discover_rooms(backend, self_id).await?;
    room_map.insert(room.id, other_id);
    Ok(ResolvedConversation {
        other_participant: other_id,
        primary_room_id: room.id,
        active_room_ids: std::iter::once(room.id).collect(),
        timeline: crate::timeline::Timeline::new(),
        block_status,
        room_map,
    })
}
