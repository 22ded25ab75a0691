use std::collections::{HashMap, HashSet};

use tracing::debug;
use uuid::Uuid;

use influmatch_backend::{BackendError, ChatBackend};
use influmatch_types::{BlockStatus, Message, Role, Room};

use crate::timeline::Timeline;

/// Room id → other participant id, for live-event attribution and
/// conversation grouping. Rebuilding is idempotent; last write wins per room.
pub type RoomMap = HashMap<Uuid, Uuid>;

/// Everything needed to install an open conversation: the merged timeline,
/// the room new sends go to, and the refreshed attribution map (room
/// discovery sees every room of the user, so the map comes along for free).
#[derive(Debug)]
pub struct ResolvedConversation {
    pub other_participant: Uuid,
    pub primary_room_id: Uuid,
    pub active_room_ids: HashSet<Uuid>,
    pub timeline: Timeline,
    pub block_status: BlockStatus,
    pub room_map: RoomMap,
}

/// Fetch every room the user participates in and build the attribution map.
/// Degenerate self-rooms (both slots the same user) are filtered, not fatal.
pub async fn discover_rooms(
    backend: &dyn ChatBackend,
    self_id: Uuid,
) -> Result<RoomMap, BackendError> {
    let rooms = backend.rooms_for_participant(self_id).await?;
    Ok(build_room_map(&rooms, self_id))
}

pub fn build_room_map(rooms: &[Room], self_id: Uuid) -> RoomMap {
    let mut map = RoomMap::new();
    for room in rooms {
        match room.other_participant(self_id) {
            Some(other) => {
                map.insert(room.id, other);
            }
            None => debug!(room_id = %room.id, "skipping degenerate room"),
        }
    }
    map
}

/// Pick the room new outgoing messages are appended to.
///
/// With at least one message across the set, continuing the thread wins: the
/// room holding the most recent message. An all-empty pairing falls back to
/// the oldest-created room (first in the set on a created_at tie) so the
/// choice is deterministic. `messages` must be ordered ascending by creation
/// time, the order the message store returns.
pub fn resolve_primary_room(rooms: &[Room], messages: &[Message]) -> Option<Uuid> {
    if let Some(latest) = messages.last() {
        return Some(latest.room_id);
    }
    rooms.iter().min_by_key(|r| r.created_at).map(|r| r.id)
}

/// Resolve the conversation with `other_id`: every shared room merged into
/// one timeline. Returns `None` when no room links the pair yet — the caller
/// creates one via [`find_or_create_room`] before anything can be sent.
pub async fn resolve_conversation(
    backend: &dyn ChatBackend,
    self_id: Uuid,
    other_id: Uuid,
) -> Result<Option<ResolvedConversation>, BackendError> {
    let all_rooms = backend.rooms_for_participant(self_id).await?;
    let room_map = build_room_map(&all_rooms, self_id);

    let pair_rooms: Vec<Room> = all_rooms
        .into_iter()
        .filter(|r| r.other_participant(self_id) == Some(other_id))
        .collect();
    if pair_rooms.is_empty() {
        return Ok(None);
    }

    let active_room_ids: Vec<Uuid> = pair_rooms.iter().map(|r| r.id).collect();
    let messages = backend.messages_in_rooms(&active_room_ids).await?;

    let Some(primary_room_id) = resolve_primary_room(&pair_rooms, &messages) else {
        return Ok(None);
    };
    let block_status = backend.block_status(self_id, other_id).await?;

    Ok(Some(ResolvedConversation {
        other_participant: other_id,
        primary_room_id,
        active_room_ids: active_room_ids.into_iter().collect(),
        timeline: Timeline::from_history(messages),
        block_status,
        room_map,
    }))
}

/// Reuse the existing room for the pair, or create exactly one, assigning the
/// brand/influencer slots from the caller's role. Two clients racing through
/// the miss window can still produce duplicates; the multi-room merge above
/// keeps that survivable.
pub async fn find_or_create_room(
    backend: &dyn ChatBackend,
    self_id: Uuid,
    self_role: Role,
    other_id: Uuid,
) -> Result<Room, BackendError> {
    if let Some(existing) = backend.room_for_pair(self_id, other_id).await? {
        return Ok(existing);
    }

    let (brand_id, influencer_id) = match self_role {
        Role::Brand => (self_id, other_id),
        Role::Influencer => (other_id, self_id),
    };
    backend.create_room(brand_id, influencer_id).await
}
