use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Marketplace role of a participant. Supplied by the external user directory;
/// only used here to assign room slots on creation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Influencer,
    Brand,
}

/// A conversation channel between exactly two participants.
/// More than one room may exist for the same pair; consumers merge them.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Room {
    pub id: Uuid,
    pub brand_id: Uuid,
    pub influencer_id: Uuid,
    pub created_at: DateTime<Utc>,
}

impl Room {
    /// The participant on the other side of this room, relative to `self_id`.
    /// Returns `None` for degenerate rooms: both slots equal, or `self_id`
    /// not a member at all. Callers filter these out rather than crash.
    pub fn other_participant(&self, self_id: Uuid) -> Option<Uuid> {
        let other = if self.brand_id == self_id {
            self.influencer_id
        } else if self.influencer_id == self_id {
            self.brand_id
        } else {
            return None;
        };

        if other == self_id { None } else { Some(other) }
    }
}

/// Immutable once created; `created_at` is assigned by the backend on insert.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub id: Uuid,
    pub room_id: Uuid,
    pub sender_id: Uuid,
    pub content: String,
    pub created_at: DateTime<Utc>,
}

/// Per-(message, user) read marker. Upserts are idempotent; receipts are only
/// ever used to derive unread counts, never read back into a timeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ReadReceipt {
    pub message_id: Uuid,
    pub user_id: Uuid,
}

/// Both directions of the block relationship between the current user and one
/// other participant. `blocked` = they blocked me, `has_blocked` = I blocked them.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockStatus {
    pub blocked: bool,
    pub has_blocked: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn room(brand: Uuid, influencer: Uuid) -> Room {
        Room {
            id: Uuid::new_v4(),
            brand_id: brand,
            influencer_id: influencer,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn other_participant_resolves_both_slots() {
        let brand = Uuid::new_v4();
        let influencer = Uuid::new_v4();
        let r = room(brand, influencer);

        assert_eq!(r.other_participant(brand), Some(influencer));
        assert_eq!(r.other_participant(influencer), Some(brand));
    }

    #[test]
    fn other_participant_rejects_self_room() {
        let me = Uuid::new_v4();
        let r = room(me, me);
        assert_eq!(r.other_participant(me), None);
    }

    #[test]
    fn other_participant_rejects_non_member() {
        let r = room(Uuid::new_v4(), Uuid::new_v4());
        assert_eq!(r.other_participant(Uuid::new_v4()), None);
    }
}
