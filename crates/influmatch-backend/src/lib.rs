//! Abstract boundary to the managed chat backend.
//!
//! The session layer only ever talks to the [`ChatBackend`] trait: point
//! queries and commands against the room/message/receipt/block stores plus a
//! change feed of insert events. [`LocalBackend`] is the in-process
//! implementation over SQLite, used by tests and local deployments.

pub mod error;
pub mod feed;
pub mod local;

pub use error::BackendError;
pub use feed::ChangeFeed;
pub use local::LocalBackend;

use std::collections::HashSet;

use async_trait::async_trait;
use tokio::sync::broadcast;
use uuid::Uuid;

use influmatch_types::{BlockStatus, FeedEvent, Message, ReadReceipt, Room};

#[async_trait]
pub trait ChatBackend: Send + Sync {
    /// Every room where `user_id` fills either participant slot.
    async fn rooms_for_participant(&self, user_id: Uuid) -> Result<Vec<Room>, BackendError>;

    /// Exact-match lookup for the unordered pair; oldest room if several exist.
    async fn room_for_pair(&self, a: Uuid, b: Uuid) -> Result<Option<Room>, BackendError>;

    async fn create_room(&self, brand_id: Uuid, influencer_id: Uuid)
        -> Result<Room, BackendError>;

    /// Merged history across a set of rooms, ordered by creation time ascending.
    async fn messages_in_rooms(&self, room_ids: &[Uuid]) -> Result<Vec<Message>, BackendError>;

    /// Append a message. The backend assigns id and creation time, and is the
    /// source of truth for the block invariant: a concurrent block surfaces
    /// here as [`BackendError::Blocked`] even if the client gate was open.
    async fn insert_message(
        &self,
        room_id: Uuid,
        sender_id: Uuid,
        content: &str,
    ) -> Result<Message, BackendError>;

    /// Idempotent; safe to run repeatedly over overlapping receipt sets.
    async fn upsert_read_receipts(&self, receipts: &[ReadReceipt]) -> Result<(), BackendError>;

    /// Which of `message_ids` already carry a receipt for `user_id`.
    async fn read_message_ids(
        &self,
        user_id: Uuid,
        message_ids: &[Uuid],
    ) -> Result<HashSet<Uuid>, BackendError>;

    async fn block_status(&self, self_id: Uuid, other_id: Uuid)
        -> Result<BlockStatus, BackendError>;

    async fn block(&self, blocker_id: Uuid, blocked_id: Uuid) -> Result<(), BackendError>;

    async fn unblock(&self, blocker_id: Uuid, blocked_id: Uuid) -> Result<(), BackendError>;

    /// Subscribe to the change feed of insert/block events.
    fn subscribe(&self) -> broadcast::Receiver<FeedEvent>;
}
