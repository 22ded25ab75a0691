use std::collections::HashSet;
use std::sync::Arc;

use anyhow::{Context, anyhow};
use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use tokio::sync::broadcast;
use tracing::debug;
use uuid::Uuid;

use influmatch_db::Database;
use influmatch_db::models::{MessageRow, RoomRow};
use influmatch_types::{BlockStatus, FeedEvent, Message, ReadReceipt, Role, Room};

use crate::error::BackendError;
use crate::feed::ChangeFeed;
use crate::ChatBackend;

/// In-process backend over SQLite. Assigns server-side ids and timestamps,
/// enforces room membership, brand verification, and the bidirectional block
/// invariant on insert, and publishes feed events after each successful write.
#[derive(Clone)]
pub struct LocalBackend {
    db: Arc<Database>,
    feed: ChangeFeed,
}

impl LocalBackend {
    pub fn new(db: Database) -> Self {
        Self {
            db: Arc::new(db),
            feed: ChangeFeed::default(),
        }
    }

    /// Register a participant. Part of the external user directory in the real
    /// deployment; exposed here so tests and the demo can seed users.
    pub async fn register_user(
        &self,
        id: Uuid,
        role: Role,
        verified: bool,
    ) -> Result<(), BackendError> {
        self.blocking(move |db| db.create_user(&id.to_string(), role_str(role), verified))
            .await
    }

    /// Run a blocking DB call off the async runtime.
    async fn blocking<T, F>(&self, f: F) -> Result<T, BackendError>
    where
        F: FnOnce(&Database) -> anyhow::Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let db = self.db.clone();
        tokio::task::spawn_blocking(move || f(&db))
            .await
            .map_err(|e| BackendError::Unavailable(format!("blocking task failed: {e}")))?
            .map_err(BackendError::from)
    }
}

#[async_trait]
impl ChatBackend for LocalBackend {
    async fn rooms_for_participant(&self, user_id: Uuid) -> Result<Vec<Room>, BackendError> {
        let rows = self
            .blocking(move |db| db.rooms_for_participant(&user_id.to_string()))
            .await?;
        rows.iter().map(room_from_row).collect::<anyhow::Result<Vec<_>>>().map_err(Into::into)
    }

    async fn room_for_pair(&self, a: Uuid, b: Uuid) -> Result<Option<Room>, BackendError> {
        let row = self
            .blocking(move |db| db.room_for_pair(&a.to_string(), &b.to_string()))
            .await?;
        match row {
            Some(row) => Ok(Some(room_from_row(&row)?)),
            None => Ok(None),
        }
    }

    async fn create_room(
        &self,
        brand_id: Uuid,
        influencer_id: Uuid,
    ) -> Result<Room, BackendError> {
        let room = Room {
            id: Uuid::new_v4(),
            brand_id,
            influencer_id,
            created_at: Utc::now(),
        };

        let stored = room.clone();
        self.blocking(move |db| {
            db.insert_room(
                &stored.id.to_string(),
                &stored.brand_id.to_string(),
                &stored.influencer_id.to_string(),
                &format_ts(stored.created_at),
            )
        })
        .await?;

        debug!(room_id = %room.id, "room created");
        Ok(room)
    }

    async fn messages_in_rooms(&self, room_ids: &[Uuid]) -> Result<Vec<Message>, BackendError> {
        let ids: Vec<String> = room_ids.iter().map(Uuid::to_string).collect();
        let rows = self.blocking(move |db| db.messages_in_rooms(&ids)).await?;
        rows.iter()
            .map(message_from_row)
            .collect::<anyhow::Result<Vec<_>>>()
            .map_err(Into::into)
    }

    async fn insert_message(
        &self,
        room_id: Uuid,
        sender_id: Uuid,
        content: &str,
    ) -> Result<Message, BackendError> {
        let content = content.trim();
        if content.is_empty() {
            return Err(BackendError::EmptyContent);
        }

        let room = self
            .room_by_id(room_id)
            .await?
            .ok_or(BackendError::NotFound("room"))?;

        // Membership and counterpart checks mirror the server-side send path.
        if room.brand_id != sender_id && room.influencer_id != sender_id {
            return Err(BackendError::Unauthorized);
        }
        let other_id = room
            .other_participant(sender_id)
            .ok_or(BackendError::NotFound("room counterpart"))?;

        let sid = sender_id.to_string();
        let sender = self
            .blocking(move |db| db.get_user(&sid))
            .await?
            .ok_or(BackendError::NotFound("sender"))?;
        if sender.role == "brand" && !sender.verified {
            return Err(BackendError::BrandUnverified);
        }

        // The backend, not the client gate, is authoritative for blocks.
        let (sid, oid) = (sender_id.to_string(), other_id.to_string());
        let (blocked_by_other, has_blocked) = self
            .blocking(move |db| {
                Ok((db.block_exists(&oid, &sid)?, db.block_exists(&sid, &oid)?))
            })
            .await?;
        if blocked_by_other {
            return Err(BackendError::Blocked { by_other: true });
        }
        if has_blocked {
            return Err(BackendError::Blocked { by_other: false });
        }

        let message = Message {
            id: Uuid::new_v4(),
            room_id,
            sender_id,
            content: content.to_string(),
            created_at: Utc::now(),
        };

        let stored = message.clone();
        self.blocking(move |db| {
            db.insert_message(
                &stored.id.to_string(),
                &stored.room_id.to_string(),
                &stored.sender_id.to_string(),
                &stored.content,
                &format_ts(stored.created_at),
            )
        })
        .await?;

        self.feed.publish(FeedEvent::from(&message));
        Ok(message)
    }

    async fn upsert_read_receipts(&self, receipts: &[ReadReceipt]) -> Result<(), BackendError> {
        let pairs: Vec<(String, String)> = receipts
            .iter()
            .map(|r| (r.message_id.to_string(), r.user_id.to_string()))
            .collect();
        self.blocking(move |db| db.upsert_read_receipts(&pairs)).await
    }

    async fn read_message_ids(
        &self,
        user_id: Uuid,
        message_ids: &[Uuid],
    ) -> Result<HashSet<Uuid>, BackendError> {
        let ids: Vec<String> = message_ids.iter().map(Uuid::to_string).collect();
        let read = self
            .blocking(move |db| db.read_message_ids(&user_id.to_string(), &ids))
            .await?;
        read.iter()
            .map(|id| id.parse::<Uuid>().context("corrupt message id in receipt"))
            .collect::<anyhow::Result<HashSet<_>>>()
            .map_err(Into::into)
    }

    async fn block_status(
        &self,
        self_id: Uuid,
        other_id: Uuid,
    ) -> Result<BlockStatus, BackendError> {
        let (sid, oid) = (self_id.to_string(), other_id.to_string());
        let (blocked, has_blocked) = self
            .blocking(move |db| {
                Ok((db.block_exists(&oid, &sid)?, db.block_exists(&sid, &oid)?))
            })
            .await?;
        Ok(BlockStatus { blocked, has_blocked })
    }

    async fn block(&self, blocker_id: Uuid, blocked_id: Uuid) -> Result<(), BackendError> {
        self.blocking(move |db| db.insert_block(&blocker_id.to_string(), &blocked_id.to_string()))
            .await?;
        self.feed.publish(FeedEvent::BlockChanged {
            blocker_id,
            blocked_id,
            active: true,
        });
        Ok(())
    }

    async fn unblock(&self, blocker_id: Uuid, blocked_id: Uuid) -> Result<(), BackendError> {
        self.blocking(move |db| db.delete_block(&blocker_id.to_string(), &blocked_id.to_string()))
            .await?;
        self.feed.publish(FeedEvent::BlockChanged {
            blocker_id,
            blocked_id,
            active: false,
        });
        Ok(())
    }

    fn subscribe(&self) -> broadcast::Receiver<FeedEvent> {
        self.feed.subscribe()
    }
}

impl LocalBackend {
    async fn room_by_id(&self, room_id: Uuid) -> Result<Option<Room>, BackendError> {
        let row = self
            .blocking(move |db| db.get_room(&room_id.to_string()))
            .await?;
        match row {
            Some(row) => Ok(Some(room_from_row(&row)?)),
            None => Ok(None),
        }
    }
}

fn role_str(role: Role) -> &'static str {
    match role {
        Role::Influencer => "influencer",
        Role::Brand => "brand",
    }
}

fn format_ts(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Micros, true)
}

/// SQLite rows default `created_at` to "YYYY-MM-DD HH:MM:SS" without timezone;
/// rows written by this backend carry RFC 3339. Accept both.
fn parse_ts(raw: &str) -> anyhow::Result<DateTime<Utc>> {
    raw.parse::<DateTime<Utc>>()
        .or_else(|_| {
            chrono::NaiveDateTime::parse_from_str(raw, "%Y-%m-%d %H:%M:%S")
                .map(|ndt| ndt.and_utc())
        })
        .map_err(|e| anyhow!("corrupt timestamp '{raw}': {e}"))
}

fn room_from_row(row: &RoomRow) -> anyhow::Result<Room> {
    Ok(Room {
        id: row.id.parse().context("corrupt room id")?,
        brand_id: row.brand_id.parse().context("corrupt brand id")?,
        influencer_id: row.influencer_id.parse().context("corrupt influencer id")?,
        created_at: parse_ts(&row.created_at)?,
    })
}

fn message_from_row(row: &MessageRow) -> anyhow::Result<Message> {
    Ok(Message {
        id: row.id.parse().context("corrupt message id")?,
        room_id: row.room_id.parse().context("corrupt room id")?,
        sender_id: row.sender_id.parse().context("corrupt sender id")?,
        content: row.content.clone(),
        created_at: parse_ts(&row.created_at)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn backend_with_pair() -> (LocalBackend, Uuid, Uuid) {
        let backend = LocalBackend::new(Database::open_in_memory().unwrap());
        let brand = Uuid::new_v4();
        let influencer = Uuid::new_v4();
        backend.register_user(brand, Role::Brand, true).await.unwrap();
        backend
            .register_user(influencer, Role::Influencer, false)
            .await
            .unwrap();
        (backend, brand, influencer)
    }

    #[tokio::test]
    async fn insert_publishes_feed_event() {
        let (backend, brand, influencer) = backend_with_pair().await;
        let room = backend.create_room(brand, influencer).await.unwrap();

        let mut feed = backend.subscribe();
        let sent = backend
            .insert_message(room.id, brand, "hello")
            .await
            .unwrap();

        match feed.recv().await.unwrap() {
            FeedEvent::MessageInserted { id, room_id, .. } => {
                assert_eq!(id, sent.id);
                assert_eq!(room_id, room.id);
            }
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[tokio::test]
    async fn insert_rejects_blocked_in_both_directions() {
        let (backend, brand, influencer) = backend_with_pair().await;
        let room = backend.create_room(brand, influencer).await.unwrap();

        backend.block(influencer, brand).await.unwrap();
        let err = backend
            .insert_message(room.id, brand, "hi")
            .await
            .unwrap_err();
        assert!(matches!(err, BackendError::Blocked { by_other: true }));

        backend.unblock(influencer, brand).await.unwrap();
        backend.block(brand, influencer).await.unwrap();
        let err = backend
            .insert_message(room.id, brand, "hi")
            .await
            .unwrap_err();
        assert!(matches!(err, BackendError::Blocked { by_other: false }));

        backend.unblock(brand, influencer).await.unwrap();
        assert!(backend.insert_message(room.id, brand, "hi").await.is_ok());
    }

    #[tokio::test]
    async fn insert_rejects_unverified_brand_and_non_member() {
        let backend = LocalBackend::new(Database::open_in_memory().unwrap());
        let brand = Uuid::new_v4();
        let influencer = Uuid::new_v4();
        let outsider = Uuid::new_v4();
        backend.register_user(brand, Role::Brand, false).await.unwrap();
        backend
            .register_user(influencer, Role::Influencer, false)
            .await
            .unwrap();
        backend.register_user(outsider, Role::Brand, true).await.unwrap();

        let room = backend.create_room(brand, influencer).await.unwrap();

        let err = backend
            .insert_message(room.id, brand, "hi")
            .await
            .unwrap_err();
        assert!(matches!(err, BackendError::BrandUnverified));

        let err = backend
            .insert_message(room.id, outsider, "hi")
            .await
            .unwrap_err();
        assert!(matches!(err, BackendError::Unauthorized));

        // Influencers are not gated on verification.
        assert!(
            backend
                .insert_message(room.id, influencer, "hi")
                .await
                .is_ok()
        );
    }

    #[tokio::test]
    async fn block_status_reports_both_directions() {
        let (backend, brand, influencer) = backend_with_pair().await;

        backend.block(brand, influencer).await.unwrap();
        let status = backend.block_status(brand, influencer).await.unwrap();
        assert_eq!(
            status,
            BlockStatus { blocked: false, has_blocked: true }
        );

        let status = backend.block_status(influencer, brand).await.unwrap();
        assert_eq!(
            status,
            BlockStatus { blocked: true, has_blocked: false }
        );
    }

    #[tokio::test]
    async fn receipt_sweep_is_idempotent_at_the_trait_level() {
        let (backend, brand, influencer) = backend_with_pair().await;
        let room = backend.create_room(brand, influencer).await.unwrap();
        let msg = backend
            .insert_message(room.id, brand, "read me")
            .await
            .unwrap();

        let receipts = [ReadReceipt { message_id: msg.id, user_id: influencer }];
        backend.upsert_read_receipts(&receipts).await.unwrap();
        backend.upsert_read_receipts(&receipts).await.unwrap();

        let read = backend
            .read_message_ids(influencer, &[msg.id])
            .await
            .unwrap();
        assert_eq!(read.len(), 1);
        assert!(read.contains(&msg.id));
    }

    #[tokio::test]
    async fn empty_content_is_rejected_without_insert() {
        let (backend, brand, influencer) = backend_with_pair().await;
        let room = backend.create_room(brand, influencer).await.unwrap();

        let err = backend
            .insert_message(room.id, brand, "   ")
            .await
            .unwrap_err();
        assert!(matches!(err, BackendError::EmptyContent));
        assert!(
            backend
                .messages_in_rooms(&[room.id])
                .await
                .unwrap()
                .is_empty()
        );
    }
}
