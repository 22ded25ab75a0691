//! End-to-end flows over the session actor: two users sharing one
//! `LocalBackend`, talking through the change feed like two browser tabs
//! against the managed backend.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::broadcast;
use uuid::Uuid;

use influmatch_backend::{BackendError, ChatBackend, LocalBackend};
use influmatch_db::Database;
use influmatch_session::{GateState, SendError, SessionError, SessionHandle, SessionSnapshot};
use influmatch_types::{BlockStatus, FeedEvent, Message, ReadReceipt, Role, Room};

async fn marketplace() -> (Arc<LocalBackend>, Uuid, Uuid) {
    let backend = Arc::new(LocalBackend::new(Database::open_in_memory().unwrap()));
    let influencer = Uuid::new_v4();
    let brand = Uuid::new_v4();
    backend
        .register_user(influencer, Role::Influencer, false)
        .await
        .unwrap();
    backend.register_user(brand, Role::Brand, true).await.unwrap();
    (backend, influencer, brand)
}

/// Poll snapshots until `pred` holds; feed delivery is asynchronous.
async fn wait_for(
    handle: &SessionHandle,
    pred: impl Fn(&SessionSnapshot) -> bool,
) -> SessionSnapshot {
    for _ in 0..200 {
        let snap = handle.snapshot().await.unwrap();
        if pred(&snap) {
            return snap;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("snapshot condition not reached within 2s");
}

/// Delegating backend whose room-directory reads take `delay` to complete,
/// so a history load can be caught mid-flight.
struct SlowDirectoryBackend {
    inner: Arc<LocalBackend>,
    delay: Duration,
}

#[async_trait]
impl ChatBackend for SlowDirectoryBackend {
    async fn rooms_for_participant(&self, user_id: Uuid) -> Result<Vec<Room>, BackendError> {
        tokio::time::sleep(self.delay).await;
        self.inner.rooms_for_participant(user_id).await
    }

    async fn room_for_pair(&self, a: Uuid, b: Uuid) -> Result<Option<Room>, BackendError> {
        self.inner.room_for_pair(a, b).await
    }

    async fn create_room(
        &self,
        brand_id: Uuid,
        influencer_id: Uuid,
    ) -> Result<Room, BackendError> {
        self.inner.create_room(brand_id, influencer_id).await
    }

    async fn messages_in_rooms(&self, room_ids: &[Uuid]) -> Result<Vec<Message>, BackendError> {
        self.inner.messages_in_rooms(room_ids).await
    }

    async fn insert_message(
        &self,
        room_id: Uuid,
        sender_id: Uuid,
        content: &str,
    ) -> Result<Message, BackendError> {
        self.inner.insert_message(room_id, sender_id, content).await
    }

    async fn upsert_read_receipts(&self, receipts: &[ReadReceipt]) -> Result<(), BackendError> {
        self.inner.upsert_read_receipts(receipts).await
    }

    async fn read_message_ids(
        &self,
        user_id: Uuid,
        message_ids: &[Uuid],
    ) -> Result<HashSet<Uuid>, BackendError> {
        self.inner.read_message_ids(user_id, message_ids).await
    }

    async fn block_status(
        &self,
        self_id: Uuid,
        other_id: Uuid,
    ) -> Result<BlockStatus, BackendError> {
        self.inner.block_status(self_id, other_id).await
    }

    async fn block(&self, blocker_id: Uuid, blocked_id: Uuid) -> Result<(), BackendError> {
        self.inner.block(blocker_id, blocked_id).await
    }

    async fn unblock(&self, blocker_id: Uuid, blocked_id: Uuid) -> Result<(), BackendError> {
        self.inner.unblock(blocker_id, blocked_id).await
    }

    fn subscribe(&self) -> broadcast::Receiver<FeedEvent> {
        self.inner.subscribe()
    }
}

#[tokio::test]
async fn first_contact_unread_and_reopen_flow() {
    let (backend, influencer, brand) = marketplace().await;

    let alice = SessionHandle::spawn(backend.clone(), influencer, Role::Influencer);
    let bob = SessionHandle::spawn(backend.clone(), brand, Role::Brand);

    alice.load_conversations().await.unwrap();

    // No room exists yet; opening creates exactly one.
    alice.open(brand).await.unwrap();
    assert_eq!(
        backend.rooms_for_participant(influencer).await.unwrap().len(),
        1
    );

    // Bob opens the same conversation and reuses that room.
    bob.open(influencer).await.unwrap();
    assert_eq!(
        backend.rooms_for_participant(influencer).await.unwrap().len(),
        1
    );

    // Bob says hello while Alice is looking at the conversation: her
    // timeline grows but the unread badge stays at zero.
    let hello = bob.send("Hello").await.unwrap();
    let snap = wait_for(&alice, |s| {
        s.open.as_ref().is_some_and(|o| o.messages.len() == 1)
    })
    .await;
    assert_eq!(snap.open.unwrap().messages[0].content, "Hello");
    let entry = snap
        .conversations
        .iter()
        .find(|c| c.other_participant == brand)
        .unwrap()
        .clone();
    assert_eq!(entry.unread_count, 0);

    // Alice walks away; the next message counts as unread and updates the
    // preview.
    alice.close().await.unwrap();
    let followup = bob.send("Still there?").await.unwrap();
    let snap = wait_for(&alice, |s| {
        s.conversations
            .iter()
            .any(|c| c.other_participant == brand && c.unread_count == 1)
    })
    .await;
    let entry = snap
        .conversations
        .iter()
        .find(|c| c.other_participant == brand)
        .unwrap();
    assert_eq!(
        entry.preview.as_ref().unwrap().content,
        "Still there?"
    );
    assert_eq!(snap.total_unread, 1);

    // Reopening resets the badge and shows both messages in order.
    alice.open(brand).await.unwrap();
    let snap = wait_for(&alice, |s| {
        s.open.as_ref().is_some_and(|o| o.messages.len() == 2)
    })
    .await;
    let open = snap.open.unwrap();
    let contents: Vec<&str> = open.messages.iter().map(|m| m.content.as_str()).collect();
    assert_eq!(contents, vec!["Hello", "Still there?"]);
    assert_eq!(
        snap.conversations
            .iter()
            .find(|c| c.other_participant == brand)
            .unwrap()
            .unread_count,
        0
    );

    // The debounced sweep receipts both of Bob's messages exactly once.
    let inbound = [hello.id, followup.id];
    for _ in 0..200 {
        let read = backend.read_message_ids(influencer, &inbound).await.unwrap();
        if read.len() == 2 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    let read = backend.read_message_ids(influencer, &inbound).await.unwrap();
    assert_eq!(read.len(), 2);

    // Bob's own optimistic copy and its feed echo deduplicated to one entry
    // per message.
    let snap = bob.snapshot().await.unwrap();
    assert_eq!(snap.open.unwrap().messages.len(), 2);

    alice.shutdown();
    bob.shutdown();
}

#[tokio::test]
async fn block_gates_both_sides_until_unblock() {
    let (backend, influencer, brand) = marketplace().await;

    let alice = SessionHandle::spawn(backend.clone(), influencer, Role::Influencer);
    let bob = SessionHandle::spawn(backend.clone(), brand, Role::Brand);

    alice.open(brand).await.unwrap();
    bob.open(influencer).await.unwrap();
    bob.send("Hi!").await.unwrap();

    // Alice blocks Bob; both gates converge via the feed.
    backend.block(influencer, brand).await.unwrap();
    wait_for(&bob, |s| s.gate == GateState::BlockedByOther).await;
    wait_for(&alice, |s| s.gate == GateState::HasBlocked).await;

    // Bob's send is rejected locally, text preserved; nothing reaches the
    // message store.
    match bob.send("Please answer").await {
        Err(SessionError::Send(SendError::Blocked { by_other: true, text })) => {
            assert_eq!(text, "Please answer");
        }
        other => panic!("unexpected: {other:?}"),
    }
    assert!(matches!(
        alice.send("not while blocked").await,
        Err(SessionError::Send(SendError::Blocked { by_other: false, .. }))
    ));
    let room = backend
        .room_for_pair(influencer, brand)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(backend.messages_in_rooms(&[room.id]).await.unwrap().len(), 1);

    // Unblock reopens both gates and sends flow again.
    backend.unblock(influencer, brand).await.unwrap();
    wait_for(&bob, |s| s.gate == GateState::Open).await;
    wait_for(&alice, |s| s.gate == GateState::Open).await;

    bob.send("Thanks!").await.unwrap();
    let snap = wait_for(&alice, |s| {
        s.open.as_ref().is_some_and(|o| o.messages.len() == 2)
    })
    .await;
    assert_eq!(snap.open.unwrap().messages[1].content, "Thanks!");

    alice.shutdown();
    bob.shutdown();
}

#[tokio::test]
async fn rapid_reselection_supersedes_the_older_history_load() {
    let (backend, influencer, brand) = marketplace().await;
    let rival_brand = Uuid::new_v4();
    backend
        .register_user(rival_brand, Role::Brand, true)
        .await
        .unwrap();

    let slow = Arc::new(SlowDirectoryBackend {
        inner: backend,
        delay: Duration::from_millis(300),
    });
    let alice = SessionHandle::spawn(slow, influencer, Role::Influencer);

    // Switch targets while the first history load is still in flight: the
    // older load is cancelled and its caller told so, the newer one installs.
    let (first, second) = tokio::join!(alice.open(brand), alice.open(rival_brand));
    assert!(matches!(first, Err(SessionError::Superseded)));
    second.unwrap();

    let snap = alice.snapshot().await.unwrap();
    assert_eq!(snap.open.unwrap().other_participant, rival_brand);

    alice.shutdown();
}
