use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use tracing::info;
use uuid::Uuid;

use influmatch_backend::{ChatBackend, LocalBackend};
use influmatch_db::Database;
use influmatch_session::SessionHandle;
use influmatch_types::Role;

/// Walks two sessions through the whole messaging flow against one local
/// store: first contact, unread badges, the read sweep, and the block gate.
#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env if present
    let _ = dotenvy::dotenv();

    // Init logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "influmatch=debug".into()),
        )
        .init();

    // Config
    let db = match std::env::var("INFLUMATCH_DB_PATH") {
        Ok(path) => Database::open(&PathBuf::from(path))?,
        Err(_) => Database::open_in_memory()?,
    };

    let backend = Arc::new(LocalBackend::new(db));

    let ava = Uuid::new_v4();
    let nova = Uuid::new_v4();
    backend.register_user(ava, Role::Influencer, false).await?;
    backend.register_user(nova, Role::Brand, true).await?;
    info!(influencer = %ava, brand = %nova, "seeded marketplace users");

    let ava_session = SessionHandle::spawn(backend.clone(), ava, Role::Influencer);
    let nova_session = SessionHandle::spawn(backend.clone(), nova, Role::Brand);

    // First contact: the brand reaches out, which creates the pair's room.
    nova_session.load_conversations().await?;
    nova_session.open(ava).await?;
    nova_session
        .send("Hi Ava, loved your latest reel. Interested in a collab?")
        .await?;
    tokio::time::sleep(Duration::from_millis(100)).await;

    let snap = ava_session.snapshot().await?;
    for entry in &snap.conversations {
        let preview = entry
            .preview
            .as_ref()
            .map(|p| p.content.as_str())
            .unwrap_or("(no messages)");
        info!(
            other = %entry.other_participant,
            unread = entry.unread_count,
            preview,
            "conversation"
        );
    }

    // Opening resets the badge and, after the quiet window, receipts the
    // inbound messages.
    ava_session.open(nova).await?;
    ava_session.send("Hey! Sounds fun, what did you have in mind?").await?;
    tokio::time::sleep(Duration::from_millis(700)).await;

    let snap = ava_session.snapshot().await?;
    info!(total_unread = snap.total_unread, gate = ?snap.gate, "after reply");

    // Block and unblock, watching the gate flip on both ends.
    backend.block(ava, nova).await?;
    tokio::time::sleep(Duration::from_millis(100)).await;
    if let Err(e) = nova_session.send("Following up!").await {
        info!("send rejected while blocked: {e}");
    }
    backend.unblock(ava, nova).await?;
    tokio::time::sleep(Duration::from_millis(100)).await;
    nova_session.send("Great, let's set up a call.").await?;
    tokio::time::sleep(Duration::from_millis(100)).await;

    let snap = ava_session.snapshot().await?;
    if let Some(open) = &snap.open {
        info!(room = %open.primary_room_id, "final timeline:");
        for message in &open.messages {
            let who = if message.sender_id == ava { "ava" } else { "nova" };
            info!("  [{who}] {}", message.content);
        }
    }

    ava_session.shutdown();
    nova_session.shutdown();
    Ok(())
}
