use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

use influmatch_backend::ChatBackend;
use influmatch_types::{FeedEvent, Message, Role};

use crate::conversation::ConversationEntry;
use crate::error::{SendError, SessionError};
use crate::gate::GateState;
use crate::resolver::ResolvedConversation;
use crate::session::{self, ChatSession};

/// Quiet window after the last timeline change before the mark-as-read
/// sweep runs.
const READ_DEBOUNCE: Duration = Duration::from_millis(500);

/// Bound on one conversation history load; a timeout is recoverable, the
/// previous view stays up.
const HISTORY_LOAD_TIMEOUT: Duration = Duration::from_secs(10);

enum Command {
    LoadConversations {
        reply: oneshot::Sender<Result<(), SessionError>>,
    },
    Open {
        other_id: Uuid,
        reply: oneshot::Sender<Result<(), SessionError>>,
    },
    Close {
        reply: oneshot::Sender<()>,
    },
    Send {
        text: String,
        reply: oneshot::Sender<Result<Message, SendError>>,
    },
    Snapshot {
        reply: oneshot::Sender<SessionSnapshot>,
    },
}

/// Completion of a spawned history load, tagged with the selection epoch it
/// belongs to. A stale epoch means the user switched conversations while the
/// load was in flight; the response is discarded.
struct LoadDone {
    epoch: u64,
    result: Result<ResolvedConversation, SessionError>,
    reply: oneshot::Sender<Result<(), SessionError>>,
}

/// Read-only copy of session state for callers outside the actor task.
#[derive(Debug, Clone)]
pub struct SessionSnapshot {
    pub conversations: Vec<ConversationEntry>,
    pub open: Option<OpenSnapshot>,
    pub gate: GateState,
    pub total_unread: u32,
}

#[derive(Debug, Clone)]
pub struct OpenSnapshot {
    pub other_participant: Uuid,
    pub primary_room_id: Uuid,
    pub messages: Vec<Message>,
}

/// Handle to a session actor task. Cheap to clone; the task stops when
/// [`SessionHandle::shutdown`] is called, which also drops the feed
/// subscription.
#[derive(Clone)]
pub struct SessionHandle {
    tx: mpsc::Sender<Command>,
    shutdown: CancellationToken,
}

impl SessionHandle {
    /// Spawn the per-session task: one feed subscription, one command queue,
    /// all session state owned by the task.
    pub fn spawn(backend: Arc<dyn ChatBackend>, self_id: Uuid, self_role: Role) -> Self {
        let (tx, rx) = mpsc::channel(64);
        let shutdown = CancellationToken::new();
        let feed = backend.subscribe();
        let session = ChatSession::new(backend, self_id, self_role);

        let actor = SessionActor {
            session,
            feed,
            cmd_rx: rx,
            shutdown: shutdown.clone(),
            epoch: 0,
            load_token: None,
            read_deadline: None,
        };
        tokio::spawn(actor.run());

        Self { tx, shutdown }
    }

    pub async fn load_conversations(&self) -> Result<(), SessionError> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(Command::LoadConversations { reply })
            .await
            .map_err(|_| SessionError::Closed)?;
        rx.await.map_err(|_| SessionError::Closed)?
    }

    /// Select a conversation. Cancels any history load still in flight for a
    /// previous selection.
    pub async fn open(&self, other_id: Uuid) -> Result<(), SessionError> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(Command::Open { other_id, reply })
            .await
            .map_err(|_| SessionError::Closed)?;
        rx.await.map_err(|_| SessionError::Closed)?
    }

    pub async fn close(&self) -> Result<(), SessionError> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(Command::Close { reply })
            .await
            .map_err(|_| SessionError::Closed)?;
        rx.await.map_err(|_| SessionError::Closed)
    }

    pub async fn send(&self, text: impl Into<String>) -> Result<Message, SessionError> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(Command::Send { text: text.into(), reply })
            .await
            .map_err(|_| SessionError::Closed)?;
        let sent = rx.await.map_err(|_| SessionError::Closed)??;
        Ok(sent)
    }

    pub async fn snapshot(&self) -> Result<SessionSnapshot, SessionError> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(Command::Snapshot { reply })
            .await
            .map_err(|_| SessionError::Closed)?;
        rx.await.map_err(|_| SessionError::Closed)
    }

    /// Tear the session down: the task exits and its subscriptions close.
    pub fn shutdown(&self) {
        self.shutdown.cancel();
    }
}

struct SessionActor {
    session: ChatSession,
    feed: broadcast::Receiver<FeedEvent>,
    cmd_rx: mpsc::Receiver<Command>,
    shutdown: CancellationToken,
    /// Selection epoch; bumped on every Open so stale loads can be told apart.
    epoch: u64,
    /// Cancels the in-flight history load, if any.
    load_token: Option<CancellationToken>,
    read_deadline: Option<Instant>,
}

impl SessionActor {
    async fn run(mut self) {
        let (load_tx, mut load_rx) = mpsc::unbounded_channel::<LoadDone>();
        info!(user_id = %self.session.self_id(), "chat session started");

        loop {
            let read_deadline = self.read_deadline;
            let debounce = async move {
                match read_deadline {
                    Some(deadline) => tokio::time::sleep_until(deadline).await,
                    None => std::future::pending().await,
                }
            };

            tokio::select! {
                _ = self.shutdown.cancelled() => break,

                cmd = self.cmd_rx.recv() => match cmd {
                    Some(cmd) => self.handle_command(cmd, &load_tx).await,
                    None => break,
                },

                event = self.feed.recv() => match event {
                    Ok(event) => {
                        if self.session.apply_feed_event(&event) {
                            self.arm_read_debounce();
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        warn!("feed lagged by {n} events, refreshing room map");
                        self.session.refresh_rooms().await;
                    }
                    Err(broadcast::error::RecvError::Closed) => {
                        warn!("change feed closed, stopping session");
                        break;
                    }
                },

                Some(done) = load_rx.recv() => self.finish_load(done),

                _ = debounce => {
                    self.read_deadline = None;
                    match self.session.mark_read_sweep().await {
                        Ok(0) => {}
                        Ok(n) => debug!("marked {n} messages as read"),
                        Err(e) => warn!("mark-as-read sweep failed: {e}"),
                    }
                }
            }
        }

        if let Some(token) = self.load_token.take() {
            token.cancel();
        }
        info!(user_id = %self.session.self_id(), "chat session stopped");
    }

    async fn handle_command(&mut self, cmd: Command, load_tx: &mpsc::UnboundedSender<LoadDone>) {
        match cmd {
            Command::LoadConversations { reply } => {
                let _ = reply.send(self.session.load_conversations().await);
            }
            Command::Open { other_id, reply } => self.start_load(other_id, reply, load_tx),
            Command::Close { reply } => {
                self.session.close_conversation();
                self.read_deadline = None;
                let _ = reply.send(());
            }
            Command::Send { text, reply } => {
                let result = self.session.send(&text).await;
                if result.is_ok() {
                    self.arm_read_debounce();
                }
                let _ = reply.send(result);
            }
            Command::Snapshot { reply } => {
                let _ = reply.send(self.snapshot());
            }
        }
    }

    /// Spawn the history load for a new selection, cancelling the previous
    /// one. The session keeps serving feed events while the load runs.
    fn start_load(
        &mut self,
        other_id: Uuid,
        reply: oneshot::Sender<Result<(), SessionError>>,
        load_tx: &mpsc::UnboundedSender<LoadDone>,
    ) {
        if let Some(previous) = self.load_token.take() {
            previous.cancel();
        }
        self.epoch += 1;
        let epoch = self.epoch;

        let token = CancellationToken::new();
        self.load_token = Some(token.clone());

        let backend = self.session.backend();
        let self_id = self.session.self_id();
        let self_role = self.session.self_role();
        let load_tx = load_tx.clone();

        tokio::spawn(async move {
            let load = session::prepare_open(backend.as_ref(), self_id, self_role, other_id);
            let result = tokio::select! {
                _ = token.cancelled() => {
                    debug!(%other_id, "history load cancelled by newer selection");
                    let _ = reply.send(Err(SessionError::Superseded));
                    return;
                }
                outcome = tokio::time::timeout(HISTORY_LOAD_TIMEOUT, load) => match outcome {
                    Ok(result) => result,
                    Err(_) => Err(SessionError::LoadTimeout),
                },
            };
            let _ = load_tx.send(LoadDone { epoch, result, reply });
        });
    }

    fn finish_load(&mut self, done: LoadDone) {
        if done.epoch != self.epoch {
            debug!("discarding stale history load (epoch {})", done.epoch);
            let _ = done.reply.send(Err(SessionError::Superseded));
            return;
        }
        self.load_token = None;

        match done.result {
            Ok(prepared) => {
                let has_history = !prepared.timeline.is_empty();
                self.session.install_open(prepared);
                if has_history {
                    self.arm_read_debounce();
                }
                let _ = done.reply.send(Ok(()));
            }
            Err(e) => {
                warn!("history load failed: {e}");
                let _ = done.reply.send(Err(e));
            }
        }
    }

    fn arm_read_debounce(&mut self) {
        self.read_deadline = Some(Instant::now() + READ_DEBOUNCE);
    }

    fn snapshot(&self) -> SessionSnapshot {
        SessionSnapshot {
            conversations: self
                .session
                .conversations()
                .into_iter()
                .cloned()
                .collect(),
            open: self.session.open_conversation_view().map(|open| OpenSnapshot {
                other_participant: open.other_participant,
                primary_room_id: open.primary_room_id,
                messages: open.timeline.messages().to_vec(),
            }),
            gate: self.session.gate().state(),
            total_unread: self.session.total_unread(),
        }
    }
}
