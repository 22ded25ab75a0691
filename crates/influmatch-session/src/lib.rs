//! Conversation resolution and realtime message sync for the Influmatch
//! marketplace chat.
//!
//! Core pieces:
//! - Conversation Resolver: groups the flat room directory by "other
//!   participant", merges duplicate rooms per pair into one timeline, and
//!   picks the primary room new sends go to
//! - Realtime Sync Controller: applies change-feed inserts to the
//!   conversation list (previews, unread badges) and the open timeline,
//!   deduplicated by id and kept sorted by creation time
//! - Send/Block Gate: local state machine rejecting sends while either
//!   direction of the block relationship is active
//!
//! State is session-scoped: either drive [`ChatSession`] directly, or spawn
//! a [`SessionHandle`] actor that pumps the feed, debounces mark-as-read,
//! and cancels stale history loads.

pub mod actor;
pub mod conversation;
pub mod error;
pub mod gate;
pub mod resolver;
pub mod session;
pub mod timeline;

pub use actor::{OpenSnapshot, SessionHandle, SessionSnapshot};
pub use conversation::{ConversationEntry, OpenConversation, Preview};
pub use error::{SendError, SessionError};
pub use gate::{GateState, SendGate};
pub use resolver::{ResolvedConversation, RoomMap};
pub use session::ChatSession;
pub use timeline::Timeline;
