pub mod events;
pub mod models;

pub use events::FeedEvent;
pub use models::{BlockStatus, Message, ReadReceipt, Role, Room};
