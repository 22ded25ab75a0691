use influmatch_backend::BackendError;
use thiserror::Error;

/// Send failures always carry the typed text back to the caller so the
/// composer can restore it — a rejected send never loses the message.
#[derive(Debug, Error)]
pub enum SendError {
    #[error("message content is empty")]
    Empty,

    #[error("{}", if *by_other { "this participant has blocked you" } else { "you have blocked this participant" })]
    Blocked { by_other: bool, text: String },

    #[error("send failed: {source}")]
    Backend {
        #[source]
        source: BackendError,
        text: String,
    },

    #[error("no conversation is open")]
    NoOpenConversation,
}

impl SendError {
    /// The rejected message text, when one was preserved.
    pub fn text(&self) -> Option<&str> {
        match self {
            Self::Blocked { text, .. } | Self::Backend { text, .. } => Some(text),
            _ => None,
        }
    }
}

#[derive(Debug, Error)]
pub enum SessionError {
    #[error(transparent)]
    Backend(#[from] BackendError),

    #[error(transparent)]
    Send(#[from] SendError),

    #[error("history load timed out")]
    LoadTimeout,

    #[error("selection changed while loading; response discarded")]
    Superseded,

    #[error("session task is gone")]
    Closed,
}
