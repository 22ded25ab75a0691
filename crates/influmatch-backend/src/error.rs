use thiserror::Error;

/// Failure taxonomy at the backend boundary.
///
/// `Unavailable` is transient and retryable; `Unauthorized` aborts the
/// operation; `Blocked` doubles as a state-sync signal for the send gate.
#[derive(Debug, Error)]
pub enum BackendError {
    #[error("backend unavailable: {0}")]
    Unavailable(String),

    #[error("not authorized for this operation")]
    Unauthorized,

    #[error("{}", if *by_other { "this participant has blocked you" } else { "you have blocked this participant" })]
    Blocked { by_other: bool },

    #[error("brand account must be verified before messaging")]
    BrandUnverified,

    #[error("message content is empty")]
    EmptyContent,

    #[error("{0} not found")]
    NotFound(&'static str),

    #[error(transparent)]
    Storage(#[from] anyhow::Error),
}

impl BackendError {
    /// Transient failures may be retried; everything else is surfaced as-is.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Unavailable(_))
    }
}
