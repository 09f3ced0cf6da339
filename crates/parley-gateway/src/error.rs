use thiserror::Error;

/// Failure taxonomy shared by every thread operation and the stream path.
///
/// Display strings are safe to show to callers; `Internal` never reveals its cause.
#[derive(Debug, Error)]
pub enum ChatError {
    /// Missing, malformed, expired or badly signed token.
    #[error("Invalid or expired token")]
    Unauthenticated,

    /// Authenticated, but not a participant of the thread.
    #[error("You are not a participant in this thread")]
    PermissionDenied,

    #[error("{0}")]
    NotFound(String),

    #[error("{0}")]
    InvalidArgument(String),

    #[error("{0}")]
    Conflict(String),

    #[error("Internal server error")]
    Internal(#[from] anyhow::Error),
}

pub type Result<T> = std::result::Result<T, ChatError>;

impl ChatError {
    pub fn invalid(message: impl Into<String>) -> Self {
        Self::InvalidArgument(message.into())
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::NotFound(message.into())
    }
}

impl From<tokio::task::JoinError> for ChatError {
    fn from(err: tokio::task::JoinError) -> Self {
        Self::Internal(anyhow::anyhow!("spawn_blocking join error: {}", err))
    }
}
