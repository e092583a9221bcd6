//! Error types shared by the backend adapters and the session.

use thiserror::Error;

/// Failure reported by a backend collaborator (query API or realtime service).
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BackendError {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("uniqueness violation: {0}")]
    UniquenessViolation(String),

    #[error("backend unavailable: {0}")]
    Transient(String),

    #[error("malformed data: {0}")]
    Malformed(String),
}

impl From<reqwest::Error> for BackendError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_decode() {
            Self::Malformed(err.to_string())
        } else {
            Self::Transient(err.to_string())
        }
    }
}

impl From<tokio_tungstenite::tungstenite::Error> for BackendError {
    fn from(err: tokio_tungstenite::tungstenite::Error) -> Self {
        Self::Transient(err.to_string())
    }
}

impl From<serde_json::Error> for BackendError {
    fn from(err: serde_json::Error) -> Self {
        Self::Malformed(err.to_string())
    }
}

/// Typed result of a session operation.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SessionError {
    /// The poll does not exist. Terminal for the session.
    #[error("poll not found: {0}")]
    NotFound(String),

    /// Network or backend unavailable. Not retried by the session.
    #[error("transient failure: {0}")]
    Transient(String),

    /// The backend refused the vote because this voter already voted.
    #[error("already voted on this poll")]
    AlreadyVoted,

    /// A caller-side precondition failed before any network call.
    #[error("validation error: {0}")]
    Validation(String),

    /// The backend returned data that does not describe a valid poll. Terminal.
    #[error("malformed data: {0}")]
    Malformed(String),
}

impl SessionError {
    /// Whether the session can no longer make progress after this error.
    #[must_use]
    pub const fn is_terminal(&self) -> bool {
        matches!(self, Self::NotFound(_) | Self::Malformed(_))
    }
}

impl From<BackendError> for SessionError {
    fn from(err: BackendError) -> Self {
        match err {
            BackendError::NotFound(what) => Self::NotFound(what),
            BackendError::UniquenessViolation(_) => Self::AlreadyVoted,
            BackendError::Transient(msg) => Self::Transient(msg),
            BackendError::Malformed(msg) => Self::Malformed(msg),
        }
    }
}

/// Failure of the local key-value store.
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("storage io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("storage file is corrupt: {0}")]
    Corrupt(#[from] serde_json::Error),
}
