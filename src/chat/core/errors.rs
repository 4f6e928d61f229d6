//! Error types for the chat subsystem.

use thiserror::Error;

/// Coarse error taxonomy surfaced to clients.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ErrorKind {
    /// Referenced session or resource does not exist.
    NotFound,
    /// Malformed input to a lifecycle operation.
    Validation,
    /// Actor is not permitted to perform the operation.
    Authorization,
    /// Underlying store failure.
    Persistence,
}

/// Chat subsystem error type.
#[derive(Debug, Error)]
pub enum ChatError {
    /// A referenced entity does not exist.
    #[error("{entity} not found: {id}")]
    NotFound {
        /// Kind of entity that was looked up.
        entity: &'static str,
        /// Identifier that was looked up.
        id: String,
    },
    /// Malformed input or a forbidden state transition.
    #[error("validation failed: {0}")]
    Validation(String),
    /// Actor lacks permission.
    #[error("not authorized: {0}")]
    Authorization(String),
    /// Bearer token could not be verified.
    #[error("invalid token: {0}")]
    InvalidToken(String),
    /// Invalid configuration or unsupported values.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
    /// `SQLite` storage error (sync).
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    /// `SQLite` storage error (async).
    #[error("tokio-rusqlite error: {0}")]
    TokioSqlite(#[from] tokio_rusqlite::Error),
    /// Serialization error.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
    /// Stored data could not be decoded.
    #[error("corrupt record: {0}")]
    CorruptRecord(String),
    /// I/O error.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl ChatError {
    /// Shorthand for a missing session.
    #[must_use]
    pub fn session_not_found(id: impl ToString) -> Self {
        Self::NotFound {
            entity: "session",
            id: id.to_string(),
        }
    }

    /// Fold this error onto the client-facing taxonomy.
    #[must_use]
    pub const fn kind(&self) -> ErrorKind {
        match self {
            Self::NotFound { .. } => ErrorKind::NotFound,
            Self::Validation(_) | Self::InvalidConfig(_) => ErrorKind::Validation,
            Self::Authorization(_) | Self::InvalidToken(_) => ErrorKind::Authorization,
            Self::Sqlite(_)
            | Self::TokioSqlite(_)
            | Self::Serialization(_)
            | Self::CorruptRecord(_)
            | Self::Io(_) => ErrorKind::Persistence,
        }
    }

    /// Message shown to the client that triggered the failure.
    ///
    /// Staff see the error itself, except for storage internals; everyone else
    /// gets `fallback`.
    #[must_use]
    pub fn client_message(&self, trusted: bool, fallback: &str) -> String {
        if trusted && self.kind() != ErrorKind::Persistence {
            self.to_string()
        } else {
            fallback.to_string()
        }
    }
}

/// Convenience result alias for chat operations.
pub type ChatResult<T> = Result<T, ChatError>;
