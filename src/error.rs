use thiserror::Error;

use crate::session::ResultCode;

pub type Result<T> = std::result::Result<T, NoteError>;

/// Everything that can go wrong between the view-model and the index.
#[derive(Debug, Error)]
pub enum NoteError {
    /// Opening the session or registering the schema failed. Every
    /// operation waiting on the manager sees this.
    #[error("index initialization failed: {0}")]
    Initialization(String),

    /// The index rejected a single document in a put/remove batch.
    #[error("index rejected document {id} ({code}): {message}")]
    Operation {
        id: String,
        code: ResultCode,
        message: String,
    },

    #[error("incompatible schema change: {0}")]
    IncompatibleSchema(String),

    #[error("search session is closed")]
    SessionClosed,

    #[error("invalid document: {0}")]
    InvalidDocument(String),

    #[error("storage error: {0}")]
    Storage(#[from] rusqlite::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// A blocking storage task panicked or was cancelled.
    #[error("background task failed: {0}")]
    Task(String),
}

impl From<tokio::task::JoinError> for NoteError {
    fn from(e: tokio::task::JoinError) -> Self {
        NoteError::Task(e.to_string())
    }
}
