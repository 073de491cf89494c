use thiserror::Error;
use uuid::Uuid;

#[derive(Error, Debug)]
pub enum CmdqueueError {
    #[error("Invalid command index {index}, catalog has {available} commands")]
    InvalidCommand { index: usize, available: usize },

    #[error("Session is closed")]
    SessionClosed,

    #[error("Session not found: {0}")]
    SessionNotFound(Uuid),

    #[error("Job not found: {0}")]
    JobNotFound(i64),

    #[error("Job {0} has not finished")]
    JobNotFinished(i64),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Failed to spawn process: {0}")]
    Spawn(#[source] std::io::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid catalog file: {0}")]
    Catalog(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, CmdqueueError>;
