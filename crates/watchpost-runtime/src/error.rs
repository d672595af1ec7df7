use std::time::Duration;

use thiserror::Error;
use watchpost_core::WatchpostError;

/// Failure of a source, classifier or publisher call.
#[derive(Debug, Error)]
pub enum CollaboratorError {
    #[error("unavailable: {0}")]
    Unavailable(String),

    #[error("timed out after {0:?}")]
    Timeout(Duration),

    #[error("invalid response: {0}")]
    InvalidResponse(String),

    #[error("rejected with status {status}: {body}")]
    Rejected { status: u16, body: String },

    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

pub type CollabResult<T> = std::result::Result<T, CollaboratorError>;

/// Failure that aborts a whole job run.
#[derive(Debug, Error)]
pub enum JobError {
    #[error("source unavailable: {0}")]
    SourceUnavailable(#[source] CollaboratorError),

    #[error(transparent)]
    Store(#[from] WatchpostError),
}

#[derive(Debug, Error)]
pub enum SchedulerError {
    #[error("scheduler already started; register jobs before start()")]
    AlreadyStarted,

    #[error("job '{0}' is already registered")]
    DuplicateJob(String),

    #[error("job '{0}' has a zero interval")]
    ZeroInterval(String),

    #[error("no job named '{0}'")]
    UnknownJob(String),
}
