use std::result;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("no such job")]
    NotFound,
    #[error("permission denied")]
    PermissionDenied,
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
    #[error("job already terminated")]
    AlreadyTerminated,
    #[error("failed to spawn job: {0}")]
    SpawnFailed(String),
    #[error("job is still running")]
    StillRunning,
    #[error("job has attached output readers")]
    ReadersAttached,
    #[error("internal error: {0}")]
    Internal(String),
}

pub type Result<T> = result::Result<T, Error>;
