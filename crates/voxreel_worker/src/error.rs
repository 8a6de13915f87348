use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum SupervisorError {
    #[error("a task is already running")]
    Busy,

    #[error("failed to spawn worker: {0}")]
    Spawn(#[source] std::io::Error),

    #[error("protocol error: {0}")]
    Protocol(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, SupervisorError>;

/// Why a task did not succeed.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
pub enum TaskError {
    /// The worker reported an error.
    #[error("{0}")]
    Failed(String),

    /// The worker exited without sending a terminal message.
    #[error("worker exited without a result (exit code {code:?})")]
    WorkerCrash { code: Option<i32> },

    #[error("task was cancelled")]
    Terminated,
}
