//! Worker supervision errors.

use digs_types::ErrorCode;
use std::sync::Arc;
use thiserror::Error;

/// Why a worker could not be brought to `Ready`.
///
/// Cloneable so that concurrent callers of
/// [`WorkerSupervisor::start`](super::WorkerSupervisor::start) can all
/// observe the same outcome.
#[derive(Debug, Clone, Error)]
pub enum WorkerError {
    /// The worker process could not be launched.
    #[error("worker '{worker}' could not be started after {attempts} attempt(s): {source}")]
    Fork {
        worker: String,
        attempts: u32,
        #[source]
        source: Arc<std::io::Error>,
    },

    /// The worker started but never became ready.
    #[error("worker '{worker}' did not become ready after {attempts} attempt(s): {reason}")]
    NotReady {
        worker: String,
        attempts: u32,
        reason: String,
    },

    /// `stop` was called before the worker became ready.
    #[error("worker '{worker}' was stopped during start-up (attempt {attempts})")]
    Stopped { worker: String, attempts: u32 },

    /// The operation needs a ready worker.
    #[error("worker '{worker}' is not running")]
    NotRunning { worker: String },
}

impl ErrorCode for WorkerError {
    fn code(&self) -> &'static str {
        match self {
            Self::Fork { .. } => "WORKER_FORK",
            Self::NotReady { .. } => "WORKER_NOT_READY",
            Self::Stopped { .. } => "WORKER_STOPPED",
            Self::NotRunning { .. } => "WORKER_NOT_RUNNING",
        }
    }

    fn is_recoverable(&self) -> bool {
        true
    }
}
