use crate::WorkerId;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Why a worker reported a task as failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FailureKind {
    /// The handler returned an error
    Execution,
    /// The handler exceeded the task timeout
    Timeout,
    /// The handler panicked
    Panic,
    /// The task was cancelled while running
    Cancelled,
}

impl FailureKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            FailureKind::Execution => "execution",
            FailureKind::Timeout => "timeout",
            FailureKind::Panic => "panic",
            FailureKind::Cancelled => "cancelled",
        }
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TaskError {
    #[error("Pool shut down")]
    ShutDown,

    #[error("Payload size exceeds maximum allowed size of {max} bytes (got {actual})")]
    PayloadTooLarge { max: usize, actual: usize },

    #[error("Task execution failed: {0}")]
    Execution(String),

    #[error("Timeout exceeded")]
    Timeout,

    #[error("Task panicked: {0}")]
    Panicked(String),

    #[error("Task cancelled")]
    Cancelled,

    #[error("Worker {worker_id} crashed while running the task")]
    WorkerCrashed { worker_id: WorkerId },

    #[error("No workers left in the pool")]
    NoWorkers,

    #[error("Invalid state: expected {expected}, got {actual}")]
    InvalidState { expected: String, actual: String },

    #[error("Failed to spawn worker: {0}")]
    Spawn(String),
}

impl TaskError {
    /// Map a failure reported by a worker onto the error the caller sees.
    pub fn from_failure(kind: FailureKind, message: String) -> Self {
        match kind {
            FailureKind::Execution => TaskError::Execution(message),
            FailureKind::Timeout => TaskError::Timeout,
            FailureKind::Panic => TaskError::Panicked(message),
            FailureKind::Cancelled => TaskError::Cancelled,
        }
    }

    /// Short label used for metrics and logs.
    pub fn label(&self) -> &'static str {
        match self {
            TaskError::ShutDown => "shut_down",
            TaskError::PayloadTooLarge { .. } => "payload_too_large",
            TaskError::Execution(_) => "execution",
            TaskError::Timeout => "timeout",
            TaskError::Panicked(_) => "panic",
            TaskError::Cancelled => "cancelled",
            TaskError::WorkerCrashed { .. } => "worker_crashed",
            TaskError::NoWorkers => "no_workers",
            TaskError::InvalidState { .. } => "invalid_state",
            TaskError::Spawn(_) => "spawn",
        }
    }
}

pub type Result<T> = std::result::Result<T, TaskError>;
