use crate::{Result, TaskError};
use serde::{Deserialize, Serialize};

/// Opaque worker identity, never reused within a pool
pub type WorkerId = u32;

/// Worker lifecycle.
///
/// `Starting -> Ready <-> Busy`, and any state may move to `Terminated`.
/// Tasks are only dispatched to `Ready` workers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum WorkerState {
    /// Spawned, waiting for the ready handshake
    Starting,
    /// Idle and able to take a task
    Ready,
    /// Running exactly one task
    Busy,
    /// Gone; never leaves this state
    Terminated,
}

impl WorkerState {
    pub fn as_str(&self) -> &'static str {
        match self {
            WorkerState::Starting => "starting",
            WorkerState::Ready => "ready",
            WorkerState::Busy => "busy",
            WorkerState::Terminated => "terminated",
        }
    }

    pub fn can_transition_to(&self, next: WorkerState) -> bool {
        use WorkerState::*;
        matches!(
            (*self, next),
            (Starting, Ready) | (Ready, Busy) | (Busy, Ready) | (Starting | Ready | Busy, Terminated)
        )
    }

    /// Move to `next`, rejecting edges the lifecycle does not allow
    pub fn transition(self, next: WorkerState) -> Result<WorkerState> {
        if !self.can_transition_to(next) {
            return Err(TaskError::InvalidState {
                expected: format!("a state that can become {}", next.as_str()),
                actual: self.as_str().to_string(),
            });
        }
        Ok(next)
    }

    pub fn is_available(&self) -> bool {
        *self == WorkerState::Ready
    }

    pub fn is_alive(&self) -> bool {
        *self != WorkerState::Terminated
    }
}

impl std::fmt::Display for WorkerState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
