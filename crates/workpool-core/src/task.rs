use crate::{Result, TaskError, WorkerId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Sequence id assigned at submission, unique within a pool
pub type TaskId = u64;

/// Task type identifier, used to pick a handler
pub type TaskType = String;

/// Task payload (arbitrary bytes)
pub type TaskPayload = Vec<u8>;

/// Task status inside the pool
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TaskStatus {
    /// Waiting in the pending queue
    Queued,
    /// Handed to exactly one worker
    Dispatched,
    /// Completed with a result
    Succeeded,
    /// Completed with a failure
    Failed,
    /// Completed by cancellation
    Cancelled,
}

impl TaskStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskStatus::Queued => "queued",
            TaskStatus::Dispatched => "dispatched",
            TaskStatus::Succeeded => "succeeded",
            TaskStatus::Failed => "failed",
            TaskStatus::Cancelled => "cancelled",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "queued" => Some(TaskStatus::Queued),
            "dispatched" => Some(TaskStatus::Dispatched),
            "succeeded" => Some(TaskStatus::Succeeded),
            "failed" => Some(TaskStatus::Failed),
            "cancelled" => Some(TaskStatus::Cancelled),
            _ => None,
        }
    }

    /// Completed tasks never change state again
    pub fn is_completed(&self) -> bool {
        matches!(
            self,
            TaskStatus::Succeeded | TaskStatus::Failed | TaskStatus::Cancelled
        )
    }
}

/// What a caller hands to `submit`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskRequest {
    pub task_type: TaskType,
    pub payload: TaskPayload,
    /// Overrides the pool default when set
    pub timeout: Option<Duration>,
}

impl TaskRequest {
    pub fn new(task_type: impl Into<TaskType>, payload: TaskPayload) -> Self {
        TaskRequest {
            task_type: task_type.into(),
            payload,
            timeout: None,
        }
    }

    /// Build a request whose payload is the JSON encoding of `value`
    pub fn json<T: Serialize>(task_type: impl Into<TaskType>, value: &T) -> Result<Self> {
        let payload = serde_json::to_vec(value)
            .map_err(|e| TaskError::Execution(format!("Failed to encode payload: {}", e)))?;
        Ok(TaskRequest::new(task_type, payload))
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Reject payloads above `max` bytes
    pub fn validate(&self, max: usize) -> Result<()> {
        if self.payload.len() > max {
            return Err(TaskError::PayloadTooLarge {
                max,
                actual: self.payload.len(),
            });
        }
        Ok(())
    }
}

/// A submitted task and its bookkeeping
#[derive(Debug, Clone)]
pub struct Task {
    pub id: TaskId,
    pub task_type: TaskType,
    pub payload: TaskPayload,
    pub timeout: Option<Duration>,
    pub status: TaskStatus,
    /// Worker holding the task while dispatched
    pub worker_id: Option<WorkerId>,
    pub submitted_at: DateTime<Utc>,
    pub dispatched_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub error: Option<String>,
}

impl Task {
    pub fn new(id: TaskId, request: TaskRequest) -> Self {
        Task {
            id,
            task_type: request.task_type,
            payload: request.payload,
            timeout: request.timeout,
            status: TaskStatus::Queued,
            worker_id: None,
            submitted_at: Utc::now(),
            dispatched_at: None,
            completed_at: None,
            error: None,
        }
    }

    /// Mark the task as handed to `worker_id`
    pub fn dispatch(&mut self, worker_id: WorkerId) -> Result<()> {
        self.expect_status(TaskStatus::Queued)?;
        self.status = TaskStatus::Dispatched;
        self.worker_id = Some(worker_id);
        self.dispatched_at = Some(Utc::now());
        Ok(())
    }

    /// Mark the task as completed successfully
    pub fn succeed(&mut self) -> Result<()> {
        self.expect_status(TaskStatus::Dispatched)?;
        self.status = TaskStatus::Succeeded;
        self.complete();
        Ok(())
    }

    /// Mark the task as failed (from queued or dispatched)
    pub fn fail(&mut self, error: &TaskError) -> Result<()> {
        self.expect_pending()?;
        self.status = if *error == TaskError::Cancelled {
            TaskStatus::Cancelled
        } else {
            TaskStatus::Failed
        };
        self.error = Some(error.to_string());
        self.complete();
        Ok(())
    }

    /// Time at which a dispatched task is considered lost.
    ///
    /// `None` when the task has no timeout or has not been dispatched.
    pub fn lease_expires_at(&self, grace: Duration) -> Option<DateTime<Utc>> {
        let dispatched_at = self.dispatched_at?;
        let timeout = self.timeout?;
        let lease = chrono::Duration::from_std(timeout + grace).ok()?;
        Some(dispatched_at + lease)
    }

    /// How long the task spent with its worker
    pub fn run_duration(&self) -> Option<Duration> {
        let started = self.dispatched_at?;
        let finished = self.completed_at?;
        (finished - started).to_std().ok()
    }

    fn complete(&mut self) {
        self.worker_id = None;
        self.completed_at = Some(Utc::now());
    }

    fn expect_status(&self, expected: TaskStatus) -> Result<()> {
        if self.status != expected {
            return Err(TaskError::InvalidState {
                expected: expected.as_str().to_string(),
                actual: self.status.as_str().to_string(),
            });
        }
        Ok(())
    }

    fn expect_pending(&self) -> Result<()> {
        if self.status.is_completed() {
            return Err(TaskError::InvalidState {
                expected: "queued or dispatched".to_string(),
                actual: self.status.as_str().to_string(),
            });
        }
        Ok(())
    }
}
