//! Task execution with timeout enforcement and panic capture.

use crate::handler::{TaskHandler, TaskHandlerRegistry};
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tracing::{debug, error, warn};
use workpool_core::FailureKind;
use workpool_protocol::{ErrorMessage, Message, ResultMessage, TaskMessage};

/// Result of task execution.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExecutionOutcome {
    /// Task completed successfully
    Success { output: Vec<u8> },
    /// Task returned an error (or had no handler)
    Error { message: String },
    /// Task execution timed out
    Timeout,
    /// Task panicked
    Panic { message: String },
}

impl ExecutionOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, ExecutionOutcome::Success { .. })
    }

    /// Turn the outcome into the reply for task `task_id`
    pub fn into_message(self, task_id: u64) -> Message {
        let (kind, message) = match self {
            ExecutionOutcome::Success { output } => {
                return Message::Result(ResultMessage { task_id, output });
            }
            ExecutionOutcome::Error { message } => (FailureKind::Execution, message),
            ExecutionOutcome::Timeout => {
                (FailureKind::Timeout, "Task execution timed out".to_string())
            }
            ExecutionOutcome::Panic { message } => (FailureKind::Panic, message),
        };
        Message::Error(ErrorMessage {
            task_id,
            kind,
            message,
        })
    }
}

/// Aborts the spawned handler when the execution future is dropped
/// (timeout or cancellation).
struct AbortOnDrop<T>(JoinHandle<T>);

impl<T> Drop for AbortOnDrop<T> {
    fn drop(&mut self) {
        self.0.abort();
    }
}

/// Runs handlers from a registry
#[derive(Clone)]
pub struct TaskExecutor {
    handlers: TaskHandlerRegistry,
}

impl TaskExecutor {
    pub fn new(handlers: TaskHandlerRegistry) -> Self {
        TaskExecutor { handlers }
    }

    /// Execute a task, enforcing its timeout if it has one
    pub async fn execute(&self, task: &TaskMessage) -> ExecutionOutcome {
        let handler = match self.handlers.get(&task.task_type) {
            Some(h) => h,
            None => {
                error!("No handler registered for task type: {}", task.task_type);
                return ExecutionOutcome::Error {
                    message: format!("No handler registered for task type: {}", task.task_type),
                };
            }
        };

        let run = Self::execute_handler(handler, task.payload.clone());

        match task.timeout() {
            Some(limit) => match timeout(limit, run).await {
                Ok(outcome) => outcome,
                Err(_) => {
                    warn!("Task {} timed out after {:?}", task.task_id, limit);
                    ExecutionOutcome::Timeout
                }
            },
            None => run.await,
        }
    }

    /// Execute a handler in a separate task for panic isolation.
    async fn execute_handler(handler: Arc<dyn TaskHandler>, payload: Vec<u8>) -> ExecutionOutcome {
        let mut guard = AbortOnDrop(tokio::spawn(async move { handler.execute(payload).await }));

        match (&mut guard.0).await {
            Ok(Ok(output)) => ExecutionOutcome::Success { output },
            Ok(Err(message)) => ExecutionOutcome::Error { message },
            Err(join_error) if join_error.is_panic() => {
                let panic = join_error.into_panic();
                let message = panic
                    .downcast_ref::<String>()
                    .cloned()
                    .or_else(|| panic.downcast_ref::<&str>().map(|s| s.to_string()))
                    .unwrap_or_else(|| "Unknown panic".to_string());
                error!("Handler panicked: {}", message);
                ExecutionOutcome::Panic { message }
            }
            Err(_) => {
                debug!("Handler task was cancelled");
                ExecutionOutcome::Error {
                    message: "Task was cancelled".to_string(),
                }
            }
        }
    }
}
