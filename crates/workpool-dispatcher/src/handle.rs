use crate::pool::Command;
use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};
use tokio::sync::{mpsc, oneshot};
use workpool_core::{TaskError, TaskId, TaskPayload};

/// Final result of a submitted task
pub type TaskOutcome = Result<TaskPayload, TaskError>;

/// One-shot handle to a submitted task.
///
/// Resolves exactly once, with the worker's output or the reason the task
/// failed. If the pool goes away without answering, it resolves to
/// [`TaskError::ShutDown`]. A handle does not keep its pool running.
#[must_use = "a task handle does nothing unless awaited or cancelled"]
pub struct TaskHandle {
    task_id: TaskId,
    receiver: oneshot::Receiver<TaskOutcome>,
    commands: mpsc::WeakUnboundedSender<Command>,
}

impl TaskHandle {
    pub(crate) fn new(
        task_id: TaskId,
        receiver: oneshot::Receiver<TaskOutcome>,
        commands: mpsc::WeakUnboundedSender<Command>,
    ) -> Self {
        TaskHandle {
            task_id,
            receiver,
            commands,
        }
    }

    pub fn id(&self) -> TaskId {
        self.task_id
    }

    /// Cancel the task.
    ///
    /// A queued task is dropped without reaching a worker. A running task is
    /// failed with [`TaskError::Cancelled`] right away and its worker is asked
    /// to stop; that part is best effort. No effect once the task completed.
    pub fn cancel(&self) {
        if let Some(commands) = self.commands.upgrade() {
            let _ = commands.send(Command::Cancel(self.task_id));
        }
    }
}

impl Future for TaskHandle {
    type Output = TaskOutcome;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.receiver)
            .poll(cx)
            .map(|received| received.unwrap_or(Err(TaskError::ShutDown)))
    }
}

impl std::fmt::Debug for TaskHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskHandle")
            .field("task_id", &self.task_id)
            .finish()
    }
}
