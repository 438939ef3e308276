use crate::executor::TaskExecutor;
use crate::handler::TaskHandlerRegistry;
use crate::transport::Transport;

use tracing::{debug, info, warn};
use workpool_core::FailureKind;
use workpool_protocol::{ErrorMessage, Message, ReadyMessage, Result, TaskMessage};

/// What the serve loop does after a task
enum Flow {
    Continue,
    Stop,
}

/// Executes tasks one at a time on behalf of a pool
#[derive(Clone)]
pub struct Worker {
    executor: TaskExecutor,
}

impl Worker {
    pub fn new(registry: TaskHandlerRegistry) -> Self {
        Worker {
            executor: TaskExecutor::new(registry),
        }
    }

    /// Serve the pool on `transport` until it sends `Shutdown` or goes away.
    ///
    /// Announces itself with `Ready`, then answers every `Task` with exactly
    /// one `Result` or `Error`.
    pub async fn serve<T: Transport>(&self, mut transport: T) -> Result<()> {
        let pid = std::process::id();
        transport.send(Message::Ready(ReadyMessage { pid })).await?;
        info!("Worker ready (pid {})", pid);

        loop {
            let message = match transport.recv().await {
                Some(Ok(message)) => message,
                Some(Err(e)) => return Err(e),
                None => {
                    info!("Pool connection closed, worker exiting");
                    return Ok(());
                }
            };

            match message {
                Message::Task(task) => {
                    if let Flow::Stop = self.run_task(task, &mut transport).await? {
                        return Ok(());
                    }
                }
                Message::Cancel(cancel) => {
                    debug!("Ignoring cancel for task {} (not running)", cancel.task_id);
                }
                Message::Shutdown => {
                    info!("Shutdown requested, worker exiting");
                    return Ok(());
                }
                other @ (Message::Ready(_) | Message::Result(_) | Message::Error(_)) => {
                    warn!("Unexpected {:?} message from pool", other.message_type());
                }
            }
        }
    }

    /// Run one task while still listening for `Cancel` and `Shutdown`
    async fn run_task<T: Transport>(&self, task: TaskMessage, transport: &mut T) -> Result<Flow> {
        let task_id = task.task_id;
        info!("Executing task {} (type: {})", task_id, task.task_type);

        let execution = self.executor.execute(&task);
        tokio::pin!(execution);

        let reply = loop {
            tokio::select! {
                outcome = &mut execution => {
                    break outcome.into_message(task_id);
                }
                incoming = transport.recv() => match incoming {
                    Some(Ok(Message::Cancel(cancel))) if cancel.task_id == task_id => {
                        info!("Task {} cancelled", task_id);
                        break Message::Error(ErrorMessage {
                            task_id,
                            kind: FailureKind::Cancelled,
                            message: "Task cancelled".to_string(),
                        });
                    }
                    Some(Ok(Message::Shutdown)) => {
                        info!("Shutdown requested, abandoning task {}", task_id);
                        return Ok(Flow::Stop);
                    }
                    Some(Ok(Message::Task(other))) => {
                        warn!("Received task {} while busy with {}, rejecting", other.task_id, task_id);
                        transport
                            .send(Message::Error(ErrorMessage {
                                task_id: other.task_id,
                                kind: FailureKind::Execution,
                                message: "Worker busy".to_string(),
                            }))
                            .await?;
                    }
                    Some(Ok(other)) => {
                        debug!("Ignoring {:?} message while running task {}", other.message_type(), task_id);
                    }
                    Some(Err(e)) => return Err(e),
                    None => {
                        info!("Pool connection closed while running task {}", task_id);
                        return Ok(Flow::Stop);
                    }
                }
            }
        };

        debug!("Reporting task {}", task_id);
        transport.send(reply).await?;
        Ok(Flow::Continue)
    }
}
