//! Starting workers and connecting them to the pool's event loop.

use std::path::PathBuf;
use std::process::Stdio;
use tokio::process::Command;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};
use workpool_core::{FailureKind, TaskError, WorkerId};
use workpool_protocol::{ErrorMessage, Message, ProtocolError};
use workpool_worker::{ChannelTransport, FramedTransport, TaskHandlerRegistry, Transport, Worker};

/// What a worker's driver reports to the event loop
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WorkerEvent {
    /// A message the worker sent
    Message(WorkerId, Message),
    /// The worker is gone (exit, crash or closed connection)
    Exited(WorkerId),
}

/// The pool's end of a worker
pub struct WorkerHandle {
    inbox: mpsc::UnboundedSender<Message>,
    driver: Option<JoinHandle<()>>,
}

impl WorkerHandle {
    pub fn new(inbox: mpsc::UnboundedSender<Message>, driver: JoinHandle<()>) -> Self {
        WorkerHandle {
            inbox,
            driver: Some(driver),
        }
    }

    /// Handle without a driver task; whoever holds the receiver plays the worker
    pub fn detached(inbox: mpsc::UnboundedSender<Message>) -> Self {
        WorkerHandle {
            inbox,
            driver: None,
        }
    }

    /// Queue a message for the worker; false if it is unreachable
    pub fn send(&self, message: Message) -> bool {
        self.inbox.send(message).is_ok()
    }

    /// Ask the worker to exit and stop driving it
    pub fn terminate(&mut self) {
        let _ = self.inbox.send(Message::Shutdown);
        if let Some(driver) = self.driver.take() {
            driver.abort();
        }
    }
}

/// Starts workers for a pool
pub trait WorkerSpawner: Send + Sync {
    /// Start worker `worker_id`, reporting its traffic on `events`.
    ///
    /// Must be called from within a tokio runtime.
    fn spawn(
        &self,
        worker_id: WorkerId,
        events: mpsc::UnboundedSender<WorkerEvent>,
    ) -> Result<WorkerHandle, TaskError>;
}

/// Pump messages between the pool and one worker until either side goes away
async fn drive<T: Transport>(
    worker_id: WorkerId,
    mut transport: T,
    mut inbox: mpsc::UnboundedReceiver<Message>,
    events: mpsc::UnboundedSender<WorkerEvent>,
) {
    loop {
        tokio::select! {
            outgoing = inbox.recv() => match outgoing {
                Some(message) => {
                    let task_id = message.task_id();
                    match transport.send(message).await {
                        Ok(()) => {}
                        // Rejected before any byte was written; the link is intact
                        Err(ProtocolError::MessageTooLarge(size)) => {
                            warn!("Message for worker {} too large to frame ({} bytes)", worker_id, size);
                            if let Some(task_id) = task_id {
                                let rejected = Message::Error(ErrorMessage {
                                    task_id,
                                    kind: FailureKind::Execution,
                                    message: format!("Task too large to send to worker: {} bytes", size),
                                });
                                if events.send(WorkerEvent::Message(worker_id, rejected)).is_err() {
                                    break;
                                }
                            }
                        }
                        Err(e) => {
                            warn!("Failed to send to worker {}: {}", worker_id, e);
                            break;
                        }
                    }
                }
                None => break,
            },
            incoming = transport.recv() => match incoming {
                Some(Ok(message)) => {
                    if events.send(WorkerEvent::Message(worker_id, message)).is_err() {
                        break;
                    }
                }
                Some(Err(e)) => {
                    error!("Protocol error from worker {}: {}", worker_id, e);
                    break;
                }
                None => {
                    debug!("Worker {} closed its connection", worker_id);
                    break;
                }
            },
        }
    }

    let _ = events.send(WorkerEvent::Exited(worker_id));
}

/// Runs each worker as a tokio task in this process
#[derive(Clone)]
pub struct InProcessSpawner {
    registry: TaskHandlerRegistry,
}

impl InProcessSpawner {
    pub fn new(registry: TaskHandlerRegistry) -> Self {
        InProcessSpawner { registry }
    }
}

impl WorkerSpawner for InProcessSpawner {
    fn spawn(
        &self,
        worker_id: WorkerId,
        events: mpsc::UnboundedSender<WorkerEvent>,
    ) -> Result<WorkerHandle, TaskError> {
        let (worker_end, pool_end) = ChannelTransport::pair();
        let worker = Worker::new(self.registry.clone());

        tokio::spawn(async move {
            if let Err(e) = worker.serve(worker_end).await {
                error!("Worker {} stopped with error: {}", worker_id, e);
            }
        });

        let (inbox_tx, inbox_rx) = mpsc::unbounded_channel();
        let driver = tokio::spawn(drive(worker_id, pool_end, inbox_rx, events));

        debug!("Spawned in-process worker {}", worker_id);
        Ok(WorkerHandle::new(inbox_tx, driver))
    }
}

/// Runs each worker as a child process speaking the framed protocol on stdio
#[derive(Debug, Clone)]
pub struct ProcessSpawner {
    program: PathBuf,
    args: Vec<String>,
}

impl ProcessSpawner {
    pub fn new(program: impl Into<PathBuf>, args: Vec<String>) -> Self {
        ProcessSpawner {
            program: program.into(),
            args,
        }
    }

    /// Re-run the current executable with `args` (e.g. `["worker"]`)
    pub fn current_exe(args: Vec<String>) -> std::io::Result<Self> {
        Ok(ProcessSpawner::new(std::env::current_exe()?, args))
    }
}

impl WorkerSpawner for ProcessSpawner {
    fn spawn(
        &self,
        worker_id: WorkerId,
        events: mpsc::UnboundedSender<WorkerEvent>,
    ) -> Result<WorkerHandle, TaskError> {
        let mut child = Command::new(&self.program)
            .args(&self.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| TaskError::Spawn(format!("{}: {}", self.program.display(), e)))?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| TaskError::Spawn("child stdin unavailable".to_string()))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| TaskError::Spawn("child stdout unavailable".to_string()))?;

        info!(
            "Spawned worker {} as process {}",
            worker_id,
            child.id().unwrap_or_default()
        );

        let (inbox_tx, inbox_rx) = mpsc::unbounded_channel();
        let driver = tokio::spawn(async move {
            drive(worker_id, FramedTransport::new(stdout, stdin), inbox_rx, events).await;

            // Reap the child; it is killed if still running
            let _ = child.start_kill();
            match child.wait().await {
                Ok(status) => debug!("Worker {} process exited: {}", worker_id, status),
                Err(e) => warn!("Failed to reap worker {}: {}", worker_id, e),
            }
        });

        Ok(WorkerHandle::new(inbox_tx, driver))
    }
}
