//! The worker pool: a cloneable front end over a single event loop.

use crate::config::{PoolConfig, RespawnPolicy, WorkerKind};
use crate::dispatcher::{Dispatcher, PoolStats};
use crate::handle::{TaskHandle, TaskOutcome};
use crate::metrics::PoolMetrics;
use crate::spawner::{InProcessSpawner, ProcessSpawner, WorkerEvent, WorkerSpawner};
use crate::worker_registry::WorkerInfo;
use crate::Result;

use chrono::Utc;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};
use workpool_core::{SharedCounter, Task, TaskError, TaskId, TaskRequest, WorkerId, WorkerState};
use workpool_protocol::Message;
use workpool_worker::TaskHandlerRegistry;

const RUNNING: u8 = 0;
const NO_WORKERS: u8 = 1;
const SHUT_DOWN: u8 = 2;

/// Requests from pool handles to the event loop
pub(crate) enum Command {
    Submit(Task, oneshot::Sender<TaskOutcome>),
    Cancel(TaskId),
    Shutdown(oneshot::Sender<()>),
    Inspect(oneshot::Sender<PoolSnapshot>),
}

/// Pool state as seen by the event loop at one instant
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PoolSnapshot {
    pub stats: PoolStats,
    /// Queued task ids in dispatch order
    pub queued: Vec<TaskId>,
    pub workers: Vec<WorkerInfo>,
}

/// Handle to a running pool of workers.
///
/// Clones share the pool. The pool stops on [`WorkerPool::shutdown`], or once
/// every clone has been dropped; outstanding task handles then resolve to
/// [`TaskError::ShutDown`].
#[derive(Clone)]
pub struct WorkerPool {
    commands: mpsc::UnboundedSender<Command>,
    next_task_id: SharedCounter,
    lifecycle: Arc<AtomicU8>,
    metrics: Arc<PoolMetrics>,
    max_payload: usize,
}

impl WorkerPool {
    /// Spawn `config.size` workers and start the event loop.
    ///
    /// Must be called from within a tokio runtime. If any worker fails to
    /// start, the ones already started are terminated.
    pub fn start(config: PoolConfig, spawner: Arc<dyn WorkerSpawner>) -> Result<Self> {
        config.validate()?;

        let metrics = Arc::new(PoolMetrics::new()?);
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let mut dispatcher = Dispatcher::new(
            config.default_timeout(),
            config.lease_grace(),
            metrics.clone(),
        );

        let size = config.size as WorkerId;
        for worker_id in 0..size {
            match spawner.spawn(worker_id, events_tx.clone()) {
                Ok(handle) => dispatcher.add_worker(worker_id, handle),
                Err(e) => {
                    error!("Failed to start worker {}: {}", worker_id, e);
                    dispatcher.shutdown();
                    return Err(e.into());
                }
            }
        }

        let (commands_tx, commands_rx) = mpsc::unbounded_channel();
        let lifecycle = Arc::new(AtomicU8::new(RUNNING));

        let event_loop = EventLoop {
            dispatcher,
            spawner,
            commands: commands_rx,
            events: events_rx,
            events_tx,
            lifecycle: lifecycle.clone(),
            metrics: metrics.clone(),
            respawn: config.worker.respawn,
            max_respawns: config.worker.max_respawns,
            respawns: 0,
            max_startup_failures: config.worker.max_startup_failures,
            startup_failures: 0,
            next_worker_id: size,
            lease_check_interval: config.lease_check_interval(),
        };
        tokio::spawn(event_loop.run());

        info!("Worker pool started with {} workers", config.size);

        Ok(WorkerPool {
            commands: commands_tx,
            next_task_id: SharedCounter::new(1),
            lifecycle,
            metrics,
            max_payload: config.max_payload_bytes,
        })
    }

    /// Start a pool whose workers are chosen by `config.worker.kind`.
    ///
    /// In-process workers run the handlers in `registry`; process workers run
    /// `config.worker.program` (the current executable when unset).
    pub fn from_config(config: PoolConfig, registry: TaskHandlerRegistry) -> Result<Self> {
        let spawner: Arc<dyn WorkerSpawner> = match config.worker.kind {
            WorkerKind::InProcess => Arc::new(InProcessSpawner::new(registry)),
            WorkerKind::Process => {
                let args = config.worker.args.clone();
                match &config.worker.program {
                    Some(program) => Arc::new(ProcessSpawner::new(program.clone(), args)),
                    None => Arc::new(ProcessSpawner::current_exe(args)?),
                }
            }
        };
        WorkerPool::start(config, spawner)
    }

    /// Pool of `size` in-process workers running `registry`'s handlers
    pub fn in_process(size: usize, registry: TaskHandlerRegistry) -> Result<Self> {
        WorkerPool::start(
            PoolConfig::in_process(size),
            Arc::new(InProcessSpawner::new(registry)),
        )
    }

    /// Submit a task.
    ///
    /// Fails right away if the pool is shut down, has no workers left, or the
    /// payload is too large. Otherwise the task is queued and the returned
    /// handle resolves once it completes.
    pub fn submit(&self, request: TaskRequest) -> std::result::Result<TaskHandle, TaskError> {
        match self.lifecycle.load(Ordering::Acquire) {
            SHUT_DOWN => return Err(TaskError::ShutDown),
            NO_WORKERS => return Err(TaskError::NoWorkers),
            _ => {}
        }
        request.validate(self.max_payload)?;

        let task_id = self.next_task_id.next();
        let (reply, receiver) = oneshot::channel();
        self.commands
            .send(Command::Submit(Task::new(task_id, request), reply))
            .map_err(|_| TaskError::ShutDown)?;

        Ok(TaskHandle::new(task_id, receiver, self.commands.downgrade()))
    }

    /// Stop accepting tasks, fail everything outstanding with
    /// [`TaskError::ShutDown`] and terminate the workers.
    ///
    /// Safe to call more than once.
    pub async fn shutdown(&self) {
        self.lifecycle.store(SHUT_DOWN, Ordering::Release);

        let (ack, done) = oneshot::channel();
        if self.commands.send(Command::Shutdown(ack)).is_ok() {
            let _ = done.await;
        }
    }

    pub fn is_shut_down(&self) -> bool {
        self.lifecycle.load(Ordering::Acquire) == SHUT_DOWN
    }

    /// Current queue and worker state
    pub async fn snapshot(&self) -> std::result::Result<PoolSnapshot, TaskError> {
        let (reply, receiver) = oneshot::channel();
        self.commands
            .send(Command::Inspect(reply))
            .map_err(|_| TaskError::ShutDown)?;
        receiver.await.map_err(|_| TaskError::ShutDown)
    }

    pub async fn stats(&self) -> std::result::Result<PoolStats, TaskError> {
        Ok(self.snapshot().await?.stats)
    }

    pub fn metrics(&self) -> Arc<PoolMetrics> {
        self.metrics.clone()
    }
}

impl std::fmt::Debug for WorkerPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkerPool")
            .field("lifecycle", &self.lifecycle.load(Ordering::Relaxed))
            .field("next_task_id", &self.next_task_id.load())
            .finish()
    }
}

/// Owns the dispatcher; the only place pool state is mutated
struct EventLoop {
    dispatcher: Dispatcher,
    spawner: Arc<dyn WorkerSpawner>,
    commands: mpsc::UnboundedReceiver<Command>,
    events: mpsc::UnboundedReceiver<WorkerEvent>,
    events_tx: mpsc::UnboundedSender<WorkerEvent>,
    lifecycle: Arc<AtomicU8>,
    metrics: Arc<PoolMetrics>,
    respawn: RespawnPolicy,
    max_respawns: u32,
    respawns: u32,
    max_startup_failures: u32,
    /// Workers in a row that exited before sending `Ready`
    startup_failures: u32,
    next_worker_id: WorkerId,
    lease_check_interval: Duration,
}

impl EventLoop {
    async fn run(mut self) {
        let mut lease_check = tokio::time::interval(self.lease_check_interval);
        lease_check.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                command = self.commands.recv() => match command {
                    Some(Command::Shutdown(ack)) => {
                        self.dispatcher.shutdown();
                        let _ = ack.send(());
                        break;
                    }
                    Some(command) => self.on_command(command),
                    None => {
                        debug!("All pool handles dropped");
                        self.lifecycle.store(SHUT_DOWN, Ordering::Release);
                        self.dispatcher.shutdown();
                        break;
                    }
                },
                Some(event) = self.events.recv() => self.on_event(event),
                _ = lease_check.tick() => {
                    for worker_id in self.dispatcher.expire_leases(Utc::now()) {
                        self.replace_worker(worker_id);
                    }
                }
            }

            self.metrics.update(&self.dispatcher.stats());
        }

        self.metrics.update(&self.dispatcher.stats());
        info!("Worker pool stopped");
    }

    fn on_command(&mut self, command: Command) {
        match command {
            Command::Submit(task, reply) => {
                if self.lifecycle.load(Ordering::Acquire) == NO_WORKERS {
                    let _ = reply.send(Err(TaskError::NoWorkers));
                } else {
                    self.dispatcher.enqueue(task, reply);
                }
            }
            Command::Cancel(task_id) => {
                if !self.dispatcher.cancel(task_id) {
                    debug!("Task {} already completed, nothing to cancel", task_id);
                }
            }
            Command::Inspect(reply) => {
                let _ = reply.send(PoolSnapshot {
                    stats: self.dispatcher.stats(),
                    queued: self.dispatcher.queued_task_ids(),
                    workers: self.dispatcher.workers(),
                });
            }
            Command::Shutdown(ack) => {
                self.dispatcher.shutdown();
                let _ = ack.send(());
            }
        }
    }

    fn on_event(&mut self, event: WorkerEvent) {
        match event {
            WorkerEvent::Message(worker_id, message) => {
                if matches!(message, Message::Ready(_)) {
                    self.startup_failures = 0;
                }
                self.dispatcher.on_worker_message(worker_id, message);
            }
            WorkerEvent::Exited(worker_id) => {
                if self.dispatcher.is_closed() {
                    return;
                }
                if let Some(info) = self.dispatcher.on_worker_exit(worker_id) {
                    if info.state == WorkerState::Starting {
                        self.startup_failures += 1;
                        warn!(
                            "Worker {} exited before it was ready ({} in a row)",
                            worker_id, self.startup_failures
                        );
                    } else {
                        debug!(
                            "Worker {} exited after {} tasks",
                            info.worker_id, info.tasks_completed
                        );
                    }
                    self.replace_worker(worker_id);
                }
            }
        }
    }

    /// Apply the respawn policy to a worker that is gone
    fn replace_worker(&mut self, retired: WorkerId) {
        if self.dispatcher.is_closed() || self.lifecycle.load(Ordering::Acquire) != RUNNING {
            return;
        }

        let allowed = if self.startup_failures >= self.max_startup_failures {
            error!(
                "{} workers in a row failed to start, not replacing worker {}",
                self.startup_failures, retired
            );
            false
        } else {
            match self.respawn {
                RespawnPolicy::Shrink => false,
                RespawnPolicy::Respawn => {
                    self.max_respawns == 0 || self.respawns < self.max_respawns
                }
            }
        };

        if allowed {
            let worker_id = self.next_worker_id;
            self.next_worker_id += 1;

            match self.spawner.spawn(worker_id, self.events_tx.clone()) {
                Ok(handle) => {
                    self.respawns += 1;
                    self.metrics.worker_respawns.inc();
                    info!("Worker {} replaced by worker {}", retired, worker_id);
                    self.dispatcher.add_worker(worker_id, handle);
                }
                Err(e) => error!("Failed to replace worker {}: {}", retired, e),
            }
        } else {
            info!("Worker {} not replaced", retired);
        }

        if self.dispatcher.alive_workers() == 0 {
            warn!("No workers left, rejecting new tasks");
            let _ = self.lifecycle.compare_exchange(
                RUNNING,
                NO_WORKERS,
                Ordering::AcqRel,
                Ordering::Acquire,
            );
            self.dispatcher.fail_queued(TaskError::NoWorkers);
        }
    }
}
