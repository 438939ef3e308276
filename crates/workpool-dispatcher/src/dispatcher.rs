//! Matching queued tasks to free workers.

use crate::handle::TaskOutcome;
use crate::metrics::PoolMetrics;
use crate::queue::{PendingTask, TaskQueue};
use crate::spawner::WorkerHandle;
use crate::worker_registry::{WorkerInfo, WorkerRegistry};

use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::oneshot;
use tracing::{debug, error, info, warn};
use workpool_core::{Task, TaskError, TaskId, WorkerId};
use workpool_protocol::{CancelMessage, ErrorMessage, Message, ResultMessage, TaskMessage};

/// Point-in-time counts
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PoolStats {
    pub queued: usize,
    pub in_flight: usize,
    pub starting: usize,
    pub ready: usize,
    pub busy: usize,
}

/// A dispatched task. `reply` is `None` once the caller has been answered
/// early (cancellation); the worker stays busy until it reports.
struct InFlight {
    task: Task,
    reply: Option<oneshot::Sender<TaskOutcome>>,
}

/// Dispatcher state: the pending queue, the workers and the tasks they hold.
///
/// Every method is synchronous and runs on the pool's event loop; the
/// dispatcher never waits on a worker.
pub struct Dispatcher {
    queue: TaskQueue,
    workers: WorkerRegistry,
    in_flight: HashMap<TaskId, InFlight>,
    default_timeout: Option<Duration>,
    lease_grace: Duration,
    closed: bool,
    metrics: Arc<PoolMetrics>,
}

impl Dispatcher {
    pub fn new(
        default_timeout: Option<Duration>,
        lease_grace: Duration,
        metrics: Arc<PoolMetrics>,
    ) -> Self {
        Dispatcher {
            queue: TaskQueue::new(),
            workers: WorkerRegistry::new(),
            in_flight: HashMap::new(),
            default_timeout,
            lease_grace,
            closed: false,
            metrics,
        }
    }

    /// Track a freshly spawned worker; it takes tasks after its `Ready`
    pub fn add_worker(&mut self, worker_id: WorkerId, handle: WorkerHandle) {
        debug!("Worker {} registered", worker_id);
        self.workers.register(worker_id, handle);
    }

    /// Accept a task: dispatch it now if a worker is ready, else queue it
    pub fn enqueue(&mut self, mut task: Task, reply: oneshot::Sender<TaskOutcome>) {
        if self.closed {
            let _ = reply.send(Err(TaskError::ShutDown));
            return;
        }

        if task.timeout.is_none() {
            task.timeout = self.default_timeout;
        }

        debug!("Queued task {} (type: {})", task.id, task.task_type);
        self.queue.push(PendingTask { task, reply });
        self.try_dispatch();
    }

    /// Route a message from a worker
    pub fn on_worker_message(&mut self, worker_id: WorkerId, message: Message) {
        match message {
            Message::Ready(ready) => {
                debug!("Worker {} ready (pid {})", worker_id, ready.pid);
                self.on_worker_ready(worker_id);
            }
            Message::Result(_) | Message::Error(_) => self.on_worker_result(worker_id, message),
            other @ (Message::Task(_) | Message::Cancel(_) | Message::Shutdown) => {
                warn!(
                    "Unexpected {:?} message from worker {}",
                    other.message_type(),
                    worker_id
                );
            }
        }
    }

    /// Ready handshake finished: the worker may take tasks
    pub fn on_worker_ready(&mut self, worker_id: WorkerId) {
        if let Err(e) = self.workers.mark_ready(worker_id) {
            warn!("Ignoring ready from worker {}: {}", worker_id, e);
            return;
        }
        self.try_dispatch();
    }

    /// A worker finished its task: free it, resolve the task, dispatch the next one
    pub fn on_worker_result(&mut self, worker_id: WorkerId, message: Message) {
        let (task_id, outcome) = match message {
            Message::Result(ResultMessage { task_id, output }) => (task_id, Ok(output)),
            Message::Error(ErrorMessage {
                task_id,
                kind,
                message,
            }) => (task_id, Err(TaskError::from_failure(kind, message))),
            other => {
                warn!("Not a task result: {:?}", other.message_type());
                return;
            }
        };

        let held = self.workers.get(worker_id).and_then(|slot| slot.current_task());
        if held != Some(task_id) {
            warn!(
                "Worker {} reported task {} but holds {:?}; ignoring",
                worker_id, task_id, held
            );
            return;
        }

        if let Err(e) = self.workers.release(worker_id) {
            error!("Failed to release worker {}: {}", worker_id, e);
            return;
        }

        match self.in_flight.remove(&task_id) {
            Some(in_flight) => self.complete(in_flight, outcome),
            None => warn!("Result for unknown task {}", task_id),
        }

        self.try_dispatch();
    }

    /// A worker is gone. Fails the task it held and forgets it.
    ///
    /// Returns the worker as it was just before it exited, or `None` for an
    /// unknown worker.
    pub fn on_worker_exit(&mut self, worker_id: WorkerId) -> Option<WorkerInfo> {
        let last = self.workers.get(worker_id)?.info().clone();
        let task_id = self.workers.terminate(worker_id);
        self.workers.remove(worker_id);

        if let Some(task_id) = task_id {
            warn!("Worker {} exited while running task {}", worker_id, task_id);
            if let Some(in_flight) = self.in_flight.remove(&task_id) {
                self.complete(in_flight, Err(TaskError::WorkerCrashed { worker_id }));
            }
        } else if !self.closed {
            warn!("Worker {} exited", worker_id);
        }

        Some(last)
    }

    /// Cancel a task. Returns false if it had already completed.
    pub fn cancel(&mut self, task_id: TaskId) -> bool {
        if let Some(pending) = self.queue.remove(task_id) {
            info!("Cancelled queued task {}", task_id);
            self.fail_pending(pending, TaskError::Cancelled);
            return true;
        }

        let Some(in_flight) = self.in_flight.get_mut(&task_id) else {
            return false;
        };
        let Some(reply) = in_flight.reply.take() else {
            return false;
        };

        info!("Cancelling running task {}", task_id);
        let _ = reply.send(Err(TaskError::Cancelled));
        self.metrics.inc_tasks_total(TaskError::Cancelled.label());

        if let Some(worker_id) = in_flight.task.worker_id {
            if let Some(slot) = self.workers.get(worker_id) {
                slot.send(Message::Cancel(CancelMessage { task_id }));
            }
        }
        true
    }

    /// Fail dispatched tasks whose lease ran out and terminate their workers.
    ///
    /// Returns the workers that were terminated; they are already removed.
    pub fn expire_leases(&mut self, now: DateTime<Utc>) -> Vec<WorkerId> {
        let expired: Vec<(TaskId, WorkerId)> = self
            .in_flight
            .values()
            .filter(|f| {
                f.task
                    .lease_expires_at(self.lease_grace)
                    .map_or(false, |deadline| deadline <= now)
            })
            .filter_map(|f| f.task.worker_id.map(|w| (f.task.id, w)))
            .collect();

        let mut retired = Vec::with_capacity(expired.len());
        for (task_id, worker_id) in expired {
            warn!(
                "Task {} exceeded its lease on worker {}, terminating worker",
                task_id, worker_id
            );
            if let Some(in_flight) = self.in_flight.remove(&task_id) {
                self.complete(in_flight, Err(TaskError::Timeout));
            }
            self.workers.terminate(worker_id);
            self.workers.remove(worker_id);
            retired.push(worker_id);
        }
        retired
    }

    /// Fail every queued task with `error` (e.g. when no workers are left)
    pub fn fail_queued(&mut self, error: TaskError) {
        let pending: Vec<PendingTask> = self.queue.drain().collect();
        for p in pending {
            self.fail_pending(p, error.clone());
        }
    }

    /// Terminate all workers and fail every outstanding task. Idempotent.
    pub fn shutdown(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;
        info!(
            "Shutting down: {} queued, {} in flight",
            self.queue.len(),
            self.in_flight.len()
        );

        self.fail_queued(TaskError::ShutDown);

        let in_flight: Vec<InFlight> = self.in_flight.drain().map(|(_, f)| f).collect();
        for f in in_flight {
            self.complete(f, Err(TaskError::ShutDown));
        }

        self.workers.terminate_all();
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    /// Workers that have not exited or been terminated
    pub fn alive_workers(&self) -> usize {
        self.workers.count_alive()
    }

    pub fn stats(&self) -> PoolStats {
        let counts = self.workers.counts();
        PoolStats {
            queued: self.queue.len(),
            in_flight: self.in_flight.len(),
            starting: counts.starting,
            ready: counts.ready,
            busy: counts.busy,
        }
    }

    pub fn workers(&self) -> Vec<WorkerInfo> {
        self.workers.all_workers()
    }

    /// Queued task ids in dispatch order
    pub fn queued_task_ids(&self) -> Vec<TaskId> {
        self.queue.task_ids()
    }

    /// Hand queued tasks to ready workers, oldest task first
    fn try_dispatch(&mut self) {
        while let Some(worker_id) = self.workers.first_ready() {
            let Some(pending) = self.queue.pop() else {
                break;
            };
            self.dispatch_to(worker_id, pending);
        }
        self.metrics.update(&self.stats());
    }

    fn dispatch_to(&mut self, worker_id: WorkerId, pending: PendingTask) {
        let PendingTask { mut task, reply } = pending;

        if let Err(e) = task
            .dispatch(worker_id)
            .and_then(|_| self.workers.assign(worker_id, task.id))
        {
            error!("Failed to dispatch task {}: {}", task.id, e);
            self.fail_pending(PendingTask { task, reply }, e);
            return;
        }

        let message = Message::Task(TaskMessage {
            task_id: task.id,
            task_type: task.task_type.clone(),
            payload: std::mem::take(&mut task.payload),
            timeout_ms: task.timeout.map_or(0, timeout_millis),
        });

        let delivered = self
            .workers
            .get(worker_id)
            .map_or(false, |slot| slot.send(message));

        debug!("Dispatched task {} to worker {}", task.id, worker_id);
        let task_id = task.id;
        self.in_flight.insert(
            task_id,
            InFlight {
                task,
                reply: Some(reply),
            },
        );

        if !delivered {
            // The exit event will follow; fail the task now and keep the slot out of rotation
            warn!("Worker {} unreachable, failing task {}", worker_id, task_id);
            self.workers.terminate(worker_id);
            if let Some(in_flight) = self.in_flight.remove(&task_id) {
                self.complete(in_flight, Err(TaskError::WorkerCrashed { worker_id }));
            }
        }
    }

    /// Resolve a dispatched task exactly once
    fn complete(&mut self, in_flight: InFlight, outcome: TaskOutcome) {
        let InFlight { mut task, reply } = in_flight;

        let recorded = match &outcome {
            Ok(_) => task.succeed(),
            Err(e) => task.fail(e),
        };
        if let Err(e) = recorded {
            error!("Task {} in unexpected state: {}", task.id, e);
        }

        if let Some(duration) = task.run_duration() {
            self.metrics.observe_duration(duration);
        }

        let Some(reply) = reply else {
            debug!("Discarding late result for cancelled task {}", task.id);
            return;
        };

        match &outcome {
            Ok(_) => {
                info!("Task {} completed successfully", task.id);
                self.metrics.inc_tasks_total("succeeded");
            }
            Err(e) => {
                info!("Task {} failed: {}", task.id, e);
                self.metrics.inc_tasks_total(e.label());
            }
        }

        if reply.send(outcome).is_err() {
            debug!("Caller dropped the handle for task {}", task.id);
        }
    }

    fn fail_pending(&mut self, pending: PendingTask, error: TaskError) {
        let PendingTask { mut task, reply } = pending;
        if let Err(e) = task.fail(&error) {
            error!("Task {} in unexpected state: {}", task.id, e);
        }
        self.metrics.inc_tasks_total(error.label());
        let _ = reply.send(Err(error));
    }
}

/// Whole milliseconds for the wire, rounded up; 0 would mean "no timeout"
fn timeout_millis(timeout: Duration) -> u64 {
    let millis = (timeout.as_nanos() + 999_999) / 1_000_000;
    u64::try_from(millis).unwrap_or(u64::MAX).max(1)
}
