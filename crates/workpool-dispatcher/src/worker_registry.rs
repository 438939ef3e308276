use crate::spawner::WorkerHandle;
use chrono::{DateTime, Utc};
use std::collections::BTreeMap;
use workpool_core::{Result, TaskError, TaskId, WorkerId, WorkerState};
use workpool_protocol::Message;

/// Public view of a worker
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkerInfo {
    pub worker_id: WorkerId,
    pub state: WorkerState,
    pub current_task: Option<TaskId>,
    pub tasks_completed: u64,
    pub spawned_at: DateTime<Utc>,
}

/// A live worker and the channel to it
pub struct WorkerSlot {
    info: WorkerInfo,
    handle: WorkerHandle,
}

impl WorkerSlot {
    fn new(worker_id: WorkerId, handle: WorkerHandle) -> Self {
        WorkerSlot {
            info: WorkerInfo {
                worker_id,
                state: WorkerState::Starting,
                current_task: None,
                tasks_completed: 0,
                spawned_at: Utc::now(),
            },
            handle,
        }
    }

    pub fn info(&self) -> &WorkerInfo {
        &self.info
    }

    pub fn state(&self) -> WorkerState {
        self.info.state
    }

    pub fn current_task(&self) -> Option<TaskId> {
        self.info.current_task
    }

    /// Send a message to the worker; false if it is unreachable
    pub fn send(&self, message: Message) -> bool {
        self.handle.send(message)
    }

    /// Stop the worker and mark the slot terminated
    pub fn terminate(&mut self) {
        self.info.state = WorkerState::Terminated;
        self.handle.terminate();
    }
}

/// Counts of workers per lifecycle state
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WorkerCounts {
    pub starting: usize,
    pub ready: usize,
    pub busy: usize,
}

/// Workers of one pool, keyed by id.
///
/// Iteration order is ascending id, which makes "first ready worker"
/// deterministic.
#[derive(Default)]
pub struct WorkerRegistry {
    workers: BTreeMap<WorkerId, WorkerSlot>,
}

impl WorkerRegistry {
    pub fn new() -> Self {
        WorkerRegistry {
            workers: BTreeMap::new(),
        }
    }

    /// Register a freshly spawned worker in the `Starting` state
    pub fn register(&mut self, worker_id: WorkerId, handle: WorkerHandle) {
        self.workers
            .insert(worker_id, WorkerSlot::new(worker_id, handle));
    }

    pub fn get(&self, worker_id: WorkerId) -> Option<&WorkerSlot> {
        self.workers.get(&worker_id)
    }

    /// Ready handshake: `Starting -> Ready`
    pub fn mark_ready(&mut self, worker_id: WorkerId) -> Result<()> {
        let slot = self.slot_mut(worker_id)?;
        slot.info.state = slot.info.state.transition(WorkerState::Ready)?;
        Ok(())
    }

    /// Lowest-id worker that can take a task
    pub fn first_ready(&self) -> Option<WorkerId> {
        self.workers
            .values()
            .find(|slot| slot.info.state.is_available())
            .map(|slot| slot.info.worker_id)
    }

    /// `Ready -> Busy` holding `task_id`
    pub fn assign(&mut self, worker_id: WorkerId, task_id: TaskId) -> Result<()> {
        let slot = self.slot_mut(worker_id)?;
        slot.info.state = slot.info.state.transition(WorkerState::Busy)?;
        slot.info.current_task = Some(task_id);
        Ok(())
    }

    /// `Busy -> Ready`, returning the task the worker held
    pub fn release(&mut self, worker_id: WorkerId) -> Result<Option<TaskId>> {
        let slot = self.slot_mut(worker_id)?;
        slot.info.state = slot.info.state.transition(WorkerState::Ready)?;
        slot.info.tasks_completed += 1;
        Ok(slot.info.current_task.take())
    }

    /// Terminate a worker in place; it stays registered until `remove`
    pub fn terminate(&mut self, worker_id: WorkerId) -> Option<TaskId> {
        let slot = self.workers.get_mut(&worker_id)?;
        slot.terminate();
        slot.info.current_task.take()
    }

    /// Forget a worker, returning its slot
    pub fn remove(&mut self, worker_id: WorkerId) -> Option<WorkerSlot> {
        self.workers.remove(&worker_id)
    }

    /// Terminate and forget every worker
    pub fn terminate_all(&mut self) -> Vec<WorkerSlot> {
        let mut slots: Vec<WorkerSlot> = std::mem::take(&mut self.workers).into_values().collect();
        for slot in &mut slots {
            slot.terminate();
        }
        slots
    }

    pub fn counts(&self) -> WorkerCounts {
        let mut counts = WorkerCounts::default();
        for slot in self.workers.values() {
            match slot.info.state {
                WorkerState::Starting => counts.starting += 1,
                WorkerState::Ready => counts.ready += 1,
                WorkerState::Busy => counts.busy += 1,
                WorkerState::Terminated => {}
            }
        }
        counts
    }

    /// Workers that are not terminated
    pub fn count_alive(&self) -> usize {
        self.workers
            .values()
            .filter(|slot| slot.info.state.is_alive())
            .count()
    }

    pub fn all_workers(&self) -> Vec<WorkerInfo> {
        self.workers.values().map(|slot| slot.info.clone()).collect()
    }

    fn slot_mut(&mut self, worker_id: WorkerId) -> Result<&mut WorkerSlot> {
        self.workers
            .get_mut(&worker_id)
            .ok_or_else(|| TaskError::InvalidState {
                expected: format!("registered worker {}", worker_id),
                actual: "unknown worker".to_string(),
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::mpsc;

    fn registry_with(ids: &[WorkerId]) -> (WorkerRegistry, Vec<mpsc::UnboundedReceiver<Message>>) {
        let mut registry = WorkerRegistry::new();
        let mut inboxes = Vec::new();
        for &id in ids {
            let (tx, rx) = mpsc::unbounded_channel();
            registry.register(id, WorkerHandle::detached(tx));
            inboxes.push(rx);
        }
        (registry, inboxes)
    }

    #[test]
    fn test_register_starts_in_starting() {
        let (registry, _inboxes) = registry_with(&[1]);
        let slot = registry.get(1).unwrap();
        assert_eq!(slot.state(), WorkerState::Starting);
        assert!(registry.first_ready().is_none());
    }

    #[test]
    fn test_first_ready_is_lowest_id() {
        let (mut registry, _inboxes) = registry_with(&[3, 1, 2]);
        registry.mark_ready(3).unwrap();
        registry.mark_ready(2).unwrap();
        assert_eq!(registry.first_ready(), Some(2));
    }

    #[test]
    fn test_assign_and_release() {
        let (mut registry, _inboxes) = registry_with(&[1]);
        registry.mark_ready(1).unwrap();

        registry.assign(1, 10).unwrap();
        assert_eq!(registry.get(1).unwrap().state(), WorkerState::Busy);
        assert_eq!(registry.get(1).unwrap().current_task(), Some(10));
        assert!(registry.first_ready().is_none());

        // A busy worker cannot take a second task
        assert!(registry.assign(1, 11).is_err());

        assert_eq!(registry.release(1).unwrap(), Some(10));
        let info = registry.get(1).unwrap().info();
        assert_eq!(info.state, WorkerState::Ready);
        assert_eq!(info.tasks_completed, 1);
    }

    #[test]
    fn test_assign_requires_ready() {
        let (mut registry, _inboxes) = registry_with(&[1]);
        assert!(registry.assign(1, 10).is_err());
        assert!(registry.mark_ready(99).is_err());
    }

    #[test]
    fn test_terminate() {
        let (mut registry, mut inboxes) = registry_with(&[1, 2]);
        registry.mark_ready(1).unwrap();
        registry.assign(1, 5).unwrap();

        assert_eq!(registry.terminate(1), Some(5));
        assert_eq!(registry.get(1).unwrap().state(), WorkerState::Terminated);
        assert_eq!(registry.count_alive(), 1);
        assert_eq!(inboxes[0].try_recv().unwrap(), Message::Shutdown);

        let removed = registry.terminate_all();
        assert_eq!(removed.len(), 2);
        assert!(registry.all_workers().is_empty());
    }

    #[test]
    fn test_counts() {
        let (mut registry, _inboxes) = registry_with(&[1, 2, 3]);
        registry.mark_ready(1).unwrap();
        registry.mark_ready(2).unwrap();
        registry.assign(2, 1).unwrap();

        assert_eq!(
            registry.counts(),
            WorkerCounts {
                starting: 1,
                ready: 1,
                busy: 1
            }
        );
    }
}
