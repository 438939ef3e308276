use crate::handle::TaskOutcome;
use std::collections::VecDeque;
use tokio::sync::oneshot;
use workpool_core::{Task, TaskId};

/// A task waiting for a worker, with the sender that resolves its handle
pub struct PendingTask {
    pub task: Task,
    pub reply: oneshot::Sender<TaskOutcome>,
}

/// FIFO queue of tasks that have not been dispatched yet.
///
/// Owned by the dispatcher's event loop, so it needs no locking.
#[derive(Default)]
pub struct TaskQueue {
    entries: VecDeque<PendingTask>,
}

impl TaskQueue {
    pub fn new() -> Self {
        TaskQueue {
            entries: VecDeque::new(),
        }
    }

    /// Append a task behind everything already queued
    pub fn push(&mut self, pending: PendingTask) {
        self.entries.push_back(pending);
    }

    /// Take the oldest task
    pub fn pop(&mut self) -> Option<PendingTask> {
        self.entries.pop_front()
    }

    /// Remove a specific task, keeping the order of the rest
    pub fn remove(&mut self, task_id: TaskId) -> Option<PendingTask> {
        let index = self.entries.iter().position(|p| p.task.id == task_id)?;
        self.entries.remove(index)
    }

    /// Ids in dispatch order
    pub fn task_ids(&self) -> Vec<TaskId> {
        self.entries.iter().map(|p| p.task.id).collect()
    }

    /// Take every queued task, oldest first
    pub fn drain(&mut self) -> impl Iterator<Item = PendingTask> + '_ {
        self.entries.drain(..)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use workpool_core::TaskRequest;

    fn pending(id: TaskId) -> (PendingTask, oneshot::Receiver<TaskOutcome>) {
        let (reply, rx) = oneshot::channel();
        let task = Task::new(id, TaskRequest::new("echo", vec![id as u8]));
        (PendingTask { task, reply }, rx)
    }

    #[test]
    fn test_fifo_order() {
        let mut queue = TaskQueue::new();
        for id in 1..=3 {
            queue.push(pending(id).0);
        }

        assert_eq!(queue.pop().unwrap().task.id, 1);
        assert_eq!(queue.pop().unwrap().task.id, 2);
        assert_eq!(queue.pop().unwrap().task.id, 3);
        assert!(queue.pop().is_none());
    }

    #[test]
    fn test_remove_keeps_order() {
        let mut queue = TaskQueue::new();
        for id in 1..=4 {
            queue.push(pending(id).0);
        }

        let removed = queue.remove(2).unwrap();
        assert_eq!(removed.task.id, 2);
        assert!(queue.remove(2).is_none());
        assert_eq!(queue.task_ids(), vec![1, 3, 4]);
    }

    #[test]
    fn test_drain() {
        let mut queue = TaskQueue::new();
        queue.push(pending(1).0);
        queue.push(pending(2).0);

        let ids: Vec<TaskId> = queue.drain().map(|p| p.task.id).collect();
        assert_eq!(ids, vec![1, 2]);
        assert!(queue.is_empty());
    }
}
