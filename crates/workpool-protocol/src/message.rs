use serde::{Deserialize, Serialize};
use std::time::Duration;
use workpool_core::{FailureKind, TaskId, TaskPayload, TaskType};

/// Message kinds exchanged between the pool and its workers
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum MessageType {
    Ready = 1,
    Task = 2,
    Result = 3,
    Error = 4,
    Cancel = 5,
    Shutdown = 6,
}

impl MessageType {
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            1 => Some(MessageType::Ready),
            2 => Some(MessageType::Task),
            3 => Some(MessageType::Result),
            4 => Some(MessageType::Error),
            5 => Some(MessageType::Cancel),
            6 => Some(MessageType::Shutdown),
            _ => None,
        }
    }

    pub fn as_u8(&self) -> u8 {
        *self as u8
    }
}

/// Worker protocol messages
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Message {
    /// Worker finished starting and can take a task
    Ready(ReadyMessage),

    /// Pool hands a task to a worker
    Task(TaskMessage),

    /// Worker finished a task successfully
    Result(ResultMessage),

    /// Worker failed a task
    Error(ErrorMessage),

    /// Pool asks a worker to abandon its current task
    Cancel(CancelMessage),

    /// Pool asks a worker to exit
    Shutdown,
}

impl Message {
    pub fn message_type(&self) -> MessageType {
        match self {
            Message::Ready(_) => MessageType::Ready,
            Message::Task(_) => MessageType::Task,
            Message::Result(_) => MessageType::Result,
            Message::Error(_) => MessageType::Error,
            Message::Cancel(_) => MessageType::Cancel,
            Message::Shutdown => MessageType::Shutdown,
        }
    }

    /// Task the message refers to, if any
    pub fn task_id(&self) -> Option<TaskId> {
        match self {
            Message::Task(m) => Some(m.task_id),
            Message::Result(m) => Some(m.task_id),
            Message::Error(m) => Some(m.task_id),
            Message::Cancel(m) => Some(m.task_id),
            Message::Ready(_) | Message::Shutdown => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReadyMessage {
    /// OS process id of the worker
    pub pid: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskMessage {
    pub task_id: TaskId,
    pub task_type: TaskType,
    pub payload: TaskPayload,
    /// 0 = no timeout
    pub timeout_ms: u64,
}

impl TaskMessage {
    pub fn timeout(&self) -> Option<Duration> {
        (self.timeout_ms > 0).then(|| Duration::from_millis(self.timeout_ms))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResultMessage {
    pub task_id: TaskId,
    pub output: TaskPayload,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorMessage {
    pub task_id: TaskId,
    pub kind: FailureKind,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CancelMessage {
    pub task_id: TaskId,
}
