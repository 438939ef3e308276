mod counter;
mod error;
mod task;
mod worker;

pub use counter::SharedCounter;
pub use error::{FailureKind, TaskError, Result};
pub use task::{Task, TaskId, TaskPayload, TaskRequest, TaskStatus, TaskType};
pub use worker::{WorkerId, WorkerState};

pub const MAX_PAYLOAD_SIZE: usize = 10 * 1024 * 1024; // 10MB
