pub mod config;
pub mod dispatcher;
pub mod handle;
pub mod metrics;
pub mod pool;
pub mod queue;
pub mod spawner;
pub mod worker_registry;

pub use config::{PoolConfig, RespawnPolicy, WorkerKind};
pub use dispatcher::{Dispatcher, PoolStats};
pub use handle::{TaskHandle, TaskOutcome};
pub use metrics::PoolMetrics;
pub use pool::{PoolSnapshot, WorkerPool};
pub use spawner::{InProcessSpawner, ProcessSpawner, WorkerEvent, WorkerHandle, WorkerSpawner};
pub use worker_registry::WorkerInfo;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum DispatcherError {
    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("Task error: {0}")]
    Task(#[from] workpool_core::TaskError),

    #[error("Metrics error: {0}")]
    Metrics(#[from] prometheus::Error),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, DispatcherError>;
