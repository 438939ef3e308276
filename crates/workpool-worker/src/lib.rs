pub mod executor;
pub mod handler;
pub mod transport;
pub mod worker;

pub use executor::{ExecutionOutcome, TaskExecutor};
pub use handler::{TaskHandler, TaskHandlerRegistry, TaskResult};
pub use transport::{ChannelTransport, FramedTransport, Transport};
pub use worker::Worker;
