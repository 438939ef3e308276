mod codec;
mod message;

pub use codec::MessageCodec;
pub use message::{
    CancelMessage, ErrorMessage, Message, MessageType, ReadyMessage, ResultMessage, TaskMessage,
};

use thiserror::Error;

#[derive(Error, Debug)]
pub enum ProtocolError {
    #[error("Invalid message type: {0}")]
    InvalidMessageType(u8),

    #[error("Message too large: {0} bytes")]
    MessageTooLarge(usize),

    #[error("Serialization error: {0}")]
    SerializationError(#[from] bincode::Error),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Connection closed")]
    Closed,
}

pub type Result<T> = std::result::Result<T, ProtocolError>;

/// Maximum frame size: 11MB (to accommodate 10MB task payload + overhead)
pub const MAX_MESSAGE_SIZE: usize = 11 * 1024 * 1024;

/// Largest task payload a process worker accepts, leaving the rest of a
/// frame for the task type and header fields
pub const MAX_TASK_PAYLOAD: usize = MAX_MESSAGE_SIZE - 1024 * 1024;
