use crate::{Message, MessageType, ProtocolError, Result, MAX_MESSAGE_SIZE};
use bytes::{Buf, BufMut, BytesMut};
use tokio_util::codec::{Decoder, Encoder};

/// Codec for encoding/decoding messages with length-prefixed framing
///
/// Frame format: [4-byte length (big-endian)] [1-byte message type] [payload]
///
/// The length covers the type byte and the payload.
#[derive(Debug, Clone, Copy, Default)]
pub struct MessageCodec;

impl Decoder for MessageCodec {
    type Item = Message;
    type Error = ProtocolError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>> {
        // Need at least 5 bytes for length prefix + message type
        if src.len() < 5 {
            return Ok(None);
        }

        let mut length_bytes = [0u8; 4];
        length_bytes.copy_from_slice(&src[0..4]);
        let length = u32::from_be_bytes(length_bytes) as usize;

        if length > MAX_MESSAGE_SIZE {
            return Err(ProtocolError::MessageTooLarge(length));
        }
        if length == 0 {
            return Err(ProtocolError::InvalidMessageType(0));
        }

        if src.len() < 4 + length {
            src.reserve(4 + length - src.len());
            return Ok(None);
        }

        src.advance(4);

        let msg_type_byte = src.get_u8();
        let payload = src.split_to(length - 1);
        let msg_type = MessageType::from_u8(msg_type_byte)
            .ok_or(ProtocolError::InvalidMessageType(msg_type_byte))?;

        let message = match msg_type {
            MessageType::Ready => Message::Ready(bincode::deserialize(&payload)?),
            MessageType::Task => Message::Task(bincode::deserialize(&payload)?),
            MessageType::Result => Message::Result(bincode::deserialize(&payload)?),
            MessageType::Error => Message::Error(bincode::deserialize(&payload)?),
            MessageType::Cancel => Message::Cancel(bincode::deserialize(&payload)?),
            MessageType::Shutdown => Message::Shutdown,
        };

        Ok(Some(message))
    }
}

impl Encoder<Message> for MessageCodec {
    type Error = ProtocolError;

    fn encode(&mut self, item: Message, dst: &mut BytesMut) -> Result<()> {
        let payload = match &item {
            Message::Ready(m) => bincode::serialize(m)?,
            Message::Task(m) => bincode::serialize(m)?,
            Message::Result(m) => bincode::serialize(m)?,
            Message::Error(m) => bincode::serialize(m)?,
            Message::Cancel(m) => bincode::serialize(m)?,
            Message::Shutdown => Vec::new(),
        };

        let total_length = 1 + payload.len();
        if total_length > MAX_MESSAGE_SIZE {
            return Err(ProtocolError::MessageTooLarge(total_length));
        }

        dst.reserve(4 + total_length);
        dst.put_u32(total_length as u32);
        dst.put_u8(item.message_type().as_u8());
        dst.put_slice(&payload);

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{ErrorMessage, ReadyMessage, TaskMessage};
    use workpool_core::FailureKind;

    fn task_message() -> Message {
        Message::Task(TaskMessage {
            task_id: 9,
            task_type: "echo".to_string(),
            payload: b"test payload".to_vec(),
            timeout_ms: 250,
        })
    }

    #[test]
    fn test_codec_roundtrip() {
        let mut codec = MessageCodec;
        let mut buffer = BytesMut::new();

        codec.encode(task_message(), &mut buffer).unwrap();
        let decoded = codec.decode(&mut buffer).unwrap();

        assert_eq!(decoded, Some(task_message()));
        assert!(buffer.is_empty());
    }

    #[test]
    fn test_partial_message() {
        let mut codec = MessageCodec;
        let mut buffer = BytesMut::new();

        codec.encode(task_message(), &mut buffer).unwrap();

        let full_len = buffer.len();
        let rest = buffer.split_off(full_len / 2);

        // Half a frame decodes to nothing and consumes nothing
        assert!(codec.decode(&mut buffer).unwrap().is_none());
        assert_eq!(buffer.len(), full_len / 2);

        buffer.extend_from_slice(&rest);
        assert_eq!(codec.decode(&mut buffer).unwrap(), Some(task_message()));
    }

    #[test]
    fn test_back_to_back_frames() {
        let mut codec = MessageCodec;
        let mut buffer = BytesMut::new();

        let ready = Message::Ready(ReadyMessage { pid: 77 });
        let error = Message::Error(ErrorMessage {
            task_id: 3,
            kind: FailureKind::Panic,
            message: "boom".to_string(),
        });

        codec.encode(ready.clone(), &mut buffer).unwrap();
        codec.encode(Message::Shutdown, &mut buffer).unwrap();
        codec.encode(error.clone(), &mut buffer).unwrap();

        assert_eq!(codec.decode(&mut buffer).unwrap(), Some(ready));
        assert_eq!(codec.decode(&mut buffer).unwrap(), Some(Message::Shutdown));
        assert_eq!(codec.decode(&mut buffer).unwrap(), Some(error));
        assert_eq!(codec.decode(&mut buffer).unwrap(), None);
    }

    #[test]
    fn test_unknown_message_type() {
        let mut codec = MessageCodec;
        let mut buffer = BytesMut::new();
        buffer.put_u32(1);
        buffer.put_u8(42);

        match codec.decode(&mut buffer) {
            Err(ProtocolError::InvalidMessageType(42)) => {}
            other => panic!("Expected InvalidMessageType, got {:?}", other),
        }
    }

    #[test]
    fn test_oversized_frame_rejected() {
        let mut codec = MessageCodec;
        let mut buffer = BytesMut::new();
        buffer.put_u32((MAX_MESSAGE_SIZE + 1) as u32);
        buffer.put_u8(MessageType::Task.as_u8());

        assert!(matches!(
            codec.decode(&mut buffer),
            Err(ProtocolError::MessageTooLarge(_))
        ));
    }
}
