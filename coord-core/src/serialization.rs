use bytes::Bytes;
use serde::{Deserialize, Serialize};

use crate::{messages::Message, CoordError, Result};

/// Trait for record and frame serialization
pub trait MessageSerializer {
    fn serialize<T>(&self, data: &T) -> Result<Vec<u8>>
    where
        T: Serialize;

    fn deserialize<T>(&self, bytes: &[u8]) -> Result<T>
    where
        T: for<'de> Deserialize<'de>;
}

/// Binary serializer using bincode
#[derive(Debug, Default, Clone, Copy)]
pub struct BinarySerializer;

impl MessageSerializer for BinarySerializer {
    fn serialize<T>(&self, data: &T) -> Result<Vec<u8>>
    where
        T: Serialize,
    {
        bincode::serialize(data)
            .map_err(|e| CoordError::serialization(format!("Binary serialization failed: {}", e)))
    }

    fn deserialize<T>(&self, bytes: &[u8]) -> Result<T>
    where
        T: for<'de> Deserialize<'de>,
    {
        bincode::deserialize(bytes)
            .map_err(|e| CoordError::serialization(format!("Binary deserialization failed: {}", e)))
    }
}

/// Encodes a protocol message into one wire frame.
pub fn encode_message(message: &Message) -> Result<Bytes> {
    BinarySerializer.serialize(message).map(Bytes::from)
}

/// Decodes one wire frame into a protocol message.
pub fn decode_message(frame: &[u8]) -> Result<Message> {
    BinarySerializer.deserialize(frame)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::messages::MessageType;
    use crate::{LogEntry, NodeId};

    #[test]
    fn test_message_frame_preserves_entries() {
        let mut message = Message::new(MessageType::Append, NodeId(1), NodeId(2), 3);
        message.entries = vec![LogEntry::new(4, 3, "SET a 1"), LogEntry::new(5, 3, "")];
        message.commit = 4;

        let frame = encode_message(&message).unwrap();
        assert_eq!(decode_message(&frame).unwrap(), message);
    }

    #[test]
    fn test_garbage_frame_is_rejected() {
        let err = decode_message(&[0xff, 0x01]).unwrap_err();
        assert!(matches!(err, CoordError::Serialization { .. }));
    }
}
