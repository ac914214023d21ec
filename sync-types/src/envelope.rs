//! Envelope - the routable wrapper for every message crossing a channel.

use serde::{Deserialize, Serialize};

use crate::{DiffSyncEntity, DiffSyncIdentifier, Message, SyncError};

/// Current envelope format version.
pub const PROTOCOL_VERSION: u8 = 1;

/// Message type discriminator for envelope routing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[repr(u8)]
pub enum MessageType {
    /// Acknowledgement of received edits
    Ack = 1,
    /// Batch of edits
    Patch = 2,
    /// Peer begins a session
    Start = 3,
    /// Peer ends a session
    End = 4,
}

impl TryFrom<u8> for MessageType {
    type Error = SyncError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            1 => Ok(MessageType::Ack),
            2 => Ok(MessageType::Patch),
            3 => Ok(MessageType::Start),
            4 => Ok(MessageType::End),
            _ => Err(SyncError::InvalidMessageType(value)),
        }
    }
}

/// The envelope wraps a protocol message with routing metadata.
///
/// A transport routes on `msg_type`, `entity` and `identifier` without
/// decoding the payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Envelope {
    /// Envelope format version (currently 1)
    pub version: u8,
    /// Message type discriminator
    pub msg_type: u8,
    /// Document the message is about
    pub entity: DiffSyncEntity,
    /// Peer that sent (or is addressed by) the message
    pub identifier: DiffSyncIdentifier,
    /// Unix timestamp (seconds) - informational only
    pub timestamp: u64,
    /// MessagePack-encoded [`Message`]
    pub payload: Vec<u8>,
}

impl Envelope {
    /// Wrap a message for sending.
    pub fn seal(
        entity: DiffSyncEntity,
        identifier: DiffSyncIdentifier,
        message: &Message,
    ) -> Result<Self, SyncError> {
        Ok(Self {
            version: PROTOCOL_VERSION,
            msg_type: message.message_type() as u8,
            entity,
            identifier,
            timestamp: std::time::SystemTime::now()
                .duration_since(std::time::UNIX_EPOCH)
                .map(|d| d.as_secs())
                .unwrap_or(0),
            payload: message.to_bytes()?,
        })
    }

    /// Decode the payload, checking version and discriminant.
    pub fn open(&self) -> Result<Message, SyncError> {
        if self.version != PROTOCOL_VERSION {
            return Err(SyncError::UnsupportedVersion(self.version));
        }
        let expected = self.message_type()?;
        let message = Message::from_bytes(&self.payload)?;
        let actual = message.message_type();
        if expected != actual {
            return Err(SyncError::TypeMismatch {
                envelope: expected,
                payload: actual,
            });
        }
        Ok(message)
    }

    /// Serialize to MessagePack bytes.
    pub fn to_bytes(&self) -> Result<Vec<u8>, SyncError> {
        rmp_serde::to_vec(self).map_err(SyncError::Serialization)
    }

    /// Deserialize from MessagePack bytes.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, SyncError> {
        rmp_serde::from_slice(bytes).map_err(SyncError::Deserialization)
    }

    /// Get the message type as an enum.
    pub fn message_type(&self) -> Result<MessageType, SyncError> {
        MessageType::try_from(self.msg_type)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Ack, End, Start};

    fn entity() -> DiffSyncEntity {
        DiffSyncEntity::new("note", "1")
    }

    fn peer() -> DiffSyncIdentifier {
        DiffSyncIdentifier::client("alice", "srv")
    }

    #[test]
    fn seal_and_open() {
        let msg = Message::Ack(Ack::new("alice", 1, 1));
        let envelope = Envelope::seal(entity(), peer(), &msg).unwrap();
        assert_eq!(envelope.message_type().unwrap(), MessageType::Ack);

        let bytes = envelope.to_bytes().unwrap();
        let restored = Envelope::from_bytes(&bytes).unwrap();
        assert_eq!(restored.entity, entity());
        assert_eq!(restored.identifier.urn(), "client:alice:srv");
        assert_eq!(restored.open().unwrap(), msg);
    }

    #[test]
    fn message_type_values() {
        for val in 1..=4u8 {
            let mt = MessageType::try_from(val).unwrap();
            assert_eq!(mt as u8, val);
        }
        assert_eq!(MessageType::Ack as u8, 1);
        assert_eq!(MessageType::End as u8, 4);
    }

    #[test]
    fn invalid_message_type_fails() {
        assert!(MessageType::try_from(0).is_err());
        assert!(MessageType::try_from(5).is_err());
        assert!(MessageType::try_from(255).is_err());
    }

    #[test]
    fn open_rejects_mismatched_discriminant() {
        let mut envelope =
            Envelope::seal(entity(), peer(), &Message::Start(Start { version: 1 })).unwrap();
        envelope.msg_type = MessageType::End as u8;
        assert!(matches!(
            envelope.open(),
            Err(SyncError::TypeMismatch {
                envelope: MessageType::End,
                payload: MessageType::Start,
            })
        ));
    }

    #[test]
    fn open_rejects_unknown_version() {
        let mut envelope =
            Envelope::seal(entity(), peer(), &Message::End(End { reason: None })).unwrap();
        envelope.version = 9;
        assert!(matches!(envelope.open(), Err(SyncError::UnsupportedVersion(9))));
    }

    #[test]
    fn seal_sets_timestamp() {
        let envelope =
            Envelope::seal(entity(), peer(), &Message::End(End { reason: None })).unwrap();
        let now = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap()
            .as_secs();
        assert!(envelope.timestamp <= now);
        assert!(envelope.timestamp >= now - 60);
    }
}
