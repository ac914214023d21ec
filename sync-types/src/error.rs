//! Error types for the sync wire format.

use thiserror::Error;

/// Errors that can occur while encoding or routing protocol values.
#[derive(Debug, Error)]
pub enum SyncError {
    /// MessagePack serialization failed
    #[error("serialization failed: {0}")]
    Serialization(#[source] rmp_serde::encode::Error),

    /// MessagePack deserialization failed
    #[error("deserialization failed: {0}")]
    Deserialization(#[source] rmp_serde::decode::Error),

    /// Invalid message type discriminator
    #[error("invalid message type: {0}")]
    InvalidMessageType(u8),

    /// Invalid envelope version
    #[error("unsupported protocol version: {0}")]
    UnsupportedVersion(u8),

    /// Envelope discriminant disagrees with the decoded payload
    #[error("message type mismatch: envelope says {envelope:?}, payload is {payload:?}")]
    TypeMismatch {
        /// Discriminant carried by the envelope.
        envelope: crate::MessageType,
        /// Discriminant of the decoded payload.
        payload: crate::MessageType,
    },
}
