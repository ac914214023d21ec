//! Error types for sync-server.

use sync_core::ProtocolError;
use sync_types::SyncError;

/// Main error type for service operations.
#[derive(Debug, thiserror::Error)]
pub enum ServiceError {
    /// No live session for this peer of the entity; `start` first.
    #[error("no session for {urn} on {entity}")]
    SessionNotFound {
        /// Entity key.
        entity: String,
        /// Peer urn.
        urn: String,
    },

    /// No persistence collaborator is registered for the entity type.
    #[error("no synchronizable service registered for entity type {entity_type}")]
    ProviderNotRegistered {
        /// The entity type without a collaborator.
        entity_type: String,
    },

    /// Protocol fault while processing a patch batch.
    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    /// Storage error.
    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    /// Channel error.
    #[error("channel error: {0}")]
    Channel(#[from] ChannelError),

    /// Envelope could not be sealed or opened.
    #[error("codec error: {0}")]
    Codec(#[from] SyncError),
}

/// Storage layer errors.
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    /// Database error.
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Patch hunks could not be encoded for the audit log.
    #[error("encoding error: {0}")]
    Encoding(#[from] serde_json::Error),

    /// A stored row could not be decoded.
    #[error("invalid stored record: {0}")]
    InvalidRecord(String),
}

/// Channel errors.
#[derive(Debug, thiserror::Error)]
pub enum ChannelError {
    /// The other end hung up.
    #[error("channel closed")]
    Closed,

    /// Send failed.
    #[error("send failed: {0}")]
    SendFailed(String),
}

/// Result type alias for service operations.
pub type Result<T> = std::result::Result<T, ServiceError>;
