//! Identity types for Differential Synchronization.

use serde::{Deserialize, Serialize};
use std::fmt;

/// A unique, time-ordered identifier for a patch or ack.
///
/// UUID v7 format (16 bytes): ids generated later sort after earlier ones.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct PatchId(uuid::Uuid);

impl PatchId {
    /// Create a new time-ordered PatchId.
    pub fn new() -> Self {
        Self(uuid::Uuid::now_v7())
    }

    /// Create a PatchId from raw bytes.
    pub fn from_bytes(bytes: &[u8]) -> Option<Self> {
        uuid::Uuid::from_slice(bytes).ok().map(Self)
    }

    /// Get the raw bytes of this PatchId.
    pub fn as_bytes(&self) -> &[u8] {
        self.0.as_bytes()
    }

    /// Get the inner UUID.
    pub fn as_uuid(&self) -> &uuid::Uuid {
        &self.0
    }
}

impl Default for PatchId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for PatchId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Debug for PatchId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PatchId({})", self.0)
    }
}

/// Which side of the protocol a peer plays.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PeerKind {
    /// The editing client.
    Client,
    /// The server holding the canonical text.
    Server,
}

impl fmt::Display for PeerKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PeerKind::Client => f.write_str("client"),
            PeerKind::Server => f.write_str("server"),
        }
    }
}

/// Identifies one synchronization peer.
///
/// The derived urn (`kind:client_id:server_id`) keys that peer's session.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DiffSyncIdentifier {
    /// Client or server.
    pub kind: PeerKind,
    /// Identifier of the editing client.
    pub client_id: String,
    /// Identifier of the server instance the client talks to.
    pub server_id: String,
}

impl DiffSyncIdentifier {
    /// Create an identifier.
    pub fn new(kind: PeerKind, client_id: impl Into<String>, server_id: impl Into<String>) -> Self {
        Self {
            kind,
            client_id: client_id.into(),
            server_id: server_id.into(),
        }
    }

    /// Identifier for a client peer.
    pub fn client(client_id: impl Into<String>, server_id: impl Into<String>) -> Self {
        Self::new(PeerKind::Client, client_id, server_id)
    }

    /// Uniform resource name used as the registry key for this peer.
    pub fn urn(&self) -> String {
        format!("{}:{}:{}", self.kind, self.client_id, self.server_id)
    }
}

impl fmt::Display for DiffSyncIdentifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.urn())
    }
}

/// Identifies the synchronized subject (one document).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DiffSyncEntity {
    /// Kind of entity, used to pick the persistence collaborator.
    pub entity_type: String,
    /// Identifier of the entity within its type.
    pub entity_id: String,
}

impl DiffSyncEntity {
    /// Create an entity reference.
    pub fn new(entity_type: impl Into<String>, entity_id: impl Into<String>) -> Self {
        Self {
            entity_type: entity_type.into(),
            entity_id: entity_id.into(),
        }
    }

    /// Key grouping every peer session of this document.
    pub fn key(&self) -> String {
        format!("entity:{}:{}", self.entity_type, self.entity_id)
    }
}

impl fmt::Display for DiffSyncEntity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.key())
    }
}
