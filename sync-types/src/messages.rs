//! Protocol messages for Differential Synchronization.
//!
//! These are the payloads that get wrapped in an [`Envelope`](crate::Envelope)
//! for routing across a channel.

use serde::{Deserialize, Serialize};

use crate::{Hunk, MessageType, PatchId, SyncError};

/// All possible protocol messages.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum Message {
    /// Peer begins editing an entity
    Start(Start),
    /// Ordered batch of edits
    Patch(PatchBatch),
    /// Acknowledge received edits
    Ack(Ack),
    /// Peer finished editing
    End(End),
}

impl Message {
    /// Discriminant used for envelope routing.
    pub fn message_type(&self) -> MessageType {
        match self {
            Message::Start(_) => MessageType::Start,
            Message::Patch(_) => MessageType::Patch,
            Message::Ack(_) => MessageType::Ack,
            Message::End(_) => MessageType::End,
        }
    }

    /// Serialize to MessagePack bytes.
    pub fn to_bytes(&self) -> Result<Vec<u8>, SyncError> {
        rmp_serde::to_vec(self).map_err(SyncError::Serialization)
    }

    /// Deserialize from MessagePack bytes.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, SyncError> {
        rmp_serde::from_slice(bytes).map_err(SyncError::Deserialization)
    }
}

/// A set of diff hunks stamped with the versions at creation time.
///
/// `n` counts edits accepted from the client, `m` edits sent by the server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Patch {
    /// Time-ordered unique id
    pub id: PatchId,
    /// Client this patch belongs to
    pub client_id: String,
    /// Ordered diff hunks
    pub hunks: Vec<Hunk>,
    /// Client edit counter at creation
    pub n: i64,
    /// Server edit counter at creation
    pub m: i64,
}

impl Patch {
    /// Create a patch with a fresh id.
    pub fn new(client_id: impl Into<String>, hunks: Vec<Hunk>, n: i64, m: i64) -> Self {
        Self {
            id: PatchId::new(),
            client_id: client_id.into(),
            hunks,
            n,
            m,
        }
    }

    /// True when the patch carries no changes.
    pub fn is_empty(&self) -> bool {
        self.hunks.is_empty()
    }
}

/// Acknowledges that the sender has applied every edit up to `m`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Ack {
    /// Time-ordered unique id
    pub id: PatchId,
    /// Client this ack belongs to
    pub client_id: String,
    /// Client edit counter
    pub n: i64,
    /// Server edit counter
    pub m: i64,
}

impl Ack {
    /// Create an ack with a fresh id.
    pub fn new(client_id: impl Into<String>, n: i64, m: i64) -> Self {
        Self {
            id: PatchId::new(),
            client_id: client_id.into(),
            n,
            m,
        }
    }
}

/// Ordered list of patches processed as one unit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PatchBatch {
    /// Patches in the order they must be applied
    pub patches: Vec<Patch>,
}

/// Sent by a peer that begins editing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Start {
    /// Protocol version spoken by the peer
    pub version: u8,
}

/// Sent by a peer that finished editing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct End {
    /// Optional reason for ending
    pub reason: Option<String>,
}
