//! Persistence collaborators for sync-server.
//!
//! Two seams: [`SynchronizableService`] owns the authoritative document
//! content per entity type, and [`AuditSink`] keeps a durable record of
//! every applied client patch. [`SqliteStorage`] implements both.

mod sqlite;

pub use sqlite::SqliteStorage;

use crate::error::StorageError;
use async_trait::async_trait;
use sync_types::{DiffSyncEntity, Patch, PatchId};

/// Audit record for one applied client patch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PatchSummary {
    /// Id of the applied patch.
    pub patch_id: PatchId,
    /// Client that sent it.
    pub client_id: String,
    /// Entity the patch was applied to.
    pub entity_id: String,
    /// Entity type.
    pub entity_name: String,
    /// The patch hunks as JSON.
    pub serialized_patches: String,
    /// Client edit counter stamped on the patch.
    pub n: i64,
    /// Server edit counter stamped on the patch.
    pub m: i64,
}

impl PatchSummary {
    /// Summarize `patch` as applied to `entity`.
    pub fn new(entity: &DiffSyncEntity, patch: &Patch) -> Result<Self, StorageError> {
        Ok(Self {
            patch_id: patch.id,
            client_id: patch.client_id.clone(),
            entity_id: entity.entity_id.clone(),
            entity_name: entity.entity_type.clone(),
            serialized_patches: serde_json::to_string(&patch.hunks)?,
            n: patch.n,
            m: patch.m,
        })
    }
}

/// Source of truth for synchronized document content, one per entity type.
#[async_trait]
pub trait SynchronizableService: Send + Sync {
    /// Current authoritative content; empty when the entity has none yet.
    async fn get_entity(&self, entity: &DiffSyncEntity) -> Result<String, StorageError>;

    /// Store updated canonical content.
    async fn persist(&self, entity: &DiffSyncEntity, content: &str) -> Result<(), StorageError>;
}

/// Durable log of applied patches.
#[async_trait]
pub trait AuditSink: Send + Sync {
    /// Append one record.
    async fn record(&self, summary: PatchSummary) -> Result<(), StorageError>;
}
