//! Registry of live sessions.
//!
//! Two levels: entity key (`entity:type:id`) to the entity's shared
//! canonical text plus its peer sessions, keyed by urn. Peers of one entity
//! are independent sessions; they share the text, not a lock.

use crate::error::StorageError;
use crate::session::DiffSync;
use crate::storage::SynchronizableService;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::sync::Arc;
use sync_core::{Patchable, ServerText};
use sync_types::DiffSyncEntity;
use tokio::sync::{Mutex, MutexGuard};

/// Canonical text of one entity, shared by all its peer sessions.
#[derive(Debug, Default)]
pub struct SharedText {
    text: Mutex<ServerText>,
    /// Serializes writes to the collaborator so they land in order.
    persist: Mutex<()>,
}

impl SharedText {
    /// Wrap initial content.
    pub fn new(content: impl Into<String>) -> Self {
        Self {
            text: Mutex::new(ServerText::new(content)),
            persist: Mutex::new(()),
        }
    }

    /// Exclusive access for patching.
    pub async fn lock(&self) -> MutexGuard<'_, ServerText> {
        self.text.lock().await
    }

    /// Copy of the current content.
    pub async fn content(&self) -> String {
        self.text.lock().await.content().to_string()
    }

    /// Write the current content to `service`.
    ///
    /// Content is read after taking the persist gate, so the last write
    /// always carries the newest text.
    pub async fn persist_to(
        &self,
        entity: &DiffSyncEntity,
        service: &dyn SynchronizableService,
    ) -> Result<(), StorageError> {
        let _gate = self.persist.lock().await;
        let content = self.content().await;
        service.persist(entity, &content).await
    }
}

#[derive(Debug)]
struct EntitySessions {
    text: Arc<SharedText>,
    sessions: DashMap<String, Arc<DiffSync>>,
}

impl EntitySessions {
    fn new(content: String) -> Self {
        Self {
            text: Arc::new(SharedText::new(content)),
            sessions: DashMap::new(),
        }
    }
}

/// Concurrent session registry.
///
/// Created once by the server and handed to the service.
#[derive(Debug, Default)]
pub struct DiffSyncProvider {
    entities: DashMap<String, EntitySessions>,
}

impl DiffSyncProvider {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// The entity's canonical text, created from `content` if the entity
    /// has no live text yet.
    pub fn text_or_insert(&self, entity: &DiffSyncEntity, content: String) -> Arc<SharedText> {
        self.entities
            .entry(entity.key())
            .or_insert_with(|| EntitySessions::new(content))
            .text
            .clone()
    }

    /// The entity's canonical text, if it has live sessions.
    pub fn text(&self, entity: &DiffSyncEntity) -> Option<Arc<SharedText>> {
        self.entities
            .get(&entity.key())
            .map(|entry| entry.text.clone())
    }

    /// Register a session built against `text`, returning the one it
    /// replaced.
    ///
    /// If the entity was torn down since `text` was taken, the entity is
    /// revived around `text`. If the entity now holds a different text the
    /// session's shadow no longer matches it, and the session is handed back
    /// as the error.
    pub fn add(
        &self,
        entity: &DiffSyncEntity,
        urn: impl Into<String>,
        session: Arc<DiffSync>,
        text: &Arc<SharedText>,
    ) -> Result<Option<Arc<DiffSync>>, Arc<DiffSync>> {
        match self.entities.entry(entity.key()) {
            Entry::Occupied(entry) => {
                let current = entry.get();
                if !Arc::ptr_eq(&current.text, text) {
                    return Err(session);
                }
                Ok(current.sessions.insert(urn.into(), session))
            }
            Entry::Vacant(entry) => {
                let sessions = DashMap::new();
                sessions.insert(urn.into(), session);
                entry.insert(EntitySessions {
                    text: text.clone(),
                    sessions,
                });
                Ok(None)
            }
        }
    }

    /// Look up one peer's session.
    pub fn get(&self, entity: &DiffSyncEntity, urn: &str) -> Option<Arc<DiffSync>> {
        self.entities
            .get(&entity.key())
            .and_then(|entry| entry.sessions.get(urn).map(|s| s.clone()))
    }

    /// All peer sessions of an entity.
    pub fn get_by_entity(&self, entity: &DiffSyncEntity) -> Vec<Arc<DiffSync>> {
        self.entities
            .get(&entity.key())
            .map(|entry| entry.sessions.iter().map(|s| s.value().clone()).collect())
            .unwrap_or_default()
    }

    /// True when the peer has a live session for the entity.
    pub fn is_present(&self, entity: &DiffSyncEntity, urn: &str) -> bool {
        self.entities
            .get(&entity.key())
            .is_some_and(|entry| entry.sessions.contains_key(urn))
    }

    /// Drop every peer session of the entity along with its live text.
    ///
    /// Returns the number of sessions removed.
    pub fn remove(&self, entity: &DiffSyncEntity) -> usize {
        self.entities
            .remove(&entity.key())
            .map(|(_, entry)| entry.sessions.len())
            .unwrap_or(0)
    }

    /// Drop one peer's session.
    ///
    /// Returns the number of sessions left, or `None` if the peer had none.
    /// The entity is dropped with its last session.
    pub fn remove_session(&self, entity: &DiffSyncEntity, urn: &str) -> Option<usize> {
        let key = entity.key();
        let remaining = {
            let entry = self.entities.get(&key)?;
            entry.sessions.remove(urn)?;
            entry.sessions.len()
        };
        if remaining == 0 {
            self.entities
                .remove_if(&key, |_, entry| entry.sessions.is_empty());
        }
        Some(remaining)
    }

    /// Number of entities with live sessions.
    pub fn entity_count(&self) -> usize {
        self.entities.len()
    }
}
