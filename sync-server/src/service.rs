//! Session lifecycle orchestration.
//!
//! [`DiffSyncService`] binds the registry to the persistence collaborators:
//! it seeds sessions from stored content, routes patches and acks to the
//! right session, and writes the canonical text back after every batch.

use crate::channel::Channel;
use crate::error::{Result, ServiceError};
use crate::provider::{DiffSyncProvider, SharedText};
use crate::session::{DiffSync, SessionSnapshot};
use crate::storage::{AuditSink, SynchronizableService};
use dashmap::DashMap;
use std::sync::Arc;
use sync_core::PatchOptions;
use sync_types::{
    Ack, DiffSyncEntity, DiffSyncIdentifier, Envelope, Message, Patch, SyncError, PROTOCOL_VERSION,
};

/// Entry point for all session operations.
pub struct DiffSyncService {
    provider: Arc<DiffSyncProvider>,
    /// Persistence collaborator per entity type.
    services: DashMap<String, Arc<dyn SynchronizableService>>,
    audit: Option<Arc<dyn AuditSink>>,
    options: PatchOptions,
}

impl std::fmt::Debug for DiffSyncService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DiffSyncService")
            .field("provider", &self.provider)
            .field("entity_types", &self.services.len())
            .field("audit", &self.audit.is_some())
            .field("options", &self.options)
            .finish()
    }
}

impl DiffSyncService {
    /// Create a service over an existing registry.
    pub fn new(provider: Arc<DiffSyncProvider>, options: PatchOptions) -> Self {
        Self {
            provider,
            services: DashMap::new(),
            audit: None,
            options,
        }
    }

    /// Record every applied client patch to `audit`.
    pub fn with_audit(mut self, audit: Arc<dyn AuditSink>) -> Self {
        self.audit = Some(audit);
        self
    }

    /// Bind the persistence collaborator for an entity type.
    pub fn register(&self, entity_type: impl Into<String>, service: Arc<dyn SynchronizableService>) {
        let entity_type = entity_type.into();
        tracing::debug!("Registered synchronizable service for {}", entity_type);
        self.services.insert(entity_type, service);
    }

    /// The session registry.
    pub fn provider(&self) -> &DiffSyncProvider {
        &self.provider
    }

    /// Open a session for `identifier` on `entity`.
    ///
    /// The first session of an entity loads the stored content as the
    /// canonical text; later sessions join the live text. An existing
    /// session for the same peer is replaced.
    pub async fn start(
        &self,
        entity: &DiffSyncEntity,
        channel: Arc<dyn Channel>,
        identifier: &DiffSyncIdentifier,
    ) -> Result<Arc<DiffSync>> {
        let service = self.collaborator(entity)?;
        loop {
            let text = match self.provider.text(entity) {
                Some(text) => text,
                None => {
                    let stored = service.get_entity(entity).await?;
                    self.provider.text_or_insert(entity, stored)
                }
            };

            let mut session = DiffSync::new(
                entity.clone(),
                identifier.clone(),
                text.content().await,
                channel.clone(),
                self.options,
            );
            if let Some(audit) = &self.audit {
                session = session.with_audit(audit.clone());
            }
            let session = Arc::new(session);

            match self
                .provider
                .add(entity, identifier.urn(), session.clone(), &text)
            {
                Ok(Some(_)) => tracing::info!("Restarted session {} on {}", identifier, entity),
                Ok(None) => tracing::info!("Started session {} on {}", identifier, entity),
                Err(_) => {
                    // Entity was torn down and restarted under us.
                    tracing::debug!("Canonical text of {} replaced, retrying start", entity);
                    continue;
                }
            }
            return Ok(session);
        }
    }

    /// Apply a batch of patches from `identifier` and return the server's
    /// diff. The canonical text is persisted in the background.
    pub async fn sync_patch(
        &self,
        entity: &DiffSyncEntity,
        patches: &[Patch],
        identifier: &DiffSyncIdentifier,
    ) -> Result<Patch> {
        let service = self.collaborator(entity)?;
        let session = self.session(entity, identifier)?;
        let text = self
            .provider
            .text(entity)
            .ok_or_else(|| session_not_found(entity, identifier))?;

        let result = session.handle_patch(patches, &text).await;
        // Earlier patches of a failed batch still changed the text.
        spawn_persist(entity.clone(), text, service);
        result
    }

    /// Hand an ack to the peer's session.
    pub async fn sync_ack(
        &self,
        entity: &DiffSyncEntity,
        identifier: &DiffSyncIdentifier,
        ack: Ack,
    ) -> Result<Ack> {
        let session = self.session(entity, identifier)?;
        Ok(session.handle_ack(ack).await)
    }

    /// Close one peer's session. The entity is torn down with its last peer.
    ///
    /// Returns false if the peer had no session.
    pub async fn leave(&self, entity: &DiffSyncEntity, identifier: &DiffSyncIdentifier) -> bool {
        let text = self.provider.text(entity);
        match self.provider.remove_session(entity, &identifier.urn()) {
            None => false,
            Some(remaining) => {
                tracing::info!(
                    "Ended session {} on {} ({} remaining)",
                    identifier,
                    entity,
                    remaining
                );
                if remaining == 0 {
                    if let Some(text) = text {
                        self.flush(entity, &text).await;
                    }
                }
                true
            }
        }
    }

    /// Tear down every session of `entity`, writing the canonical text one
    /// last time. Idempotent.
    ///
    /// Returns the number of sessions removed.
    pub async fn end(&self, entity: &DiffSyncEntity) -> usize {
        let Some(text) = self.provider.text(entity) else {
            return 0;
        };
        self.flush(entity, &text).await;
        let removed = self.provider.remove(entity);
        tracing::info!("Ended {} sessions on {}", removed, entity);
        removed
    }

    /// Snapshots of every live session of `entity`.
    pub async fn sessions(&self, entity: &DiffSyncEntity) -> Vec<SessionSnapshot> {
        let mut snapshots = Vec::new();
        for session in self.provider.get_by_entity(entity) {
            snapshots.push(session.snapshot().await);
        }
        snapshots.sort_by(|a, b| a.urn.cmp(&b.urn));
        snapshots
    }

    /// Route one inbound envelope. Replies go out over the session's
    /// channel; `channel` is bound to the session on START.
    pub async fn dispatch(&self, envelope: Envelope, channel: Arc<dyn Channel>) -> Result<()> {
        let message = envelope.open()?;
        let entity = &envelope.entity;
        let identifier = &envelope.identifier;

        match message {
            Message::Start(start) => {
                if start.version != PROTOCOL_VERSION {
                    return Err(SyncError::UnsupportedVersion(start.version).into());
                }
                self.start(entity, channel, identifier).await?;
            }
            Message::Patch(batch) => {
                self.sync_patch(entity, &batch.patches, identifier).await?;
            }
            Message::Ack(ack) => {
                self.sync_ack(entity, identifier, ack).await?;
            }
            Message::End(end) => {
                if let Some(reason) = &end.reason {
                    tracing::debug!("{} leaving {}: {}", identifier, entity, reason);
                }
                self.leave(entity, identifier).await;
            }
        }
        Ok(())
    }

    fn collaborator(&self, entity: &DiffSyncEntity) -> Result<Arc<dyn SynchronizableService>> {
        self.services
            .get(&entity.entity_type)
            .map(|s| s.clone())
            .ok_or_else(|| ServiceError::ProviderNotRegistered {
                entity_type: entity.entity_type.clone(),
            })
    }

    fn session(&self, entity: &DiffSyncEntity, identifier: &DiffSyncIdentifier) -> Result<Arc<DiffSync>> {
        self.provider
            .get(entity, &identifier.urn())
            .ok_or_else(|| session_not_found(entity, identifier))
    }

    async fn flush(&self, entity: &DiffSyncEntity, text: &SharedText) {
        let Ok(service) = self.collaborator(entity) else {
            return;
        };
        if let Err(e) = text.persist_to(entity, service.as_ref()).await {
            tracing::error!("Failed to persist {} on teardown: {}", entity, e);
        }
    }
}

fn session_not_found(entity: &DiffSyncEntity, identifier: &DiffSyncIdentifier) -> ServiceError {
    ServiceError::SessionNotFound {
        entity: entity.key(),
        urn: identifier.urn(),
    }
}

/// Fire-and-forget write of the canonical text.
fn spawn_persist(
    entity: DiffSyncEntity,
    text: Arc<SharedText>,
    service: Arc<dyn SynchronizableService>,
) {
    tokio::spawn(async move {
        match text.persist_to(&entity, service.as_ref()).await {
            Ok(()) => tracing::debug!("Persisted {}", entity),
            Err(e) => tracing::error!("Failed to persist {}: {}", entity, e),
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::MockChannel;
    use crate::storage::SqliteStorage;
    use std::time::Duration;
    use sync_core::{diff, ProtocolError};
    use sync_types::{End, PatchBatch, Start};

    fn note() -> DiffSyncEntity {
        DiffSyncEntity::new("note", "1")
    }

    fn alice() -> DiffSyncIdentifier {
        DiffSyncIdentifier::client("alice", "srv")
    }

    fn bob() -> DiffSyncIdentifier {
        DiffSyncIdentifier::client("bob", "srv")
    }

    fn edit(from: &str, to: &str, n: i64, m: i64) -> Patch {
        Patch::new("alice", diff(from, to, &PatchOptions::default()), n, m)
    }

    async fn service_with(content: &str) -> (DiffSyncService, Arc<SqliteStorage>) {
        let storage = Arc::new(SqliteStorage::in_memory().await.unwrap());
        storage.persist(&note(), content).await.unwrap();
        let service = DiffSyncService::new(Arc::new(DiffSyncProvider::new()), PatchOptions::default());
        service.register("note", storage.clone());
        (service, storage)
    }

    async fn wait_for_content(storage: &SqliteStorage, expected: &str) -> String {
        for _ in 0..100 {
            let content = storage.get_entity(&note()).await.unwrap();
            if content == expected {
                return content;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        storage.get_entity(&note()).await.unwrap()
    }

    #[tokio::test]
    async fn start_seeds_from_stored_content() {
        let (service, _storage) = service_with("hello").await;

        let session = service
            .start(&note(), Arc::new(MockChannel::new()), &alice())
            .await
            .unwrap();

        let snapshot = session.snapshot().await;
        assert_eq!(snapshot.shadow_content, "hello");
        assert_eq!((snapshot.n, snapshot.m), (0, 0));
        assert!(service.provider().is_present(&note(), &alice().urn()));
    }

    #[tokio::test]
    async fn start_without_collaborator_fails() {
        let service = DiffSyncService::new(Arc::new(DiffSyncProvider::new()), PatchOptions::default());

        let result = service
            .start(&note(), Arc::new(MockChannel::new()), &alice())
            .await;

        assert!(matches!(
            result,
            Err(ServiceError::ProviderNotRegistered { entity_type }) if entity_type == "note"
        ));
        assert_eq!(service.provider().entity_count(), 0);
    }

    #[tokio::test]
    async fn sync_without_session_fails() {
        let (service, _storage) = service_with("hello").await;

        let patch = service.sync_patch(&note(), &[], &alice()).await;
        assert!(matches!(patch, Err(ServiceError::SessionNotFound { .. })));

        let ack = service.sync_ack(&note(), &alice(), Ack::new("alice", 0, 0)).await;
        assert!(matches!(ack, Err(ServiceError::SessionNotFound { .. })));
    }

    #[tokio::test]
    async fn sync_patch_applies_and_persists() {
        let (service, storage) = service_with("hello").await;
        service
            .start(&note(), Arc::new(MockChannel::new()), &alice())
            .await
            .unwrap();

        let diff = service
            .sync_patch(&note(), &[edit("hello", "hello world", 0, 0)], &alice())
            .await
            .unwrap();

        assert!(diff.is_empty());
        assert_eq!(wait_for_content(&storage, "hello world").await, "hello world");
    }

    #[tokio::test]
    async fn rollback_fault_is_surfaced() {
        let (service, _storage) = service_with("a").await;
        service
            .start(&note(), Arc::new(MockChannel::new()), &alice())
            .await
            .unwrap();
        service.sync_patch(&note(), &[], &alice()).await.unwrap();
        service
            .sync_patch(&note(), &[edit("a", "ab", 0, 1)], &alice())
            .await
            .unwrap();

        let result = service
            .sync_patch(&note(), &[edit("ab", "abc", 1, 0)], &alice())
            .await;

        assert!(matches!(
            result,
            Err(ServiceError::Protocol(ProtocolError::RollbackImpossible { patch_m: 0, backup_m: 1 }))
        ));
    }

    #[tokio::test]
    async fn second_peer_joins_live_text() {
        let (service, storage) = service_with("hello").await;
        service
            .start(&note(), Arc::new(MockChannel::new()), &alice())
            .await
            .unwrap();
        service
            .sync_patch(&note(), &[edit("hello", "hello world", 0, 0)], &alice())
            .await
            .unwrap();
        // Stored content may lag; the new peer must see the live text.
        storage.persist(&note(), "stale").await.unwrap();

        let session = service
            .start(&note(), Arc::new(MockChannel::new()), &bob())
            .await
            .unwrap();

        assert_eq!(session.snapshot().await.shadow_content, "hello world");
        assert_eq!(service.sessions(&note()).await.len(), 2);
    }

    #[tokio::test]
    async fn edits_reach_other_peers_through_their_diff() {
        let (service, _storage) = service_with("hello").await;
        let bob_channel = MockChannel::new();
        service
            .start(&note(), Arc::new(MockChannel::new()), &alice())
            .await
            .unwrap();
        service
            .start(&note(), Arc::new(bob_channel.clone()), &bob())
            .await
            .unwrap();

        service
            .sync_patch(&note(), &[edit("hello", "hello world", 0, 0)], &alice())
            .await
            .unwrap();
        let diff = service.sync_patch(&note(), &[], &bob()).await.unwrap();

        assert!(!diff.is_empty());
        assert!(matches!(
            bob_channel.sent_messages().last(),
            Some(Message::Patch(PatchBatch { patches })) if patches[0].id == diff.id
        ));
    }

    #[tokio::test]
    async fn sync_ack_returns_ack() {
        let (service, _storage) = service_with("x").await;
        service
            .start(&note(), Arc::new(MockChannel::new()), &alice())
            .await
            .unwrap();
        service.sync_patch(&note(), &[], &alice()).await.unwrap();

        let ack = Ack::new("alice", 0, 1);
        let returned = service.sync_ack(&note(), &alice(), ack.clone()).await.unwrap();

        assert_eq!(returned, ack);
        assert_eq!(service.sessions(&note()).await[0].pending_edits, 0);
    }

    #[tokio::test]
    async fn end_is_idempotent_and_persists() {
        let (service, storage) = service_with("hello").await;
        for peer in [alice(), bob()] {
            service
                .start(&note(), Arc::new(MockChannel::new()), &peer)
                .await
                .unwrap();
        }
        service
            .sync_patch(&note(), &[edit("hello", "hello!", 0, 0)], &alice())
            .await
            .unwrap();

        assert_eq!(service.end(&note()).await, 2);
        assert_eq!(storage.get_entity(&note()).await.unwrap(), "hello!");
        assert_eq!(service.end(&note()).await, 0);
        assert!(service.sessions(&note()).await.is_empty());
    }

    #[tokio::test]
    async fn leave_tears_down_with_last_peer() {
        let (service, _storage) = service_with("hello").await;
        for peer in [alice(), bob()] {
            service
                .start(&note(), Arc::new(MockChannel::new()), &peer)
                .await
                .unwrap();
        }

        assert!(service.leave(&note(), &alice()).await);
        assert!(service.provider().text(&note()).is_some());
        assert!(!service.leave(&note(), &alice()).await);
        assert!(service.leave(&note(), &bob()).await);
        assert!(service.provider().text(&note()).is_none());
    }

    #[tokio::test]
    async fn dispatch_routes_messages() {
        let (service, storage) = service_with("hello").await;
        let channel = MockChannel::new();
        let seal = |message: Message| Envelope::seal(note(), alice(), &message).unwrap();

        service
            .dispatch(
                seal(Message::Start(Start {
                    version: PROTOCOL_VERSION,
                })),
                Arc::new(channel.clone()),
            )
            .await
            .unwrap();
        service
            .dispatch(
                seal(Message::Patch(PatchBatch {
                    patches: vec![edit("hello", "hello there", 0, 0)],
                })),
                Arc::new(channel.clone()),
            )
            .await
            .unwrap();
        service
            .dispatch(seal(Message::Ack(Ack::new("alice", 1, 1))), Arc::new(channel.clone()))
            .await
            .unwrap();

        let snapshots = service.sessions(&note()).await;
        let snapshot = &snapshots[0];
        assert_eq!((snapshot.n, snapshot.m, snapshot.pending_edits), (1, 1, 0));
        assert_eq!(channel.sent().len(), 2);

        service
            .dispatch(seal(Message::End(End { reason: None })), Arc::new(channel.clone()))
            .await
            .unwrap();
        assert_eq!(service.provider().entity_count(), 0);
        assert_eq!(storage.get_entity(&note()).await.unwrap(), "hello there");
    }

    #[tokio::test]
    async fn dispatch_rejects_unknown_protocol_version() {
        let (service, _storage) = service_with("").await;
        let envelope = Envelope::seal(note(), alice(), &Message::Start(Start { version: 99 })).unwrap();

        let result = service.dispatch(envelope, Arc::new(MockChannel::new())).await;

        assert!(matches!(
            result,
            Err(ServiceError::Codec(SyncError::UnsupportedVersion(99)))
        ));
    }

    #[tokio::test]
    async fn joining_peer_keeps_text_when_last_peer_leaves_first() {
        let (service, storage) = service_with("hello").await;
        service
            .start(&note(), Arc::new(MockChannel::new()), &alice())
            .await
            .unwrap();

        // Bob's session is built against the live text, then alice leaves
        // before bob is registered.
        let text = service.provider().text(&note()).unwrap();
        let bob_session = Arc::new(DiffSync::new(
            note(),
            bob(),
            text.content().await,
            Arc::new(MockChannel::new()),
            PatchOptions::default(),
        ));
        assert!(service.leave(&note(), &alice()).await);
        service
            .provider()
            .add(&note(), bob().urn(), bob_session, &text)
            .unwrap();

        assert_eq!(service.provider().text(&note()).unwrap().content().await, "hello");
        service
            .sync_patch(&note(), &[edit("hello", "hello!", 0, 0)], &bob())
            .await
            .unwrap();
        assert_eq!(wait_for_content(&storage, "hello!").await, "hello!");
    }
}
