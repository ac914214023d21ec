//! Per-peer synchronization session.
//!
//! A [`DiffSync`] wraps the pure [`DiffSyncState`] in a mutex and executes
//! the actions it returns: acks and diffs go out over the session's
//! channel, applied patches are handed to the audit sink on a background
//! task.
//!
//! Lock order is always session state, then shared text.

use crate::channel::Channel;
use crate::error::ServiceError;
use crate::provider::SharedText;
use crate::storage::{AuditSink, PatchSummary};
use std::sync::Arc;
use sync_core::{Action, DiffSyncState, Disposition, PatchOptions, Patchable, PatchReport};
use sync_types::{Ack, DiffSyncEntity, DiffSyncIdentifier, Envelope, Message, Patch, PatchBatch};
use tokio::sync::Mutex;

/// Point-in-time view of a session, for status queries.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionSnapshot {
    /// Peer urn.
    pub urn: String,
    /// Current shadow content.
    pub shadow_content: String,
    /// Client edits accepted.
    pub n: i64,
    /// Server edits sent.
    pub m: i64,
    /// Server edit counter at the last checkpoint.
    pub backup_m: i64,
    /// Outgoing diffs awaiting acknowledgement.
    pub pending_edits: usize,
}

/// One peer's live session.
pub struct DiffSync {
    entity: DiffSyncEntity,
    identifier: DiffSyncIdentifier,
    state: Mutex<DiffSyncState>,
    channel: Arc<dyn Channel>,
    audit: Option<Arc<dyn AuditSink>>,
}

impl std::fmt::Debug for DiffSync {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DiffSync")
            .field("entity", &self.entity)
            .field("identifier", &self.identifier)
            .field("audit", &self.audit.is_some())
            .finish_non_exhaustive()
    }
}

impl DiffSync {
    /// Create a session at `n = m = 0` whose shadow and backup hold `content`.
    pub fn new(
        entity: DiffSyncEntity,
        identifier: DiffSyncIdentifier,
        content: impl Into<String>,
        channel: Arc<dyn Channel>,
        options: PatchOptions,
    ) -> Self {
        let state = DiffSyncState::new(identifier.client_id.clone(), content, options);
        Self {
            entity,
            identifier,
            state: Mutex::new(state),
            channel,
            audit: None,
        }
    }

    /// Record applied patches to `audit`.
    pub fn with_audit(mut self, audit: Arc<dyn AuditSink>) -> Self {
        self.audit = Some(audit);
        self
    }

    /// Entity this session edits.
    pub fn entity(&self) -> &DiffSyncEntity {
        &self.entity
    }

    /// Peer this session talks to.
    pub fn identifier(&self) -> &DiffSyncIdentifier {
        &self.identifier
    }

    /// Registry key of this session.
    pub fn urn(&self) -> String {
        self.identifier.urn()
    }

    /// Apply a batch of client patches to the shadow and `text`, then send
    /// and return the server's diff.
    ///
    /// Acks for patches applied before a fault are still sent.
    pub async fn handle_patch(
        &self,
        patches: &[Patch],
        text: &SharedText,
    ) -> Result<Patch, ServiceError> {
        let mut state = self.state.lock().await;
        let outcome = {
            let mut text = text.lock().await;
            state.handle_patch(patches, &mut text)
        };

        for report in &outcome.reports {
            self.log_report(report);
        }
        for action in outcome.actions {
            self.execute(action).await;
        }

        match outcome.result {
            Ok(diff) => {
                tracing::debug!(
                    "Sent diff to {}: {} hunks, n={} m={}",
                    self.identifier,
                    diff.hunks.len(),
                    diff.n,
                    diff.m
                );
                Ok(diff)
            }
            Err(e) => {
                tracing::warn!("Rejected patch batch from {}: {}", self.identifier, e);
                Err(e.into())
            }
        }
    }

    /// Prune acknowledged diffs. Returns the ack unchanged.
    pub async fn handle_ack(&self, ack: Ack) -> Ack {
        let mut state = self.state.lock().await;
        let pruned = state.handle_ack(&ack);
        tracing::debug!(
            "Ack from {} at m={}: pruned {} edits ({} pending)",
            self.identifier,
            ack.m,
            pruned,
            state.pending_edits().len()
        );
        ack
    }

    /// Current shadow, versions and backlog.
    pub async fn snapshot(&self) -> SessionSnapshot {
        let state = self.state.lock().await;
        SessionSnapshot {
            urn: self.urn(),
            shadow_content: state.shadow().content().to_string(),
            n: state.shadow().n(),
            m: state.shadow().m(),
            backup_m: state.backup().m(),
            pending_edits: state.pending_edits().len(),
        }
    }

    fn log_report(&self, report: &PatchReport) {
        match report.disposition {
            Disposition::Applied => {
                tracing::debug!("Applied patch {} from {}", report.patch_id, self.identifier)
            }
            Disposition::RolledBackAndApplied => tracing::debug!(
                "Rolled back to backup and applied patch {} from {}",
                report.patch_id,
                self.identifier
            ),
            Disposition::Duplicate => tracing::debug!(
                "Skipped duplicate patch {} from {}",
                report.patch_id,
                self.identifier
            ),
            Disposition::RolledBack => tracing::debug!(
                "Rolled back to backup on duplicate patch {} from {}",
                report.patch_id,
                self.identifier
            ),
        }
        if report.dropped_hunks > 0 {
            tracing::warn!(
                "Patch {} from {}: {} hunks could not be placed in {}",
                report.patch_id,
                self.identifier,
                report.dropped_hunks,
                self.entity
            );
        }
    }

    async fn execute(&self, action: Action) {
        match action {
            Action::SendAck(ack) => self.send(Message::Ack(ack)).await,
            Action::SendPatch(patch) => {
                self.send(Message::Patch(PatchBatch {
                    patches: vec![patch],
                }))
                .await
            }
            Action::RecordPatch(patch) => self.record(&patch),
        }
    }

    async fn send(&self, message: Message) {
        let envelope = match Envelope::seal(self.entity.clone(), self.identifier.clone(), &message) {
            Ok(envelope) => envelope,
            Err(e) => {
                tracing::error!("Failed to seal {:?} for {}: {}", message.message_type(), self.identifier, e);
                return;
            }
        };
        if let Err(e) = self.channel.send(envelope).await {
            // The peer resends unacknowledged work; rollback covers the rest.
            tracing::warn!(
                "Failed to send {:?} to {}: {}",
                message.message_type(),
                self.identifier,
                e
            );
        }
    }

    /// Fire-and-forget audit write.
    fn record(&self, patch: &Patch) {
        let Some(audit) = self.audit.clone() else {
            return;
        };
        let summary = match PatchSummary::new(&self.entity, patch) {
            Ok(summary) => summary,
            Err(e) => {
                tracing::error!("Failed to summarize patch {}: {}", patch.id, e);
                return;
            }
        };
        tokio::spawn(async move {
            let patch_id = summary.patch_id;
            if let Err(e) = audit.record(summary).await {
                tracing::error!("Failed to record patch {}: {}", patch_id, e);
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::MockChannel;
    use crate::storage::SqliteStorage;
    use std::time::Duration;
    use sync_core::{diff, ProtocolError};

    fn opts() -> PatchOptions {
        PatchOptions::default()
    }

    fn new_session(content: &str, channel: &MockChannel) -> DiffSync {
        DiffSync::new(
            DiffSyncEntity::new("note", "1"),
            DiffSyncIdentifier::client("alice", "srv"),
            content,
            Arc::new(channel.clone()),
            opts(),
        )
    }

    fn edit(from: &str, to: &str, n: i64, m: i64) -> Patch {
        Patch::new("alice", diff(from, to, &opts()), n, m)
    }

    async fn wait_for_summaries(storage: &SqliteStorage, count: usize) -> Vec<PatchSummary> {
        let entity = DiffSyncEntity::new("note", "1");
        for _ in 0..100 {
            let rows = storage.summaries(&entity).await.unwrap();
            if rows.len() >= count {
                return rows;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        storage.summaries(&entity).await.unwrap()
    }

    #[tokio::test]
    async fn cold_start_snapshot() {
        let channel = MockChannel::new();
        let session = new_session("hello", &channel);

        let snapshot = session.snapshot().await;
        assert_eq!(snapshot.urn, "client:alice:srv");
        assert_eq!(snapshot.shadow_content, "hello");
        assert_eq!((snapshot.n, snapshot.m, snapshot.backup_m), (0, 0, 0));
        assert_eq!(snapshot.pending_edits, 0);
    }

    #[tokio::test]
    async fn patch_sends_ack_then_diff() {
        let channel = MockChannel::new();
        let session = new_session("hello", &channel);
        let text = SharedText::new("hello");

        let diff = session
            .handle_patch(&[edit("hello", "hello world", 0, 0)], &text)
            .await
            .unwrap();

        assert!(diff.is_empty());
        assert_eq!(text.content().await, "hello world");

        let sent = channel.sent_messages();
        assert_eq!(sent.len(), 2);
        assert!(matches!(&sent[0], Message::Ack(ack) if ack.n == 1 && ack.m == 0));
        assert!(matches!(&sent[1], Message::Patch(batch) if batch.patches[0].m == 1));

        let snapshot = session.snapshot().await;
        assert_eq!(snapshot.n, 1);
        assert_eq!(snapshot.pending_edits, 1);
    }

    #[tokio::test]
    async fn sent_envelopes_carry_routing() {
        let channel = MockChannel::new();
        let session = new_session("a", &channel);
        let text = SharedText::new("a");

        session.handle_patch(&[], &text).await.unwrap();

        let envelope = &channel.sent()[0];
        assert_eq!(envelope.entity, DiffSyncEntity::new("note", "1"));
        assert_eq!(envelope.identifier.urn(), "client:alice:srv");
    }

    #[tokio::test]
    async fn failed_send_does_not_block_protocol() {
        let channel = MockChannel::new();
        let session = new_session("hello", &channel);
        let text = SharedText::new("hello");
        channel.fail_next_send("link down");

        let result = session
            .handle_patch(&[edit("hello", "hello!", 0, 0)], &text)
            .await;

        assert!(result.is_ok());
        assert_eq!(text.content().await, "hello!");
        // The ack was lost, the diff went out.
        assert_eq!(channel.sent().len(), 1);
    }

    #[tokio::test]
    async fn rollback_fault_surfaces_after_sending_earlier_acks() {
        let channel = MockChannel::new();
        let session = new_session("a", &channel);
        let text = SharedText::new("a");

        // Backup ends at m=1, shadow at m=2.
        session.handle_patch(&[], &text).await.unwrap();
        session
            .handle_patch(&[edit("a", "ab", 0, 1)], &text)
            .await
            .unwrap();
        let before = channel.sent().len();

        let result = session
            .handle_patch(&[edit("ab", "abc", 1, 2), edit("abc", "abcd", 2, 0)], &text)
            .await;

        assert!(matches!(
            result,
            Err(ServiceError::Protocol(ProtocolError::RollbackImpossible { .. }))
        ));
        assert_eq!(text.content().await, "abc");
        let new_messages = &channel.sent_messages()[before..];
        assert_eq!(new_messages.len(), 1);
        assert!(matches!(&new_messages[0], Message::Ack(ack) if ack.n == 2));
    }

    #[tokio::test]
    async fn ack_prunes_pending_edits() {
        let channel = MockChannel::new();
        let session = new_session("x", &channel);
        let text = SharedText::new("x");

        for _ in 0..3 {
            session.handle_patch(&[], &text).await.unwrap();
        }
        assert_eq!(session.snapshot().await.pending_edits, 3);

        let ack = Ack::new("alice", 0, 2);
        let returned = session.handle_ack(ack.clone()).await;
        assert_eq!(returned, ack);
        assert_eq!(session.snapshot().await.pending_edits, 1);
    }

    #[tokio::test]
    async fn applied_patches_are_audited() {
        let storage = Arc::new(SqliteStorage::in_memory().await.unwrap());
        let channel = MockChannel::new();
        let session = new_session("hello", &channel).with_audit(storage.clone());
        let text = SharedText::new("hello");

        let patch = edit("hello", "hello world", 0, 0);
        session.handle_patch(&[patch.clone()], &text).await.unwrap();
        // Duplicate: not applied, not audited.
        session.handle_patch(&[patch.clone()], &text).await.unwrap();

        let rows = wait_for_summaries(&storage, 1).await;
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].patch_id, patch.id);
        assert_eq!(rows[0].entity_name, "note");
    }

    #[tokio::test]
    async fn audit_failure_does_not_block_protocol() {
        let storage = Arc::new(SqliteStorage::in_memory().await.unwrap());
        storage.close().await;
        let channel = MockChannel::new();
        let session = new_session("hello", &channel).with_audit(storage);
        let text = SharedText::new("hello");

        let result = session
            .handle_patch(&[edit("hello", "hello world", 0, 0)], &text)
            .await;

        assert!(result.is_ok());
        assert_eq!(session.snapshot().await.n, 1);
    }

    #[tokio::test]
    async fn concurrent_batches_are_serialized() {
        let channel = MockChannel::new();
        let session = Arc::new(new_session("", &channel));
        let text = Arc::new(SharedText::new(""));

        let mut handles = Vec::new();
        for _ in 0..8 {
            let session = session.clone();
            let text = text.clone();
            handles.push(tokio::spawn(async move {
                session.handle_patch(&[], &text).await.unwrap().m
            }));
        }
        let mut ms = Vec::new();
        for handle in handles {
            ms.push(handle.await.unwrap());
        }
        ms.sort();

        assert_eq!(ms, (1..=8).collect::<Vec<_>>());
        assert_eq!(session.snapshot().await.m, 8);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn peers_of_one_entity_do_not_lose_updates() {
        let base = "alpha beta gamma delta epsilon zeta";
        for _ in 0..20 {
            let text = Arc::new(SharedText::new(base));
            let mut handles = Vec::new();
            for (client, target) in [
                ("alice", "ALPHA beta gamma delta epsilon zeta"),
                ("bob", "alpha beta gamma delta epsilon zeta omega"),
            ] {
                let session = DiffSync::new(
                    DiffSyncEntity::new("note", "1"),
                    DiffSyncIdentifier::client(client, "srv"),
                    base,
                    Arc::new(MockChannel::new()),
                    opts(),
                );
                let patch = Patch::new(client, diff(base, target, &opts()), 0, 0);
                let text = text.clone();
                handles.push(tokio::spawn(async move {
                    session.handle_patch(&[patch], &text).await.unwrap();
                }));
            }
            for handle in handles {
                handle.await.unwrap();
            }

            assert_eq!(
                text.content().await,
                "ALPHA beta gamma delta epsilon zeta omega"
            );
        }
    }
}
