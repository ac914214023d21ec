//! Per-session protocol state machine for Differential Synchronization.
//!
//! This module is pure: it mutates the shadow, backup and canonical text it
//! is handed and returns the [`Action`]s (acks and patches to send, patches
//! to audit) for the caller to execute. No I/O happens here.
//!
//! # Version bookkeeping
//!
//! - `n` counts client edits the server has accepted.
//! - `m` counts server edits sent to the client.
//!
//! An inbound patch stamped with `m` lower than the shadow's means the
//! client never received our last output; the shadow is restored from the
//! backup before the patch is applied.

use diffsync_types::{Ack, Patch, PatchId};

use crate::diff::PatchOptions;
use crate::error::ProtocolError;
use crate::patchable::{Patchable, ServerBackup, ServerShadow, ServerText};

/// Side effects requested by the state machine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Action {
    /// Acknowledge an applied client patch.
    SendAck(Ack),
    /// Send the server's outgoing diff.
    SendPatch(Patch),
    /// Record an applied client patch in the audit log.
    RecordPatch(Patch),
}

/// What happened to one inbound patch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    /// New edit, applied.
    Applied,
    /// Shadow restored from backup, then the edit applied.
    RolledBackAndApplied,
    /// Retransmission of an edit already applied.
    Duplicate,
    /// Shadow restored from backup; the edit itself was a retransmission.
    RolledBack,
}

/// Record of one processed inbound patch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PatchReport {
    /// Id of the inbound patch.
    pub patch_id: PatchId,
    /// What was done with it.
    pub disposition: Disposition,
    /// Hunks that could not be placed in the canonical text.
    pub dropped_hunks: usize,
}

/// Outcome of one [`DiffSyncState::handle_patch`] call.
///
/// `actions` holds everything produced before a fault too, so acks for
/// patches applied earlier in a failing batch still go out.
#[derive(Debug, Clone)]
pub struct BatchOutcome {
    /// Side effects to execute, in order.
    pub actions: Vec<Action>,
    /// Per-patch reports, in batch order.
    pub reports: Vec<PatchReport>,
    /// The outgoing diff, or the fault that aborted the batch.
    pub result: Result<Patch, ProtocolError>,
}

/// Server-side state of one peer session.
#[derive(Debug, Clone)]
pub struct DiffSyncState {
    client_id: String,
    shadow: ServerShadow,
    backup: ServerBackup,
    /// Outgoing diffs not yet acknowledged by the client.
    edits: Vec<Patch>,
    options: PatchOptions,
}

impl DiffSyncState {
    /// Fresh session state at `n = m = 0`, seeded with `content`.
    pub fn new(client_id: impl Into<String>, content: impl Into<String>, options: PatchOptions) -> Self {
        let content = content.into();
        Self {
            client_id: client_id.into(),
            backup: ServerBackup::new(content.clone()),
            shadow: ServerShadow::new(content),
            edits: Vec::new(),
            options,
        }
    }

    /// Client this session belongs to.
    pub fn client_id(&self) -> &str {
        &self.client_id
    }

    /// The server's mirror of the client.
    pub fn shadow(&self) -> &ServerShadow {
        &self.shadow
    }

    /// The rollback checkpoint.
    pub fn backup(&self) -> &ServerBackup {
        &self.backup
    }

    /// Outgoing diffs awaiting acknowledgement.
    pub fn pending_edits(&self) -> &[Patch] {
        &self.edits
    }

    /// Engine options used for diffing and patching.
    pub fn options(&self) -> &PatchOptions {
        &self.options
    }

    /// Process a batch of inbound patches in order, then diff the shadow
    /// against the canonical text to produce the outgoing patch.
    ///
    /// A patch whose base predates the backup aborts the batch with
    /// [`ProtocolError::RollbackImpossible`]; that patch leaves the shadow,
    /// backup and text untouched.
    pub fn handle_patch(&mut self, patches: &[Patch], text: &mut ServerText) -> BatchOutcome {
        let mut actions = Vec::new();
        let mut reports = Vec::with_capacity(patches.len());

        for patch in patches {
            match self.receive(patch, text, &mut actions) {
                Ok(report) => reports.push(report),
                Err(err) => {
                    return BatchOutcome {
                        actions,
                        reports,
                        result: Err(err),
                    }
                }
            }
        }

        let hunks = self.shadow.diff(text, &self.options);
        let m = self.shadow.increment_m();
        let outgoing = Patch::new(self.client_id.clone(), hunks, self.shadow.n(), m);
        // Once sent, the client is expected to hold the canonical content.
        self.shadow.copy_patch(text.content());
        self.edits.push(outgoing.clone());
        actions.push(Action::SendPatch(outgoing.clone()));

        BatchOutcome {
            actions,
            reports,
            result: Ok(outgoing),
        }
    }

    /// Drop acknowledged diffs, keeping those with `m > ack.m`.
    ///
    /// Returns the number of diffs pruned.
    pub fn handle_ack(&mut self, ack: &Ack) -> usize {
        let before = self.edits.len();
        self.edits.retain(|patch| patch.m > ack.m);
        before - self.edits.len()
    }

    fn receive(
        &mut self,
        patch: &Patch,
        text: &mut ServerText,
        actions: &mut Vec<Action>,
    ) -> Result<PatchReport, ProtocolError> {
        let mut rolled_back = false;
        if patch.m < self.shadow.m() {
            // After a rollback the shadow sits at the backup's m; anything
            // older than that cannot be recovered.
            if patch.m < self.backup.m() {
                return Err(ProtocolError::RollbackImpossible {
                    patch_m: patch.m,
                    backup_m: self.backup.m(),
                });
            }
            self.rollback();
            rolled_back = true;
        }

        if patch.n < self.shadow.n() {
            return Ok(PatchReport {
                patch_id: patch.id,
                disposition: if rolled_back {
                    Disposition::RolledBack
                } else {
                    Disposition::Duplicate
                },
                dropped_hunks: 0,
            });
        }

        let dropped_hunks = self.accept(patch, text, actions);
        Ok(PatchReport {
            patch_id: patch.id,
            disposition: if rolled_back {
                Disposition::RolledBackAndApplied
            } else {
                Disposition::Applied
            },
            dropped_hunks,
        })
    }

    fn accept(&mut self, patch: &Patch, text: &mut ServerText, actions: &mut Vec<Action>) -> usize {
        self.shadow.apply(patch, &self.options);
        let n = self.shadow.increment_n();
        let applied = text.apply(patch, &self.options);

        self.backup.copy_patch(self.shadow.content());
        self.backup.set_m(self.shadow.m());

        actions.push(Action::SendAck(Ack::new(
            self.client_id.clone(),
            n,
            self.shadow.m(),
        )));
        actions.push(Action::RecordPatch(patch.clone()));
        applied.dropped()
    }

    fn rollback(&mut self) {
        self.shadow.copy_patch(self.backup.content());
        self.shadow.set_m(self.backup.m());
        self.edits.clear();
    }
}
