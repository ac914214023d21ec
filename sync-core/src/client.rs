//! Client half of Differential Synchronization.
//!
//! A [`ClientDocument`] owns the user's working text plus a shadow of what
//! the server last saw. Edits flow out as stamped patches that stay queued
//! until acknowledged, so a lost message is covered by resending the queue.
//!
//! ```text
//! edit() ──► make_patches() ──► server
//!                                 │
//! receive_ack() ◄─── Ack ─────────┤
//! receive_patch() ◄── diff Patch ─┘ ──► Ack ──► server
//! ```

use diffsync_types::{Ack, Patch};

use crate::diff::{self, PatchOptions};
use crate::patch;

/// Client-side document state for one session.
#[derive(Debug, Clone)]
pub struct ClientDocument {
    client_id: String,
    text: String,
    shadow: String,
    /// Edits this client has produced.
    n: i64,
    /// Server edits this client has applied.
    m: i64,
    /// Patches sent but not yet acknowledged.
    pending: Vec<Patch>,
    options: PatchOptions,
}

impl ClientDocument {
    /// Start from content fetched at session start (`n = m = 0`).
    pub fn new(client_id: impl Into<String>, content: impl Into<String>, options: PatchOptions) -> Self {
        let content = content.into();
        Self {
            client_id: client_id.into(),
            shadow: content.clone(),
            text: content,
            n: 0,
            m: 0,
            pending: Vec::new(),
            options,
        }
    }

    /// Client this document belongs to.
    pub fn client_id(&self) -> &str {
        &self.client_id
    }

    /// The user's working text.
    pub fn content(&self) -> &str {
        &self.text
    }

    /// What the server is believed to hold for this client.
    pub fn shadow(&self) -> &str {
        &self.shadow
    }

    /// Client edit counter.
    pub fn n(&self) -> i64 {
        self.n
    }

    /// Server edit counter.
    pub fn m(&self) -> i64 {
        self.m
    }

    /// Patches awaiting acknowledgement.
    pub fn pending(&self) -> &[Patch] {
        &self.pending
    }

    /// Replace the working text with a local edit.
    pub fn edit(&mut self, content: impl Into<String>) {
        self.text = content.into();
    }

    /// Capture local changes as a patch and return every unacknowledged
    /// patch, oldest first, for sending.
    pub fn make_patches(&mut self) -> Vec<Patch> {
        let hunks = diff::diff(&self.shadow, &self.text, &self.options);
        if !hunks.is_empty() {
            self.pending
                .push(Patch::new(self.client_id.clone(), hunks, self.n, self.m));
            self.n += 1;
            self.shadow = self.text.clone();
        }
        self.pending.clone()
    }

    /// Drop patches the server has accepted (`patch.n < ack.n`).
    pub fn receive_ack(&mut self, ack: &Ack) {
        self.pending.retain(|patch| patch.n >= ack.n);
    }

    /// Apply the server's diff and acknowledge it.
    ///
    /// A diff already applied (`m` not ahead of ours) is only acknowledged.
    pub fn receive_patch(&mut self, patch: &Patch) -> Ack {
        self.pending.retain(|pending| pending.n >= patch.n);
        if patch.m > self.m {
            self.shadow = patch::apply(&patch.hunks, &self.shadow, &self.options).content;
            self.text = patch::apply(&patch.hunks, &self.text, &self.options).content;
            self.m = patch.m;
        }
        Ack::new(self.client_id.clone(), self.n, self.m)
    }
}
