//! # sync-core
//!
//! Pure logic for Differential Synchronization (no I/O, instant tests).
//!
//! This crate implements the diff/patch engine and the per-session
//! synchronization state machine without any network or disk I/O.
//!
//! ## Design Philosophy
//!
//! Everything here is **pure**: [`DiffSyncState::handle_patch`] takes a batch
//! of patches plus the canonical text and returns the [`Action`]s to perform.
//! This enables:
//! - Instant unit tests (no mocks, no async)
//! - Deterministic behavior (same input → same output)
//! - Easy reasoning about rollback and duplicate handling
//!
//! Sending acks, sending diffs and recording audit entries is done by
//! `sync-server`, which interprets the actions produced here.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod client;
pub mod diff;
pub mod error;
mod matcher;
pub mod patch;
pub mod patchable;
pub mod state;
pub mod version;

pub use client::ClientDocument;
pub use diff::{diff, PatchOptions, MATCH_MAX_BITS};
pub use error::ProtocolError;
pub use patch::{apply, PatchApplication};
pub use patchable::{Patchable, ServerBackup, ServerShadow, ServerText};
pub use state::{Action, BatchOutcome, DiffSyncState, Disposition, PatchReport};
pub use version::Version;
