//! # sync-types
//!
//! Wire format types for the Differential Synchronization protocol.
//!
//! This crate provides the foundational values exchanged between peers:
//! - [`PatchId`], [`DiffSyncIdentifier`], [`DiffSyncEntity`] - Identity types
//! - [`Patch`], [`Ack`] - The protocol's edit and acknowledgement units
//! - [`Hunk`], [`Edit`] - Diff operations carried inside a patch
//! - [`Envelope`], [`Message`] - Routable wrapper with a [`MessageType`] discriminant
//! - [`SyncError`] - Error types

#![warn(missing_docs)]
#![warn(clippy::all)]

mod edits;
mod envelope;
mod error;
mod ids;
mod messages;

pub use edits::{Edit, Hunk};
pub use envelope::{Envelope, MessageType, PROTOCOL_VERSION};
pub use error::SyncError;
pub use ids::{DiffSyncEntity, DiffSyncIdentifier, PatchId, PeerKind};
pub use messages::{Ack, End, Message, Patch, PatchBatch, Start};
