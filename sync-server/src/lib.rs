//! # sync-server
//!
//! Session server for Differential Synchronization.
//!
//! This crate is the I/O shell around `sync-core`:
//! - Keeps one [`DiffSync`] session per peer, grouped by entity
//! - Executes the acks and diffs the core produces over a [`Channel`]
//! - Seeds and persists canonical text through a [`SynchronizableService`]
//! - Records applied patches to an [`AuditSink`] in the background
//!
//! ## Architecture
//!
//! ```text
//! Client A ──┐                      ┌── Client B
//!            │      Channel         │
//!            ├─────────────────────►│
//!        ┌───┴──────────────────────┴───┐
//!        │       DiffSyncService        │
//!        │  DiffSyncProvider            │
//!        │   entity ─► text + sessions  │
//!        │  ┌────────────────────────┐  │
//!        │  │ SQLite (documents,     │  │
//!        │  │         patch audit)   │  │
//!        │  └────────────────────────┘  │
//!        └──────────────────────────────┘
//! ```
//!
//! ## Protocol
//!
//! Every message is an [`Envelope`](sync_types::Envelope):
//! - START → session created from stored content
//! - PATCH → ACK per applied edit, then the server's diff as PATCH
//! - ACK → acknowledged diffs pruned
//! - END → peer session closed; last peer persists and tears down

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod channel;
pub mod config;
pub mod error;
pub mod provider;
pub mod server;
pub mod service;
pub mod session;
pub mod storage;

pub use channel::{Channel, MockChannel, MpscChannel};
pub use config::{Config, ConfigError};
pub use error::{ChannelError, ServiceError, StorageError};
pub use provider::{DiffSyncProvider, SharedText};
pub use server::{serve_channel, spawn_serve};
pub use service::DiffSyncService;
pub use session::{DiffSync, SessionSnapshot};
pub use storage::{AuditSink, PatchSummary, SqliteStorage, SynchronizableService};
