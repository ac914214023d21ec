//! Error types for the protocol state machine.

use thiserror::Error;

/// Faults raised while processing inbound patches.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProtocolError {
    /// The sender's base is older than the backup checkpoint.
    ///
    /// The session cannot recover and must be restarted.
    #[error("rollback impossible: patch m={patch_m} is older than backup m={backup_m}")]
    RollbackImpossible {
        /// Server edit counter carried by the offending patch.
        patch_m: i64,
        /// Server edit counter held by the backup.
        backup_m: i64,
    },
}
