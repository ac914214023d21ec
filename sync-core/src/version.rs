//! Edit counters for Differential Synchronization.
//!
//! Each session carries two of these: `n` counts edits accepted from the
//! client and `m` counts edits the server produced for it.

use std::cmp::Ordering;
use std::fmt;
use std::sync::atomic::{AtomicI64, Ordering as AtomicOrdering};

/// A monotonically increasing counter with atomic reads and writes.
///
/// Individual reads and writes are atomic, but a read followed by a write
/// is not: callers that increment must hold the session's exclusion.
#[derive(Default)]
pub struct Version(AtomicI64);

impl Version {
    /// Create a version at the given value.
    pub fn new(value: i64) -> Self {
        Self(AtomicI64::new(value))
    }

    /// Current value.
    pub fn get(&self) -> i64 {
        self.0.load(AtomicOrdering::SeqCst)
    }

    /// Replace the current value.
    pub fn set(&self, value: i64) {
        self.0.store(value, AtomicOrdering::SeqCst);
    }

    /// Add one and return the new value.
    pub fn increment(&self) -> i64 {
        self.0.fetch_add(1, AtomicOrdering::SeqCst) + 1
    }
}

impl Clone for Version {
    fn clone(&self) -> Self {
        Self::new(self.get())
    }
}

impl PartialEq for Version {
    fn eq(&self, other: &Self) -> bool {
        self.get() == other.get()
    }
}

impl Eq for Version {}

impl PartialOrd for Version {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Version {
    fn cmp(&self, other: &Self) -> Ordering {
        self.get().cmp(&other.get())
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.get())
    }
}

impl fmt::Debug for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Version({})", self.get())
    }
}
