//! Content holders that can be diffed and patched.
//!
//! Three variants exist on the server side of a session, each exposing only
//! the version axes it actually tracks:
//!
//! | Variant          | Content | `n` | `m` |
//! |------------------|---------|-----|-----|
//! | [`ServerShadow`] | yes     | yes | yes |
//! | [`ServerBackup`] | yes     | no  | yes |
//! | [`ServerText`]   | yes     | no  | no  |

use diffsync_types::{Hunk, Patch};

use crate::diff::{self, PatchOptions};
use crate::patch::{self, PatchApplication};
use crate::version::Version;

/// Something with textual content that patches can be applied to.
pub trait Patchable {
    /// Current content.
    fn content(&self) -> &str;

    /// Replace the content.
    fn set_content(&mut self, content: String);

    /// Replace the content and return self.
    fn copy_patch(&mut self, content: impl Into<String>) -> &mut Self {
        self.set_content(content.into());
        self
    }

    /// Apply a patch's hunks to the content, best effort.
    fn apply(&mut self, patch: &Patch, options: &PatchOptions) -> PatchApplication {
        let result = patch::apply(&patch.hunks, self.content(), options);
        self.set_content(result.content.clone());
        result
    }

    /// Hunks turning this content into `other`'s.
    fn diff<P: Patchable + ?Sized>(&self, other: &P, options: &PatchOptions) -> Vec<Hunk> {
        diff::diff(self.content(), other.content(), options)
    }
}

/// The server's mirror of what the client last saw.
#[derive(Debug, Clone, Default)]
pub struct ServerShadow {
    content: String,
    n: Version,
    m: Version,
}

impl ServerShadow {
    /// Create a shadow at `n = m = 0`.
    pub fn new(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            n: Version::default(),
            m: Version::default(),
        }
    }

    /// Edits accepted from the client.
    pub fn n(&self) -> i64 {
        self.n.get()
    }

    /// Edits sent to the client.
    pub fn m(&self) -> i64 {
        self.m.get()
    }

    /// `n += 1`, returning the new value.
    pub fn increment_n(&self) -> i64 {
        self.n.increment()
    }

    /// `m += 1`, returning the new value.
    pub fn increment_m(&self) -> i64 {
        self.m.increment()
    }

    /// Overwrite `m`; only used when rolling back to the backup.
    pub fn set_m(&self, m: i64) {
        self.m.set(m);
    }
}

impl Patchable for ServerShadow {
    fn content(&self) -> &str {
        &self.content
    }

    fn set_content(&mut self, content: String) {
        self.content = content;
    }
}

/// Checkpoint of the shadow used to recover from a lost message.
#[derive(Debug, Clone, Default)]
pub struct ServerBackup {
    content: String,
    m: Version,
}

impl ServerBackup {
    /// Create a backup at `m = 0`.
    pub fn new(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            m: Version::default(),
        }
    }

    /// Server edit counter at checkpoint time.
    pub fn m(&self) -> i64 {
        self.m.get()
    }

    /// Record the shadow's `m` at checkpoint time.
    pub fn set_m(&self, m: i64) {
        self.m.set(m);
    }
}

impl Patchable for ServerBackup {
    fn content(&self) -> &str {
        &self.content
    }

    fn set_content(&mut self, content: String) {
        self.content = content;
    }
}

/// The canonical document shared by every peer session of an entity.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ServerText {
    content: String,
}

impl ServerText {
    /// Wrap canonical content.
    pub fn new(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
        }
    }
}

impl Patchable for ServerText {
    fn content(&self) -> &str {
        &self.content
    }

    fn set_content(&mut self, content: String) {
        self.content = content;
    }
}
