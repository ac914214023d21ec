//! Diff operations carried inside a [`Patch`](crate::Patch).
//!
//! Offsets and lengths are counted in Unicode scalar values (chars), not
//! bytes, so a hunk can be applied to any valid UTF-8 string.

use serde::{Deserialize, Serialize};

/// One diff operation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Edit {
    /// Text present in both source and target.
    Equal(String),
    /// Text only present in the target.
    Insert(String),
    /// Text only present in the source.
    Delete(String),
}

impl Edit {
    /// The text carried by this operation.
    pub fn text(&self) -> &str {
        match self {
            Edit::Equal(s) | Edit::Insert(s) | Edit::Delete(s) => s,
        }
    }

    /// Length of the carried text in chars.
    pub fn char_len(&self) -> usize {
        self.text().chars().count()
    }

    /// Whether this operation changes anything.
    pub fn is_change(&self) -> bool {
        !matches!(self, Edit::Equal(_))
    }
}

/// A localized group of edits surrounded by `Equal` context.
///
/// `start1`/`length1` address the source text, `start2`/`length2` the
/// text as it looks once the preceding hunks of the same patch applied.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Hunk {
    /// Char offset in the source text.
    pub start1: usize,
    /// Char offset in the target text.
    pub start2: usize,
    /// Chars consumed from the source (equal + delete).
    pub length1: usize,
    /// Chars produced in the target (equal + insert).
    pub length2: usize,
    /// Ordered operations, beginning and ending with context where available.
    pub edits: Vec<Edit>,
}

impl Hunk {
    /// Source text this hunk expects to find (equal + delete).
    pub fn source_text(&self) -> String {
        self.edits
            .iter()
            .filter(|e| !matches!(e, Edit::Insert(_)))
            .map(Edit::text)
            .collect()
    }

    /// Text this hunk produces (equal + insert).
    pub fn target_text(&self) -> String {
        self.edits
            .iter()
            .filter(|e| !matches!(e, Edit::Delete(_)))
            .map(Edit::text)
            .collect()
    }
}
