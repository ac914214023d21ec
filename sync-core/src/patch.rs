//! Best-effort patch application.
//!
//! Each hunk is located in the target text by its source text (context plus
//! deletions), first exactly at the expected offset and then fuzzily nearby.
//! Hunks that cannot be located are dropped and reported as not applied;
//! the remaining hunks still apply.

use diffsync_types::{Edit, Hunk};

use crate::diff::{diff_chars, levenshtein, x_index, PatchOptions, MATCH_MAX_BITS};
use crate::matcher::match_main;

/// Result of applying a list of hunks.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PatchApplication {
    /// The patched text.
    pub content: String,
    /// One flag per hunk: whether it was applied.
    pub applied: Vec<bool>,
}

impl PatchApplication {
    /// Number of hunks that could not be placed.
    pub fn dropped(&self) -> usize {
        self.applied.iter().filter(|ok| !**ok).count()
    }

    /// True when every hunk applied.
    pub fn is_clean(&self) -> bool {
        self.applied.iter().all(|ok| *ok)
    }
}

/// Apply `hunks` to `text`, tolerating drift in the target.
pub fn apply(hunks: &[Hunk], text: &str, options: &PatchOptions) -> PatchApplication {
    if hunks.is_empty() {
        return PatchApplication {
            content: text.to_string(),
            applied: Vec::new(),
        };
    }

    let mut chars: Vec<char> = text.chars().collect();
    let mut applied = Vec::with_capacity(hunks.len());
    // Offset between where hunks expected to land and where they landed.
    let mut delta: i64 = 0;

    for hunk in hunks {
        // Offsets arrive from peers; clamp rather than trust them.
        let expected = signed(hunk.start2)
            .saturating_add(delta)
            .clamp(0, signed(chars.len())) as usize;
        let source: Vec<char> = hunk.source_text().chars().collect();

        let mut end_loc = None;
        let start_loc = if source.len() > MATCH_MAX_BITS {
            // Too long for one bitap pass: match head and tail separately.
            let tail_offset = source.len() - MATCH_MAX_BITS;
            match_main(&chars, &source[..MATCH_MAX_BITS], expected, options).and_then(|start| {
                match match_main(
                    &chars,
                    &source[tail_offset..],
                    expected + tail_offset,
                    options,
                ) {
                    Some(end) if start < end => {
                        end_loc = Some(end);
                        Some(start)
                    }
                    _ => None,
                }
            })
        } else {
            match_main(&chars, &source, expected, options)
        };

        let Some(start) = start_loc else {
            applied.push(false);
            // Lengths come from the edits, not the hunk header.
            let produced = signed(hunk.target_text().chars().count());
            delta = delta.saturating_sub(produced.saturating_sub(signed(source.len())));
            continue;
        };
        delta = start as i64 - expected as i64;

        let window_end = match end_loc {
            Some(end) => (end + MATCH_MAX_BITS).min(chars.len()),
            None => (start + source.len()).min(chars.len()),
        };
        let found = &chars[start..window_end];

        if found == source.as_slice() {
            let target: Vec<char> = hunk.target_text().chars().collect();
            chars.splice(start..window_end, target);
            applied.push(true);
            continue;
        }

        // Imperfect match: map each edit through a diff of what we expected
        // against what we found.
        let drift = diff_chars(&source, found);
        if source.len() > MATCH_MAX_BITS
            && levenshtein(&drift) as f64 / source.len() as f64 > options.delete_threshold
        {
            applied.push(false);
            continue;
        }

        let mut index1 = 0;
        for edit in &hunk.edits {
            let len = edit.char_len();
            match edit {
                Edit::Equal(_) => {}
                Edit::Insert(text) => {
                    let at = (start + x_index(&drift, index1)).min(chars.len());
                    chars.splice(at..at, text.chars());
                }
                Edit::Delete(_) => {
                    let to = (start + x_index(&drift, index1 + len)).min(chars.len());
                    let from = (start + x_index(&drift, index1)).min(to);
                    chars.drain(from..to);
                }
            }
            if !matches!(edit, Edit::Delete(_)) {
                index1 += len;
            }
        }
        applied.push(true);
    }

    PatchApplication {
        content: chars.into_iter().collect(),
        applied,
    }
}

fn signed(value: usize) -> i64 {
    i64::try_from(value).unwrap_or(i64::MAX)
}
