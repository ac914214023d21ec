//! Diff computation for Differential Synchronization.
//!
//! Produces [`Hunk`]s that transform one string into another. Hunks carry a
//! few chars of surrounding context so that [`crate::patch::apply`] can
//! relocate them when the target text drifted in the meantime.
//!
//! The char-level edit script comes from a Myers diff, which is
//! deterministic: identical inputs always yield identical hunks.

use serde::{Deserialize, Serialize};
use similar::{capture_diff_slices, Algorithm, DiffTag};
use diffsync_types::{Edit, Hunk};

/// Longest pattern the fuzzy matcher handles in one pass.
pub const MATCH_MAX_BITS: usize = 32;

/// Tuning knobs for hunk construction and fuzzy application.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PatchOptions {
    /// Chars of context kept on each side of a hunk.
    pub margin: usize,
    /// Match quality cutoff (0.0 = exact only, 1.0 = anything).
    pub match_threshold: f64,
    /// How far from the expected location a match may drift before it
    /// counts as a full error.
    pub match_distance: usize,
    /// For long hunks, the largest fraction of differing chars tolerated
    /// between the expected and the located text.
    pub delete_threshold: f64,
}

impl Default for PatchOptions {
    fn default() -> Self {
        Self {
            margin: 4,
            match_threshold: 0.5,
            match_distance: 1000,
            delete_threshold: 0.5,
        }
    }
}

/// Compute the hunks transforming `source` into `target`.
///
/// Returns an empty list when the strings are equal.
pub fn diff(source: &str, target: &str, options: &PatchOptions) -> Vec<Hunk> {
    let a: Vec<char> = source.chars().collect();
    let b: Vec<char> = target.chars().collect();
    let edits = diff_chars(&a, &b);
    hunks_from_edits(&a, &edits, options.margin)
}

/// Char-level edit script turning `a` into `b`.
///
/// Adjacent operations of the same kind are merged.
pub fn diff_chars(a: &[char], b: &[char]) -> Vec<Edit> {
    let mut edits = Vec::new();
    for op in capture_diff_slices(Algorithm::Myers, a, b) {
        let (tag, old, new) = op.as_tag_tuple();
        match tag {
            DiffTag::Equal => push_edit(&mut edits, Edit::Equal(a[old].iter().collect())),
            DiffTag::Delete => push_edit(&mut edits, Edit::Delete(a[old].iter().collect())),
            DiffTag::Insert => push_edit(&mut edits, Edit::Insert(b[new].iter().collect())),
            DiffTag::Replace => {
                push_edit(&mut edits, Edit::Delete(a[old].iter().collect()));
                push_edit(&mut edits, Edit::Insert(b[new].iter().collect()));
            }
        }
    }
    edits
}

fn push_edit(edits: &mut Vec<Edit>, edit: Edit) {
    if edit.text().is_empty() {
        return;
    }
    let merged = match (edits.last_mut(), &edit) {
        (Some(Edit::Equal(last)), Edit::Equal(s))
        | (Some(Edit::Insert(last)), Edit::Insert(s))
        | (Some(Edit::Delete(last)), Edit::Delete(s)) => {
            last.push_str(s);
            true
        }
        _ => false,
    };
    if !merged {
        edits.push(edit);
    }
}

/// Group an edit script into context-padded hunks.
///
/// Hunk offsets after the first are relative to the text with the earlier
/// hunks already applied.
fn hunks_from_edits(source: &[char], edits: &[Edit], margin: usize) -> Vec<Hunk> {
    let mut hunks = Vec::new();
    if !edits.iter().any(Edit::is_change) {
        return hunks;
    }

    let mut hunk = Hunk::default();
    let mut count1 = 0;
    let mut count2 = 0;
    let mut prepatch: Vec<char> = source.to_vec();
    let mut postpatch: Vec<char> = source.to_vec();
    let last = edits.len() - 1;
    let gap = margin.saturating_mul(2);

    for (i, edit) in edits.iter().enumerate() {
        let len = edit.char_len();
        if hunk.edits.is_empty() && edit.is_change() {
            hunk.start1 = count1;
            hunk.start2 = count2;
        }

        match edit {
            Edit::Insert(text) => {
                hunk.edits.push(edit.clone());
                hunk.length2 += len;
                postpatch.splice(count2..count2, text.chars());
            }
            Edit::Delete(_) => {
                hunk.edits.push(edit.clone());
                hunk.length1 += len;
                postpatch.drain(count2..count2 + len);
            }
            Edit::Equal(_) => {
                if len <= gap && !hunk.edits.is_empty() && i != last {
                    // Small gap: keep it inside the current hunk.
                    hunk.edits.push(edit.clone());
                    hunk.length1 += len;
                    hunk.length2 += len;
                } else if len >= gap && !hunk.edits.is_empty() {
                    add_context(&mut hunk, &prepatch, margin);
                    hunks.push(std::mem::take(&mut hunk));
                    prepatch = postpatch.clone();
                    count1 = count2;
                }
            }
        }

        if !matches!(edit, Edit::Insert(_)) {
            count1 += len;
        }
        if !matches!(edit, Edit::Delete(_)) {
            count2 += len;
        }
    }

    if !hunk.edits.is_empty() {
        add_context(&mut hunk, &prepatch, margin);
        hunks.push(hunk);
    }
    hunks
}

/// Grow the hunk's context until its source text is unique in `text`.
fn add_context(hunk: &mut Hunk, text: &[char], margin: usize) {
    if text.is_empty() {
        return;
    }
    let start = hunk.start2.min(text.len());
    let end = (start + hunk.length1).min(text.len());
    let max_pattern = MATCH_MAX_BITS.saturating_sub(margin.saturating_mul(2));

    let mut padding = 0;
    loop {
        let lo = start.saturating_sub(padding);
        let hi = end.saturating_add(padding).min(text.len());
        let pattern = &text[lo..hi];
        let unique = find_first(text, pattern, 0) == find_last(text, pattern, text.len());
        if unique || pattern.len() >= max_pattern || margin == 0 || (lo == 0 && hi == text.len()) {
            break;
        }
        padding = padding.saturating_add(margin);
    }
    padding = padding.saturating_add(margin);

    let prefix: String = text[start.saturating_sub(padding)..start].iter().collect();
    let suffix: String = text[end..end.saturating_add(padding).min(text.len())].iter().collect();
    let prefix_len = prefix.chars().count();
    let suffix_len = suffix.chars().count();

    if !prefix.is_empty() {
        match hunk.edits.first_mut() {
            Some(Edit::Equal(first)) => first.insert_str(0, &prefix),
            _ => hunk.edits.insert(0, Edit::Equal(prefix)),
        }
    }
    if !suffix.is_empty() {
        push_edit(&mut hunk.edits, Edit::Equal(suffix));
    }

    hunk.start1 = hunk.start1.saturating_sub(prefix_len);
    hunk.start2 = hunk.start2.saturating_sub(prefix_len);
    hunk.length1 += prefix_len + suffix_len;
    hunk.length2 += prefix_len + suffix_len;
}

/// First index `>= from` where `pattern` occurs in `text`.
pub(crate) fn find_first(text: &[char], pattern: &[char], from: usize) -> Option<usize> {
    if pattern.is_empty() {
        return Some(from.min(text.len()));
    }
    if pattern.len() > text.len() {
        return None;
    }
    (from..=text.len() - pattern.len()).find(|&i| text[i..i + pattern.len()] == *pattern)
}

/// Last index `<= from` where `pattern` occurs in `text`.
pub(crate) fn find_last(text: &[char], pattern: &[char], from: usize) -> Option<usize> {
    if pattern.is_empty() {
        return Some(from.min(text.len()));
    }
    if pattern.len() > text.len() {
        return None;
    }
    let upper = from.min(text.len() - pattern.len());
    (0..=upper)
        .rev()
        .find(|&i| text[i..i + pattern.len()] == *pattern)
}

/// Map a char offset in the edit script's source onto its target.
pub(crate) fn x_index(edits: &[Edit], loc: usize) -> usize {
    let mut chars1 = 0;
    let mut chars2 = 0;
    let mut last1 = 0;
    let mut last2 = 0;
    let mut overshoot = None;

    for edit in edits {
        let len = edit.char_len();
        if !matches!(edit, Edit::Insert(_)) {
            chars1 += len;
        }
        if !matches!(edit, Edit::Delete(_)) {
            chars2 += len;
        }
        if chars1 > loc {
            overshoot = Some(edit);
            break;
        }
        last1 = chars1;
        last2 = chars2;
    }

    // Inside a deletion: snap to where the deletion starts.
    if matches!(overshoot, Some(Edit::Delete(_))) {
        return last2;
    }
    last2 + (loc - last1)
}

/// Number of inserted, deleted or substituted chars in an edit script.
pub(crate) fn levenshtein(edits: &[Edit]) -> usize {
    let mut distance = 0;
    let mut insertions = 0;
    let mut deletions = 0;
    for edit in edits {
        match edit {
            Edit::Insert(_) => insertions += edit.char_len(),
            Edit::Delete(_) => deletions += edit.char_len(),
            Edit::Equal(_) => {
                distance += insertions.max(deletions);
                insertions = 0;
                deletions = 0;
            }
        }
    }
    distance + insertions.max(deletions)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chars(s: &str) -> Vec<char> {
        s.chars().collect()
    }

    #[test]
    fn equal_strings_produce_no_hunks() {
        assert!(diff("hello", "hello", &PatchOptions::default()).is_empty());
        assert!(diff("", "", &PatchOptions::default()).is_empty());
    }

    #[test]
    fn append_produces_single_hunk_with_context() {
        let hunks = diff("hello", "hello world", &PatchOptions::default());
        assert_eq!(hunks.len(), 1);
        let hunk = &hunks[0];
        assert_eq!(hunk.source_text(), "hello");
        assert_eq!(hunk.target_text(), "hello world");
        assert_eq!(hunk.start1, 0);
        assert_eq!(hunk.length1, 5);
        assert_eq!(hunk.length2, 11);
        assert!(matches!(hunk.edits.last(), Some(Edit::Insert(s)) if s == " world"));
    }

    #[test]
    fn insert_into_empty() {
        let hunks = diff("", "abc", &PatchOptions::default());
        assert_eq!(hunks.len(), 1);
        assert_eq!(hunks[0].edits, vec![Edit::Insert("abc".into())]);
        assert_eq!(hunks[0].length1, 0);
        assert_eq!(hunks[0].length2, 3);
    }

    #[test]
    fn distant_edits_split_into_hunks() {
        let source = "The quick brown fox jumps over the lazy dog";
        let target = "The slow brown fox jumps over the lazy cat";
        let hunks = diff(source, target, &PatchOptions::default());
        assert_eq!(hunks.len(), 2);
        assert!(hunks[0].target_text().contains("slow"));
        assert!(hunks[1].target_text().contains("cat"));
    }

    #[test]
    fn diff_is_deterministic() {
        let opts = PatchOptions::default();
        let a = "lorem ipsum dolor sit amet";
        let b = "lorem dolor sit amet, consectetur";
        assert_eq!(diff(a, b, &opts), diff(a, b, &opts));
    }

    #[test]
    fn diff_chars_merges_adjacent_operations() {
        let edits = diff_chars(&chars("abc"), &chars("xyz"));
        assert_eq!(
            edits,
            vec![Edit::Delete("abc".into()), Edit::Insert("xyz".into())]
        );
    }

    #[test]
    fn diff_counts_chars_not_bytes() {
        let hunks = diff("日本", "日本語", &PatchOptions::default());
        assert_eq!(hunks[0].length1, 2);
        assert_eq!(hunks[0].length2, 3);
    }

    #[test]
    fn find_helpers() {
        let text = chars("abcabc");
        assert_eq!(find_first(&text, &chars("bc"), 0), Some(1));
        assert_eq!(find_first(&text, &chars("bc"), 2), Some(4));
        assert_eq!(find_last(&text, &chars("bc"), 6), Some(4));
        assert_eq!(find_last(&text, &chars("bc"), 3), Some(1));
        assert_eq!(find_first(&text, &chars("zz"), 0), None);
    }

    #[test]
    fn x_index_maps_through_edits() {
        // "The cat" -> "The big cat"
        let edits = vec![
            Edit::Equal("The ".into()),
            Edit::Insert("big ".into()),
            Edit::Equal("cat".into()),
        ];
        assert_eq!(x_index(&edits, 2), 2);
        assert_eq!(x_index(&edits, 5), 9);

        let edits = vec![Edit::Equal("ab".into()), Edit::Delete("cd".into()), Edit::Equal("ef".into())];
        assert_eq!(x_index(&edits, 3), 2);
    }

    #[test]
    fn levenshtein_counts_substitutions_once() {
        let edits = vec![
            Edit::Delete("abc".into()),
            Edit::Insert("1234".into()),
            Edit::Equal("xyz".into()),
            Edit::Delete("8".into()),
        ];
        assert_eq!(levenshtein(&edits), 5);
    }

    #[test]
    fn huge_margin_uses_whole_text_as_context() {
        let opts = PatchOptions {
            margin: usize::MAX,
            ..PatchOptions::default()
        };
        let hunks = diff("The quick brown fox", "The quick red fox", &opts);
        assert_eq!(hunks.len(), 1);
        assert_eq!(hunks[0].start1, 0);
        assert_eq!(hunks[0].source_text(), "The quick brown fox");

        let result = crate::patch::apply(&hunks, "The quick brown fox", &opts);
        assert_eq!(result.content, "The quick red fox");
    }
}
