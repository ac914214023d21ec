//! Fuzzy location of a pattern near an expected offset.
//!
//! Uses the Bitap (shift-or) algorithm with a score that weighs the number
//! of errors against the distance from the expected location.

use std::collections::HashMap;

use crate::diff::{find_first, find_last, PatchOptions, MATCH_MAX_BITS};

/// Locate `pattern` in `text` as close to `loc` as possible.
///
/// Tries an exact hit at `loc` first, then falls back to fuzzy matching.
/// Returns `None` when nothing scores under the match threshold.
pub(crate) fn match_main(
    text: &[char],
    pattern: &[char],
    loc: usize,
    options: &PatchOptions,
) -> Option<usize> {
    let loc = loc.min(text.len());
    if text == pattern {
        return Some(0);
    }
    if text.is_empty() {
        return None;
    }
    if loc + pattern.len() <= text.len() && text[loc..loc + pattern.len()] == *pattern {
        return Some(loc);
    }
    match_bitap(text, pattern, loc, options)
}

fn match_bitap(text: &[char], pattern: &[char], loc: usize, options: &PatchOptions) -> Option<usize> {
    if pattern.is_empty() {
        return Some(loc);
    }
    debug_assert!(pattern.len() <= MATCH_MAX_BITS, "pattern too long for bitap");
    if pattern.len() > 64 {
        return find_first(text, pattern, 0);
    }

    let alphabet = alphabet(pattern);
    let plen = pattern.len() as i64;
    let tlen = text.len() as i64;
    let loc_i = loc as i64;

    let score = |errors: i64, x: i64| -> f64 {
        let accuracy = errors as f64 / plen as f64;
        let proximity = (loc_i - x).abs();
        if options.match_distance == 0 {
            return if proximity == 0 { accuracy } else { 1.0 };
        }
        accuracy + proximity as f64 / options.match_distance as f64
    };

    // Exact matches near loc tighten the threshold up front.
    let mut threshold = options.match_threshold;
    if let Some(hit) = find_first(text, pattern, loc) {
        threshold = threshold.min(score(0, hit as i64));
        if let Some(hit) = find_last(text, pattern, loc + pattern.len()) {
            threshold = threshold.min(score(0, hit as i64));
        }
    }

    let match_mask: u64 = 1 << (plen - 1);
    let mut best_loc: i64 = -1;
    let mut bin_max = plen + tlen;
    let mut last_rd: Vec<u64> = Vec::new();

    for d in 0..plen {
        // Binary search for how far from loc we can stray at this error level.
        let mut bin_min = 0;
        let mut bin_mid = bin_max;
        while bin_min < bin_mid {
            if score(d, loc_i + bin_mid) <= threshold {
                bin_min = bin_mid;
            } else {
                bin_max = bin_mid;
            }
            bin_mid = (bin_max - bin_min) / 2 + bin_min;
        }
        bin_max = bin_mid;

        let mut start = (loc_i - bin_mid + 1).max(1);
        let finish = (loc_i + bin_mid).min(tlen) + plen;

        let mut rd = vec![0u64; (finish + 2) as usize];
        rd[(finish + 1) as usize] = (1u64 << d) - 1;

        let mut j = finish;
        while j >= start {
            let ju = j as usize;
            let char_match = if j - 1 >= tlen {
                0
            } else {
                alphabet.get(&text[ju - 1]).copied().unwrap_or(0)
            };
            rd[ju] = if d == 0 {
                ((rd[ju + 1] << 1) | 1) & char_match
            } else {
                (((rd[ju + 1] << 1) | 1) & char_match)
                    | (((last_rd[ju + 1] | last_rd[ju]) << 1) | 1)
                    | last_rd[ju + 1]
            };

            if rd[ju] & match_mask != 0 {
                let candidate = score(d, j - 1);
                if candidate <= threshold {
                    threshold = candidate;
                    best_loc = j - 1;
                    if best_loc > loc_i {
                        // Don't search further left than the mirror image.
                        start = (2 * loc_i - best_loc).max(1);
                    } else {
                        break;
                    }
                }
            }
            j -= 1;
        }

        // No hope of a better match with one more error.
        if score(d + 1, loc_i) > threshold {
            break;
        }
        last_rd = rd;
    }

    (best_loc >= 0).then_some(best_loc as usize)
}

fn alphabet(pattern: &[char]) -> HashMap<char, u64> {
    let len = pattern.len();
    let mut masks = HashMap::new();
    for (i, c) in pattern.iter().enumerate() {
        *masks.entry(*c).or_insert(0u64) |= 1u64 << (len - i - 1);
    }
    masks
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chars(s: &str) -> Vec<char> {
        s.chars().collect()
    }

    fn locate(text: &str, pattern: &str, loc: usize) -> Option<usize> {
        match_main(&chars(text), &chars(pattern), loc, &PatchOptions::default())
    }

    #[test]
    fn exact_match_at_expected_location() {
        assert_eq!(locate("abcdef", "cd", 2), Some(2));
        assert_eq!(locate("abcdef", "abcdef", 3), Some(0));
    }

    #[test]
    fn empty_text_never_matches() {
        assert_eq!(locate("", "abc", 0), None);
    }

    #[test]
    fn exact_match_elsewhere() {
        assert_eq!(locate("abcdefghijk", "fgh", 0), Some(5));
        assert_eq!(locate("abcdefghijk", "fgh", 9), Some(5));
    }

    #[test]
    fn fuzzy_match_tolerates_errors() {
        assert_eq!(locate("abcdefghijk", "efxhi", 0), Some(4));
        assert_eq!(locate("abcdefghijk", "bxy", 1), None);
    }

    #[test]
    fn prefers_occurrence_closest_to_loc() {
        assert_eq!(locate("abcXabcXabc", "abc", 7), Some(8));
    }

    #[test]
    fn alphabet_masks() {
        let masks = alphabet(&chars("abc"));
        assert_eq!(masks[&'a'], 0b100);
        assert_eq!(masks[&'b'], 0b010);
        assert_eq!(masks[&'c'], 0b001);

        let masks = alphabet(&chars("abcaba"));
        assert_eq!(masks[&'a'], 0b100101);
    }
}
