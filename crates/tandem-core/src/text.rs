//! Char-offset text helpers shared by the bridge and the loopback engine.
//!
//! All offsets in the bridge are char indexes, never byte indexes, so that
//! multi-byte content cannot split a code point.

use std::ops::Range;

/// Number of chars in `text`
pub fn char_len(text: &str) -> usize {
    text.chars().count()
}

/// Map a char offset to the corresponding byte offset.
///
/// Offsets past the end clamp to the full length.
pub fn byte_offset(text: &str, char_offset: usize) -> usize {
    text.char_indices()
        .nth(char_offset)
        .map(|(i, _)| i)
        .unwrap_or(text.len())
}

/// Replace the half-open char range `[start, end)` of `text` with
/// `replacement`, returning the new string.
///
/// Callers must validate bounds first; out-of-range offsets clamp rather
/// than panic.
pub fn splice(text: &str, start: usize, end: usize, replacement: &str) -> String {
    let byte_start = byte_offset(text, start);
    let byte_end = byte_offset(text, end.max(start));

    let mut out = String::with_capacity(text.len() + replacement.len());
    out.push_str(&text[..byte_start]);
    out.push_str(replacement);
    out.push_str(&text[byte_end..]);
    out
}

/// Compute the smallest single replace that turns `before` into `after`.
///
/// Returns the char span of `before` to replace and the new content, or
/// `None` when the strings are already equal. The span is found by
/// stripping the longest common prefix and suffix, so one contiguous
/// differing region is replaced and the rest of the text is untouched.
pub fn minimal_replace(before: &str, after: &str) -> Option<(Range<usize>, String)> {
    if before == after {
        return None;
    }

    let old: Vec<char> = before.chars().collect();
    let new: Vec<char> = after.chars().collect();

    let mut prefix = 0;
    while prefix < old.len() && prefix < new.len() && old[prefix] == new[prefix] {
        prefix += 1;
    }

    let mut suffix = 0;
    while suffix < old.len() - prefix
        && suffix < new.len() - prefix
        && old[old.len() - 1 - suffix] == new[new.len() - 1 - suffix]
    {
        suffix += 1;
    }

    let span = prefix..old.len() - suffix;
    let text: String = new[prefix..new.len() - suffix].iter().collect();
    Some((span, text))
}
