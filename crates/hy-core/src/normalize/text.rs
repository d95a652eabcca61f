//! Free-text comparison helpers and placeholder-name detection.

use once_cell::sync::Lazy;
use regex::Regex;

static COMPARISON_PUNCTUATION: Lazy<Regex> = Lazy::new(|| Regex::new(r"[()/*\-]").unwrap());
static WHITESPACE_RUN: Lazy<Regex> = Lazy::new(|| Regex::new(r"\s+").unwrap());

/// Prefix scanners use for names synthesised from an address.
pub const AUTO_NAME_PREFIX: &str = "device-";

/// Literal names that carry no identity.
const SENTINEL_NAMES: &[&str] = &["", "_gateway", "unknown"];

/// Normalises human-entered text for equality comparison.
///
/// Lowercases, spells out inch marks, turns `()/*-` into spaces and
/// collapses whitespace. `Dell 24" Monitor (P2419H)` and
/// `dell 24 inch monitor p2419h` compare equal.
pub fn normalize_for_comparison(text: &str) -> String {
    let lowered = text.to_lowercase().replace(['"', '\u{2033}'], " inch");
    let spaced = COMPARISON_PUNCTUATION.replace_all(&lowered, " ");
    WHITESPACE_RUN.replace_all(&spaced, " ").trim().to_string()
}

/// Returns true when two strings are equal after comparison normalisation.
pub fn text_eq(a: &str, b: &str) -> bool {
    normalize_for_comparison(a) == normalize_for_comparison(b)
}

/// Returns the first DNS label of a hostname, lowercased.
pub fn short_hostname(hostname: &str) -> String {
    hostname
        .trim()
        .split('.')
        .next()
        .unwrap_or_default()
        .to_lowercase()
}

/// Returns true for auto-generated or sentinel names that do not identify a device.
pub fn is_placeholder_name(name: &str) -> bool {
    let lowered = name.trim().to_lowercase();
    SENTINEL_NAMES.contains(&lowered.as_str()) || lowered.starts_with(AUTO_NAME_PREFIX)
}

/// Returns true for names that must never replace a meaningful name during a merge.
///
/// Broader than [`is_placeholder_name`]: anything prefixed `unknown` or shorter
/// than three characters also counts as generic.
pub fn is_generic_name(name: &str) -> bool {
    let trimmed = name.trim();
    is_placeholder_name(trimmed)
        || trimmed.to_lowercase().starts_with("unknown")
        || trimmed.chars().count() < 3
}

/// Returns true when `keyword` occurs in `haystack` (both compared lowercase).
///
/// Keywords of three characters or fewer only match at the start of a token,
/// so `ap` matches `ap3-lobby` and `Cisco AP 1800` but not `laptop`. Longer
/// keywords match anywhere.
pub fn contains_keyword(haystack: &str, keyword: &str) -> bool {
    let keyword = keyword.trim().to_lowercase();
    if keyword.is_empty() {
        return false;
    }
    let haystack = haystack.to_lowercase();
    if keyword.chars().count() > 3 {
        return haystack.contains(&keyword);
    }
    haystack.match_indices(&keyword).any(|(idx, _)| {
        haystack[..idx]
            .chars()
            .next_back()
            .map_or(true, |prev| !prev.is_alphanumeric())
    })
}

/// Returns true when any keyword matches. See [`contains_keyword`].
pub fn contains_any<S: AsRef<str>>(haystack: &str, keywords: &[S]) -> bool {
    keywords
        .iter()
        .any(|k| contains_keyword(haystack, k.as_ref()))
}

/// Trims a string and returns `None` when nothing is left.
pub fn non_empty(value: &str) -> Option<&str> {
    let trimmed = value.trim();
    (!trimmed.is_empty()).then_some(trimmed)
}
