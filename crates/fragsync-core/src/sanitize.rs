//! Fragment text normalization.
//!
//! [`clean_chunk`] is applied to every fragment (and its document name)
//! unless the connector marked it as already clean. The result is what gets
//! hashed, embedded and stored, so it must be deterministic.

use once_cell::sync::Lazy;
use regex::Regex;

/// Fragments whose sanitized text has fewer characters than this are dropped.
pub const MIN_CHUNK_LEN: usize = 10;

const BOM: char = '\u{FEFF}';

// Letters, combining marks, numbers, punctuation and space separators survive.
static DISALLOWED: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"[^\p{L}\p{M}\p{N}\p{P}\p{Zs}]").expect("valid regex"));
static URL: Lazy<Regex> = Lazy::new(|| Regex::new(r"https?://\S+").expect("valid regex"));
// Long opaque tokens (ids, base64 payloads, tracking blobs).
static PAYLOAD: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"[a-zA-Z0-9\-_]{20,}").expect("valid regex"));
static WHITESPACE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\s+").expect("valid regex"));

/// Normalize fragment text.
///
/// Strips a leading byte-order mark, replaces control and symbol characters
/// with spaces, removes URLs and opaque payload tokens, collapses runs of
/// whitespace to a single space and trims the ends.
pub fn clean_chunk(input: &str) -> String {
    let input = input.strip_prefix(BOM).unwrap_or(input);
    let allowed = DISALLOWED.replace_all(input, " ");
    let no_urls = URL.replace_all(&allowed, "");
    let no_payloads = PAYLOAD.replace_all(&no_urls, "");
    WHITESPACE
        .replace_all(&no_payloads, " ")
        .trim()
        .to_string()
}

/// Whether sanitized text is long enough to be worth embedding.
pub fn long_enough(text: &str, min_len: usize) -> bool {
    text.chars().count() >= min_len
}
