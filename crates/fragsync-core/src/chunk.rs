//! Word-window text chunker.
//!
//! Connectors that pull whole documents (files, long emails) split them into
//! overlapping windows of words before emitting fragments. Windows advance by
//! `max_words - overlap` words, so consecutive fragments share context.
//!
//! # Example
//!
//! ```rust
//! use fragsync_core::chunk::chunk_words;
//!
//! let chunks = chunk_words("one two three four five", 2, 0.5);
//! assert_eq!(chunks, vec!["one two", "two three", "three four", "four five"]);
//! ```

/// Default window size, in words.
pub const MAX_CHUNK_WORDS: usize = 200;

/// Default fraction of a window repeated at the start of the next one.
pub const CHUNK_OVERLAP: f64 = 0.2;

/// Split `text` into windows of at most `max_words` whitespace-separated words.
///
/// `overlap` is clamped to `[0.0, 1.0)`. Empty or whitespace-only input
/// yields no chunks. The final window always ends at the last word.
pub fn chunk_words(text: &str, max_words: usize, overlap: f64) -> Vec<String> {
    let words: Vec<&str> = text.split_whitespace().collect();
    if words.is_empty() || max_words == 0 {
        return Vec::new();
    }

    let overlap = overlap.clamp(0.0, 0.99);
    let overlap_words = (max_words as f64 * overlap).floor() as usize;
    let step = max_words.saturating_sub(overlap_words).max(1);

    let mut chunks = Vec::new();
    let mut start = 0;
    loop {
        let end = (start + max_words).min(words.len());
        chunks.push(words[start..end].join(" "));
        if end == words.len() {
            break;
        }
        start += step;
    }
    chunks
}
