//! Content hashing for global fragment dedup.

use base64::engine::general_purpose::URL_SAFE;
use base64::Engine;
use sha2::{Digest, Sha256};

/// SHA-256 of the sanitized text, URL-safe base64 encoded.
///
/// Stable across runs and connectors: two fragments with the same text share
/// a hash no matter which document or source produced them.
pub fn content_hash(text: &str) -> String {
    let digest = Sha256::digest(text.as_bytes());
    URL_SAFE.encode(digest)
}
