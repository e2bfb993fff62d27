//! Content-hash computation for document admission (component C3 step 3).
//!
//! `content_hash = SHA-256(workspace_id || ":" || normalized_content)`.
//! Text is normalized to Unicode NFC with whitespace collapsed first, so
//! two uploads that differ only in trailing whitespace or composed-vs-
//! decomposed accents dedup to the same hash; binary content is hashed
//! incrementally from whatever reader the caller already has open, so a
//! large upload never needs to be buffered whole just to hash it.

use sha2::{Digest, Sha256};
use std::io::{self, Read};
use unicode_normalization::UnicodeNormalization;
use uuid::Uuid;

/// NFC-normalize then collapse runs of whitespace to a single space and
/// trim the ends. Two documents that are "the same" to a human but differ
/// in incidental whitespace or Unicode composition hash identically.
pub fn normalize_text(content: &str) -> String {
    let nfc: String = content.nfc().collect();
    let mut out = String::with_capacity(nfc.len());
    let mut last_was_space = false;
    for ch in nfc.chars() {
        if ch.is_whitespace() {
            if !last_was_space {
                out.push(' ');
            }
            last_was_space = true;
        } else {
            out.push(ch);
            last_was_space = false;
        }
    }
    out.trim().to_string()
}

pub fn content_hash_text(workspace_id: Uuid, content: &str) -> String {
    let normalized = normalize_text(content);
    let mut hasher = Sha256::new();
    hasher.update(workspace_id.as_bytes());
    hasher.update(b":");
    hasher.update(normalized.as_bytes());
    hex(hasher)
}

/// Hashes binary content incrementally from `reader` in fixed-size chunks,
/// never materializing the whole payload in memory.
pub fn content_hash_bytes(workspace_id: Uuid, mut reader: impl Read) -> io::Result<String> {
    let mut hasher = Sha256::new();
    hasher.update(workspace_id.as_bytes());
    hasher.update(b":");
    let mut buf = [0u8; 64 * 1024];
    loop {
        let n = reader.read(&mut buf)?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }
    Ok(hex(hasher))
}

fn hex(hasher: Sha256) -> String {
    format!("{:x}", hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalizes_whitespace_and_composition() {
        let a = normalize_text("Hello   world\n");
        let b = normalize_text("Hello world");
        assert_eq!(a, b);
    }

    #[test]
    fn same_text_and_workspace_hash_identically() {
        let ws = Uuid::new_v4();
        let a = content_hash_text(ws, "Hello world\n");
        let b = content_hash_text(ws, "Hello   world");
        assert_eq!(a, b);
    }

    #[test]
    fn different_workspaces_hash_differently_for_same_content() {
        let a = content_hash_text(Uuid::new_v4(), "same text");
        let b = content_hash_text(Uuid::new_v4(), "same text");
        assert_ne!(a, b);
    }

    #[test]
    fn bytes_hash_matches_incremental_reader() {
        let ws = Uuid::new_v4();
        let data = b"binary payload".to_vec();
        let hash = content_hash_bytes(ws, &data[..]).unwrap();
        assert_eq!(hash.len(), 64);
    }
}
