//! Content keys: SHA-256 of normalized bytes

use sha2::{Digest, Sha256};

/// Normalize text so that line-ending and trailing-whitespace differences
/// produce the same bytes.
///
/// CRLF becomes LF and trailing whitespace is trimmed from every line.
pub fn normalize_text(text: &str) -> String {
    let unified = text.replace("\r\n", "\n");
    let mut out = String::with_capacity(unified.len());
    for (i, line) in unified.split('\n').enumerate() {
        if i > 0 {
            out.push('\n');
        }
        out.push_str(line.trim_end());
    }
    out
}

/// Normalize raw bytes before hashing.
///
/// The decision depends on the bytes alone, never on the media type a loader
/// reports: valid UTF-8 is normalized as text, anything else is kept as is.
pub fn normalize(bytes: &[u8]) -> Vec<u8> {
    match std::str::from_utf8(bytes) {
        Ok(text) => normalize_text(text).into_bytes(),
        Err(_) => bytes.to_vec(),
    }
}

/// Compute the hex SHA-256 of already-normalized bytes
pub fn content_key(normalized: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(normalized);
    hex::encode(hasher.finalize())
}
