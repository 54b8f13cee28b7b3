//! Path encoding for filesystem-safe storage.
//!
//! Stream paths are encoded using base64url (RFC 4648 §5) so that any
//! byte sequence a path can contain maps to a safe, reversible filename.
//! Long paths are truncated with a hash suffix rather than relying on the
//! filesystem to accept arbitrarily long names.

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use sha2::{Digest, Sha256};

/// Maximum length for encoded path before truncation
const MAX_PATH_LENGTH: usize = 200;
/// Length to truncate to (leaving room for hash suffix)
const TRUNCATE_LENGTH: usize = 180;
/// Length of hash prefix used for truncated paths
const HASH_PREFIX_LENGTH: usize = 16;

/// Encode a stream path to a filesystem-safe string.
///
/// Uses base64url encoding. Long paths are truncated with a hash suffix
/// to ensure uniqueness while staying within filesystem limits.
pub fn encode_path(path: &str) -> String {
    let encoded = URL_SAFE_NO_PAD.encode(path.as_bytes());

    if encoded.len() > MAX_PATH_LENGTH {
        let hash = compute_hash(path);
        let truncated = &encoded[..TRUNCATE_LENGTH];
        format!("{}~{}", truncated, &hash[..HASH_PREFIX_LENGTH])
    } else {
        encoded
    }
}

/// Decode a filesystem-safe string back to a stream path.
///
/// Note: for truncated paths, this returns `None` as the original path
/// cannot be recovered from a truncated encoding.
pub fn decode_path(encoded: &str) -> Option<String> {
    if encoded.contains('~') {
        return None;
    }

    URL_SAFE_NO_PAD
        .decode(encoded)
        .ok()
        .and_then(|bytes| String::from_utf8(bytes).ok())
}

fn compute_hash(input: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(input.as_bytes());
    let result = hasher.finalize();
    hex::encode(result)
}

/// Filename for a path's append-only log, e.g. `<data-dir>/<encode_path(path)>.log`.
pub fn log_file_name(path: &str) -> String {
    format!("{}.log", encode_path(path))
}

/// Filename for a path's cached next-offset counter file.
pub fn offset_file_name(path: &str) -> String {
    format!("{}.offset", encode_path(path))
}
