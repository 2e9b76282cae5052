//! Deterministic file naming for cache entries.

use sha2::{Digest, Sha256};
use url::Url;

use crate::models::EntryKey;
use crate::utils::sanitize_segment;

/// Hex chars of the key hash kept in a file name.
const HASH_LEN: usize = 16;
const DOMAIN_MAX: usize = 60;
const PATH_MAX: usize = 80;
const KEY_MAX: usize = 80;

/// File extension of every cache entry.
pub const ENTRY_EXTENSION: &str = "json";

/// Stable hex digest of a key string.
pub fn key_hash(raw: &str) -> String {
    let digest = Sha256::digest(raw.as_bytes());
    let mut hex = hex::encode(digest);
    hex.truncate(HASH_LEN);
    hex
}

/// File name for an entry.
///
/// - URL keys: `{domain}_{path}_{hash}.json`
/// - Other keys: `key_{sanitized-key}_{hash}.json`
///
/// The hash covers the full key, so two keys that sanitize identically
/// still land in different files.
pub fn entry_file_name(key: &EntryKey) -> String {
    let hash = key_hash(key.as_str());
    match key {
        EntryKey::Url { url } => match Url::parse(url) {
            Ok(parsed) => {
                let domain = sanitize_segment(parsed.host_str().unwrap_or("unknown"), DOMAIN_MAX);
                let mut path = parsed.path().to_string();
                if let Some(query) = parsed.query() {
                    path.push('_');
                    path.push_str(query);
                }
                let path = sanitize_segment(&path, PATH_MAX);
                format!("{domain}_{path}_{hash}.{ENTRY_EXTENSION}")
            }
            Err(_) => format!(
                "url_{}_{hash}.{ENTRY_EXTENSION}",
                sanitize_segment(url, KEY_MAX)
            ),
        },
        EntryKey::Key { key } => format!(
            "key_{}_{hash}.{ENTRY_EXTENSION}",
            sanitize_segment(key, KEY_MAX)
        ),
    }
}
