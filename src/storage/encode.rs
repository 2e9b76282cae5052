//! Entry encoding with a filtered retry.
//!
//! An encoded entry must parse back with the same JSON reader the store
//! uses on `get`. Payloads that fail that check are retried once after
//! dropping transient handles and truncating deep nesting.

use serde_json::{Map, Value};
use sha2::{Digest, Sha256};

use crate::error::{AppError, Result};
use crate::models::CacheFile;

/// Fields that hold live scraper handles rather than content.
pub const TRANSIENT_FIELDS: &[&str] = &[
    "page",
    "browser",
    "context",
    "element",
    "handle",
    "screenshot",
];

/// Nesting below this depth is replaced by `null` when filtering.
pub const MAX_PAYLOAD_DEPTH: usize = 64;

/// Encode an entry and verify it parses back.
pub fn encode_entry(file: &CacheFile) -> Result<Vec<u8>> {
    let bytes = serde_json::to_vec_pretty(file)?;
    serde_json::from_slice::<Value>(&bytes)
        .map_err(|e| AppError::serialization(format!("encoded entry does not parse back: {e}")))?;
    Ok(bytes)
}

/// Drop transient fields and truncate nesting beyond `MAX_PAYLOAD_DEPTH`.
pub fn filter_payload(value: Value) -> Value {
    filter_at(value, 0)
}

fn filter_at(value: Value, depth: usize) -> Value {
    if depth >= MAX_PAYLOAD_DEPTH {
        return Value::Null;
    }
    match value {
        Value::Object(map) => {
            let filtered: Map<String, Value> = map
                .into_iter()
                .filter(|(k, _)| !TRANSIENT_FIELDS.contains(&k.as_str()))
                .map(|(k, v)| (k, filter_at(v, depth + 1)))
                .collect();
            Value::Object(filtered)
        }
        Value::Array(items) => {
            Value::Array(items.into_iter().map(|v| filter_at(v, depth + 1)).collect())
        }
        other => other,
    }
}

/// Digest of the content that decides whether a write is a no-op.
pub fn content_digest(data: &Value, ttl_hours: Option<f64>) -> String {
    let mut hasher = Sha256::new();
    // Value maps are ordered, so this is canonical
    hasher.update(serde_json::to_vec(data).unwrap_or_default());
    hasher.update(b"\n");
    if let Some(ttl) = ttl_hours {
        hasher.update(ttl.to_bits().to_le_bytes());
    }
    hex::encode(hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{CACHE_VERSION, EntryKey};
    use chrono::Utc;
    use serde_json::json;

    fn nested(depth: usize) -> Value {
        let mut v = json!("leaf");
        for _ in 0..depth {
            v = json!({ "child": v });
        }
        v
    }

    fn file_with(data: Value) -> CacheFile {
        CacheFile {
            timestamp: Utc::now(),
            data,
            cache_version: CACHE_VERSION.into(),
            key: EntryKey::key("k"),
            size: 0,
            created_by: "test".into(),
            quality: None,
            ttl_hours: Some(1.0),
        }
    }

    #[test]
    fn test_filter_drops_transient_fields() {
        let filtered = filter_payload(json!({
            "text": "keep",
            "page": {"handle": 1},
            "links": [{"url": "u", "element": "<a>"}]
        }));
        assert_eq!(filtered, json!({"text": "keep", "links": [{"url": "u"}]}));
    }

    #[test]
    fn test_deep_payload_fails_then_filters() {
        let deep = nested(200);
        assert!(encode_entry(&file_with(deep.clone())).is_err());

        let filtered = filter_payload(deep);
        assert!(encode_entry(&file_with(filtered)).is_ok());
    }

    #[test]
    fn test_digest_ignores_key_order() {
        let a: Value = serde_json::from_str(r#"{"a":1,"b":2}"#).unwrap();
        let b: Value = serde_json::from_str(r#"{"b":2,"a":1}"#).unwrap();
        assert_eq!(content_digest(&a, None), content_digest(&b, None));
        assert_ne!(content_digest(&a, None), content_digest(&a, Some(2.0)));
    }
}
