//! Cache entry data structures.

use std::fmt;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Format version written into every entry header.
pub const CACHE_VERSION: &str = "2.0";

/// Identity of a cache entry.
///
/// Stored in the file header as `"kind": "url" | "key"` next to the
/// `url` or `key` field, so readers never infer the kind from a file name.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum EntryKey {
    /// A harvested page, addressed by its source URL
    Url { url: String },
    /// An arbitrary named value with its own TTL
    Key { key: String },
}

impl EntryKey {
    pub fn url(url: impl Into<String>) -> Self {
        Self::Url { url: url.into() }
    }

    pub fn key(key: impl Into<String>) -> Self {
        Self::Key { key: key.into() }
    }

    /// Classify a raw string: anything with an http(s) scheme is a URL.
    pub fn parse(raw: &str) -> Self {
        if raw.starts_with("http://") || raw.starts_with("https://") {
            Self::url(raw)
        } else {
            Self::key(raw)
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            Self::Url { url } => url,
            Self::Key { key } => key,
        }
    }

    pub fn is_url(&self) -> bool {
        matches!(self, Self::Url { .. })
    }
}

impl fmt::Display for EntryKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Usable-content tier of a cached page.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Quality {
    Full,
    Partial,
    Minimum,
}

impl Quality {
    pub fn as_str(&self) -> &'static str {
        match self {
            Quality::Full => "full",
            Quality::Partial => "partial",
            Quality::Minimum => "minimum",
        }
    }
}

/// Freshness of an entry relative to its TTL.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Freshness {
    Fresh,
    Stale,
}

/// On-disk body of one cache entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheFile {
    pub timestamp: DateTime<Utc>,

    /// Payload with the computed `quality` folded in
    pub data: Value,

    pub cache_version: String,

    #[serde(flatten)]
    pub key: EntryKey,

    /// Encoded payload size in bytes
    pub size: u64,

    pub created_by: String,

    /// Present on address-keyed entries
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub quality: Option<Quality>,

    /// Present on arbitrary-keyed entries
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ttl_hours: Option<f64>,
}

/// Result of a successful cache read.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CachedPage {
    pub key: EntryKey,
    pub data: Value,
    pub quality: Quality,
    pub status: Freshness,
    pub timestamp: DateTime<Utc>,
    #[serde(with = "duration_secs")]
    pub age: Duration,
}

/// Options for `CacheStore::get`.
#[derive(Debug, Clone, Copy, Default)]
pub struct GetOptions {
    /// Return expired entries (marked stale) instead of a miss
    pub allow_stale: bool,
    /// Delete corrupt entries and signal a reprofile instead of only missing
    pub fallback_on_error: bool,
}

/// Options for `CacheStore::set`.
#[derive(Debug, Clone, Default)]
pub struct SetOptions {
    /// TTL for arbitrary-keyed entries; ignored for URLs
    pub ttl_hours: Option<f64>,
    /// Overrides the configured `createdBy`
    pub created_by: Option<String>,
}

mod duration_secs {
    use std::time::Duration;

    use serde::Serializer;

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_f64(d.as_secs_f64())
    }
}
