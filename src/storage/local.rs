//! Local filesystem cache store.
//!
//! One JSON file per entry under a single root directory:
//!
//! ```text
//! {root}/
//! ├── acme.com_careers_3f2a...json     # kind = "url"
//! └── key_search_backend_91bc...json   # kind = "key"
//! ```
//!
//! ## Guarantees
//!
//! - **Quality tag**: nothing is written without a quality and a timestamp
//! - **Idempotent writes**: an unchanged payload never touches the file
//! - **Whole-file writes**: temp file then rename, verified by re-stat
//! - **No raised errors**: failures become `false`/`None` plus a metric

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, SystemTime};

use chrono::Utc;
use serde::Serialize;
use serde_json::{Map, Value};
use tokio::io::AsyncWriteExt;

use crate::error::{AppError, Result};
use crate::models::{
    CACHE_VERSION, CacheConfig, CacheFile, CachedPage, EntryKey, Freshness, GetOptions, Quality,
    SetOptions,
};
use crate::storage::encode::{content_digest, encode_entry, filter_payload};
use crate::storage::events::{
    EventQueue, FlushReport, NoopSink, ProfilerEvent, ProfilerSink, ReprofileReason,
};
use crate::storage::metrics::{CacheMetrics, Counter, MetricsSnapshot};
use crate::storage::paths::{ENTRY_EXTENSION, entry_file_name};
use crate::storage::quality;
use crate::utils::get_domain;

/// Outcome of reading one file, before it is folded into `Option`.
#[derive(Debug)]
enum Lookup {
    Miss,
    Corrupt(ReprofileReason, String),
    Expired,
    Hit(CachedPage),
}

/// Outcome of a successful `set`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteOutcome {
    Written,
    Unchanged,
}

/// Disk-backed store of harvested page entries.
pub struct CacheStore {
    root_dir: PathBuf,
    pub(crate) config: CacheConfig,
    pub(crate) metrics: CacheMetrics,
    events: EventQueue,
    sink: Arc<dyn ProfilerSink>,
}

impl CacheStore {
    /// Create a store rooted at `config.dir` that discards profiler events.
    pub fn new(config: CacheConfig) -> Self {
        Self::with_sink(config, Arc::new(NoopSink))
    }

    /// Create a store that delivers profiler events to `sink`.
    pub fn with_sink(config: CacheConfig, sink: Arc<dyn ProfilerSink>) -> Self {
        Self {
            root_dir: config.dir.clone(),
            metrics: CacheMetrics::new(config.metrics_window()),
            events: EventQueue::new(config.event_queue_capacity),
            config,
            sink,
        }
    }

    pub fn root_dir(&self) -> &Path {
        &self.root_dir
    }

    /// Full path of the file backing `key`.
    pub fn path_for(&self, key: &EntryKey) -> PathBuf {
        self.root_dir.join(entry_file_name(key))
    }

    // ---- read path ----

    /// Read an entry if present, well-formed and within its TTL.
    pub async fn get(&self, key: &EntryKey, opts: GetOptions) -> Option<CachedPage> {
        let path = self.path_for(key);
        let lookup = match self.lookup(key, &path, opts).await {
            Ok(lookup) => lookup,
            Err(e) => {
                log::warn!("Cache read failed for {}: {}", key, e);
                self.metrics.incr(Counter::Error);
                self.metrics.incr(Counter::Miss);
                return None;
            }
        };

        match lookup {
            Lookup::Hit(page) => {
                self.metrics.incr(Counter::Hit);
                match page.status {
                    Freshness::Fresh => self.metrics.incr(Counter::Fresh),
                    Freshness::Stale => self.metrics.incr(Counter::Stale),
                }
                if let Some(domain) = domain_of(key) {
                    self.events.push(ProfilerEvent::CacheHit { domain });
                }
                Some(page)
            }
            Lookup::Expired => {
                log::debug!("Cache expired: {}", key);
                self.metrics.incr(Counter::Expired);
                self.metrics.incr(Counter::Miss);
                None
            }
            Lookup::Miss => {
                self.metrics.incr(Counter::Miss);
                None
            }
            Lookup::Corrupt(reason, detail) => {
                log::warn!("Corrupt cache entry {}: {}", path.display(), detail);
                self.metrics.incr(Counter::Error);
                self.metrics.incr(Counter::Miss);
                if opts.fallback_on_error {
                    if let Err(e) = remove_if_exists(&path).await {
                        log::warn!("Failed to delete corrupt entry {}: {}", path.display(), e);
                    }
                    self.signal_reprofile(key, reason);
                }
                None
            }
        }
    }

    async fn lookup(&self, key: &EntryKey, path: &Path, opts: GetOptions) -> Result<Lookup> {
        let Some(bytes) = read_bytes(path).await? else {
            return Ok(Lookup::Miss);
        };

        let value: Value = match serde_json::from_slice(&bytes) {
            Ok(v) => v,
            Err(e) => {
                return Ok(Lookup::Corrupt(
                    ReprofileReason::CorruptedCache,
                    e.to_string(),
                ));
            }
        };
        if value.get("timestamp").is_none_or(Value::is_null) {
            return Ok(Lookup::Corrupt(
                ReprofileReason::MissingTimestamp,
                "missing timestamp".into(),
            ));
        }
        let file: CacheFile = match serde_json::from_value(value) {
            Ok(f) => f,
            Err(e) => {
                return Ok(Lookup::Corrupt(
                    ReprofileReason::CorruptedCache,
                    e.to_string(),
                ));
            }
        };
        if &file.key != key {
            return Ok(Lookup::Corrupt(
                ReprofileReason::CorruptedCache,
                format!("header key {} does not match {}", file.key, key),
            ));
        }

        let (age, ttl) = self.age_and_ttl(&file, path).await?;
        let status = if age < ttl {
            Freshness::Fresh
        } else if opts.allow_stale {
            Freshness::Stale
        } else {
            return Ok(Lookup::Expired);
        };

        Ok(Lookup::Hit(CachedPage {
            quality: quality::classify(&file.data, self.config.min_text_length),
            key: file.key,
            data: file.data,
            status,
            timestamp: file.timestamp,
            age,
        }))
    }

    /// Age and TTL of an entry under its kind's policy.
    ///
    /// URL entries age by file mtime against the global freshness window;
    /// keyed entries age by header timestamp against their declared TTL.
    pub(crate) async fn age_and_ttl(
        &self,
        file: &CacheFile,
        path: &Path,
    ) -> Result<(Duration, Duration)> {
        match file.key {
            EntryKey::Url { .. } => {
                let modified = tokio::fs::metadata(path).await?.modified()?;
                Ok((age_since(modified), self.config.freshness()))
            }
            EntryKey::Key { .. } => {
                let age = (Utc::now() - file.timestamp).to_std().unwrap_or_default();
                Ok((age, self.config.ttl_for(file.ttl_hours)))
            }
        }
    }

    /// Whether `key` has a fresh entry. Does not count as a lookup.
    pub async fn is_fresh(&self, key: &EntryKey) -> bool {
        let path = self.path_for(key);
        matches!(
            self.lookup(key, &path, GetOptions::default()).await,
            Ok(Lookup::Hit(_))
        )
    }

    // ---- write path ----

    /// Persist a payload under `key`. Returns `false` on any failure.
    pub async fn set<T: Serialize + ?Sized>(
        &self,
        key: &EntryKey,
        payload: &T,
        opts: &SetOptions,
    ) -> bool {
        match self.try_set(key, payload, opts).await {
            Ok(WriteOutcome::Written) => {
                self.metrics.incr(Counter::Write);
                true
            }
            Ok(WriteOutcome::Unchanged) => {
                log::debug!("Cache write skipped, content unchanged: {}", key);
                self.metrics.incr(Counter::SkippedWrite);
                true
            }
            Err(e) => {
                log::warn!("Cache write failed for {}: {}", key, e);
                self.metrics.incr(Counter::Error);
                let reason = match e {
                    AppError::Serialization(_) | AppError::Json(_) => {
                        ReprofileReason::SerializationFailed
                    }
                    _ => ReprofileReason::WriteFailed,
                };
                self.signal_reprofile(key, reason);
                false
            }
        }
    }

    /// Same as `set`, but reports whether the file was actually written.
    pub async fn try_set<T: Serialize + ?Sized>(
        &self,
        key: &EntryKey,
        payload: &T,
        opts: &SetOptions,
    ) -> Result<WriteOutcome> {
        let data = into_object(serde_json::to_value(payload)?);
        let ttl_hours = match key {
            EntryKey::Url { .. } => None,
            EntryKey::Key { .. } => Some(opts.ttl_hours.unwrap_or(self.config.default_ttl_hours)),
        };

        let (file, bytes) = match self.build_entry(key, data.clone(), ttl_hours, opts) {
            Ok(built) => built,
            Err(first) => {
                log::warn!("Retrying {} with filtered payload: {}", key, first);
                self.build_entry(key, filter_payload(data), ttl_hours, opts)
                    .map_err(|e| AppError::serialization(format!("{first}; after filtering: {e}")))?
            }
        };

        let path = self.path_for(key);
        let new_digest = content_digest(&file.data, file.ttl_hours);
        if let Some(existing) = read_bytes(&path).await? {
            let unchanged = serde_json::from_slice::<CacheFile>(&existing)
                .map(|old| content_digest(&old.data, old.ttl_hours) == new_digest)
                .unwrap_or(false);
            if unchanged {
                return Ok(WriteOutcome::Unchanged);
            }
        }

        write_bytes(&path, &bytes).await?;
        if file.quality == Some(Quality::Minimum) {
            self.signal_reprofile(key, ReprofileReason::LowQuality);
        }
        Ok(WriteOutcome::Written)
    }

    fn build_entry(
        &self,
        key: &EntryKey,
        mut data: Value,
        ttl_hours: Option<f64>,
        opts: &SetOptions,
    ) -> Result<(CacheFile, Vec<u8>)> {
        let tier = quality::classify(&data, self.config.min_text_length);
        if let Value::Object(map) = &mut data {
            map.insert("quality".into(), Value::String(tier.as_str().into()));
        }
        let size = serde_json::to_vec(&data)?.len() as u64;
        let file = CacheFile {
            timestamp: Utc::now(),
            data,
            cache_version: CACHE_VERSION.into(),
            key: key.clone(),
            size,
            created_by: opts
                .created_by
                .clone()
                .unwrap_or_else(|| self.config.created_by.clone()),
            quality: key.is_url().then_some(tier),
            ttl_hours,
        };
        let bytes = encode_entry(&file)?;
        Ok((file, bytes))
    }

    // ---- maintenance ----

    /// Delete the entry for `key` so the next read misses.
    pub async fn invalidate(&self, key: &EntryKey) -> bool {
        let path = self.path_for(key);
        match remove_if_exists(&path).await {
            Ok(true) => {
                self.metrics.incr(Counter::Invalidated);
                true
            }
            Ok(false) => false,
            Err(e) => {
                log::warn!("Failed to invalidate {}: {}", key, e);
                self.metrics.incr(Counter::Error);
                false
            }
        }
    }

    /// Delete every entry. Returns the number of files removed.
    pub async fn clear(&self) -> usize {
        let mut removed = 0;
        for path in self.list_files().await {
            match remove_if_exists(&path).await {
                Ok(true) => {
                    removed += 1;
                    self.metrics.incr(Counter::Invalidated);
                }
                Ok(false) => {}
                Err(e) => {
                    log::warn!("Failed to delete {}: {}", path.display(), e);
                    self.metrics.incr(Counter::Error);
                }
            }
        }
        removed
    }

    /// All entry files in the root directory, sorted.
    pub async fn list_files(&self) -> Vec<PathBuf> {
        match list_entry_files(&self.root_dir).await {
            Ok(files) => files,
            Err(e) => {
                log::warn!(
                    "Failed to list cache directory {}: {}",
                    self.root_dir.display(),
                    e
                );
                self.metrics.incr(Counter::Error);
                Vec::new()
            }
        }
    }

    pub fn metrics(&self) -> MetricsSnapshot {
        self.metrics.snapshot()
    }

    // ---- profiler events ----

    /// Queue a reprofile request from a free-form reason.
    ///
    /// Reasons outside the fixed vocabulary are ignored; returns whether the
    /// request was queued.
    pub fn request_reprofile(&self, key: &EntryKey, reason: &str) -> bool {
        match ReprofileReason::parse(reason) {
            Some(reason) => self.signal_reprofile(key, reason),
            None => {
                log::debug!("Ignoring unknown reprofile reason '{}' for {}", reason, key);
                false
            }
        }
    }

    /// Queue a scraping-session notification for the entry's domain.
    pub fn record_session(&self, key: &EntryKey, success: bool) {
        if let Some(domain) = domain_of(key) {
            self.events.push(ProfilerEvent::Session { domain, success });
        }
    }

    /// Deliver queued events to the injected profiler.
    pub async fn flush_events(&self) -> FlushReport {
        let report = self.events.flush(self.sink.as_ref()).await;
        if report.failed > 0 || report.dropped > 0 {
            log::warn!(
                "Profiler flush: {} delivered, {} failed, {} dropped",
                report.delivered,
                report.failed,
                report.dropped
            );
        }
        report
    }

    pub fn pending_events(&self) -> usize {
        self.events.len()
    }

    pub(crate) fn signal_reprofile(&self, key: &EntryKey, reason: ReprofileReason) -> bool {
        match domain_of(key) {
            Some(domain) => {
                self.events.push(ProfilerEvent::Reprofile { domain, reason });
                true
            }
            None => false,
        }
    }
}

fn domain_of(key: &EntryKey) -> Option<String> {
    match key {
        EntryKey::Url { url } => get_domain(url),
        EntryKey::Key { .. } => None,
    }
}

fn into_object(value: Value) -> Value {
    match value {
        Value::Object(_) => value,
        other => {
            let mut map = Map::new();
            map.insert("value".into(), other);
            Value::Object(map)
        }
    }
}

pub(crate) fn age_since(t: SystemTime) -> Duration {
    SystemTime::now().duration_since(t).unwrap_or_default()
}

/// Read bytes, returning None if the file doesn't exist.
pub(crate) async fn read_bytes(path: &Path) -> Result<Option<Vec<u8>>> {
    match tokio::fs::read(path).await {
        Ok(bytes) => Ok(Some(bytes)),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(AppError::Io(e)),
    }
}

/// Unique temp path next to `path`, so concurrent writers never share one.
fn temp_path_for(path: &Path) -> PathBuf {
    static NEXT_TEMP: AtomicU64 = AtomicU64::new(0);
    let seq = NEXT_TEMP.fetch_add(1, Ordering::Relaxed);
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    path.with_file_name(format!("{name}.{}.{seq}.tmp", std::process::id()))
}

/// Write bytes as a whole file (temp file, then rename) and verify the size.
///
/// The size is checked on the temp file, before the rename, so a concurrent
/// writer replacing `path` afterwards can't fail this write.
pub(crate) async fn write_bytes(path: &Path, bytes: &[u8]) -> Result<()> {
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }

    let tmp = temp_path_for(path);
    let result = async {
        let mut file = tokio::fs::File::create(&tmp).await?;
        file.write_all(bytes).await?;
        file.flush().await?;
        drop(file);

        let written = tokio::fs::metadata(&tmp).await?.len();
        if written != bytes.len() as u64 {
            return Err(AppError::corrupt(
                path,
                format!("wrote {} bytes, found {}", bytes.len(), written),
            ));
        }
        tokio::fs::rename(&tmp, path).await?;
        Ok(())
    }
    .await;

    if result.is_err() {
        let _ = remove_if_exists(&tmp).await;
    }
    result
}

/// Remove a file; `Ok(false)` when it was already gone.
pub(crate) async fn remove_if_exists(path: &Path) -> Result<bool> {
    match tokio::fs::remove_file(path).await {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
        Err(e) => Err(AppError::Io(e)),
    }
}

/// List `*.json` files directly under `dir`; a missing directory is empty.
pub async fn list_entry_files(dir: &Path) -> Result<Vec<PathBuf>> {
    let mut entries = match tokio::fs::read_dir(dir).await {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(AppError::Io(e)),
    };

    let mut files = Vec::new();
    while let Some(entry) = entries.next_entry().await? {
        let path = entry.path();
        if path.extension().is_some_and(|ext| ext == ENTRY_EXTENSION)
            && entry.file_type().await?.is_file()
        {
            files.push(path);
        }
    }
    files.sort();
    Ok(files)
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use async_trait::async_trait;
    use serde_json::json;
    use tempfile::TempDir;

    pub(crate) fn store_in(tmp: &TempDir) -> CacheStore {
        CacheStore::new(CacheConfig {
            dir: tmp.path().to_path_buf(),
            ..CacheConfig::default()
        })
    }

    pub(crate) fn careers_payload() -> Value {
        json!({
            "text": "We are hiring a Backend Engineer".repeat(20),
            "links": [{
                "url": "https://acme.com/job/1",
                "text": "Backend Engineer",
                "isJobPosting": true
            }],
            "jobsFound": 1
        })
    }

    /// Move a file's mtime `hours` into the past.
    pub(crate) fn backdate(path: &Path, hours: u64) {
        let when = SystemTime::now() - Duration::from_secs(hours * 3600);
        std::fs::File::options()
            .write(true)
            .open(path)
            .unwrap()
            .set_modified(when)
            .unwrap();
    }

    #[tokio::test]
    async fn test_write_and_read() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("nested/test.json");

        write_bytes(&path, b"hello").await.unwrap();
        let data = read_bytes(&path).await.unwrap();
        assert_eq!(data, Some(b"hello".to_vec()));
    }

    #[tokio::test]
    async fn test_read_nonexistent() {
        let tmp = TempDir::new().unwrap();
        let data = read_bytes(&tmp.path().join("nope.json")).await.unwrap();
        assert!(data.is_none());
    }

    #[tokio::test]
    async fn test_careers_page_is_full_and_fresh() {
        let tmp = TempDir::new().unwrap();
        let store = store_in(&tmp);
        let key = EntryKey::url("https://acme.com/careers");

        assert!(store.set(&key, &careers_payload(), &SetOptions::default()).await);

        let page = store.get(&key, GetOptions::default()).await.unwrap();
        assert_eq!(page.status, Freshness::Fresh);
        assert_eq!(page.quality, Quality::Full);
        assert_eq!(page.data["quality"], "full");

        let raw: Value =
            serde_json::from_slice(&std::fs::read(store.path_for(&key)).unwrap()).unwrap();
        assert_eq!(raw["kind"], "url");
        assert_eq!(raw["quality"], "full");
        assert!(raw["timestamp"].is_string());
    }

    #[tokio::test]
    async fn test_expired_url_entry_misses() {
        let tmp = TempDir::new().unwrap();
        let store = store_in(&tmp);
        let key = EntryKey::url("https://acme.com/careers");
        assert!(store.set(&key, &careers_payload(), &SetOptions::default()).await);

        backdate(&store.path_for(&key), 25);
        let misses_before = store.metrics().misses;

        assert!(store.get(&key, GetOptions::default()).await.is_none());
        let after = store.metrics();
        assert_eq!(after.misses, misses_before + 1);
        assert_eq!(after.expired, 1);
    }

    #[tokio::test]
    async fn test_allow_stale_returns_expired_entry() {
        let tmp = TempDir::new().unwrap();
        let store = store_in(&tmp);
        let key = EntryKey::url("https://acme.com/careers");
        assert!(store.set(&key, &careers_payload(), &SetOptions::default()).await);
        backdate(&store.path_for(&key), 25);

        let opts = GetOptions {
            allow_stale: true,
            ..GetOptions::default()
        };
        let page = store.get(&key, opts).await.unwrap();
        assert_eq!(page.status, Freshness::Stale);
        assert!(page.age >= Duration::from_secs(24 * 3600));
    }

    #[tokio::test]
    async fn test_fresh_just_under_window() {
        let tmp = TempDir::new().unwrap();
        let store = store_in(&tmp);
        let key = EntryKey::url("https://acme.com/careers");
        assert!(store.set(&key, &careers_payload(), &SetOptions::default()).await);
        backdate(&store.path_for(&key), 23);

        assert!(store.is_fresh(&key).await);
    }

    #[tokio::test]
    async fn test_idempotent_set() {
        let tmp = TempDir::new().unwrap();
        let store = store_in(&tmp);
        let key = EntryKey::url("https://acme.com/careers");
        let payload = careers_payload();

        let first = store.try_set(&key, &payload, &SetOptions::default()).await.unwrap();
        assert_eq!(first, WriteOutcome::Written);
        let before = std::fs::read(store.path_for(&key)).unwrap();

        let second = store.try_set(&key, &payload, &SetOptions::default()).await.unwrap();
        assert_eq!(second, WriteOutcome::Unchanged);
        let after = std::fs::read(store.path_for(&key)).unwrap();
        assert_eq!(before, after);

        assert!(store.set(&key, &payload, &SetOptions::default()).await);
        assert_eq!(store.metrics().skipped_writes, 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_writers_same_key() {
        let tmp = TempDir::new().unwrap();
        let store = Arc::new(store_in(&tmp));
        let key = EntryKey::url("https://acme.com/careers");

        for round in 0..10 {
            let handles: Vec<_> = (0..8)
                .map(|i| {
                    let store = Arc::clone(&store);
                    let key = key.clone();
                    tokio::spawn(async move {
                        let mut payload = careers_payload();
                        payload["text"] =
                            Value::from("We are hiring a Backend Engineer. ".repeat(10 + round * 8 + i));
                        store.set(&key, &payload, &SetOptions::default()).await
                    })
                })
                .collect();
            for handle in handles {
                assert!(handle.await.unwrap());
            }
        }

        assert_eq!(store.metrics().errors, 0);
        assert_eq!(store.pending_events(), 0);
        let files: Vec<_> = std::fs::read_dir(tmp.path())
            .unwrap()
            .map(|e| e.unwrap().path())
            .collect();
        assert_eq!(files, vec![store.path_for(&key)]);
        let bytes = std::fs::read(store.path_for(&key)).unwrap();
        assert!(serde_json::from_slice::<CacheFile>(&bytes).is_ok());
    }

    #[tokio::test]
    async fn test_changed_payload_rewrites() {
        let tmp = TempDir::new().unwrap();
        let store = store_in(&tmp);
        let key = EntryKey::url("https://acme.com/careers");
        store.set(&key, &careers_payload(), &SetOptions::default()).await;

        let outcome = store
            .try_set(&key, &json!({"text": "closed"}), &SetOptions::default())
            .await
            .unwrap();
        assert_eq!(outcome, WriteOutcome::Written);
        let page = store.get(&key, GetOptions::default()).await.unwrap();
        assert_eq!(page.quality, Quality::Minimum);
    }

    #[tokio::test]
    async fn test_keyed_entry_uses_declared_ttl() {
        let tmp = TempDir::new().unwrap();
        let store = store_in(&tmp);
        let key = EntryKey::key("search:backend");
        let opts = SetOptions {
            ttl_hours: Some(0.0),
            ..SetOptions::default()
        };
        assert!(store.set(&key, &json!({"ids": [1, 2]}), &opts).await);
        assert!(store.get(&key, GetOptions::default()).await.is_none());

        let long = EntryKey::key("search:frontend");
        let opts = SetOptions {
            ttl_hours: Some(2.0),
            ..SetOptions::default()
        };
        assert!(store.set(&long, &json!({"ids": [3]}), &opts).await);
        // Back-dating mtime does not matter for keyed entries
        backdate(&store.path_for(&long), 48);
        assert!(store.get(&long, GetOptions::default()).await.is_some());
    }

    #[tokio::test]
    async fn test_corrupt_entry_deleted_with_fallback() {
        let tmp = TempDir::new().unwrap();
        let store = store_in(&tmp);
        let key = EntryKey::url("https://acme.com/careers");
        let path = store.path_for(&key);
        std::fs::write(&path, b"{not json").unwrap();

        // Without fallback the file is left alone
        assert!(store.get(&key, GetOptions::default()).await.is_none());
        assert!(path.exists());
        assert_eq!(store.pending_events(), 0);

        let opts = GetOptions {
            fallback_on_error: true,
            ..GetOptions::default()
        };
        assert!(store.get(&key, opts).await.is_none());
        assert!(!path.exists());
        assert_eq!(store.pending_events(), 1);
        assert_eq!(store.metrics().errors, 2);
    }

    #[tokio::test]
    async fn test_missing_timestamp_is_corrupt() {
        let tmp = TempDir::new().unwrap();
        let store = store_in(&tmp);
        let key = EntryKey::url("https://acme.com/careers");
        let path = store.path_for(&key);
        std::fs::write(
            &path,
            serde_json::to_vec(&json!({"kind": "url", "url": "https://acme.com/careers", "data": {}}))
                .unwrap(),
        )
        .unwrap();

        let opts = GetOptions {
            fallback_on_error: true,
            ..GetOptions::default()
        };
        assert!(store.get(&key, opts).await.is_none());
        assert!(!path.exists());
    }

    #[tokio::test]
    async fn test_deep_payload_written_after_filtering() {
        let tmp = TempDir::new().unwrap();
        let store = store_in(&tmp);
        let key = EntryKey::url("https://acme.com/deep");

        let mut nested = json!("leaf");
        for _ in 0..200 {
            nested = json!({ "child": nested });
        }
        let payload = json!({"text": "x", "tree": nested, "browser": {"pid": 1}});

        assert!(store.set(&key, &payload, &SetOptions::default()).await);
        let page = store.get(&key, GetOptions::default()).await.unwrap();
        assert!(page.data.get("browser").is_none());
        assert_eq!(page.data["text"], "x");
    }

    #[tokio::test]
    async fn test_unserializable_payload_fails() {
        use std::collections::HashMap;

        let tmp = TempDir::new().unwrap();
        let store = store_in(&tmp);
        let key = EntryKey::url("https://acme.com/careers");
        // Non-string map keys cannot become JSON
        let payload: HashMap<(u8, u8), u8> = HashMap::from([((1, 2), 3)]);

        assert!(!store.set(&key, &payload, &SetOptions::default()).await);
        assert!(!store.path_for(&key).exists());
        assert_eq!(store.metrics().errors, 1);
        assert_eq!(store.pending_events(), 1);
    }

    #[tokio::test]
    async fn test_invalidate_and_clear() {
        let tmp = TempDir::new().unwrap();
        let store = store_in(&tmp);
        let a = EntryKey::url("https://acme.com/careers");
        let b = EntryKey::key("other");
        store.set(&a, &careers_payload(), &SetOptions::default()).await;
        store.set(&b, &json!({"v": 1}), &SetOptions::default()).await;

        assert!(store.invalidate(&a).await);
        assert!(!store.invalidate(&a).await);
        assert!(store.get(&a, GetOptions::default()).await.is_none());

        assert_eq!(store.clear().await, 1);
        assert!(store.list_files().await.is_empty());
        assert_eq!(store.metrics().invalidated, 2);
    }

    struct CountingSink(AtomicUsize);

    #[async_trait]
    impl ProfilerSink for CountingSink {
        async fn deliver(&self, _event: &ProfilerEvent) -> Result<()> {
            self.0.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_profiler_events_flow_through_sink() {
        let tmp = TempDir::new().unwrap();
        let sink = Arc::new(CountingSink(AtomicUsize::new(0)));
        let store = CacheStore::with_sink(
            CacheConfig {
                dir: tmp.path().to_path_buf(),
                ..CacheConfig::default()
            },
            sink.clone(),
        );
        let key = EntryKey::url("https://acme.com/careers");
        store.set(&key, &careers_payload(), &SetOptions::default()).await;
        store.get(&key, GetOptions::default()).await;
        store.record_session(&key, true);
        assert!(store.request_reprofile(&key, "corrupted_cache"));
        assert!(!store.request_reprofile(&key, "made_up_reason"));

        let report = store.flush_events().await;
        assert_eq!(report.delivered, 3);
        assert_eq!(sink.0.load(Ordering::SeqCst), 3);
    }
}
