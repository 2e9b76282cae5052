//! Whole-store maintenance: consistency scan, in-place repair, TTL sweep.
//!
//! All three walk every entry file. Entry kind comes from the header
//! (`kind`, or the presence of `url` / `key` on older files), never from
//! the file name.

use std::path::{Path, PathBuf};
use std::time::SystemTime;

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::{Map, Value};

use crate::error::{AppError, Result};
use crate::models::{CACHE_VERSION, CacheFile};
use crate::storage::local::{
    CacheStore, age_since, read_bytes, remove_if_exists, write_bytes,
};
use crate::storage::metrics::Counter;
use crate::storage::quality;

/// One problem found in one file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ConsistencyIssue {
    pub file: PathBuf,
    pub problem: String,
}

/// Result of `validate_consistency`.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConsistencyReport {
    pub total: usize,
    pub healthy: usize,
    /// First issues found, capped at `cache.max_issues`
    pub issues: Vec<ConsistencyIssue>,
    /// Issues found beyond the cap
    pub omitted: usize,
    pub health_percent: f64,
}

/// Result of `repair`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct RepairReport {
    pub scanned: usize,
    pub repaired: usize,
    pub deleted: usize,
}

/// Result of `sweep_expired`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SweepReport {
    pub scanned: usize,
    pub deleted: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Kind {
    Url,
    Key,
}

impl Kind {
    fn field(self) -> &'static str {
        match self {
            Kind::Url => "url",
            Kind::Key => "key",
        }
    }
}

fn header_kind(header: &Map<String, Value>) -> Option<Kind> {
    match header.get("kind").and_then(Value::as_str) {
        Some("url") => Some(Kind::Url),
        Some("key") => Some(Kind::Key),
        Some(_) => None,
        None if header.get("url").is_some_and(Value::is_string) => Some(Kind::Url),
        None if header.get("key").is_some_and(Value::is_string) => Some(Kind::Key),
        None => None,
    }
}

fn header_timestamp(header: &Map<String, Value>) -> Option<DateTime<Utc>> {
    header
        .get("timestamp")
        .and_then(Value::as_str)
        .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
        .map(|t| t.with_timezone(&Utc))
}

/// Problems with the fields an entry cannot live without.
fn mandatory_problems(header: &Map<String, Value>) -> Vec<String> {
    let mut problems = Vec::new();
    if header_timestamp(header).is_none() {
        problems.push("missing or invalid timestamp".to_string());
    }
    if !header.get("data").is_some_and(Value::is_object) {
        problems.push("missing data object".to_string());
    }
    match header_kind(header) {
        None => problems.push("missing url/key identity".to_string()),
        Some(kind) => {
            if !header.get(kind.field()).is_some_and(Value::is_string) {
                problems.push(format!("kind is {} but {} is missing", kind.field(), kind.field()));
            }
        }
    }
    problems
}

/// Problems `repair` can fix in place.
fn schema_gaps(header: &Map<String, Value>) -> Vec<String> {
    let mut gaps = Vec::new();
    if !header.get("kind").is_some_and(Value::is_string) {
        gaps.push("missing kind tag".to_string());
    }
    if !header.get("cacheVersion").is_some_and(Value::is_string) {
        gaps.push("missing cacheVersion".to_string());
    }
    if header_kind(header) == Some(Kind::Key) && !header.get("ttlHours").is_some_and(Value::is_number)
    {
        gaps.push("missing ttlHours".to_string());
    }
    if let Some(links) = header.get("data").and_then(|d| d.get("links")) {
        if !links.is_array() {
            gaps.push("links is not an array".to_string());
        }
    }
    gaps
}

impl CacheStore {
    /// Scan every entry for missing or malformed fields.
    pub async fn validate_consistency(&self) -> ConsistencyReport {
        let files = self.list_files().await;
        let mut issues = Vec::new();
        let mut omitted = 0;
        let mut healthy = 0;

        for path in &files {
            let problems = match read_header(path).await {
                Ok(header) => {
                    let mut problems = mandatory_problems(&header);
                    problems.extend(schema_gaps(&header));
                    problems
                }
                Err(e) => vec![e.to_string()],
            };

            if problems.is_empty() {
                healthy += 1;
                continue;
            }
            for problem in problems {
                if issues.len() < self.config.max_issues {
                    issues.push(ConsistencyIssue {
                        file: path.clone(),
                        problem,
                    });
                } else {
                    omitted += 1;
                }
            }
        }

        let total = files.len();
        ConsistencyReport {
            total,
            healthy,
            issues,
            omitted,
            health_percent: if total == 0 {
                100.0
            } else {
                healthy as f64 / total as f64 * 100.0
            },
        }
    }

    /// Fix schema gaps in place; delete entries missing mandatory fields.
    ///
    /// Repaired files keep their original mtime so URL freshness is not
    /// reset by maintenance.
    pub async fn repair(&self) -> RepairReport {
        let mut report = RepairReport::default();
        for path in self.list_files().await {
            report.scanned += 1;
            match self.repair_file(&path).await {
                Ok(RepairAction::None) => {}
                Ok(RepairAction::Repaired) => report.repaired += 1,
                Ok(RepairAction::Deleted) => report.deleted += 1,
                Err(e) => {
                    log::warn!("Repair failed for {}: {}", path.display(), e);
                    self.metrics.incr(Counter::Error);
                }
            }
        }
        log::info!(
            "Repair: {} scanned, {} repaired, {} deleted",
            report.scanned,
            report.repaired,
            report.deleted
        );
        report
    }

    async fn repair_file(&self, path: &Path) -> Result<RepairAction> {
        let mut header = match read_header(path).await {
            Ok(header) => header,
            Err(AppError::Corrupt { reason, .. }) => {
                log::info!("Deleting unparseable entry {}: {}", path.display(), reason);
                remove_if_exists(path).await?;
                return Ok(RepairAction::Deleted);
            }
            Err(e) => return Err(e),
        };

        let problems = mandatory_problems(&header);
        if !problems.is_empty() {
            log::info!("Deleting entry {}: {}", path.display(), problems.join(", "));
            remove_if_exists(path).await?;
            return Ok(RepairAction::Deleted);
        }

        let original = header.clone();
        let Some(kind) = header_kind(&header) else {
            return Ok(RepairAction::None);
        };
        header.insert("kind".into(), Value::String(kind.field().into()));
        header
            .entry("cacheVersion")
            .or_insert_with(|| Value::String(CACHE_VERSION.into()));
        header
            .entry("createdBy")
            .or_insert_with(|| Value::String(self.config.created_by.clone()));

        if let Some(Value::Object(data)) = header.get_mut("data") {
            if data.get("links").is_some_and(|l| !l.is_array()) {
                data.insert("links".into(), Value::Array(Vec::new()));
            }
        }
        let data = header.get("data").cloned().unwrap_or(Value::Null);
        let tier = quality::classify(&data, self.config.min_text_length);
        if let Some(Value::Object(data)) = header.get_mut("data") {
            data.insert("quality".into(), Value::String(tier.as_str().into()));
        }

        match kind {
            Kind::Url => {
                header.insert("quality".into(), Value::String(tier.as_str().into()));
            }
            Kind::Key => {
                if !header.get("ttlHours").is_some_and(Value::is_number) {
                    header.insert("ttlHours".into(), Value::from(self.config.default_ttl_hours));
                }
            }
        }
        let size = header
            .get("data")
            .map(|d| serde_json::to_vec(d).map(|b| b.len()))
            .transpose()?
            .unwrap_or(0);
        header.insert("size".into(), Value::from(size));

        let unchanged = header == original;
        let repaired: CacheFile = match serde_json::from_value(Value::Object(header)) {
            Ok(file) => file,
            Err(e) => {
                log::info!(
                    "Deleting entry {}: still invalid after repair: {}",
                    path.display(),
                    e
                );
                remove_if_exists(path).await?;
                return Ok(RepairAction::Deleted);
            }
        };
        if unchanged {
            return Ok(RepairAction::None);
        }

        let bytes = serde_json::to_vec_pretty(&repaired)?;
        let modified = tokio::fs::metadata(path).await?.modified()?;
        write_bytes(path, &bytes).await?;
        restore_mtime(path, modified).await?;

        log::debug!("Repaired {}", path.display());
        Ok(RepairAction::Repaired)
    }

    /// Delete entries past their TTL.
    ///
    /// URL entries are kept for `retention_hours` of mtime age; keyed
    /// entries expire at `timestamp + ttlHours`. Unparseable files are left
    /// for `repair`.
    pub async fn sweep_expired(&self) -> SweepReport {
        let mut report = SweepReport::default();
        for path in self.list_files().await {
            report.scanned += 1;
            match self.is_past_ttl(&path).await {
                Ok(true) => match remove_if_exists(&path).await {
                    Ok(true) => {
                        report.deleted += 1;
                        self.metrics.incr(Counter::Invalidated);
                    }
                    Ok(false) => {}
                    Err(e) => {
                        log::warn!("Failed to delete {}: {}", path.display(), e);
                        self.metrics.incr(Counter::Error);
                    }
                },
                Ok(false) => {}
                Err(e) => log::debug!("Sweep skipped {}: {}", path.display(), e),
            }
        }
        if report.deleted > 0 {
            log::info!("Swept {} expired entries", report.deleted);
        }
        report
    }

    async fn is_past_ttl(&self, path: &Path) -> Result<bool> {
        let header = read_header(path).await?;
        match header_kind(&header) {
            Some(Kind::Url) => {
                let modified = tokio::fs::metadata(path).await?.modified()?;
                Ok(age_since(modified) >= self.config.retention())
            }
            Some(Kind::Key) => {
                let timestamp = header_timestamp(&header)
                    .ok_or_else(|| AppError::corrupt(path, "missing timestamp"))?;
                let ttl = self
                    .config
                    .ttl_for(header.get("ttlHours").and_then(Value::as_f64));
                let age = (Utc::now() - timestamp).to_std().unwrap_or_default();
                Ok(age >= ttl)
            }
            None => Err(AppError::corrupt(path, "missing url/key identity")),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RepairAction {
    None,
    Repaired,
    Deleted,
}

/// Read and parse a file as a JSON object.
async fn read_header(path: &Path) -> Result<Map<String, Value>> {
    let bytes = read_bytes(path)
        .await?
        .ok_or_else(|| AppError::corrupt(path, "file vanished"))?;
    match serde_json::from_slice::<Value>(&bytes) {
        Ok(Value::Object(map)) => Ok(map),
        Ok(_) => Err(AppError::corrupt(path, "entry is not a JSON object")),
        Err(e) => Err(AppError::corrupt(path, e)),
    }
}

async fn restore_mtime(path: &Path, modified: SystemTime) -> Result<()> {
    let path = path.to_path_buf();
    tokio::task::spawn_blocking(move || {
        std::fs::File::options()
            .write(true)
            .open(&path)?
            .set_modified(modified)
    })
    .await
    .map_err(|e| AppError::Task(e.to_string()))??;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{EntryKey, GetOptions, SetOptions};
    use crate::storage::local::tests::{backdate, careers_payload, store_in};
    use serde_json::json;
    use tempfile::TempDir;

    fn write_raw(dir: &Path, name: &str, value: &Value) -> PathBuf {
        let path = dir.join(name);
        std::fs::write(&path, serde_json::to_vec(value).unwrap()).unwrap();
        path
    }

    fn legacy_url_entry() -> Value {
        json!({
            "timestamp": Utc::now().to_rfc3339(),
            "url": "https://acme.com/careers",
            "data": {"text": "hello", "links": "not-a-list"},
            "size": 1,
            "createdBy": "legacy"
        })
    }

    #[tokio::test]
    async fn test_healthy_store() {
        let tmp = TempDir::new().unwrap();
        let store = store_in(&tmp);
        store
            .set(&EntryKey::url("https://acme.com/careers"), &careers_payload(), &SetOptions::default())
            .await;
        store
            .set(&EntryKey::key("report"), &json!({"n": 1}), &SetOptions::default())
            .await;

        let report = store.validate_consistency().await;
        assert_eq!(report.total, 2);
        assert_eq!(report.healthy, 2);
        assert!(report.issues.is_empty());
        assert!((report.health_percent - 100.0).abs() < f64::EPSILON);
    }

    #[tokio::test]
    async fn test_issues_are_capped() {
        let tmp = TempDir::new().unwrap();
        let store = store_in(&tmp);
        for i in 0..15 {
            write_raw(tmp.path(), &format!("broken_{i}.json"), &json!({"foo": i}));
        }

        let report = store.validate_consistency().await;
        assert_eq!(report.total, 15);
        assert_eq!(report.healthy, 0);
        assert_eq!(report.issues.len(), 10);
        assert!(report.omitted > 0);
        assert_eq!(report.health_percent, 0.0);
    }

    #[tokio::test]
    async fn test_repair_patches_gaps_and_keeps_mtime() {
        let tmp = TempDir::new().unwrap();
        let store = store_in(&tmp);
        let key = EntryKey::url("https://acme.com/careers");
        let path = store.path_for(&key);
        std::fs::write(&path, serde_json::to_vec(&legacy_url_entry()).unwrap()).unwrap();
        backdate(&path, 2);
        let before = std::fs::metadata(&path).unwrap().modified().unwrap();

        let report = store.repair().await;
        assert_eq!(report.repaired, 1);
        assert_eq!(report.deleted, 0);

        let after = std::fs::metadata(&path).unwrap().modified().unwrap();
        assert_eq!(before, after);

        let raw: Value = serde_json::from_slice(&std::fs::read(&path).unwrap()).unwrap();
        assert_eq!(raw["kind"], "url");
        assert_eq!(raw["cacheVersion"], CACHE_VERSION);
        assert_eq!(raw["quality"], "minimum");
        assert_eq!(raw["data"]["links"], json!([]));

        // Repaired entries are readable again
        assert!(store.get(&key, GetOptions::default()).await.is_some());
        // A second pass has nothing to do
        assert_eq!(store.repair().await.repaired, 0);
    }

    #[tokio::test]
    async fn test_repair_deletes_unsalvageable() {
        let tmp = TempDir::new().unwrap();
        let store = store_in(&tmp);
        let garbage = tmp.path().join("garbage.json");
        std::fs::write(&garbage, b"{{{").unwrap();
        let no_ts = write_raw(
            tmp.path(),
            "no_ts.json",
            &json!({"url": "https://acme.com/", "data": {}}),
        );

        let report = store.repair().await;
        assert_eq!(report.deleted, 2);
        assert!(!garbage.exists());
        assert!(!no_ts.exists());
    }

    #[tokio::test]
    async fn test_repair_deletes_entry_with_mistyped_field() {
        let tmp = TempDir::new().unwrap();
        let store = store_in(&tmp);
        let path = write_raw(
            tmp.path(),
            "bad_creator.json",
            &json!({
                "timestamp": Utc::now().to_rfc3339(),
                "kind": "key",
                "key": "report",
                "data": {"n": 1},
                "cacheVersion": "2.0",
                "createdBy": 42,
                "ttlHours": 24.0,
                "size": 7
            }),
        );

        let report = store.repair().await;
        assert_eq!(report.deleted, 1);
        assert_eq!(store.metrics().errors, 0);
        assert!(!path.exists());

        // A second pass finds nothing left to fail on
        let again = store.repair().await;
        assert_eq!(again.scanned, 0);
    }

    #[tokio::test]
    async fn test_repair_injects_ttl_for_keyed_entry() {
        let tmp = TempDir::new().unwrap();
        let store = store_in(&tmp);
        let path = write_raw(
            tmp.path(),
            "key_report.json",
            &json!({
                "timestamp": Utc::now().to_rfc3339(),
                "key": "report",
                "data": {"n": 1}
            }),
        );

        assert_eq!(store.repair().await.repaired, 1);
        let raw: Value = serde_json::from_slice(&std::fs::read(&path).unwrap()).unwrap();
        assert_eq!(raw["kind"], "key");
        assert_eq!(raw["ttlHours"], json!(24.0));
        assert!(raw.get("quality").is_none());
    }

    #[tokio::test]
    async fn test_sweep_removes_only_expired() {
        let tmp = TempDir::new().unwrap();
        let store = store_in(&tmp);
        let old = EntryKey::url("https://acme.com/old");
        let recent = EntryKey::url("https://acme.com/recent");
        let short = EntryKey::key("short-lived");
        store.set(&old, &careers_payload(), &SetOptions::default()).await;
        store.set(&recent, &careers_payload(), &SetOptions::default()).await;
        store
            .set(
                &short,
                &json!({"n": 1}),
                &SetOptions {
                    ttl_hours: Some(0.0),
                    ..SetOptions::default()
                },
            )
            .await;

        // Past the 168h retention window
        backdate(&store.path_for(&old), 200);
        // Stale for reads but still retained
        backdate(&store.path_for(&recent), 30);

        let report = store.sweep_expired().await;
        assert_eq!(report.scanned, 3);
        assert_eq!(report.deleted, 2);
        assert!(!store.path_for(&old).exists());
        assert!(store.path_for(&recent).exists());
        assert!(!store.path_for(&short).exists());
        assert_eq!(store.metrics().invalidated, 2);
    }
}
