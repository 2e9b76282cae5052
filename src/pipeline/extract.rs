//! Opportunity extraction from cache entries.

use std::collections::{BTreeSet, HashSet};
use std::path::{Path, PathBuf};

use futures::stream::{self, Stream, StreamExt};
use serde_json::Value;

use crate::error::{AppError, Result};
use crate::models::{CacheFile, EntryKey, Opportunity};
use crate::scoring::{Language, tokenize};
use crate::storage::quality::is_job_posting;
use crate::utils::{collapse_whitespace, get_domain, resolve};

/// Confidence assumed when a link carries none.
pub const DEFAULT_CONFIDENCE: f64 = 0.5;

/// Language of a payload: its `language` field, else a guess from its text.
pub fn detect_language(data: &Value) -> String {
    if let Some(tag) = data.get("language").and_then(Value::as_str) {
        let lang = Language::parse(tag);
        if lang != Language::Other {
            return lang.code().to_string();
        }
    }
    let text = data.get("text").and_then(Value::as_str).unwrap_or_default();
    Language::detect(text).code().to_string()
}

/// Pull job-posting links out of one decoded entry.
///
/// Only URL entries carry postings. Links without a usable title or URL
/// are skipped; duplicate URLs within one page keep the first link.
pub fn extract_opportunities(file: &CacheFile, source_file: &Path) -> Vec<Opportunity> {
    let EntryKey::Url { url: page_url } = &file.key else {
        return Vec::new();
    };
    let Some(links) = file.data.get("links").and_then(Value::as_array) else {
        return Vec::new();
    };
    let page_domain = get_domain(page_url).unwrap_or_default();
    let language = detect_language(&file.data);

    let mut seen = HashSet::new();
    let mut out = Vec::new();
    for link in links.iter().filter(|l| is_job_posting(l)) {
        let Some(href) = link.get("url").and_then(Value::as_str) else {
            continue;
        };
        let url = resolve(page_url, href).unwrap_or_else(|| href.to_string());
        let title = link
            .get("text")
            .or_else(|| link.get("title"))
            .and_then(Value::as_str)
            .map(collapse_whitespace)
            .unwrap_or_default();
        if title.is_empty() || !seen.insert(url.clone()) {
            continue;
        }

        let mut keywords: BTreeSet<String> = tokenize(&title).into_iter().collect();
        if let Some(extra) = link.get("keywords").and_then(Value::as_array) {
            keywords.extend(
                extra
                    .iter()
                    .filter_map(Value::as_str)
                    .map(|k| k.trim().to_lowercase())
                    .filter(|k| !k.is_empty()),
            );
        }

        out.push(Opportunity {
            domain: get_domain(&url).unwrap_or_else(|| page_domain.clone()),
            description: link
                .get("description")
                .and_then(Value::as_str)
                .map(collapse_whitespace)
                .unwrap_or_default(),
            language: link
                .get("language")
                .and_then(Value::as_str)
                .map(|tag| Language::parse(tag).code().to_string())
                .unwrap_or_else(|| language.clone()),
            scraped_at: file.timestamp,
            confidence: link
                .get("confidence")
                .and_then(Value::as_f64)
                .unwrap_or(DEFAULT_CONFIDENCE)
                .clamp(0.0, 1.0),
            keywords,
            source_file: source_file.to_path_buf(),
            title,
            url,
        });
    }
    out
}

/// Read one cache file and extract its opportunities.
pub async fn read_opportunities(path: &Path) -> Result<Vec<Opportunity>> {
    let bytes = tokio::fs::read(path).await?;
    let file: CacheFile =
        serde_json::from_slice(&bytes).map_err(|e| AppError::corrupt(path, e))?;
    Ok(extract_opportunities(&file, path))
}

/// Lazily yield opportunities file by file.
///
/// Each call builds a fresh stream over `files`; nothing is shared between
/// invocations, so consumers can stop early or start over. Unreadable files
/// are logged and skipped.
pub fn opportunity_stream(files: Vec<PathBuf>) -> impl Stream<Item = Opportunity> {
    stream::iter(files)
        .then(|path| async move {
            match read_opportunities(&path).await {
                Ok(found) => found,
                Err(e) => {
                    log::debug!("Skipping {}: {}", path.display(), e);
                    Vec::new()
                }
            }
        })
        .flat_map(stream::iter)
}
