//! In-memory multi-dimensional index over extracted opportunities.
//!
//! Maps opportunities by domain (then language), language, keyword and
//! URL. The URL map owns the records; the others hold URLs. Each source
//! file has a modification-time watermark so unchanged files are skipped on
//! rebuild.
//!
//! Reads during a rebuild may see a partly updated index; every mutation
//! happens under the write lock, one chunk at a time.

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Instant, SystemTime};

use chrono::{DateTime, Utc};
use parking_lot::RwLock;

use crate::error::Result;
use crate::models::{
    Config, IndexConfig, IndexPage, IndexStats, Opportunity, ScoredOpportunity,
};
use crate::pipeline::{StopReason, StreamProcessor, chunked, read_opportunities};
use crate::scoring::fuzzy::{token_overlap, tokenize, tokens_match};
use crate::scoring::keywords::{Language, variants};
use crate::storage::list_entry_files;

/// Ranking score of a title match: overlap weighted by confidence.
pub fn rank_score(overlap: f64, confidence: f64) -> f64 {
    overlap * (0.5 + 0.5 * confidence.clamp(0.0, 1.0))
}

/// Score an opportunity against pre-tokenized query words.
pub fn score_opportunity(query_tokens: &[String], opportunity: &Opportunity) -> ScoredOpportunity {
    let fuzzy = token_overlap(query_tokens, &tokenize(&opportunity.title));
    ScoredOpportunity {
        score: rank_score(fuzzy, opportunity.confidence),
        fuzzy,
        opportunity: opportunity.clone(),
    }
}

/// Order by score desc, then newest, then URL.
pub fn by_relevance(a: &ScoredOpportunity, b: &ScoredOpportunity) -> std::cmp::Ordering {
    b.score
        .total_cmp(&a.score)
        .then_with(|| b.opportunity.scraped_at.cmp(&a.opportunity.scraped_at))
        .then_with(|| a.opportunity.url.cmp(&b.opportunity.url))
}

#[derive(Debug, Default)]
struct IndexState {
    /// domain -> language -> urls
    domain_index: HashMap<String, HashMap<String, HashSet<String>>>,
    language_index: HashMap<String, HashSet<String>>,
    keyword_index: HashMap<String, HashSet<String>>,
    url_index: HashMap<String, Opportunity>,
    /// Every URL each file listed, winners or not
    file_urls: HashMap<PathBuf, HashSet<String>>,
    last_index_update: HashMap<PathBuf, SystemTime>,
    built_at: Option<DateTime<Utc>>,
    last_build_ms: u64,
    evicted: usize,
}

impl IndexState {
    fn insert(&mut self, opportunity: Opportunity) {
        if let Some(existing) = self.url_index.get(&opportunity.url) {
            if !opportunity.supersedes(existing) {
                return;
            }
            let url = opportunity.url.clone();
            self.remove_url(&url);
        }

        let url = opportunity.url.clone();
        self.domain_index
            .entry(opportunity.domain.clone())
            .or_default()
            .entry(opportunity.language.clone())
            .or_default()
            .insert(url.clone());
        self.language_index
            .entry(opportunity.language.clone())
            .or_default()
            .insert(url.clone());
        for keyword in &opportunity.keywords {
            self.keyword_index
                .entry(keyword.clone())
                .or_default()
                .insert(url.clone());
        }
        self.url_index.insert(url, opportunity);
    }

    fn remove_url(&mut self, url: &str) -> Option<Opportunity> {
        let opportunity = self.url_index.remove(url)?;

        if let Some(languages) = self.domain_index.get_mut(&opportunity.domain) {
            if let Some(urls) = languages.get_mut(&opportunity.language) {
                urls.remove(url);
                if urls.is_empty() {
                    languages.remove(&opportunity.language);
                }
            }
            if languages.is_empty() {
                self.domain_index.remove(&opportunity.domain);
            }
        }
        remove_from(&mut self.language_index, &opportunity.language, url);
        for keyword in &opportunity.keywords {
            remove_from(&mut self.keyword_index, keyword, url);
        }
        Some(opportunity)
    }

    /// Drop everything a file contributed.
    ///
    /// Other files that listed one of its winning URLs lose their watermark
    /// so their copy is picked up on the next build.
    fn remove_file(&mut self, path: &Path) {
        let Some(urls) = self.file_urls.remove(path) else {
            return;
        };
        for url in &urls {
            let owned = self
                .url_index
                .get(url)
                .is_some_and(|o| o.source_file == path);
            if !owned {
                continue;
            }
            self.remove_url(url);
            let others: Vec<PathBuf> = self
                .file_urls
                .iter()
                .filter(|(_, listed)| listed.contains(url))
                .map(|(p, _)| p.clone())
                .collect();
            for other in others {
                self.last_index_update.remove(&other);
            }
        }
    }

    /// Evict the oldest opportunities by `scraped_at` once over `max_size`.
    fn evict_oldest(&mut self, max_size: usize, fraction: f64) -> usize {
        let len = self.url_index.len();
        if len <= max_size {
            return 0;
        }
        let count = ((len as f64 * fraction).ceil() as usize).max(len - max_size);
        let mut by_age: Vec<(DateTime<Utc>, String)> = self
            .url_index
            .values()
            .map(|o| (o.scraped_at, o.url.clone()))
            .collect();
        by_age.sort();
        for (_, url) in by_age.iter().take(count) {
            self.remove_url(url);
        }
        count
    }

    fn stats(&self) -> IndexStats {
        IndexStats {
            opportunities: self.url_index.len(),
            domains: self.domain_index.len(),
            languages: self.language_index.len(),
            keywords: self.keyword_index.len(),
            files: self.last_index_update.len(),
            built_at: self.built_at,
            last_build_ms: self.last_build_ms,
            evicted: self.evicted,
        }
    }

    fn collect(&self, urls: impl IntoIterator<Item = String>) -> Vec<Opportunity> {
        urls.into_iter()
            .filter_map(|u| self.url_index.get(&u).cloned())
            .collect()
    }
}

fn remove_from(map: &mut HashMap<String, HashSet<String>>, key: &str, url: &str) {
    if let Some(urls) = map.get_mut(key) {
        urls.remove(url);
        if urls.is_empty() {
            map.remove(key);
        }
    }
}

/// Clears the building flag when a build ends, however it ends.
struct BuildGuard<'a>(&'a AtomicBool);

impl Drop for BuildGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

/// Owner of one index instance.
#[derive(Debug)]
pub struct Indexer {
    state: RwLock<IndexState>,
    config: IndexConfig,
    processor: StreamProcessor,
    fuzzy_threshold: f64,
    building: AtomicBool,
    build_lock: tokio::sync::Mutex<()>,
}

impl Indexer {
    pub fn new(config: IndexConfig, processor: StreamProcessor, fuzzy_threshold: f64) -> Self {
        Self {
            state: RwLock::new(IndexState::default()),
            config,
            processor,
            fuzzy_threshold,
            building: AtomicBool::new(false),
            build_lock: tokio::sync::Mutex::new(()),
        }
    }

    pub fn from_config(config: &Config) -> Self {
        Self::new(
            config.index.clone(),
            StreamProcessor::new(config.stream.clone()),
            config.scoring.fuzzy_threshold,
        )
    }

    /// Whether at least one build has completed.
    pub fn is_ready(&self) -> bool {
        self.state.read().built_at.is_some()
    }

    pub fn is_building(&self) -> bool {
        self.building.load(Ordering::Acquire)
    }

    /// Never built, or last build older than the rebuild threshold.
    pub fn needs_rebuild(&self) -> bool {
        match self.state.read().built_at {
            None => true,
            Some(at) => (Utc::now() - at)
                .to_std()
                .map(|age| age >= self.config.rebuild_threshold())
                .unwrap_or(false),
        }
    }

    pub fn stats(&self) -> IndexStats {
        self.state.read().stats()
    }

    /// Drop all indexed data and watermarks.
    pub fn clear(&self) {
        *self.state.write() = IndexState::default();
    }

    /// Index every changed cache file under `source_dir`.
    ///
    /// Concurrent calls run one after another. Returns an error only when
    /// the directory can't be listed.
    pub async fn build_index(&self, source_dir: &Path) -> Result<IndexStats> {
        let _serial = self.build_lock.lock().await;
        self.building.store(true, Ordering::Release);
        let _guard = BuildGuard(&self.building);
        let started = Instant::now();

        let files = list_entry_files(source_dir).await?;
        let mut mtimes: HashMap<PathBuf, SystemTime> = HashMap::with_capacity(files.len());
        for path in files {
            match tokio::fs::metadata(&path).await.and_then(|m| m.modified()) {
                Ok(modified) => {
                    mtimes.insert(path, modified);
                }
                Err(e) => log::debug!("Skipping {}: {}", path.display(), e),
            }
        }

        let changed: Vec<PathBuf> = {
            let mut state = self.state.write();
            let gone: Vec<PathBuf> = state
                .file_urls
                .keys()
                .chain(state.last_index_update.keys())
                .filter(|p| !mtimes.contains_key(*p))
                .cloned()
                .collect();
            for path in &gone {
                state.remove_file(path);
                state.last_index_update.remove(path);
            }

            let mut changed: Vec<PathBuf> = mtimes
                .iter()
                .filter(|(path, modified)| {
                    state
                        .last_index_update
                        .get(*path)
                        .is_none_or(|watermark| *modified > watermark)
                })
                .map(|(path, _)| path.clone())
                .collect();
            changed.sort();
            changed
        };
        log::info!(
            "Indexing {} changed of {} cache files",
            changed.len(),
            mtimes.len()
        );

        let opts = self.processor.default_options();
        for chunk in chunked(&changed, self.config.chunk_size) {
            let outcome = self
                .processor
                .process_files_batch(
                    chunk,
                    |path| async move {
                        let found = read_opportunities(&path).await?;
                        Ok(vec![(path, found)])
                    },
                    &opts,
                )
                .await;

            {
                let mut state = self.state.write();
                for (path, found) in outcome.results {
                    state.remove_file(&path);
                    state
                        .file_urls
                        .insert(path.clone(), found.iter().map(|o| o.url.clone()).collect());
                    for opportunity in found {
                        state.insert(opportunity);
                    }
                    if let Some(modified) = mtimes.get(&path) {
                        state.last_index_update.insert(path, *modified);
                    }
                }
            }

            if outcome.stats.stop_reason == StopReason::ErrorThreshold {
                log::warn!(
                    "Index build stopped: {}/{} files failed in chunk",
                    outcome.stats.error_count,
                    outcome.stats.processed_files
                );
                break;
            }
            tokio::task::yield_now().await;
        }

        let mut state = self.state.write();
        let evicted = state.evict_oldest(self.config.max_size, self.config.eviction_fraction);
        if evicted > 0 {
            log::info!("Evicted {} oldest opportunities", evicted);
        }
        state.evicted += evicted;
        state.built_at = Some(Utc::now());
        state.last_build_ms = started.elapsed().as_millis() as u64;
        let stats = state.stats();
        log::info!(
            "Index built: {} opportunities, {} domains, {} keywords in {}ms",
            stats.opportunities,
            stats.domains,
            stats.keywords,
            stats.last_build_ms
        );
        Ok(stats)
    }

    /// Opportunities from one domain, newest first.
    pub fn search_by_domain(
        &self,
        domain: &str,
        language: Option<&str>,
        limit: usize,
        offset: usize,
    ) -> IndexPage<Opportunity> {
        let domain = normalize_domain(domain);
        let state = self.state.read();
        let urls: Vec<String> = match state.domain_index.get(&domain) {
            Some(languages) => languages
                .iter()
                .filter(|(lang, _)| language.is_none_or(|l| l == lang.as_str()))
                .flat_map(|(_, urls)| urls.iter().cloned())
                .collect(),
            None => Vec::new(),
        };
        let mut found = state.collect(urls);
        drop(state);

        found.sort_by(|a, b| b.scraped_at.cmp(&a.scraped_at).then_with(|| a.url.cmp(&b.url)));
        IndexPage::from_ranked(found, limit, offset)
    }

    /// Opportunities tagged with `keyword` or one of its variants.
    pub fn search_by_keyword(
        &self,
        keyword: &str,
        language: Option<&str>,
        limit: usize,
        offset: usize,
    ) -> IndexPage<Opportunity> {
        let lang = language.map(Language::parse).unwrap_or_default();
        let state = self.state.read();
        let mut urls = HashSet::new();
        for form in variants(keyword, lang) {
            if let Some(hits) = state.keyword_index.get(&form) {
                urls.extend(hits.iter().cloned());
            }
        }
        let mut found: Vec<Opportunity> = state
            .collect(urls)
            .into_iter()
            .filter(|o| language.is_none_or(|l| o.language == l))
            .collect();
        drop(state);

        found.sort_by(|a, b| {
            b.confidence
                .total_cmp(&a.confidence)
                .then_with(|| b.scraped_at.cmp(&a.scraped_at))
                .then_with(|| a.url.cmp(&b.url))
        });
        IndexPage::from_ranked(found, limit, offset)
    }

    /// Page of opportunities whose title matches `query` above the default
    /// fuzzy threshold.
    pub fn search_by_job_title(
        &self,
        query: &str,
        language: Option<&str>,
        limit: usize,
        offset: usize,
    ) -> IndexPage<ScoredOpportunity> {
        let ranked = self.rank_job_title(query, language, self.fuzzy_threshold);
        IndexPage::from_ranked(ranked, limit, offset)
    }

    /// Every opportunity matching `query` at or above `threshold`, ranked.
    pub fn rank_job_title(
        &self,
        query: &str,
        language: Option<&str>,
        threshold: f64,
    ) -> Vec<ScoredOpportunity> {
        let query_tokens = tokenize(query);
        if query_tokens.is_empty() {
            return Vec::new();
        }
        let lang = language.map(Language::parse).unwrap_or_default();

        let state = self.state.read();
        let mut urls: HashSet<String> = HashSet::new();
        for token in &query_tokens {
            for form in variants(token, lang) {
                if let Some(hits) = state.keyword_index.get(&form) {
                    urls.extend(hits.iter().cloned());
                }
            }
            for (keyword, hits) in &state.keyword_index {
                if tokens_match(token, keyword) {
                    urls.extend(hits.iter().cloned());
                }
            }
        }
        let candidates = state.collect(urls);
        drop(state);

        let mut ranked: Vec<ScoredOpportunity> = candidates
            .iter()
            .filter(|o| language.is_none_or(|l| o.language == l))
            .map(|o| score_opportunity(&query_tokens, o))
            .filter(|s| s.fuzzy >= threshold)
            .collect();
        ranked.sort_by(by_relevance);
        ranked
    }
}

fn normalize_domain(domain: &str) -> String {
    domain.trim().trim_start_matches("www.").to_lowercase()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{CACHE_VERSION, CacheFile, EntryKey, Quality, StreamConfig};
    use chrono::Duration as ChronoDuration;
    use serde_json::{Value, json};
    use std::time::Duration;
    use tempfile::TempDir;

    fn indexer(max_size: usize) -> Indexer {
        Indexer::new(
            IndexConfig {
                max_size,
                chunk_size: 2,
                ..IndexConfig::default()
            },
            StreamProcessor::new(StreamConfig::default()),
            0.3,
        )
    }

    fn write_page(
        dir: &Path,
        name: &str,
        page_url: &str,
        age_hours: i64,
        links: Value,
    ) -> PathBuf {
        let file = CacheFile {
            timestamp: Utc::now() - ChronoDuration::hours(age_hours),
            data: json!({"text": "We are hiring", "links": links}),
            cache_version: CACHE_VERSION.into(),
            key: EntryKey::url(page_url),
            size: 0,
            created_by: "test".into(),
            quality: Some(Quality::Full),
            ttl_hours: None,
        };
        let path = dir.join(name);
        std::fs::write(&path, serde_json::to_vec(&file).unwrap()).unwrap();
        path
    }

    fn job(url: &str, title: &str) -> Value {
        json!({"url": url, "text": title, "isJobPosting": true, "confidence": 0.8})
    }

    fn set_mtime(path: &Path, when: SystemTime) {
        std::fs::File::options()
            .write(true)
            .open(path)
            .unwrap()
            .set_modified(when)
            .unwrap();
    }

    #[tokio::test]
    async fn test_build_and_lookup() {
        let tmp = TempDir::new().unwrap();
        write_page(
            tmp.path(),
            "acme.json",
            "https://acme.com/careers",
            1,
            json!([job("/job/1", "Backend Engineer"), job("/job/2", "Data Scientist")]),
        );
        write_page(
            tmp.path(),
            "globex.json",
            "https://globex.io/jobs",
            2,
            json!([job("/j/9", "Senior Software Engineers")]),
        );

        let idx = indexer(100);
        assert!(!idx.is_ready());
        let stats = idx.build_index(tmp.path()).await.unwrap();
        assert_eq!(stats.opportunities, 3);
        assert_eq!(stats.domains, 2);
        assert_eq!(stats.files, 2);
        assert!(idx.is_ready());
        assert!(!idx.needs_rebuild());

        let acme = idx.search_by_domain("www.ACME.com", None, 10, 0);
        assert_eq!(acme.total, 2);
        assert!(idx.search_by_domain("acme.com", Some("fr"), 10, 0).results.is_empty());

        // "scientists" reaches the "scientist" keyword through its variants
        let by_kw = idx.search_by_keyword("scientists", None, 10, 0);
        assert_eq!(by_kw.total, 1);
        assert_eq!(by_kw.results[0].url, "https://acme.com/job/2");

        // Plural and singular titles both answer "engineer"
        assert_eq!(idx.search_by_keyword("engineer", None, 10, 0).total, 2);
    }

    #[tokio::test]
    async fn test_job_title_search_filters_and_ranks() {
        let tmp = TempDir::new().unwrap();
        write_page(
            tmp.path(),
            "a.json",
            "https://acme.com/careers",
            1,
            json!([
                job("/1", "Software Engineer"),
                job("/2", "Senior Software Engineers Wanted"),
                job("/3", "Marketing Manager")
            ]),
        );
        let idx = indexer(100);
        idx.build_index(tmp.path()).await.unwrap();

        let page = idx.search_by_job_title("software engineer", None, 10, 0);
        assert_eq!(page.total, 2);
        assert_eq!(page.results[0].opportunity.url, "https://acme.com/1");
        assert!(page.results.iter().all(|r| r.fuzzy >= 0.3));
        assert!(page.results[0].score >= page.results[1].score);

        let paged = idx.search_by_job_title("software engineer", None, 1, 1);
        assert_eq!(paged.results.len(), 1);
        assert!(!paged.has_more);

        assert!(idx.search_by_job_title("a", None, 10, 0).results.is_empty());
    }

    #[tokio::test]
    async fn test_unchanged_files_are_skipped() {
        let tmp = TempDir::new().unwrap();
        let path = write_page(
            tmp.path(),
            "a.json",
            "https://acme.com/careers",
            1,
            json!([job("/1", "Rust Developer")]),
        );
        let past = SystemTime::now() - Duration::from_secs(3600);
        set_mtime(&path, past);

        let idx = indexer(100);
        idx.build_index(tmp.path()).await.unwrap();

        // Rewrite with the same mtime: the watermark hides the change
        write_page(
            tmp.path(),
            "a.json",
            "https://acme.com/careers",
            1,
            json!([job("/2", "Go Developer")]),
        );
        set_mtime(&path, past);
        idx.build_index(tmp.path()).await.unwrap();
        assert_eq!(idx.search_by_keyword("rust", None, 10, 0).total, 1);

        // A newer mtime replaces the file's opportunities
        set_mtime(&path, SystemTime::now());
        idx.build_index(tmp.path()).await.unwrap();
        assert_eq!(idx.search_by_keyword("rust", None, 10, 0).total, 0);
        assert_eq!(idx.search_by_keyword("developer", None, 10, 0).total, 1);
    }

    #[tokio::test]
    async fn test_deleted_file_is_removed() {
        let tmp = TempDir::new().unwrap();
        let path = write_page(
            tmp.path(),
            "a.json",
            "https://acme.com/careers",
            1,
            json!([job("/1", "Rust Developer")]),
        );
        let idx = indexer(100);
        idx.build_index(tmp.path()).await.unwrap();
        std::fs::remove_file(&path).unwrap();

        let stats = idx.build_index(tmp.path()).await.unwrap();
        assert_eq!(stats.opportunities, 0);
        assert_eq!(stats.files, 0);
    }

    #[tokio::test]
    async fn test_duplicate_url_newest_wins() {
        let tmp = TempDir::new().unwrap();
        write_page(
            tmp.path(),
            "old.json",
            "https://acme.com/careers",
            10,
            json!([job("https://acme.com/job/1", "Old Title Engineer")]),
        );
        write_page(
            tmp.path(),
            "new.json",
            "https://acme.com/jobs",
            1,
            json!([job("https://acme.com/job/1", "New Title Engineer")]),
        );

        let idx = indexer(100);
        let stats = idx.build_index(tmp.path()).await.unwrap();
        assert_eq!(stats.opportunities, 1);
        let hit = idx.search_by_keyword("engineer", None, 10, 0);
        assert_eq!(hit.results[0].title, "New Title Engineer");

        // Removing the winner brings the other copy back on the next build
        std::fs::remove_file(tmp.path().join("new.json")).unwrap();
        idx.build_index(tmp.path()).await.unwrap();
        let hit = idx.search_by_keyword("engineer", None, 10, 0);
        assert_eq!(hit.results[0].title, "Old Title Engineer");
    }

    #[tokio::test]
    async fn test_eviction_drops_oldest() {
        let tmp = TempDir::new().unwrap();
        for i in 0..10 {
            write_page(
                tmp.path(),
                &format!("p{i}.json"),
                &format!("https://site{i}.com/careers"),
                i as i64 + 1,
                json!([job("/job", "Platform Engineer")]),
            );
        }

        let idx = indexer(5);
        let stats = idx.build_index(tmp.path()).await.unwrap();
        assert_eq!(stats.opportunities, 5);
        assert_eq!(stats.evicted, 5);
        // site0 is the newest, site9 the oldest
        assert_eq!(idx.search_by_domain("site0.com", None, 10, 0).total, 1);
        assert_eq!(idx.search_by_domain("site9.com", None, 10, 0).total, 0);
    }

    #[tokio::test]
    async fn test_missing_directory_builds_empty() {
        let tmp = TempDir::new().unwrap();
        let idx = indexer(100);
        let stats = idx.build_index(&tmp.path().join("absent")).await.unwrap();
        assert_eq!(stats.opportunities, 0);
        assert!(idx.is_ready());
    }
}
