//! Query orchestration across the index and the file-scanning backends.
//!
//! The index serves queries once it has been built. Until then the cache
//! directory is scanned directly, in one batch or chunk by chunk depending
//! on how much memory the file set is estimated to need. Whatever the
//! backend, results go through the same fuzzy-threshold pass, URL dedupe,
//! sort and paginator.

pub mod paginate;

use std::collections::{HashMap, HashSet};
use std::path::PathBuf;
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};

use tokio::task::JoinHandle;

use crate::error::Result;
use crate::index::{Indexer, by_relevance, rank_score};
use crate::models::{
    Config, EntryKey, IndexStats, Opportunity, ScoredOpportunity, SearchMethod, SearchOptions,
    SearchResponse, SortOrder,
};
use crate::pipeline::{ProcessingMode, StreamProcessor, read_opportunities};
use crate::scoring::{Language, ScoreCache};
use crate::storage::CacheStore;

pub use paginate::{Paginator, decode_cursor, encode_cursor};

/// Domain and language restrictions of one query, normalized.
#[derive(Debug, Clone, Default)]
struct Filters {
    language: Option<String>,
    domains: HashSet<String>,
}

impl Filters {
    fn from_options(opts: &SearchOptions) -> Self {
        Self {
            language: opts
                .language
                .as_deref()
                .map(|l| Language::parse(l).code().to_string()),
            domains: opts.domains.iter().map(|d| normalize_domain(d)).collect(),
        }
    }

    fn matches(&self, opportunity: &Opportunity) -> bool {
        self.language
            .as_deref()
            .is_none_or(|l| opportunity.language == l)
            && (self.domains.is_empty() || self.domains.contains(&opportunity.domain))
    }
}

fn normalize_domain(domain: &str) -> String {
    domain.trim().trim_start_matches("www.").to_lowercase()
}

/// Keep one record per URL, preferring the newest.
fn dedupe_by_url(found: Vec<Opportunity>) -> Vec<Opportunity> {
    let mut by_url: HashMap<String, Opportunity> = HashMap::with_capacity(found.len());
    for opportunity in found {
        match by_url.get(&opportunity.url) {
            Some(existing) if !opportunity.supersedes(existing) => {}
            _ => {
                by_url.insert(opportunity.url.clone(), opportunity);
            }
        }
    }
    by_url.into_values().collect()
}

/// Entry point for job-title searches.
pub struct SearchOrchestrator {
    store: Arc<CacheStore>,
    indexer: Arc<Indexer>,
    processor: StreamProcessor,
    scores: Arc<ScoreCache>,
    paginator: Paginator,
    fuzzy_threshold: f64,
    rebuild_every: Duration,
}

impl SearchOrchestrator {
    /// Build an orchestrator with its own index and score cache.
    pub fn new(config: &Config, store: Arc<CacheStore>) -> Self {
        Self::with_parts(
            config,
            store,
            Arc::new(Indexer::from_config(config)),
            Arc::new(ScoreCache::new(config.scoring.clone())),
        )
    }

    /// Build an orchestrator around existing components.
    pub fn with_parts(
        config: &Config,
        store: Arc<CacheStore>,
        indexer: Arc<Indexer>,
        scores: Arc<ScoreCache>,
    ) -> Self {
        Self {
            store,
            indexer,
            processor: StreamProcessor::new(config.stream.clone()),
            scores,
            paginator: Paginator::new(&config.pagination),
            fuzzy_threshold: config.scoring.fuzzy_threshold,
            rebuild_every: config.index.rebuild_threshold(),
        }
    }

    pub fn store(&self) -> &Arc<CacheStore> {
        &self.store
    }

    pub fn indexer(&self) -> &Arc<Indexer> {
        &self.indexer
    }

    pub fn scores(&self) -> &Arc<ScoreCache> {
        &self.scores
    }

    /// Rebuild the index from the cache directory now.
    pub async fn rebuild_index(&self) -> Result<IndexStats> {
        self.indexer.build_index(self.store.root_dir()).await
    }

    /// Start a background rebuild if the index is missing or too old.
    ///
    /// Returns whether a rebuild was started. Must be called from within a
    /// tokio runtime.
    pub fn ensure_index(&self) -> bool {
        if !self.indexer.needs_rebuild() || self.indexer.is_building() {
            return false;
        }
        let indexer = Arc::clone(&self.indexer);
        let dir = self.store.root_dir().to_path_buf();
        tokio::spawn(async move {
            if let Err(e) = indexer.build_index(&dir).await {
                log::warn!("Background index rebuild failed: {}", e);
            }
        });
        true
    }

    /// Check the index age every rebuild period, whether or not queries
    /// arrive, until the orchestrator is dropped.
    pub fn spawn_index_refresher(self: &Arc<Self>) -> JoinHandle<()> {
        let weak: Weak<Self> = Arc::downgrade(self);
        let period = self.rebuild_every.max(Duration::from_secs(1));
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            loop {
                interval.tick().await;
                let Some(orchestrator) = weak.upgrade() else {
                    break;
                };
                if orchestrator.ensure_index() {
                    log::debug!("Index refresh started");
                }
            }
        })
    }

    /// Search opportunities by job title.
    pub async fn search(&self, job_title: &str, opts: &SearchOptions) -> SearchResponse {
        let started = Instant::now();
        self.ensure_index();

        let threshold = opts.fuzzy_threshold.unwrap_or(self.fuzzy_threshold);
        let filters = Filters::from_options(opts);

        let (method, candidates) = if self.indexer.is_ready() {
            (SearchMethod::Indexed, self.indexed_candidates(job_title, &filters, threshold))
        } else {
            self.scan_candidates(opts.target_results).await
        };

        let results = self.final_pass(job_title, candidates, &filters, threshold, opts.sort);
        let request = self
            .paginator
            .request(opts.limit, opts.offset, opts.cursor.as_deref());
        let (page, pagination) = self.paginator.paginate(results, &request);

        log::debug!(
            "Search '{}' via {:?}: {} matches",
            job_title,
            method,
            pagination.total
        );
        SearchResponse {
            results: page,
            pagination,
            search_time_ms: started.elapsed().as_millis() as u64,
            method,
            index_stats: (method == SearchMethod::Indexed).then(|| self.indexer.stats()),
        }
    }

    fn indexed_candidates(
        &self,
        job_title: &str,
        filters: &Filters,
        threshold: f64,
    ) -> Vec<Opportunity> {
        let language = filters.language.as_deref();
        if filters.domains.is_empty() {
            return self
                .indexer
                .rank_job_title(job_title, language, threshold)
                .into_iter()
                .map(|s| s.opportunity)
                .collect();
        }
        filters
            .domains
            .iter()
            .flat_map(|domain| {
                self.indexer
                    .search_by_domain(domain, language, usize::MAX, 0)
                    .results
            })
            .collect()
    }

    /// Read opportunities straight from the cache files.
    ///
    /// Filters are not applied here: dedupe must see every copy of a URL
    /// first, as the index does, or a stale copy in another language or
    /// domain could survive.
    async fn scan_candidates(
        &self,
        target_results: Option<usize>,
    ) -> (SearchMethod, Vec<Opportunity>) {
        let files = self.store.list_files().await;
        let read = |path: PathBuf| async move { read_opportunities(&path).await };

        match self.processor.mode_for(files.len()) {
            ProcessingMode::Batch => {
                let opts = self.processor.default_options();
                let outcome = self.processor.process_files_batch(files, read, &opts).await;
                (SearchMethod::Batch, outcome.results)
            }
            ProcessingMode::Streaming => {
                let mut opts = self.processor.default_options();
                if let Some(target) = target_results {
                    opts = opts.with_target(target);
                }
                let outcome = self.processor.process_files_stream(files, read, &opts).await;
                log::debug!(
                    "Streamed {}/{} files ({:?})",
                    outcome.stats.processed_files,
                    outcome.stats.total_files,
                    outcome.stats.stop_reason
                );
                (SearchMethod::Streaming, outcome.results)
            }
        }
    }

    /// Dedupe, filter, score through the cache and sort.
    fn final_pass(
        &self,
        job_title: &str,
        candidates: Vec<Opportunity>,
        filters: &Filters,
        threshold: f64,
        sort: SortOrder,
    ) -> Vec<ScoredOpportunity> {
        let mut scored: Vec<ScoredOpportunity> = dedupe_by_url(candidates)
            .into_iter()
            .filter(|o| filters.matches(o))
            .filter_map(|opportunity| {
                let fuzzy = self.scores.fuzzy_match(job_title, &opportunity.title).value;
                (fuzzy >= threshold && fuzzy > 0.0).then(|| ScoredOpportunity {
                    score: rank_score(fuzzy, opportunity.confidence),
                    fuzzy,
                    opportunity,
                })
            })
            .collect();

        match sort {
            SortOrder::Relevance => scored.sort_by(by_relevance),
            SortOrder::Recent => scored.sort_by(|a, b| {
                b.opportunity
                    .scraped_at
                    .cmp(&a.opportunity.scraped_at)
                    .then_with(|| a.opportunity.url.cmp(&b.opportunity.url))
            }),
        }
        scored
    }

    /// Whether `key` has a fresh cache entry.
    pub async fn is_fresh(&self, key: &EntryKey) -> bool {
        self.store.is_fresh(key).await
    }

    /// Invalidate `key` so the next read misses and the scraper refetches.
    pub async fn refresh(&self, key: &EntryKey) -> bool {
        self.store.invalidate(key).await
    }
}
