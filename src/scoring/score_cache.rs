//! Memoized scoring with TTL and LRU eviction.
//!
//! Three families share one cache: generic relevance, pairwise fuzzy
//! similarity and multi-keyword matching. Keys hash the normalized content
//! prefix together with url, title and a family-specific context.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use serde::Serialize;
use sha2::{Digest, Sha256};
use tokio::task::JoinHandle;

use crate::models::ScoringConfig;
use crate::scoring::fuzzy;
use crate::scoring::keywords::{self, KeywordMatch, Language};
use crate::utils::collapse_whitespace;

/// Which computation a cached value belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScoreFamily {
    Relevance,
    Fuzzy,
    Keywords,
}

impl ScoreFamily {
    fn tag(&self) -> &'static str {
        match self {
            ScoreFamily::Relevance => "relevance",
            ScoreFamily::Fuzzy => "fuzzy",
            ScoreFamily::Keywords => "keywords",
        }
    }
}

/// Inputs that identify a score.
#[derive(Debug, Clone, Copy, Default)]
pub struct ScoreInput<'a> {
    pub content: &'a str,
    pub url: &'a str,
    pub title: &'a str,
    /// Job title, sorted keyword set or language
    pub context: &'a str,
}

#[derive(Debug, Clone)]
enum ScoreValue {
    Scalar(f64),
    Keywords(KeywordMatch),
}

/// A score annotated with where it came from.
#[derive(Debug, Clone, PartialEq)]
pub struct Scored<T> {
    pub value: T,
    pub from_cache: bool,
    /// Age of the cached value; `None` when freshly computed
    pub cache_age: Option<Duration>,
    pub computation_time: Duration,
}

#[derive(Debug)]
struct Entry {
    value: ScoreValue,
    created: Instant,
    computation_time: Duration,
    last_access: u64,
}

#[derive(Debug, Default)]
struct Inner {
    entries: HashMap<String, Entry>,
    /// Logical LRU clock, bumped on every access
    clock: u64,
}

impl Inner {
    fn tick(&mut self) -> u64 {
        self.clock += 1;
        self.clock
    }
}

/// Counters for `ScoreCache`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ScoreCacheStats {
    pub hits: u64,
    pub misses: u64,
    pub evictions: u64,
    pub expirations: u64,
    pub size: usize,
}

/// Process-local memo of score computations.
#[derive(Debug)]
pub struct ScoreCache {
    inner: Mutex<Inner>,
    config: ScoringConfig,
    hits: AtomicU64,
    misses: AtomicU64,
    evictions: AtomicU64,
    expirations: AtomicU64,
}

impl ScoreCache {
    pub fn new(config: ScoringConfig) -> Self {
        Self {
            inner: Mutex::new(Inner::default()),
            config,
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            evictions: AtomicU64::new(0),
            expirations: AtomicU64::new(0),
        }
    }

    /// Stable key for one family and input.
    pub fn cache_key(&self, family: ScoreFamily, input: &ScoreInput<'_>) -> String {
        let prefix: String = input
            .content
            .chars()
            .take(self.config.content_prefix_chars)
            .collect();
        let normalized = collapse_whitespace(&prefix).to_lowercase();

        let mut hasher = Sha256::new();
        for part in [
            family.tag(),
            normalized.as_str(),
            input.url,
            input.title,
            input.context,
        ] {
            hasher.update(part.as_bytes());
            hasher.update([0u8]);
        }
        hex::encode(hasher.finalize())
    }

    /// Memoized relevance score from a caller-supplied pure function.
    pub fn relevance(&self, input: &ScoreInput<'_>, compute: impl FnOnce() -> f64) -> Scored<f64> {
        let scored = self.get_or_compute(ScoreFamily::Relevance, input, || {
            ScoreValue::Scalar(compute())
        });
        map_scalar(scored)
    }

    /// Memoized fuzzy similarity between a query and a text.
    pub fn fuzzy_match(&self, query: &str, text: &str) -> Scored<f64> {
        let input = ScoreInput {
            content: text,
            title: query,
            ..ScoreInput::default()
        };
        let scored = self.get_or_compute(ScoreFamily::Fuzzy, &input, || {
            ScoreValue::Scalar(fuzzy::fuzzy_score(query, text))
        });
        map_scalar(scored)
    }

    /// Memoized keyword match of `keywords` against `content`.
    pub fn keyword_match(
        &self,
        content: &str,
        url: &str,
        keywords: &[String],
        language: Language,
    ) -> Scored<KeywordMatch> {
        let mut sorted: Vec<&str> = keywords.iter().map(String::as_str).collect();
        sorted.sort_unstable();
        sorted.dedup();
        let context = format!("{}|{}", sorted.join(","), language.code());
        let input = ScoreInput {
            content,
            url,
            context: &context,
            ..ScoreInput::default()
        };

        let scored = self.get_or_compute(ScoreFamily::Keywords, &input, || {
            ScoreValue::Keywords(keywords::keyword_match(content, keywords, language))
        });
        let value = match scored.value {
            ScoreValue::Keywords(m) => m,
            // Same key means same family; recompute rather than trust a mismatch
            ScoreValue::Scalar(_) => keywords::keyword_match(content, keywords, language),
        };
        Scored {
            value,
            from_cache: scored.from_cache,
            cache_age: scored.cache_age,
            computation_time: scored.computation_time,
        }
    }

    fn get_or_compute(
        &self,
        family: ScoreFamily,
        input: &ScoreInput<'_>,
        compute: impl FnOnce() -> ScoreValue,
    ) -> Scored<ScoreValue> {
        let key = self.cache_key(family, input);
        let ttl = self.config.ttl();

        {
            let mut inner = self.inner.lock();
            let tick = inner.tick();
            if let Some(entry) = inner.entries.get_mut(&key) {
                let age = entry.created.elapsed();
                if age < ttl {
                    entry.last_access = tick;
                    self.hits.fetch_add(1, Ordering::Relaxed);
                    return Scored {
                        value: entry.value.clone(),
                        from_cache: true,
                        cache_age: Some(age),
                        computation_time: entry.computation_time,
                    };
                }
                inner.entries.remove(&key);
                self.expirations.fetch_add(1, Ordering::Relaxed);
            }
        }

        self.misses.fetch_add(1, Ordering::Relaxed);
        let started = Instant::now();
        let value = compute();
        let computation_time = started.elapsed();

        let mut inner = self.inner.lock();
        let tick = inner.tick();
        inner.entries.insert(
            key,
            Entry {
                value: value.clone(),
                created: Instant::now(),
                computation_time,
                last_access: tick,
            },
        );
        if inner.entries.len() > self.config.max_entries {
            let evicted = evict_lru(&mut inner.entries);
            self.evictions.fetch_add(evicted as u64, Ordering::Relaxed);
        }

        Scored {
            value,
            from_cache: false,
            cache_age: None,
            computation_time,
        }
    }

    /// Drop every entry older than the TTL. Returns how many were removed.
    pub fn sweep_expired(&self) -> usize {
        let ttl = self.config.ttl();
        let mut inner = self.inner.lock();
        let before = inner.entries.len();
        inner.entries.retain(|_, e| e.created.elapsed() < ttl);
        let removed = before - inner.entries.len();
        self.expirations.fetch_add(removed as u64, Ordering::Relaxed);
        removed
    }

    /// Run `sweep_expired` every `sweep_interval` until the cache is dropped.
    pub fn spawn_sweeper(self: &Arc<Self>) -> JoinHandle<()> {
        let weak: Weak<Self> = Arc::downgrade(self);
        let period = self.config.sweep_interval();
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            interval.tick().await;
            loop {
                interval.tick().await;
                let Some(cache) = weak.upgrade() else {
                    break;
                };
                let removed = cache.sweep_expired();
                if removed > 0 {
                    log::debug!("Score cache sweep removed {} entries", removed);
                }
            }
        })
    }

    pub fn clear(&self) {
        self.inner.lock().entries.clear();
    }

    pub fn len(&self) -> usize {
        self.inner.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn stats(&self) -> ScoreCacheStats {
        ScoreCacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            evictions: self.evictions.load(Ordering::Relaxed),
            expirations: self.expirations.load(Ordering::Relaxed),
            size: self.len(),
        }
    }
}

/// Remove the least recently used 20% (at least one entry).
fn evict_lru(entries: &mut HashMap<String, Entry>) -> usize {
    let count = (entries.len() / 5).max(1);
    let mut by_access: Vec<(u64, String)> = entries
        .iter()
        .map(|(k, e)| (e.last_access, k.clone()))
        .collect();
    by_access.sort_unstable();
    for (_, key) in by_access.iter().take(count) {
        entries.remove(key);
    }
    count
}

fn map_scalar(scored: Scored<ScoreValue>) -> Scored<f64> {
    let value = match scored.value {
        ScoreValue::Scalar(v) => v,
        ScoreValue::Keywords(m) => m.score,
    };
    Scored {
        value,
        from_cache: scored.from_cache,
        cache_age: scored.cache_age,
        computation_time: scored.computation_time,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cache_with(ttl_secs: u64, max_entries: usize) -> ScoreCache {
        ScoreCache::new(ScoringConfig {
            ttl_secs,
            max_entries,
            ..ScoringConfig::default()
        })
    }

    #[test]
    fn test_fuzzy_match_scenario() {
        let cache = cache_with(3600, 100);
        let first = cache.fuzzy_match("software engineer", "senior software engineers wanted");
        assert!(first.value >= 0.5);
        assert!(!first.from_cache);
        assert!(first.cache_age.is_none());

        let second = cache.fuzzy_match("software engineer", "senior software engineers wanted");
        assert!(second.from_cache);
        assert_eq!(second.value, first.value);
        assert!(second.cache_age.is_some());

        let stats = cache.stats();
        assert_eq!((stats.hits, stats.misses, stats.size), (1, 1, 1));
    }

    #[test]
    fn test_key_normalizes_content_prefix() {
        let cache = cache_with(3600, 100);
        let a = ScoreInput {
            content: "Hello   World",
            ..ScoreInput::default()
        };
        let b = ScoreInput {
            content: "hello world",
            ..ScoreInput::default()
        };
        assert_eq!(
            cache.cache_key(ScoreFamily::Relevance, &a),
            cache.cache_key(ScoreFamily::Relevance, &b)
        );
        assert_ne!(
            cache.cache_key(ScoreFamily::Relevance, &a),
            cache.cache_key(ScoreFamily::Fuzzy, &a)
        );

        // Content beyond the prefix doesn't change the key
        let long_a = format!("{}{}", "x".repeat(500), "tail one");
        let long_b = format!("{}{}", "x".repeat(500), "tail two");
        let ia = ScoreInput {
            content: &long_a,
            ..ScoreInput::default()
        };
        let ib = ScoreInput {
            content: &long_b,
            ..ScoreInput::default()
        };
        assert_eq!(
            cache.cache_key(ScoreFamily::Relevance, &ia),
            cache.cache_key(ScoreFamily::Relevance, &ib)
        );
    }

    #[test]
    fn test_relevance_computes_once() {
        let cache = cache_with(3600, 100);
        let input = ScoreInput {
            content: "rust developer",
            url: "https://acme.com/job/1",
            title: "Rust Developer",
            context: "rust",
        };
        let mut calls = 0;
        let first = cache.relevance(&input, || {
            calls += 1;
            0.8
        });
        let second = cache.relevance(&input, || {
            calls += 1;
            0.1
        });
        assert_eq!(calls, 1);
        assert_eq!(first.value, 0.8);
        assert_eq!(second.value, 0.8);
    }

    #[test]
    fn test_zero_ttl_never_hits() {
        let cache = cache_with(0, 100);
        cache.fuzzy_match("a query", "some text");
        let again = cache.fuzzy_match("a query", "some text");
        assert!(!again.from_cache);
        assert_eq!(cache.stats().expirations, 1);
        assert_eq!(cache.sweep_expired(), 1);
        assert!(cache.is_empty());
    }

    #[test]
    fn test_lru_eviction_keeps_recent() {
        let cache = cache_with(3600, 10);
        let texts: Vec<String> = (0..10).map(|i| format!("text number {i}")).collect();
        for t in &texts {
            cache.fuzzy_match("query", t);
        }
        // Touch the oldest so it becomes most recently used
        assert!(cache.fuzzy_match("query", &texts[0]).from_cache);

        cache.fuzzy_match("query", "one more text");
        let stats = cache.stats();
        assert_eq!(stats.evictions, 2);
        assert_eq!(stats.size, 9);
        assert!(cache.fuzzy_match("query", &texts[0]).from_cache);
        assert!(!cache.fuzzy_match("query", &texts[1]).from_cache);
    }

    #[test]
    fn test_keyword_match_context_order_insensitive() {
        let cache = cache_with(3600, 100);
        let content = "Senior Rust engineer, remote";
        let a = vec!["rust".to_string(), "engineer".to_string()];
        let b = vec!["engineer".to_string(), "rust".to_string()];

        let first = cache.keyword_match(content, "u", &a, Language::En);
        let second = cache.keyword_match(content, "u", &b, Language::En);
        assert!(second.from_cache);
        assert_eq!(first.value.coverage, 1.0);
    }

    #[tokio::test]
    async fn test_sweeper_stops_when_cache_dropped() {
        let cache = Arc::new(ScoreCache::new(ScoringConfig {
            sweep_interval_secs: 1,
            ..ScoringConfig::default()
        }));
        let handle = cache.spawn_sweeper();
        drop(cache);

        let finished = tokio::time::timeout(Duration::from_secs(5), handle).await;
        assert!(finished.is_ok());
    }
}
