//! Application configuration structures.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{AppError, Result};

/// Root application configuration.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    /// Disk cache layout, freshness and retention
    #[serde(default)]
    pub cache: CacheConfig,

    /// Opportunity index sizing and rebuild cadence
    #[serde(default)]
    pub index: IndexConfig,

    /// File-processing engine bounds
    #[serde(default)]
    pub stream: StreamConfig,

    /// Score memoization and match thresholds
    #[serde(default)]
    pub scoring: ScoringConfig,

    /// Result paging defaults
    #[serde(default)]
    pub pagination: PaginationConfig,
}

impl Config {
    /// Load configuration from a TOML file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let content = fs::read_to_string(path)?;
        Ok(toml::from_str(&content)?)
    }

    /// Load configuration or return default if loading fails.
    pub fn load_or_default(path: impl AsRef<Path>) -> Self {
        Self::load(&path).unwrap_or_else(|e| {
            log::warn!(
                "Config load failed from {:?}: {}. Using defaults.",
                path.as_ref(),
                e
            );
            Self::default()
        })
    }

    /// Validate configuration values for basic sanity.
    pub fn validate(&self) -> Result<()> {
        if self.cache.freshness_hours <= 0.0 {
            return Err(AppError::validation("cache.freshness_hours must be > 0"));
        }
        if self.cache.retention_hours < self.cache.freshness_hours {
            return Err(AppError::validation(
                "cache.retention_hours must be >= cache.freshness_hours",
            ));
        }
        if self.cache.default_ttl_hours <= 0.0 {
            return Err(AppError::validation("cache.default_ttl_hours must be > 0"));
        }
        if self.cache.created_by.trim().is_empty() {
            return Err(AppError::validation("cache.created_by is empty"));
        }
        if self.index.max_size == 0 {
            return Err(AppError::validation("index.max_size must be > 0"));
        }
        if self.index.chunk_size == 0 {
            return Err(AppError::validation("index.chunk_size must be > 0"));
        }
        check_fraction("index.eviction_fraction", self.index.eviction_fraction)?;
        if self.stream.chunk_size == 0 {
            return Err(AppError::validation("stream.chunk_size must be > 0"));
        }
        if self.stream.max_concurrency == 0 {
            return Err(AppError::validation("stream.max_concurrency must be > 0"));
        }
        if self.stream.file_timeout_ms == 0 {
            return Err(AppError::validation("stream.file_timeout_ms must be > 0"));
        }
        if self.stream.retry_max_delay_ms < self.stream.retry_base_delay_ms {
            return Err(AppError::validation(
                "stream.retry_max_delay_ms must be >= stream.retry_base_delay_ms",
            ));
        }
        if self.stream.memory_ceiling_mb == 0 {
            return Err(AppError::validation("stream.memory_ceiling_mb must be > 0"));
        }
        check_fraction(
            "stream.streaming_memory_fraction",
            self.stream.streaming_memory_fraction,
        )?;
        check_fraction("stream.error_threshold", self.stream.error_threshold)?;
        if self.scoring.max_entries == 0 {
            return Err(AppError::validation("scoring.max_entries must be > 0"));
        }
        if !(0.0..=1.0).contains(&self.scoring.fuzzy_threshold) {
            return Err(AppError::validation(
                "scoring.fuzzy_threshold must be within [0, 1]",
            ));
        }
        if self.pagination.default_limit == 0
            || self.pagination.default_limit > self.pagination.max_limit
        {
            return Err(AppError::validation(
                "pagination.default_limit must be within 1..=pagination.max_limit",
            ));
        }
        Ok(())
    }
}

fn check_fraction(field: &str, value: f64) -> Result<()> {
    if value > 0.0 && value <= 1.0 {
        Ok(())
    } else {
        Err(AppError::validation(format!("{field} must be within (0, 1]")))
    }
}

/// Disk cache settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    /// Directory holding one JSON file per cache entry
    #[serde(default = "defaults::cache_dir")]
    pub dir: PathBuf,

    /// Age after which address-keyed entries stop being fresh
    #[serde(default = "defaults::freshness_hours")]
    pub freshness_hours: f64,

    /// Age after which address-keyed entries are swept from disk
    #[serde(default = "defaults::retention_hours")]
    pub retention_hours: f64,

    /// TTL written into arbitrary-keyed entries that declare none
    #[serde(default = "defaults::default_ttl_hours")]
    pub default_ttl_hours: f64,

    /// Minimum text length (chars) for a page to count as having valid text
    #[serde(default = "defaults::min_text_length")]
    pub min_text_length: usize,

    /// Maximum issues reported by a consistency check
    #[serde(default = "defaults::max_issues")]
    pub max_issues: usize,

    /// Rolling window after which metrics counters reset
    #[serde(default = "defaults::metrics_window_secs")]
    pub metrics_window_secs: u64,

    /// Value written into each entry's `createdBy`
    #[serde(default = "defaults::created_by")]
    pub created_by: String,

    /// Bounded capacity of the outbound profiler event queue
    #[serde(default = "defaults::event_queue_capacity")]
    pub event_queue_capacity: usize,
}

impl CacheConfig {
    /// Freshness window as a Duration.
    pub fn freshness(&self) -> Duration {
        hours(self.freshness_hours)
    }

    /// Retention window as a Duration.
    pub fn retention(&self) -> Duration {
        hours(self.retention_hours)
    }

    /// TTL of a keyed entry. Negative or non-finite declarations use the
    /// default; zero expires immediately.
    pub fn ttl_for(&self, declared: Option<f64>) -> Duration {
        match declared {
            Some(h) if h.is_finite() && h >= 0.0 => hours(h),
            _ => hours(self.default_ttl_hours),
        }
    }

    /// Rolling metrics window as a Duration.
    pub fn metrics_window(&self) -> Duration {
        Duration::from_secs(self.metrics_window_secs)
    }
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            dir: defaults::cache_dir(),
            freshness_hours: defaults::freshness_hours(),
            retention_hours: defaults::retention_hours(),
            default_ttl_hours: defaults::default_ttl_hours(),
            min_text_length: defaults::min_text_length(),
            max_issues: defaults::max_issues(),
            metrics_window_secs: defaults::metrics_window_secs(),
            created_by: defaults::created_by(),
            event_queue_capacity: defaults::event_queue_capacity(),
        }
    }
}

/// Opportunity index settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexConfig {
    /// Index older than this is rebuilt on the next search
    #[serde(default = "defaults::rebuild_threshold_secs")]
    pub rebuild_threshold_secs: u64,

    /// Maximum indexed opportunities before eviction
    #[serde(default = "defaults::index_max_size")]
    pub max_size: usize,

    /// Files handed to the stream processor per build step
    #[serde(default = "defaults::index_chunk_size")]
    pub chunk_size: usize,

    /// Share of opportunities evicted (oldest first) when over capacity
    #[serde(default = "defaults::eviction_fraction")]
    pub eviction_fraction: f64,
}

impl IndexConfig {
    pub fn rebuild_threshold(&self) -> Duration {
        Duration::from_secs(self.rebuild_threshold_secs)
    }
}

impl Default for IndexConfig {
    fn default() -> Self {
        Self {
            rebuild_threshold_secs: defaults::rebuild_threshold_secs(),
            max_size: defaults::index_max_size(),
            chunk_size: defaults::index_chunk_size(),
            eviction_fraction: defaults::eviction_fraction(),
        }
    }
}

/// Stream processor settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StreamConfig {
    /// Files per chunk
    #[serde(default = "defaults::stream_chunk_size")]
    pub chunk_size: usize,

    /// In-flight file operations per chunk
    #[serde(default = "defaults::max_concurrency")]
    pub max_concurrency: usize,

    /// Per-file time budget (per attempt)
    #[serde(default = "defaults::file_timeout_ms")]
    pub file_timeout_ms: u64,

    /// Retries after the first attempt
    #[serde(default = "defaults::max_retries")]
    pub max_retries: u32,

    #[serde(default = "defaults::retry_base_delay_ms")]
    pub retry_base_delay_ms: u64,

    #[serde(default = "defaults::retry_max_delay_ms")]
    pub retry_max_delay_ms: u64,

    /// Soft memory ceiling in MB
    #[serde(default = "defaults::memory_ceiling_mb")]
    pub memory_ceiling_mb: u64,

    /// Share of the ceiling an in-memory batch may occupy before streaming is used
    #[serde(default = "defaults::streaming_memory_fraction")]
    pub streaming_memory_fraction: f64,

    /// Estimated in-memory size of one cache file
    #[serde(default = "defaults::avg_item_bytes")]
    pub avg_item_bytes: u64,

    /// Default failure ratio that trips the circuit breaker
    #[serde(default = "defaults::error_threshold")]
    pub error_threshold: f64,

    /// Files processed before the breaker starts judging
    #[serde(default = "defaults::min_breaker_sample")]
    pub min_breaker_sample: usize,
}

impl StreamConfig {
    pub fn file_timeout(&self) -> Duration {
        Duration::from_millis(self.file_timeout_ms)
    }
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            chunk_size: defaults::stream_chunk_size(),
            max_concurrency: defaults::max_concurrency(),
            file_timeout_ms: defaults::file_timeout_ms(),
            max_retries: defaults::max_retries(),
            retry_base_delay_ms: defaults::retry_base_delay_ms(),
            retry_max_delay_ms: defaults::retry_max_delay_ms(),
            memory_ceiling_mb: defaults::memory_ceiling_mb(),
            streaming_memory_fraction: defaults::streaming_memory_fraction(),
            avg_item_bytes: defaults::avg_item_bytes(),
            error_threshold: defaults::error_threshold(),
            min_breaker_sample: defaults::min_breaker_sample(),
        }
    }
}

/// Scoring and memoization settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScoringConfig {
    /// Lifetime of a memoized score
    #[serde(default = "defaults::score_ttl_secs")]
    pub ttl_secs: u64,

    /// Entries kept before LRU eviction kicks in
    #[serde(default = "defaults::score_max_entries")]
    pub max_entries: usize,

    /// Background TTL sweep cadence
    #[serde(default = "defaults::sweep_interval_secs")]
    pub sweep_interval_secs: u64,

    /// Minimum fuzzy overlap for a title to match a query
    #[serde(default = "defaults::fuzzy_threshold")]
    pub fuzzy_threshold: f64,

    /// Characters of content considered when hashing a score key
    #[serde(default = "defaults::content_prefix_chars")]
    pub content_prefix_chars: usize,
}

impl ScoringConfig {
    pub fn ttl(&self) -> Duration {
        Duration::from_secs(self.ttl_secs)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs.max(1))
    }
}

impl Default for ScoringConfig {
    fn default() -> Self {
        Self {
            ttl_secs: defaults::score_ttl_secs(),
            max_entries: defaults::score_max_entries(),
            sweep_interval_secs: defaults::sweep_interval_secs(),
            fuzzy_threshold: defaults::fuzzy_threshold(),
            content_prefix_chars: defaults::content_prefix_chars(),
        }
    }
}

/// Result paging settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PaginationConfig {
    #[serde(default = "defaults::default_limit")]
    pub default_limit: usize,

    #[serde(default = "defaults::max_limit")]
    pub max_limit: usize,
}

impl Default for PaginationConfig {
    fn default() -> Self {
        Self {
            default_limit: defaults::default_limit(),
            max_limit: defaults::max_limit(),
        }
    }
}

fn hours(h: f64) -> Duration {
    Duration::try_from_secs_f64((h * 3600.0).max(0.0)).unwrap_or(Duration::MAX)
}

mod defaults {
    use std::path::PathBuf;

    // Cache defaults
    pub fn cache_dir() -> PathBuf {
        PathBuf::from("cache")
    }
    pub fn freshness_hours() -> f64 {
        24.0
    }
    pub fn retention_hours() -> f64 {
        168.0
    }
    pub fn default_ttl_hours() -> f64 {
        24.0
    }
    pub fn min_text_length() -> usize {
        100
    }
    pub fn max_issues() -> usize {
        10
    }
    pub fn metrics_window_secs() -> u64 {
        3600
    }
    pub fn created_by() -> String {
        "harvest/0.1".into()
    }
    pub fn event_queue_capacity() -> usize {
        256
    }

    // Index defaults
    pub fn rebuild_threshold_secs() -> u64 {
        3600
    }
    pub fn index_max_size() -> usize {
        10_000
    }
    pub fn index_chunk_size() -> usize {
        50
    }
    pub fn eviction_fraction() -> f64 {
        0.2
    }

    // Stream defaults
    pub fn stream_chunk_size() -> usize {
        10
    }
    pub fn max_concurrency() -> usize {
        5
    }
    pub fn file_timeout_ms() -> u64 {
        5_000
    }
    pub fn max_retries() -> u32 {
        2
    }
    pub fn retry_base_delay_ms() -> u64 {
        100
    }
    pub fn retry_max_delay_ms() -> u64 {
        2_000
    }
    pub fn memory_ceiling_mb() -> u64 {
        512
    }
    pub fn streaming_memory_fraction() -> f64 {
        0.5
    }
    pub fn avg_item_bytes() -> u64 {
        16 * 1024
    }
    pub fn error_threshold() -> f64 {
        0.5
    }
    pub fn min_breaker_sample() -> usize {
        5
    }

    // Scoring defaults
    pub fn score_ttl_secs() -> u64 {
        3600
    }
    pub fn score_max_entries() -> usize {
        10_000
    }
    pub fn sweep_interval_secs() -> u64 {
        300
    }
    pub fn fuzzy_threshold() -> f64 {
        0.3
    }
    pub fn content_prefix_chars() -> usize {
        500
    }

    // Pagination defaults
    pub fn default_limit() -> usize {
        20
    }
    pub fn max_limit() -> usize {
        100
    }
}
