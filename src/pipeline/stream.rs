//! Bounded file-processing engine.
//!
//! Files are split into fixed-size chunks. Within a chunk, up to
//! `max_concurrency` files run at once, each with its own timeout and
//! capped exponential backoff. Between chunks the engine samples memory,
//! checks the error-rate breaker and the early-stop target.

use std::future::Future;
use std::path::PathBuf;
use std::time::{Duration, Instant};

use futures::stream::{self, StreamExt};
use serde::Serialize;

use crate::error::{AppError, Result};
use crate::models::StreamConfig;
use crate::pipeline::circuit_breaker::{CircuitBreaker, CircuitBreakerConfig};
use crate::utils::memory;

/// Per-run knobs.
#[derive(Debug, Clone)]
pub struct StreamOptions {
    pub max_concurrency: usize,
    /// Failure ratio that stops the run
    pub error_threshold: f64,
    /// Stop once this many results are collected (needs `enable_early_stop`)
    pub target_results: Option<usize>,
    pub enable_early_stop: bool,
}

impl StreamOptions {
    pub fn from_config(config: &StreamConfig) -> Self {
        Self {
            max_concurrency: config.max_concurrency,
            error_threshold: config.error_threshold,
            target_results: None,
            enable_early_stop: false,
        }
    }

    /// Stop after `target` results.
    pub fn with_target(mut self, target: usize) -> Self {
        self.target_results = Some(target);
        self.enable_early_stop = true;
        self
    }
}

/// Why a run ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StopReason {
    Completed,
    TargetReached,
    ErrorThreshold,
    MemoryCeiling,
}

/// How a file set should be processed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessingMode {
    /// Everything in one pass
    Batch,
    /// Chunk by chunk with memory sampling
    Streaming,
}

/// Run statistics.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StreamStats {
    pub processed_files: usize,
    pub total_files: usize,
    pub success_rate: f64,
    pub elapsed_ms: u64,
    pub memory_peak_mb: f64,
    pub error_count: usize,
    pub stop_reason: StopReason,
}

/// Collected results plus statistics. Partial on early stop.
#[derive(Debug)]
pub struct ProcessOutcome<T> {
    pub results: Vec<T>,
    pub stats: StreamStats,
}

/// Memory- and concurrency-bounded processor.
#[derive(Debug, Clone)]
pub struct StreamProcessor {
    config: StreamConfig,
}

impl StreamProcessor {
    pub fn new(config: StreamConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &StreamConfig {
        &self.config
    }

    pub fn default_options(&self) -> StreamOptions {
        StreamOptions::from_config(&self.config)
    }

    /// Whether `item_count` files would exceed the in-memory batch budget.
    pub fn should_use_streaming(&self, item_count: usize) -> bool {
        let estimated_bytes = item_count as f64 * self.config.avg_item_bytes as f64;
        let budget_bytes = self.config.memory_ceiling_mb as f64
            * 1024.0
            * 1024.0
            * self.config.streaming_memory_fraction;
        estimated_bytes > budget_bytes
    }

    pub fn mode_for(&self, item_count: usize) -> ProcessingMode {
        if self.should_use_streaming(item_count) {
            ProcessingMode::Streaming
        } else {
            ProcessingMode::Batch
        }
    }

    /// Process files chunk by chunk.
    pub async fn process_files_stream<T, F, Fut>(
        &self,
        files: Vec<PathBuf>,
        process: F,
        opts: &StreamOptions,
    ) -> ProcessOutcome<T>
    where
        F: Fn(PathBuf) -> Fut,
        Fut: Future<Output = Result<Vec<T>>>,
    {
        let chunk_size = self.config.chunk_size;
        self.run(files, process, opts, chunk_size).await
    }

    /// Process all files as a single chunk.
    pub async fn process_files_batch<T, F, Fut>(
        &self,
        files: Vec<PathBuf>,
        process: F,
        opts: &StreamOptions,
    ) -> ProcessOutcome<T>
    where
        F: Fn(PathBuf) -> Fut,
        Fut: Future<Output = Result<Vec<T>>>,
    {
        let chunk_size = files.len();
        self.run(files, process, opts, chunk_size).await
    }

    async fn run<T, F, Fut>(
        &self,
        files: Vec<PathBuf>,
        process: F,
        opts: &StreamOptions,
        chunk_size: usize,
    ) -> ProcessOutcome<T>
    where
        F: Fn(PathBuf) -> Fut,
        Fut: Future<Output = Result<Vec<T>>>,
    {
        let started = Instant::now();
        let total_files = files.len();
        let breaker = CircuitBreaker::with_config(CircuitBreakerConfig {
            max_error_ratio: opts.error_threshold,
            min_sample: self.config.min_breaker_sample,
        });
        let concurrency = opts.max_concurrency.max(1);
        let process = &process;

        let mut results = Vec::new();
        let mut processed_files = 0;
        let mut error_count = 0;
        let mut memory_peak_mb = memory::resident_mb().await.unwrap_or(0.0);
        let mut stop_reason = StopReason::Completed;

        for chunk in files.chunks(chunk_size.max(1)) {
            let mut chunk_stream = stream::iter(chunk.iter().cloned())
                .map(|path| async move {
                    let context = path.display().to_string();
                    let result = self.retry_with_backoff(&context, || process(path.clone())).await;
                    (path, result)
                })
                .buffer_unordered(concurrency);

            while let Some((path, result)) = chunk_stream.next().await {
                processed_files += 1;
                match result {
                    Ok(items) => results.extend(items),
                    Err(e) => {
                        error_count += 1;
                        log::warn!("Failed to process {}: {}", path.display(), e);
                    }
                }
            }

            if let Some(used) = memory::resident_mb().await {
                memory_peak_mb = memory_peak_mb.max(used);
                if used > self.config.memory_ceiling_mb as f64 {
                    log::warn!(
                        "{}",
                        AppError::MemoryCeiling {
                            used_mb: used,
                            ceiling_mb: self.config.memory_ceiling_mb
                        }
                    );
                    results.shrink_to_fit();
                    tokio::task::yield_now().await;
                    if memory::resident_mb()
                        .await
                        .is_some_and(|after| after > self.config.memory_ceiling_mb as f64)
                    {
                        stop_reason = StopReason::MemoryCeiling;
                        break;
                    }
                }
            }

            if breaker.validate(error_count, processed_files).is_err() {
                stop_reason = StopReason::ErrorThreshold;
                break;
            }

            if opts.enable_early_stop
                && opts.target_results.is_some_and(|target| results.len() >= target)
            {
                log::debug!("Early stop: {} results collected", results.len());
                stop_reason = StopReason::TargetReached;
                break;
            }
        }

        let success_rate = if processed_files == 0 {
            1.0
        } else {
            (processed_files - error_count) as f64 / processed_files as f64
        };

        ProcessOutcome {
            results,
            stats: StreamStats {
                processed_files,
                total_files,
                success_rate,
                elapsed_ms: started.elapsed().as_millis() as u64,
                memory_peak_mb,
                error_count,
                stop_reason,
            },
        }
    }

    /// Run `op` under the per-file timeout, retrying transient failures.
    ///
    /// Delay before retry `n` (0-based) is `base * 2^n`, capped at the
    /// configured maximum.
    pub async fn retry_with_backoff<T, F, Fut>(&self, context: &str, mut op: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let timeout = self.config.file_timeout();
        let mut attempt: u32 = 0;
        loop {
            let result = match tokio::time::timeout(timeout, op()).await {
                Ok(result) => result,
                Err(_) => Err(AppError::timeout(context, self.config.file_timeout_ms)),
            };

            match result {
                Ok(value) => return Ok(value),
                Err(e) if e.is_transient() && attempt < self.config.max_retries => {
                    let delay = self.backoff_delay(attempt);
                    log::debug!(
                        "Retrying {} in {:?} (attempt {}): {}",
                        context,
                        delay,
                        attempt + 1,
                        e
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }

    fn backoff_delay(&self, attempt: u32) -> Duration {
        let factor = 2u64.saturating_pow(attempt);
        let delay_ms = self
            .config
            .retry_base_delay_ms
            .saturating_mul(factor)
            .min(self.config.retry_max_delay_ms);
        Duration::from_millis(delay_ms)
    }
}
