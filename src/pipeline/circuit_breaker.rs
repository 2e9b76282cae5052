//! Error-rate circuit breaker for bulk file processing.
//!
//! Once enough files have been processed, a run whose failure ratio climbs
//! above the threshold stops scheduling new chunks. Chunks already in
//! flight still complete.

use crate::error::{AppError, Result};

/// Circuit breaker configuration.
#[derive(Debug, Clone)]
pub struct CircuitBreakerConfig {
    /// Maximum tolerated failure ratio (0-1). Default: 0.5
    pub max_error_ratio: f64,
    /// Minimum processed count before the ratio is checked.
    /// Below this, a couple of early failures can't stop the run.
    pub min_sample: usize,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            max_error_ratio: 0.5,
            min_sample: 5,
        }
    }
}

/// Circuit breaker over a running error count.
#[derive(Debug, Clone)]
pub struct CircuitBreaker {
    config: CircuitBreakerConfig,
}

/// Result of circuit breaker check.
#[derive(Debug, Clone, PartialEq)]
pub enum CircuitBreakerResult {
    /// Error rate within bounds
    Safe { error_count: usize, processed: usize },
    /// Too few files processed to judge
    Warmup { processed: usize },
    /// Error rate over threshold - stop scheduling work
    Triggered {
        error_count: usize,
        processed: usize,
        error_ratio: f64,
    },
}

impl CircuitBreakerResult {
    pub fn is_triggered(&self) -> bool {
        matches!(self, CircuitBreakerResult::Triggered { .. })
    }
}

impl CircuitBreaker {
    /// Create a new circuit breaker with default configuration.
    pub fn new() -> Self {
        Self::with_config(CircuitBreakerConfig::default())
    }

    /// Create a new circuit breaker with custom configuration.
    pub fn with_config(config: CircuitBreakerConfig) -> Self {
        Self { config }
    }

    /// Check the running totals.
    pub fn check(&self, error_count: usize, processed: usize) -> CircuitBreakerResult {
        if processed == 0 || processed < self.config.min_sample {
            return CircuitBreakerResult::Warmup { processed };
        }

        let error_ratio = error_count as f64 / processed as f64;
        if error_ratio > self.config.max_error_ratio {
            return CircuitBreakerResult::Triggered {
                error_count,
                processed,
                error_ratio,
            };
        }

        CircuitBreakerResult::Safe {
            error_count,
            processed,
        }
    }

    /// Validate and return Ok if safe, Err if circuit breaker triggered.
    pub fn validate(&self, error_count: usize, processed: usize) -> Result<()> {
        match self.check(error_count, processed) {
            CircuitBreakerResult::Safe { .. } | CircuitBreakerResult::Warmup { .. } => Ok(()),
            CircuitBreakerResult::Triggered {
                error_count,
                processed,
                error_ratio,
            } => {
                log::error!(
                    "Circuit breaker: TRIGGERED! {}/{} files failed ({:.1}% > {:.1}% threshold)",
                    error_count,
                    processed,
                    error_ratio * 100.0,
                    self.config.max_error_ratio * 100.0
                );
                Err(AppError::CircuitBreakerTriggered {
                    error_count,
                    processed,
                    error_percent: error_ratio * 100.0,
                    threshold_percent: self.config.max_error_ratio * 100.0,
                })
            }
        }
    }
}

impl Default for CircuitBreaker {
    fn default() -> Self {
        Self::new()
    }
}
