//! Bulk file processing over the cache directory.
//!
//! - `stream`: bounded-concurrency, bounded-memory file processor
//! - `circuit_breaker`: error-rate guard used by the processor
//! - `transform`: chunking, paged producer and filter/map/aggregate stages
//! - `extract`: opportunity extraction and the lazy per-file generator

pub mod circuit_breaker;
pub mod extract;
pub mod stream;
pub mod transform;

pub use circuit_breaker::{CircuitBreaker, CircuitBreakerConfig, CircuitBreakerResult};
pub use extract::{extract_opportunities, opportunity_stream, read_opportunities};
pub use stream::{
    ProcessOutcome, ProcessingMode, StopReason, StreamOptions, StreamProcessor, StreamStats,
};
pub use transform::{Batch, Page, aggregate, chunked, pages};
