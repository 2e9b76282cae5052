// src/models/mod.rs

//! Domain models for the harvest cache.
//!
//! This module contains all data structures used throughout the application,
//! organized by their primary purpose.

mod config;
mod entry;
mod opportunity;
mod search;

// Re-export all public types
pub use config::{
    CacheConfig, Config, IndexConfig, PaginationConfig, ScoringConfig, StreamConfig,
};
pub use entry::{
    CACHE_VERSION, CacheFile, CachedPage, EntryKey, Freshness, GetOptions, Quality, SetOptions,
};
pub use opportunity::{Opportunity, ScoredOpportunity};
pub use search::{
    IndexPage, IndexStats, PageRequest, Pagination, PaginationKind, SearchMethod, SearchOptions,
    SearchResponse, SortOrder,
};
