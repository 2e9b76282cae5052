//! Search request and response structures.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::ScoredOpportunity;

/// Result ordering.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortOrder {
    /// Highest score first
    #[default]
    Relevance,
    /// Newest `scraped_at` first
    Recent,
}

/// Caller options for `SearchOrchestrator::search`.
#[derive(Debug, Clone, Default)]
pub struct SearchOptions {
    pub language: Option<String>,
    /// Restrict to these domains; empty means all
    pub domains: Vec<String>,
    pub limit: Option<usize>,
    pub offset: usize,
    /// Opaque cursor from a previous page; overrides `offset`
    pub cursor: Option<String>,
    pub fuzzy_threshold: Option<f64>,
    pub sort: SortOrder,
    /// Stop scanning files once this many matches are found (streaming only)
    pub target_results: Option<usize>,
}

/// Which backend served a query.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SearchMethod {
    Indexed,
    Streaming,
    Batch,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PaginationKind {
    Offset,
    Cursor,
}

/// Resolved paging request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageRequest {
    pub kind: PaginationKind,
    pub limit: usize,
    pub offset: usize,
}

/// Paging metadata returned with every result page.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Pagination {
    #[serde(rename = "type")]
    pub kind: PaginationKind,
    pub limit: usize,
    pub offset: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cursor: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub next_cursor: Option<String>,
    pub total: usize,
    pub has_more: bool,
}

/// Snapshot of the in-memory index.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IndexStats {
    pub opportunities: usize,
    pub domains: usize,
    pub languages: usize,
    pub keywords: usize,
    pub files: usize,
    pub built_at: Option<DateTime<Utc>>,
    pub last_build_ms: u64,
    pub evicted: usize,
}

/// One page of an index lookup.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct IndexPage<T> {
    pub results: Vec<T>,
    pub total: usize,
    pub has_more: bool,
    pub next_offset: Option<usize>,
}

impl<T> IndexPage<T> {
    /// Slice a fully ranked list into one page.
    pub fn from_ranked(ranked: Vec<T>, limit: usize, offset: usize) -> Self {
        let total = ranked.len();
        let results: Vec<T> = ranked.into_iter().skip(offset).take(limit).collect();
        let end = offset.saturating_add(results.len());
        let has_more = end < total;
        Self {
            results,
            total,
            has_more,
            next_offset: has_more.then_some(end),
        }
    }
}

/// Response handed to the search API layer.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchResponse {
    pub results: Vec<ScoredOpportunity>,
    pub pagination: Pagination,
    pub search_time_ms: u64,
    pub method: SearchMethod,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub index_stats: Option<IndexStats>,
}
