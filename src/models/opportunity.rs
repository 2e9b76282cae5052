//! Job opportunity data structure.

use std::cmp::Ordering;
use std::collections::BTreeSet;
use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One job posting extracted from a cached page.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Opportunity {
    /// Posting title (link text)
    pub title: String,

    /// Absolute URL of the posting
    pub url: String,

    /// Short description, empty when the scraper found none
    #[serde(default)]
    pub description: String,

    /// Host of the page the posting was found on
    pub domain: String,

    /// Two-letter language code
    pub language: String,

    /// Timestamp of the cache entry it came from
    pub scraped_at: DateTime<Utc>,

    /// Extraction confidence in [0, 1]
    pub confidence: f64,

    /// Normalized title tokens
    pub keywords: BTreeSet<String>,

    /// Cache file the posting was extracted from
    pub source_file: PathBuf,
}

impl Opportunity {
    /// Whether `self` should replace `other` when both share a URL.
    ///
    /// Newest `scraped_at` wins; ties go to the smaller source path so every
    /// backend picks the same record.
    pub fn supersedes(&self, other: &Opportunity) -> bool {
        match self.scraped_at.cmp(&other.scraped_at) {
            Ordering::Greater => true,
            Ordering::Less => false,
            Ordering::Equal => self.source_file < other.source_file,
        }
    }
}

/// An opportunity paired with its relevance score.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ScoredOpportunity {
    #[serde(flatten)]
    pub opportunity: Opportunity,

    /// Ranking score: overlap weighted by confidence
    pub score: f64,

    /// Raw fuzzy overlap between the query and the title
    pub fuzzy: f64,
}
