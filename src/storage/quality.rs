//! Quality classification of harvested payloads.

use serde_json::Value;

use crate::models::Quality;

/// The three content signals quality is derived from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QualitySignals {
    /// Page text longer than the configured minimum
    pub has_valid_text: bool,
    /// Non-empty `links` array
    pub has_valid_links: bool,
    /// `jobsFound > 0` or any link flagged `isJobPosting`
    pub has_job_signal: bool,
}

impl QualitySignals {
    /// Inspect a payload object.
    pub fn inspect(payload: &Value, min_text_length: usize) -> Self {
        let has_valid_text = payload
            .get("text")
            .and_then(Value::as_str)
            .is_some_and(|text| text.chars().count() > min_text_length);

        let links = payload.get("links").and_then(Value::as_array);
        let has_valid_links = links.is_some_and(|l| !l.is_empty());

        let jobs_found = payload
            .get("jobsFound")
            .and_then(Value::as_u64)
            .unwrap_or(0);
        let flagged_link = links.is_some_and(|l| l.iter().any(is_job_posting));

        Self {
            has_valid_text,
            has_valid_links,
            has_job_signal: jobs_found > 0 || flagged_link,
        }
    }

    /// Map signals to a tier.
    pub fn classify(&self) -> Quality {
        if self.has_valid_text && self.has_valid_links && self.has_job_signal {
            Quality::Full
        } else if self.has_valid_text || self.has_valid_links {
            Quality::Partial
        } else {
            Quality::Minimum
        }
    }
}

/// Classify a payload in one step.
pub fn classify(payload: &Value, min_text_length: usize) -> Quality {
    QualitySignals::inspect(payload, min_text_length).classify()
}

/// Whether a link object is flagged as a job posting.
pub fn is_job_posting(link: &Value) -> bool {
    link.get("isJobPosting")
        .and_then(Value::as_bool)
        .unwrap_or(false)
}
