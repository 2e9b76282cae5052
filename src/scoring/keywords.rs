//! Language-aware keyword matching.

use std::fmt;

use serde::{Deserialize, Serialize};
use unicode_segmentation::UnicodeSegmentation;

/// Points for each of the first `MAX_COUNTED` occurrences of a keyword.
const OCCURRENCE_POINTS: f64 = 5.0;
const MAX_COUNTED: usize = 5;
/// Bonus for an occurrence at the very start, fading to 0 at the end.
const POSITION_POINTS: f64 = 15.0;
/// Ceiling of the summed score.
pub const MAX_KEYWORD_SCORE: f64 = 100.0;

/// Language of a page or query.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Language {
    #[default]
    En,
    Fr,
    Other,
}

impl Language {
    /// Parse a language tag such as `en`, `fr-FR` or `EN_us`.
    pub fn parse(tag: &str) -> Self {
        let primary = tag
            .split(['-', '_'])
            .next()
            .unwrap_or_default()
            .to_ascii_lowercase();
        match primary.as_str() {
            "en" => Language::En,
            "fr" => Language::Fr,
            _ => Language::Other,
        }
    }

    pub fn code(&self) -> &'static str {
        match self {
            Language::En => "en",
            Language::Fr => "fr",
            Language::Other => "other",
        }
    }

    /// Guess English vs French from function words; ties go to English.
    pub fn detect(text: &str) -> Self {
        const EN_MARKERS: &[&str] = &[
            "the", "and", "with", "for", "you", "our", "are", "is", "of", "to", "we", "in",
        ];
        const FR_MARKERS: &[&str] = &[
            "le", "la", "les", "des", "et", "pour", "avec", "nous", "vous", "est", "une", "du",
        ];

        let lower = text.to_lowercase();
        let (mut en, mut fr) = (0usize, 0usize);
        for word in lower.unicode_words() {
            if EN_MARKERS.contains(&word) {
                en += 1;
            }
            if FR_MARKERS.contains(&word) {
                fr += 1;
            }
        }
        if fr > en { Language::Fr } else { Language::En }
    }
}

impl fmt::Display for Language {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

/// Morphological variants of `word`, the word itself first.
pub fn variants(word: &str, language: Language) -> Vec<String> {
    let word = word.trim().to_lowercase();
    let mut out = vec![word.clone()];
    let mut push = |v: String| {
        if v.chars().count() >= 3 && !out.contains(&v) {
            out.push(v);
        }
    };

    match language {
        Language::En | Language::Other => {
            if let Some(base) = word.strip_suffix("ies") {
                push(format!("{base}y"));
            } else if let Some(base) = word.strip_suffix('s') {
                push(base.to_string());
            } else if let Some(base) = word.strip_suffix('y') {
                push(format!("{base}ies"));
                push(format!("{word}s"));
            } else {
                push(format!("{word}s"));
            }
            if let Some(base) = word.strip_suffix("ing") {
                push(base.to_string());
                push(format!("{base}e"));
            }
            if let Some(base) = word.strip_suffix("ed") {
                push(base.to_string());
            }
        }
        Language::Fr => {
            if let Some(base) = word.strip_suffix("es") {
                push(base.to_string());
                push(format!("{base}e"));
            } else if let Some(base) = word.strip_suffix('s') {
                push(base.to_string());
            } else {
                push(format!("{word}s"));
            }
            if let Some(base) = word.strip_suffix('e') {
                push(base.to_string());
            } else if !word.ends_with('s') {
                push(format!("{word}e"));
            }
            for (masculine, feminine) in [
                ("teur", "trice"),
                ("eur", "euse"),
                ("ien", "ienne"),
                ("ier", "ière"),
            ] {
                if let Some(base) = word.strip_suffix(feminine) {
                    push(format!("{base}{masculine}"));
                    break;
                }
                if let Some(base) = word.strip_suffix(masculine) {
                    push(format!("{base}{feminine}"));
                    break;
                }
            }
        }
    }
    out
}

/// Match detail for one requested keyword.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct KeywordDetail {
    pub keyword: String,
    /// Variants that occurred in the content
    pub matched_variants: Vec<String>,
    pub occurrences: usize,
    /// Char offset of the first occurrence
    pub first_position: Option<usize>,
    pub score: f64,
}

/// Result of matching a keyword set against content.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct KeywordMatch {
    /// Summed keyword scores, capped at 100
    pub score: f64,
    pub details: Vec<KeywordDetail>,
    pub matched_keywords: usize,
    /// matched / requested
    pub coverage: f64,
}

fn is_single_word(form: &str) -> bool {
    !form.is_empty() && form.chars().all(char::is_alphanumeric)
}

/// Byte offsets of `needle` in `haystack` that don't start or end inside
/// a word, for phrases like "machine learning" or "c++".
fn literal_hits(haystack: &str, needle: &str) -> Vec<usize> {
    if needle.is_empty() {
        return Vec::new();
    }
    let is_word_char = |c: Option<char>| c.is_some_and(char::is_alphanumeric);
    haystack
        .match_indices(needle)
        .filter(|(i, _)| {
            let before = haystack[..*i].chars().next_back();
            let after = haystack[i + needle.len()..].chars().next();
            let first = needle.chars().next();
            let last = needle.chars().next_back();
            !(is_word_char(before) && is_word_char(first))
                && !(is_word_char(after) && is_word_char(last))
        })
        .map(|(i, _)| i)
        .collect()
}

/// Score `content` against `keywords`.
///
/// Each keyword scores `5` per occurrence (first five counted) plus up to
/// `15` for how early its first occurrence appears.
pub fn keyword_match(content: &str, keywords: &[String], language: Language) -> KeywordMatch {
    let lower = content.to_lowercase();
    let words: Vec<(usize, &str)> = lower.unicode_word_indices().collect();
    let total_chars = lower.chars().count().max(1);

    let mut details = Vec::with_capacity(keywords.len());
    for keyword in keywords {
        let forms = variants(keyword, language);
        let mut occurrences = 0;
        let mut first_byte: Option<usize> = None;
        let mut matched_variants = Vec::new();

        for form in &forms {
            let hits: Vec<usize> = if is_single_word(form) {
                words
                    .iter()
                    .filter(|(_, w)| w == form)
                    .map(|(i, _)| *i)
                    .collect()
            } else {
                literal_hits(&lower, form)
            };
            if hits.is_empty() {
                continue;
            }
            occurrences += hits.len();
            matched_variants.push(form.clone());
            let earliest = hits[0];
            first_byte = Some(first_byte.map_or(earliest, |b| b.min(earliest)));
        }

        let first_position = first_byte.map(|b| lower[..b].chars().count());
        let score = match first_position {
            Some(pos) => {
                let position_weight = 1.0 - pos as f64 / total_chars as f64;
                occurrences.min(MAX_COUNTED) as f64 * OCCURRENCE_POINTS
                    + POSITION_POINTS * position_weight
            }
            None => 0.0,
        };

        details.push(KeywordDetail {
            keyword: keyword.clone(),
            matched_variants,
            occurrences,
            first_position,
            score,
        });
    }

    let matched_keywords = details.iter().filter(|d| d.occurrences > 0).count();
    KeywordMatch {
        score: details
            .iter()
            .map(|d| d.score)
            .sum::<f64>()
            .min(MAX_KEYWORD_SCORE),
        coverage: if keywords.is_empty() {
            0.0
        } else {
            matched_keywords as f64 / keywords.len() as f64
        },
        matched_keywords,
        details,
    }
}
