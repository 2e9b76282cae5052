//! Token-overlap fuzzy matching.

use unicode_segmentation::UnicodeSegmentation;

/// Tokens of this many chars or fewer are dropped.
const MAX_SHORT_TOKEN: usize = 2;

/// Suffixes removed by `stem`, longest first.
const SUFFIXES: &[&str] = &["ing", "ed", "es", "s"];

/// Chars that must remain after a suffix is stripped.
const MIN_STEM: usize = 3;

/// Check if a word is a common stopword (English/French).
pub fn is_stopword(word: &str) -> bool {
    const STOPWORDS: &[&str] = &[
        // English common words
        "the", "and", "are", "was", "were", "been", "being", "have", "has", "had", "does", "did",
        "will", "would", "could", "should", "may", "might", "can", "must", "shall", "for", "with",
        "from", "but", "then", "than", "our", "you", "your", "all", "any", "who", "this", "that",
        "into", "not", // French common words
        "les", "des", "une", "pour", "avec", "dans", "sur", "par", "est", "sont", "nous", "vous",
        "qui", "que", "aux", "ses", "leur", "mais", "pas", "plus",
        // Common URL/HTML artifacts
        "http", "https", "www", "com", "html", "php", "asp",
    ];
    STOPWORDS.contains(&word)
}

/// Tokenize a string into normalized, de-duplicated keywords.
///
/// Lower-cases, splits on unicode word boundaries, drops stopwords and
/// tokens of two chars or fewer.
pub fn tokenize(text: &str) -> Vec<String> {
    let normalized = text.to_lowercase();
    let mut tokens: Vec<String> = Vec::new();
    for word in normalized.unicode_words() {
        if word.chars().count() <= MAX_SHORT_TOKEN || is_stopword(word) {
            continue;
        }
        if !tokens.iter().any(|t| t == word) {
            tokens.push(word.to_string());
        }
    }
    tokens
}

/// Strip one common English inflection, keeping at least three chars.
pub fn stem(token: &str) -> &str {
    for suffix in SUFFIXES {
        if let Some(base) = token.strip_suffix(suffix) {
            if base.chars().count() >= MIN_STEM {
                return base;
            }
        }
    }
    token
}

/// Whether two tokens match by containment or shared stem.
pub fn tokens_match(a: &str, b: &str) -> bool {
    a.contains(b) || b.contains(a) || stem(a) == stem(b)
}

/// Fuzzy overlap of two token lists in [0, 1].
///
/// Counts tokens of the shorter list that match some token of the longer
/// one, divided by the longer list's length.
pub fn token_overlap(a: &[String], b: &[String]) -> f64 {
    if a.is_empty() || b.is_empty() {
        return 0.0;
    }
    let (shorter, longer) = if a.len() <= b.len() { (a, b) } else { (b, a) };
    let matches = shorter
        .iter()
        .filter(|s| longer.iter().any(|l| tokens_match(s, l)))
        .count();
    (matches as f64 / longer.len() as f64).min(1.0)
}

/// Fuzzy similarity of two strings in [0, 1].
pub fn fuzzy_score(a: &str, b: &str) -> f64 {
    token_overlap(&tokenize(a), &tokenize(b))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tokenize_drops_noise() {
        assert_eq!(
            tokenize("The Senior Engineer, and an engineer!"),
            vec!["senior", "engineer"]
        );
        assert!(tokenize("a b cd").is_empty());
    }

    #[test]
    fn test_stem() {
        assert_eq!(stem("engineers"), "engineer");
        assert_eq!(stem("testing"), "test");
        assert_eq!(stem("managed"), "manag");
        // Too short to strip
        assert_eq!(stem("bus"), "bus");
    }

    #[test]
    fn test_engineer_plural_scores_half() {
        let score = fuzzy_score("software engineer", "senior software engineers wanted");
        assert!(score >= 0.5, "score was {score}");
    }

    #[test]
    fn test_identical_and_disjoint() {
        assert_eq!(fuzzy_score("backend developer", "Backend Developer"), 1.0);
        assert_eq!(fuzzy_score("backend developer", "marketing manager"), 0.0);
        assert_eq!(fuzzy_score("", "anything"), 0.0);
    }

    #[test]
    fn test_score_is_bounded() {
        let score = fuzzy_score("data data data", "data");
        assert!((0.0..=1.0).contains(&score));
    }
}
