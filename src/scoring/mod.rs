//! Relevance scoring: fuzzy token overlap, keyword matching and the
//! memoizing `ScoreCache` in front of both.

pub mod fuzzy;
pub mod keywords;
pub mod score_cache;

pub use fuzzy::{fuzzy_score, stem, token_overlap, tokenize};
pub use keywords::{KeywordDetail, KeywordMatch, Language, keyword_match, variants};
pub use score_cache::{ScoreCache, ScoreCacheStats, ScoreFamily, ScoreInput, Scored};
