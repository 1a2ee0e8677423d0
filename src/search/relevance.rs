//! Lexical relevance scoring
//!
//! A hit is `exact` when the whole query is a case-insensitive substring of
//! the content, `fuzzy` when enough query tokens appear in the content or
//! tags. Scores combine match quality with tag overlap.

use once_cell::sync::Lazy;
use regex::Regex;
use std::cmp::Ordering;
use std::collections::HashSet;

use crate::types::{MatchType, Memory, SearchResult};

static TOKEN_PATTERN: Lazy<Regex> = Lazy::new(|| Regex::new(r"[\p{L}\p{N}]+").unwrap());

/// Fraction of query tokens that must be found for a fuzzy hit
pub const FUZZY_MIN_OVERLAP: f64 = 0.3;

const EXACT_QUALITY: f64 = 1.0;
const FUZZY_WEIGHT: f64 = 0.8;
const TAG_WEIGHT: f64 = 0.25;

/// Tokenize text into lowercase words
pub fn tokenize(text: &str) -> Vec<String> {
    TOKEN_PATTERN
        .find_iter(&text.to_lowercase())
        .map(|m| m.as_str().to_string())
        .collect()
}

/// Distinct lowercase tokens
pub fn token_set(text: &str) -> HashSet<String> {
    tokenize(text).into_iter().collect()
}

/// Pre-tokenized query reused across all candidates
#[derive(Debug, Clone)]
pub struct QueryTerms {
    lowered: String,
    tokens: Vec<String>,
}

impl QueryTerms {
    pub fn new(query: &str) -> Self {
        let mut tokens: Vec<String> = Vec::new();
        for token in tokenize(query) {
            if !tokens.contains(&token) {
                tokens.push(token);
            }
        }
        Self {
            lowered: query.trim().to_lowercase(),
            tokens,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.lowered.is_empty()
    }

    pub fn tokens(&self) -> &[String] {
        &self.tokens
    }
}

/// How one memory relates to a query
#[derive(Debug, Clone, PartialEq)]
pub struct Relevance {
    pub match_type: MatchType,
    pub score: f64,
    pub matched_terms: Vec<String>,
}

/// Score a memory against a query; `None` when it does not match
pub fn score_memory(query: &QueryTerms, memory: &Memory) -> Option<Relevance> {
    if query.is_empty() {
        return None;
    }

    let content_tokens = token_set(&memory.content);
    let tag_tokens: HashSet<String> = memory.tags.iter().flat_map(|t| tokenize(t)).collect();

    let mut matched_terms = Vec::new();
    let mut content_hits = 0usize;
    let mut tag_hits = 0usize;
    for token in query.tokens() {
        let in_content = content_tokens.contains(token);
        let in_tags = tag_tokens.contains(token);
        if in_content {
            content_hits += 1;
        }
        if in_tags {
            tag_hits += 1;
        }
        if in_content || in_tags {
            matched_terms.push(token.clone());
        }
    }

    let token_count = query.tokens().len().max(1) as f64;
    let overlap = matched_terms.len() as f64 / token_count;
    let tag_overlap = tag_hits as f64 / token_count;

    let (match_type, quality) = if memory.content.to_lowercase().contains(&query.lowered) {
        (MatchType::Exact, EXACT_QUALITY)
    } else if !query.tokens().is_empty() && overlap >= FUZZY_MIN_OVERLAP {
        // Content tokens weigh fully, tag-only tokens at half
        let content_overlap = content_hits as f64 / token_count;
        let quality = FUZZY_WEIGHT * (content_overlap + (overlap - content_overlap) * 0.5);
        (MatchType::Fuzzy, quality)
    } else {
        return None;
    };

    Some(Relevance {
        match_type,
        score: quality + TAG_WEIGHT * tag_overlap,
        matched_terms,
    })
}

/// Order hits: core before longterm, then score, then newest first
pub fn compare_results(a: &SearchResult, b: &SearchResult) -> Ordering {
    a.memory
        .tier
        .priority()
        .cmp(&b.memory.tier.priority())
        .then_with(|| b.score.total_cmp(&a.score))
        .then_with(|| b.memory.created_at.cmp(&a.memory.created_at))
        .then_with(|| a.memory.id.cmp(&b.memory.id))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{MemoryScope, MemoryTier};
    use chrono::{Duration, Utc};
    use std::collections::HashMap;

    fn memory(id: &str, content: &str, tier: MemoryTier, tags: &[&str]) -> Memory {
        let now = Utc::now();
        Memory {
            id: id.to_string(),
            content: content.to_string(),
            tier,
            scope: MemoryScope::Global,
            project_id: None,
            tags: tags.iter().map(|t| t.to_string()).collect(),
            metadata: HashMap::new(),
            content_size: content.len(),
            content_hash: String::new(),
            created_at: now,
            accessed_at: now,
            access_count: 0,
        }
    }

    #[test]
    fn test_tokenize() {
        assert_eq!(
            tokenize("Async/await in JavaScript!"),
            vec!["async", "await", "in", "javascript"]
        );
    }

    #[test]
    fn test_exact_match_is_case_insensitive() {
        let m = memory("1", "Prefer Tabs over spaces", MemoryTier::Core, &[]);
        let hit = score_memory(&QueryTerms::new("tabs OVER"), &m).unwrap();
        assert_eq!(hit.match_type, MatchType::Exact);
    }

    #[test]
    fn test_fuzzy_match_requires_overlap() {
        let m = memory("1", "Use tokio runtime for async tasks", MemoryTier::Core, &[]);
        let hit = score_memory(&QueryTerms::new("async runtime choice"), &m).unwrap();
        assert_eq!(hit.match_type, MatchType::Fuzzy);
        assert_eq!(hit.matched_terms, vec!["async", "runtime"]);

        assert!(score_memory(&QueryTerms::new("database schema design"), &m).is_none());
    }

    #[test]
    fn test_tag_overlap_raises_score() {
        let plain = memory("1", "deploy with docker compose", MemoryTier::Core, &[]);
        let tagged = memory("2", "deploy with docker compose", MemoryTier::Core, &["docker"]);
        let query = QueryTerms::new("docker");
        let a = score_memory(&query, &plain).unwrap();
        let b = score_memory(&query, &tagged).unwrap();
        assert!(b.score > a.score);
    }

    #[test]
    fn test_lexical_scorer_never_reports_semantic() {
        let m = memory("1", "anything at all", MemoryTier::Core, &["misc"]);
        for q in ["anything", "all misc", "at"] {
            if let Some(hit) = score_memory(&QueryTerms::new(q), &m) {
                assert_ne!(hit.match_type, MatchType::Semantic);
            }
        }
    }

    #[test]
    fn test_ordering_tier_then_score_then_recency() {
        let mut older = memory("a", "x", MemoryTier::Core, &[]);
        older.created_at = Utc::now() - Duration::hours(1);
        let newer = memory("b", "x", MemoryTier::Core, &[]);
        let longterm = memory("c", "x", MemoryTier::Longterm, &[]);

        let mut results = vec![
            SearchResult {
                memory: longterm,
                score: 5.0,
                match_type: MatchType::Exact,
                matched_terms: vec![],
            },
            SearchResult {
                memory: older,
                score: 1.0,
                match_type: MatchType::Exact,
                matched_terms: vec![],
            },
            SearchResult {
                memory: newer,
                score: 1.0,
                match_type: MatchType::Exact,
                matched_terms: vec![],
            },
        ];
        results.sort_by(compare_results);
        let ids: Vec<&str> = results.iter().map(|r| r.memory.id.as_str()).collect();
        assert_eq!(ids, vec!["b", "a", "c"]);
    }
}
