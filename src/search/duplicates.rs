//! Near-duplicate detection by token-set Jaccard similarity
//!
//! Similarity is symmetric, in [0, 1], 1.0 for identical (normalized)
//! content and 0.0 for disjoint vocabularies. A candidate is a duplicate
//! when its similarity is at or above the threshold, so a lower threshold
//! always admits a superset of what a higher one admits.

use std::collections::HashSet;

use super::relevance::token_set;
use crate::cancel::CancellationFlag;
use crate::error::Result;
use crate::invariants::compute_content_hash;
use crate::types::{DuplicateMatch, DuplicateReport, Memory};

/// Jaccard similarity of two token sets
pub fn jaccard(a: &HashSet<String>, b: &HashSet<String>) -> f64 {
    if a.is_empty() && b.is_empty() {
        return 0.0;
    }
    let intersection = a.intersection(b).count();
    let union = a.union(b).count();
    intersection as f64 / union as f64
}

/// Symmetric lexical similarity between two texts
pub fn similarity(a: &str, b: &str) -> f64 {
    SimilarityProbe::new(a).similarity_to_text(b)
}

/// Content prepared once and compared against many candidates
#[derive(Debug, Clone)]
pub struct SimilarityProbe {
    tokens: HashSet<String>,
    content_hash: String,
}

impl SimilarityProbe {
    pub fn new(content: &str) -> Self {
        Self {
            tokens: token_set(content),
            content_hash: compute_content_hash(content),
        }
    }

    pub fn similarity_to_text(&self, other: &str) -> f64 {
        if compute_content_hash(other) == self.content_hash {
            return 1.0;
        }
        jaccard(&self.tokens, &token_set(other))
    }

    pub fn similarity_to(&self, memory: &Memory) -> f64 {
        if memory.content_hash == self.content_hash {
            return 1.0;
        }
        jaccard(&self.tokens, &token_set(&memory.content))
    }
}

/// Score candidates and keep those at or above `threshold`, most similar first
pub fn find_duplicates<I>(
    content: &str,
    candidates: I,
    threshold: f64,
    cancel: &CancellationFlag,
) -> Result<Vec<DuplicateMatch>>
where
    I: IntoIterator<Item = Memory>,
{
    let probe = SimilarityProbe::new(content);
    let mut matches = Vec::new();

    for memory in candidates {
        cancel.check()?;
        let similarity = probe.similarity_to(&memory);
        if similarity >= threshold {
            matches.push(DuplicateMatch { memory, similarity });
        }
    }

    matches.sort_by(|a, b| {
        b.similarity
            .total_cmp(&a.similarity)
            .then_with(|| b.memory.created_at.cmp(&a.memory.created_at))
    });
    Ok(matches)
}

/// Human-readable advice for a set of matches
pub fn recommendation(matches: &[DuplicateMatch]) -> String {
    match matches.first() {
        None => "No duplicates found".to_string(),
        Some(best) if matches.len() == 1 => format!(
            "Similar memory found (id: {}, {:.0}% similar). Consider updating it instead of storing a new one.",
            best.memory.id,
            best.similarity * 100.0
        ),
        Some(best) => format!(
            "Similar memory found: {} candidates, closest is {} ({:.0}% similar). Consider consolidating them.",
            matches.len(),
            best.memory.id,
            best.similarity * 100.0
        ),
    }
}

/// Build the caller-facing report
pub fn build_report(matches: Vec<DuplicateMatch>) -> DuplicateReport {
    DuplicateReport {
        is_duplicate: !matches.is_empty(),
        recommendation: recommendation(&matches),
        duplicates: matches,
    }
}
