//! Search functionality for the unified store
//!
//! Implements:
//! - Lexical relevance scoring (exact substring / fuzzy token overlap)
//! - Near-duplicate detection by token-set similarity

mod duplicates;
mod relevance;

pub use duplicates::*;
pub use relevance::*;

use crate::migration::legacy::map_legacy_layer;
use crate::storage::MemoryFilter;
use crate::types::SearchOptions;

/// Candidate filter for a search request
///
/// A legacy `layer` only fills in tier/scope the caller left unset.
pub fn resolve_filter(options: &SearchOptions) -> MemoryFilter {
    let mut filter = MemoryFilter {
        tier: options.tier,
        scope: options.scope,
        project_id: options
            .project_id
            .as_deref()
            .map(str::trim)
            .filter(|p| !p.is_empty())
            .map(String::from),
    };

    if let Some(ref layer) = options.layer {
        let (tier, scope) = map_legacy_layer(layer);
        filter.tier = filter.tier.or(Some(tier));
        filter.scope = filter.scope.or(Some(scope));
    }

    filter
}
