//! Golden tests - fixture-based tests that lock expected behavior
//!
//! These tests use JSON fixtures to verify that critical functions produce
//! expected outputs. Any change in behavior will cause these tests to fail,
//! signaling a potential breaking change.
//!
//! Run with: cargo test --test golden_tests

use serde::Deserialize;
use std::fs;

fn load_fixture<T: for<'de> Deserialize<'de>>(name: &str) -> T {
    let path = format!("{}/tests/fixtures/{}", env!("CARGO_MANIFEST_DIR"), name);
    let content =
        fs::read_to_string(&path).unwrap_or_else(|e| panic!("Failed to read {}: {}", name, e));
    serde_json::from_str(&content).expect("Failed to parse fixture JSON")
}

#[derive(Debug, Deserialize)]
struct Fixture<T> {
    test_cases: Vec<T>,
}

// ============================================================================
// LEGACY LAYER MAPPING GOLDEN TESTS
// ============================================================================

mod legacy_mapping_golden {
    use super::*;
    use unimem::migration::{demote_if_oversized, map_legacy_layer};
    use unimem::{MemoryScope, MemoryTier};

    #[derive(Debug, Deserialize)]
    struct TestCase {
        name: String,
        layer: String,
        content_size: usize,
        expected: Expected,
    }

    #[derive(Debug, Deserialize)]
    struct Expected {
        tier: MemoryTier,
        scope: MemoryScope,
        demoted: bool,
    }

    #[test]
    fn test_legacy_layer_mapping_golden() {
        let fixture: Fixture<TestCase> = load_fixture("legacy_layer_mapping.json");
        for case in fixture.test_cases {
            let (mapped, scope) = map_legacy_layer(&case.layer);
            let (tier, demoted) = demote_if_oversized(mapped, case.content_size);
            assert_eq!(tier, case.expected.tier, "Case '{}': tier mismatch", case.name);
            assert_eq!(scope, case.expected.scope, "Case '{}': scope mismatch", case.name);
            assert_eq!(
                demoted, case.expected.demoted,
                "Case '{}': demotion mismatch",
                case.name
            );
        }
    }
}

// ============================================================================
// SIMILARITY GOLDEN TESTS
// ============================================================================

mod similarity_golden {
    use super::*;
    use unimem::search::similarity;

    #[derive(Debug, Deserialize)]
    struct TestCase {
        name: String,
        a: String,
        b: String,
        expected: f64,
    }

    #[test]
    fn test_similarity_golden() {
        let fixture: Fixture<TestCase> = load_fixture("similarity.json");
        for case in fixture.test_cases {
            let forward = similarity(&case.a, &case.b);
            let backward = similarity(&case.b, &case.a);
            assert!(
                (forward - case.expected).abs() < 1e-9,
                "Case '{}': expected {}, got {}",
                case.name,
                case.expected,
                forward
            );
            assert_eq!(forward, backward, "Case '{}': not symmetric", case.name);
        }
    }
}

// ============================================================================
// SEARCH CLASSIFICATION GOLDEN TESTS
// ============================================================================

mod search_golden {
    use super::*;
    use chrono::Utc;
    use std::collections::HashMap;
    use unimem::search::{score_memory, QueryTerms};
    use unimem::{MatchType, Memory, MemoryScope, MemoryTier};

    #[derive(Debug, Deserialize)]
    struct TestCase {
        name: String,
        query: String,
        content: String,
        tags: Vec<String>,
        expected: Option<Expected>,
    }

    #[derive(Debug, Deserialize)]
    struct Expected {
        match_type: MatchType,
        matched_terms: Vec<String>,
    }

    #[test]
    fn test_search_classification_golden() {
        let fixture: Fixture<TestCase> = load_fixture("search_ranking.json");
        for case in fixture.test_cases {
            let now = Utc::now();
            let memory = Memory {
                id: case.name.clone(),
                content_size: case.content.len(),
                content: case.content,
                tier: MemoryTier::Longterm,
                scope: MemoryScope::Global,
                project_id: None,
                tags: case.tags,
                metadata: HashMap::new(),
                content_hash: String::new(),
                created_at: now,
                accessed_at: now,
                access_count: 0,
            };

            let hit = score_memory(&QueryTerms::new(&case.query), &memory);
            match (hit, case.expected) {
                (None, None) => {}
                (Some(hit), Some(expected)) => {
                    assert_eq!(
                        hit.match_type, expected.match_type,
                        "Case '{}': match type mismatch",
                        case.name
                    );
                    assert_eq!(
                        hit.matched_terms, expected.matched_terms,
                        "Case '{}': matched terms mismatch",
                        case.name
                    );
                    assert!(hit.score > 0.0, "Case '{}': non-positive score", case.name);
                }
                (hit, expected) => panic!(
                    "Case '{}': expected {:?}, got {:?}",
                    case.name, expected, hit
                ),
            }
        }
    }
}
