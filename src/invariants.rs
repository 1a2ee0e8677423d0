//! Record invariants shared by every write path
//!
//! All mutation entry points (store, content update, tier migration, legacy
//! import) call [`validate_placement`] so tier/scope/size rules cannot be
//! bypassed. Derived metadata keys are produced by [`derive_metadata`] and
//! recomputed whenever tier or scope changes.

use chrono::{DateTime, Utc};
use rand::Rng;
use sha2::{Digest, Sha256};
use std::collections::HashMap;

use crate::error::{Result, UnimemError};
use crate::types::{MemoryScope, MemoryTier, CORE_SIZE_LIMIT_BYTES};

/// Metadata key holding the tier description
pub const META_TIER_DESCRIPTION: &str = "tier_description";
/// Metadata key holding the scope description
pub const META_SCOPE_DESCRIPTION: &str = "scope_description";
/// Metadata key holding the last path segment of the project id
pub const META_PROJECT_NAME: &str = "project_name";

const ID_SUFFIX_LEN: usize = 9;
const ID_SUFFIX_ALPHABET: &[u8] = b"abcdefghijklmnopqrstuvwxyz0123456789";

/// Validate a record placement and return its content size in bytes
///
/// Checks, in order: non-empty content, scope/project coupling, and the core
/// size ceiling. Nothing is ever reassigned here; a violation is an error.
pub fn validate_placement(
    content: &str,
    tier: MemoryTier,
    scope: MemoryScope,
    project_id: Option<&str>,
) -> Result<usize> {
    if content.trim().is_empty() {
        return Err(UnimemError::validation("Memory content cannot be empty"));
    }

    validate_scope(scope, project_id)?;

    let content_size = content.len();
    validate_tier_size(tier, content_size)?;

    Ok(content_size)
}

/// Scope/project coupling: project requires an id, global forbids one
pub fn validate_scope(scope: MemoryScope, project_id: Option<&str>) -> Result<()> {
    let has_project = project_id.map(|p| !p.trim().is_empty()).unwrap_or(false);
    match (scope, has_project) {
        (MemoryScope::Project, false) => Err(UnimemError::validation(
            "Project-scoped memories require a project_id",
        )),
        (MemoryScope::Global, true) => Err(UnimemError::validation(
            "Global memories cannot have a project_id",
        )),
        _ => Ok(()),
    }
}

/// Core memories are capped at 2048 UTF-8 bytes
pub fn validate_tier_size(tier: MemoryTier, content_size: usize) -> Result<()> {
    if tier == MemoryTier::Core && content_size > CORE_SIZE_LIMIT_BYTES {
        return Err(UnimemError::validation(format!(
            "Core memory exceeds 2KB limit ({} bytes > {} bytes)",
            content_size, CORE_SIZE_LIMIT_BYTES
        )));
    }
    Ok(())
}

/// Treat blank project ids as absent
pub fn normalize_project_id(project_id: Option<&str>) -> Option<String> {
    project_id
        .map(str::trim)
        .filter(|p| !p.is_empty())
        .map(String::from)
}

/// Trim tags, drop empties and repeated tags while keeping first-seen order
pub fn normalize_tags(tags: &[String]) -> Vec<String> {
    let mut out: Vec<String> = Vec::with_capacity(tags.len());
    for tag in tags {
        let tag = tag.trim();
        if tag.is_empty() || out.iter().any(|t| t == tag) {
            continue;
        }
        out.push(tag.to_string());
    }
    out
}

/// Last path segment of a project identifier
pub fn project_short_name(project_id: &str) -> String {
    project_id
        .trim_end_matches(['/', '\\'])
        .rsplit(['/', '\\'])
        .next()
        .filter(|s| !s.is_empty())
        .unwrap_or(project_id)
        .to_string()
}

/// Descriptor keys derived from tier, scope and project
pub fn derive_metadata(
    tier: MemoryTier,
    scope: MemoryScope,
    project_id: Option<&str>,
) -> HashMap<String, serde_json::Value> {
    let mut derived = HashMap::new();
    derived.insert(
        META_TIER_DESCRIPTION.to_string(),
        serde_json::Value::from(tier.description()),
    );
    derived.insert(
        META_SCOPE_DESCRIPTION.to_string(),
        serde_json::Value::from(scope.description()),
    );
    if let (MemoryScope::Project, Some(project_id)) = (scope, project_id) {
        derived.insert(
            META_PROJECT_NAME.to_string(),
            serde_json::Value::from(project_short_name(project_id)),
        );
    }
    derived
}

/// Merge caller metadata with freshly derived keys; derived keys win
pub fn merge_metadata(
    caller: &HashMap<String, serde_json::Value>,
    tier: MemoryTier,
    scope: MemoryScope,
    project_id: Option<&str>,
) -> HashMap<String, serde_json::Value> {
    let mut merged = caller.clone();
    merged.remove(META_PROJECT_NAME);
    merged.extend(derive_metadata(tier, scope, project_id));
    merged
}

/// Build an id of the form `{tier}_{scope}_{epoch_millis}_{suffix}`
pub fn generate_memory_id(tier: MemoryTier, scope: MemoryScope, now: DateTime<Utc>) -> String {
    let mut rng = rand::thread_rng();
    let suffix: String = (0..ID_SUFFIX_LEN)
        .map(|_| ID_SUFFIX_ALPHABET[rng.gen_range(0..ID_SUFFIX_ALPHABET.len())] as char)
        .collect();
    format!(
        "{}_{}_{}_{}",
        tier.as_str(),
        scope.as_str(),
        now.timestamp_millis(),
        suffix
    )
}

/// Parts encoded in a memory id
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MemoryIdParts {
    /// Tier at creation time; a later tier migration does not rewrite the id
    pub tier: MemoryTier,
    pub scope: MemoryScope,
    pub created_millis: i64,
    pub suffix: String,
}

/// Decode a memory id without touching storage
pub fn parse_memory_id(id: &str) -> Option<MemoryIdParts> {
    let mut parts = id.splitn(4, '_');
    let tier = parts.next()?.parse().ok()?;
    let scope = parts.next()?.parse().ok()?;
    let created_millis = parts.next()?.parse().ok()?;
    let suffix = parts.next().filter(|s| !s.is_empty())?.to_string();
    Some(MemoryIdParts {
        tier,
        scope,
        created_millis,
        suffix,
    })
}

/// Compute SHA256 hash of normalized content
pub fn compute_content_hash(content: &str) -> String {
    // Normalize: lowercase, collapse whitespace, trim
    let normalized = content
        .to_lowercase()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ");

    let mut hasher = Sha256::new();
    hasher.update(normalized.as_bytes());
    format!("sha256:{}", hex::encode(hasher.finalize()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_core_size_boundary_counts_bytes() {
        let at_limit = "x".repeat(CORE_SIZE_LIMIT_BYTES);
        assert_eq!(
            validate_placement(&at_limit, MemoryTier::Core, MemoryScope::Global, None).unwrap(),
            2048
        );

        // 683 three-byte chars = 2049 bytes but only 683 characters
        let multibyte = "€".repeat(683);
        let err = validate_placement(&multibyte, MemoryTier::Core, MemoryScope::Global, None)
            .unwrap_err();
        assert!(err.to_string().contains("exceeds 2KB limit"));

        assert!(
            validate_placement(&multibyte, MemoryTier::Longterm, MemoryScope::Global, None).is_ok()
        );
    }

    #[test]
    fn test_scope_coupling() {
        let err = validate_placement("hello", MemoryTier::Core, MemoryScope::Project, None)
            .unwrap_err();
        assert!(err.to_string().contains("require a project_id"));

        let err = validate_placement("hello", MemoryTier::Core, MemoryScope::Project, Some("  "))
            .unwrap_err();
        assert!(err.is_validation());

        let err = validate_placement("hello", MemoryTier::Core, MemoryScope::Global, Some("/a/b"))
            .unwrap_err();
        assert!(err.to_string().contains("cannot have a project_id"));
    }

    #[test]
    fn test_empty_content_rejected() {
        assert!(validate_placement("   ", MemoryTier::Longterm, MemoryScope::Global, None).is_err());
    }

    #[test]
    fn test_project_short_name() {
        assert_eq!(project_short_name("/home/dev/projects/webapp"), "webapp");
        assert_eq!(project_short_name("/home/dev/projects/webapp/"), "webapp");
        assert_eq!(project_short_name("C:\\work\\api"), "api");
        assert_eq!(project_short_name("standalone"), "standalone");
    }

    #[test]
    fn test_derived_metadata_overrides_caller() {
        let mut caller = HashMap::new();
        caller.insert("source".to_string(), serde_json::json!("chat"));
        caller.insert(META_TIER_DESCRIPTION.to_string(), serde_json::json!("bogus"));
        caller.insert(META_PROJECT_NAME.to_string(), serde_json::json!("stale"));

        let merged = merge_metadata(&caller, MemoryTier::Core, MemoryScope::Global, None);
        assert_eq!(merged["source"], "chat");
        assert_eq!(merged[META_TIER_DESCRIPTION], MemoryTier::Core.description());
        assert!(!merged.contains_key(META_PROJECT_NAME));

        let merged = merge_metadata(
            &caller,
            MemoryTier::Longterm,
            MemoryScope::Project,
            Some("/src/engine"),
        );
        assert_eq!(merged[META_PROJECT_NAME], "engine");
    }

    #[test]
    fn test_normalize_tags_keeps_first_seen_order() {
        let tags = vec![
            "rust".to_string(),
            " async ".to_string(),
            "".to_string(),
            "rust".to_string(),
            "tokio".to_string(),
        ];
        assert_eq!(normalize_tags(&tags), vec!["rust", "async", "tokio"]);
    }

    #[test]
    fn test_id_round_trip_structure() {
        let now = Utc::now();
        let id = generate_memory_id(MemoryTier::Longterm, MemoryScope::Project, now);
        let parts = parse_memory_id(&id).unwrap();
        assert_eq!(parts.tier, MemoryTier::Longterm);
        assert_eq!(parts.scope, MemoryScope::Project);
        assert_eq!(parts.created_millis, now.timestamp_millis());
        assert_eq!(parts.suffix.len(), ID_SUFFIX_LEN);
        assert!(parse_memory_id("not-an-id").is_none());
    }

    #[test]
    fn test_same_millisecond_ids_differ() {
        let now = Utc::now();
        let ids: std::collections::HashSet<String> = (0..500)
            .map(|_| generate_memory_id(MemoryTier::Core, MemoryScope::Global, now))
            .collect();
        assert_eq!(ids.len(), 500);
    }

    #[test]
    fn test_content_hash_normalizes_whitespace_and_case() {
        assert_eq!(
            compute_content_hash("Use  Tabs\nfor indentation"),
            compute_content_hash("use tabs for INDENTATION ")
        );
    }
}
