//! Core types for the unified memory store

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::error::UnimemError;

/// Unique identifier for a memory: `{tier}_{scope}_{epoch_millis}_{suffix}`
pub type MemoryId = String;

/// Hard ceiling on the UTF-8 byte length of a core memory
pub const CORE_SIZE_LIMIT_BYTES: usize = 2048;

/// Default similarity threshold for duplicate detection and cascade deletes
pub const DEFAULT_DUPLICATE_THRESHOLD: f64 = 0.7;

/// A memory entry in the database
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Memory {
    /// Unique identifier, fixed at creation
    pub id: MemoryId,
    /// Main content of the memory
    pub content: String,
    /// Retention tier
    pub tier: MemoryTier,
    /// Visibility scope
    pub scope: MemoryScope,
    /// Owning project, present iff scope is `project`
    pub project_id: Option<String>,
    /// Tags in display order, no duplicates
    #[serde(default)]
    pub tags: Vec<String>,
    /// Caller metadata merged with derived tier/scope descriptors
    #[serde(default)]
    pub metadata: HashMap<String, serde_json::Value>,
    /// UTF-8 byte length of `content`
    pub content_size: usize,
    /// SHA256 of normalized content
    pub content_hash: String,
    /// When the memory was created
    pub created_at: DateTime<Utc>,
    /// When the memory was last returned by a read
    pub accessed_at: DateTime<Utc>,
    /// Number of read hits
    #[serde(default)]
    pub access_count: i64,
}

impl Memory {
    /// Short single-line preview used by reports
    pub fn preview(&self, max_chars: usize) -> String {
        let flat: String = self.content.split_whitespace().collect::<Vec<_>>().join(" ");
        if flat.chars().count() <= max_chars {
            flat
        } else {
            let cut: String = flat.chars().take(max_chars).collect();
            format!("{}...", cut)
        }
    }
}

/// Memory tier: retention and size class
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MemoryTier {
    /// Small, always-available memories (max 2KB each)
    Core,
    /// Unlimited size, retrieved on demand
    Longterm,
}

impl MemoryTier {
    pub fn as_str(&self) -> &'static str {
        match self {
            MemoryTier::Core => "core",
            MemoryTier::Longterm => "longterm",
        }
    }

    /// Sort priority in search results (lower comes first)
    pub fn priority(&self) -> u8 {
        match self {
            MemoryTier::Core => 0,
            MemoryTier::Longterm => 1,
        }
    }

    pub fn description(&self) -> &'static str {
        match self {
            MemoryTier::Core => "Core memory - small, always available (max 2KB)",
            MemoryTier::Longterm => "Long-term memory - unlimited size, retrieved on demand",
        }
    }

    pub fn all() -> &'static [MemoryTier] {
        &[MemoryTier::Core, MemoryTier::Longterm]
    }
}

impl std::fmt::Display for MemoryTier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for MemoryTier {
    type Err = UnimemError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "core" => Ok(MemoryTier::Core),
            "longterm" | "long_term" | "long-term" => Ok(MemoryTier::Longterm),
            _ => Err(UnimemError::validation(format!(
                "Invalid tier: {} (expected core or longterm)",
                s
            ))),
        }
    }
}

/// Memory scope: who can see a memory
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MemoryScope {
    /// Shared across all projects
    Global,
    /// Bound to exactly one project identifier
    Project,
}

impl MemoryScope {
    pub fn as_str(&self) -> &'static str {
        match self {
            MemoryScope::Global => "global",
            MemoryScope::Project => "project",
        }
    }

    pub fn description(&self) -> &'static str {
        match self {
            MemoryScope::Global => "Global - shared across all projects",
            MemoryScope::Project => "Project - bound to a single project",
        }
    }

    pub fn all() -> &'static [MemoryScope] {
        &[MemoryScope::Global, MemoryScope::Project]
    }
}

impl std::fmt::Display for MemoryScope {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for MemoryScope {
    type Err = UnimemError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "global" => Ok(MemoryScope::Global),
            "project" => Ok(MemoryScope::Project),
            _ => Err(UnimemError::validation(format!(
                "Invalid scope: {} (expected global or project)",
                s
            ))),
        }
    }
}

/// Input for storing a new memory
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreMemoryInput {
    pub content: String,
    pub tier: MemoryTier,
    pub scope: MemoryScope,
    pub project_id: Option<String>,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub metadata: HashMap<String, serde_json::Value>,
}

impl StoreMemoryInput {
    pub fn new(content: impl Into<String>, tier: MemoryTier, scope: MemoryScope) -> Self {
        Self {
            content: content.into(),
            tier,
            scope,
            project_id: None,
            tags: Vec::new(),
            metadata: HashMap::new(),
        }
    }

    pub fn with_project(mut self, project_id: impl Into<String>) -> Self {
        self.project_id = Some(project_id.into());
        self
    }

    pub fn with_tags<I, S>(mut self, tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.tags = tags.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.metadata.insert(key.into(), value);
        self
    }
}

/// Options for search operations
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SearchOptions {
    pub tier: Option<MemoryTier>,
    pub scope: Option<MemoryScope>,
    pub project_id: Option<String>,
    /// Legacy layer filter, mapped to its tier/scope pair
    pub layer: Option<String>,
    /// Only records carrying every one of these tags
    pub tags: Option<Vec<String>>,
    pub limit: Option<usize>,
}

/// How a search hit matched the query
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MatchType {
    /// Query is a case-insensitive substring of the content
    Exact,
    /// Enough query tokens appear in the content or tags
    Fuzzy,
    /// Reserved for an embedding-based matcher; never produced by lexical search
    Semantic,
}

impl MatchType {
    pub fn as_str(&self) -> &'static str {
        match self {
            MatchType::Exact => "exact",
            MatchType::Fuzzy => "fuzzy",
            MatchType::Semantic => "semantic",
        }
    }
}

/// Search result with match details
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchResult {
    pub memory: Memory,
    pub score: f64,
    pub match_type: MatchType,
    #[serde(default)]
    pub matched_terms: Vec<String>,
}

/// Outcome of a delete
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeleteResult {
    pub deleted: bool,
    pub related_deleted: usize,
    pub message: String,
}

/// Outcome of a content update
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateResult {
    pub updated: bool,
    pub content_size: Option<usize>,
    pub message: String,
}

/// Outcome of a tier migration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TierMigrationResult {
    pub migrated: bool,
    pub from_tier: Option<MemoryTier>,
    pub to_tier: MemoryTier,
    pub message: String,
}

/// Candidate restriction and threshold for a duplicate check
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DuplicateQuery {
    pub tier: Option<MemoryTier>,
    pub scope: Option<MemoryScope>,
    pub project_id: Option<String>,
    /// Defaults to the configured threshold (0.7)
    pub threshold: Option<f64>,
}

/// A stored memory that resembles the checked content
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DuplicateMatch {
    pub memory: Memory,
    pub similarity: f64,
}

/// Result of a duplicate check
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DuplicateReport {
    pub is_duplicate: bool,
    pub duplicates: Vec<DuplicateMatch>,
    pub recommendation: String,
}

/// Per-tier counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TierCounts {
    pub core: i64,
    pub longterm: i64,
}

impl TierCounts {
    pub fn add(&mut self, tier: MemoryTier, n: i64) {
        match tier {
            MemoryTier::Core => self.core += n,
            MemoryTier::Longterm => self.longterm += n,
        }
    }
}

/// Per-scope counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScopeCounts {
    pub global: i64,
    pub project: i64,
}

impl ScopeCounts {
    pub fn add(&mut self, scope: MemoryScope, n: i64) {
        match scope {
            MemoryScope::Global => self.global += n,
            MemoryScope::Project => self.project += n,
        }
    }
}

/// Aggregate counts kept for pre-tier reporting consumers
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoreStats {
    pub total_memories: i64,
    pub total_bytes: i64,
    pub core_bytes: i64,
    pub tier_counts: TierCounts,
    pub scope_counts: ScopeCounts,
    /// core bytes / (core count * 2048), 0 when there are no core memories
    pub core_utilization: f64,
}

/// Configuration for the store
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    /// Path to the SQLite database, or `:memory:`
    pub db_path: String,
    /// Journal mode selection
    #[serde(default)]
    pub storage_mode: StorageMode,
    /// Ceiling for core-tier byte usage reported by analytics
    #[serde(default = "default_core_capacity")]
    pub core_capacity_bytes: u64,
    /// Number of read-only connections for file databases
    #[serde(default = "default_reader_pool_size")]
    pub reader_pool_size: usize,
    /// Legacy layer-model database to import from
    pub legacy_db_path: Option<String>,
    /// Root directory for pre-migration snapshots
    pub backup_dir: Option<String>,
    /// Default search page size
    #[serde(default = "default_search_limit")]
    pub search_limit: usize,
    /// Default duplicate threshold, also used for cascade deletes
    #[serde(default = "default_duplicate_threshold")]
    pub duplicate_threshold: f64,
}

fn default_core_capacity() -> u64 {
    64 * 1024
}

fn default_reader_pool_size() -> usize {
    4
}

fn default_search_limit() -> usize {
    10
}

fn default_duplicate_threshold() -> f64 {
    DEFAULT_DUPLICATE_THRESHOLD
}

impl StoreConfig {
    pub fn new(db_path: impl Into<String>) -> Self {
        Self {
            db_path: db_path.into(),
            storage_mode: StorageMode::default(),
            core_capacity_bytes: default_core_capacity(),
            reader_pool_size: default_reader_pool_size(),
            legacy_db_path: None,
            backup_dir: None,
            search_limit: default_search_limit(),
            duplicate_threshold: default_duplicate_threshold(),
        }
    }

    pub fn in_memory() -> Self {
        Self::new(":memory:")
    }

    pub fn is_in_memory(&self) -> bool {
        self.db_path == ":memory:"
    }

    pub fn validate(&self) -> crate::error::Result<()> {
        if !(0.0..=1.0).contains(&self.duplicate_threshold) {
            return Err(UnimemError::Config(format!(
                "duplicate_threshold must be within [0, 1], got {}",
                self.duplicate_threshold
            )));
        }
        if self.core_capacity_bytes == 0 {
            return Err(UnimemError::Config(
                "core_capacity_bytes must be positive".to_string(),
            ));
        }
        if self.search_limit == 0 {
            return Err(UnimemError::Config("search_limit must be positive".to_string()));
        }
        Ok(())
    }
}

/// Storage mode for SQLite
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "kebab-case")]
pub enum StorageMode {
    #[default]
    Local,
    CloudSafe,
}

impl std::str::FromStr for StorageMode {
    type Err = UnimemError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "local" => Ok(StorageMode::Local),
            "cloud-safe" => Ok(StorageMode::CloudSafe),
            _ => Err(UnimemError::Config(format!("Unknown storage mode: {}", s))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tier_parse() {
        assert_eq!("core".parse::<MemoryTier>().unwrap(), MemoryTier::Core);
        assert_eq!("LongTerm".parse::<MemoryTier>().unwrap(), MemoryTier::Longterm);
        let err = "archive".parse::<MemoryTier>().unwrap_err();
        assert!(err.is_validation());
        assert!(err.to_string().contains("Invalid tier"));
    }

    #[test]
    fn test_scope_parse() {
        assert_eq!("project".parse::<MemoryScope>().unwrap(), MemoryScope::Project);
        assert!("team".parse::<MemoryScope>().is_err());
    }

    #[test]
    fn test_tier_priority() {
        assert!(MemoryTier::Core.priority() < MemoryTier::Longterm.priority());
    }

    #[test]
    fn test_match_type_serializes_lowercase() {
        let json = serde_json::to_string(&MatchType::Semantic).unwrap();
        assert_eq!(json, "\"semantic\"");
    }

    #[test]
    fn test_config_validation() {
        let mut config = StoreConfig::in_memory();
        assert!(config.validate().is_ok());
        config.duplicate_threshold = 1.5;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_stats_shape_is_camel_case() {
        let json = serde_json::to_value(StoreStats::default()).unwrap();
        assert!(json.get("totalMemories").is_some());
        assert!(json.get("coreUtilization").is_some());
        assert!(json["tierCounts"].get("longterm").is_some());
    }
}
