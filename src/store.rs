//! The unified memory store
//!
//! [`MemoryStore`] is the single entry point for callers. Writes go through
//! the shared validation in [`crate::invariants`]; mutations on one record
//! are serialized by its record lock while different records proceed in
//! parallel; reads use the pooled reader connections.

use chrono::Utc;
use std::collections::HashMap;
use std::path::PathBuf;

use crate::analytics::{self, Analytics};
use crate::cancel::CancellationFlag;
use crate::error::{Result, UnimemError};
use crate::invariants::{
    compute_content_hash, generate_memory_id, merge_metadata, normalize_project_id,
    normalize_tags, validate_placement,
};
use crate::migration::{self, LegacyMigrationOptions, LegacyMigrationResult, LegacyStore, MigrationStatus};
use crate::search::{
    build_report, compare_results, find_duplicates, resolve_filter, score_memory, QueryTerms,
};
use crate::storage::{queries, MemoryFilter, Storage};
use crate::types::*;

/// Attempts at drawing a fresh id before giving up
const MAX_ID_ATTEMPTS: usize = 8;

/// Tiered, scoped memory store backed by SQLite
#[derive(Clone)]
pub struct MemoryStore {
    storage: Storage,
}

/// A validated record ready for insertion
struct PreparedMemory {
    content: String,
    tier: MemoryTier,
    scope: MemoryScope,
    project_id: Option<String>,
    tags: Vec<String>,
    metadata: HashMap<String, serde_json::Value>,
    content_size: usize,
}

impl MemoryStore {
    pub fn open(config: StoreConfig) -> Result<Self> {
        let storage = Storage::open(config)?;
        if let Some(warning) = storage.storage_mode_warning() {
            tracing::warn!("{}", warning);
        }
        Ok(Self { storage })
    }

    pub fn open_in_memory() -> Result<Self> {
        Self::open(StoreConfig::in_memory())
    }

    pub fn storage(&self) -> &Storage {
        &self.storage
    }

    pub fn config(&self) -> &StoreConfig {
        self.storage.config()
    }

    /// Close the store; later calls fail with `StorageUnavailable`
    pub fn close(&self) -> Result<()> {
        self.storage.close()
    }

    fn prepare(&self, input: &StoreMemoryInput) -> Result<PreparedMemory> {
        self.storage.ensure_open()?;
        let project_id = normalize_project_id(input.project_id.as_deref());
        let content_size =
            validate_placement(&input.content, input.tier, input.scope, project_id.as_deref())?;
        let metadata = merge_metadata(&input.metadata, input.tier, input.scope, project_id.as_deref());

        Ok(PreparedMemory {
            content: input.content.clone(),
            tier: input.tier,
            scope: input.scope,
            tags: normalize_tags(&input.tags),
            project_id,
            metadata,
            content_size,
        })
    }

    /// Run the write-path checks without storing anything
    pub fn validate_input(&self, input: &StoreMemoryInput) -> Result<()> {
        self.prepare(input).map(|_| ())
    }

    /// Store a new memory and return its id
    pub fn store(&self, input: StoreMemoryInput) -> Result<MemoryId> {
        let prepared = self.prepare(&input)?;
        let now = Utc::now();
        let content_hash = compute_content_hash(&prepared.content);

        let memory = self.storage.with_transaction(|conn| {
            for _ in 0..MAX_ID_ATTEMPTS {
                let id = generate_memory_id(prepared.tier, prepared.scope, now);
                if queries::memory_exists(conn, &id)? {
                    tracing::debug!(%id, "memory id collision, drawing again");
                    continue;
                }
                let memory = Memory {
                    id,
                    content: prepared.content.clone(),
                    tier: prepared.tier,
                    scope: prepared.scope,
                    project_id: prepared.project_id.clone(),
                    tags: prepared.tags.clone(),
                    metadata: prepared.metadata.clone(),
                    content_size: prepared.content_size,
                    content_hash: content_hash.clone(),
                    created_at: now,
                    accessed_at: now,
                    access_count: 0,
                };
                queries::insert_memory(conn, &memory)?;
                return Ok(memory);
            }
            Err(UnimemError::Internal(format!(
                "no free memory id after {} attempts",
                MAX_ID_ATTEMPTS
            )))
        })?;

        tracing::info!(
            id = %memory.id,
            tier = %memory.tier,
            scope = %memory.scope,
            project_id = memory.project_id.as_deref().unwrap_or(""),
            bytes = memory.content_size,
            "memory stored"
        );
        Ok(memory.id)
    }

    /// Fetch one memory, counting it as a read hit
    pub fn get(&self, id: &str) -> Result<Option<Memory>> {
        let now = Utc::now();
        self.storage.with_transaction(|conn| {
            let touched = queries::touch_memories(conn, &[id.to_string()], now)?;
            if touched.is_empty() {
                return Ok(None);
            }
            queries::get_memory(conn, id)
        })
    }

    /// Replace a memory's content, re-checking its tier ceiling
    pub fn update_content(&self, id: &str, content: &str) -> Result<UpdateResult> {
        self.storage.with_record_lock(id, || {
            self.storage.with_transaction(|conn| {
                let Some(current) = queries::get_memory(conn, id)? else {
                    return Ok(UpdateResult {
                        updated: false,
                        content_size: None,
                        message: format!("Memory {} not found", id),
                    });
                };

                let size = validate_placement(
                    content,
                    current.tier,
                    current.scope,
                    current.project_id.as_deref(),
                )?;
                queries::update_content(conn, id, content, size, &compute_content_hash(content))?;
                tracing::info!(id, bytes = size, "memory content updated");

                Ok(UpdateResult {
                    updated: true,
                    content_size: Some(size),
                    message: format!("Memory {} updated", id),
                })
            })
        })
    }

    /// Delete a memory, optionally with its near-duplicates
    ///
    /// Cascade candidates share tier, scope and project with the deleted
    /// record and meet the configured duplicate threshold. Each is deleted
    /// under its own lock after the original's lock is released.
    pub fn delete(&self, id: &str, cascade: bool) -> Result<DeleteResult> {
        let Some(removed) = self.delete_one(id)? else {
            return Ok(DeleteResult {
                deleted: false,
                related_deleted: 0,
                message: format!("Memory {} not found", id),
            });
        };

        let mut related_deleted = 0;
        if cascade {
            let candidates = self.storage.with_reader(|conn| {
                queries::query_memories(conn, &MemoryFilter::neighborhood_of(&removed))
            })?;
            let related = find_duplicates(
                &removed.content,
                candidates,
                self.config().duplicate_threshold,
                &CancellationFlag::new(),
            )?;
            for candidate in related {
                match self.delete_one(&candidate.memory.id) {
                    Ok(Some(_)) => related_deleted += 1,
                    Ok(None) => {}
                    Err(e) => {
                        tracing::error!(
                            id,
                            related = %candidate.memory.id,
                            related_deleted,
                            error = %e,
                            "cascade delete stopped after removing the original"
                        );
                        return Err(e);
                    }
                }
            }
        }

        tracing::info!(id, cascade, related_deleted, "memory deleted");
        let message = if related_deleted > 0 {
            format!(
                "Memory {} deleted along with {} related memories",
                id, related_deleted
            )
        } else {
            format!("Memory {} deleted", id)
        };
        Ok(DeleteResult {
            deleted: true,
            related_deleted,
            message,
        })
    }

    fn delete_one(&self, id: &str) -> Result<Option<Memory>> {
        self.storage.with_record_lock(id, || {
            self.storage.with_transaction(|conn| {
                let Some(memory) = queries::get_memory(conn, id)? else {
                    return Ok(None);
                };
                queries::delete_memory(conn, id)?;
                Ok(Some(memory))
            })
        })
    }

    /// Ranked lexical search; every returned record counts one read hit
    pub fn search(&self, query: &str, options: &SearchOptions) -> Result<Vec<SearchResult>> {
        self.storage.ensure_open()?;
        let terms = QueryTerms::new(query);
        if terms.is_empty() {
            return Ok(Vec::new());
        }
        let filter = resolve_filter(options);
        let limit = options.limit.unwrap_or(self.config().search_limit);
        let required_tags: Vec<String> = options
            .tags
            .as_deref()
            .map(normalize_tags)
            .unwrap_or_default()
            .into_iter()
            .map(|t| t.to_lowercase())
            .collect();

        let mut results = self.storage.with_reader(|conn| {
            let mut hits = Vec::new();
            queries::for_each_memory(conn, &filter, |memory| {
                if !has_all_tags(&memory, &required_tags) {
                    return Ok(());
                }
                if let Some(relevance) = score_memory(&terms, &memory) {
                    hits.push(SearchResult {
                        memory,
                        score: relevance.score,
                        match_type: relevance.match_type,
                        matched_terms: relevance.matched_terms,
                    });
                }
                Ok(())
            })?;
            Ok(hits)
        })?;

        results.sort_by(compare_results);
        results.truncate(limit);
        if results.is_empty() {
            return Ok(results);
        }

        // Deleted between scan and touch: drop rather than resurrect
        let now = Utc::now();
        let ids: Vec<String> = results.iter().map(|r| r.memory.id.clone()).collect();
        let touched: HashMap<String, i64> = self
            .storage
            .with_transaction(|conn| queries::touch_memories(conn, &ids, now))?
            .into_iter()
            .collect();

        results.retain_mut(|result| match touched.get(&result.memory.id) {
            Some(&count) => {
                result.memory.access_count = count;
                result.memory.accessed_at = now;
                true
            }
            None => false,
        });

        tracing::debug!(query, hits = results.len(), "search complete");
        Ok(results)
    }

    /// Find stored memories similar to `content`
    pub fn check_duplicate(&self, content: &str, query: &DuplicateQuery) -> Result<DuplicateReport> {
        self.check_duplicate_with(content, query, &CancellationFlag::new())
    }

    /// [`check_duplicate`](Self::check_duplicate) that stops once `cancel` is raised
    pub fn check_duplicate_with(
        &self,
        content: &str,
        query: &DuplicateQuery,
        cancel: &CancellationFlag,
    ) -> Result<DuplicateReport> {
        self.storage.ensure_open()?;
        let threshold = query.threshold.unwrap_or(self.config().duplicate_threshold);
        if !(0.0..=1.0).contains(&threshold) {
            return Err(UnimemError::validation(format!(
                "Threshold must be between 0 and 1, got {}",
                threshold
            )));
        }

        let filter = MemoryFilter {
            tier: query.tier,
            scope: query.scope,
            project_id: normalize_project_id(query.project_id.as_deref()),
        };
        let candidates = self.storage.with_reader(|conn| {
            let mut candidates = Vec::new();
            queries::for_each_memory(conn, &filter, |memory| {
                cancel.check()?;
                candidates.push(memory);
                Ok(())
            })?;
            Ok(candidates)
        })?;

        let matches = find_duplicates(content, candidates, threshold, cancel)?;
        Ok(build_report(matches))
    }

    /// Move a memory between tiers
    pub fn migrate_tier(
        &self,
        id: &str,
        to_tier: MemoryTier,
        reason: Option<&str>,
    ) -> Result<TierMigrationResult> {
        migration::migrate_tier(&self.storage, id, to_tier, reason)
    }

    pub fn get_stats(&self) -> Result<StoreStats> {
        self.storage.with_reader(queries::get_stats)
    }

    pub fn get_analytics(&self) -> Result<Analytics> {
        self.get_analytics_with(&CancellationFlag::new())
    }

    pub fn get_analytics_with(&self, cancel: &CancellationFlag) -> Result<Analytics> {
        analytics::get_analytics(&self.storage, cancel)
    }

    fn legacy_store(&self) -> Option<LegacyStore> {
        self.config()
            .legacy_db_path
            .as_deref()
            .map(|p| LegacyStore::new(shellexpand::tilde(p).into_owned()))
    }

    /// Directory that receives pre-migration snapshots
    pub fn backup_root(&self) -> Result<PathBuf> {
        if let Some(ref dir) = self.config().backup_dir {
            return Ok(PathBuf::from(shellexpand::tilde(dir).into_owned()));
        }
        if self.config().is_in_memory() {
            return Err(UnimemError::Config(
                "backup_dir is required when the store is in memory".to_string(),
            ));
        }
        let db_path = PathBuf::from(self.storage.db_path());
        let parent = db_path
            .parent()
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from("."));
        Ok(parent.join("backups"))
    }

    /// Import the configured legacy store
    pub fn migrate_legacy(&self, options: &LegacyMigrationOptions) -> Result<LegacyMigrationResult> {
        self.storage.ensure_open()?;
        let Some(legacy) = self.legacy_store() else {
            return Ok(LegacyMigrationResult {
                success: true,
                dry_run: options.dry_run,
                message: "No legacy store configured; nothing to migrate".to_string(),
                ..Default::default()
            });
        };
        // Nothing to snapshot when the legacy store is empty
        let backup_root = if legacy.count()? > 0 {
            self.backup_root()?
        } else {
            PathBuf::new()
        };
        migration::legacy::migrate_legacy(self, &legacy, &backup_root, options)
    }

    pub fn migration_status(&self) -> Result<MigrationStatus> {
        self.storage.ensure_open()?;
        migration::legacy::migration_status(self, self.legacy_store().as_ref())
    }
}

fn has_all_tags(memory: &Memory, required: &[String]) -> bool {
    required
        .iter()
        .all(|tag| memory.tags.iter().any(|t| t.to_lowercase() == *tag))
}
