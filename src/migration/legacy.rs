//! Import from the legacy layer-model store
//!
//! The legacy store kept one flat `memories` table classified by `layer`
//! (preference, system, project, prompt). Each layer maps to a fixed
//! tier/scope pair. Records go through [`MemoryStore::store`] so every
//! invariant applies; the only reclassification is [`demote_if_oversized`].

use chrono::{DateTime, Utc};
use rusqlite::{types::Value as SqlValue, Connection, OpenFlags, OptionalExtension};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};

use super::backup::create_migration_backup;
use crate::error::Result;
use crate::invariants::normalize_project_id;
use crate::storage::queries::{self, MigrationRun};
use crate::store::MemoryStore;
use crate::types::{MemoryScope, MemoryTier, StoreMemoryInput, CORE_SIZE_LIMIT_BYTES};

/// Map a legacy layer to its tier/scope pair
///
/// | layer             | tier     | scope   |
/// |-------------------|----------|---------|
/// | preference/system | core     | global  |
/// | project/prompt    | longterm | project |
/// | anything else     | longterm | global  |
pub fn map_legacy_layer(layer: &str) -> (MemoryTier, MemoryScope) {
    match layer.trim().to_lowercase().as_str() {
        "preference" | "system" => (MemoryTier::Core, MemoryScope::Global),
        "project" | "prompt" => (MemoryTier::Longterm, MemoryScope::Project),
        _ => (MemoryTier::Longterm, MemoryScope::Global),
    }
}

/// Legacy records predate the core ceiling, so an oversized core record is
/// moved to longterm instead of being rejected. Returns the tier to use and
/// whether it changed.
pub fn demote_if_oversized(tier: MemoryTier, content_size: usize) -> (MemoryTier, bool) {
    if tier == MemoryTier::Core && content_size > CORE_SIZE_LIMIT_BYTES {
        (MemoryTier::Longterm, true)
    } else {
        (tier, false)
    }
}

/// One row of the legacy store
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LegacyMemory {
    pub id: String,
    pub content: String,
    pub layer: String,
    pub tags: Vec<String>,
    pub created_at: Option<String>,
    pub accessed_at: Option<String>,
    pub access_count: i64,
    pub metadata: HashMap<String, Value>,
}

impl LegacyMemory {
    /// Project id recorded by the legacy tooling, if any
    pub fn recorded_project_id(&self) -> Option<String> {
        ["project_id", "project_path", "project"]
            .iter()
            .filter_map(|key| self.metadata.get(*key).and_then(Value::as_str))
            .find_map(|p| normalize_project_id(Some(p)))
    }
}

/// Read-only handle on a legacy database file
#[derive(Debug, Clone)]
pub struct LegacyStore {
    path: PathBuf,
}

impl LegacyStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn open(&self) -> Result<Option<Connection>> {
        if !self.path.is_file() {
            return Ok(None);
        }
        let conn = Connection::open_with_flags(
            &self.path,
            OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_NO_MUTEX,
        )?;
        let has_table: Option<i64> = conn
            .query_row(
                "SELECT 1 FROM sqlite_master WHERE type = 'table' AND name = 'memories'",
                [],
                |row| row.get(0),
            )
            .optional()?;
        Ok(has_table.map(|_| conn))
    }

    /// Number of legacy records; 0 when the file or table is absent
    pub fn count(&self) -> Result<i64> {
        match self.open()? {
            Some(conn) => Ok(conn.query_row("SELECT COUNT(*) FROM memories", [], |row| row.get(0))?),
            None => Ok(0),
        }
    }

    /// Load every record in id order
    ///
    /// Malformed rows come back as `Err` entries so one bad row cannot hide
    /// the rest.
    pub fn load(&self) -> Result<Vec<std::result::Result<LegacyMemory, (String, String)>>> {
        let Some(conn) = self.open()? else {
            return Ok(Vec::new());
        };

        let mut stmt = conn.prepare(
            "SELECT id, content, layer, tags, created_at, accessed_at, access_count, metadata
             FROM memories ORDER BY rowid",
        )?;
        // Columns are read untyped; legacy files disagree on column affinity
        let rows = stmt.query_map([], |row| {
            Ok(RawLegacyRow {
                id: row.get(0)?,
                content: row.get(1)?,
                layer: row.get(2)?,
                tags: row.get(3)?,
                created_at: row.get(4)?,
                accessed_at: row.get(5)?,
                access_count: row.get(6)?,
                metadata: row.get(7)?,
            })
        })?;

        let mut out = Vec::new();
        for (index, row) in rows.enumerate() {
            match row {
                Ok(raw) => out.push(raw.parse()),
                Err(e) => out.push(Err((format!("row {}", index + 1), e.to_string()))),
            }
        }
        Ok(out)
    }
}

struct RawLegacyRow {
    id: SqlValue,
    content: SqlValue,
    layer: SqlValue,
    tags: SqlValue,
    created_at: SqlValue,
    accessed_at: SqlValue,
    access_count: SqlValue,
    metadata: SqlValue,
}

/// Epoch values above this are taken as milliseconds
const EPOCH_MILLIS_THRESHOLD: i64 = 100_000_000_000;

fn text_column(value: SqlValue, column: &str) -> std::result::Result<Option<String>, String> {
    match value {
        SqlValue::Null => Ok(None),
        SqlValue::Text(s) => Ok(Some(s)),
        SqlValue::Blob(bytes) => String::from_utf8(bytes)
            .map(Some)
            .map_err(|_| format!("{} is a non-UTF-8 blob", column)),
        SqlValue::Integer(_) | SqlValue::Real(_) => Err(format!("{} is not text", column)),
    }
}

fn timestamp_column(value: SqlValue, column: &str) -> std::result::Result<Option<String>, String> {
    let parsed = match value {
        SqlValue::Null => return Ok(None),
        SqlValue::Text(s) => return Ok(Some(s)),
        SqlValue::Integer(n) if n.abs() >= EPOCH_MILLIS_THRESHOLD => DateTime::from_timestamp_millis(n),
        SqlValue::Integer(n) => DateTime::from_timestamp(n, 0),
        SqlValue::Real(f) if f.is_finite() => {
            DateTime::from_timestamp(f.trunc() as i64, (f.fract().abs() * 1e9) as u32)
        }
        SqlValue::Real(_) => None,
        SqlValue::Blob(_) => return Err(format!("{} is a blob", column)),
    };
    parsed
        .map(|at| Some(at.to_rfc3339()))
        .ok_or_else(|| format!("{} is out of range", column))
}

fn count_column(value: SqlValue) -> std::result::Result<i64, String> {
    match value {
        SqlValue::Null => Ok(0),
        SqlValue::Integer(n) => Ok(n),
        SqlValue::Real(f) => Ok(f as i64),
        SqlValue::Text(s) if s.trim().is_empty() => Ok(0),
        SqlValue::Text(s) => s
            .trim()
            .parse()
            .map_err(|_| format!("access_count {:?} is not a number", s)),
        SqlValue::Blob(_) => Err("access_count is a blob".to_string()),
    }
}

impl RawLegacyRow {
    fn parse(self) -> std::result::Result<LegacyMemory, (String, String)> {
        let id = match self.id {
            SqlValue::Integer(i) => i.to_string(),
            SqlValue::Text(s) => s,
            SqlValue::Real(f) => f.to_string(),
            _ => String::from("?"),
        };
        let fail = |msg: String| (id.clone(), msg);

        let content = text_column(self.content, "content").map_err(fail)?;
        let layer = text_column(self.layer, "layer").map_err(fail)?;
        let created_at = timestamp_column(self.created_at, "created_at").map_err(fail)?;
        let accessed_at = timestamp_column(self.accessed_at, "accessed_at").map_err(fail)?;
        let access_count = count_column(self.access_count).map_err(fail)?;

        let raw_tags = text_column(self.tags, "tags").map_err(fail)?;
        let tags = match raw_tags.as_deref().map(str::trim) {
            None | Some("") => Vec::new(),
            Some(raw) if raw.starts_with('[') => serde_json::from_str(raw)
                .map_err(|e| fail(format!("invalid tags: {}", e)))?,
            // Older rows stored tags comma-separated
            Some(raw) => raw.split(',').map(|t| t.trim().to_string()).collect(),
        };

        let raw_metadata = text_column(self.metadata, "metadata").map_err(fail)?;
        let metadata = match raw_metadata.as_deref().map(str::trim) {
            None | Some("") => HashMap::new(),
            Some(raw) => serde_json::from_str(raw)
                .map_err(|e| fail(format!("invalid metadata: {}", e)))?,
        };

        Ok(LegacyMemory {
            id,
            content: content.unwrap_or_default(),
            layer: layer.unwrap_or_default(),
            tags,
            created_at,
            accessed_at,
            access_count,
            metadata,
        })
    }
}

/// Options for a legacy import
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LegacyMigrationOptions {
    /// Project for records whose layer resolves to project scope
    pub project_id: Option<String>,
    /// Resolve and validate every record without writing anything
    #[serde(default)]
    pub dry_run: bool,
}

/// Batch outcome of a legacy import
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LegacyMigrationResult {
    pub success: bool,
    pub migrated_count: usize,
    pub skipped_count: usize,
    pub error_count: usize,
    pub demoted_count: usize,
    pub errors: Vec<String>,
    pub backup_path: Option<String>,
    pub dry_run: bool,
    pub message: String,
}

/// Whether an import is due, with advice
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MigrationStatus {
    pub legacy_exists: bool,
    pub legacy_count: i64,
    pub unified_count: i64,
    pub needs_migration: bool,
    pub last_run: Option<MigrationRun>,
    pub recommendations: Vec<String>,
}

enum RecordOutcome {
    Migrated { demoted: bool },
    Skipped(&'static str),
}

/// Import every legacy record into `store`
///
/// No legacy data is a successful no-op. Otherwise both databases are
/// snapshotted under `backup_root` first; a failed snapshot aborts before
/// any record is written.
pub fn migrate_legacy(
    store: &MemoryStore,
    legacy: &LegacyStore,
    backup_root: &Path,
    options: &LegacyMigrationOptions,
) -> Result<LegacyMigrationResult> {
    store.storage().ensure_open()?;
    let started_at = Utc::now();
    let mut result = LegacyMigrationResult {
        dry_run: options.dry_run,
        ..Default::default()
    };

    if legacy.count()? == 0 {
        result.success = true;
        result.message = "No legacy data found; nothing to migrate".to_string();
        return Ok(result);
    }

    if !options.dry_run {
        let backup = create_migration_backup(store.storage(), legacy.path(), backup_root, started_at)?;
        result.backup_path = Some(backup.dir.display().to_string());
    }

    let caller_project = normalize_project_id(options.project_id.as_deref());
    let mut imported = store
        .storage()
        .with_reader(queries::imported_original_ids)?;
    for record in legacy.load()? {
        let record = match record {
            Ok(record) => record,
            Err((id, msg)) => {
                tracing::warn!(legacy_id = %id, error = %msg, "legacy record unreadable");
                result.error_count += 1;
                result.errors.push(format!("{}: {}", id, msg));
                continue;
            }
        };

        let outcome = import_record(
            store,
            &record,
            &mut imported,
            caller_project.as_deref(),
            options.dry_run,
        );
        match outcome {
            Ok(RecordOutcome::Migrated { demoted }) => {
                result.migrated_count += 1;
                if demoted {
                    result.demoted_count += 1;
                }
            }
            Ok(RecordOutcome::Skipped(reason)) => {
                tracing::debug!(legacy_id = %record.id, reason, "legacy record skipped");
                result.skipped_count += 1;
            }
            Err(e) => {
                tracing::warn!(legacy_id = %record.id, error = %e, "legacy record failed");
                result.error_count += 1;
                result.errors.push(format!("{}: {}", record.id, e));
            }
        }
    }

    result.success = result.error_count == 0 || result.migrated_count > 0;
    result.message = format!(
        "{}{} migrated, {} skipped, {} failed ({} demoted to longterm)",
        if options.dry_run { "Dry run: " } else { "" },
        result.migrated_count,
        result.skipped_count,
        result.error_count,
        result.demoted_count
    );

    if !options.dry_run {
        let run = MigrationRun {
            started_at: queries::format_timestamp(started_at),
            finished_at: queries::format_timestamp(Utc::now()),
            backup_path: result.backup_path.clone(),
            migrated_count: result.migrated_count as i64,
            skipped_count: result.skipped_count as i64,
            error_count: result.error_count as i64,
            demoted_count: result.demoted_count as i64,
            success: result.success,
        };
        store
            .storage()
            .with_connection(|conn| queries::record_migration_run(conn, &run))?;
    }

    tracing::info!(
        migrated = result.migrated_count,
        skipped = result.skipped_count,
        errors = result.error_count,
        demoted = result.demoted_count,
        dry_run = options.dry_run,
        "legacy migration finished"
    );
    Ok(result)
}

fn import_record(
    store: &MemoryStore,
    record: &LegacyMemory,
    imported: &mut HashSet<String>,
    caller_project: Option<&str>,
    dry_run: bool,
) -> Result<RecordOutcome> {
    if record.content.trim().is_empty() {
        return Ok(RecordOutcome::Skipped("empty content"));
    }
    if imported.contains(&record.id) {
        return Ok(RecordOutcome::Skipped("already migrated"));
    }

    let (mapped_tier, scope) = map_legacy_layer(&record.layer);
    let (tier, demoted) = demote_if_oversized(mapped_tier, record.content.len());
    if demoted {
        tracing::warn!(
            legacy_id = %record.id,
            bytes = record.content.len(),
            "oversized legacy core record demoted to longterm"
        );
    }

    let project_id = match scope {
        MemoryScope::Project => caller_project
            .map(String::from)
            .or_else(|| record.recorded_project_id()),
        MemoryScope::Global => None,
    };

    let mut input = StoreMemoryInput::new(record.content.clone(), tier, scope)
        .with_tags(record.tags.clone());
    input.project_id = project_id;
    input.metadata = provenance(record, demoted);

    if dry_run {
        store.validate_input(&input)?;
    } else {
        let id = store.store(input)?;
        tracing::debug!(legacy_id = %record.id, %id, %tier, %scope, "legacy record migrated");
    }
    imported.insert(record.id.clone());
    Ok(RecordOutcome::Migrated { demoted })
}

/// Original metadata plus provenance keys
fn provenance(record: &LegacyMemory, demoted: bool) -> HashMap<String, Value> {
    let mut metadata = record.metadata.clone();
    metadata.insert(
        "migrated_from".to_string(),
        Value::from(format!("legacy_{}", record.layer.trim().to_lowercase())),
    );
    metadata.insert("migration_date".to_string(), Value::from(Utc::now().to_rfc3339()));
    metadata.insert("original_id".to_string(), Value::from(record.id.clone()));
    metadata.insert("original_layer".to_string(), Value::from(record.layer.clone()));
    if let Some(ref created_at) = record.created_at {
        metadata.insert("original_created_at".to_string(), Value::from(created_at.clone()));
    }
    metadata.insert(
        "original_access_count".to_string(),
        Value::from(record.access_count),
    );
    if demoted {
        metadata.insert("auto_demoted".to_string(), Value::Bool(true));
    }
    metadata
}

/// Report whether a legacy import is due
pub fn migration_status(store: &MemoryStore, legacy: Option<&LegacyStore>) -> Result<MigrationStatus> {
    store.storage().ensure_open()?;
    let legacy_count = match legacy {
        Some(legacy) => legacy.count()?,
        None => 0,
    };
    let legacy_exists = legacy_count > 0;
    let (unified_count, last_run) = store.storage().with_reader(|conn| {
        Ok((
            queries::count_memories(conn)?,
            queries::last_migration_run(conn)?,
        ))
    })?;
    let needs_migration = legacy_exists && unified_count == 0;

    let mut recommendations = Vec::new();
    if needs_migration {
        recommendations.push(format!(
            "Run migrate-legacy to import {} legacy memories into the unified store",
            legacy_count
        ));
        recommendations.push(
            "Both stores are snapshotted before the first record is written".to_string(),
        );
        recommendations.push("Use --dry-run first to preview skipped and failing records".to_string());
    } else if legacy_exists {
        recommendations.push(format!(
            "Unified store already holds {} memories; re-running skips records imported before",
            unified_count
        ));
        recommendations.push("Archive the legacy database once the import is verified".to_string());
    } else {
        recommendations.push("No legacy data found; no migration required".to_string());
    }

    Ok(MigrationStatus {
        legacy_exists,
        legacy_count,
        unified_count,
        needs_migration,
        last_run,
        recommendations,
    })
}
