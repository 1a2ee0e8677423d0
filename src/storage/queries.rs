//! Database queries for memory operations
//!
//! Free functions over a borrowed [`Connection`]; callers choose the
//! connection (writer, transaction or pooled reader) through [`Storage`].
//!
//! [`Storage`]: super::Storage

use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::{params, types::Type, Connection, OptionalExtension, Row, ToSql};
use std::collections::{HashMap, HashSet};

use crate::error::Result;
use crate::types::*;

const MEMORY_COLUMNS: &str = "id, content, tier, scope, project_id, tags, metadata,
    content_size, content_hash, created_at, accessed_at, access_count";

/// Fixed-width RFC 3339 so stored timestamps sort lexically
pub fn format_timestamp(dt: DateTime<Utc>) -> String {
    dt.to_rfc3339_opts(SecondsFormat::Micros, true)
}

pub fn parse_timestamp(s: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .ok()
}

/// Stored text that no longer parses surfaces as a conversion error
fn parse_column<T, E>(
    row: &Row,
    column: &str,
    raw: &str,
    parse: impl FnOnce(&str) -> std::result::Result<T, E>,
) -> rusqlite::Result<T>
where
    E: std::error::Error + Send + Sync + 'static,
{
    parse(raw).map_err(|e| {
        let index = row.as_ref().column_index(column).unwrap_or(0);
        rusqlite::Error::FromSqlConversionFailure(index, Type::Text, Box::new(e))
    })
}

/// Parse a memory from a database row
pub fn memory_from_row(row: &Row) -> rusqlite::Result<Memory> {
    let tier_str: String = row.get("tier")?;
    let scope_str: String = row.get("scope")?;
    let tags_str: String = row.get("tags")?;
    let metadata_str: String = row.get("metadata")?;
    let created_at: String = row.get("created_at")?;
    let accessed_at: String = row.get("accessed_at")?;
    let content_size: i64 = row.get("content_size")?;

    let tier: MemoryTier = parse_column(row, "tier", &tier_str, |s| s.parse())?;
    let scope: MemoryScope = parse_column(row, "scope", &scope_str, |s| s.parse())?;
    let tags: Vec<String> = parse_column(row, "tags", &tags_str, |s| serde_json::from_str(s))?;
    let metadata: HashMap<String, serde_json::Value> =
        parse_column(row, "metadata", &metadata_str, |s| serde_json::from_str(s))?;

    let created_at = parse_timestamp(&created_at).unwrap_or_else(Utc::now);

    Ok(Memory {
        id: row.get("id")?,
        content: row.get("content")?,
        tier,
        scope,
        project_id: row.get("project_id")?,
        tags,
        metadata,
        content_size: content_size.max(0) as usize,
        content_hash: row.get("content_hash")?,
        created_at,
        accessed_at: parse_timestamp(&accessed_at).unwrap_or(created_at),
        access_count: row.get("access_count")?,
    })
}

/// Tier/scope/project restriction for candidate queries
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MemoryFilter {
    pub tier: Option<MemoryTier>,
    pub scope: Option<MemoryScope>,
    pub project_id: Option<String>,
}

impl MemoryFilter {
    /// Same tier, scope and project as `memory`
    pub fn neighborhood_of(memory: &Memory) -> Self {
        Self {
            tier: Some(memory.tier),
            scope: Some(memory.scope),
            project_id: memory.project_id.clone(),
        }
    }

    fn where_clause(&self) -> (String, Vec<Box<dyn ToSql>>) {
        let mut conditions: Vec<&str> = Vec::new();
        let mut values: Vec<Box<dyn ToSql>> = Vec::new();

        if let Some(tier) = self.tier {
            conditions.push("tier = ?");
            values.push(Box::new(tier.as_str()));
        }
        if let Some(scope) = self.scope {
            conditions.push("scope = ?");
            values.push(Box::new(scope.as_str()));
        }
        if let Some(ref project_id) = self.project_id {
            conditions.push("project_id = ?");
            values.push(Box::new(project_id.clone()));
        }

        if conditions.is_empty() {
            (String::new(), values)
        } else {
            (format!(" WHERE {}", conditions.join(" AND ")), values)
        }
    }
}

/// Insert a fully built memory row
pub fn insert_memory(conn: &Connection, memory: &Memory) -> Result<()> {
    let tags_json = serde_json::to_string(&memory.tags)?;
    let metadata_json = serde_json::to_string(&memory.metadata)?;

    conn.execute(
        "INSERT INTO memories (id, content, tier, scope, project_id, tags, metadata,
                               content_size, content_hash, created_at, accessed_at, access_count)
         VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        params![
            memory.id,
            memory.content,
            memory.tier.as_str(),
            memory.scope.as_str(),
            memory.project_id,
            tags_json,
            metadata_json,
            memory.content_size as i64,
            memory.content_hash,
            format_timestamp(memory.created_at),
            format_timestamp(memory.accessed_at),
            memory.access_count,
        ],
    )?;

    Ok(())
}

/// Check whether an id is already taken
pub fn memory_exists(conn: &Connection, id: &str) -> Result<bool> {
    let found: Option<i64> = conn
        .query_row("SELECT 1 FROM memories WHERE id = ?", [id], |row| row.get(0))
        .optional()?;
    Ok(found.is_some())
}

/// Get a memory by id without touching access statistics
pub fn get_memory(conn: &Connection, id: &str) -> Result<Option<Memory>> {
    let sql = format!("SELECT {} FROM memories WHERE id = ?", MEMORY_COLUMNS);
    let mut stmt = conn.prepare_cached(&sql)?;
    Ok(stmt.query_row([id], memory_from_row).optional()?)
}

/// Record one read hit per id
///
/// Returns `(id, access_count)` for the ids that still existed, with the
/// count as persisted by the increment.
pub fn touch_memories(
    conn: &Connection,
    ids: &[String],
    now: DateTime<Utc>,
) -> Result<Vec<(String, i64)>> {
    let now_str = format_timestamp(now);
    let mut stmt = conn.prepare_cached(
        "UPDATE memories SET access_count = access_count + 1, accessed_at = ?
         WHERE id = ?
         RETURNING access_count",
    )?;

    let mut touched = Vec::with_capacity(ids.len());
    for id in ids {
        let count: Option<i64> = stmt
            .query_row(params![now_str, id], |row| row.get(0))
            .optional()?;
        if let Some(count) = count {
            touched.push((id.clone(), count));
        }
    }
    Ok(touched)
}

/// Legacy ids already imported, read once per import run
pub fn imported_original_ids(conn: &Connection) -> Result<HashSet<String>> {
    let mut stmt = conn.prepare(
        "SELECT json_extract(metadata, '$.original_id') FROM memories
         WHERE json_extract(metadata, '$.original_id') IS NOT NULL",
    )?;
    let ids = stmt
        .query_map([], |row| {
            let value: rusqlite::types::Value = row.get(0)?;
            Ok(match value {
                rusqlite::types::Value::Text(s) => Some(s),
                rusqlite::types::Value::Integer(i) => Some(i.to_string()),
                _ => None,
            })
        })?
        .filter_map(|id| id.transpose())
        .collect::<rusqlite::Result<HashSet<_>>>()?;
    Ok(ids)
}

/// Delete a memory; returns false if it did not exist
pub fn delete_memory(conn: &Connection, id: &str) -> Result<bool> {
    let affected = conn.execute("DELETE FROM memories WHERE id = ?", [id])?;
    Ok(affected > 0)
}

/// Change tier and metadata in place
pub fn update_tier(
    conn: &Connection,
    id: &str,
    tier: MemoryTier,
    metadata: &HashMap<String, serde_json::Value>,
) -> Result<bool> {
    let metadata_json = serde_json::to_string(metadata)?;
    let affected = conn.execute(
        "UPDATE memories SET tier = ?, metadata = ? WHERE id = ?",
        params![tier.as_str(), metadata_json, id],
    )?;
    Ok(affected > 0)
}

/// Replace content and its derived size/hash
pub fn update_content(
    conn: &Connection,
    id: &str,
    content: &str,
    content_size: usize,
    content_hash: &str,
) -> Result<bool> {
    let affected = conn.execute(
        "UPDATE memories SET content = ?, content_size = ?, content_hash = ? WHERE id = ?",
        params![content, content_size as i64, content_hash, id],
    )?;
    Ok(affected > 0)
}

/// Stream memories matching `filter`, newest first, one row at a time
pub fn for_each_memory<F>(conn: &Connection, filter: &MemoryFilter, mut f: F) -> Result<()>
where
    F: FnMut(Memory) -> Result<()>,
{
    let (where_clause, values) = filter.where_clause();
    let sql = format!(
        "SELECT {} FROM memories{} ORDER BY created_at DESC, id DESC",
        MEMORY_COLUMNS, where_clause
    );
    let mut stmt = conn.prepare_cached(&sql)?;
    let params: Vec<&dyn ToSql> = values.iter().map(|b| b.as_ref()).collect();
    let mut rows = stmt.query(params.as_slice())?;

    while let Some(row) = rows.next()? {
        f(memory_from_row(row)?)?;
    }
    Ok(())
}

/// Collect memories matching `filter`, newest first
pub fn query_memories(conn: &Connection, filter: &MemoryFilter) -> Result<Vec<Memory>> {
    let mut out = Vec::new();
    for_each_memory(conn, filter, |memory| {
        out.push(memory);
        Ok(())
    })?;
    Ok(out)
}

/// Total number of stored memories
pub fn count_memories(conn: &Connection) -> Result<i64> {
    Ok(conn.query_row("SELECT COUNT(*) FROM memories", [], |row| row.get(0))?)
}

/// Aggregate counts and byte totals
pub fn get_stats(conn: &Connection) -> Result<StoreStats> {
    let mut stmt = conn.prepare_cached(
        "SELECT tier, scope, COUNT(*), COALESCE(SUM(content_size), 0)
         FROM memories
         GROUP BY tier, scope",
    )?;

    let rows = stmt.query_map([], |row| {
        Ok((
            row.get::<_, String>(0)?,
            row.get::<_, String>(1)?,
            row.get::<_, i64>(2)?,
            row.get::<_, i64>(3)?,
        ))
    })?;

    let mut stats = StoreStats::default();
    for row in rows {
        let (tier_str, scope_str, count, bytes) = row?;
        let tier: MemoryTier = tier_str.parse()?;
        let scope: MemoryScope = scope_str.parse()?;

        stats.total_memories += count;
        stats.total_bytes += bytes;
        stats.tier_counts.add(tier, count);
        stats.scope_counts.add(scope, count);
        if tier == MemoryTier::Core {
            stats.core_bytes += bytes;
        }
    }

    stats.core_utilization = if stats.tier_counts.core > 0 {
        stats.core_bytes as f64 / (stats.tier_counts.core as f64 * CORE_SIZE_LIMIT_BYTES as f64)
    } else {
        0.0
    };

    Ok(stats)
}

/// Summary of one legacy import run
#[derive(Debug, Clone, Default, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct MigrationRun {
    pub started_at: String,
    pub finished_at: String,
    pub backup_path: Option<String>,
    pub migrated_count: i64,
    pub skipped_count: i64,
    pub error_count: i64,
    pub demoted_count: i64,
    pub success: bool,
}

pub fn record_migration_run(conn: &Connection, run: &MigrationRun) -> Result<i64> {
    conn.execute(
        "INSERT INTO migration_runs (started_at, finished_at, backup_path, migrated_count,
                                     skipped_count, error_count, demoted_count, success)
         VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
        params![
            run.started_at,
            run.finished_at,
            run.backup_path,
            run.migrated_count,
            run.skipped_count,
            run.error_count,
            run.demoted_count,
            run.success,
        ],
    )?;
    Ok(conn.last_insert_rowid())
}

pub fn last_migration_run(conn: &Connection) -> Result<Option<MigrationRun>> {
    let run = conn
        .query_row(
            "SELECT started_at, finished_at, backup_path, migrated_count, skipped_count,
                    error_count, demoted_count, success
             FROM migration_runs ORDER BY id DESC LIMIT 1",
            [],
            |row| {
                Ok(MigrationRun {
                    started_at: row.get(0)?,
                    finished_at: row.get(1)?,
                    backup_path: row.get(2)?,
                    migrated_count: row.get(3)?,
                    skipped_count: row.get(4)?,
                    error_count: row.get(5)?,
                    demoted_count: row.get(6)?,
                    success: row.get(7)?,
                })
            },
        )
        .optional()?;
    Ok(run)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::invariants::compute_content_hash;
    use crate::storage::Storage;

    fn sample(id: &str, tier: MemoryTier, scope: MemoryScope, project: Option<&str>) -> Memory {
        let now = Utc::now();
        let content = format!("content of {}", id);
        Memory {
            id: id.to_string(),
            content_size: content.len(),
            content_hash: compute_content_hash(&content),
            content,
            tier,
            scope,
            project_id: project.map(String::from),
            tags: vec!["b".to_string(), "a".to_string()],
            metadata: HashMap::new(),
            created_at: now,
            accessed_at: now,
            access_count: 0,
        }
    }

    #[test]
    fn test_insert_and_get_preserves_tag_order() {
        let storage = Storage::open_in_memory().unwrap();
        storage
            .with_connection(|conn| {
                let memory = sample("m1", MemoryTier::Core, MemoryScope::Global, None);
                insert_memory(conn, &memory)?;

                let loaded = get_memory(conn, "m1")?.unwrap();
                assert_eq!(loaded.tags, vec!["b", "a"]);
                assert_eq!(loaded.tier, MemoryTier::Core);
                assert_eq!(loaded.content_size, memory.content_size);
                assert!(get_memory(conn, "missing")?.is_none());
                Ok(())
            })
            .unwrap();
    }

    #[test]
    fn test_filter_by_tier_scope_and_project() {
        let storage = Storage::open_in_memory().unwrap();
        storage
            .with_connection(|conn| {
                insert_memory(conn, &sample("a", MemoryTier::Core, MemoryScope::Global, None))?;
                insert_memory(
                    conn,
                    &sample("b", MemoryTier::Longterm, MemoryScope::Project, Some("/p/one")),
                )?;
                insert_memory(
                    conn,
                    &sample("c", MemoryTier::Longterm, MemoryScope::Project, Some("/p/two")),
                )?;

                let all = query_memories(conn, &MemoryFilter::default())?;
                assert_eq!(all.len(), 3);

                let project_one = query_memories(
                    conn,
                    &MemoryFilter {
                        project_id: Some("/p/one".to_string()),
                        ..Default::default()
                    },
                )?;
                assert_eq!(project_one.len(), 1);
                assert_eq!(project_one[0].id, "b");

                let core = query_memories(
                    conn,
                    &MemoryFilter {
                        tier: Some(MemoryTier::Core),
                        scope: Some(MemoryScope::Global),
                        project_id: None,
                    },
                )?;
                assert_eq!(core.len(), 1);
                Ok(())
            })
            .unwrap();
    }

    #[test]
    fn test_touch_skips_missing_rows() {
        let storage = Storage::open_in_memory().unwrap();
        storage
            .with_connection(|conn| {
                insert_memory(conn, &sample("a", MemoryTier::Core, MemoryScope::Global, None))?;
                let ids = vec!["a".to_string(), "gone".to_string()];
                let touched = touch_memories(conn, &ids, Utc::now())?;
                assert_eq!(touched, vec![("a".to_string(), 1)]);
                let touched = touch_memories(conn, &ids, Utc::now())?;
                assert_eq!(touched, vec![("a".to_string(), 2)]);
                assert_eq!(get_memory(conn, "a")?.unwrap().access_count, 2);
                Ok(())
            })
            .unwrap();
    }

    #[test]
    fn test_stats_core_utilization() {
        let storage = Storage::open_in_memory().unwrap();
        storage
            .with_connection(|conn| {
                let mut big = sample("a", MemoryTier::Core, MemoryScope::Global, None);
                big.content = "x".repeat(1024);
                big.content_size = 1024;
                insert_memory(conn, &big)?;
                insert_memory(
                    conn,
                    &sample("b", MemoryTier::Longterm, MemoryScope::Project, Some("/p")),
                )?;

                let stats = get_stats(conn)?;
                assert_eq!(stats.total_memories, 2);
                assert_eq!(stats.tier_counts.core, 1);
                assert_eq!(stats.scope_counts.project, 1);
                assert_eq!(stats.core_bytes, 1024);
                assert!((stats.core_utilization - 0.5).abs() < f64::EPSILON);
                Ok(())
            })
            .unwrap();
    }

    #[test]
    fn test_migration_run_round_trip() {
        let storage = Storage::open_in_memory().unwrap();
        storage
            .with_connection(|conn| {
                assert!(last_migration_run(conn)?.is_none());
                let run = MigrationRun {
                    started_at: "2026-01-01T00:00:00Z".to_string(),
                    finished_at: "2026-01-01T00:00:01Z".to_string(),
                    migrated_count: 3,
                    success: true,
                    ..Default::default()
                };
                record_migration_run(conn, &run)?;
                assert_eq!(last_migration_run(conn)?, Some(run));
                Ok(())
            })
            .unwrap();
    }

    #[test]
    fn test_corrupt_stored_json_is_an_error() {
        let storage = Storage::open_in_memory().unwrap();
        storage
            .with_connection(|conn| {
                insert_memory(conn, &sample("m1", MemoryTier::Core, MemoryScope::Global, None))?;
                conn.execute("UPDATE memories SET metadata = '{broken' WHERE id = 'm1'", [])?;
                assert!(get_memory(conn, "m1").is_err());

                insert_memory(conn, &sample("m2", MemoryTier::Core, MemoryScope::Global, None))?;
                conn.execute("UPDATE memories SET tags = 'a,b' WHERE id = 'm2'", [])?;
                assert!(get_memory(conn, "m2").is_err());
                Ok(())
            })
            .unwrap();
    }

    #[test]
    fn test_imported_original_ids() {
        let storage = Storage::open_in_memory().unwrap();
        storage
            .with_connection(|conn| {
                assert!(imported_original_ids(conn)?.is_empty());

                let mut text_id = sample("m1", MemoryTier::Longterm, MemoryScope::Global, None);
                text_id
                    .metadata
                    .insert("original_id".into(), serde_json::Value::from("abc"));
                insert_memory(conn, &text_id)?;
                let mut numeric_id = sample("m2", MemoryTier::Longterm, MemoryScope::Global, None);
                numeric_id
                    .metadata
                    .insert("original_id".into(), serde_json::Value::from(7));
                insert_memory(conn, &numeric_id)?;
                insert_memory(conn, &sample("m3", MemoryTier::Core, MemoryScope::Global, None))?;

                let ids = imported_original_ids(conn)?;
                assert_eq!(ids, HashSet::from(["abc".to_string(), "7".to_string()]));
                Ok(())
            })
            .unwrap();
    }
}
