//! Database migrations for the unified store

use rusqlite::Connection;

use crate::error::Result;

/// Current schema version
pub const SCHEMA_VERSION: i32 = 2;

/// Run all migrations
pub fn run_migrations(conn: &Connection) -> Result<()> {
    conn.execute(
        "CREATE TABLE IF NOT EXISTS schema_version (
            version INTEGER PRIMARY KEY,
            applied_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP
        )",
        [],
    )?;

    let current_version: i32 = conn
        .query_row(
            "SELECT COALESCE(MAX(version), 0) FROM schema_version",
            [],
            |row| row.get(0),
        )
        .unwrap_or(0);

    if current_version < 1 {
        migrate_v1(conn)?;
    }

    if current_version < SCHEMA_VERSION {
        migrate_v2(conn)?;
    }

    Ok(())
}

/// Initial tiered schema (v1)
fn migrate_v1(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        r#"
        -- One row per memory; tags and metadata are JSON text
        CREATE TABLE IF NOT EXISTS memories (
            id TEXT PRIMARY KEY NOT NULL,
            content TEXT NOT NULL CHECK (length(content) > 0),
            tier TEXT NOT NULL CHECK (tier IN ('core', 'longterm')),
            scope TEXT NOT NULL CHECK (scope IN ('global', 'project')),
            project_id TEXT,
            tags TEXT NOT NULL DEFAULT '[]',
            metadata TEXT NOT NULL DEFAULT '{}',
            content_size INTEGER NOT NULL,
            content_hash TEXT NOT NULL,
            created_at TEXT NOT NULL,
            accessed_at TEXT NOT NULL,
            access_count INTEGER NOT NULL DEFAULT 0 CHECK (access_count >= 0),
            CHECK ((scope = 'project') = (project_id IS NOT NULL)),
            CHECK (tier <> 'core' OR content_size <= 2048)
        );

        -- Tier/scope filtering
        CREATE INDEX IF NOT EXISTS idx_memories_tier_scope ON memories(tier, scope);

        -- Project filtering
        CREATE INDEX IF NOT EXISTS idx_memories_project ON memories(project_id)
            WHERE project_id IS NOT NULL;

        CREATE INDEX IF NOT EXISTS idx_memories_created ON memories(created_at DESC);
        CREATE INDEX IF NOT EXISTS idx_memories_content_hash ON memories(content_hash);

        INSERT INTO schema_version (version) VALUES (1);
        "#,
    )?;

    Ok(())
}

/// Legacy import bookkeeping (v2)
fn migrate_v2(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        r#"
        CREATE TABLE IF NOT EXISTS migration_runs (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            started_at TEXT NOT NULL,
            finished_at TEXT NOT NULL,
            backup_path TEXT,
            migrated_count INTEGER NOT NULL DEFAULT 0,
            skipped_count INTEGER NOT NULL DEFAULT 0,
            error_count INTEGER NOT NULL DEFAULT 0,
            demoted_count INTEGER NOT NULL DEFAULT 0,
            success INTEGER NOT NULL
        );

        INSERT INTO schema_version (version) VALUES (2);
        "#,
    )?;

    tracing::info!("Schema v2: added migration_runs");

    Ok(())
}
