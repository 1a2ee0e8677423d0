//! Pre-migration snapshots of the legacy and unified databases
//!
//! Each import gets its own timestamped directory under the backup root.
//! A snapshot only counts once it reopens cleanly and passes
//! `PRAGMA quick_check`; anything else aborts the import.

use chrono::{DateTime, Utc};
use rusqlite::{Connection, OpenFlags};
use std::path::{Path, PathBuf};

use crate::error::{Result, UnimemError};
use crate::storage::Storage;

pub const LEGACY_SNAPSHOT_FILE: &str = "legacy.db";
pub const UNIFIED_SNAPSHOT_FILE: &str = "unified.db";

/// Where one import's snapshots were written
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MigrationBackup {
    pub dir: PathBuf,
    pub legacy_snapshot: PathBuf,
    pub unified_snapshot: PathBuf,
}

/// Snapshot both stores into `root/migration-<timestamp>/` and verify them
pub fn create_migration_backup(
    storage: &Storage,
    legacy_db: &Path,
    root: &Path,
    at: DateTime<Utc>,
) -> Result<MigrationBackup> {
    let stamp = at.format("%Y%m%dT%H%M%S%3fZ").to_string();
    let mut dir = root.join(format!("migration-{}", stamp));
    let mut attempt = 1;
    while dir.exists() {
        dir = root.join(format!("migration-{}-{}", stamp, attempt));
        attempt += 1;
    }
    std::fs::create_dir_all(&dir).map_err(|e| {
        UnimemError::Migration(format!(
            "Cannot create backup directory {}: {}",
            dir.display(),
            e
        ))
    })?;

    let backup = MigrationBackup {
        legacy_snapshot: dir.join(LEGACY_SNAPSHOT_FILE),
        unified_snapshot: dir.join(UNIFIED_SNAPSHOT_FILE),
        dir,
    };

    copy_database(legacy_db, &backup.legacy_snapshot)?;
    storage
        .snapshot_to(&backup.unified_snapshot)
        .map_err(|e| UnimemError::Migration(format!("Unified store snapshot failed: {}", e)))?;

    verify_snapshot(&backup.legacy_snapshot)?;
    verify_snapshot(&backup.unified_snapshot)?;

    tracing::info!(dir = %backup.dir.display(), "migration backup created");
    Ok(backup)
}

/// Copy a database file together with its WAL sidecar, if any
fn copy_database(from: &Path, to: &Path) -> Result<()> {
    std::fs::copy(from, to).map_err(|e| {
        UnimemError::Migration(format!("Cannot back up {}: {}", from.display(), e))
    })?;

    let wal = sidecar(from, "-wal");
    if wal.exists() {
        std::fs::copy(&wal, sidecar(to, "-wal"))?;
    }
    Ok(())
}

fn sidecar(path: &Path, suffix: &str) -> PathBuf {
    let mut name = path.as_os_str().to_owned();
    name.push(suffix);
    PathBuf::from(name)
}

fn verify_snapshot(path: &Path) -> Result<()> {
    let len = std::fs::metadata(path).map(|m| m.len()).unwrap_or(0);
    if len == 0 {
        return Err(UnimemError::Migration(format!(
            "Backup {} is missing or empty",
            path.display()
        )));
    }

    let conn = Connection::open_with_flags(path, OpenFlags::SQLITE_OPEN_READ_ONLY)
        .map_err(|e| UnimemError::Migration(format!("Backup {} unreadable: {}", path.display(), e)))?;
    let check: String = conn
        .query_row("PRAGMA quick_check", [], |row| row.get(0))
        .map_err(|e| UnimemError::Migration(format!("Backup {} unreadable: {}", path.display(), e)))?;
    if check != "ok" {
        return Err(UnimemError::Migration(format!(
            "Backup {} failed integrity check: {}",
            path.display(),
            check
        )));
    }
    Ok(())
}
