//! Database connection management with WAL mode support
//!
//! One writer connection serializes mutations; file-backed stores also get a
//! round-robin pool of read-only connections so readers never queue behind
//! writers. Check-then-act sequences on a single record take a per-id lock.

use dashmap::DashMap;
use parking_lot::Mutex;
use rusqlite::{Connection, OpenFlags};
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use super::migrations::run_migrations;
use crate::error::{Result, UnimemError};
use crate::types::{StorageMode, StoreConfig};

/// Storage engine wrapping SQLite
pub struct Storage {
    config: StoreConfig,
    writer: Arc<Mutex<Connection>>,
    readers: Arc<Vec<Mutex<Connection>>>,
    next_reader: Arc<AtomicUsize>,
    closed: Arc<AtomicBool>,
    record_locks: Arc<DashMap<String, Arc<Mutex<()>>>>,
}

impl Storage {
    /// Open or create a database with the given configuration
    pub fn open(config: StoreConfig) -> Result<Self> {
        config.validate()?;

        let writer = Self::create_connection(&config)?;
        run_migrations(&writer)?;

        let mut readers = Vec::new();
        if !config.is_in_memory() {
            for _ in 0..config.reader_pool_size {
                readers.push(Mutex::new(Self::create_reader(&config)?));
            }
        }

        tracing::debug!(
            db_path = %config.db_path,
            readers = readers.len(),
            "storage opened"
        );

        Ok(Self {
            config,
            writer: Arc::new(Mutex::new(writer)),
            readers: Arc::new(readers),
            next_reader: Arc::new(AtomicUsize::new(0)),
            closed: Arc::new(AtomicBool::new(false)),
            record_locks: Arc::new(DashMap::new()),
        })
    }

    /// Open with default configuration (in-memory for testing)
    pub fn open_in_memory() -> Result<Self> {
        Self::open(StoreConfig::in_memory())
    }

    /// Create the read-write connection with appropriate pragmas
    fn create_connection(config: &StoreConfig) -> Result<Connection> {
        let flags = OpenFlags::SQLITE_OPEN_READ_WRITE
            | OpenFlags::SQLITE_OPEN_CREATE
            | OpenFlags::SQLITE_OPEN_NO_MUTEX;

        let conn = if config.is_in_memory() {
            Connection::open_in_memory()?
        } else {
            // Ensure parent directory exists
            if let Some(parent) = Path::new(&config.db_path).parent() {
                if !parent.as_os_str().is_empty() {
                    std::fs::create_dir_all(parent)?;
                }
            }
            Connection::open_with_flags(&config.db_path, flags)?
        };

        Self::configure_pragmas(&conn, config.storage_mode)?;

        Ok(conn)
    }

    fn create_reader(config: &StoreConfig) -> Result<Connection> {
        let flags = OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_NO_MUTEX;
        let conn = Connection::open_with_flags(&config.db_path, flags)?;
        conn.execute_batch("PRAGMA busy_timeout=30000;")?;
        Ok(conn)
    }

    /// Configure SQLite pragmas based on storage mode
    ///
    /// Local mode: WAL for concurrent readers and crash recovery
    /// Cloud-safe mode: DELETE journal for cloud sync compatibility
    fn configure_pragmas(conn: &Connection, mode: StorageMode) -> Result<()> {
        match mode {
            StorageMode::Local => {
                conn.execute_batch(
                    r#"
                    PRAGMA journal_mode=WAL;
                    PRAGMA synchronous=NORMAL;
                    PRAGMA wal_autocheckpoint=1000;
                    PRAGMA busy_timeout=30000;
                    PRAGMA cache_size=-16000;
                    PRAGMA temp_store=MEMORY;
                    "#,
                )?;
            }
            StorageMode::CloudSafe => {
                // Single-file mode for cloud sync (Dropbox, OneDrive, iCloud)
                conn.execute_batch(
                    r#"
                    PRAGMA journal_mode=DELETE;
                    PRAGMA synchronous=FULL;
                    PRAGMA busy_timeout=30000;
                    PRAGMA cache_size=-16000;
                    PRAGMA temp_store=MEMORY;
                    "#,
                )?;
            }
        }
        Ok(())
    }

    /// Fails with `StorageUnavailable` once the store is closed
    pub(crate) fn ensure_open(&self) -> Result<()> {
        if self.closed.load(Ordering::Acquire) {
            return Err(UnimemError::StorageUnavailable(format!(
                "store at '{}' is closed",
                self.config.db_path
            )));
        }
        Ok(())
    }

    /// Execute a function with the writer connection
    pub fn with_connection<F, T>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&Connection) -> Result<T>,
    {
        self.ensure_open()?;
        let conn = self.writer.lock();
        f(&conn)
    }

    /// Execute a function inside a write transaction
    pub fn with_transaction<F, T>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&Connection) -> Result<T>,
    {
        self.ensure_open()?;
        let mut conn = self.writer.lock();
        let tx = conn.transaction()?;
        let result = f(&tx)?;
        tx.commit()?;
        Ok(result)
    }

    /// Execute a read-only function, on a pooled reader when one exists
    pub fn with_reader<F, T>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&Connection) -> Result<T>,
    {
        self.ensure_open()?;
        if self.readers.is_empty() {
            let conn = self.writer.lock();
            return f(&conn);
        }
        let idx = self.next_reader.fetch_add(1, Ordering::Relaxed) % self.readers.len();
        let conn = self.readers[idx].lock();
        f(&conn)
    }

    /// Run `f` while holding the lock for one record id
    ///
    /// Mutations on the same id are serialized; different ids never contend.
    pub fn with_record_lock<F, T>(&self, id: &str, f: F) -> Result<T>
    where
        F: FnOnce() -> Result<T>,
    {
        self.ensure_open()?;
        let lock = self
            .record_locks
            .entry(id.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone();

        let result = {
            let _guard = lock.lock();
            f()
        };

        drop(lock);
        self.record_locks
            .remove_if(id, |_, lock| Arc::strong_count(lock) == 1);

        result
    }

    /// Number of record locks currently tracked
    pub fn active_record_locks(&self) -> usize {
        self.record_locks.len()
    }

    /// Mark the store closed; every later operation fails loudly
    pub fn close(&self) -> Result<()> {
        if self.closed.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        if !self.config.is_in_memory() && self.config.storage_mode == StorageMode::Local {
            let conn = self.writer.lock();
            conn.execute_batch("PRAGMA wal_checkpoint(TRUNCATE);")?;
        }
        tracing::info!(db_path = %self.config.db_path, "storage closed");
        Ok(())
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Get current storage mode
    pub fn storage_mode(&self) -> StorageMode {
        self.config.storage_mode
    }

    /// Get database path
    pub fn db_path(&self) -> &str {
        &self.config.db_path
    }

    /// Check if database is in a cloud-synced folder
    pub fn is_in_cloud_folder(&self) -> bool {
        let path = self.config.db_path.to_lowercase();
        path.contains("dropbox")
            || path.contains("onedrive")
            || path.contains("icloud")
            || path.contains("google drive")
    }

    /// Get warning if storage mode doesn't match folder type
    pub fn storage_mode_warning(&self) -> Option<String> {
        if self.is_in_cloud_folder() && self.config.storage_mode == StorageMode::Local {
            Some(format!(
                "Database '{}' appears to be in a cloud-synced folder. \
                WAL mode may cause corruption. Set UNIMEM_STORAGE_MODE=cloud-safe \
                or move the database to a local folder.",
                self.config.db_path
            ))
        } else {
            None
        }
    }

    /// Write a consistent copy of the database to `path`
    pub fn snapshot_to(&self, path: &Path) -> Result<()> {
        let path_str = path.to_str().ok_or_else(|| {
            UnimemError::Migration(format!("Invalid snapshot path: {}", path.display()))
        })?;
        self.with_connection(|conn| {
            // VACUUM INTO takes no bound parameters
            conn.execute_batch(&format!("VACUUM INTO '{}'", path_str.replace('\'', "''")))?;
            Ok(())
        })
    }

    /// Get configuration
    pub fn config(&self) -> &StoreConfig {
        &self.config
    }
}

impl Clone for Storage {
    fn clone(&self) -> Self {
        Self {
            config: self.config.clone(),
            writer: self.writer.clone(),
            readers: self.readers.clone(),
            next_reader: self.next_reader.clone(),
            closed: self.closed.clone(),
            record_locks: self.record_locks.clone(),
        }
    }
}
