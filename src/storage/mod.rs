//! Storage engine for the unified store
//!
//! Handles SQLite connections, WAL mode, and schema management.

mod connection;
mod migrations;
pub mod queries;

pub use connection::Storage;
pub use migrations::SCHEMA_VERSION;
pub use queries::MemoryFilter;
