//! Unimem - unified tiered memory store
//!
//! Persistent memory for AI coding assistants: small always-available core
//! memories and unbounded long-term memories, each either global or bound
//! to one project. Provides lexical search, near-duplicate detection, tier
//! migration, analytics and a one-shot import from the legacy layer store.

pub mod analytics;
pub mod cancel;
pub mod error;
pub mod invariants;
pub mod migration;
pub mod search;
pub mod storage;
pub mod store;
pub mod types;

pub use analytics::Analytics;
pub use cancel::CancellationFlag;
pub use error::{FailureResponse, Result, UnimemError};
pub use migration::{LegacyMigrationOptions, LegacyMigrationResult, MigrationStatus};
pub use storage::Storage;
pub use store::MemoryStore;
pub use types::*;

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
