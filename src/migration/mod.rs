//! Moving memories between tiers and out of the legacy layer model
//!
//! - [`tier`]: promote/demote a single record between core and longterm
//! - [`legacy`]: one-shot import from the pre-tier layer store
//! - [`backup`]: snapshots taken before a legacy import touches anything

pub mod backup;
pub mod legacy;
pub mod tier;

pub use backup::{create_migration_backup, MigrationBackup};
pub use legacy::{
    demote_if_oversized, map_legacy_layer, LegacyMemory, LegacyMigrationOptions,
    LegacyMigrationResult, LegacyStore, MigrationStatus,
};
pub use tier::migrate_tier;
