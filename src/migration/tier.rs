//! Tier migration for a single record

use chrono::Utc;
use serde_json::{json, Value};

use crate::error::{Result, UnimemError};
use crate::invariants::{merge_metadata, validate_placement};
use crate::storage::{queries, Storage};
use crate::types::{MemoryTier, TierMigrationResult};

/// Metadata key holding the append-only list of tier changes
pub const META_TIER_MIGRATIONS: &str = "tier_migrations";

/// Move a memory to `to_tier`
///
/// Refusals (unknown id, same tier, core ceiling) come back as
/// `migrated: false` with the reason in `message`; the record is untouched.
pub fn migrate_tier(
    storage: &Storage,
    id: &str,
    to_tier: MemoryTier,
    reason: Option<&str>,
) -> Result<TierMigrationResult> {
    storage.with_record_lock(id, || {
        storage.with_transaction(|conn| {
            let Some(memory) = queries::get_memory(conn, id)? else {
                return Ok(refused(None, to_tier, format!("Memory {} not found", id)));
            };

            let from_tier = memory.tier;
            if from_tier == to_tier {
                return Ok(refused(
                    Some(from_tier),
                    to_tier,
                    format!("Memory {} is already in {} tier", id, to_tier),
                ));
            }

            match validate_placement(
                &memory.content,
                to_tier,
                memory.scope,
                memory.project_id.as_deref(),
            ) {
                Ok(_) => {}
                Err(UnimemError::Validation(msg)) => {
                    return Ok(refused(
                        Some(from_tier),
                        to_tier,
                        format!("Cannot migrate {} to {}: {}", id, to_tier, msg),
                    ));
                }
                Err(e) => return Err(e),
            }

            let mut metadata = merge_metadata(
                &memory.metadata,
                to_tier,
                memory.scope,
                memory.project_id.as_deref(),
            );
            let entry = json!({
                "from": from_tier.as_str(),
                "to": to_tier.as_str(),
                "reason": reason.unwrap_or("manual"),
                "migrated_at": Utc::now().to_rfc3339(),
            });
            match metadata.get_mut(META_TIER_MIGRATIONS) {
                Some(Value::Array(history)) => history.push(entry),
                _ => {
                    metadata.insert(META_TIER_MIGRATIONS.to_string(), Value::Array(vec![entry]));
                }
            }

            queries::update_tier(conn, id, to_tier, &metadata)?;
            tracing::info!(id, from = %from_tier, to = %to_tier, "memory tier migrated");

            Ok(TierMigrationResult {
                migrated: true,
                from_tier: Some(from_tier),
                to_tier,
                message: format!("Memory {} migrated from {} to {}", id, from_tier, to_tier),
            })
        })
    })
}

fn refused(from_tier: Option<MemoryTier>, to_tier: MemoryTier, message: String) -> TierMigrationResult {
    TierMigrationResult {
        migrated: false,
        from_tier,
        to_tier,
        message,
    }
}
