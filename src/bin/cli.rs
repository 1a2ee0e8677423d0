//! Unimem CLI
//!
//! Command-line interface for the unified memory store. Results are printed
//! as pretty JSON on stdout; logs go to stderr.

use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::Context;
use clap::{Parser, Subcommand};
use serde::Serialize;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use unimem::{
    DuplicateQuery, LegacyMigrationOptions, MemoryScope, MemoryStore, MemoryTier, SearchOptions,
    StorageMode, StoreConfig, StoreMemoryInput, UnimemError,
};

#[derive(Parser)]
#[command(name = "unimem")]
#[command(about = "Unified tiered memory store CLI")]
#[command(version)]
struct Cli {
    /// Database path (defaults to the platform data directory)
    #[arg(long, env = "UNIMEM_DB_PATH")]
    db_path: Option<String>,

    /// Storage mode: local or cloud-safe
    #[arg(long, env = "UNIMEM_STORAGE_MODE", default_value = "local")]
    storage_mode: String,

    /// Legacy layer-model database to import from
    #[arg(long, env = "UNIMEM_LEGACY_DB_PATH")]
    legacy_db_path: Option<String>,

    /// Directory for pre-migration backups
    #[arg(long, env = "UNIMEM_BACKUP_DIR")]
    backup_dir: Option<String>,

    /// Core-tier capacity used for utilization reporting
    #[arg(long, env = "UNIMEM_CORE_CAPACITY_BYTES", default_value = "65536")]
    core_capacity_bytes: u64,

    /// Read-only connections kept for file-backed stores
    #[arg(long, env = "UNIMEM_READER_POOL_SIZE", default_value = "4")]
    reader_pool_size: usize,

    /// Default result limit for search
    #[arg(long, env = "UNIMEM_SEARCH_LIMIT", default_value = "10")]
    search_limit: usize,

    /// Default similarity threshold for duplicate checks
    #[arg(long, env = "UNIMEM_DUPLICATE_THRESHOLD", default_value = "0.7")]
    duplicate_threshold: f64,

    /// Emit logs as JSON
    #[arg(long, env = "UNIMEM_LOG_JSON")]
    log_json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Store a new memory
    Store {
        /// Content to remember
        content: String,
        /// Tier: core or longterm
        #[arg(short, long, default_value = "longterm")]
        tier: String,
        /// Scope: global or project
        #[arg(short, long, default_value = "global")]
        scope: String,
        /// Project identifier (required for project scope)
        #[arg(short, long)]
        project: Option<String>,
        /// Tags (comma-separated)
        #[arg(short = 'T', long)]
        tags: Option<String>,
    },
    /// Get a memory by ID
    Get {
        /// Memory ID
        id: String,
    },
    /// Search memories
    Search {
        /// Search query
        query: String,
        #[arg(short, long)]
        tier: Option<String>,
        #[arg(short, long)]
        scope: Option<String>,
        #[arg(short, long)]
        project: Option<String>,
        /// Legacy layer name
        #[arg(long)]
        layer: Option<String>,
        /// Required tags (comma-separated)
        #[arg(short = 'T', long)]
        tags: Option<String>,
        /// Maximum results
        #[arg(short, long)]
        limit: Option<usize>,
    },
    /// Delete a memory
    Delete {
        /// Memory ID
        id: String,
        /// Also delete near-duplicates in the same tier, scope and project
        #[arg(long)]
        cascade: bool,
    },
    /// Replace a memory's content
    Update {
        /// Memory ID
        id: String,
        /// New content
        content: String,
    },
    /// Move a memory to another tier
    MigrateTier {
        /// Memory ID
        id: String,
        /// Target tier
        to: String,
        /// Reason recorded in the migration history
        #[arg(short, long)]
        reason: Option<String>,
    },
    /// Check content against stored memories for near-duplicates
    CheckDuplicate {
        /// Content to check
        content: String,
        #[arg(short, long)]
        tier: Option<String>,
        #[arg(short, long)]
        scope: Option<String>,
        #[arg(short, long)]
        project: Option<String>,
        /// Similarity threshold in [0, 1]
        #[arg(long)]
        threshold: Option<f64>,
    },
    /// Show aggregate counts
    Stats,
    /// Show full analytics
    Analytics,
    /// Import the legacy layer-model store
    MigrateLegacy {
        /// Project for project-layer records without one
        #[arg(short, long)]
        project: Option<String>,
        /// Validate without writing
        #[arg(long)]
        dry_run: bool,
    },
    /// Report whether a legacy import is needed
    MigrationStatus,
}

fn init_logging(json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    let registry = tracing_subscriber::registry().with(filter);
    if json {
        registry
            .with(tracing_subscriber::fmt::layer().json().with_writer(std::io::stderr))
            .init();
    } else {
        registry
            .with(
                tracing_subscriber::fmt::layer()
                    .with_writer(std::io::stderr)
                    .with_ansi(false),
            )
            .init();
    }
}

fn default_db_path() -> PathBuf {
    dirs::data_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("unimem")
        .join("memories.db")
}

fn split_tags(tags: Option<String>) -> Vec<String> {
    tags.map(|t| t.split(',').map(|s| s.trim().to_string()).collect())
        .unwrap_or_default()
}

fn parse_opt<T: std::str::FromStr<Err = UnimemError>>(value: Option<String>) -> unimem::Result<Option<T>> {
    value.map(|v| v.parse()).transpose()
}

fn to_json<T: Serialize>(value: &T) -> unimem::Result<serde_json::Value> {
    Ok(serde_json::to_value(value)?)
}

fn run(store: &MemoryStore, command: Commands) -> unimem::Result<serde_json::Value> {
    match command {
        Commands::Store {
            content,
            tier,
            scope,
            project,
            tags,
        } => {
            let tier: MemoryTier = tier.parse()?;
            let scope: MemoryScope = scope.parse()?;
            let mut input = StoreMemoryInput::new(content, tier, scope).with_tags(split_tags(tags));
            input.project_id = project;
            let id = store.store(input)?;
            Ok(serde_json::json!({ "success": true, "id": id }))
        }

        Commands::Get { id } => match store.get(&id)? {
            Some(memory) => to_json(&memory),
            None => Err(UnimemError::NotFound(id)),
        },

        Commands::Search {
            query,
            tier,
            scope,
            project,
            layer,
            tags,
            limit,
        } => {
            let options = SearchOptions {
                tier: parse_opt(tier)?,
                scope: parse_opt(scope)?,
                project_id: project,
                layer,
                tags: tags.map(|t| split_tags(Some(t))),
                limit,
            };
            to_json(&store.search(&query, &options)?)
        }

        Commands::Delete { id, cascade } => to_json(&store.delete(&id, cascade)?),

        Commands::Update { id, content } => to_json(&store.update_content(&id, &content)?),

        Commands::MigrateTier { id, to, reason } => {
            let to: MemoryTier = to.parse()?;
            to_json(&store.migrate_tier(&id, to, reason.as_deref())?)
        }

        Commands::CheckDuplicate {
            content,
            tier,
            scope,
            project,
            threshold,
        } => {
            let query = DuplicateQuery {
                tier: parse_opt(tier)?,
                scope: parse_opt(scope)?,
                project_id: project,
                threshold,
            };
            to_json(&store.check_duplicate(&content, &query)?)
        }

        Commands::Stats => to_json(&store.get_stats()?),

        Commands::Analytics => to_json(&store.get_analytics()?),

        Commands::MigrateLegacy { project, dry_run } => {
            let options = LegacyMigrationOptions {
                project_id: project,
                dry_run,
            };
            to_json(&store.migrate_legacy(&options)?)
        }

        Commands::MigrationStatus => to_json(&store.migration_status()?),
    }
}

fn store_config(cli: &Cli) -> anyhow::Result<StoreConfig> {
    let db_path = match cli.db_path {
        Some(ref path) => shellexpand::tilde(path).into_owned(),
        None => default_db_path().to_string_lossy().into_owned(),
    };

    let mut config = StoreConfig::new(db_path);
    config.storage_mode = cli
        .storage_mode
        .parse::<StorageMode>()
        .context("invalid --storage-mode")?;
    config.legacy_db_path = cli.legacy_db_path.clone();
    config.backup_dir = cli.backup_dir.clone();
    config.core_capacity_bytes = cli.core_capacity_bytes;
    config.reader_pool_size = cli.reader_pool_size;
    config.search_limit = cli.search_limit;
    config.duplicate_threshold = cli.duplicate_threshold;
    Ok(config)
}

fn main() -> anyhow::Result<ExitCode> {
    let cli = Cli::parse();
    init_logging(cli.log_json);

    let config = store_config(&cli)?;
    let store = MemoryStore::open(config).context("failed to open memory store")?;

    let outcome = run(&store, cli.command);
    store.close().context("failed to close memory store")?;

    match outcome {
        Ok(value) => {
            println!("{}", serde_json::to_string_pretty(&value)?);
            Ok(ExitCode::SUCCESS)
        }
        Err(e) => {
            tracing::error!(error = %e, "command failed");
            println!("{}", serde_json::to_string_pretty(&e.to_failure())?);
            Ok(ExitCode::FAILURE)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_every_config_field_has_a_flag() {
        let cli = Cli::parse_from([
            "unimem",
            "--db-path",
            "/tmp/unimem.db",
            "--storage-mode",
            "cloud-safe",
            "--reader-pool-size",
            "2",
            "--search-limit",
            "25",
            "--duplicate-threshold",
            "0.85",
            "--core-capacity-bytes",
            "4096",
            "stats",
        ]);
        let config = store_config(&cli).unwrap();
        assert_eq!(config.db_path, "/tmp/unimem.db");
        assert_eq!(config.storage_mode, StorageMode::CloudSafe);
        assert_eq!(config.reader_pool_size, 2);
        assert_eq!(config.search_limit, 25);
        assert!((config.duplicate_threshold - 0.85).abs() < f64::EPSILON);
        assert_eq!(config.core_capacity_bytes, 4096);
    }
}
