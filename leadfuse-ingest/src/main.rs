//! leadfuse-ingest - property identity resolution CLI
//!
//! Reads JSON Lines observations, fuses them into canonical property records
//! in the SQLite store, and inspects stored records.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use leadfuse_common::config::{self, CompiledDefaults, TomlConfig};
use leadfuse_common::events::EventBus;
use leadfuse_ingest::enrichment::{EnrichmentClient, HttpEnrichmentClient};
use leadfuse_ingest::jsonl::read_observations;
use leadfuse_ingest::store::{CanonicalStore, SqliteStore, StoreOptions};
use leadfuse_ingest::types::IdentityKey;
use leadfuse_ingest::{AddressNormalizer, BatchIngestor, ConflictResolutionPolicy, IngestOptions};
use serde_json::json;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::info;

#[derive(Parser, Debug)]
#[command(name = "leadfuse-ingest")]
#[command(about = "Fuse property observations into canonical records")]
#[command(version)]
struct Args {
    /// TOML config file
    #[arg(short, long, global = true, env = "LEADFUSE_CONFIG")]
    config: Option<PathBuf>,

    /// SQLite database file (overrides config)
    #[arg(short, long, global = true, env = "LEADFUSE_DATABASE")]
    database: Option<PathBuf>,

    /// Log filter, e.g. "debug" or "leadfuse_ingest=trace"
    #[arg(long, global = true)]
    log_level: Option<String>,

    /// Identity groups processed in parallel (overrides config)
    #[arg(long, global = true)]
    concurrency: Option<usize>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Ingest a JSON Lines file of observations
    Ingest {
        file: PathBuf,
    },
    /// Print a canonical record and its change history
    Show {
        identity_key: String,
    },
    /// Print the structured address and identity key for an address
    Normalize {
        address: String,
    },
    /// Write a TOML config file holding the compiled defaults
    InitConfig {
        /// Target file (default: --config, then the platform config path)
        path: Option<PathBuf>,
        /// Replace an existing file
        #[arg(long)]
        force: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let (mut toml_config, config_source) = config::load_with_source(args.config.as_deref());
    if let Some(concurrency) = args.concurrency {
        toml_config.ingest.max_concurrent_groups = concurrency;
    }
    toml_config.validate().context("Invalid configuration")?;

    leadfuse_common::logging::init_tracing(&toml_config.logging, args.log_level.as_deref())?;
    info!("leadfuse-ingest {}", env!("CARGO_PKG_VERSION"));
    config_source.log();

    let normalizer = AddressNormalizer::with_additions(&toml_config.normalizer.street_suffixes);

    match args.command {
        Command::Normalize { address } => {
            let normalized = normalizer.normalize(&address)?;
            println!("{}", serde_json::to_string_pretty(&normalized)?);
        }
        Command::Show { identity_key } => {
            let store = open_store(args.database.as_deref(), &toml_config).await?;
            let key = IdentityKey::from_hex(identity_key.trim().to_ascii_lowercase());
            let record = store
                .get(&key)
                .await?
                .with_context(|| format!("No canonical record for {}", key))?;
            let history = store.change_history(&key).await?;
            println!(
                "{}",
                serde_json::to_string_pretty(&json!({ "record": record, "history": history }))?
            );
        }
        Command::Ingest { file } => {
            ingest_file(&file, args.database.as_deref(), &toml_config, normalizer).await?;
        }
        Command::InitConfig { path, force } => {
            let target = path
                .or(args.config)
                .or_else(|| CompiledDefaults::for_current_platform().config_path)
                .context("No config path given and no platform config directory")?;
            if target.exists() && !force {
                anyhow::bail!("{} already exists (use --force to replace it)", target.display());
            }
            config::write_toml_config(&TomlConfig::default(), &target)
                .with_context(|| format!("Failed to write {}", target.display()))?;
            println!("{}", target.display());
        }
    }

    Ok(())
}

async fn open_store(database: Option<&Path>, toml_config: &TomlConfig) -> Result<SqliteStore> {
    let db_path = database
        .map(Path::to_path_buf)
        .unwrap_or_else(|| toml_config.database_path());
    info!("Database: {}", db_path.display());
    let store = SqliteStore::open(&db_path, StoreOptions::from(&toml_config.ingest))
        .await
        .with_context(|| format!("Failed to open store at {}", db_path.display()))?;
    Ok(store)
}

async fn ingest_file(
    file: &Path,
    database: Option<&Path>,
    toml_config: &TomlConfig,
    normalizer: AddressNormalizer,
) -> Result<()> {
    let parsed = read_observations(file)
        .await
        .with_context(|| format!("Failed to read {}", file.display()))?;
    info!(
        observations = parsed.observations.len(),
        unreadable_lines = parsed.rejected.len(),
        "Loaded {}",
        file.display()
    );

    let policy = match &toml_config.policy {
        Some(policy_config) => ConflictResolutionPolicy::from_config(policy_config)?,
        None => ConflictResolutionPolicy::default(),
    };
    info!(policy_version = policy.version(), "Conflict-resolution policy loaded");

    let store: Arc<dyn CanonicalStore> = Arc::new(open_store(database, toml_config).await?);
    let options = IngestOptions::from_config(&toml_config.ingest, &toml_config.enrichment);
    let event_bus = EventBus::new(256);

    let mut ingestor = BatchIngestor::new(store, Arc::new(normalizer), Arc::new(policy), options)
        .with_event_bus(event_bus.clone());
    if let Some(client) = HttpEnrichmentClient::from_config(&toml_config.enrichment)? {
        info!("Enrichment provider enabled");
        let client: Arc<dyn EnrichmentClient> = Arc::new(client);
        ingestor = ingestor.with_enrichment(client);
    }

    // Mirror progress events into the debug log
    let mut events = event_bus.subscribe();
    let event_logger = tokio::spawn(async move {
        while let Ok(event) = events.recv().await {
            if let Ok(line) = serde_json::to_string(&event) {
                tracing::debug!(target: "leadfuse_ingest::events", "{}", line);
            }
        }
    });

    let outcome = ingestor.ingest_batch(parsed.observations).await;
    drop(ingestor);
    drop(event_bus);
    let _ = event_logger.await;

    let unreadable: Vec<_> = parsed
        .rejected
        .iter()
        .map(|r| json!({ "line": r.line_number, "error": r.error }))
        .collect();
    println!(
        "{}",
        serde_json::to_string_pretty(&json!({
            "summary": outcome.summary,
            "unreadable_lines": unreadable,
            "identity_keys": outcome.records.iter().map(|r| r.identity_key.as_str()).collect::<Vec<_>>(),
        }))?
    );

    Ok(())
}
