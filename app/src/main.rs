// ==============================================================================
// main.rs - eQTL Ingestion Entry Point
// ==============================================================================
// Description: Command line driver for bulk eQTL Catalogue ingestion
// Author: Matt Barham
// Created: 2026-10-17
// Modified: 2026-10-17
// Version: 1.0.0
// ==============================================================================
// Exit status is non-zero only for invalid configuration or an unreachable
// database. Failed files and chunks are reported in the run summary.
// ==============================================================================

use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use eqtl_ingest::config::{self, IngestConfig};
use eqtl_ingest::processor::IngestionDriver;
use eqtl_ingest::retry::{RetryPolicy, TokioClock};
use eqtl_ingest::schema::SchemaVersion;
use eqtl_ingest::storage::{AssociationStore, MemoryStore, PgAssociationStore};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Directory containing the association files
    #[arg(short, long, env = "EQTL_DATA_DIR", default_value = config::DEFAULT_DATA_DIR)]
    data_dir: PathBuf,

    /// File name pattern (`*` and `?` wildcards)
    #[arg(short, long, env = "EQTL_PATTERN", default_value = config::DEFAULT_PATTERN)]
    pattern: String,

    /// Target table
    #[arg(short, long, env = "EQTL_TABLE", default_value = "eqtl_data")]
    table: String,

    /// Stored record shape (v1 or v2)
    #[arg(long, env = "EQTL_SCHEMA_VERSION", default_value = "v2")]
    schema_version: SchemaVersion,

    /// Rows per committed chunk
    #[arg(long, default_value_t = 100_000)]
    chunk_size: usize,

    /// Retries per failed chunk
    #[arg(long, default_value_t = config::DEFAULT_CHUNK_RETRIES)]
    chunk_retries: u32,

    /// Delay between chunk retries in milliseconds
    #[arg(long, default_value_t = 1_000)]
    chunk_retry_delay_ms: u64,

    /// Drop and recreate the table before loading (destroys existing rows)
    #[arg(long)]
    reset_schema: bool,

    /// Files ingested concurrently
    #[arg(short, long, default_value_t = 1)]
    workers: usize,

    /// Database pool size
    #[arg(long, default_value_t = 5)]
    max_connections: u32,

    /// Database URL (or use DATABASE_URL_FILE env var)
    #[arg(long, env)]
    database_url: Option<String>,

    /// Load into an in-memory store instead of the database
    #[arg(long)]
    dry_run: bool,

    /// Write the run summary as JSON to this path
    #[arg(long)]
    report: Option<PathBuf>,

    /// Emit logs as JSON lines
    #[arg(long)]
    json_logs: bool,

    /// Skip SHA-256 fingerprinting of source files
    #[arg(long)]
    no_hash: bool,
}

fn init_tracing(json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| "eqtl_ingest=info".into());

    if json {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer())
            .init();
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let args = Args::parse();
    init_tracing(args.json_logs);

    info!("eQTL ingestion starting...");

    let config = IngestConfig {
        data_dir: args.data_dir,
        pattern: args.pattern,
        table: args.table,
        schema_version: args.schema_version,
        chunk_size: args.chunk_size,
        chunk_retries: args.chunk_retries,
        chunk_retry_delay: Duration::from_millis(args.chunk_retry_delay_ms),
        reset_schema: args.reset_schema,
        workers: args.workers,
        hash_sources: !args.no_hash,
    };
    config.validate().context("Invalid configuration")?;

    let store: Arc<dyn AssociationStore> = if args.dry_run {
        info!("Dry run: loading into an in-memory store");
        Arc::new(MemoryStore::new())
    } else {
        let url_file = std::env::var_os("DATABASE_URL_FILE").map(PathBuf::from);
        let database_url = config::resolve_database_url(args.database_url, url_file.as_deref())?;

        let store = PgAssociationStore::connect(
            &database_url,
            args.max_connections,
            &RetryPolicy::startup(),
            &TokioClock,
        )
        .await
        .context("Database unreachable")?;
        Arc::new(store)
    };

    let driver = IngestionDriver::new(config, store)?;
    let summary = driver.run().await?;

    println!("{}", summary);

    if let Some(path) = args.report {
        let json = serde_json::to_string_pretty(&summary)?;
        std::fs::write(&path, json)
            .with_context(|| format!("Failed to write report to {}", path.display()))?;
        info!("Run report written to {}", path.display());
    }

    Ok(())
}
