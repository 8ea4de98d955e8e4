//! TileIndex CLI: drives scan and replay passes and inspects replayed state.
//!
//! # Commands
//! ```text
//! tileindex scan                 one scan pass
//! tileindex replay               one replay pass
//! tileindex run                  both passes every poll interval
//! tileindex status               cursors and row counts
//! tileindex tile <id>            tile state and history as JSON
//! tileindex info
//! ```

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use clap::{Parser, Subcommand};
use serde_json::json;
use tracing::{error, info};

use tileindex_core::checkpoint::{CheckpointStore, CursorKind};
use tileindex_core::config::IndexerConfig;
use tileindex_core::error::IndexerError;
use tileindex_core::lease::PassOutcome;
use tileindex_core::store::{RawEventStore, TileStore};
use tileindex_core::types::HistoryKind;
use tileindex_evm::{HttpLedgerClient, IndexerBuilder, Pipeline};
use tileindex_storage::SqliteStorage;

mod logging;

use logging::{init_tracing, LogConfig};

#[derive(Parser)]
#[command(
    name = "tileindex",
    about = "Ledger indexer for the tile contract and its ERC-721 wrapper",
    long_about = "
TileIndex scans the tile contract and its wrapper for events, stores every raw
event once, and replays them into current tile state plus purchase, data,
wrap and transfer history.

ENVIRONMENT VARIABLES:
  TILEINDEX_RPC_URL    JSON-RPC endpoint (overrides the config file)
  RUST_LOG             Log filter (overrides --log-level and [log])
",
    version
)]
struct Cli {
    /// TOML configuration file; built-in defaults when omitted
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// SQLite database path
    #[arg(long, global = true, default_value = "tileindex.db")]
    db: String,

    /// JSON-RPC endpoint
    #[arg(long, global = true, env = "TILEINDEX_RPC_URL")]
    rpc_url: Option<String>,

    /// Log level: trace | debug | info | warn | error (overrides `[log] level`)
    #[arg(long, global = true)]
    log_level: Option<String>,

    /// Emit JSON structured logs
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run one scan pass up to the confirmed tip
    Scan,

    /// Run one replay pass over stored raw events
    Replay,

    /// Run scan and replay passes on the configured poll interval
    Run {
        /// Override `poll_interval_ms` from the config
        #[arg(long)]
        interval_ms: Option<u64>,
    },

    /// Show cursors and row counts
    Status,

    /// Print a tile and its history as JSON
    Tile {
        /// Tile id
        id: u32,
    },

    /// Show build and configuration info
    Info,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let (config, mut log) = load_config(&cli)?;
    if let Some(level) = &cli.log_level {
        log.level = level.clone();
    }
    log.json |= cli.json;
    init_tracing(&log);

    match cli.command {
        Commands::Scan => {
            let pipeline = open_pipeline(config, &cli.db).await?;
            let outcome = pipeline.run_scan_pass().await.context("scan pass failed")?;
            print_outcome("scan", outcome)
        }

        Commands::Replay => {
            let pipeline = open_pipeline(config, &cli.db).await?;
            let outcome = pipeline.run_replay_pass().await.context("replay pass failed")?;
            print_outcome("replay", outcome)
        }

        Commands::Run { interval_ms } => {
            let interval = Duration::from_millis(interval_ms.unwrap_or(config.poll_interval_ms));
            let pipeline = open_pipeline(config, &cli.db).await?;
            cmd_run(&pipeline, interval).await
        }

        Commands::Status => cmd_status(&cli.db).await,

        Commands::Tile { id } => cmd_tile(&cli.db, id).await,

        Commands::Info => cmd_info(&config),
    }
}

/// Indexer settings and the `[log]` table come from the same file.
fn load_config(cli: &Cli) -> Result<(IndexerConfig, LogConfig)> {
    let (mut config, log) = match &cli.config {
        Some(path) => {
            let text = std::fs::read_to_string(path)
                .with_context(|| format!("failed to read config '{}'", path.display()))?;
            let config = IndexerConfig::from_toml_str(&text)
                .with_context(|| format!("failed to load config '{}'", path.display()))?;
            let log = LogConfig::from_toml_str(&text)
                .with_context(|| format!("invalid [log] table in '{}'", path.display()))?;
            (config, log)
        }
        None => (IndexerConfig::default(), LogConfig::default()),
    };
    if let Some(url) = &cli.rpc_url {
        config.rpc_url = url.clone();
    }
    Ok((config, log))
}

async fn open_storage(db: &str) -> Result<Arc<SqliteStorage>> {
    let storage = SqliteStorage::open(db)
        .await
        .with_context(|| format!("failed to open database '{db}'"))?;
    Ok(Arc::new(storage))
}

async fn open_pipeline(config: IndexerConfig, db: &str) -> Result<Pipeline> {
    let client = HttpLedgerClient::new(
        config.rpc_url.clone(),
        Duration::from_millis(config.request_timeout_ms),
    )
    .context("failed to create RPC client")?;
    let storage = open_storage(db).await?;

    info!(rpc_url = %client.url(), db, "pipeline ready");
    IndexerBuilder::from_config(config)
        .build(Arc::new(client), storage)
        .context("invalid configuration")
}

fn print_outcome(pass: &str, outcome: PassOutcome) -> Result<()> {
    let report = match outcome {
        PassOutcome::Skipped => json!({ "pass": pass, "skipped": true }),
        PassOutcome::Completed(stats) => json!({ "pass": pass, "skipped": false, "stats": stats }),
    };
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}

// ─── Command implementations ─────────────────────────────────────────────────

/// Act as the external scheduler. Fatal errors end the process; anything
/// else is logged and the next tick tries again.
async fn cmd_run(pipeline: &Pipeline, interval: Duration) -> Result<()> {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    info!(interval_ms = interval.as_millis() as u64, "scheduler started");

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                let scan = pipeline.run_scan_pass().await;
                check_pass("scan", scan)?;
                let replay = pipeline.run_replay_pass().await;
                check_pass("replay", replay)?;
            }
            _ = tokio::signal::ctrl_c() => {
                info!("shutdown requested");
                return Ok(());
            }
        }
    }
}

fn check_pass(pass: &str, result: Result<PassOutcome, IndexerError>) -> Result<()> {
    match result {
        Ok(_) => Ok(()),
        Err(e) if e.is_fatal() => {
            error!(pass, error = %e, "fatal error, stopping");
            Err(anyhow!(e).context(format!("{pass} pass halted")))
        }
        Err(e) => {
            error!(pass, error = %e, "pass failed, retrying on next tick");
            Ok(())
        }
    }
}

async fn cmd_status(db: &str) -> Result<()> {
    let storage = open_storage(db).await?;
    let scan = storage.load(CursorKind::Scan).await?;
    let replay = storage.load(CursorKind::Replay).await?;

    let status = json!({
        "scan_cursor": scan.map(|c| c.position),
        "replay_cursor": replay.map(|c| c.position),
        "raw_events": storage.count().await?,
        "tiles": storage.tile_count().await?,
    });
    println!("{}", serde_json::to_string_pretty(&status)?);
    Ok(())
}

async fn cmd_tile(db: &str, id: u32) -> Result<()> {
    let storage = open_storage(db).await?;
    let tile = storage
        .tile(id)
        .await?
        .ok_or_else(|| anyhow!("tile {id} does not exist (has replay run?)"))?;

    let mut history = serde_json::Map::new();
    for kind in [
        HistoryKind::Data,
        HistoryKind::Purchase,
        HistoryKind::Wrap,
        HistoryKind::Transfer,
    ] {
        let rows = storage.history(id, kind).await?;
        history.insert(kind.to_string(), serde_json::to_value(rows)?);
    }

    let report = json!({ "tile": tile, "history": history });
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}

fn cmd_info(config: &IndexerConfig) -> Result<()> {
    println!("TileIndex v{}", env!("CARGO_PKG_VERSION"));
    println!();
    println!("Configuration:");
    println!("  RPC endpoint:        {}", config.rpc_url);
    println!("  Primary contract:    {}", config.contracts.primary);
    println!("  Wrapper contract:    {}", config.contracts.wrapper);
    println!("  Deployer:            {}", config.contracts.deployer);
    println!("  Start block:         {}", config.start_block);
    println!("  Confirmation depth:  {}", config.confirmation_depth);
    println!("  Scan window:         {} blocks", config.batch_size);
    match config.dead_zone {
        Some(zone) => println!("  Dead zone:           [{}, {})", zone.start, zone.resume_at),
        None => println!("  Dead zone:           none"),
    }
    println!("  Tiles:               {} at {} ETH", config.tile_count, config.initial_price);
    println!("  Poll interval:       {} ms", config.poll_interval_ms);
    Ok(())
}
