//! `batchq`: run a batch of URLs through the engine from the command line.

mod simulate;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use actors::{BatchEngine, StartBatchRequest};
use anyhow::{Context, Result, bail};
use batch_core::{EngineConfig, Priority};
use clap::{Parser, Subcommand};
use db::{DbConfig, MemoryStore, StateStore, SurrealStore};
use tracing_subscriber::EnvFilter;

use crate::simulate::SimulatedAnalyzer;

#[derive(Parser, Debug)]
#[command(name = "batchq")]
#[command(about = "Priority batch queue with bounded-concurrency item analysis")]
#[command(version)]
struct Args {
    /// Engine configuration file (JSON); defaults to $BATCHQ_CONFIG
    #[arg(long, short = 'c', global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the URLs in a file (one per line) as a single batch
    Run {
        /// File with one URL per line; blank lines and `#` comments are skipped
        file: PathBuf,
        /// Batch name
        #[arg(long, default_value = "cli batch")]
        name: String,
        /// LOW, NORMAL, HIGH or URGENT
        #[arg(long, short = 'p', default_value = "NORMAL")]
        priority: String,
        /// Items analyzed at once
        #[arg(long, short = 'b')]
        batch_size: Option<usize>,
        /// Per-item timeout in milliseconds
        #[arg(long)]
        timeout_ms: Option<u64>,
        /// Retries per failed item
        #[arg(long)]
        retries: Option<u32>,
        /// Simulated analysis time per item in milliseconds
        #[arg(long, default_value = "50")]
        delay_ms: u64,
        /// Items whose URL contains this text fail
        #[arg(long)]
        fail_marker: Option<String>,
        /// SurrealDB endpoint (e.g. mem://, rocksdb://data); in-process maps when unset
        #[arg(long)]
        db: Option<String>,
        /// Also print every item record
        #[arg(long)]
        items: bool,
        /// Give up waiting after this many seconds
        #[arg(long, default_value = "600")]
        wait_secs: u64,
    },
    /// Print the effective configuration as JSON
    Config,
}

fn load_config(path: Option<&PathBuf>) -> Result<EngineConfig> {
    let config = match path {
        Some(path) => EngineConfig::from_file(path)?,
        None => EngineConfig::from_env()?,
    };
    Ok(config)
}

fn read_urls(file: &PathBuf) -> Result<Vec<String>> {
    let raw = std::fs::read_to_string(file)
        .with_context(|| format!("reading {}", file.display()))?;
    Ok(raw
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .map(String::from)
        .collect())
}

async fn open_store(endpoint: Option<String>) -> Result<Arc<dyn StateStore>> {
    let Some(endpoint) = endpoint else {
        return Ok(Arc::new(MemoryStore::new()));
    };
    let config = DbConfig {
        endpoint,
        ..DbConfig::default()
    };
    let store = SurrealStore::connect(&config)
        .await
        .with_context(|| format!("connecting to {}", config.endpoint))?;
    Ok(Arc::new(store))
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();
    let config = load_config(args.config.as_ref())?;

    match args.command {
        Command::Config => {
            println!("{}", serde_json::to_string_pretty(&config)?);
        }
        Command::Run {
            file,
            name,
            priority,
            batch_size,
            timeout_ms,
            retries,
            delay_ms,
            fail_marker,
            db,
            items,
            wait_secs,
        } => {
            let Some(priority) = Priority::parse(&priority) else {
                bail!("unknown priority '{priority}'");
            };
            let urls = read_urls(&file)?;

            let store = open_store(db).await?;
            let analyzer = SimulatedAnalyzer::new(Duration::from_millis(delay_ms), fail_marker);
            let engine = BatchEngine::start(config, store, Arc::new(analyzer)).await?;

            let mut request = StartBatchRequest::new(name, urls).with_priority(priority);
            if let Some(batch_size) = batch_size {
                request = request.with_batch_size(batch_size);
            }
            if let Some(timeout_ms) = timeout_ms {
                request = request.with_item_timeout(Duration::from_millis(timeout_ms));
            }
            if let Some(retries) = retries {
                request = request.with_max_retries(retries);
            }

            let job_id = engine.start_batch(request).await?;
            tracing::info!("Submitted job {}", job_id);

            let progress = engine
                .wait_for_job(job_id, Duration::from_secs(wait_secs))
                .await?;
            println!("{}", serde_json::to_string_pretty(&progress)?);

            if items {
                let records = engine.job_items(job_id).await?;
                println!("{}", serde_json::to_string_pretty(&records)?);
            }

            engine.shutdown().await?;
        }
    }

    Ok(())
}
