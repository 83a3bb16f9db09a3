//! Historical ingestion CLI.
//!
//! Exits non-zero on fatal error; SIGINT/SIGTERM cancel the in-flight job
//! through its row so the next chunk boundary stops cleanly.

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use vela_ingest::{
    GapDetector, HistoricalIngestor, IngestorConfig, MockExchangeClient,
};
use vela_storage::{CandleStore, MetadataStore};
use vela_types::{Pair, Timeframe, Venue};

#[derive(Debug, Parser)]
#[command(name = "vela-ingest", about = "Backfill and repair historical candle data")]
struct Cli {
    /// Candle store base directory
    #[arg(long, default_value = "./data/candles")]
    data_dir: PathBuf,

    /// Metadata database path
    #[arg(long, default_value = "./data/vela-meta.db")]
    meta_db: PathBuf,

    /// Exchange to fetch from
    #[arg(long, default_value = "kraken")]
    exchange: Venue,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Backfill a date range
    Ingest {
        pair: Pair,
        timeframe: Timeframe,
        /// Start, ms since epoch
        start: i64,
        /// End (exclusive), ms since epoch
        end: i64,
    },
    /// Detect gaps in a stored series
    Gaps { pair: Pair, timeframe: Timeframe },
    /// Re-ingest all open gaps
    Repair { pair: Pair, timeframe: Timeframe },
}

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    match run(Cli::parse()).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("fatal: {e:#}");
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    let store = Arc::new(CandleStore::new(&cli.data_dir));
    let metadata =
        Arc::new(MetadataStore::open(&cli.meta_db).context("opening metadata store")?);

    let config = IngestorConfig { exchange: cli.exchange, ..Default::default() };
    let client = Arc::new(MockExchangeClient::new(
        cli.exchange,
        chrono::Utc::now().timestamp_millis(),
    ));
    let ingestor = Arc::new(HistoricalIngestor::new(config, client, store, Arc::clone(&metadata)));

    match cli.command {
        Command::Ingest { pair, timeframe, start, end } => {
            let job_handle = {
                let ingestor = Arc::clone(&ingestor);
                let pair = pair.clone();
                tokio::spawn(async move { ingestor.ingest(&pair, timeframe, start, end, 1).await })
            };

            // SIGINT/SIGTERM mark the running job cancelled; the chunk loop
            // notices at its next boundary and the store stays consistent.
            let result = tokio::select! {
                result = job_handle => result.context("ingestion task panicked")?,
                _ = shutdown_signal() => {
                    info!("shutdown requested, cancelling running jobs");
                    for job in metadata.jobs_with_status(vela_types::JobStatus::Running)? {
                        metadata.cancel_job(job.id)?;
                    }
                    anyhow::bail!("interrupted");
                }
            };
            let job = result.context("ingestion failed")?;
            info!(job = %job.id, stored = job.candles_stored, "done");
        }
        Command::Gaps { pair, timeframe } => {
            let detector = GapDetector::new(Arc::clone(&ingestor), cli.exchange);
            let gaps = detector.detect_gaps(&pair, timeframe)?;
            for gap in &gaps {
                info!(start = gap.gap_start, end = gap.gap_end, reason = %gap.reason, "gap");
            }
            info!(count = gaps.len(), "open gaps");
        }
        Command::Repair { pair, timeframe } => {
            let detector = GapDetector::new(Arc::clone(&ingestor), cli.exchange);
            detector.detect_gaps(&pair, timeframe)?;
            let repaired = detector.repair_gaps(&pair, timeframe).await?;
            info!(repaired, "gap repair finished");
        }
    }
    Ok(())
}

async fn shutdown_signal() {
    use tokio::signal::unix::{signal, SignalKind};
    let mut term = signal(SignalKind::terminate()).expect("signal handler");
    tokio::select! {
        _ = tokio::signal::ctrl_c() => {}
        _ = term.recv() => {}
    }
}
