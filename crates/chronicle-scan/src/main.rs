//! Chronicle scanner daemon.
//!
//! Scans a contract's event log over JSON-RPC and writes an ordered JSON
//! Lines archive, enriching each event by fetching its content URI.
//!
//! # Usage
//!
//! ```bash
//! # Scan from genesis to the current head
//! chronicle-scan \
//!     --endpoint https://polygon-rpc.com \
//!     --contract 0xDb46d1Dc155634FbC732f92E853b10B288AD5a1d \
//!     --abi ./abi/LensHub.json \
//!     --output lens-events.jsonl
//!
//! # Bounded range with compressed output
//! chronicle-scan --from-block 28384641 --to-block 28500000 --compress ...
//! ```
//!
//! # Graceful Shutdown
//!
//! SIGINT (Ctrl+C) stops the scanner from starting new block ranges; all
//! events already submitted are still enriched and written before exit.

use anyhow::{Context, Result};
use alloy_json_abi::JsonAbi;
use alloy_primitives::Address;
use chronicle_core::metrics::{init_metrics, start_metrics_server};
use chronicle_scan::{
    ContentFetcher, EthConfig, EthLogSource, EventSource, FetchConfig, JsonlSink, Pipeline,
    PipelineConfig, RangeFailurePolicy, ScanConfig, SinkConfig,
};
use clap::Parser;
use std::fs;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

/// Chronicle scanner daemon.
#[derive(Parser, Debug)]
#[command(name = "chronicle-scan")]
#[command(about = "Contract event-log scanner and enrichment archiver")]
#[command(version)]
struct Args {
    /// JSON-RPC provider endpoint
    #[arg(long, env = "PROVIDER_ENDPOINT")]
    endpoint: String,

    /// Address of the contract to scan
    #[arg(long, env = "CONTRACT_ADDRESS")]
    contract: Address,

    /// Path to the contract ABI JSON
    #[arg(long, env = "CONTRACT_ABI", default_value = "abi/contract.json")]
    abi: PathBuf,

    /// First block to scan
    #[arg(long, env = "FROM_BLOCK", default_value = "0")]
    from_block: u64,

    /// End of the scan range (exclusive); defaults to the chain head at startup
    #[arg(long, env = "TO_BLOCK")]
    to_block: Option<u64>,

    /// Output path for the JSONL archive
    #[arg(long, short, env = "OUTPUT_PATH", default_value = "output.jsonl")]
    output: PathBuf,

    /// Gzip the output stream
    #[arg(long)]
    compress: bool,

    /// Blocks per event-log request
    #[arg(long, default_value = "2000")]
    page_size: u64,

    /// Maximum concurrent content fetches
    #[arg(long, default_value = "200")]
    fetch_concurrency: usize,

    /// Fetch backlog at which scanning pauses
    #[arg(long, default_value = "2000")]
    backlog_threshold: usize,

    /// Seconds between backlog re-checks while paused
    #[arg(long, default_value = "10")]
    backoff_seconds: u64,

    /// Per-request timeout in seconds (RPC and content fetches)
    #[arg(long, default_value = "30")]
    request_timeout: u64,

    /// What to do when a block range read fails: skip, abort, or retry:N
    #[arg(long, default_value = "skip")]
    on_range_failure: RangeFailurePolicy,

    /// Metrics HTTP server port (0 to disable)
    #[arg(long, default_value = "9090")]
    metrics_port: u16,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::from_default_env()
                .add_directive("info".parse().unwrap())
                .add_directive("chronicle_scan=debug".parse().unwrap()),
        )
        .init();

    let args = Args::parse();

    tracing::info!("Chronicle scanner starting...");

    // Initialize metrics
    if args.metrics_port > 0 {
        let metrics_handle = init_metrics();
        start_metrics_server(args.metrics_port, metrics_handle).await?;
    }

    // Set up graceful shutdown
    let stop = Arc::new(AtomicBool::new(false));
    let stop_flag = Arc::clone(&stop);

    ctrlc::set_handler(move || {
        tracing::info!("Shutdown signal received; draining in-flight work...");
        stop_flag.store(true, Ordering::SeqCst);
    })
    .context("Failed to set Ctrl+C handler")?;

    // Load the contract ABI
    let abi_json = fs::read_to_string(&args.abi)
        .with_context(|| format!("Failed to read ABI at {}", args.abi.display()))?;
    let abi: JsonAbi =
        serde_json::from_str(&abi_json).context("Failed to parse contract ABI")?;

    let request_timeout = Duration::from_secs(args.request_timeout);

    // Build pipeline collaborators
    let source = Arc::new(EthLogSource::new(
        EthConfig {
            endpoint: args.endpoint.clone(),
            contract: args.contract,
            request_timeout,
        },
        &abi,
    )?);
    let fetcher = Arc::new(ContentFetcher::new(FetchConfig { request_timeout })?);
    let sink = JsonlSink::create(SinkConfig {
        path: args.output.clone(),
        compress: args.compress,
    })?;

    // Bound the scan at the current head unless an end was given
    let to_block = match args.to_block {
        Some(to) => to,
        None => source
            .head_position()
            .await
            .context("Failed to query chain head")?,
    };

    tracing::info!("Configuration:");
    tracing::info!("  Endpoint:     {}", args.endpoint);
    tracing::info!("  Contract:     {}", args.contract);
    tracing::info!("  Blocks:       {}-{}", args.from_block, to_block);
    tracing::info!("  Output:       {} (compress={})", args.output.display(), args.compress);
    tracing::info!("  Page size:    {}", args.page_size);
    tracing::info!("  Concurrency:  {}", args.fetch_concurrency);
    tracing::info!("  Backlog:      {}", args.backlog_threshold);
    tracing::info!("  On failure:   {:?}", args.on_range_failure);

    let config = PipelineConfig {
        fetch_concurrency: args.fetch_concurrency,
        scan: ScanConfig {
            page_size: args.page_size,
            backlog_threshold: args.backlog_threshold,
            backoff_interval: Duration::from_secs(args.backoff_seconds),
            on_range_failure: args.on_range_failure,
            ..Default::default()
        },
    };

    let pipeline = Pipeline::new(source, fetcher, sink, config).with_stop_flag(stop);
    let stats = pipeline.run(args.from_block, to_block).await?;

    // Print summary
    tracing::info!("═══════════════════════════════════════════════════════");
    tracing::info!("RUN COMPLETE");
    tracing::info!("═══════════════════════════════════════════════════════");
    tracing::info!("Ranges scanned:       {}", stats.scan.ranges_scanned);
    tracing::info!("Ranges failed:        {}", stats.scan.ranges_failed);
    tracing::info!("Events discovered:    {}", stats.scan.events_discovered);
    tracing::info!("Events skipped:       {}", stats.scan.events_skipped);
    tracing::info!("Records written:      {}", stats.write.records_written);
    tracing::info!("Write errors:         {}", stats.write.write_errors);
    tracing::info!("Bytes written:        {}", stats.bytes_written);
    tracing::info!("Duration:             {}s", stats.duration().num_seconds());

    Ok(())
}
