//! The two-stage enrichment pipeline.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────┐   RawEvent    ┌──────────────┐
//! │ RangeScanner │──────────────▶│  FetchPool   │  N concurrent fetches
//! └──────┬───────┘               └──────┬───────┘
//!        │ PendingRecord (same handle)  │ resolves
//!        ▼                              ▼
//! ┌──────────────┐  awaits in    ┌──────────────┐
//! │OrderedWriter │──────────────▶│  JsonlSink   │  one record per line
//! └──────────────┘  submit order └──────────────┘
//! ```
//!
//! The scanner submits each discovered event to the fetch pool and hands
//! the resulting handle to the ordered writer. Enrichment runs N-wide and
//! finishes in any order; the writer awaits handles strictly in submission
//! order, so the sink sees records in exact discovery order. When the
//! pool's backlog grows past a threshold the scanner pauses, which is the
//! only coupling back to the source.
//!
//! [`Pipeline`] owns both stages and runs the whole thing to drain.

mod fetch;
mod sink;
mod writer;

pub use fetch::{FetchPool, PendingRecord};
pub use sink::{JsonlSink, SinkConfig, SinkStats};
pub use writer::{OrderedWriter, WriteStats};

use crate::enrich::Enrich;
use crate::scan::{RangeScanner, ScanConfig, ScanStats};
use crate::source::EventSource;
use crate::Result;
use chrono::{DateTime, Utc};
use metrics::gauge;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use tracing::info;

/// Configuration for the assembled pipeline.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// Maximum concurrent enrichment fetches.
    /// Default: 200
    pub fetch_concurrency: usize,

    /// Scanner configuration (paging, backpressure, failure policy).
    pub scan: ScanConfig,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            fetch_concurrency: 200,
            scan: ScanConfig::default(),
        }
    }
}

/// Statistics from a completed pipeline run.
#[derive(Debug, Clone)]
pub struct RunStats {
    /// Scanner-side counters.
    pub scan: ScanStats,

    /// Writer-side counters.
    pub write: WriteStats,

    /// Bytes appended to the sink (before compression).
    pub bytes_written: usize,

    /// When the run started.
    pub started_at: DateTime<Utc>,

    /// When the run finished draining.
    pub finished_at: DateTime<Utc>,
}

impl RunStats {
    /// Wall-clock duration of the run.
    pub fn duration(&self) -> chrono::Duration {
        self.finished_at - self.started_at
    }
}

/// Owns the fetch pool, the ordered writer, and the scanner, and runs one
/// position range to full drain.
pub struct Pipeline {
    source: Arc<dyn EventSource>,
    pool: FetchPool,
    writer: OrderedWriter,
    sink: Arc<JsonlSink>,
    scanner: RangeScanner,
}

impl Pipeline {
    /// Wire up a pipeline. Workers and the writer task start immediately
    /// and idle until [`run`](Self::run) feeds them.
    pub fn new(
        source: Arc<dyn EventSource>,
        enricher: Arc<dyn Enrich>,
        sink: JsonlSink,
        config: PipelineConfig,
    ) -> Self {
        let sink = Arc::new(sink);
        Self {
            source,
            pool: FetchPool::spawn(enricher, config.fetch_concurrency),
            writer: OrderedWriter::spawn(Arc::clone(&sink)),
            sink,
            scanner: RangeScanner::new(config.scan),
        }
    }

    /// Stop submitting new sub-ranges once the flag is set; in-flight work
    /// still drains.
    pub fn with_stop_flag(mut self, stop: Arc<AtomicBool>) -> Self {
        self.scanner = self.scanner.with_stop_flag(stop);
        self
    }

    /// Scan `[from, to)`, enrich, and write, returning once both stages
    /// have fully drained.
    pub async fn run(mut self, from: u64, to: u64) -> Result<RunStats> {
        let started_at = Utc::now();
        gauge!("scan_running").set(1.0);
        info!(
            "Pipeline starting: source={}, blocks {}-{}",
            self.source.name(),
            from,
            to
        );

        let scan_result = self
            .scanner
            .run(self.source.as_ref(), &self.pool, &self.writer, from, to)
            .await;

        // Drain both stages even when the scan errored out, so every
        // already-submitted event still reaches the sink.
        self.pool.close();
        self.writer.close();
        info!(
            "Scan done; draining {} pending fetches",
            self.pool.pending()
        );
        self.pool.join().await;
        let write = self.writer.join().await;
        gauge!("scan_running").set(0.0);

        let scan = scan_result?;
        let sink_stats = self.sink.stats();

        Ok(RunStats {
            scan,
            write,
            bytes_written: sink_stats.bytes_written,
            started_at,
            finished_at: Utc::now(),
        })
    }
}
