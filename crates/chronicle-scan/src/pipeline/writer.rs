//! Strictly ordered record writer.
//!
//! A single consumer task receives [`PendingRecord`] handles in the exact
//! order the scanner discovered their events, awaits each handle in turn,
//! and appends the resolved record to the sink before touching the next
//! handle. Enrichment may complete in any order; the one-at-a-time await
//! is what makes the sink order equal the discovery order.
//!
//! A slow fetch at position k holds back every record after k.
//! Throughput is the fetch pool's job; ordering is this module's.

use super::fetch::PendingRecord;
use super::sink::JsonlSink;
use crate::{Error, Result};
use metrics::counter;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

/// Counters from a completed writer run.
#[derive(Debug, Clone, Default)]
pub struct WriteStats {
    /// Records appended to the sink.
    pub records_written: usize,

    /// Records lost to serialization or append errors.
    pub write_errors: usize,

    /// Handles that closed without ever resolving.
    pub unresolved_handles: usize,
}

/// Single-concurrency writer consuming handles in submission order.
pub struct OrderedWriter {
    queue: Option<mpsc::UnboundedSender<PendingRecord>>,
    task: JoinHandle<WriteStats>,
}

impl OrderedWriter {
    /// Spawn the writer task over the given sink.
    pub fn spawn(sink: Arc<JsonlSink>) -> Self {
        let (queue, rx) = mpsc::unbounded_channel();
        let task = tokio::spawn(write_loop(rx, sink));
        Self {
            queue: Some(queue),
            task,
        }
    }

    /// Hand the writer the next handle, in discovery order.
    pub fn submit(&self, handle: PendingRecord) -> Result<()> {
        let queue = self.queue.as_ref().ok_or(Error::ChannelClosed)?;
        queue.send(handle).map_err(|_| Error::ChannelClosed)
    }

    /// Stop accepting submissions. Queued handles are still written.
    pub fn close(&mut self) {
        self.queue.take();
    }

    /// Wait for every submitted handle to be resolved and written.
    ///
    /// Implies [`close`](Self::close).
    pub async fn join(mut self) -> WriteStats {
        self.queue.take();
        match self.task.await {
            Ok(stats) => stats,
            Err(e) => {
                warn!("Writer task panicked: {}", e);
                WriteStats::default()
            }
        }
    }
}

async fn write_loop(
    mut rx: mpsc::UnboundedReceiver<PendingRecord>,
    sink: Arc<JsonlSink>,
) -> WriteStats {
    let mut stats = WriteStats::default();

    while let Some(handle) = rx.recv().await {
        match handle.resolve().await {
            Some(record) => match sink.append(&record) {
                Ok(()) => {
                    stats.records_written += 1;
                    counter!("write_records_total").increment(1);
                }
                Err(e) => {
                    // The record is lost; later records still get written.
                    warn!(
                        "Failed to append record {}: {}",
                        record.order_index(),
                        e
                    );
                    stats.write_errors += 1;
                    counter!("write_errors_total").increment(1);
                }
            },
            None => {
                warn!("Enrichment handle closed without a result; skipping");
                stats.unresolved_handles += 1;
                counter!("write_unresolved_total").increment(1);
            }
        }
    }

    if let Err(e) = sink.flush() {
        warn!("Failed to flush sink after drain: {}", e);
    }
    debug!(
        "Writer drained: {} written, {} errors, {} unresolved",
        stats.records_written, stats.write_errors, stats.unresolved_handles
    );

    stats
}
