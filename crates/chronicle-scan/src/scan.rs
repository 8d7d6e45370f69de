//! Range scanner driving the pipeline.
//!
//! The scanner pages through the event source in fixed-size block
//! sub-ranges. Every recognized event is assigned the next discovery-order
//! index and submitted twice with a single pending handle: once to the
//! fetch pool (which resolves the handle) and once to the ordered writer
//! (which awaits it). Unrecognized entries are discarded before an index
//! is assigned.
//!
//! After each sub-range the scanner checks the fetch pool's backlog and
//! suspends until it falls below the configured threshold, which is the
//! pipeline's only flow control toward the upstream source.

use crate::pipeline::{FetchPool, OrderedWriter};
use crate::source::EventSource;
use crate::{Error, Result};
use chronicle_core::RawEvent;
use metrics::counter;
use std::str::FromStr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// What to do when a sub-range read fails.
///
/// The source's events for that sub-range are unavailable either way once
/// the policy gives up; `Skip` and exhausted `Retry` leave a permanent gap
/// in the archive, visible in the run stats.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RangeFailurePolicy {
    /// Log the failure and move on to the next sub-range.
    Skip,

    /// Retry the sub-range up to N more times, then skip it.
    Retry(u32),

    /// Fail the whole run.
    Abort,
}

impl Default for RangeFailurePolicy {
    fn default() -> Self {
        Self::Skip
    }
}

impl FromStr for RangeFailurePolicy {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "skip" => Ok(Self::Skip),
            "abort" => Ok(Self::Abort),
            other => match other.strip_prefix("retry:") {
                Some(n) => n
                    .parse::<u32>()
                    .map(Self::Retry)
                    .map_err(|_| format!("invalid retry count in '{other}'")),
                None => Err(format!(
                    "unknown policy '{other}' (expected skip, abort, or retry:N)"
                )),
            },
        }
    }
}

/// Configuration for the range scanner.
#[derive(Debug, Clone)]
pub struct ScanConfig {
    /// Blocks per sub-range request.
    /// Default: 2000
    pub page_size: u64,

    /// Fetch-pool backlog at which scanning pauses.
    /// Default: 2000
    pub backlog_threshold: usize,

    /// Re-check interval while paused on backpressure.
    /// Default: 10s
    pub backoff_interval: Duration,

    /// Sub-range read failure policy.
    pub on_range_failure: RangeFailurePolicy,

    /// Log progress at info level every this many discovered events.
    /// Default: 10000
    pub progress_interval: u64,
}

impl Default for ScanConfig {
    fn default() -> Self {
        Self {
            page_size: 2000,
            backlog_threshold: 2000,
            backoff_interval: Duration::from_secs(10),
            on_range_failure: RangeFailurePolicy::default(),
            progress_interval: 10_000,
        }
    }
}

/// Statistics from a completed scan.
#[derive(Debug, Clone, Default)]
pub struct ScanStats {
    /// Sub-ranges read successfully.
    pub ranges_scanned: u64,

    /// Sub-ranges whose events were permanently skipped.
    pub ranges_failed: u64,

    /// Recognized events submitted to the pipeline.
    pub events_discovered: u64,

    /// Entries discarded for an unrecognized event type.
    pub events_skipped: u64,
}

/// Pages through the event source and feeds the pipeline.
pub struct RangeScanner {
    config: ScanConfig,
    stop: Arc<AtomicBool>,
}

impl RangeScanner {
    /// Create a scanner with the given configuration.
    pub fn new(config: ScanConfig) -> Self {
        Self {
            config,
            stop: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Use an external stop flag; the scanner stops submitting new
    /// sub-ranges once it is set.
    pub fn with_stop_flag(mut self, stop: Arc<AtomicBool>) -> Self {
        self.stop = stop;
        self
    }

    /// Scan `[from, to)` and submit every recognized event, in discovery
    /// order, to the fetch pool and the ordered writer.
    pub async fn run(
        &self,
        source: &dyn EventSource,
        pool: &FetchPool,
        writer: &OrderedWriter,
        from: u64,
        to: u64,
    ) -> Result<ScanStats> {
        let mut stats = ScanStats::default();
        let mut next_index = 0u64;

        let mut start = from;
        while start < to {
            if self.stop.load(Ordering::SeqCst) {
                info!("Stop requested; ending scan at block {}", start);
                break;
            }

            let end = start.saturating_add(self.config.page_size).min(to);
            debug!("Scanning blocks {}-{}", start, end - 1);

            match self.read_range(source, start, end).await {
                Ok(entries) => {
                    stats.ranges_scanned += 1;
                    counter!("scan_ranges_total").increment(1);

                    for entry in entries {
                        let Some(name) = entry.name else {
                            stats.events_skipped += 1;
                            counter!("scan_events_skipped_total").increment(1);
                            continue;
                        };

                        let event = RawEvent {
                            order_index: next_index,
                            block_number: entry.block_number,
                            transaction_hash: entry.transaction_hash,
                            transaction_index: entry.transaction_index,
                            name,
                            fields: entry.fields,
                        };
                        next_index += 1;
                        stats.events_discovered += 1;
                        counter!("scan_events_discovered_total").increment(1);

                        // Same handle to both stages: the pool resolves it,
                        // the writer awaits it.
                        let handle = pool.submit(event);
                        writer.submit(handle)?;

                        if stats.events_discovered % self.config.progress_interval == 0 {
                            info!(
                                "Progress: {} events discovered, {} skipped, fetch backlog {}",
                                stats.events_discovered,
                                stats.events_skipped,
                                pool.pending()
                            );
                        }
                    }
                }
                Err(e) => {
                    if self.config.on_range_failure == RangeFailurePolicy::Abort {
                        return Err(Error::RangeAborted {
                            from: start,
                            to: end - 1,
                            source: Box::new(e),
                        });
                    }
                    // Skipped events are gone for good; make the gap loud.
                    error!("Failed to scan blocks {}-{}: {}", start, end - 1, e);
                    stats.ranges_failed += 1;
                    counter!("scan_range_failures_total").increment(1);
                }
            }

            if pool.pending() >= self.config.backlog_threshold {
                debug!(
                    "Pausing scan: fetch backlog at {} (threshold {})",
                    pool.pending(),
                    self.config.backlog_threshold
                );
                counter!("scan_backpressure_pauses_total").increment(1);
                pool.wait_while_backlogged(
                    self.config.backlog_threshold,
                    self.config.backoff_interval,
                )
                .await;
            }

            start = end;
        }

        info!(
            "Scan finished: {} ranges ({} failed), {} events discovered, {} skipped",
            stats.ranges_scanned, stats.ranges_failed, stats.events_discovered, stats.events_skipped
        );
        Ok(stats)
    }

    /// Read one sub-range, applying the retry policy.
    async fn read_range(
        &self,
        source: &dyn EventSource,
        from: u64,
        to: u64,
    ) -> Result<Vec<crate::source::SourceEntry>> {
        let attempts = match self.config.on_range_failure {
            RangeFailurePolicy::Retry(extra) => extra as u64 + 1,
            _ => 1,
        };

        let mut attempt = 0;
        loop {
            match source.events_in_range(from, to).await {
                Ok(entries) => return Ok(entries),
                Err(e) => {
                    attempt += 1;
                    if attempt >= attempts {
                        return Err(e);
                    }
                    warn!(
                        "Retrying blocks {}-{} (attempt {}/{}): {}",
                        from,
                        to - 1,
                        attempt + 1,
                        attempts,
                        e
                    );
                }
            }
        }
    }
}
