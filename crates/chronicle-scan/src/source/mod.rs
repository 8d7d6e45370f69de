//! Event source adapters.
//!
//! An event source exposes a position-ordered event log that the range
//! scanner pages through in fixed-size sub-ranges. The production adapter
//! ([`EthLogSource`]) reads an EVM contract's logs over JSON-RPC; tests use
//! in-memory sources.

mod eth;

pub use eth::{EthConfig, EthLogSource};

use crate::Result;
use async_trait::async_trait;
use serde_json::{Map, Value};

/// A position-ordered source of contract events.
///
/// Implementations are responsible for reading raw log entries from their
/// backing store and decoding them into named fields. Entries whose event
/// type cannot be recognized are returned with `name: None`; the scanner
/// discards them without assigning an order index.
#[async_trait]
pub trait EventSource: Send + Sync {
    /// Human-readable name for this source (used in logs).
    fn name(&self) -> &'static str;

    /// The source's current head position.
    ///
    /// Queried once at startup to bound the scan when no explicit end
    /// position is configured.
    async fn head_position(&self) -> Result<u64>;

    /// All events in the half-open position range `[from, to)`, in the
    /// source's canonical order.
    ///
    /// A failed call covers the whole sub-range; the scanner's failure
    /// policy decides whether it is skipped, retried, or fatal.
    async fn events_in_range(&self, from: u64, to: u64) -> Result<Vec<SourceEntry>>;
}

/// One log entry returned by an event source.
#[derive(Debug, Clone)]
pub struct SourceEntry {
    /// Block the entry was emitted in.
    pub block_number: u64,

    /// Hash of the emitting transaction (0x-prefixed hex).
    pub transaction_hash: String,

    /// Index of the transaction within its block.
    pub transaction_index: u64,

    /// Index of the log within its block.
    pub log_index: u64,

    /// Decoded event type name; `None` when the entry did not match any
    /// known event (anonymous log or unknown signature).
    pub name: Option<String>,

    /// Decoded named parameters. Empty for unrecognized entries.
    pub fields: Map<String, Value>,
}

#[cfg(test)]
pub(crate) mod testing {
    //! In-memory event source for pipeline tests.

    use super::*;
    use std::collections::HashSet;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Serves pre-built entries bucketed by block number, optionally failing
    /// specific sub-ranges. Tracks how many range reads were issued so tests
    /// can observe backpressure.
    pub struct StaticSource {
        entries: Vec<SourceEntry>,
        failing_ranges: HashSet<u64>,
        calls: AtomicUsize,
        // Remaining reads of failing ranges that actually fail;
        // usize::MAX means fail forever.
        fail_budget: AtomicUsize,
    }

    impl StaticSource {
        pub fn new(entries: Vec<SourceEntry>) -> Self {
            Self {
                entries,
                failing_ranges: HashSet::new(),
                calls: AtomicUsize::new(0),
                fail_budget: AtomicUsize::new(usize::MAX),
            }
        }

        /// Make every read of the sub-range starting at `from` fail.
        pub fn fail_range_at(mut self, from: u64) -> Self {
            self.failing_ranges.insert(from);
            self
        }

        /// Make only the first `n` reads of failing ranges actually fail
        /// (for retry tests).
        pub fn with_failure_budget(self, n: usize) -> Self {
            self.fail_budget.store(n, Ordering::SeqCst);
            self
        }

        pub fn range_reads(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }

        /// A recognized entry at the given block, with an `i` field for
        /// identification in output assertions.
        pub fn entry(block: u64) -> SourceEntry {
            let mut fields = Map::new();
            fields.insert("i".to_string(), Value::from(block));
            SourceEntry {
                block_number: block,
                transaction_hash: format!("0x{block:064x}"),
                transaction_index: 0,
                log_index: 0,
                name: Some("Recorded".to_string()),
                fields,
            }
        }

        /// An entry the scanner should discard.
        pub fn unrecognized_entry(block: u64) -> SourceEntry {
            SourceEntry {
                block_number: block,
                transaction_hash: format!("0x{block:064x}"),
                transaction_index: 0,
                log_index: 1,
                name: None,
                fields: Map::new(),
            }
        }
    }

    #[async_trait]
    impl EventSource for StaticSource {
        fn name(&self) -> &'static str {
            "static"
        }

        async fn head_position(&self) -> Result<u64> {
            Ok(self
                .entries
                .iter()
                .map(|e| e.block_number + 1)
                .max()
                .unwrap_or(0))
        }

        async fn events_in_range(&self, from: u64, to: u64) -> Result<Vec<SourceEntry>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.failing_ranges.contains(&from) {
                let should_fail = self.fail_budget.load(Ordering::SeqCst) == usize::MAX
                    || self
                        .fail_budget
                        .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                        .is_ok();
                if should_fail {
                    return Err(crate::Error::Rpc {
                        code: -32000,
                        message: format!("injected failure for blocks {from}-{to}"),
                    });
                }
            }
            Ok(self
                .entries
                .iter()
                .filter(|e| e.block_number >= from && e.block_number < to)
                .cloned()
                .collect())
        }
    }
}
