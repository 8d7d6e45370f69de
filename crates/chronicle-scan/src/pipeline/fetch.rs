//! Bounded-concurrency fetch pool.
//!
//! The pool runs at most N enrichment fetches at a time. Submission never
//! blocks: excess work queues on an unbounded channel shared by the
//! workers, and the caller gets back a [`PendingRecord`] handle that
//! resolves when its fetch completes. The pending count (queued plus
//! in-flight) drives the scanner's backpressure.

use crate::enrich::Enrich;
use async_channel::{Receiver, Sender};
use chronicle_core::{EnrichedRecord, RawEvent};
use metrics::{counter, gauge};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{oneshot, Notify};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

/// Handle to an enrichment result that may not have resolved yet.
///
/// Consumed exactly once, by awaiting it in submission order.
pub struct PendingRecord {
    rx: oneshot::Receiver<EnrichedRecord>,
}

impl PendingRecord {
    pub(crate) fn new(rx: oneshot::Receiver<EnrichedRecord>) -> Self {
        Self { rx }
    }

    /// Wait for the enrichment result.
    ///
    /// Returns `None` if the pool shut down before resolving the handle.
    pub async fn resolve(self) -> Option<EnrichedRecord> {
        self.rx.await.ok()
    }
}

struct FetchJob {
    event: RawEvent,
    resolve: oneshot::Sender<EnrichedRecord>,
}

/// Worker set running enrichment with bounded concurrency.
pub struct FetchPool {
    queue: Sender<FetchJob>,
    pending: Arc<AtomicUsize>,
    drained: Arc<Notify>,
    workers: Vec<JoinHandle<()>>,
}

impl FetchPool {
    /// Spawn `concurrency` workers running the given enricher.
    pub fn spawn(enricher: Arc<dyn Enrich>, concurrency: usize) -> Self {
        let (queue, rx) = async_channel::unbounded::<FetchJob>();
        let pending = Arc::new(AtomicUsize::new(0));
        let drained = Arc::new(Notify::new());

        let workers = (0..concurrency.max(1))
            .map(|worker_id| {
                let rx = rx.clone();
                let enricher = Arc::clone(&enricher);
                let pending = Arc::clone(&pending);
                let drained = Arc::clone(&drained);
                tokio::spawn(worker_loop(worker_id, rx, enricher, pending, drained))
            })
            .collect();

        Self {
            queue,
            pending,
            drained,
            workers,
        }
    }

    /// Enqueue an event for enrichment.
    ///
    /// Never blocks; the returned handle resolves when a worker finishes
    /// the fetch. Submitting to a closed pool yields a handle that never
    /// resolves, which the writer logs as an unresolved record.
    pub fn submit(&self, event: RawEvent) -> PendingRecord {
        let (tx, rx) = oneshot::channel();
        self.pending.fetch_add(1, Ordering::SeqCst);
        gauge!("fetch_pending").set(self.pending.load(Ordering::SeqCst) as f64);

        if self
            .queue
            .try_send(FetchJob {
                event,
                resolve: tx,
            })
            .is_err()
        {
            // Only possible once close() was called.
            self.pending.fetch_sub(1, Ordering::SeqCst);
            warn!("Fetch pool is closed; submission dropped");
        }

        PendingRecord::new(rx)
    }

    /// Items queued or in flight.
    pub fn pending(&self) -> usize {
        self.pending.load(Ordering::SeqCst)
    }

    /// Suspend until the pending count is below `threshold`.
    ///
    /// Waits on a completion notification from the workers; the poll
    /// interval bounds the wait between re-checks in case a notification
    /// slips past between the count check and registering the waiter.
    pub async fn wait_while_backlogged(&self, threshold: usize, poll: Duration) {
        while self.pending() >= threshold {
            let notified = self.drained.notified();
            tokio::select! {
                _ = notified => {}
                _ = tokio::time::sleep(poll) => {}
            }
        }
    }

    /// Stop accepting submissions. Queued work still runs to completion.
    pub fn close(&self) {
        self.queue.close();
    }

    /// Wait for all workers to finish draining the queue.
    ///
    /// Call after [`close`](Self::close), otherwise the workers never exit.
    pub async fn join(self) {
        for worker in self.workers {
            if worker.await.is_err() {
                warn!("Fetch worker panicked");
            }
        }
    }
}

async fn worker_loop(
    worker_id: usize,
    rx: Receiver<FetchJob>,
    enricher: Arc<dyn Enrich>,
    pending: Arc<AtomicUsize>,
    drained: Arc<Notify>,
) {
    while let Ok(FetchJob { event, resolve }) = rx.recv().await {
        let order_index = event.order_index;
        let record = enricher.enrich(event).await;

        if resolve.send(record).is_err() {
            // The writer side is gone; nothing to do with the result.
            warn!(
                "Enrichment result for event {} dropped before it was consumed",
                order_index
            );
            counter!("fetch_dropped_results_total").increment(1);
        }

        let remaining = pending.fetch_sub(1, Ordering::SeqCst) - 1;
        gauge!("fetch_pending").set(remaining as f64);
        drained.notify_waiters();
    }
    debug!("Fetch worker {} exiting", worker_id);
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use tokio::sync::Semaphore;
    use tokio::time::timeout;

    fn test_event(order_index: u64) -> RawEvent {
        RawEvent {
            order_index,
            block_number: order_index,
            transaction_hash: format!("0x{order_index:02x}"),
            transaction_index: 0,
            name: "Recorded".to_string(),
            fields: serde_json::Map::new(),
        }
    }

    /// Enricher that completes immediately.
    struct InstantEnricher;

    #[async_trait]
    impl Enrich for InstantEnricher {
        async fn enrich(&self, event: RawEvent) -> EnrichedRecord {
            EnrichedRecord::base(&event)
        }
    }

    /// Enricher gated on a semaphore; tests add permits to let fetches
    /// finish.
    struct GatedEnricher {
        gate: Arc<Semaphore>,
    }

    #[async_trait]
    impl Enrich for GatedEnricher {
        async fn enrich(&self, event: RawEvent) -> EnrichedRecord {
            let permit = self.gate.acquire().await.unwrap();
            permit.forget();
            EnrichedRecord::base(&event)
        }
    }

    /// Enricher that records the maximum number of concurrent calls.
    struct ConcurrencyProbe {
        active: AtomicUsize,
        max_active: AtomicUsize,
    }

    #[async_trait]
    impl Enrich for ConcurrencyProbe {
        async fn enrich(&self, event: RawEvent) -> EnrichedRecord {
            let now = self.active.fetch_add(1, Ordering::SeqCst) + 1;
            self.max_active.fetch_max(now, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(5)).await;
            self.active.fetch_sub(1, Ordering::SeqCst);
            EnrichedRecord::base(&event)
        }
    }

    #[tokio::test]
    async fn test_submit_resolves_all_handles() {
        let pool = FetchPool::spawn(Arc::new(InstantEnricher), 4);

        let handles: Vec<_> = (0..20).map(|i| pool.submit(test_event(i))).collect();
        for (i, handle) in handles.into_iter().enumerate() {
            let record = handle.resolve().await.expect("handle must resolve");
            assert_eq!(record.order_index(), i as u64);
        }

        pool.close();
        pool.join().await;
    }

    #[tokio::test]
    async fn test_pending_count_drains_to_zero() {
        let pool = FetchPool::spawn(Arc::new(InstantEnricher), 2);

        let handles: Vec<_> = (0..10).map(|i| pool.submit(test_event(i))).collect();
        assert!(pool.pending() > 0);

        for handle in handles {
            handle.resolve().await.unwrap();
        }
        // All resolved handles mean all workers finished their decrements
        pool.wait_while_backlogged(1, Duration::from_millis(5)).await;
        assert_eq!(pool.pending(), 0);

        pool.close();
        pool.join().await;
    }

    #[tokio::test]
    async fn test_concurrency_is_bounded() {
        let probe = Arc::new(ConcurrencyProbe {
            active: AtomicUsize::new(0),
            max_active: AtomicUsize::new(0),
        });
        let pool = FetchPool::spawn(probe.clone(), 3);

        let handles: Vec<_> = (0..30).map(|i| pool.submit(test_event(i))).collect();
        for handle in handles {
            handle.resolve().await.unwrap();
        }

        assert!(probe.max_active.load(Ordering::SeqCst) <= 3);
        pool.close();
        pool.join().await;
    }

    #[tokio::test]
    async fn test_wait_while_backlogged_blocks_until_drained() {
        let gate = Arc::new(Semaphore::new(0));
        let pool = FetchPool::spawn(
            Arc::new(GatedEnricher { gate: gate.clone() }),
            2,
        );

        let _handles: Vec<_> = (0..4).map(|i| pool.submit(test_event(i))).collect();
        assert_eq!(pool.pending(), 4);

        // Nothing can finish yet, so the wait must still be pending
        let wait = pool.wait_while_backlogged(2, Duration::from_millis(10));
        assert!(timeout(Duration::from_millis(50), wait).await.is_err());

        // Let three fetches finish; pending drops to 1, below threshold
        gate.add_permits(3);
        timeout(
            Duration::from_secs(2),
            pool.wait_while_backlogged(2, Duration::from_millis(10)),
        )
        .await
        .expect("wait must finish once the backlog drains");
        assert!(pool.pending() < 2);

        gate.add_permits(1);
        pool.close();
        pool.join().await;
    }

    #[tokio::test]
    async fn test_close_drains_queued_work() {
        let pool = FetchPool::spawn(Arc::new(InstantEnricher), 1);

        let handles: Vec<_> = (0..8).map(|i| pool.submit(test_event(i))).collect();
        pool.close();

        // Work queued before close still resolves
        for handle in handles {
            assert!(handle.resolve().await.is_some());
        }
        pool.join().await;
    }

    #[tokio::test]
    async fn test_submit_after_close_never_resolves() {
        let pool = FetchPool::spawn(Arc::new(InstantEnricher), 1);
        pool.close();

        let handle = pool.submit(test_event(0));
        assert!(handle.resolve().await.is_none());
        assert_eq!(pool.pending(), 0);

        pool.join().await;
    }
}
