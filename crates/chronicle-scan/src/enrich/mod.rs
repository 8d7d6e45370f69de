//! Content enrichment.
//!
//! Every discovered event may carry a `contentURI` field pointing at
//! off-chain JSON (typically IPFS). The [`ContentFetcher`] resolves that
//! URI with a single HTTP round trip and merges the payload into the
//! event's output record.
//!
//! Enrichment is infallible by contract: any transport, status, or parse
//! failure is absorbed into the record as `fetchFailed: true` so one dead
//! gateway can never stall the pipeline. There are no retries.

mod uri;

pub use uri::{normalize_content_uri, IPFS_GATEWAY, INFURA_GATEWAY};

use crate::Result;
use async_trait::async_trait;
use chronicle_core::{EnrichedRecord, RawEvent};
use metrics::counter;
use serde_json::Value;
use std::time::Duration;
use tracing::warn;

/// Turns a raw event into its terminal output record.
///
/// The trait is the seam between the fetch pool and the network; tests
/// substitute enrichers with controlled latency or failure behavior.
#[async_trait]
pub trait Enrich: Send + Sync + 'static {
    /// Produce the output record for one event.
    ///
    /// Never fails: enrichment problems are recorded on the returned
    /// record, not raised.
    async fn enrich(&self, event: RawEvent) -> EnrichedRecord;
}

/// Configuration for the content fetcher.
#[derive(Debug, Clone)]
pub struct FetchConfig {
    /// Per-request timeout covering the whole round trip.
    pub request_timeout: Duration,
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            request_timeout: Duration::from_secs(30),
        }
    }
}

/// HTTP content fetcher.
pub struct ContentFetcher {
    client: reqwest::Client,
}

impl ContentFetcher {
    /// Create a fetcher with its own connection pool.
    pub fn new(config: FetchConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .user_agent(concat!("chronicle/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self { client })
    }

    async fn fetch_json(&self, uri: &str) -> Result<Value> {
        let response = self.client.get(uri).send().await?.error_for_status()?;
        Ok(response.json().await?)
    }
}

#[async_trait]
impl Enrich for ContentFetcher {
    async fn enrich(&self, event: RawEvent) -> EnrichedRecord {
        let mut record = EnrichedRecord::base(&event);

        let Some(raw_uri) = event.content_uri() else {
            return record;
        };
        let uri = normalize_content_uri(raw_uri);

        match self.fetch_json(&uri).await {
            Ok(Value::Object(content)) => {
                record.merge_content(content);
                counter!("fetch_success_total").increment(1);
            }
            Ok(_) => {
                warn!("Content at {} is not a JSON object", uri);
                record.mark_fetch_failed();
                counter!("fetch_failed_total").increment(1);
            }
            Err(e) => {
                warn!("Failed to fetch {}: {}", uri, e);
                record.mark_fetch_failed();
                counter!("fetch_failed_total").increment(1);
            }
        }

        record
    }
}
