//! Event data model and JSON Lines serialization.
//!
//! A [`RawEvent`] is one decoded log entry, assigned a monotonic
//! `order_index` at discovery time. An [`EnrichedRecord`] is the flat JSON
//! object that ends up in the output archive: the event's base fields,
//! optionally merged with the content fetched from its `contentURI`, or
//! marked with `fetchFailed: true` when that fetch did not succeed.

use crate::error::Result;
use serde_json::{Map, Value};

/// Output key for the block number.
pub const BLOCK_NUMBER_KEY: &str = "blockNumber";

/// Output key for the transaction hash.
pub const TRANSACTION_HASH_KEY: &str = "transactionHash";

/// Output key for the transaction index.
pub const TRANSACTION_INDEX_KEY: &str = "transactionIndex";

/// Output key for the event type name.
pub const EVENT_NAME_KEY: &str = "event";

/// Event field holding the content URI to enrich from, when present.
pub const CONTENT_URI_KEY: &str = "contentURI";

/// Marker set on a record whose content fetch failed.
pub const FETCH_FAILED_KEY: &str = "fetchFailed";

/// A decoded event log entry, immutable once discovered.
#[derive(Debug, Clone)]
pub struct RawEvent {
    /// Monotonic sequence number assigned at discovery time.
    /// Output order is strictly increasing in this index.
    pub order_index: u64,

    /// Block the event was emitted in.
    pub block_number: u64,

    /// Hash of the emitting transaction (0x-prefixed hex).
    pub transaction_hash: String,

    /// Index of the transaction within its block.
    pub transaction_index: u64,

    /// Decoded event type name.
    pub name: String,

    /// Named event parameters, decoded to JSON values.
    pub fields: Map<String, Value>,
}

impl RawEvent {
    /// The event's content URI, if it carries one as a string field.
    pub fn content_uri(&self) -> Option<&str> {
        self.fields.get(CONTENT_URI_KEY).and_then(Value::as_str)
    }
}

/// The terminal, write-once output record for one event.
///
/// Built once by the content fetcher (or passed through unenriched when the
/// event has no content URI) and never mutated after being written.
#[derive(Debug, Clone)]
pub struct EnrichedRecord {
    order_index: u64,
    record: Map<String, Value>,
}

impl EnrichedRecord {
    /// Build the base record from an event's own fields.
    ///
    /// Base keys come first, then the event parameters; a parameter that
    /// collides with a base key overwrites it, matching merge semantics of
    /// the output format.
    pub fn base(event: &RawEvent) -> Self {
        let mut record = Map::new();
        record.insert(
            BLOCK_NUMBER_KEY.to_string(),
            Value::from(event.block_number),
        );
        record.insert(
            TRANSACTION_HASH_KEY.to_string(),
            Value::String(event.transaction_hash.clone()),
        );
        record.insert(
            TRANSACTION_INDEX_KEY.to_string(),
            Value::from(event.transaction_index),
        );
        record.insert(EVENT_NAME_KEY.to_string(), Value::String(event.name.clone()));
        for (key, value) in &event.fields {
            record.insert(key.clone(), value.clone());
        }

        Self {
            order_index: event.order_index,
            record,
        }
    }

    /// The discovery-order index of the underlying event.
    pub fn order_index(&self) -> u64 {
        self.order_index
    }

    /// Merge fetched content fields into the record.
    ///
    /// Content keys overwrite base keys on collision.
    pub fn merge_content(&mut self, content: Map<String, Value>) {
        for (key, value) in content {
            self.record.insert(key, value);
        }
    }

    /// Mark the record as having had its content fetch fail.
    pub fn mark_fetch_failed(&mut self) {
        self.record
            .insert(FETCH_FAILED_KEY.to_string(), Value::Bool(true));
    }

    /// Whether the record carries the `fetchFailed` marker.
    pub fn fetch_failed(&self) -> bool {
        self.record
            .get(FETCH_FAILED_KEY)
            .and_then(Value::as_bool)
            .unwrap_or(false)
    }

    /// The flat output fields.
    pub fn fields(&self) -> &Map<String, Value> {
        &self.record
    }

    /// Serialize to one self-contained JSON object, without the trailing
    /// newline. `serde_json` escapes interior newlines, so the result never
    /// spans multiple lines.
    pub fn to_json_line(&self) -> Result<String> {
        Ok(serde_json::to_string(&self.record)?)
    }
}
