//! Core types and shared utilities for the Chronicle event archiver.
//!
//! This crate provides:
//! - The event data model ([`RawEvent`], [`EnrichedRecord`]) and its
//!   JSON Lines serialization
//! - Prometheus metrics helpers
//! - Shared error types

mod error;
mod event;
pub mod metrics;

pub use error::{Error, Result};
pub use event::{
    EnrichedRecord, RawEvent, BLOCK_NUMBER_KEY, CONTENT_URI_KEY, EVENT_NAME_KEY, FETCH_FAILED_KEY,
    TRANSACTION_HASH_KEY, TRANSACTION_INDEX_KEY,
};
