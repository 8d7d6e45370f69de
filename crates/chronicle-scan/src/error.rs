//! Error types for the scanner daemon.

use thiserror::Error;

/// Result type alias using the crate's error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while scanning and archiving events.
#[derive(Error, Debug)]
pub enum Error {
    /// The JSON-RPC endpoint returned an error object.
    #[error("RPC error {code}: {message}")]
    Rpc {
        /// JSON-RPC error code.
        code: i64,
        /// Server-provided message.
        message: String,
    },

    /// HTTP transport error (connect, timeout, non-2xx status).
    #[error("transport error: {0}")]
    Transport(#[from] reqwest::Error),

    /// Event log could not be decoded against the contract ABI.
    #[error("log decode error: {0}")]
    Decode(#[from] alloy_dyn_abi::Error),

    /// JSON parsing or serialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Core record error.
    #[error(transparent)]
    Core(#[from] chronicle_core::Error),

    /// Configuration error.
    #[error("configuration error: {0}")]
    Config(String),

    /// A pipeline stage was closed while the scanner was still submitting.
    #[error("pipeline channel closed")]
    ChannelClosed,

    /// The scan was aborted by the range failure policy.
    #[error("scan aborted at blocks {from}-{to}: {source}")]
    RangeAborted {
        /// First block of the failed sub-range.
        from: u64,
        /// Last block of the failed sub-range (inclusive).
        to: u64,
        /// The underlying read failure.
        #[source]
        source: Box<Error>,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rpc_error_display() {
        let err = Error::Rpc {
            code: -32005,
            message: "query returned more than 10000 results".to_string(),
        };
        let msg = err.to_string();
        assert!(msg.contains("-32005"));
        assert!(msg.contains("10000 results"));
    }

    #[test]
    fn test_range_aborted_display_and_source() {
        let err = Error::RangeAborted {
            from: 100,
            to: 199,
            source: Box::new(Error::Rpc {
                code: -32000,
                message: "header not found".to_string(),
            }),
        };
        assert!(err.to_string().contains("100-199"));
        assert!(std::error::Error::source(&err).is_some());
    }
}
