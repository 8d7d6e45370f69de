//! Ethereum JSON-RPC event source.
//!
//! Reads a contract's event log with `eth_getLogs` over plain HTTP JSON-RPC
//! and decodes each log against the contract ABI. Only two methods are
//! needed (`eth_blockNumber` and `eth_getLogs`), so the client is a thin
//! wrapper over reqwest rather than a full provider stack.
//!
//! Decoding is ABI-driven: the decoder builds a selector table from the
//! ABI's event signatures and matches each log's first topic against it.
//! Logs that match no known signature (anonymous logs, foreign events) are
//! returned with `name: None` and discarded upstream.

use super::{EventSource, SourceEntry};
use crate::{Error, Result};
use alloy_dyn_abi::{DynSolValue, EventExt};
use alloy_json_abi::{Event, JsonAbi};
use alloy_primitives::{hex, Address, Bytes, B256, U64};
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tracing::{debug, warn};

/// Configuration for the Ethereum event source.
#[derive(Debug, Clone)]
pub struct EthConfig {
    /// JSON-RPC endpoint URL (e.g., "https://polygon-rpc.com").
    pub endpoint: String,

    /// Address of the contract whose events are scanned.
    pub contract: Address,

    /// Per-request timeout.
    pub request_timeout: Duration,
}

/// Event source backed by an Ethereum JSON-RPC endpoint.
pub struct EthLogSource {
    client: reqwest::Client,
    config: EthConfig,
    decoder: EventDecoder,
    request_id: AtomicU64,
}

impl EthLogSource {
    /// Create a new source for the configured contract and ABI.
    pub fn new(config: EthConfig, abi: &JsonAbi) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .user_agent(concat!("chronicle/", env!("CARGO_PKG_VERSION")))
            .build()?;

        let decoder = EventDecoder::from_abi(abi);
        tracing::info!(
            "Ethereum source initialized: endpoint={}, contract={}, {} event signatures",
            config.endpoint,
            config.contract,
            decoder.len()
        );

        Ok(Self {
            client,
            config,
            decoder,
            request_id: AtomicU64::new(1),
        })
    }

    /// Issue one JSON-RPC call and unwrap the response envelope.
    async fn call<T: DeserializeOwned>(&self, method: &'static str, params: Value) -> Result<T> {
        let request = RpcRequest {
            jsonrpc: "2.0",
            method,
            params,
            id: self.request_id.fetch_add(1, Ordering::Relaxed),
        };

        let response = self
            .client
            .post(&self.config.endpoint)
            .json(&request)
            .send()
            .await?
            .error_for_status()?;

        let envelope: RpcResponse<T> = response.json().await?;
        if let Some(error) = envelope.error {
            return Err(Error::Rpc {
                code: error.code,
                message: error.message,
            });
        }
        envelope.result.ok_or_else(|| Error::Rpc {
            code: 0,
            message: "response carried neither result nor error".to_string(),
        })
    }

    fn to_entry(&self, log: RpcLog) -> SourceEntry {
        let (name, fields) = match self.decoder.decode(&log) {
            Some((name, fields)) => (Some(name), fields),
            None => (None, Map::new()),
        };

        SourceEntry {
            block_number: log.block_number.map(|b| b.to::<u64>()).unwrap_or_default(),
            transaction_hash: format!("{:#x}", log.transaction_hash.unwrap_or_default()),
            transaction_index: log
                .transaction_index
                .map(|i| i.to::<u64>())
                .unwrap_or_default(),
            log_index: log.log_index.map(|i| i.to::<u64>()).unwrap_or_default(),
            name,
            fields,
        }
    }
}

#[async_trait]
impl EventSource for EthLogSource {
    fn name(&self) -> &'static str {
        "eth"
    }

    async fn head_position(&self) -> Result<u64> {
        let head: U64 = self.call("eth_blockNumber", json!([])).await?;
        Ok(head.to::<u64>())
    }

    async fn events_in_range(&self, from: u64, to: u64) -> Result<Vec<SourceEntry>> {
        if from >= to {
            return Ok(Vec::new());
        }

        // eth_getLogs block ranges are inclusive on both ends.
        let filter = LogFilter {
            address: &self.config.contract,
            from_block: format!("0x{from:x}"),
            to_block: format!("0x{:x}", to - 1),
        };
        let logs: Vec<RpcLog> = self.call("eth_getLogs", json!([filter])).await?;

        Ok(logs
            .into_iter()
            .filter(|log| {
                if log.removed {
                    debug!("dropping reorged log in blocks {}-{}", from, to - 1);
                }
                !log.removed
            })
            .map(|log| self.to_entry(log))
            .collect())
    }
}

/// ABI-driven decoder mapping log topics to named event fields.
struct EventDecoder {
    by_selector: HashMap<B256, Event>,
}

impl EventDecoder {
    /// Build the selector table from the ABI.
    ///
    /// Anonymous events carry no selector topic and cannot be matched; they
    /// are left out of the table.
    fn from_abi(abi: &JsonAbi) -> Self {
        let by_selector = abi
            .events()
            .filter(|event| !event.anonymous)
            .map(|event| (event.selector(), event.clone()))
            .collect();
        Self { by_selector }
    }

    fn len(&self) -> usize {
        self.by_selector.len()
    }

    /// Decode a log into its event name and named parameters.
    ///
    /// Returns `None` for logs that match no known signature or whose
    /// payload does not decode against the matched signature.
    fn decode(&self, log: &RpcLog) -> Option<(String, Map<String, Value>)> {
        let selector = log.topics.first()?;
        let event = self.by_selector.get(selector)?;

        let decoded = match event.decode_log_parts(log.topics.iter().copied(), &log.data) {
            Ok(decoded) => decoded,
            Err(e) => {
                warn!(
                    "log in tx {:?} matched event {} but failed to decode: {}",
                    log.transaction_hash, event.name, e
                );
                return None;
            }
        };

        let mut indexed = decoded.indexed.into_iter();
        let mut body = decoded.body.into_iter();
        let mut fields = Map::new();
        for param in &event.inputs {
            let value = if param.indexed {
                indexed.next()
            } else {
                body.next()
            };
            let Some(value) = value else { break };
            // Unnamed parameters have no key to merge under; drop them.
            if param.name.is_empty() {
                continue;
            }
            fields.insert(param.name.clone(), sol_value_to_json(&value));
        }

        Some((event.name.clone(), fields))
    }
}

/// Convert a decoded Solidity value into its JSON output form.
///
/// Numbers become decimal strings (they routinely exceed the JSON number
/// range), byte types become 0x-prefixed hex, addresses are checksummed.
fn sol_value_to_json(value: &DynSolValue) -> Value {
    match value {
        DynSolValue::Address(address) => Value::String(address.to_checksum(None)),
        DynSolValue::Bool(b) => Value::Bool(*b),
        DynSolValue::String(s) => Value::String(s.clone()),
        DynSolValue::Uint(n, _) => Value::String(n.to_string()),
        DynSolValue::Int(n, _) => Value::String(n.to_string()),
        DynSolValue::Bytes(bytes) => Value::String(hex::encode_prefixed(bytes)),
        DynSolValue::FixedBytes(word, size) => Value::String(hex::encode_prefixed(&word[..*size])),
        DynSolValue::Function(f) => Value::String(hex::encode_prefixed(f.as_slice())),
        DynSolValue::Array(items) | DynSolValue::FixedArray(items) | DynSolValue::Tuple(items) => {
            Value::Array(items.iter().map(sol_value_to_json).collect())
        }
        _ => Value::Null,
    }
}

#[derive(Debug, Serialize)]
struct RpcRequest {
    jsonrpc: &'static str,
    method: &'static str,
    params: Value,
    id: u64,
}

/// `eth_getLogs` filter object.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct LogFilter<'a> {
    address: &'a Address,
    from_block: String,
    to_block: String,
}

#[derive(Debug, Deserialize)]
#[serde(bound(deserialize = "T: Deserialize<'de>"))]
struct RpcResponse<T> {
    #[serde(default)]
    result: Option<T>,
    #[serde(default)]
    error: Option<RpcErrorObject>,
}

#[derive(Debug, Deserialize)]
struct RpcErrorObject {
    code: i64,
    message: String,
}

/// One raw log entry as returned by `eth_getLogs`.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RpcLog {
    topics: Vec<B256>,
    data: Bytes,
    #[serde(default)]
    block_number: Option<U64>,
    #[serde(default)]
    transaction_hash: Option<B256>,
    #[serde(default)]
    transaction_index: Option<U64>,
    #[serde(default)]
    log_index: Option<U64>,
    #[serde(default)]
    removed: bool,
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{routing::post, Json, Router};
    use serde_json::json;

    const TEST_ABI: &str = r#"[
        {
            "type": "event",
            "name": "ContentPosted",
            "anonymous": false,
            "inputs": [
                {"name": "author", "type": "address", "indexed": true},
                {"name": "id", "type": "uint256", "indexed": false},
                {"name": "contentURI", "type": "string", "indexed": false}
            ]
        }
    ]"#;

    fn test_abi() -> JsonAbi {
        serde_json::from_str(TEST_ABI).unwrap()
    }

    fn word(n: u64) -> [u8; 32] {
        let mut out = [0u8; 32];
        out[24..].copy_from_slice(&n.to_be_bytes());
        out
    }

    /// ABI-encode the test event's body: (uint256 id, string contentURI).
    fn encode_body(id: u64, uri: &str) -> Bytes {
        let mut data = Vec::new();
        data.extend_from_slice(&word(id));
        data.extend_from_slice(&word(0x40)); // offset of the string
        data.extend_from_slice(&word(uri.len() as u64));
        let mut tail = uri.as_bytes().to_vec();
        tail.resize(tail.len().div_ceil(32) * 32, 0);
        data.extend_from_slice(&tail);
        Bytes::from(data)
    }

    fn test_log(topics: Vec<B256>, data: Bytes) -> RpcLog {
        RpcLog {
            topics,
            data,
            block_number: Some(U64::from(1234)),
            transaction_hash: Some(B256::repeat_byte(0xaa)),
            transaction_index: Some(U64::from(2)),
            log_index: Some(U64::from(0)),
            removed: false,
        }
    }

    #[test]
    fn test_decode_known_event() {
        let abi = test_abi();
        let decoder = EventDecoder::from_abi(&abi);
        assert_eq!(decoder.len(), 1);

        let author = Address::repeat_byte(0x11);
        let selector = abi.events().next().unwrap().selector();
        let author_topic = B256::left_padding_from(author.as_slice());

        let log = test_log(
            vec![selector, author_topic],
            encode_body(5, "ipfs://QmX"),
        );

        let (name, fields) = decoder.decode(&log).unwrap();
        assert_eq!(name, "ContentPosted");
        assert_eq!(fields["author"], json!(author.to_checksum(None)));
        assert_eq!(fields["id"], json!("5"));
        assert_eq!(fields["contentURI"], json!("ipfs://QmX"));
    }

    #[test]
    fn test_decode_unknown_selector() {
        let decoder = EventDecoder::from_abi(&test_abi());
        let log = test_log(vec![B256::repeat_byte(0xff)], Bytes::new());
        assert!(decoder.decode(&log).is_none());
    }

    #[test]
    fn test_decode_empty_topics() {
        let decoder = EventDecoder::from_abi(&test_abi());
        let log = test_log(Vec::new(), Bytes::new());
        assert!(decoder.decode(&log).is_none());
    }

    #[test]
    fn test_sol_value_conversions() {
        use alloy_primitives::{I256, U256};

        assert_eq!(
            sol_value_to_json(&DynSolValue::Uint(U256::from(123u64), 256)),
            json!("123")
        );
        assert_eq!(
            sol_value_to_json(&DynSolValue::Int(
                I256::try_from(-7i64).unwrap(),
                256
            )),
            json!("-7")
        );
        assert_eq!(sol_value_to_json(&DynSolValue::Bool(true)), json!(true));
        assert_eq!(
            sol_value_to_json(&DynSolValue::Bytes(vec![0xde, 0xad])),
            json!("0xdead")
        );
        assert_eq!(
            sol_value_to_json(&DynSolValue::FixedBytes(B256::repeat_byte(0xab), 4)),
            json!("0xabababab")
        );
        assert_eq!(
            sol_value_to_json(&DynSolValue::Array(vec![
                DynSolValue::Uint(U256::from(1u64), 256),
                DynSolValue::Uint(U256::from(2u64), 256),
            ])),
            json!(["1", "2"])
        );
    }

    async fn spawn_stub(response: Value) -> String {
        let app = Router::new().route(
            "/",
            post(move || {
                let response = response.clone();
                async move { Json(response) }
            }),
        );
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        format!("http://{addr}")
    }

    fn source_for(endpoint: String) -> EthLogSource {
        EthLogSource::new(
            EthConfig {
                endpoint,
                contract: Address::repeat_byte(0x22),
                request_timeout: Duration::from_secs(5),
            },
            &test_abi(),
        )
        .unwrap()
    }

    #[tokio::test]
    async fn test_head_position() {
        let endpoint = spawn_stub(json!({"jsonrpc": "2.0", "id": 1, "result": "0x10"})).await;
        let source = source_for(endpoint);
        assert_eq!(source.head_position().await.unwrap(), 16);
    }

    #[tokio::test]
    async fn test_rpc_error_envelope() {
        let endpoint = spawn_stub(json!({
            "jsonrpc": "2.0",
            "id": 1,
            "error": {"code": -32602, "message": "invalid params"}
        }))
        .await;
        let source = source_for(endpoint);
        match source.head_position().await {
            Err(Error::Rpc { code, message }) => {
                assert_eq!(code, -32602);
                assert!(message.contains("invalid params"));
            }
            other => panic!("expected RPC error, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_empty_range_needs_no_network() {
        let source = source_for("http://127.0.0.1:1".to_string());
        let entries = source.events_in_range(10, 10).await.unwrap();
        assert!(entries.is_empty());
    }

    #[tokio::test]
    async fn test_events_in_range_decodes_and_drops_removed() {
        let abi = test_abi();
        let selector = abi.events().next().unwrap().selector();
        let author_topic = B256::left_padding_from(Address::repeat_byte(0x11).as_slice());
        let data = encode_body(1, "ipfs://QmY");
        let data_hex = format!("0x{}", hex::encode(&data));

        let log = |removed: bool| {
            json!({
                "address": "0x2222222222222222222222222222222222222222",
                "topics": [selector, author_topic],
                "data": data_hex,
                "blockNumber": "0x4d2",
                "transactionHash": format!("{:#x}", B256::repeat_byte(0xaa)),
                "transactionIndex": "0x2",
                "logIndex": "0x0",
                "removed": removed
            })
        };
        let endpoint = spawn_stub(json!({
            "jsonrpc": "2.0",
            "id": 1,
            "result": [log(false), log(true)]
        }))
        .await;

        let source = source_for(endpoint);
        let entries = source.events_in_range(1234, 1235).await.unwrap();
        assert_eq!(entries.len(), 1);

        let entry = &entries[0];
        assert_eq!(entry.block_number, 1234);
        assert_eq!(entry.transaction_index, 2);
        assert_eq!(entry.name.as_deref(), Some("ContentPosted"));
        assert_eq!(entry.fields["contentURI"], json!("ipfs://QmY"));
        assert_eq!(
            entry.transaction_hash,
            format!("{:#x}", B256::repeat_byte(0xaa))
        );
    }
}
