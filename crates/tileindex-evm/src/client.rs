//! Ledger client: a thin adapter over an EVM JSON-RPC endpoint.
//!
//! Covers exactly the calls the pipeline needs: `eth_blockNumber`,
//! `eth_getBlockByNumber` (for the timestamp), `eth_getLogs`,
//! `eth_getTransactionByHash` and block-pinned `eth_call`. There is no retry
//! logic here; the scanner owns the retry policy.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use alloy_primitives::{Address, Bytes, B256};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use tileindex_core::error::IndexerError;
use tileindex_core::types::address_hex;

// ─── Wire types ───────────────────────────────────────────────────────────────

/// A raw EVM log as returned by `eth_getLogs`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawLog {
    pub address: String,
    pub topics: Vec<String>,
    pub data: String,
    #[serde(rename = "blockNumber")]
    pub block_number: String,
    #[serde(rename = "blockHash", default, skip_serializing_if = "Option::is_none")]
    pub block_hash: Option<String>,
    #[serde(rename = "transactionHash")]
    pub tx_hash: String,
    #[serde(rename = "logIndex")]
    pub log_index: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub removed: Option<bool>,
}

impl RawLog {
    pub fn block_number_u64(&self) -> Result<u64, IndexerError> {
        parse_hex_u64(&self.block_number).ok_or_else(|| {
            IndexerError::Rpc(format!("malformed blockNumber '{}'", self.block_number))
        })
    }

    pub fn log_index_u32(&self) -> Result<u32, IndexerError> {
        parse_hex_u64(&self.log_index)
            .and_then(|n| u32::try_from(n).ok())
            .ok_or_else(|| IndexerError::Rpc(format!("malformed logIndex '{}'", self.log_index)))
    }

    /// Returns `true` if this log was removed by a reorg.
    pub fn is_removed(&self) -> bool {
        self.removed.unwrap_or(false)
    }
}

/// Parse a hex-encoded quantity (with or without `0x`) to u64.
pub fn parse_hex_u64(s: &str) -> Option<u64> {
    let s = s.strip_prefix("0x").unwrap_or(s);
    u64::from_str_radix(s, 16).ok()
}

#[derive(Debug, Serialize)]
struct JsonRpcRequest<'a> {
    jsonrpc: &'static str,
    id: u64,
    method: &'a str,
    params: Value,
}

#[derive(Debug, Clone, Deserialize)]
struct JsonRpcError {
    code: i64,
    message: String,
    #[serde(default)]
    data: Option<Value>,
}

impl JsonRpcError {
    /// The node executed the call and the EVM rejected it. Code 3 is the
    /// standard revert code; older nodes report `-32000` with a message.
    fn is_execution_revert(&self) -> bool {
        if self.code == 3 {
            return true;
        }
        let message = self.message.to_ascii_lowercase();
        message.contains("revert") || message.contains("invalid opcode")
    }
}

/// Map an `eth_call` error. Only execution failures are `CallReverted`;
/// rate limits, missing state and other node errors stay retryable.
fn call_error(err: JsonRpcError) -> IndexerError {
    if err.is_execution_revert() {
        IndexerError::CallReverted(err.to_string())
    } else {
        IndexerError::Rpc(format!("eth_call: {err}"))
    }
}

impl std::fmt::Display for JsonRpcError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "JSON-RPC error {}: {}", self.code, self.message)?;
        if let Some(data) = &self.data {
            write!(f, " ({data})")?;
        }
        Ok(())
    }
}

#[derive(Debug, Deserialize)]
struct JsonRpcResponse {
    #[serde(default)]
    result: Option<Value>,
    #[serde(default)]
    error: Option<JsonRpcError>,
}

impl JsonRpcResponse {
    fn into_result(self) -> Result<Value, JsonRpcError> {
        match self.error {
            Some(err) => Err(err),
            None => Ok(self.result.unwrap_or(Value::Null)),
        }
    }
}

// ─── Client trait ─────────────────────────────────────────────────────────────

/// The ledger operations the scanner and decoder depend on.
/// All block bounds are inclusive.
#[async_trait]
pub trait LedgerClient: Send + Sync {
    /// Current chain height.
    async fn block_number(&self) -> Result<u64, IndexerError>;

    /// Unix timestamp (seconds) of block `number`.
    async fn block_timestamp(&self, number: u64) -> Result<u64, IndexerError>;

    async fn logs(
        &self,
        addresses: &[Address],
        topics: &[B256],
        from: u64,
        to: u64,
    ) -> Result<Vec<RawLog>, IndexerError>;

    /// The transaction as returned by the node, or `None` if unknown.
    async fn transaction(&self, hash: &str) -> Result<Option<Value>, IndexerError>;

    /// Read-only contract call evaluated against the state at `at_block`.
    /// A call the node executed and rejected is `IndexerError::CallReverted`.
    async fn call(&self, to: Address, data: Bytes, at_block: u64) -> Result<Bytes, IndexerError>;
}

// ─── HTTP implementation ──────────────────────────────────────────────────────

/// `LedgerClient` over HTTP JSON-RPC, backed by `reqwest`.
pub struct HttpLedgerClient {
    url: String,
    http: reqwest::Client,
    next_id: AtomicU64,
}

impl HttpLedgerClient {
    /// Create a client for `url`; every request is bounded by `request_timeout`.
    pub fn new(url: impl Into<String>, request_timeout: Duration) -> Result<Self, IndexerError> {
        let http = reqwest::Client::builder()
            .timeout(request_timeout)
            .build()
            .map_err(|e| IndexerError::Config(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            url: url.into(),
            http,
            next_id: AtomicU64::new(1),
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    async fn send(&self, method: &str, params: Value) -> Result<JsonRpcResponse, IndexerError> {
        let req = JsonRpcRequest {
            jsonrpc: "2.0",
            id: self.next_id.fetch_add(1, Ordering::Relaxed),
            method,
            params,
        };

        let resp = self
            .http
            .post(&self.url)
            .json(&req)
            .send()
            .await
            .map_err(|e| IndexerError::Rpc(format!("{method}: {e}")))?;

        if !resp.status().is_success() {
            let status = resp.status().as_u16();
            let body = resp.text().await.unwrap_or_default();
            return Err(IndexerError::Rpc(format!("{method}: HTTP {status}: {body}")));
        }

        resp.json::<JsonRpcResponse>()
            .await
            .map_err(|e| IndexerError::Rpc(format!("{method}: {e}")))
    }

    async fn request(&self, method: &str, params: Value) -> Result<Value, IndexerError> {
        tracing::trace!(method, "rpc request");
        self.send(method, params)
            .await?
            .into_result()
            .map_err(|e| IndexerError::Rpc(format!("{method}: {e}")))
    }
}

fn quantity(n: u64) -> String {
    format!("0x{n:x}")
}

fn expect_quantity(method: &str, value: &Value) -> Result<u64, IndexerError> {
    value
        .as_str()
        .and_then(parse_hex_u64)
        .ok_or_else(|| IndexerError::Rpc(format!("{method}: unexpected result {value}")))
}

#[async_trait]
impl LedgerClient for HttpLedgerClient {
    async fn block_number(&self) -> Result<u64, IndexerError> {
        let result = self.request("eth_blockNumber", json!([])).await?;
        expect_quantity("eth_blockNumber", &result)
    }

    async fn block_timestamp(&self, number: u64) -> Result<u64, IndexerError> {
        let block = self
            .request("eth_getBlockByNumber", json!([quantity(number), false]))
            .await?;
        if block.is_null() {
            return Err(IndexerError::Rpc(format!("block {number} not found")));
        }
        expect_quantity("eth_getBlockByNumber", &block["timestamp"])
    }

    async fn logs(
        &self,
        addresses: &[Address],
        topics: &[B256],
        from: u64,
        to: u64,
    ) -> Result<Vec<RawLog>, IndexerError> {
        let addresses: Vec<String> = addresses.iter().map(address_hex).collect();
        let topic0: Vec<String> = topics.iter().map(|t| format!("{t:#x}")).collect();
        let filter = json!({
            "fromBlock": quantity(from),
            "toBlock": quantity(to),
            "address": addresses,
            "topics": [topic0],
        });

        let result = self.request("eth_getLogs", json!([filter])).await?;
        serde_json::from_value(result).map_err(|e| IndexerError::Rpc(format!("eth_getLogs: {e}")))
    }

    async fn transaction(&self, hash: &str) -> Result<Option<Value>, IndexerError> {
        let result = self
            .request("eth_getTransactionByHash", json!([hash]))
            .await?;
        Ok((!result.is_null()).then_some(result))
    }

    async fn call(&self, to: Address, data: Bytes, at_block: u64) -> Result<Bytes, IndexerError> {
        let params = json!([
            { "to": address_hex(&to), "data": data.to_string() },
            quantity(at_block),
        ]);
        let result = self
            .send("eth_call", params)
            .await?
            .into_result()
            .map_err(call_error)?;

        let hex_str = result
            .as_str()
            .ok_or_else(|| IndexerError::Rpc(format!("eth_call: unexpected result {result}")))?;
        hex::decode(hex_str.trim_start_matches("0x"))
            .map(Bytes::from)
            .map_err(|e| IndexerError::Rpc(format!("eth_call: bad hex: {e}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_hex_u64_basic() {
        assert_eq!(parse_hex_u64("0x1"), Some(1));
        assert_eq!(parse_hex_u64("0xff"), Some(255));
        assert_eq!(parse_hex_u64("1234"), Some(0x1234));
        assert_eq!(parse_hex_u64("0xzz"), None);
    }

    #[test]
    fn raw_log_from_node_json() {
        let log: RawLog = serde_json::from_value(json!({
            "address": "0x015a06a433353f8db634df4eddf0c109882a15ab",
            "topics": ["0x01"],
            "data": "0x",
            "blockNumber": "0x12a05f200",
            "transactionHash": "0xabc",
            "logIndex": "0x5",
        }))
        .unwrap();
        assert_eq!(log.block_number_u64().unwrap(), 5_000_000_000);
        assert_eq!(log.log_index_u32().unwrap(), 5);
        assert!(!log.is_removed());
    }

    #[test]
    fn json_rpc_error_is_surfaced() {
        let resp: JsonRpcResponse = serde_json::from_value(json!({
            "jsonrpc": "2.0",
            "id": 1,
            "error": { "code": -32000, "message": "execution reverted" }
        }))
        .unwrap();
        let err = resp.into_result().unwrap_err();
        assert!(err.to_string().contains("execution reverted"));
    }

    fn rpc_error(code: i64, message: &str) -> JsonRpcError {
        JsonRpcError {
            code,
            message: message.into(),
            data: None,
        }
    }

    #[test]
    fn only_execution_failures_are_reverts() {
        for reverted in [
            rpc_error(3, "execution reverted: ERC721: invalid token ID"),
            rpc_error(-32000, "execution reverted"),
            rpc_error(-32015, "VM execution error: Reverted 0x"),
            rpc_error(-32000, "invalid opcode: INVALID"),
        ] {
            assert!(matches!(call_error(reverted), IndexerError::CallReverted(_)));
        }

        for transient in [
            rpc_error(-32005, "daily request count exceeded, request rate limited"),
            rpc_error(-32000, "header not found"),
            rpc_error(-32000, "missing trie node 4f2c…"),
            rpc_error(-32603, "internal error"),
        ] {
            let err = call_error(transient);
            assert!(err.is_transient(), "{err} should be retryable");
        }
    }

    #[test]
    fn quantity_is_hex() {
        assert_eq!(quantity(0), "0x0");
        assert_eq!(quantity(255), "0xff");
        assert_eq!(quantity(4096), "0x1000");
    }
}
