//! Wire types for the subset of the Ethereum JSON-RPC 2.0 surface this
//! crate consumes: `eth_blockNumber`, `eth_getBlockByNumber`, `eth_getLogs`.

use serde::{Deserialize, Serialize};

/// `keccak256("Transfer(address,address,uint256)")`.
pub const TRANSFER_EVENT_TOPIC: &str =
    "0xddf252ad1be2c89b69c2b068fc378daa952ba7f163c4a11628f55a4df523b3ef";

#[derive(Debug, Serialize)]
pub struct JsonRpcRequest<'a> {
    pub jsonrpc: &'static str,
    pub id: u64,
    pub method: &'a str,
    pub params: serde_json::Value,
}

impl<'a> JsonRpcRequest<'a> {
    pub fn new(id: u64, method: &'a str, params: serde_json::Value) -> Self {
        Self {
            jsonrpc: "2.0",
            id,
            method,
            params,
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct JsonRpcResponse<T> {
    #[allow(dead_code)]
    pub jsonrpc: Option<String>,
    pub result: Option<T>,
    pub error: Option<JsonRpcError>,
}

#[derive(Debug, Deserialize)]
pub struct JsonRpcError {
    pub code: i64,
    pub message: String,
}

/// Block header as returned by `eth_getBlockByNumber(number, false)`. Only
/// the fields this crate cares about are modeled; any other fields
/// returned by the node are ignored by `serde`.
#[derive(Debug, Clone, Deserialize)]
pub struct RawBlock {
    pub number: String,
    pub hash: String,
    #[serde(rename = "parentHash")]
    pub parent_hash: String,
    pub timestamp: String,
}

/// An ERC-20 `Transfer` log entry as returned by `eth_getLogs`.
#[derive(Debug, Clone, Deserialize)]
pub struct RawLog {
    pub address: String,
    pub topics: Vec<String>,
    pub data: String,
    #[serde(rename = "blockNumber")]
    pub block_number: String,
    #[serde(rename = "transactionHash")]
    pub transaction_hash: String,
    #[serde(rename = "logIndex")]
    pub log_index: String,
}

/// Classification of an RPC failure, used by [`crate::rpc::pool::RpcPool`]
/// to decide retry-vs-fatal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RpcFailureKind {
    /// Timeout, 5xx, transport error, or rate limiting — retry elsewhere.
    Transient,
    /// Rate limited specifically (HTTP 429 or message match) — caller
    /// should apply backoff before the next attempt.
    RateLimited,
    /// Invalid request parameters (JSON-RPC `-32602` or similar) — fatal,
    /// retrying will not help.
    NonTransient,
}

pub fn classify_json_rpc_error(code: i64, message: &str) -> RpcFailureKind {
    let lower = message.to_ascii_lowercase();
    if code == -32602 || lower.contains("invalid params") {
        return RpcFailureKind::NonTransient;
    }
    if code == 429 || lower.contains("rate limit") || lower.contains("too many requests") {
        return RpcFailureKind::RateLimited;
    }
    RpcFailureKind::Transient
}
