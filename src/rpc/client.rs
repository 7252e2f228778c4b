//! A single upstream JSON-RPC endpoint. Transport-layer retries are
//! disabled here by design, so the retry policy lives in exactly one
//! place (the RPC pool) — exactly one HTTP request is issued per call.

use std::time::Duration;

use reqwest::{Client, StatusCode};
use serde::de::DeserializeOwned;

use crate::rpc::types::{JsonRpcRequest, JsonRpcResponse, RpcFailureKind, classify_json_rpc_error};

#[derive(Debug)]
pub struct RpcCallError {
    pub kind: RpcFailureKind,
    pub message: String,
}

impl std::fmt::Display for RpcCallError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.message)
    }
}
impl std::error::Error for RpcCallError {}

pub struct EndpointClient {
    pub url: String,
    http: Client,
}

impl EndpointClient {
    pub fn new(url: String, timeout: Duration) -> Self {
        let http = Client::builder()
            .timeout(timeout)
            // Transport-layer retries are explicitly disabled; the RPC pool
            // is the sole retry authority.
            .build()
            .expect("reqwest client builds with a plain timeout");
        Self { url, http }
    }

    pub async fn call<T: DeserializeOwned>(
        &self,
        id: u64,
        method: &str,
        params: serde_json::Value,
    ) -> Result<T, RpcCallError> {
        let req = JsonRpcRequest::new(id, method, params);

        let resp = self.http.post(&self.url).json(&req).send().await.map_err(|e| RpcCallError {
            kind: RpcFailureKind::Transient,
            message: format!("transport error calling {method} on {}: {e}", self.url),
        })?;

        let status = resp.status();
        if status == StatusCode::TOO_MANY_REQUESTS {
            return Err(RpcCallError {
                kind: RpcFailureKind::RateLimited,
                message: format!("{method} on {} returned 429", self.url),
            });
        }
        if status.is_server_error() {
            return Err(RpcCallError {
                kind: RpcFailureKind::Transient,
                message: format!("{method} on {} returned {status}", self.url),
            });
        }
        if !status.is_success() {
            return Err(RpcCallError {
                kind: RpcFailureKind::NonTransient,
                message: format!("{method} on {} returned {status}", self.url),
            });
        }

        let body: JsonRpcResponse<T> = resp.json().await.map_err(|e| RpcCallError {
            kind: RpcFailureKind::Transient,
            message: format!("malformed json-rpc response from {}: {e}", self.url),
        })?;

        if let Some(err) = body.error {
            let kind = classify_json_rpc_error(err.code, &err.message);
            return Err(RpcCallError {
                kind,
                message: format!("json-rpc error {}: {}", err.code, err.message),
            });
        }

        body.result.ok_or_else(|| RpcCallError {
            kind: RpcFailureKind::Transient,
            message: format!("{method} on {} returned neither result nor error", self.url),
        })
    }
}
