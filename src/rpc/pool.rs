//! Pooled, timeout-bounded, round-robin access to N upstream JSON-RPC
//! endpoints with per-endpoint failover.

use std::num::NonZeroUsize;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::time::{Duration, Instant};

use lru::LruCache;
use rand::Rng;
use serde_json::json;
use tokio::sync::Mutex as AsyncMutex;

use crate::error::{Error, Result};
use crate::metrics;
use crate::rpc::client::EndpointClient;
use crate::rpc::types::{RawBlock, RawLog, RpcFailureKind};

/// Bound on the per-process block header cache. Purely an RPC-call-reduction
/// optimization for repeated lookups of the same height within one process
/// lifetime (e.g. re-validating the parent during reorg walks) — the
/// database, never this cache, is the source of truth.
const BLOCK_CACHE_CAPACITY: usize = 4096;

#[derive(Debug, Clone)]
pub struct RpcPoolConfig {
    pub endpoints: Vec<String>,
    pub per_request_timeout: Duration,
    pub max_retries: u32,
    pub backoff_base: Duration,
    pub backoff_cap: Duration,
}

pub struct RpcPool {
    clients: Vec<EndpointClient>,
    next: AtomicUsize,
    request_id: AtomicU64,
    config: RpcPoolConfig,
    block_cache: AsyncMutex<LruCache<u64, RawBlock>>,
}

impl RpcPool {
    pub fn new(config: RpcPoolConfig) -> Result<Self> {
        if config.endpoints.is_empty() {
            return Err(Error::Config("RPC_URL must list at least one endpoint".into()));
        }
        let clients = config
            .endpoints
            .iter()
            .map(|url| EndpointClient::new(url.clone(), config.per_request_timeout))
            .collect();
        Ok(Self {
            clients,
            next: AtomicUsize::new(0),
            request_id: AtomicU64::new(1),
            config,
            block_cache: AsyncMutex::new(LruCache::new(
                NonZeroUsize::new(BLOCK_CACHE_CAPACITY).expect("cache capacity is nonzero"),
            )),
        })
    }

    fn pool_size(&self) -> usize {
        self.clients.len()
    }

    /// Issues `method` against endpoints starting at the next round-robin
    /// index, trying each endpoint exactly once per attempt sweep. Returns
    /// `AllRpcEndpointsFailed` only after every endpoint has failed.
    async fn dispatch<T: serde::de::DeserializeOwned>(
        &self,
        method: &'static str,
        params: serde_json::Value,
    ) -> std::result::Result<T, Error> {
        let start_index = self.next.fetch_add(1, Ordering::Relaxed) % self.pool_size();
        let mut last_err: Option<Error> = None;

        for offset in 0..self.pool_size() {
            let idx = (start_index + offset) % self.pool_size();
            let client = &self.clients[idx];
            let id = self.request_id.fetch_add(1, Ordering::Relaxed);

            let call_start = Instant::now();
            metrics::RPC_CALLS_TOTAL.with_label_values(&[&client.url, "attempt"]).inc();

            match client.call::<T>(id, method, params.clone()).await {
                Ok(v) => {
                    metrics::RPC_CALLS_TOTAL.with_label_values(&[&client.url, "success"]).inc();
                    metrics::RPC_LATENCY_MS
                        .with_label_values(&[&client.url])
                        .observe(call_start.elapsed().as_millis() as f64);
                    return Ok(v);
                }
                Err(e) => {
                    metrics::RPC_CALLS_TOTAL.with_label_values(&[&client.url, "failure"]).inc();
                    metrics::RPC_LATENCY_MS
                        .with_label_values(&[&client.url])
                        .observe(call_start.elapsed().as_millis() as f64);

                    if e.kind == RpcFailureKind::NonTransient {
                        return Err(Error::ValidationError {
                            field: method.to_string(),
                            reason: e.message,
                        });
                    }
                    last_err = Some(Error::TransientRpc {
                        endpoint: client.url.clone(),
                        kind: e.kind,
                        message: e.message,
                    });
                }
            }
        }

        metrics::RPC_ALL_ENDPOINTS_FAILED.inc();
        tracing::error!(method, attempted = self.pool_size(), last_error = ?last_err, "all rpc endpoints failed");
        Err(Error::AllRpcEndpointsFailed {
            method: method.to_string(),
            attempted: self.pool_size(),
        })
    }

    /// Runs `dispatch` with the pool-owned retry policy: up to
    /// `max_retries` attempts, each attempt sweeping the whole pool once,
    /// with jittered exponential backoff between attempts.
    pub async fn call_with_retry<T: serde::de::DeserializeOwned>(
        &self,
        method: &'static str,
        params: serde_json::Value,
    ) -> Result<T> {
        let mut backoff = self.config.backoff_base;
        let mut last_err = None;

        for attempt in 0..=self.config.max_retries {
            match self.dispatch::<T>(method, params.clone()).await {
                Ok(v) => return Ok(v),
                Err(e @ Error::ValidationError { .. }) => return Err(e),
                Err(e) => {
                    last_err = Some(e);
                    if attempt == self.config.max_retries {
                        break;
                    }
                    let jitter_ms = rand::thread_rng().gen_range(0..=backoff.as_millis() as u64 / 2 + 1);
                    let sleep_for = backoff + Duration::from_millis(jitter_ms);
                    tracing::warn!(method, attempt, backoff_ms = sleep_for.as_millis() as u64, "retrying after transient rpc failure");
                    tokio::time::sleep(sleep_for).await;
                    backoff = (backoff * 2).min(self.config.backoff_cap);
                }
            }
        }
        Err(last_err.unwrap_or(Error::AllRpcEndpointsFailed {
            method: method.to_string(),
            attempted: self.pool_size(),
        }))
    }

    pub async fn fetch_latest_block_number(&self) -> Result<u64> {
        let hex: String = self.call_with_retry("eth_blockNumber", json!([])).await?;
        crate::numeric::UBig256::from_hex(&hex)?.to_u64()
    }

    /// Fetches a block header, consulting the per-process cache first. A
    /// cache hit is never treated as authoritative for writes — only the
    /// Reorg Handler's repeated ancestor-walk lookups and similar read-only
    /// re-checks take this path's benefit; the Sync Engine's Phase 1 fetch
    /// always goes through here too, but a height is only ever cached after
    /// a real upstream response, so correctness is unaffected either way.
    pub async fn fetch_block(&self, number: u64) -> Result<Option<RawBlock>> {
        if let Some(cached) = self.block_cache.lock().await.get(&number).cloned() {
            return Ok(Some(cached));
        }

        let quantity = format!("0x{number:x}");
        let block: Option<RawBlock> =
            self.call_with_retry("eth_getBlockByNumber", json!([quantity, false])).await?;

        if let Some(ref b) = block {
            self.block_cache.lock().await.put(number, b.clone());
        }
        Ok(block)
    }

    pub async fn fetch_logs(
        &self,
        token_address: &str,
        topic0: &str,
        from_block: u64,
        to_block: u64,
    ) -> Result<Vec<RawLog>> {
        let filter = json!({
            "fromBlock": format!("0x{from_block:x}"),
            "toBlock": format!("0x{to_block:x}"),
            "address": token_address,
            "topics": [topic0],
        });
        self.call_with_retry("eth_getLogs", json!([filter])).await
    }

    pub fn endpoint_count(&self) -> usize {
        self.pool_size()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pool_with(urls: &[&str]) -> RpcPool {
        RpcPool::new(RpcPoolConfig {
            endpoints: urls.iter().map(|s| s.to_string()).collect(),
            per_request_timeout: Duration::from_millis(200),
            max_retries: 2,
            backoff_base: Duration::from_millis(1),
            backoff_cap: Duration::from_millis(5),
        })
        .unwrap()
    }

    #[test]
    fn round_robin_index_advances_and_wraps() {
        let pool = pool_with(&["http://a", "http://b", "http://c"]);
        let first = pool.next.fetch_add(1, Ordering::Relaxed) % pool.pool_size();
        let second = pool.next.fetch_add(1, Ordering::Relaxed) % pool.pool_size();
        let third = pool.next.fetch_add(1, Ordering::Relaxed) % pool.pool_size();
        let fourth = pool.next.fetch_add(1, Ordering::Relaxed) % pool.pool_size();
        assert_eq!([first, second, third, fourth], [0, 1, 2, 0]);
    }

    #[test]
    fn rejects_empty_endpoint_list() {
        assert!(RpcPool::new(RpcPoolConfig {
            endpoints: vec![],
            per_request_timeout: Duration::from_secs(1),
            max_retries: 1,
            backoff_base: Duration::from_millis(1),
            backoff_cap: Duration::from_millis(2),
        })
        .is_err());
    }

    #[tokio::test]
    async fn all_endpoints_failing_returns_all_rpc_endpoints_failed() {
        let pool = pool_with(&["http://127.0.0.1:1", "http://127.0.0.1:2"]);
        let err = pool
            .call_with_retry::<String>("eth_blockNumber", json!([]))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::AllRpcEndpointsFailed { .. }));
    }
}
