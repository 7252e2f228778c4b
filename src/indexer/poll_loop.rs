//! Poll Loop: the periodic tip-follow driver.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use crate::config::AppConfig;
use crate::db::blocks::BlockRepository;
use crate::db::checkpoint::CheckpointStore;
use crate::error::{Error, Result};
use crate::indexer::gap_repair;
use crate::indexer::sync_engine::SyncEngine;
use crate::metrics;

/// Invoke gap repair once per this many tip-following ticks, so repair never
/// blocks tip-following for long (design note: "interleave one gap range per
/// N tip batches").
const GAP_REPAIR_EVERY_N_TICKS: u64 = 20;

/// Adaptive chunk sizing floor/growth. Purely a backoff / efficiency
/// behavior; it never changes the sync engine's atomicity or validation
/// semantics — only how many heights a given `sync_batch` call spans.
const MIN_EFFECTIVE_BATCH_SIZE: u64 = 1;

/// A JSON-RPC "range too large" style rejection, as returned by common
/// node providers when `eth_getLogs` is asked to scan too wide a span.
/// Detected by message content since providers do not agree on an error
/// code for this condition.
fn is_range_too_large(err: &Error) -> bool {
    let message = err.to_string().to_ascii_lowercase();
    message.contains("query returned more than")
        || message.contains("range is too large")
        || message.contains("block range") && message.contains("too large")
        || message.contains("exceeds the range")
        || message.contains("limit exceeded")
}

pub struct PollLoop {
    pub engine: SyncEngine,
    pub config: Arc<AppConfig>,
    /// Effective batch size, adapted downward on "range too large" upstream
    /// rejections and grown back geometrically on sustained success,
    /// bounded above by `config.batch_size`.
    effective_batch_size: AtomicU64,
}

impl PollLoop {
    pub fn new(engine: SyncEngine, config: Arc<AppConfig>) -> Self {
        let effective_batch_size = AtomicU64::new(config.batch_size);
        Self { engine, config, effective_batch_size }
    }
}

impl PollLoop {
    pub async fn run(&self, shutdown: CancellationToken) -> Result<()> {
        let chain_id = self.engine.chain_id;
        CheckpointStore::ensure_initialized(&self.engine.db, chain_id, 0).await?;

        let mut tick: u64 = 0;

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => {
                    tracing::info!(chain_id, "poll loop received shutdown signal");
                    return Ok(());
                }
                _ = tokio::time::sleep(self.config.poll_interval) => {}
            }

            tick += 1;

            if let Err(e) = self.tick(chain_id).await {
                tracing::error!(chain_id, error = %e, "poll tick failed");
                if e.is_fatal() {
                    return Err(e);
                }
            }

            if tick % GAP_REPAIR_EVERY_N_TICKS == 0 {
                if let Err(e) = gap_repair::repair_one_gap(&self.engine, chain_id).await {
                    tracing::warn!(chain_id, error = %e, "gap repair pass failed");
                }
            }
        }
    }

    async fn tick(&self, chain_id: u64) -> Result<()> {
        let head = self.engine.rpc.fetch_latest_block_number().await?;
        let target = head.saturating_sub(self.config.confirmation_depth);

        let status = CheckpointStore::get(&self.engine.db, chain_id).await?;
        let mut next_block = status.as_ref().map(|s| s.next_block.to_u64()).transpose()?.unwrap_or(0);

        CheckpointStore::update_chain_tip(&self.engine.db, chain_id, Some(target), Some(head)).await?;
        let lag = head.saturating_sub(next_block.saturating_sub(1).min(head));
        metrics::SYNC_LAG_BLOCKS.with_label_values(&[&chain_id.to_string()]).set(lag as i64);

        while next_block <= target {
            let span = self.effective_batch_size.load(Ordering::Relaxed).max(MIN_EFFECTIVE_BATCH_SIZE);
            let batch_end = (next_block + span - 1).min(target);

            let expected_parent_hash = if next_block == 0 {
                None
            } else {
                BlockRepository::find_by_number(&self.engine.db, chain_id, next_block - 1)
                    .await?
                    .map(|b| b.hash.as_str().to_string())
            };

            match self.engine.sync_batch(next_block, batch_end, expected_parent_hash).await {
                Ok(()) => {
                    self.grow_effective_batch_size();
                    next_block = batch_end + 1;
                }
                Err(e) if is_range_too_large(&e) => {
                    self.shrink_effective_batch_size();
                    tracing::warn!(
                        chain_id,
                        new_batch_size = self.effective_batch_size.load(Ordering::Relaxed),
                        "upstream rejected log range as too large, shrinking batch size"
                    );
                }
                Err(e) => return Err(e),
            }
        }

        Ok(())
    }

    fn shrink_effective_batch_size(&self) {
        shrink(&self.effective_batch_size);
    }

    /// Grows the effective batch size back geometrically on sustained
    /// success, never exceeding the configured `batch_size`.
    fn grow_effective_batch_size(&self) {
        grow(&self.effective_batch_size, self.config.batch_size);
    }
}

/// Halves the stored value, floored at [`MIN_EFFECTIVE_BATCH_SIZE`]. A free
/// function so it can be unit-tested against a bare `AtomicU64` without
/// standing up a full `PollLoop` (which needs a live DB pool and RPC pool).
fn shrink(size: &AtomicU64) {
    size.fetch_update(Ordering::Relaxed, Ordering::Relaxed, |cur| {
        Some((cur / 2).max(MIN_EFFECTIVE_BATCH_SIZE))
    })
    .ok();
}

/// Doubles the stored value, capped at `ceiling`.
fn grow(size: &AtomicU64, ceiling: u64) {
    size.fetch_update(Ordering::Relaxed, Ordering::Relaxed, |cur| {
        if cur >= ceiling {
            None
        } else {
            Some((cur * 2).min(ceiling))
        }
    })
    .ok();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn shrink_halves_and_floors_at_minimum() {
        let size = AtomicU64::new(10);
        shrink(&size);
        assert_eq!(size.load(Ordering::Relaxed), 5);
        shrink(&size);
        assert_eq!(size.load(Ordering::Relaxed), 2);
        shrink(&size);
        assert_eq!(size.load(Ordering::Relaxed), 1);
        shrink(&size);
        assert_eq!(size.load(Ordering::Relaxed), MIN_EFFECTIVE_BATCH_SIZE);
    }

    #[test]
    fn grow_doubles_and_caps_at_configured_ceiling() {
        let size = AtomicU64::new(1);
        grow(&size, 10);
        assert_eq!(size.load(Ordering::Relaxed), 2);
        grow(&size, 10);
        assert_eq!(size.load(Ordering::Relaxed), 4);
        grow(&size, 10);
        assert_eq!(size.load(Ordering::Relaxed), 8);
        grow(&size, 10);
        assert_eq!(size.load(Ordering::Relaxed), 10);
        grow(&size, 10);
        assert_eq!(size.load(Ordering::Relaxed), 10);
    }

    #[test]
    fn range_too_large_messages_are_recognized() {
        let err = Error::AllRpcEndpointsFailed {
            method: "eth_getLogs".into(),
            attempted: 1,
        };
        // AllRpcEndpointsFailed's Display doesn't carry the provider's
        // original wording, so it is never mistaken for a range-too-large
        // rejection.
        assert!(!is_range_too_large(&err));

        let transient = Error::TransientRpc {
            endpoint: "http://node".into(),
            kind: crate::rpc::types::RpcFailureKind::Transient,
            message: "query returned more than 10000 results".into(),
        };
        assert!(is_range_too_large(&transient));
    }

    #[test]
    fn unrelated_errors_are_not_range_too_large() {
        let err = Error::ValidationError {
            field: "hash".into(),
            reason: "bad format".into(),
        };
        assert!(!is_range_too_large(&err));
    }
}
