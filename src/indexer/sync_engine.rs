//! Sync Engine: fetch parallel, validate chain, detect reorg, write
//! atomically, advance checkpoint. The hard core of the service.

use std::sync::Arc;
use std::time::Instant;

use futures::future::join_all;
use sqlx::{Pool, Postgres};
use tokio::sync::Semaphore;

use crate::config::{AppConfig, BATCH_CAP};
use crate::db::blocks::BlockRepository;
use crate::db::checkpoint::CheckpointStore;
use crate::db::transfers::TransferRepository;
use crate::error::{Error, Result};
use crate::indexer::reorg::ReorgHandler;
use crate::metrics;
use crate::numeric::UBig256;
use crate::rpc::types::TRANSFER_EVENT_TOPIC;
use crate::rpc::RpcPool;
use crate::validator::Validator;

/// Whether a batch is following the chain tip (and owns the checkpoint
/// cursor) or backfilling a range the checkpoint has already passed (gap
/// repair, or the residual range left behind by a reorg).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum BatchMode {
    TipFollow,
    Backfill,
}

pub struct SyncEngine {
    pub chain_id: u64,
    pub rpc: Arc<RpcPool>,
    pub db: Pool<Postgres>,
    pub config: Arc<AppConfig>,
}

impl SyncEngine {
    pub fn new(chain_id: u64, rpc: Arc<RpcPool>, db: Pool<Postgres>, config: Arc<AppConfig>) -> Self {
        Self { chain_id, rpc, db, config }
    }

    /// Syncs `[from_block, to_block]` atomically, pinned to the caller's
    /// expected parent hash for the chain tip. On success the checkpoint
    /// cursor advances past `to_block`.
    pub async fn sync_batch(&self, from_block: u64, to_block: u64, expected_parent_hash: Option<String>) -> Result<()> {
        self.sync_batch_checked(from_block, to_block, expected_parent_hash, BatchMode::TipFollow).await
    }

    /// Re-syncs `[from_block, to_block]` atomically for a range already
    /// behind the checkpoint cursor: gap repair, or the residual range a
    /// reorg leaves behind. The checkpoint is never touched; the caller
    /// (gap repair) tracks completion itself via `sync_gaps`.
    pub async fn sync_gap_batch(&self, from_block: u64, to_block: u64) -> Result<()> {
        self.sync_batch_checked(from_block, to_block, None, BatchMode::Backfill).await
    }

    async fn sync_batch_checked(
        &self,
        from_block: u64,
        to_block: u64,
        expected_parent_hash: Option<String>,
        mode: BatchMode,
    ) -> Result<()> {
        if from_block > to_block {
            return Err(Error::ValidationError {
                field: "fromBlock/toBlock".into(),
                reason: format!("fromBlock {from_block} > toBlock {to_block}"),
            });
        }
        let span = to_block - from_block + 1;
        if span > BATCH_CAP {
            return Err(Error::ValidationError {
                field: "batch_span".into(),
                reason: format!("batch span {span} exceeds BATCH_CAP {BATCH_CAP}"),
            });
        }

        let batch_start = Instant::now();
        let result = self.sync_batch_inner(from_block, to_block, expected_parent_hash, mode).await;
        metrics::BATCH_DURATION_MS.observe(batch_start.elapsed().as_millis() as f64);
        result
    }

    async fn sync_batch_inner(
        &self,
        from_block: u64,
        to_block: u64,
        expected_parent_hash: Option<String>,
        mode: BatchMode,
    ) -> Result<()> {
        // Phase 1: parallel, bounded fetch.
        let blocks = match self.fetch_blocks(from_block, to_block).await {
            Ok(blocks) => blocks,
            Err(e) => {
                // Transient exhaustion (BlockFetchError / AllRpcEndpointsFailed):
                // abort the whole batch, record a gap for the repair routine,
                // and surface the error so the caller can move on. A
                // non-transient (validation) failure is fatal and does not
                // get a gap recorded, since retrying it can never succeed.
                if !matches!(e, Error::ValidationError { .. }) {
                    CheckpointStore::report_gap(&self.db, self.chain_id, from_block, to_block).await?;
                    tracing::warn!(
                        chain_id = self.chain_id,
                        from_block,
                        to_block,
                        error = %e,
                        "block fetch failed, batch aborted and gap recorded"
                    );
                }
                return Err(e);
            }
        };

        // Phase 2: in-memory validation, no DB access.
        let mut parsed = Vec::with_capacity(blocks.len());
        for raw in &blocks {
            parsed.push(Validator::parse_block(UBig256::from_u64(self.chain_id), raw)?);
        }
        parsed.sort_by_key(|b| b.number);

        for window in parsed.windows(2) {
            if window[1].parent_hash.as_str() != window[0].hash.as_str() {
                return Err(Error::ChainDiscontinuity {
                    block_number: window[1].number.to_u64().unwrap_or(0),
                    expected_parent: window[0].hash.as_str().to_string(),
                    actual_parent: window[1].parent_hash.as_str().to_string(),
                });
            }
        }

        // Phase 3: seam continuity check against the pinned expected parent
        // hash on the tip-following path, or the locally stored block
        // otherwise. A mismatch means a reorg at the seam, not a terminal
        // error, so it routes into the Reorg Handler in the same
        // transaction below instead of leaving the caller to retry blind.
        let mut reorg_ancestor: Option<u64> = None;
        if from_block > 0 {
            if let Some(first) = parsed.first() {
                let seam_mismatch = if let Some(expected) = &expected_parent_hash {
                    first.parent_hash.as_str() != expected
                } else if let Some(prev) = BlockRepository::find_by_number(&self.db, self.chain_id, from_block - 1).await? {
                    first.parent_hash.as_str() != prev.hash.as_str()
                } else {
                    false
                };
                if seam_mismatch {
                    reorg_ancestor = Some(from_block - 1);
                }
            }
        }

        // Phase 4: single atomic transaction.
        let write_start = Instant::now();
        let mut tx = self.db.begin().await?;

        if let Some(seam) = reorg_ancestor {
            tracing::warn!(
                chain_id = self.chain_id,
                from_block,
                error = %Error::ReorgDetected { block_number: from_block },
                "seam mismatch at batch start, walking back to find common ancestor"
            );
            let handler = ReorgHandler {
                chain_id: self.chain_id,
                rpc: self.rpc.clone(),
            };
            handler.handle(&mut tx, seam + 1).await?;
        }

        let upsert_results = BlockRepository::upsert_many(&mut tx, self.chain_id, &parsed).await?;

        let logs = self
            .rpc
            .fetch_logs(
                &self.config.token_contract_address,
                TRANSFER_EVENT_TOPIC,
                from_block,
                to_block,
            )
            .await
            .map_err(|e| {
                tracing::error!(chain_id = self.chain_id, from_block, to_block, error = %e, "transfer log fetch failed, rolling back batch");
                e
            })?;

        let mut transfers = Vec::with_capacity(logs.len());
        for raw in &logs {
            transfers.push(Validator::parse_transfer_log(UBig256::from_u64(self.chain_id), raw)?);
        }

        TransferRepository::save_many(&mut tx, self.chain_id, &transfers).await?;

        let committed_count: i64 =
            sqlx::query_scalar("SELECT count(*) FROM blocks WHERE chain_id = $1 AND number BETWEEN $2 AND $3")
                .bind(bigdecimal::BigDecimal::from(self.chain_id))
                .bind(bigdecimal::BigDecimal::from(from_block))
                .bind(bigdecimal::BigDecimal::from(to_block))
                .fetch_one(&mut *tx)
                .await?;

        if committed_count as usize != parsed.len() {
            return Err(Error::WriteVerificationError {
                expected: parsed.len(),
                found: committed_count as usize,
            });
        }

        tx.commit().await?;
        metrics::DB_WRITE_LATENCY_MS.observe(write_start.elapsed().as_millis() as f64);

        metrics::BLOCKS_INDEXED_TOTAL.inc_by(upsert_results.len() as u64);
        metrics::TRANSFERS_INDEXED_TOTAL.inc_by(transfers.len() as u64);

        // Phase 5: advance the checkpoint strictly after commit. Only the
        // tip-following batch owns the cursor; a backfill batch (gap
        // repair, reorg residual) writes into a range already behind it, so
        // the CAS must be skipped there. It would fail every time and turn
        // every successful gap fill into a reported error.
        if mode == BatchMode::TipFollow {
            let advanced = CheckpointStore::try_advance(&self.db, self.chain_id, from_block, to_block).await?;
            if !advanced {
                return Err(Error::CheckpointAdvanceFailed {
                    expected: from_block,
                    from_block,
                });
            }
        }

        tracing::info!(
            chain_id = self.chain_id,
            from_block,
            to_block,
            blocks = parsed.len(),
            transfers = transfers.len(),
            backfill = mode == BatchMode::Backfill,
            "batch committed"
        );

        Ok(())
    }

    async fn fetch_blocks(&self, from_block: u64, to_block: u64) -> Result<Vec<crate::rpc::types::RawBlock>> {
        let semaphore = Arc::new(Semaphore::new(self.config.concurrency));
        let tasks: Vec<_> = (from_block..=to_block)
            .map(|number| {
                let sem = semaphore.clone();
                let rpc = self.rpc.clone();
                async move {
                    let _permit = sem.acquire().await.expect("semaphore is never closed");
                    rpc.fetch_block(number)
                        .await
                        .and_then(|b| b.ok_or(Error::BlockFetchError {
                            block_number: number,
                            source: anyhow::anyhow!("block {number} not found upstream"),
                        }))
                }
            })
            .collect();

        let results = join_all(tasks).await;
        let mut blocks = Vec::with_capacity(results.len());
        for r in results {
            blocks.push(r?);
        }
        Ok(blocks)
    }
}
