//! Checkpoint Store: the durable per-chain sync cursor.
//!
//! `tryAdvance` is the linearizability fence the whole engine depends on —
//! the Sync Engine never trusts its own in-memory notion of progress, only
//! what this CAS reports back.

use bigdecimal::BigDecimal;
use sqlx::postgres::Postgres;
use sqlx::Executor;

use crate::domain::{GapStatus, SyncGap, SyncStatus};
use crate::error::Result;
use crate::numeric::UBig256;

pub struct CheckpointStore;

impl CheckpointStore {
    pub async fn get<'e, E>(executor: E, chain_id: u64) -> Result<Option<SyncStatus>>
    where
        E: Executor<'e, Database = Postgres>,
    {
        let row: Option<(BigDecimal, BigDecimal, Option<BigDecimal>, Option<BigDecimal>)> = sqlx::query_as(
            "SELECT chain_id, next_block, confirmed_block, head_block FROM sync_status WHERE chain_id = $1",
        )
        .bind(BigDecimal::from(chain_id))
        .fetch_optional(executor)
        .await?;

        row.map(|(chain_id, next_block, confirmed, head)| {
            Ok(SyncStatus {
                chain_id: UBig256::from_bigdecimal(&chain_id)?,
                next_block: UBig256::from_bigdecimal(&next_block)?,
                confirmed_block: confirmed.as_ref().map(UBig256::from_bigdecimal).transpose()?,
                head_block: head.as_ref().map(UBig256::from_bigdecimal).transpose()?,
            })
        })
        .transpose()
    }

    /// Initializes a chain's cursor at `next_block` if no row exists yet.
    /// A no-op if the chain already has a checkpoint (startup is always
    /// idempotent with respect to this call).
    pub async fn ensure_initialized<'e, E>(executor: E, chain_id: u64, next_block: u64) -> Result<()>
    where
        E: Executor<'e, Database = Postgres>,
    {
        sqlx::query(
            "INSERT INTO sync_status (chain_id, next_block, updated_at) VALUES ($1, $2, now())
             ON CONFLICT (chain_id) DO NOTHING",
        )
        .bind(BigDecimal::from(chain_id))
        .bind(BigDecimal::from(next_block))
        .execute(executor)
        .await?;
        Ok(())
    }

    /// Compare-and-set advance: succeeds iff the stored `next_block` equals
    /// `from_block`, in which case it is set to `to_block + 1`.
    pub async fn try_advance<'e, E>(executor: E, chain_id: u64, from_block: u64, to_block: u64) -> Result<bool>
    where
        E: Executor<'e, Database = Postgres>,
    {
        let result = sqlx::query(
            "UPDATE sync_status SET next_block = $1, updated_at = now()
             WHERE chain_id = $2 AND next_block = $3",
        )
        .bind(BigDecimal::from(to_block) + BigDecimal::from(1))
        .bind(BigDecimal::from(chain_id))
        .bind(BigDecimal::from(from_block))
        .execute(executor)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    pub async fn update_chain_tip<'e, E>(
        executor: E,
        chain_id: u64,
        confirmed: Option<u64>,
        head: Option<u64>,
    ) -> Result<()>
    where
        E: Executor<'e, Database = Postgres>,
    {
        sqlx::query(
            "UPDATE sync_status SET confirmed_block = $1, head_block = $2, updated_at = now() WHERE chain_id = $3",
        )
        .bind(confirmed.map(BigDecimal::from))
        .bind(head.map(BigDecimal::from))
        .bind(BigDecimal::from(chain_id))
        .execute(executor)
        .await?;
        Ok(())
    }

    pub async fn report_gap<'e, E>(executor: E, chain_id: u64, start: u64, end: u64) -> Result<()>
    where
        E: Executor<'e, Database = Postgres>,
    {
        sqlx::query(
            "INSERT INTO sync_gaps (chain_id, gap_start, gap_end, status, detected_at)
             VALUES ($1, $2, $3, 'pending', now())
             ON CONFLICT (chain_id, gap_start, gap_end) DO NOTHING",
        )
        .bind(BigDecimal::from(chain_id))
        .bind(BigDecimal::from(start))
        .bind(BigDecimal::from(end))
        .execute(executor)
        .await?;
        Ok(())
    }

    pub async fn list_pending_gaps<'e, E>(executor: E, chain_id: u64, limit: i64) -> Result<Vec<SyncGap>>
    where
        E: Executor<'e, Database = Postgres>,
    {
        let rows: Vec<(BigDecimal, BigDecimal, BigDecimal, String, i32, Option<String>)> = sqlx::query_as(
            "SELECT chain_id, gap_start, gap_end, status, retry_count, error_message
             FROM sync_gaps
             WHERE chain_id = $1 AND status IN ('pending', 'retrying')
             ORDER BY gap_start ASC
             LIMIT $2",
        )
        .bind(BigDecimal::from(chain_id))
        .bind(limit)
        .fetch_all(executor)
        .await?;

        rows.into_iter()
            .map(|(chain_id, start, end, status, retry_count, error_message)| {
                Ok(SyncGap {
                    chain_id: UBig256::from_bigdecimal(&chain_id)?,
                    gap_start: UBig256::from_bigdecimal(&start)?,
                    gap_end: UBig256::from_bigdecimal(&end)?,
                    status: GapStatus::from_str(&status).unwrap_or(GapStatus::Pending),
                    retry_count,
                    error_message,
                })
            })
            .collect()
    }

    pub async fn mark_gap_retry<'e, E>(executor: E, chain_id: u64, start: u64, end: u64, error_message: &str) -> Result<()>
    where
        E: Executor<'e, Database = Postgres>,
    {
        sqlx::query(
            "UPDATE sync_gaps SET status = 'retrying', retry_count = retry_count + 1,
             last_retry_at = now(), error_message = $4
             WHERE chain_id = $1 AND gap_start = $2 AND gap_end = $3",
        )
        .bind(BigDecimal::from(chain_id))
        .bind(BigDecimal::from(start))
        .bind(BigDecimal::from(end))
        .bind(error_message)
        .execute(executor)
        .await?;
        Ok(())
    }

    pub async fn mark_gap_filled<'e, E>(executor: E, chain_id: u64, start: u64, end: u64) -> Result<()>
    where
        E: Executor<'e, Database = Postgres>,
    {
        sqlx::query(
            "UPDATE sync_gaps SET status = 'filled', last_retry_at = now()
             WHERE chain_id = $1 AND gap_start = $2 AND gap_end = $3",
        )
        .bind(BigDecimal::from(chain_id))
        .bind(BigDecimal::from(start))
        .bind(BigDecimal::from(end))
        .execute(executor)
        .await?;
        Ok(())
    }

    pub async fn mark_gap_abandoned<'e, E>(executor: E, chain_id: u64, start: u64, end: u64) -> Result<()>
    where
        E: Executor<'e, Database = Postgres>,
    {
        sqlx::query(
            "UPDATE sync_gaps SET status = 'abandoned', last_retry_at = now()
             WHERE chain_id = $1 AND gap_start = $2 AND gap_end = $3",
        )
        .bind(BigDecimal::from(chain_id))
        .bind(BigDecimal::from(start))
        .bind(BigDecimal::from(end))
        .execute(executor)
        .await?;
        Ok(())
    }
}
