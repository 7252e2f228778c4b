//! Block Repository: typed persistence of canonical blocks.

use bigdecimal::BigDecimal;
use sqlx::postgres::Postgres;
use sqlx::Executor;

use crate::config::MAX_REORG_DEPTH;
use crate::domain::{Block, BlockUpsertResult, CoverageStats, Hash32, UpsertOutcome};
use crate::error::{Error, Result};
use crate::numeric::UBig256;

pub struct BlockRepository;

impl BlockRepository {
    pub async fn get_max_block_number<'e, E>(executor: E, chain_id: u64) -> Result<Option<UBig256>>
    where
        E: Executor<'e, Database = Postgres>,
    {
        let row: Option<(BigDecimal,)> =
            sqlx::query_as("SELECT max(number) FROM blocks WHERE chain_id = $1 AND number IS NOT NULL")
                .bind(BigDecimal::from(chain_id))
                .fetch_optional(executor)
                .await?;
        row.map(|(n,)| UBig256::from_bigdecimal(&n)).transpose()
    }

    pub async fn find_by_number<'e, E>(executor: E, chain_id: u64, number: u64) -> Result<Option<Block>>
    where
        E: Executor<'e, Database = Postgres>,
    {
        Self::find_by_number_impl(executor, chain_id, number, false).await
    }

    /// Row-level lock variant (`SELECT ... FOR UPDATE`), held until the
    /// enclosing transaction completes. Used by the Reorg Handler's
    /// common-ancestor walk to prevent a concurrent writer from mutating the
    /// row mid-comparison.
    pub async fn find_by_number_for_update<'e, E>(executor: E, chain_id: u64, number: u64) -> Result<Option<Block>>
    where
        E: Executor<'e, Database = Postgres>,
    {
        Self::find_by_number_impl(executor, chain_id, number, true).await
    }

    async fn find_by_number_impl<'e, E>(
        executor: E,
        chain_id: u64,
        number: u64,
        for_update: bool,
    ) -> Result<Option<Block>>
    where
        E: Executor<'e, Database = Postgres>,
    {
        let sql = if for_update {
            "SELECT chain_id, number, hash, parent_hash, timestamp FROM blocks
             WHERE chain_id = $1 AND number = $2 FOR UPDATE"
        } else {
            "SELECT chain_id, number, hash, parent_hash, timestamp FROM blocks
             WHERE chain_id = $1 AND number = $2"
        };
        let row: Option<(BigDecimal, BigDecimal, String, String, BigDecimal)> = sqlx::query_as(sql)
            .bind(BigDecimal::from(chain_id))
            .bind(BigDecimal::from(number))
            .fetch_optional(executor)
            .await?;

        row.map(|(chain_id, number, hash, parent_hash, timestamp)| {
            Ok(Block {
                chain_id: UBig256::from_bigdecimal(&chain_id)?,
                number: UBig256::from_bigdecimal(&number)?,
                hash: Hash32::new_unchecked(hash),
                parent_hash: Hash32::new_unchecked(parent_hash),
                timestamp: UBig256::from_bigdecimal(&timestamp)?,
            })
        })
        .transpose()
    }

    /// Inserts each block on `(chain_id, number)` conflict, updating
    /// `hash`/`parent_hash`/`timestamp`/`updated_at` only when the stored
    /// hash differs from the incoming one. The insert-vs-update
    /// classification uses the `xmax = 0` system column, which is exact
    /// (unlike the `created_at`-within-1s heuristic the design notes
    /// describe as merely permissible) — see DESIGN.md.
    pub async fn upsert_many<'c>(
        tx: &mut sqlx::PgConnection,
        chain_id: u64,
        blocks: &[Block],
    ) -> Result<Vec<BlockUpsertResult>> {
        let mut results = Vec::with_capacity(blocks.len());
        for block in blocks {
            // WHERE hash IS DISTINCT FROM EXCLUDED.hash means a conflicting
            // row whose hash is unchanged returns no row at all (Postgres
            // treats a false ON CONFLICT DO UPDATE ... WHERE as DO NOTHING),
            // so `None` here means Unchanged, not an error.
            let row: Option<(BigDecimal, bool)> = sqlx::query_as(
                "INSERT INTO blocks (chain_id, number, hash, parent_hash, timestamp, created_at, updated_at)
                 VALUES ($1, $2, $3, $4, $5, now(), now())
                 ON CONFLICT (chain_id, number) DO UPDATE
                 SET hash = EXCLUDED.hash, parent_hash = EXCLUDED.parent_hash,
                     timestamp = EXCLUDED.timestamp, updated_at = now()
                 WHERE blocks.hash IS DISTINCT FROM EXCLUDED.hash
                 RETURNING number, (xmax = 0) AS inserted",
            )
            .bind(BigDecimal::from(chain_id))
            .bind(block.number.to_bigdecimal())
            .bind(block.hash.as_str())
            .bind(block.parent_hash.as_str())
            .bind(block.timestamp.to_bigdecimal())
            .fetch_optional(&mut *tx)
            .await?;

            results.push(match row {
                Some((number, true)) => BlockUpsertResult {
                    number: UBig256::from_bigdecimal(&number)?,
                    outcome: UpsertOutcome::Inserted,
                },
                Some((number, false)) => BlockUpsertResult {
                    number: UBig256::from_bigdecimal(&number)?,
                    outcome: UpsertOutcome::Updated,
                },
                None => BlockUpsertResult {
                    number: block.number,
                    outcome: UpsertOutcome::Unchanged,
                },
            });
        }
        Ok(results)
    }

    /// Deletes all blocks `(chain_id, number > number)`. Refuses when the
    /// requested rollback exceeds `MAX_REORG_DEPTH` — callers must have
    /// already bounded the reorg walk, this is the repository-level backstop.
    pub async fn delete_after(tx: &mut sqlx::PgConnection, chain_id: u64, number: u64) -> Result<u64> {
        let max = Self::get_max_block_number(&mut *tx, chain_id).await?;
        if let Some(max) = max {
            let max = max.to_u64().unwrap_or(u64::MAX);
            let depth = max.saturating_sub(number);
            if depth > MAX_REORG_DEPTH {
                return Err(Error::ReorgTooDeep {
                    depth,
                    max_depth: MAX_REORG_DEPTH,
                });
            }
        }

        let result = sqlx::query("DELETE FROM blocks WHERE chain_id = $1 AND number > $2")
            .bind(BigDecimal::from(chain_id))
            .bind(BigDecimal::from(number))
            .execute(&mut *tx)
            .await?;
        Ok(result.rows_affected())
    }

    /// Finds contiguous missing ranges using the window-function `lead`
    /// idiom: for each stored `number`, compare against the next stored
    /// `number`; a gap of more than one height yields `(n+1, n'-1)`.
    pub async fn detect_gaps<'e, E>(executor: E, chain_id: u64) -> Result<Vec<(UBig256, UBig256)>>
    where
        E: Executor<'e, Database = Postgres>,
    {
        let rows: Vec<(BigDecimal, BigDecimal)> = sqlx::query_as(
            "SELECT number + 1 AS gap_start, next_number - 1 AS gap_end FROM (
                SELECT number, lead(number) OVER (ORDER BY number) AS next_number
                FROM blocks WHERE chain_id = $1
             ) t
             WHERE next_number IS NOT NULL AND next_number > number + 1",
        )
        .bind(BigDecimal::from(chain_id))
        .fetch_all(executor)
        .await?;

        rows.into_iter()
            .map(|(start, end)| Ok((UBig256::from_bigdecimal(&start)?, UBig256::from_bigdecimal(&end)?)))
            .collect()
    }

    pub async fn get_coverage_stats<'e, E>(
        executor: E,
        chain_id: u64,
        expected: UBig256,
    ) -> Result<CoverageStats>
    where
        E: Executor<'e, Database = Postgres>,
    {
        let row: (i64,) = sqlx::query_as("SELECT count(*) FROM blocks WHERE chain_id = $1")
            .bind(BigDecimal::from(chain_id))
            .fetch_one(executor)
            .await?;

        let total = UBig256::from_u64(row.0 as u64);
        let missing = if expected.0 > total.0 {
            UBig256(expected.0 - total.0)
        } else {
            UBig256::ZERO
        };
        let coverage_percent = if expected.0.is_zero() {
            UBig256::ZERO
        } else {
            UBig256((total.0 * alloy_primitives::U256::from(100)) / expected.0)
        };

        Ok(CoverageStats {
            total,
            expected,
            missing,
            coverage_percent,
        })
    }
}
