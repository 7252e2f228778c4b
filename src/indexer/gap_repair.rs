//! Gap repair: re-runs the Sync Engine over ranges recorded as
//! [`crate::domain::SyncGap`] until they are filled.
//!
//! Interleaved with tip-following by the Poll Loop (one gap per N ticks, see
//! [`crate::indexer::poll_loop::GAP_REPAIR_EVERY_N_TICKS`]) so repair never
//! blocks tip-following for long, and also exposed as a one-shot pass for
//! the `evm-sync gap-repair` subcommand.

use crate::db::checkpoint::CheckpointStore;
use crate::error::Result;
use crate::indexer::sync_engine::SyncEngine;
use crate::metrics;

/// Attempts to fill the single oldest pending/retrying gap for `chain_id`,
/// if any. A gap that fails is marked `retrying` with the error recorded,
/// not `abandoned` — gaps are retried indefinitely under operator
/// visibility (`sync_gaps` rows with a climbing `retry_count` are the
/// signal to intervene).
pub async fn repair_one_gap(engine: &SyncEngine, chain_id: u64) -> Result<()> {
    let gaps = CheckpointStore::list_pending_gaps(&engine.db, chain_id, 1).await?;
    let Some(gap) = gaps.into_iter().next() else {
        return Ok(());
    };

    let start = gap.gap_start.to_u64()?;
    let end = gap.gap_end.to_u64()?;

    tracing::info!(chain_id, gap_start = start, gap_end = end, retry_count = gap.retry_count, "attempting gap repair");

    match engine.sync_gap_batch(start, end).await {
        Ok(()) => {
            CheckpointStore::mark_gap_filled(&engine.db, chain_id, start, end).await?;
            metrics::SYNC_GAPS_OPEN.with_label_values(&[&chain_id.to_string()]).dec();
            tracing::info!(chain_id, gap_start = start, gap_end = end, "gap filled");
            Ok(())
        }
        Err(e) => {
            CheckpointStore::mark_gap_retry(&engine.db, chain_id, start, end, &e.to_string()).await?;
            tracing::warn!(chain_id, gap_start = start, gap_end = end, error = %e, "gap repair attempt failed, will retry");
            Err(e)
        }
    }
}

/// Drains every pending/retrying gap for `chain_id` in one pass, used by the
/// one-shot `evm-sync gap-repair` subcommand. Keeps going past individual
/// gap failures (they remain `retrying` for the next pass) and returns once
/// no pending gap remains or `max_gaps` attempts have been made.
pub async fn repair_all_gaps(engine: &SyncEngine, chain_id: u64, max_gaps: usize) -> Result<(usize, usize)> {
    let mut filled = 0;
    let mut failed = 0;

    for _ in 0..max_gaps {
        let gaps = CheckpointStore::list_pending_gaps(&engine.db, chain_id, 1).await?;
        if gaps.is_empty() {
            break;
        }
        match repair_one_gap(engine, chain_id).await {
            Ok(()) => filled += 1,
            Err(_) => failed += 1,
        }
    }

    Ok((filled, failed))
}
