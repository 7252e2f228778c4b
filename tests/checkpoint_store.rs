//! Integration tests for the Checkpoint Store: compare-and-set advance
//! semantics and gap bookkeeping.

use evm_sync::db::checkpoint::CheckpointStore;
use evm_sync::domain::GapStatus;
use sqlx::PgPool;

#[sqlx::test]
async fn ensure_initialized_is_idempotent(pool: PgPool) {
    CheckpointStore::ensure_initialized(&pool, 1, 0).await.unwrap();
    CheckpointStore::ensure_initialized(&pool, 1, 500).await.unwrap();

    let status = CheckpointStore::get(&pool, 1).await.unwrap().unwrap();
    assert_eq!(status.next_block.to_u64().unwrap(), 0);
}

#[sqlx::test]
async fn try_advance_succeeds_only_on_matching_from_block(pool: PgPool) {
    CheckpointStore::ensure_initialized(&pool, 1, 0).await.unwrap();

    let ok = CheckpointStore::try_advance(&pool, 1, 0, 9).await.unwrap();
    assert!(ok);

    let status = CheckpointStore::get(&pool, 1).await.unwrap().unwrap();
    assert_eq!(status.next_block.to_u64().unwrap(), 10);

    // Stale from_block: the cursor has already moved past 0.
    let stale = CheckpointStore::try_advance(&pool, 1, 0, 19).await.unwrap();
    assert!(!stale);

    let status_after = CheckpointStore::get(&pool, 1).await.unwrap().unwrap();
    assert_eq!(status_after.next_block.to_u64().unwrap(), 10);
}

#[sqlx::test]
async fn try_advance_is_safe_under_concurrent_callers(pool: PgPool) {
    CheckpointStore::ensure_initialized(&pool, 1, 0).await.unwrap();

    let results = futures::future::join_all((0..5).map(|_| {
        let pool = pool.clone();
        async move { CheckpointStore::try_advance(&pool, 1, 0, 99).await.unwrap() }
    }))
    .await;

    assert_eq!(results.iter().filter(|ok| **ok).count(), 1);
    let status = CheckpointStore::get(&pool, 1).await.unwrap().unwrap();
    assert_eq!(status.next_block.to_u64().unwrap(), 100);
}

#[sqlx::test]
async fn update_chain_tip_sets_confirmed_and_head(pool: PgPool) {
    CheckpointStore::ensure_initialized(&pool, 1, 0).await.unwrap();
    CheckpointStore::update_chain_tip(&pool, 1, Some(950), Some(1000)).await.unwrap();

    let status = CheckpointStore::get(&pool, 1).await.unwrap().unwrap();
    assert_eq!(status.confirmed_block.unwrap().to_u64().unwrap(), 950);
    assert_eq!(status.head_block.unwrap().to_u64().unwrap(), 1000);
}

#[sqlx::test]
async fn report_gap_is_idempotent_and_listable(pool: PgPool) {
    CheckpointStore::report_gap(&pool, 1, 10, 20).await.unwrap();
    CheckpointStore::report_gap(&pool, 1, 10, 20).await.unwrap();

    let gaps = CheckpointStore::list_pending_gaps(&pool, 1, 10).await.unwrap();
    assert_eq!(gaps.len(), 1);
    assert_eq!(gaps[0].status, GapStatus::Pending);
    assert_eq!(gaps[0].retry_count, 0);
}

#[sqlx::test]
async fn gap_lifecycle_retry_then_filled_removes_from_pending(pool: PgPool) {
    CheckpointStore::report_gap(&pool, 1, 10, 20).await.unwrap();

    CheckpointStore::mark_gap_retry(&pool, 1, 10, 20, "timeout").await.unwrap();
    let gaps = CheckpointStore::list_pending_gaps(&pool, 1, 10).await.unwrap();
    assert_eq!(gaps[0].status, GapStatus::Retrying);
    assert_eq!(gaps[0].retry_count, 1);
    assert_eq!(gaps[0].error_message.as_deref(), Some("timeout"));

    CheckpointStore::mark_gap_filled(&pool, 1, 10, 20).await.unwrap();
    let gaps_after = CheckpointStore::list_pending_gaps(&pool, 1, 10).await.unwrap();
    assert!(gaps_after.is_empty());
}

#[sqlx::test]
async fn gap_can_be_abandoned(pool: PgPool) {
    CheckpointStore::report_gap(&pool, 1, 30, 40).await.unwrap();
    CheckpointStore::mark_gap_abandoned(&pool, 1, 30, 40).await.unwrap();

    let gaps = CheckpointStore::list_pending_gaps(&pool, 1, 10).await.unwrap();
    assert!(gaps.is_empty());
}
