//! Integration tests for the Advisory Lock: mutual exclusion across two
//! independent connections, and non-blocking contention.

use evm_sync::db::lock::{lock_name_for_chain, AdvisoryLock};
use sqlx::PgPool;

#[sqlx::test]
async fn second_acquire_on_same_lock_is_contended(pool: PgPool) {
    let name = lock_name_for_chain(1);

    let held = AdvisoryLock::try_acquire(&pool, &name).await.unwrap();
    assert!(held.is_some());

    let contended = AdvisoryLock::try_acquire(&pool, &name).await.unwrap();
    assert!(contended.is_none());

    held.unwrap().release().await.unwrap();
}

#[sqlx::test]
async fn lock_is_acquirable_again_after_release(pool: PgPool) {
    let name = lock_name_for_chain(1);

    let first = AdvisoryLock::try_acquire(&pool, &name).await.unwrap().unwrap();
    first.release().await.unwrap();

    let second = AdvisoryLock::try_acquire(&pool, &name).await.unwrap();
    assert!(second.is_some());
    second.unwrap().release().await.unwrap();
}

#[sqlx::test]
async fn distinct_chain_ids_do_not_contend(pool: PgPool) {
    let chain_a = lock_name_for_chain(1);
    let chain_b = lock_name_for_chain(2);

    let held_a = AdvisoryLock::try_acquire(&pool, &chain_a).await.unwrap();
    let held_b = AdvisoryLock::try_acquire(&pool, &chain_b).await.unwrap();

    assert!(held_a.is_some());
    assert!(held_b.is_some());

    held_a.unwrap().release().await.unwrap();
    held_b.unwrap().release().await.unwrap();
}

#[sqlx::test]
async fn verify_held_reports_true_while_session_holds_lock(pool: PgPool) {
    let name = lock_name_for_chain(1);
    let mut held = AdvisoryLock::try_acquire(&pool, &name).await.unwrap().unwrap();

    assert!(held.verify_held().await.unwrap());

    held.release().await.unwrap();
}
