//! Integration tests for the Transfer Repository: idempotent insert and
//! FK cascade-delete from the owning Block.

use evm_sync::db::blocks::BlockRepository;
use evm_sync::db::transfers::TransferRepository;
use evm_sync::domain::{Address20, Block, Hash32, Transfer};
use evm_sync::numeric::UBig256;
use sqlx::PgPool;

fn hash_for(n: u8) -> Hash32 {
    Hash32::new_unchecked(format!("0x{:064x}", n))
}

fn addr_for(n: u8) -> Address20 {
    Address20::new_unchecked(format!("0x{:040x}", n))
}

fn block(number: u64) -> Block {
    Block {
        chain_id: UBig256::from_u64(1),
        number: UBig256::from_u64(number),
        hash: hash_for(number as u8 + 1),
        parent_hash: hash_for(number as u8),
        timestamp: UBig256::from_u64(1_700_000_000),
    }
}

fn transfer(block_number: u64, log_index: u32, amount: UBig256) -> Transfer {
    Transfer {
        chain_id: UBig256::from_u64(1),
        block_number: UBig256::from_u64(block_number),
        transaction_hash: hash_for(0xaa),
        log_index,
        from_address: addr_for(1),
        to_address: Some(addr_for(2)),
        amount,
        token_address: addr_for(3),
    }
}

#[sqlx::test]
async fn save_many_is_idempotent_on_conflict(pool: PgPool) {
    let mut tx = pool.begin().await.unwrap();
    BlockRepository::upsert_many(&mut tx, 1, &[block(42)]).await.unwrap();
    tx.commit().await.unwrap();

    let amount = UBig256::from_decimal_str("1000000000000000000").unwrap();
    let t = transfer(42, 0, amount);

    let mut tx = pool.begin().await.unwrap();
    let inserted = TransferRepository::save_many(&mut tx, 1, &[t.clone()]).await.unwrap();
    tx.commit().await.unwrap();
    assert_eq!(inserted, 1);

    let mut tx = pool.begin().await.unwrap();
    let inserted_again = TransferRepository::save_many(&mut tx, 1, &[t]).await.unwrap();
    tx.commit().await.unwrap();
    assert_eq!(inserted_again, 0);

    let stored = TransferRepository::find_by_block_range(&pool, 1, 42, 42, 10, 0).await.unwrap();
    assert_eq!(stored.len(), 1);
    assert_eq!(stored[0].amount.to_bigdecimal().to_string(), "1000000000000000000");
}

#[sqlx::test]
async fn amount_round_trips_max_u256_exactly(pool: PgPool) {
    let mut tx = pool.begin().await.unwrap();
    BlockRepository::upsert_many(&mut tx, 1, &[block(1)]).await.unwrap();
    tx.commit().await.unwrap();

    let max_amount = UBig256::from_decimal_str(
        "115792089237316195423570985008687907853269984665640564039457584007913129639935",
    )
    .unwrap();
    let t = transfer(1, 0, max_amount);

    let mut tx = pool.begin().await.unwrap();
    TransferRepository::save_many(&mut tx, 1, &[t]).await.unwrap();
    tx.commit().await.unwrap();

    let stored = TransferRepository::find_by_block_range(&pool, 1, 1, 1, 10, 0).await.unwrap();
    assert_eq!(stored[0].amount, max_amount);
}

#[sqlx::test]
async fn deleting_block_cascades_to_transfers(pool: PgPool) {
    let mut tx = pool.begin().await.unwrap();
    BlockRepository::upsert_many(&mut tx, 1, &[block(10), block(11)]).await.unwrap();
    tx.commit().await.unwrap();

    let mut tx = pool.begin().await.unwrap();
    TransferRepository::save_many(&mut tx, 1, &[transfer(10, 0, UBig256::from_u64(1))]).await.unwrap();
    TransferRepository::save_many(&mut tx, 1, &[transfer(11, 0, UBig256::from_u64(2))]).await.unwrap();
    tx.commit().await.unwrap();

    let mut tx = pool.begin().await.unwrap();
    BlockRepository::delete_after(&mut tx, 1, 9).await.unwrap();
    tx.commit().await.unwrap();

    let remaining = TransferRepository::find_by_block_range(&pool, 1, 0, 100, 10, 0).await.unwrap();
    assert!(remaining.is_empty());
}
