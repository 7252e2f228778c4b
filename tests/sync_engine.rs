//! Integration test for the Sync Engine's happy path: fetch two blocks and
//! one Transfer log from a mocked JSON-RPC endpoint, write them atomically,
//! and advance the checkpoint — end to end, against a real Postgres.

use std::sync::Arc;
use std::time::Duration;

use evm_sync::config::AppConfig;
use evm_sync::db::blocks::BlockRepository;
use evm_sync::db::checkpoint::CheckpointStore;
use evm_sync::db::transfers::TransferRepository;
use evm_sync::indexer::sync_engine::SyncEngine;
use evm_sync::rpc::{RpcPool, RpcPoolConfig};
use mockito::Matcher;
use serde_json::json;
use sqlx::PgPool;

fn hash(n: u8) -> String {
    format!("0x{:064x}", n)
}

fn addr(n: u8) -> String {
    format!("0x{:040x}", n)
}

fn topic_word_for_address(addr_hex40: &str) -> String {
    format!("0x{}{}", "0".repeat(24), &addr_hex40[2..])
}

fn test_config(endpoint: String, token_contract_address: String) -> Arc<AppConfig> {
    Arc::new(AppConfig {
        rpc_endpoints: vec![endpoint],
        database_url: String::new(),
        chain_id: 1,
        token_contract_address,
        batch_size: 10,
        concurrency: 4,
        max_retries: 1,
        poll_interval: Duration::from_millis(1),
        confirmation_depth: 0,
        instance_id: "test".into(),
        rpc_timeout: Duration::from_secs(5),
        db_max_connections: 5,
        health_port: 0,
        readiness_lag_threshold: 50,
    })
}

#[sqlx::test]
async fn sync_batch_fetches_writes_and_advances_checkpoint(pool: PgPool) {
    let mut server = mockito::Server::new_async().await;

    let genesis_hash = hash(0);
    let block1_hash = hash(1);
    let from_address = addr(0xaa);
    let to_address = addr(0xbb);
    let token_address = addr(0x01);
    let tx_hash = hash(0xcc);

    let _block0_mock = server
        .mock("POST", "/")
        .match_body(Matcher::PartialJson(json!({
            "method": "eth_getBlockByNumber",
            "params": ["0x0", false],
        })))
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(
            json!({
                "jsonrpc": "2.0",
                "id": 1,
                "result": {
                    "number": "0x0",
                    "hash": genesis_hash,
                    "parentHash": format!("0x{}", "0".repeat(64)),
                    "timestamp": "0x64c00000",
                }
            })
            .to_string(),
        )
        .create_async()
        .await;

    let _block1_mock = server
        .mock("POST", "/")
        .match_body(Matcher::PartialJson(json!({
            "method": "eth_getBlockByNumber",
            "params": ["0x1", false],
        })))
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(
            json!({
                "jsonrpc": "2.0",
                "id": 1,
                "result": {
                    "number": "0x1",
                    "hash": block1_hash,
                    "parentHash": genesis_hash,
                    "timestamp": "0x64c00001",
                }
            })
            .to_string(),
        )
        .create_async()
        .await;

    let _logs_mock = server
        .mock("POST", "/")
        .match_body(Matcher::PartialJson(json!({
            "method": "eth_getLogs",
        })))
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(
            json!({
                "jsonrpc": "2.0",
                "id": 1,
                "result": [{
                    "address": token_address,
                    "topics": [
                        evm_sync::rpc::types::TRANSFER_EVENT_TOPIC,
                        topic_word_for_address(&from_address),
                        topic_word_for_address(&to_address),
                    ],
                    "data": "0xde0b6b3a7640000",
                    "blockNumber": "0x1",
                    "transactionHash": tx_hash,
                    "logIndex": "0x0",
                }]
            })
            .to_string(),
        )
        .create_async()
        .await;

    let rpc = Arc::new(
        RpcPool::new(RpcPoolConfig {
            endpoints: vec![server.url()],
            per_request_timeout: Duration::from_secs(5),
            max_retries: 1,
            backoff_base: Duration::from_millis(1),
            backoff_cap: Duration::from_millis(5),
        })
        .unwrap(),
    );

    let config = test_config(server.url(), token_address.clone());
    CheckpointStore::ensure_initialized(&pool, 1, 0).await.unwrap();

    let engine = SyncEngine::new(1, rpc, pool.clone(), config);
    engine.sync_batch(0, 1, None).await.unwrap();

    let b0 = BlockRepository::find_by_number(&pool, 1, 0).await.unwrap().unwrap();
    assert_eq!(b0.hash.as_str(), genesis_hash);
    let b1 = BlockRepository::find_by_number(&pool, 1, 1).await.unwrap().unwrap();
    assert_eq!(b1.hash.as_str(), block1_hash);

    let status = CheckpointStore::get(&pool, 1).await.unwrap().unwrap();
    assert_eq!(status.next_block.to_u64().unwrap(), 2);

    let transfers = TransferRepository::find_by_block_range(&pool, 1, 1, 1, 10, 0).await.unwrap();
    assert_eq!(transfers.len(), 1);
    assert_eq!(transfers[0].amount.to_bigdecimal().to_string(), "1000000000000000000");
    assert_eq!(transfers[0].from_address.as_str(), from_address);
    assert_eq!(transfers[0].to_address.as_ref().unwrap().as_str(), to_address);
}
