//! Transfer Repository: transactional persistence of decoded ERC-20
//! Transfer events, bound to their block by foreign key.

use bigdecimal::BigDecimal;
use sqlx::postgres::Postgres;
use sqlx::Executor;

use crate::domain::{Address20, Hash32, Transfer};
use crate::error::Result;
use crate::numeric::UBig256;

pub struct TransferRepository;

impl TransferRepository {
    /// Bulk insert inside the caller's transaction. On
    /// `(chain_id, block_number, log_index)` conflict, does nothing —
    /// re-running a completed batch is a no-op.
    pub async fn save_many(tx: &mut sqlx::PgConnection, chain_id: u64, transfers: &[Transfer]) -> Result<u64> {
        let mut inserted = 0u64;
        for t in transfers {
            let result = sqlx::query(
                "INSERT INTO transfers
                    (chain_id, block_number, transaction_hash, log_index, from_address, to_address, amount, token_address, created_at)
                 VALUES ($1, $2, $3, $4, $5, $6, $7, $8, now())
                 ON CONFLICT (chain_id, block_number, log_index) DO NOTHING",
            )
            .bind(BigDecimal::from(chain_id))
            .bind(t.block_number.to_bigdecimal())
            .bind(t.transaction_hash.as_str())
            .bind(t.log_index as i64)
            .bind(t.from_address.as_str())
            .bind(t.to_address.as_ref().map(|a| a.as_str()))
            .bind(t.amount.to_bigdecimal())
            .bind(t.token_address.as_str())
            .execute(&mut *tx)
            .await?;
            inserted += result.rows_affected();
        }
        Ok(inserted)
    }

    pub async fn find_by_block_range<'e, E>(
        executor: E,
        chain_id: u64,
        from_block: u64,
        to_block: u64,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<Transfer>>
    where
        E: Executor<'e, Database = Postgres>,
    {
        let rows: Vec<TransferRow> = sqlx::query_as(
            "SELECT chain_id, block_number, transaction_hash, log_index, from_address, to_address, amount, token_address
             FROM transfers
             WHERE chain_id = $1 AND block_number BETWEEN $2 AND $3
             ORDER BY block_number ASC, log_index ASC
             LIMIT $4 OFFSET $5",
        )
        .bind(BigDecimal::from(chain_id))
        .bind(BigDecimal::from(from_block))
        .bind(BigDecimal::from(to_block))
        .bind(limit)
        .bind(offset)
        .fetch_all(executor)
        .await?;

        rows.into_iter().map(TransferRow::into_domain).collect()
    }

    pub async fn find_by_address<'e, E>(
        executor: E,
        chain_id: u64,
        address: &str,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<Transfer>>
    where
        E: Executor<'e, Database = Postgres>,
    {
        let address = address.to_ascii_lowercase();
        let rows: Vec<TransferRow> = sqlx::query_as(
            "SELECT chain_id, block_number, transaction_hash, log_index, from_address, to_address, amount, token_address
             FROM transfers
             WHERE chain_id = $1 AND (from_address = $2 OR to_address = $2)
             ORDER BY block_number DESC, log_index DESC
             LIMIT $3 OFFSET $4",
        )
        .bind(BigDecimal::from(chain_id))
        .bind(&address)
        .bind(limit)
        .bind(offset)
        .fetch_all(executor)
        .await?;

        rows.into_iter().map(TransferRow::into_domain).collect()
    }
}

#[derive(sqlx::FromRow)]
struct TransferRow {
    chain_id: BigDecimal,
    block_number: BigDecimal,
    transaction_hash: String,
    log_index: i64,
    from_address: String,
    to_address: Option<String>,
    amount: BigDecimal,
    token_address: String,
}

impl TransferRow {
    fn into_domain(self) -> Result<Transfer> {
        Ok(Transfer {
            chain_id: UBig256::from_bigdecimal(&self.chain_id)?,
            block_number: UBig256::from_bigdecimal(&self.block_number)?,
            transaction_hash: Hash32::new_unchecked(self.transaction_hash),
            log_index: self.log_index as u32,
            from_address: Address20::new_unchecked(self.from_address),
            to_address: self.to_address.map(Address20::new_unchecked),
            amount: UBig256::from_bigdecimal(&self.amount)?,
            token_address: Address20::new_unchecked(self.token_address),
        })
    }
}
