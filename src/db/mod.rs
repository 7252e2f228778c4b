//! Postgres-backed repositories.
//!
//! Every repository method that writes takes an explicit `&mut PgConnection`
//! or `Transaction` — nothing here opens its own transaction, so a caller
//! can compose several repository calls into one atomic unit.

pub mod blocks;
pub mod checkpoint;
pub mod lock;
pub mod transfers;

use sqlx::postgres::{PgPoolOptions, Postgres};
use sqlx::{Pool, Transaction};
use std::time::Duration;

use crate::error::Result;

pub type PgTx<'a> = Transaction<'a, Postgres>;

pub async fn connect(database_url: &str, max_connections: u32) -> Result<Pool<Postgres>> {
    let pool = PgPoolOptions::new()
        .max_connections(max_connections)
        .idle_timeout(Duration::from_secs(30))
        .acquire_timeout(Duration::from_secs(30))
        .connect(database_url)
        .await?;
    Ok(pool)
}

pub async fn run_migrations(pool: &Pool<Postgres>) -> Result<()> {
    sqlx::migrate!("./migrations").run(pool).await?;
    Ok(())
}
