//! Crate-wide error taxonomy: each kind carries its own retry/fatal policy,
//! decided by the caller rather than baked into this enum.

use thiserror::Error;

use crate::rpc::types::RpcFailureKind;

#[derive(Debug, Error)]
pub enum Error {
    #[error("rpc call failed transiently on endpoint {endpoint}: {message}")]
    TransientRpc {
        endpoint: String,
        kind: RpcFailureKind,
        message: String,
    },

    #[error("all {attempted} rpc endpoints failed for {method}")]
    AllRpcEndpointsFailed { method: String, attempted: usize },

    #[error("block fetch failed after exhausting retries for block {block_number}: {source}")]
    BlockFetchError {
        block_number: u64,
        #[source]
        source: anyhow::Error,
    },

    #[error("chain discontinuity within fetched batch at block {block_number}: expected parent {expected_parent}, got {actual_parent}")]
    ChainDiscontinuity {
        block_number: u64,
        expected_parent: String,
        actual_parent: String,
    },

    #[error("reorg detected at block {block_number}, common ancestor search required")]
    ReorgDetected { block_number: u64 },

    #[error("reorg depth {depth} exceeds MAX_REORG_DEPTH {max_depth}")]
    ReorgTooDeep { depth: u64, max_depth: u64 },

    #[error("validation failed for field '{field}': {reason}")]
    ValidationError { field: String, reason: String },

    #[error("write verification failed: expected {expected} rows, found {found}")]
    WriteVerificationError { expected: usize, found: usize },

    #[error("checkpoint CAS failed: expected nextBlock={expected}, batch fromBlock={from_block}")]
    CheckpointAdvanceFailed { expected: u64, from_block: u64 },

    #[error("advisory lock '{name}' held by another instance")]
    LockAcquisitionFailed { name: String },

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("migration error: {0}")]
    Migrate(#[from] sqlx::migrate::MigrateError),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("{0}")]
    Other(#[from] anyhow::Error),
}

pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// Whether this error represents a fatal condition (exit code 1) as
    /// opposed to a self-healing one the poll loop can continue past.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Error::ChainDiscontinuity { .. }
                | Error::ReorgTooDeep { .. }
                | Error::ValidationError { .. }
                | Error::WriteVerificationError { .. }
                | Error::CheckpointAdvanceFailed { .. }
        )
    }

    /// Whether this error is the dedicated non-fatal "someone else is
    /// syncing" exit path (exit code 0).
    pub fn is_lock_contention(&self) -> bool {
        matches!(self, Error::LockAcquisitionFailed { .. })
    }
}
