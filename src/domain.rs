//! Bounded domain objects produced by [`crate::validator`] and persisted by
//! the repositories under [`crate::db`]. These are the only shapes that
//! cross the RPC → validation → database boundary; nothing upstream of the
//! validator is trusted to hold these types directly.

use crate::numeric::UBig256;
use std::fmt;

/// A 32-byte hash rendered as a 66-character lowercase `0x`-prefixed hex
/// string. The sentinel all-zeros hash is used as genesis's `parentHash`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Hash32(String);

impl Hash32 {
    pub const LEN: usize = 66;

    /// Constructs a `Hash32` from an already-validated lowercase hex string.
    /// Callers outside [`crate::validator`] should prefer
    /// `Validator::parse_hash`.
    pub(crate) fn new_unchecked(s: String) -> Self {
        debug_assert_eq!(s.len(), Self::LEN);
        debug_assert!(s.starts_with("0x"));
        Hash32(s)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn zero() -> Self {
        Hash32(format!("0x{}", "0".repeat(64)))
    }

    pub fn is_zero(&self) -> bool {
        self.0[2..].bytes().all(|b| b == b'0')
    }
}

impl fmt::Display for Hash32 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A 20-byte address rendered as a 42-character lowercase `0x`-prefixed hex
/// string.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Address20(String);

impl Address20 {
    pub const LEN: usize = 42;

    pub(crate) fn new_unchecked(s: String) -> Self {
        debug_assert_eq!(s.len(), Self::LEN);
        Address20(s)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_zero(&self) -> bool {
        self.0[2..].bytes().all(|b| b == b'0')
    }
}

impl fmt::Display for Address20 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Canonical, committed block header as stored by the Block Repository.
#[derive(Debug, Clone)]
pub struct Block {
    pub chain_id: UBig256,
    pub number: UBig256,
    pub hash: Hash32,
    pub parent_hash: Hash32,
    pub timestamp: UBig256,
}

/// Classification returned by `Block Repository::upsertMany` per row: was
/// the row freshly inserted, or did an existing row's hash change under the
/// conflict-guarded update?
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpsertOutcome {
    Inserted,
    Updated,
    Unchanged,
}

#[derive(Debug, Clone)]
pub struct BlockUpsertResult {
    pub number: UBig256,
    pub outcome: UpsertOutcome,
}

/// Decoded ERC-20 `Transfer` event, normalized (lowercase addresses) and
/// bounds-validated.
#[derive(Debug, Clone)]
pub struct Transfer {
    pub chain_id: UBig256,
    pub block_number: UBig256,
    pub transaction_hash: Hash32,
    pub log_index: u32,
    pub from_address: Address20,
    pub to_address: Option<Address20>,
    pub amount: UBig256,
    pub token_address: Address20,
}

/// Durable per-chain sync cursor.
#[derive(Debug, Clone)]
pub struct SyncStatus {
    pub chain_id: UBig256,
    pub next_block: UBig256,
    pub confirmed_block: Option<UBig256>,
    pub head_block: Option<UBig256>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GapStatus {
    Pending,
    Retrying,
    Filled,
    Abandoned,
}

impl GapStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            GapStatus::Pending => "pending",
            GapStatus::Retrying => "retrying",
            GapStatus::Filled => "filled",
            GapStatus::Abandoned => "abandoned",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(GapStatus::Pending),
            "retrying" => Some(GapStatus::Retrying),
            "filled" => Some(GapStatus::Filled),
            "abandoned" => Some(GapStatus::Abandoned),
            _ => None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct SyncGap {
    pub chain_id: UBig256,
    pub gap_start: UBig256,
    pub gap_end: UBig256,
    pub status: GapStatus,
    pub retry_count: i32,
    pub error_message: Option<String>,
}

/// Coverage statistics over a chain's stored blocks. All arithmetic is
/// big-int; `coverage_percent` is computed as `(total * 100) / expected`,
/// an exact integer division (no float division).
#[derive(Debug, Clone)]
pub struct CoverageStats {
    pub total: UBig256,
    pub expected: UBig256,
    pub missing: UBig256,
    pub coverage_percent: UBig256,
}
