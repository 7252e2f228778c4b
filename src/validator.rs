//! Schema-enforced parsing of raw RPC responses into bounded domain objects.
//! Validation here is total and strict: a single malformed record fails the
//! whole batch. There is no `safeValidate`-style entry point that silently
//! drops records — every parse either returns a fully valid
//! [`crate::domain`] value or an [`Error::ValidationError`].

use chrono::Utc;
use once_cell::sync::Lazy;
use regex::Regex;

use crate::domain::{Address20, Hash32, Transfer};
use crate::error::{Error, Result};
use crate::numeric::UBig256;
use crate::rpc::types::{RawBlock, RawLog, TRANSFER_EVENT_TOPIC};

static HASH_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^0x[0-9a-f]{64}$").unwrap());
static ADDRESS_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^0x[0-9a-f]{40}$").unwrap());

/// Tolerance for future-dated block timestamps.
pub const TIMESTAMP_FUTURE_TOLERANCE_SECS: i64 = 86_400;

pub struct Validator;

impl Validator {
    /// Parses and validates a 66-character `^0x[0-9a-f]{64}$` hash (after
    /// case normalization), rejecting anything else.
    pub fn parse_hash(field: &str, raw: &str) -> Result<Hash32> {
        let lower = raw.to_ascii_lowercase();
        if lower.len() != Hash32::LEN || !HASH_RE.is_match(&lower) {
            return Err(Error::ValidationError {
                field: field.to_string(),
                reason: format!("expected 66-char 0x-prefixed hex hash, got '{raw}'"),
            });
        }
        Ok(Hash32::new_unchecked(lower))
    }

    /// Parses and validates a 42-character `^0x[0-9a-f]{40}$` address.
    pub fn parse_address(field: &str, raw: &str) -> Result<Address20> {
        let lower = raw.to_ascii_lowercase();
        if lower.len() != Address20::LEN || !ADDRESS_RE.is_match(&lower) {
            return Err(Error::ValidationError {
                field: field.to_string(),
                reason: format!("expected 42-char 0x-prefixed hex address, got '{raw}'"),
            });
        }
        Ok(Address20::new_unchecked(lower))
    }

    /// Validates a block/log-index numeric quantity already parsed into
    /// [`UBig256`] against an inclusive upper bound.
    pub fn bounded(field: &str, value: UBig256, max: UBig256) -> Result<UBig256> {
        if value > max {
            return Err(Error::ValidationError {
                field: field.to_string(),
                reason: format!("{value} exceeds maximum {max}"),
            });
        }
        Ok(value)
    }

    /// Validates a timestamp: non-negative (guaranteed by `UBig256`) and no
    /// further than [`TIMESTAMP_FUTURE_TOLERANCE_SECS`] in the future,
    /// tolerating millisecond-resolution upstream values.
    pub fn validate_timestamp(field: &str, value: UBig256) -> Result<UBig256> {
        let now = Utc::now().timestamp();
        let bound = (now + TIMESTAMP_FUTURE_TOLERANCE_SECS).max(0) as u64;
        let secs = if value.to_u64().map(|v| v > bound).unwrap_or(true) {
            // Tolerate a millisecond-resolution timestamp by checking the
            // scaled-down value before rejecting outright.
            let as_u64 = value.to_u64().unwrap_or(u64::MAX);
            if as_u64 / 1000 <= bound {
                UBig256::from_u64(as_u64 / 1000)
            } else {
                return Err(Error::ValidationError {
                    field: field.to_string(),
                    reason: format!("timestamp {value} is more than {TIMESTAMP_FUTURE_TOLERANCE_SECS}s in the future"),
                });
            }
        } else {
            value
        };
        Ok(secs)
    }

    pub fn parse_log_index(field: &str, value: UBig256) -> Result<u32> {
        let v = value.to_u64().map_err(|_| Error::ValidationError {
            field: field.to_string(),
            reason: format!("{value} is not a valid 32-bit log index"),
        })?;
        u32::try_from(v).map_err(|_| Error::ValidationError {
            field: field.to_string(),
            reason: format!("{value} exceeds 32-bit log index bound"),
        })
    }

    /// Parses a raw JSON-RPC block header into a validated [`crate::domain::Block`].
    pub fn parse_block(chain_id: UBig256, raw: &RawBlock) -> Result<crate::domain::Block> {
        let number = UBig256::from_hex(&raw.number)?;
        Self::bounded("blockNumber", number, UBig256::from_u64(crate::numeric::MAX_BLOCK_NUMBER))?;

        let hash = Self::parse_hash("hash", &raw.hash)?;
        let parent_hash = Self::parse_hash("parentHash", &raw.parent_hash)?;

        let raw_timestamp = UBig256::from_hex(&raw.timestamp)?;
        let timestamp = Self::validate_timestamp("timestamp", raw_timestamp)?;

        Ok(crate::domain::Block {
            chain_id,
            number,
            hash,
            parent_hash,
            timestamp,
        })
    }

    /// Decodes a raw log into a [`Transfer`], enforcing the exact three-topic
    /// `Transfer(address indexed from, address indexed to, uint256 value)`
    /// ABI shape. Logs with any other topic count — including the
    /// non-standard four-argument historical variant some older tokens
    /// emit — are rejected rather than guessed at.
    pub fn parse_transfer_log(chain_id: UBig256, raw: &RawLog) -> Result<Transfer> {
        if raw.topics.len() != 3 {
            return Err(Error::ValidationError {
                field: "topics".to_string(),
                reason: format!(
                    "expected exactly 3 topics for Transfer(address,address,uint256), got {}",
                    raw.topics.len()
                ),
            });
        }
        if raw.topics[0].to_ascii_lowercase() != TRANSFER_EVENT_TOPIC {
            return Err(Error::ValidationError {
                field: "topics[0]".to_string(),
                reason: "log does not carry the Transfer(address,address,uint256) selector".to_string(),
            });
        }

        let from_address = Self::address_from_topic("topics[1]", &raw.topics[1])?;
        let to_address = Self::address_from_topic("topics[2]", &raw.topics[2])?;

        let amount = UBig256::from_hex(&raw.data)?;
        let block_number = UBig256::from_hex(&raw.block_number)?;
        let transaction_hash = Self::parse_hash("transactionHash", &raw.transaction_hash)?;
        let log_index_raw = UBig256::from_hex(&raw.log_index)?;
        let log_index = Self::parse_log_index("logIndex", log_index_raw)?;
        let token_address = Self::parse_address("address", &raw.address)?;

        Ok(Transfer {
            chain_id,
            block_number,
            transaction_hash,
            log_index,
            from_address,
            to_address: Some(to_address),
            amount,
            token_address,
        })
    }

    /// A topic word is a 32-byte left-padded value; an address occupies its
    /// lower 20 bytes.
    fn address_from_topic(field: &str, topic: &str) -> Result<Address20> {
        let stripped = topic.strip_prefix("0x").unwrap_or(topic);
        if stripped.len() != 64 {
            return Err(Error::ValidationError {
                field: field.to_string(),
                reason: format!("expected a 32-byte topic word, got '{topic}'"),
            });
        }
        let lower20 = &stripped[24..];
        Self::parse_address(field, &format!("0x{lower20}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_well_formed_hash_and_normalizes_case() {
        let h = Validator::parse_hash(
            "hash",
            "0xABCDEF0000000000000000000000000000000000000000000000000000001234",
        )
        .unwrap();
        assert_eq!(h.as_str().len(), 66);
        assert!(h.as_str().chars().all(|c| !c.is_ascii_uppercase()));
    }

    #[test]
    fn rejects_short_hash() {
        assert!(Validator::parse_hash("hash", "0x1234").is_err());
    }

    #[test]
    fn rejects_address_with_bad_prefix() {
        assert!(Validator::parse_address(
            "addr",
            "1234567890123456789012345678901234567890ab"
        )
        .is_err());
    }

    #[test]
    fn rejects_future_timestamp_beyond_tolerance() {
        let now = Utc::now().timestamp() as u64;
        let far_future = UBig256::from_u64(now + TIMESTAMP_FUTURE_TOLERANCE_SECS as u64 + 1000);
        assert!(Validator::validate_timestamp("timestamp", far_future).is_err());
    }

    #[test]
    fn accepts_millisecond_timestamp_within_tolerance() {
        let now = Utc::now().timestamp() as u64;
        let ms = UBig256::from_u64(now * 1000);
        let parsed = Validator::validate_timestamp("timestamp", ms).unwrap();
        assert_eq!(parsed.to_u64().unwrap(), now);
    }

    #[test]
    fn rejects_block_number_over_max() {
        let over = UBig256::from_u64(u64::MAX);
        // u64::MAX equals MAX_BLOCK_NUMBER, so push one bit further via U256 math.
        let over_u256 = alloy_primitives::U256::from(over.0) + alloy_primitives::U256::from(1u64);
        assert!(Validator::bounded(
            "blockNumber",
            UBig256(over_u256),
            UBig256::from_u64(crate::numeric::MAX_BLOCK_NUMBER)
        )
        .is_err());
    }

    #[test]
    fn parse_log_index_rejects_overflow() {
        let too_big = UBig256::from_u64(u32::MAX as u64 + 1);
        assert!(Validator::parse_log_index("logIndex", too_big).is_err());
    }
}
