//! Arbitrary-precision numeric contract.
//!
//! Every blockchain-sourced quantity (block number, timestamp, amount) is
//! carried as [`UBig256`], a thin wrapper around `alloy_primitives::U256`,
//! from RPC hex all the way to the database's `NUMERIC` columns. Nothing in
//! this module, nor any caller, may round-trip a value through `f64` —
//! comparisons, arithmetic and (de)serialization all go through this single
//! path so two differently-typed-but-equal quantities can never silently
//! diverge (the "log hallucination" hazard called out in the design notes).

use alloy_primitives::U256;
use bigdecimal::BigDecimal;
use std::fmt;
use std::str::FromStr;

use crate::error::{Error, Result};

/// Maximum value representable in the 256-bit amount/number domain: 2^256 - 1.
pub fn max_u256() -> U256 {
    U256::MAX
}

/// Upper bound used for block numbers per the validator contract (2^64 - 1).
pub const MAX_BLOCK_NUMBER: u64 = u64::MAX;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct UBig256(pub U256);

impl UBig256 {
    pub const ZERO: UBig256 = UBig256(U256::ZERO);

    pub fn from_u64(v: u64) -> Self {
        UBig256(U256::from(v))
    }

    /// Parse a `0x`-prefixed hex quantity as produced by JSON-RPC (e.g.
    /// `eth_blockNumber`, `data` words in logs). Rejects malformed input —
    /// this is a validation boundary, never a lossy best-effort parse.
    pub fn from_hex(s: &str) -> Result<Self> {
        let s = s.strip_prefix("0x").unwrap_or(s);
        if s.is_empty() {
            return Err(Error::ValidationError {
                field: "hex_quantity".into(),
                reason: "empty hex string".into(),
            });
        }
        U256::from_str_radix(s, 16)
            .map(UBig256)
            .map_err(|e| Error::ValidationError {
                field: "hex_quantity".into(),
                reason: format!("invalid hex integer '{s}': {e}"),
            })
    }

    /// Parse a decimal string (as stored/read via `NUMERIC` columns).
    pub fn from_decimal_str(s: &str) -> Result<Self> {
        U256::from_str(s).map(UBig256).map_err(|e| Error::ValidationError {
            field: "decimal_quantity".into(),
            reason: format!("invalid decimal integer '{s}': {e}"),
        })
    }

    pub fn to_hex(self) -> String {
        format!("0x{:x}", self.0)
    }

    /// Fallible narrowing to `u64`, used for block numbers / log indices /
    /// timestamps once validated to be within range. Never silently
    /// truncates: out-of-range values are a validation error.
    pub fn to_u64(self) -> Result<u64> {
        self.0.try_into().map_err(|_| Error::ValidationError {
            field: "numeric".into(),
            reason: format!("{self} exceeds u64 range"),
        })
    }

    pub fn to_bigdecimal(self) -> BigDecimal {
        // U256's Display impl renders an exact base-10 integer; BigDecimal
        // parses that losslessly. No float ever appears on this path.
        BigDecimal::from_str(&self.0.to_string()).expect("U256 decimal string is always valid")
    }

    pub fn from_bigdecimal(d: &BigDecimal) -> Result<Self> {
        if d.fractional_digit_count() > 0 {
            return Err(Error::ValidationError {
                field: "numeric".into(),
                reason: format!("{d} has a fractional component, not a valid integer quantity"),
            });
        }
        Self::from_decimal_str(&d.to_plain_string())
    }
}

impl fmt::Display for UBig256 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u64> for UBig256 {
    fn from(v: u64) -> Self {
        UBig256::from_u64(v)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_2_pow_256_minus_1() {
        let max = UBig256(U256::MAX);
        let dec = max.to_bigdecimal();
        let back = UBig256::from_bigdecimal(&dec).unwrap();
        assert_eq!(max, back);
        assert_eq!(dec.to_plain_string(), max.0.to_string());
    }

    #[test]
    fn round_trips_2_pow_53() {
        let v = UBig256::from_u64(1u64 << 53);
        let dec = v.to_bigdecimal();
        assert_eq!(UBig256::from_bigdecimal(&dec).unwrap(), v);
    }

    #[test]
    fn round_trips_u64_max() {
        let v = UBig256::from_u64(u64::MAX);
        assert_eq!(v.to_u64().unwrap(), u64::MAX);
    }

    #[test]
    fn rejects_fractional_as_integer() {
        let d = BigDecimal::from_str("1.5").unwrap();
        assert!(UBig256::from_bigdecimal(&d).is_err());
    }

    #[test]
    fn hex_parse_round_trip() {
        let v = UBig256::from_hex("0x2a").unwrap();
        assert_eq!(v.to_u64().unwrap(), 42);
        assert_eq!(v.to_hex(), "0x2a");
    }

    #[test]
    fn rejects_empty_hex() {
        assert!(UBig256::from_hex("0x").is_err());
    }

    #[test]
    fn value_exceeding_u64_is_rejected_on_narrowing() {
        let v = UBig256(U256::from(u64::MAX) + U256::from(1u64));
        assert!(v.to_u64().is_err());
    }
}
