//! # Value Units
//!
//! All amounts are integers of wei, the smallest unit. One ether is 10^18
//! wei. Conversions to and from decimal ether strings are exact: they work
//! on the digits, never on a float.
//!
//! ```text
//! "1.5"  --parse_ether-->  1_500_000_000_000_000_000 wei
//! 1_500_000_000_000_000_000 wei  --format_ether(4)-->  "1.5000"
//! ```

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

use crate::config::{ETHER_DECIMALS, WEI_PER_ETHER};

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Errors produced when converting between text and [`Wei`].
#[derive(Debug, Error, PartialEq, Eq)]
pub enum UnitsError {
    /// The input is not a non-negative decimal number.
    #[error("invalid ether value: {0:?}")]
    InvalidValue(String),

    /// The value does not fit in 128 bits of wei.
    #[error("value overflows u128 wei: {0:?}")]
    Overflow(String),
}

// ---------------------------------------------------------------------------
// Wei
// ---------------------------------------------------------------------------

/// An amount of value in wei.
///
/// Serialized as a decimal string in JSON (JavaScript clients cannot hold
/// a u128 in a number) and as a raw `u128` in binary formats.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Wei(u128);

impl Wei {
    /// Zero wei.
    pub const ZERO: Wei = Wei(0);

    /// Wraps a raw wei amount.
    pub const fn new(wei: u128) -> Self {
        Self(wei)
    }

    /// Whole ether, e.g. `Wei::from_ether(1)`.
    pub const fn from_ether(ether: u64) -> Self {
        Self(ether as u128 * WEI_PER_ETHER)
    }

    /// The raw amount.
    pub const fn as_u128(&self) -> u128 {
        self.0
    }

    pub const fn is_zero(&self) -> bool {
        self.0 == 0
    }

    pub fn checked_add(self, rhs: Wei) -> Option<Wei> {
        self.0.checked_add(rhs.0).map(Wei)
    }

    pub fn checked_sub(self, rhs: Wei) -> Option<Wei> {
        self.0.checked_sub(rhs.0).map(Wei)
    }

    /// Renders the amount in ether. See [`format_ether`].
    pub fn to_ether_string(&self, decimals: u32) -> String {
        format_ether(*self, decimals)
    }
}

impl fmt::Display for Wei {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Debug for Wei {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Wei({})", self.0)
    }
}

impl From<u128> for Wei {
    fn from(wei: u128) -> Self {
        Self(wei)
    }
}

impl From<u64> for Wei {
    fn from(wei: u64) -> Self {
        Self(wei as u128)
    }
}

/// Parses a plain wei integer (not ether), e.g. `"1000000000000000000"`.
impl FromStr for Wei {
    type Err = UnitsError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        if trimmed.is_empty() || !trimmed.bytes().all(|b| b.is_ascii_digit()) {
            return Err(UnitsError::InvalidValue(s.to_string()));
        }
        trimmed
            .parse::<u128>()
            .map(Wei)
            .map_err(|_| UnitsError::Overflow(s.to_string()))
    }
}

impl Serialize for Wei {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        if serializer.is_human_readable() {
            serializer.serialize_str(&self.0.to_string())
        } else {
            serializer.serialize_u128(self.0)
        }
    }
}

impl<'de> Deserialize<'de> for Wei {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        if deserializer.is_human_readable() {
            let s = String::deserialize(deserializer)?;
            s.parse().map_err(serde::de::Error::custom)
        } else {
            u128::deserialize(deserializer).map(Wei)
        }
    }
}

// ---------------------------------------------------------------------------
// Ether <-> Wei
// ---------------------------------------------------------------------------

/// Parses a decimal ether string into wei.
///
/// Digits beyond the 18th fractional place are truncated, so the result
/// never exceeds the written value.
pub fn parse_ether(value: &str) -> Result<Wei, UnitsError> {
    let trimmed = value.trim();
    let (whole, fraction) = match trimmed.split_once('.') {
        Some((w, f)) => (w, f),
        None => (trimmed, ""),
    };

    let all_digits = |s: &str| s.bytes().all(|b| b.is_ascii_digit());
    if (whole.is_empty() && fraction.is_empty()) || !all_digits(whole) || !all_digits(fraction) {
        return Err(UnitsError::InvalidValue(value.to_string()));
    }

    let overflow = || UnitsError::Overflow(value.to_string());

    let whole_wei = if whole.is_empty() {
        0
    } else {
        whole
            .parse::<u128>()
            .map_err(|_| overflow())?
            .checked_mul(WEI_PER_ETHER)
            .ok_or_else(overflow)?
    };

    let places = ETHER_DECIMALS as usize;
    let kept = &fraction[..fraction.len().min(places)];
    let fraction_wei = if kept.is_empty() {
        0
    } else {
        // Right-pad to 18 digits so "5" means 0.5 ether, not 5 wei.
        format!("{kept:0<places$}")
            .parse::<u128>()
            .map_err(|_| overflow())?
    };

    whole_wei
        .checked_add(fraction_wei)
        .map(Wei)
        .ok_or_else(overflow)
}

/// Renders wei as ether.
///
/// Whole amounts print without a fraction (`"2"`). Anything else prints
/// exactly `decimals` fractional digits, truncated (`"1.5000"` for
/// `decimals = 4`).
pub fn format_ether(value: Wei, decimals: u32) -> String {
    let whole = value.0 / WEI_PER_ETHER;
    let remainder = value.0 % WEI_PER_ETHER;

    if remainder == 0 || decimals == 0 {
        return whole.to_string();
    }

    let places = ETHER_DECIMALS as usize;
    let digits = format!("{remainder:0>places$}");
    let shown = (decimals as usize).min(places);
    format!("{}.{}", whole, &digits[..shown])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_whole_and_fractional_ether() {
        assert_eq!(parse_ether("1").unwrap(), Wei::from_ether(1));
        assert_eq!(
            parse_ether("0.1").unwrap(),
            Wei::new(100_000_000_000_000_000)
        );
        assert_eq!(
            parse_ether("1.5").unwrap(),
            Wei::new(1_500_000_000_000_000_000)
        );
        assert_eq!(parse_ether(".5").unwrap(), parse_ether("0.5").unwrap());
        assert_eq!(parse_ether("3.").unwrap(), Wei::from_ether(3));
    }

    #[test]
    fn parse_smallest_unit() {
        assert_eq!(parse_ether("0.000000000000000001").unwrap(), Wei::new(1));
    }

    #[test]
    fn parse_truncates_beyond_eighteen_places() {
        assert_eq!(parse_ether("0.0000000000000000019").unwrap(), Wei::new(1));
    }

    #[test]
    fn parse_rejects_garbage() {
        for bad in ["", ".", "abc", "-1", "1.2.3", "1e18", " . "] {
            assert!(
                matches!(parse_ether(bad), Err(UnitsError::InvalidValue(_))),
                "{bad:?} should be rejected"
            );
        }
    }

    #[test]
    fn parse_rejects_overflow() {
        let huge = "1".repeat(40);
        assert!(matches!(parse_ether(&huge), Err(UnitsError::Overflow(_))));
    }

    #[test]
    fn format_whole_amount_has_no_fraction() {
        assert_eq!(format_ether(Wei::from_ether(2), 4), "2");
        assert_eq!(format_ether(Wei::ZERO, 4), "0");
    }

    #[test]
    fn format_fraction_is_fixed_width_and_truncated() {
        assert_eq!(format_ether(parse_ether("1.5").unwrap(), 4), "1.5000");
        assert_eq!(format_ether(parse_ether("0.123456").unwrap(), 4), "0.1234");
        assert_eq!(format_ether(Wei::new(1), 4), "0.0000");
        assert_eq!(format_ether(parse_ether("7.25").unwrap(), 0), "7");
    }

    #[test]
    fn wei_from_str_accepts_integers_only() {
        assert_eq!("42".parse::<Wei>().unwrap(), Wei::new(42));
        assert!("4.2".parse::<Wei>().is_err());
        assert!("".parse::<Wei>().is_err());
    }

    #[test]
    fn json_amount_is_a_string() {
        let amount = Wei::from_ether(1);
        let json = serde_json::to_string(&amount).unwrap();
        assert_eq!(json, "\"1000000000000000000\"");
        let back: Wei = serde_json::from_str(&json).unwrap();
        assert_eq!(back, amount);
    }

    #[test]
    fn checked_arithmetic() {
        let max = Wei::new(u128::MAX);
        assert!(max.checked_add(Wei::new(1)).is_none());
        assert!(Wei::ZERO.checked_sub(Wei::new(1)).is_none());
        assert_eq!(
            Wei::new(5).checked_sub(Wei::new(3)),
            Some(Wei::new(2))
        );
    }
}
