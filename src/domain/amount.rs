//! Arbitrary-precision token amount backed by num-bigint.
//!
//! On-chain asset and share quantities are unsigned integers in the token's
//! native base units; intermediate products in the share conversion exceed
//! 128 bits, so amounts are kept as `BigUint` end to end. Serializes as a
//! canonical decimal string.

use num_bigint::BigUint;
use num_traits::{ToPrimitive, Zero};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;

use crate::domain::Decimal;

/// An unsigned token amount (assets or shares) in native base units.
#[derive(Debug, Clone, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TokenAmount(BigUint);

impl TokenAmount {
    pub fn new(value: BigUint) -> Self {
        TokenAmount(value)
    }

    pub fn zero() -> Self {
        TokenAmount(BigUint::zero())
    }

    /// One WAD: 1e18, the fixed-point unit used for shares and rates.
    pub fn wad() -> Self {
        TokenAmount(BigUint::from(10u32).pow(18))
    }

    pub fn from_u128(value: u128) -> Self {
        TokenAmount(BigUint::from(value))
    }

    /// Parse from a decimal string.
    ///
    /// # Errors
    /// Returns an error if the string is not a nonnegative decimal integer.
    pub fn parse(s: &str) -> Result<Self, AmountParseError> {
        BigUint::from_str(s)
            .map(TokenAmount)
            .map_err(|_| AmountParseError(s.to_string()))
    }

    pub fn is_zero(&self) -> bool {
        self.0.is_zero()
    }

    pub fn inner(&self) -> &BigUint {
        &self.0
    }

    pub fn plus(&self, rhs: &TokenAmount) -> TokenAmount {
        TokenAmount(&self.0 + &rhs.0)
    }

    /// Subtraction that floors at zero.
    ///
    /// Aggregate totals can transiently under-run on malformed streams; the
    /// ledger clamps instead of panicking and callers log the discrepancy.
    pub fn minus_or_zero(&self, rhs: &TokenAmount) -> TokenAmount {
        if self.0 < rhs.0 {
            TokenAmount(BigUint::zero())
        } else {
            TokenAmount(&self.0 - &rhs.0)
        }
    }

    pub fn checked_sub(&self, rhs: &TokenAmount) -> Option<TokenAmount> {
        if self.0 < rhs.0 {
            None
        } else {
            Some(TokenAmount(&self.0 - &rhs.0))
        }
    }

    /// Convert to a USD-capable decimal by shifting `decimals` places.
    ///
    /// Fractional digits beyond 12 are truncated so the composed literal
    /// always fits Decimal's 96-bit mantissa.
    pub fn to_decimal(&self, decimals: u32) -> Decimal {
        let base = BigUint::from(10u32).pow(decimals);
        let whole = (&self.0 / &base).to_string();
        let mut frac = (&self.0 % &base).to_string();
        let width = decimals as usize;
        while frac.len() < width {
            frac.insert(0, '0');
        }
        frac.truncate(12);
        let literal = if frac.is_empty() {
            whole
        } else {
            format!("{}.{}", whole, frac)
        };
        match Decimal::from_str_canonical(&literal) {
            Ok(d) => d,
            Err(_) => {
                tracing::warn!("token amount {} exceeds decimal range", self.0);
                Decimal::zero()
            }
        }
    }

    pub fn to_u64(&self) -> Option<u64> {
        self.0.to_u64()
    }
}

impl fmt::Display for TokenAmount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for TokenAmount {
    type Err = AmountParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl From<BigUint> for TokenAmount {
    fn from(value: BigUint) -> Self {
        TokenAmount(value)
    }
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
#[error("invalid token amount: {0}")]
pub struct AmountParseError(String);

impl Serialize for TokenAmount {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.0.to_string())
    }
}

impl<'de> Deserialize<'de> for TokenAmount {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        TokenAmount::parse(&s).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_and_display() {
        let a = TokenAmount::parse("123456789012345678901234567890").unwrap();
        assert_eq!(a.to_string(), "123456789012345678901234567890");
    }

    #[test]
    fn test_parse_rejects_garbage() {
        assert!(TokenAmount::parse("-5").is_err());
        assert!(TokenAmount::parse("1.5").is_err());
    }

    #[test]
    fn test_minus_or_zero_clamps() {
        let a = TokenAmount::from_u128(5);
        let b = TokenAmount::from_u128(8);
        assert_eq!(a.minus_or_zero(&b), TokenAmount::zero());
        assert_eq!(b.minus_or_zero(&a), TokenAmount::from_u128(3));
    }

    #[test]
    fn test_checked_sub() {
        let a = TokenAmount::from_u128(5);
        let b = TokenAmount::from_u128(8);
        assert_eq!(a.checked_sub(&b), None);
        assert_eq!(b.checked_sub(&a), Some(TokenAmount::from_u128(3)));
    }

    #[test]
    fn test_wad() {
        assert_eq!(TokenAmount::wad().to_string(), "1000000000000000000");
    }

    #[test]
    fn test_to_decimal_wad_scale() {
        let amount = TokenAmount::parse("1500000000000000000").unwrap();
        assert_eq!(amount.to_decimal(18).to_canonical_string(), "1.5");
    }

    #[test]
    fn test_to_decimal_zero_decimals() {
        let amount = TokenAmount::from_u128(42);
        assert_eq!(amount.to_decimal(0).to_canonical_string(), "42");
    }

    #[test]
    fn test_serde_roundtrip_as_string() {
        let amount = TokenAmount::parse("340282366920938463463374607431768211456").unwrap();
        let json = serde_json::to_string(&amount).unwrap();
        assert_eq!(json, "\"340282366920938463463374607431768211456\"");
        let back: TokenAmount = serde_json::from_str(&json).unwrap();
        assert_eq!(back, amount);
    }
}
