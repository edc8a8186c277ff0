//! Domain primitives: Address, MarketId, Timestamp, PositionSide, TransactionKind.

use serde::{Deserialize, Serialize};
use thiserror::Error;

pub const SECONDS_PER_DAY: i64 = 86_400;

/// A 20-byte contract or account address, stored as lowercase 0x-prefixed hex.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Address(String);

impl Address {
    /// Parse and normalize an address from a hex string.
    ///
    /// # Errors
    /// Returns an error if the string is not 20 bytes of hex.
    pub fn parse(s: &str) -> Result<Self, AddressParseError> {
        let stripped = s.strip_prefix("0x").unwrap_or(s);
        let bytes = hex::decode(stripped).map_err(|_| AddressParseError::InvalidHex)?;
        if bytes.len() != 20 {
            return Err(AddressParseError::InvalidLength(bytes.len()));
        }
        Ok(Address(format!("0x{}", stripped.to_lowercase())))
    }

    /// The zero address, used for the synthetic flashloan market.
    pub fn zero() -> Self {
        Address(format!("0x{}", "00".repeat(20)))
    }

    pub fn is_zero(&self) -> bool {
        *self == Self::zero()
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for Address {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::str::FromStr for Address {
    type Err = AddressParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

/// A 32-byte market identifier, stored as lowercase 0x-prefixed hex.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct MarketId(String);

impl MarketId {
    /// Parse and normalize a market id from a hex string.
    ///
    /// # Errors
    /// Returns an error if the string is not 32 bytes of hex.
    pub fn parse(s: &str) -> Result<Self, AddressParseError> {
        let stripped = s.strip_prefix("0x").unwrap_or(s);
        let bytes = hex::decode(stripped).map_err(|_| AddressParseError::InvalidHex)?;
        if bytes.len() != 32 {
            return Err(AddressParseError::InvalidLength(bytes.len()));
        }
        Ok(MarketId(format!("0x{}", stripped.to_lowercase())))
    }

    /// The synthetic market id used for operations not tied to a real market.
    pub fn zero() -> Self {
        MarketId(format!("0x{}", "00".repeat(32)))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for MarketId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::str::FromStr for MarketId {
    type Err = AddressParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum AddressParseError {
    #[error("invalid hex")]
    InvalidHex,
    #[error("invalid length: {0} bytes")]
    InvalidLength(usize),
}

/// Block timestamp in seconds since Unix epoch.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub struct Timestamp(pub i64);

impl Timestamp {
    pub fn new(secs: i64) -> Self {
        Timestamp(secs)
    }

    pub fn as_secs(&self) -> i64 {
        self.0
    }

    /// UTC day bucket, used by the daily-active-position gate.
    pub fn day(&self) -> i64 {
        self.0 / SECONDS_PER_DAY
    }
}

/// Which side of a market a position sits on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PositionSide {
    Supplier,
    Borrower,
    Collateral,
}

impl PositionSide {
    pub fn as_str(&self) -> &'static str {
        match self {
            PositionSide::Supplier => "SUPPLIER",
            PositionSide::Borrower => "BORROWER",
            PositionSide::Collateral => "COLLATERAL",
        }
    }
}

impl std::fmt::Display for PositionSide {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Kind of a balance-mutating operation.
///
/// The discriminant participates in transaction-record ids, so variants must
/// keep their values across releases.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TransactionKind {
    Deposit,
    Withdraw,
    Borrow,
    Repay,
    Liquidate,
    Transfer,
    Flashloan,
    DepositCollateral,
    WithdrawCollateral,
}

impl TransactionKind {
    pub fn discriminant(&self) -> i32 {
        match self {
            TransactionKind::Deposit => 0,
            TransactionKind::Withdraw => 1,
            TransactionKind::Borrow => 2,
            TransactionKind::Repay => 3,
            TransactionKind::Liquidate => 4,
            TransactionKind::Transfer => 5,
            TransactionKind::Flashloan => 6,
            TransactionKind::DepositCollateral => 7,
            TransactionKind::WithdrawCollateral => 8,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            TransactionKind::Deposit => "DEPOSIT",
            TransactionKind::Withdraw => "WITHDRAW",
            TransactionKind::Borrow => "BORROW",
            TransactionKind::Repay => "REPAY",
            TransactionKind::Liquidate => "LIQUIDATE",
            TransactionKind::Transfer => "TRANSFER",
            TransactionKind::Flashloan => "FLASHLOAN",
            TransactionKind::DepositCollateral => "DEPOSIT_COLLATERAL",
            TransactionKind::WithdrawCollateral => "WITHDRAW_COLLATERAL",
        }
    }

    /// Whether this kind may mutate a position on the given side.
    ///
    /// Transfers move collateral balances between accounts, so they are valid
    /// on the collateral side alongside liquidation seizure.
    pub fn valid_for(&self, side: PositionSide) -> bool {
        match side {
            PositionSide::Supplier => {
                matches!(self, TransactionKind::Deposit | TransactionKind::Withdraw)
            }
            PositionSide::Borrower => matches!(
                self,
                TransactionKind::Borrow | TransactionKind::Repay | TransactionKind::Liquidate
            ),
            PositionSide::Collateral => matches!(
                self,
                TransactionKind::DepositCollateral
                    | TransactionKind::WithdrawCollateral
                    | TransactionKind::Liquidate
                    | TransactionKind::Transfer
            ),
        }
    }
}

impl std::fmt::Display for TransactionKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}
