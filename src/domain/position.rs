//! Position entities: per-(account, market, side) stakes and their snapshots.

use serde::{Deserialize, Serialize};

use crate::domain::{Address, Decimal, MarketId, PositionSide, Timestamp, TokenAmount};

/// Composite key addressing the position lineage for one account, market and
/// side. Position identity is this key plus a generation counter, so a reopen
/// after closure allocates a fresh record instead of resurrecting the old one.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PositionKey {
    pub account: Address,
    pub market: MarketId,
    pub side: PositionSide,
}

impl PositionKey {
    pub fn new(account: Address, market: MarketId, side: PositionSide) -> Self {
        PositionKey {
            account,
            market,
            side,
        }
    }

    pub fn counter_id(&self) -> String {
        format!("{}-{}-{}", self.account, self.market, self.side)
    }

    pub fn position_id(&self, generation: u64) -> String {
        format!("{}-{}", self.counter_id(), generation)
    }
}

/// Generation counter and open-position index for one position key.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PositionCounter {
    pub key: PositionKey,
    /// Generation the next opened position will take.
    pub next_generation: u64,
    /// Id of the currently open position, if any.
    pub open_position_id: Option<String>,
}

impl PositionCounter {
    pub fn new(key: PositionKey) -> Self {
        PositionCounter {
            key,
            next_generation: 0,
            open_position_id: None,
        }
    }
}

/// One position: an account's stake in one market on one side.
///
/// Open iff `balance > 0`; crossing to zero closes it permanently.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Position {
    pub id: String,
    pub account: Address,
    pub market: MarketId,
    pub side: PositionSide,
    pub generation: u64,
    /// Current balance in underlying assets.
    pub balance: TokenAmount,
    /// Current shares; collateral positions carry none.
    pub shares: Option<TokenAmount>,
    pub is_open: bool,
    /// Set when the balance backs outstanding debt as collateral.
    pub is_collateral: bool,
    pub opened_at: Timestamp,
    pub opened_at_block: u64,
    pub closed_at: Option<Timestamp>,
    pub closed_at_block: Option<u64>,
    pub deposit_count: u64,
    pub withdraw_count: u64,
    pub borrow_count: u64,
    pub repay_count: u64,
    pub liquidation_count: u64,
    pub transfer_count: u64,
    pub snapshot_count: u64,
}

impl Position {
    pub fn open(
        key: &PositionKey,
        generation: u64,
        balance: TokenAmount,
        shares: Option<TokenAmount>,
        timestamp: Timestamp,
        block_number: u64,
    ) -> Self {
        Position {
            id: key.position_id(generation),
            account: key.account.clone(),
            market: key.market.clone(),
            side: key.side,
            generation,
            balance,
            shares,
            is_open: true,
            is_collateral: key.side == PositionSide::Collateral,
            opened_at: timestamp,
            opened_at_block: block_number,
            closed_at: None,
            closed_at_block: None,
            deposit_count: 0,
            withdraw_count: 0,
            borrow_count: 0,
            repay_count: 0,
            liquidation_count: 0,
            transfer_count: 0,
            snapshot_count: 0,
        }
    }
}

/// Immutable point-in-time record of a position's balance, one per mutating
/// event. Append-only.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PositionSnapshot {
    pub id: String,
    pub position_id: String,
    pub balance: TokenAmount,
    pub shares: Option<TokenAmount>,
    pub balance_usd: Decimal,
    pub timestamp: Timestamp,
    pub block_number: u64,
    pub tx_nonce: u64,
}

impl PositionSnapshot {
    pub fn snapshot_id(position_id: &str, index: u64) -> String {
        format!("{}-{}", position_id, index)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key() -> PositionKey {
        PositionKey::new(Address::zero(), MarketId::zero(), PositionSide::Supplier)
    }

    #[test]
    fn test_position_id_includes_generation() {
        let k = key();
        assert_ne!(k.position_id(0), k.position_id(1));
        assert!(k.position_id(3).ends_with("-SUPPLIER-3"));
    }

    #[test]
    fn test_open_sets_collateral_flag_by_side() {
        let collateral_key =
            PositionKey::new(Address::zero(), MarketId::zero(), PositionSide::Collateral);
        let p = Position::open(
            &collateral_key,
            0,
            TokenAmount::from_u128(10),
            None,
            Timestamp::new(0),
            1,
        );
        assert!(p.is_collateral);
        let s = Position::open(
            &key(),
            0,
            TokenAmount::from_u128(10),
            Some(TokenAmount::from_u128(10)),
            Timestamp::new(0),
            1,
        );
        assert!(!s.is_collateral);
    }
}
