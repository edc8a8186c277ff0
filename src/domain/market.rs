//! Market entity: one isolated lending pool.

use serde::{Deserialize, Serialize};

use crate::domain::{Address, Decimal, MarketId, Timestamp, TokenAmount};

/// An isolated lending pool and its running aggregates.
///
/// Created on the market-creation event, mutated by every subsequent event
/// referencing its id, never deleted. `total_supply_shares == 0` implies
/// `total_supply == 0` outside the virtual-offset bootstrap window.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Market {
    pub id: MarketId,
    pub loan_token: Address,
    pub collateral_token: Address,
    pub oracle: Address,
    pub irm: Address,
    pub lltv: TokenAmount,
    /// Protocol fee rate, WAD-scaled (1e18 = 100%).
    pub fee: TokenAmount,
    pub created_at: Timestamp,
    pub created_at_block: u64,
    pub last_update: Timestamp,

    pub total_supply: TokenAmount,
    pub total_supply_shares: TokenAmount,
    pub total_borrow: TokenAmount,
    pub total_borrow_shares: TokenAmount,
    pub total_collateral: TokenAmount,
    pub accrued_interests: TokenAmount,

    pub total_value_locked_usd: Decimal,
    pub total_deposit_balance_usd: Decimal,
    pub total_borrow_balance_usd: Decimal,
    pub cumulative_deposit_usd: Decimal,
    pub cumulative_withdraw_usd: Decimal,
    pub cumulative_borrow_usd: Decimal,
    pub cumulative_repay_usd: Decimal,
    pub cumulative_liquidate_usd: Decimal,
    pub cumulative_transfer_usd: Decimal,
    pub cumulative_flashloan_usd: Decimal,
    pub cumulative_supply_side_revenue_usd: Decimal,
    pub cumulative_protocol_side_revenue_usd: Decimal,

    pub transaction_count: u64,
    pub deposit_count: u64,
    pub withdraw_count: u64,
    pub borrow_count: u64,
    pub repay_count: u64,
    pub liquidate_count: u64,
    pub transfer_count: u64,
    pub flashloan_count: u64,

    pub position_count: u64,
    pub open_position_count: u64,
    pub closed_position_count: u64,
    pub supplier_count: u64,
    pub borrower_count: u64,
    pub collateral_holder_count: u64,

    /// Ordered ids of the market's active interest-rate records.
    pub rate_ids: Vec<String>,
}

impl Market {
    pub fn new(
        id: MarketId,
        loan_token: Address,
        collateral_token: Address,
        oracle: Address,
        irm: Address,
        lltv: TokenAmount,
        created_at: Timestamp,
        created_at_block: u64,
    ) -> Self {
        Market {
            id,
            loan_token,
            collateral_token,
            oracle,
            irm,
            lltv,
            fee: TokenAmount::zero(),
            created_at,
            created_at_block,
            last_update: created_at,
            total_supply: TokenAmount::zero(),
            total_supply_shares: TokenAmount::zero(),
            total_borrow: TokenAmount::zero(),
            total_borrow_shares: TokenAmount::zero(),
            total_collateral: TokenAmount::zero(),
            accrued_interests: TokenAmount::zero(),
            total_value_locked_usd: Decimal::zero(),
            total_deposit_balance_usd: Decimal::zero(),
            total_borrow_balance_usd: Decimal::zero(),
            cumulative_deposit_usd: Decimal::zero(),
            cumulative_withdraw_usd: Decimal::zero(),
            cumulative_borrow_usd: Decimal::zero(),
            cumulative_repay_usd: Decimal::zero(),
            cumulative_liquidate_usd: Decimal::zero(),
            cumulative_transfer_usd: Decimal::zero(),
            cumulative_flashloan_usd: Decimal::zero(),
            cumulative_supply_side_revenue_usd: Decimal::zero(),
            cumulative_protocol_side_revenue_usd: Decimal::zero(),
            transaction_count: 0,
            deposit_count: 0,
            withdraw_count: 0,
            borrow_count: 0,
            repay_count: 0,
            liquidate_count: 0,
            transfer_count: 0,
            flashloan_count: 0,
            position_count: 0,
            open_position_count: 0,
            closed_position_count: 0,
            supplier_count: 0,
            borrower_count: 0,
            collateral_holder_count: 0,
            rate_ids: Vec::new(),
        }
    }

    /// The synthetic market that flashloans roll up into.
    ///
    /// Flashloans are not tied to a real pool, so they aggregate under a
    /// market keyed by the zero id with zero-address tokens.
    pub fn zero_market(created_at: Timestamp, created_at_block: u64) -> Self {
        Market::new(
            MarketId::zero(),
            Address::zero(),
            Address::zero(),
            Address::zero(),
            Address::zero(),
            TokenAmount::zero(),
            created_at,
            created_at_block,
        )
    }

    pub fn is_zero_market(&self) -> bool {
        self.id == MarketId::zero()
    }
}

/// Ordered per-market interest-rate record, re-pointed from `Market::rate_ids`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InterestRate {
    pub id: String,
    pub market: MarketId,
    pub side: RateSide,
    pub rate_type: RateType,
    /// Rate as a decimal fraction (0.05 = 5%), converted from the emitted
    /// WAD value.
    pub rate: Decimal,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RateSide {
    Lender,
    Borrower,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RateType {
    Variable,
}

impl InterestRate {
    pub fn rate_id(side: RateSide, rate_type: RateType, market: &MarketId) -> String {
        let side = match side {
            RateSide::Lender => "lender",
            RateSide::Borrower => "borrower",
        };
        let rate_type = match rate_type {
            RateType::Variable => "variable",
        };
        format!("{}-{}-{}", side, rate_type, market)
    }
}
