//! Protocol singleton, market membership list, revenue details and the
//! idempotent activity markers.

use serde::{Deserialize, Serialize};

use crate::domain::{Address, Decimal, MarketId, TokenAmount};

/// Global protocol singleton, keyed by the lending core's deployed address.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Protocol {
    pub address: Address,
    pub owner: Address,
    pub fee_recipient: Address,

    pub cumulative_unique_users: u64,
    pub cumulative_unique_depositors: u64,
    pub cumulative_unique_borrowers: u64,
    pub cumulative_unique_liquidators: u64,
    pub cumulative_unique_liquidatees: u64,
    pub cumulative_unique_transferrers: u64,
    pub cumulative_unique_flashloaners: u64,

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

    pub total_value_locked_usd: Decimal,
    pub total_deposit_balance_usd: Decimal,
    pub total_borrow_balance_usd: Decimal,
    pub cumulative_deposit_usd: Decimal,
    pub cumulative_borrow_usd: Decimal,
    pub cumulative_liquidate_usd: Decimal,
    pub cumulative_supply_side_revenue_usd: Decimal,
    pub cumulative_protocol_side_revenue_usd: Decimal,

    /// Append-only whitelist of enabled interest-rate models.
    pub enabled_irms: Vec<Address>,
    /// Append-only whitelist of enabled collateral ratios (WAD-scaled).
    pub enabled_lltvs: Vec<TokenAmount>,
}

impl Protocol {
    pub fn new(address: Address, owner: Address) -> Self {
        Protocol {
            address,
            owner,
            fee_recipient: Address::zero(),
            cumulative_unique_users: 0,
            cumulative_unique_depositors: 0,
            cumulative_unique_borrowers: 0,
            cumulative_unique_liquidators: 0,
            cumulative_unique_liquidatees: 0,
            cumulative_unique_transferrers: 0,
            cumulative_unique_flashloaners: 0,
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
            total_value_locked_usd: Decimal::zero(),
            total_deposit_balance_usd: Decimal::zero(),
            total_borrow_balance_usd: Decimal::zero(),
            cumulative_deposit_usd: Decimal::zero(),
            cumulative_borrow_usd: Decimal::zero(),
            cumulative_liquidate_usd: Decimal::zero(),
            cumulative_supply_side_revenue_usd: Decimal::zero(),
            cumulative_protocol_side_revenue_usd: Decimal::zero(),
            enabled_irms: Vec::new(),
            enabled_lltvs: Vec::new(),
        }
    }

    pub fn enable_irm(&mut self, irm: Address) {
        if !self.enabled_irms.contains(&irm) {
            self.enabled_irms.push(irm);
        }
    }

    pub fn enable_lltv(&mut self, lltv: TokenAmount) {
        if !self.enabled_lltvs.contains(&lltv) {
            self.enabled_lltvs.push(lltv);
        }
    }
}

/// Explicit membership list of every created market, maintained alongside the
/// protocol singleton. The TVL rollup recomputes protocol balances by summing
/// over this list, so a market is added exactly once, at creation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MarketList {
    pub protocol: Address,
    pub markets: Vec<MarketId>,
}

impl MarketList {
    pub fn new(protocol: Address) -> Self {
        MarketList {
            protocol,
            markets: Vec::new(),
        }
    }

    pub fn add(&mut self, market: MarketId) {
        if !self.markets.contains(&market) {
            self.markets.push(market);
        }
    }
}

/// Ordered revenue attribution attached to one market or the protocol.
///
/// `sources` stays lexicographically sorted and `amounts_usd[i]` always
/// corresponds to `sources[i]`, so downstream consumers can diff breakdowns
/// deterministically across blocks.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RevenueDetail {
    pub id: String,
    pub sources: Vec<String>,
    pub amounts_usd: Vec<Decimal>,
}

impl RevenueDetail {
    pub fn new(id: String) -> Self {
        RevenueDetail {
            id,
            sources: Vec::new(),
            amounts_usd: Vec::new(),
        }
    }

    pub fn market_id(market: &MarketId) -> String {
        format!("revenue-{}", market)
    }

    pub fn protocol_id(protocol: &Address) -> String {
        format!("revenue-{}", protocol)
    }
}

/// Content-keyed marker row backing an idempotent first-time check.
///
/// Unique-participant counters and the daily-active-position gate both write
/// one of these; the increment happens only when the marker is absent, so
/// replay converges.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActivityMarker {
    pub id: String,
}

impl ActivityMarker {
    pub fn participant_id(account: &Address, kind: &str) -> String {
        format!("participant-{}-{}", account, kind)
    }

    pub fn daily_active_id(market: &MarketId, side: &str, day: i64) -> String {
        format!("daily-{}-{}-{}", market, side, day)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_market_list_add_is_idempotent() {
        let mut list = MarketList::new(Address::zero());
        list.add(MarketId::zero());
        list.add(MarketId::zero());
        assert_eq!(list.markets.len(), 1);
    }

    #[test]
    fn test_whitelists_append_only_dedup() {
        let mut protocol = Protocol::new(Address::zero(), Address::zero());
        protocol.enable_irm(Address::zero());
        protocol.enable_irm(Address::zero());
        assert_eq!(protocol.enabled_irms.len(), 1);
    }

    #[test]
    fn test_marker_ids_distinguish_kind() {
        let a = Address::zero();
        assert_ne!(
            ActivityMarker::participant_id(&a, "depositor"),
            ActivityMarker::participant_id(&a, "borrower")
        );
    }
}
