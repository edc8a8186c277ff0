//! Public-allocator entities: per-vault fee accounting and per-(vault, market)
//! flow caps with an audit trail per change.

use serde::{Deserialize, Serialize};

use crate::domain::{Address, MarketId, Timestamp, TokenAmount};

/// Public-allocator configuration and fee accounting for one vault.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AllocatorVault {
    pub vault: Address,
    pub admin: Option<Address>,
    /// Fee charged per public withdrawal, in the vault's asset units.
    pub fee: TokenAmount,
    pub accrued_fee: TokenAmount,
    pub claimable_fee: TokenAmount,
    pub claimed_fee: TokenAmount,
}

impl AllocatorVault {
    pub fn new(vault: Address) -> Self {
        AllocatorVault {
            vault,
            admin: None,
            fee: TokenAmount::zero(),
            accrued_fee: TokenAmount::zero(),
            claimable_fee: TokenAmount::zero(),
            claimed_fee: TokenAmount::zero(),
        }
    }
}

/// Flow caps for one (vault, market) pair: how much the public allocator may
/// still move in or out.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AllocatorMarket {
    pub id: String,
    pub vault: Address,
    pub market: MarketId,
    pub flow_cap_in: TokenAmount,
    pub flow_cap_out: TokenAmount,
}

impl AllocatorMarket {
    pub fn allocator_market_id(vault: &Address, market: &MarketId) -> String {
        format!("allocator-{}-{}", vault, market)
    }

    pub fn new(vault: Address, market: MarketId) -> Self {
        AllocatorMarket {
            id: Self::allocator_market_id(&vault, &market),
            vault,
            market,
            flow_cap_in: TokenAmount::zero(),
            flow_cap_out: TokenAmount::zero(),
        }
    }
}

/// History row appended whenever a market's flow caps change, whether by an
/// explicit cap update or as the side effect of a public move.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FlowCapsChange {
    pub id: String,
    pub vault: Address,
    pub market: MarketId,
    pub prev_flow_cap_in: TokenAmount,
    pub flow_cap_in: TokenAmount,
    pub prev_flow_cap_out: TokenAmount,
    pub flow_cap_out: TokenAmount,
    pub timestamp: Timestamp,
    pub block_number: u64,
    pub tx_hash: String,
    pub log_index: u64,
}

impl FlowCapsChange {
    pub fn change_id(tx_hash: &str, log_index: u64, market: &MarketId) -> String {
        format!("{}-{}-{}", tx_hash, log_index, market)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_allocator_market_id_scopes_by_vault_and_market() {
        let id = AllocatorMarket::allocator_market_id(&Address::zero(), &MarketId::zero());
        assert!(id.starts_with("allocator-0x"));
    }

    #[test]
    fn test_change_id_scopes_by_market() {
        let a = FlowCapsChange::change_id("0xaa", 1, &MarketId::zero());
        assert!(a.contains("0xaa-1-"));
    }
}
