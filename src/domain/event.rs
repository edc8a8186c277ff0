//! Typed catalog of inbound chain events.
//!
//! One variant per log the dispatcher understands, split across the lending
//! core, the vault factory, the vaults and the public allocator. The payload
//! enum is internally tagged so the NDJSON feed stays self-describing.

use serde::{Deserialize, Serialize};

use crate::domain::{Address, EventEnvelope, MarketId, TokenAmount};

/// A fully decoded chain event: envelope plus typed payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChainEvent {
    #[serde(flatten)]
    pub envelope: EventEnvelope,
    pub payload: EventPayload,
}

/// Flow-cap entry carried by a `SetFlowCaps` event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FlowCapUpdate {
    pub market: MarketId,
    pub max_in: TokenAmount,
    pub max_out: TokenAmount,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EventPayload {
    // Lending core.
    CreateMarket {
        market: MarketId,
        loan_token: Address,
        collateral_token: Address,
        oracle: Address,
        irm: Address,
        lltv: TokenAmount,
    },
    Supply {
        market: MarketId,
        caller: Address,
        on_behalf: Address,
        assets: TokenAmount,
        shares: TokenAmount,
    },
    Withdraw {
        market: MarketId,
        caller: Address,
        on_behalf: Address,
        receiver: Address,
        assets: TokenAmount,
        shares: TokenAmount,
    },
    Borrow {
        market: MarketId,
        caller: Address,
        on_behalf: Address,
        receiver: Address,
        assets: TokenAmount,
        shares: TokenAmount,
    },
    Repay {
        market: MarketId,
        caller: Address,
        on_behalf: Address,
        assets: TokenAmount,
        shares: TokenAmount,
    },
    SupplyCollateral {
        market: MarketId,
        caller: Address,
        on_behalf: Address,
        assets: TokenAmount,
    },
    WithdrawCollateral {
        market: MarketId,
        caller: Address,
        on_behalf: Address,
        receiver: Address,
        assets: TokenAmount,
    },
    Liquidate {
        market: MarketId,
        caller: Address,
        borrower: Address,
        repaid_assets: TokenAmount,
        repaid_shares: TokenAmount,
        seized_assets: TokenAmount,
        bad_debt_assets: TokenAmount,
        bad_debt_shares: TokenAmount,
    },
    AccrueInterest {
        market: MarketId,
        prev_borrow_rate: TokenAmount,
        interest: TokenAmount,
        fee_shares: TokenAmount,
    },
    Flashloan {
        caller: Address,
        token: Address,
        assets: TokenAmount,
    },
    CollateralTransfer {
        market: MarketId,
        sender: Address,
        receiver: Address,
        amount: TokenAmount,
    },
    SetFee {
        market: MarketId,
        new_fee: TokenAmount,
    },
    SetFeeRecipient {
        new_fee_recipient: Address,
    },
    SetOwner {
        new_owner: Address,
    },
    EnableIrm {
        irm: Address,
    },
    EnableLltv {
        lltv: TokenAmount,
    },

    // Vault factory.
    CreateVault {
        vault: Address,
        owner: Address,
        initial_timelock: u64,
        asset: Address,
        name: String,
        symbol: String,
    },

    // Vault governance and accounting.
    SubmitCap {
        vault: Address,
        market: MarketId,
        cap: TokenAmount,
    },
    SetCap {
        vault: Address,
        market: MarketId,
        cap: TokenAmount,
    },
    RevokePendingCap {
        vault: Address,
        market: MarketId,
    },
    SubmitTimelock {
        vault: Address,
        new_timelock: u64,
    },
    SetTimelock {
        vault: Address,
        new_timelock: u64,
    },
    RevokePendingTimelock {
        vault: Address,
    },
    SubmitGuardian {
        vault: Address,
        new_guardian: Address,
    },
    SetGuardian {
        vault: Address,
        guardian: Address,
    },
    RevokePendingGuardian {
        vault: Address,
    },
    SetSupplyQueue {
        vault: Address,
        queue: Vec<MarketId>,
    },
    SetWithdrawQueue {
        vault: Address,
        queue: Vec<MarketId>,
    },
    VaultDeposit {
        vault: Address,
        sender: Address,
        owner: Address,
        assets: TokenAmount,
        shares: TokenAmount,
    },
    VaultWithdraw {
        vault: Address,
        sender: Address,
        receiver: Address,
        owner: Address,
        assets: TokenAmount,
        shares: TokenAmount,
    },
    UpdateLastTotalAssets {
        vault: Address,
        total_assets: TokenAmount,
    },

    // Public allocator.
    SetFlowCaps {
        vault: Address,
        caps: Vec<FlowCapUpdate>,
    },
    AllocatorSetFee {
        vault: Address,
        fee: TokenAmount,
    },
    AllocatorSetAdmin {
        vault: Address,
        admin: Address,
    },
    AllocatorTransferFee {
        vault: Address,
        amount: TokenAmount,
        fee_recipient: Address,
    },
    PublicWithdrawal {
        vault: Address,
        market: MarketId,
        withdrawn: TokenAmount,
    },
    PublicReallocateTo {
        vault: Address,
        market: MarketId,
        supplied: TokenAmount,
    },
}

impl EventPayload {
    /// Short name used in logs and the processed-event marker.
    pub fn name(&self) -> &'static str {
        match self {
            EventPayload::CreateMarket { .. } => "create_market",
            EventPayload::Supply { .. } => "supply",
            EventPayload::Withdraw { .. } => "withdraw",
            EventPayload::Borrow { .. } => "borrow",
            EventPayload::Repay { .. } => "repay",
            EventPayload::SupplyCollateral { .. } => "supply_collateral",
            EventPayload::WithdrawCollateral { .. } => "withdraw_collateral",
            EventPayload::Liquidate { .. } => "liquidate",
            EventPayload::AccrueInterest { .. } => "accrue_interest",
            EventPayload::Flashloan { .. } => "flashloan",
            EventPayload::CollateralTransfer { .. } => "collateral_transfer",
            EventPayload::SetFee { .. } => "set_fee",
            EventPayload::SetFeeRecipient { .. } => "set_fee_recipient",
            EventPayload::SetOwner { .. } => "set_owner",
            EventPayload::EnableIrm { .. } => "enable_irm",
            EventPayload::EnableLltv { .. } => "enable_lltv",
            EventPayload::CreateVault { .. } => "create_vault",
            EventPayload::SubmitCap { .. } => "submit_cap",
            EventPayload::SetCap { .. } => "set_cap",
            EventPayload::RevokePendingCap { .. } => "revoke_pending_cap",
            EventPayload::SubmitTimelock { .. } => "submit_timelock",
            EventPayload::SetTimelock { .. } => "set_timelock",
            EventPayload::RevokePendingTimelock { .. } => "revoke_pending_timelock",
            EventPayload::SubmitGuardian { .. } => "submit_guardian",
            EventPayload::SetGuardian { .. } => "set_guardian",
            EventPayload::RevokePendingGuardian { .. } => "revoke_pending_guardian",
            EventPayload::SetSupplyQueue { .. } => "set_supply_queue",
            EventPayload::SetWithdrawQueue { .. } => "set_withdraw_queue",
            EventPayload::VaultDeposit { .. } => "vault_deposit",
            EventPayload::VaultWithdraw { .. } => "vault_withdraw",
            EventPayload::UpdateLastTotalAssets { .. } => "update_last_total_assets",
            EventPayload::SetFlowCaps { .. } => "set_flow_caps",
            EventPayload::AllocatorSetFee { .. } => "allocator_set_fee",
            EventPayload::AllocatorSetAdmin { .. } => "allocator_set_admin",
            EventPayload::AllocatorTransferFee { .. } => "allocator_transfer_fee",
            EventPayload::PublicWithdrawal { .. } => "public_withdrawal",
            EventPayload::PublicReallocateTo { .. } => "public_reallocate_to",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::Timestamp;

    #[test]
    fn test_payload_json_is_tagged() {
        let payload = EventPayload::SetOwner {
            new_owner: Address::zero(),
        };
        let json = serde_json::to_value(&payload).unwrap();
        assert_eq!(json["type"], "set_owner");
    }

    #[test]
    fn test_event_ndjson_roundtrip() {
        let event = ChainEvent {
            envelope: EventEnvelope {
                block_number: 1,
                timestamp: Timestamp::new(1_700_000_000),
                tx_hash: "0xdeadbeef".to_string(),
                tx_nonce: 0,
                log_index: 3,
                gas_price: TokenAmount::zero(),
                gas_limit: TokenAmount::zero(),
                gas_used: TokenAmount::zero(),
            },
            payload: EventPayload::Flashloan {
                caller: Address::zero(),
                token: Address::zero(),
                assets: TokenAmount::from_u128(1_000),
            },
        };
        let line = serde_json::to_string(&event).unwrap();
        let back: ChainEvent = serde_json::from_str(&line).unwrap();
        assert_eq!(back, event);
    }
}
