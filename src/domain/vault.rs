//! Meta-vault entities: vaults, per-market allocations, pending governance
//! values and queue-change audit records.

use serde::{Deserialize, Serialize};

use crate::domain::{Address, MarketId, Timestamp, TokenAmount};

/// A yield-routing vault allocating deposits across underlying markets.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Vault {
    pub address: Address,
    pub name: String,
    pub symbol: String,
    pub asset: Address,
    pub owner: Address,
    pub guardian: Option<Address>,
    /// Timelock in seconds applied to pending governance values.
    pub timelock: u64,
    pub total_shares: TokenAmount,
    pub last_total_assets: TokenAmount,
    /// Ordered underlying market ids; each resolves to a VaultMarket row.
    pub supply_queue: Vec<MarketId>,
    pub withdraw_queue: Vec<MarketId>,
    pub pending_timelock_id: Option<String>,
    pub pending_guardian_id: Option<String>,
    pub created_at: Timestamp,
    pub created_at_block: u64,
}

impl Vault {
    pub fn new(
        address: Address,
        owner: Address,
        initial_timelock: u64,
        asset: Address,
        name: String,
        symbol: String,
        created_at: Timestamp,
        created_at_block: u64,
    ) -> Self {
        Vault {
            address,
            name,
            symbol,
            asset,
            owner,
            guardian: None,
            timelock: initial_timelock,
            total_shares: TokenAmount::zero(),
            last_total_assets: TokenAmount::zero(),
            supply_queue: Vec::new(),
            withdraw_queue: Vec::new(),
            pending_timelock_id: None,
            pending_guardian_id: None,
            created_at,
            created_at_block,
        }
    }
}

/// One per (vault, underlying market): the vault's allocation terms there.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VaultMarket {
    pub id: String,
    pub vault: Address,
    pub market: MarketId,
    pub cap: TokenAmount,
    pub pending_cap_id: Option<String>,
    /// 1-based position in the withdraw queue; 0 means not in the queue.
    pub withdraw_rank: u64,
    pub in_supply_queue: bool,
    pub in_withdraw_queue: bool,
    /// Set when a supply-queue replacement dropped this market; cleared only
    /// by a supply-queue re-add or a fresh cap activation.
    pub evicted_from_supply: bool,
    /// Withdraw-queue counterpart; the two queues evict independently.
    pub evicted_from_withdraw: bool,
}

impl VaultMarket {
    pub fn vault_market_id(vault: &Address, market: &MarketId) -> String {
        format!("{}-{}", vault, market)
    }

    pub fn new(vault: Address, market: MarketId) -> Self {
        VaultMarket {
            id: Self::vault_market_id(&vault, &market),
            vault,
            market,
            cap: TokenAmount::zero(),
            pending_cap_id: None,
            withdraw_rank: 0,
            in_supply_queue: false,
            in_withdraw_queue: false,
            evicted_from_supply: false,
            evicted_from_withdraw: false,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PendingStatus {
    Pending,
    Accepted,
    Rejected,
    Overridden,
}

/// The value a pending record proposes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum PendingPayload {
    Cap { market: MarketId, cap: TokenAmount },
    Guardian { guardian: Address },
    Timelock { timelock: u64 },
}

/// A governance change proposed under the timelock.
///
/// `PENDING` is the only non-terminal status; at most one pending value of
/// each kind exists per vault (per vault-market for caps) at any time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PendingValue {
    pub id: String,
    pub vault: Address,
    pub payload: PendingPayload,
    pub status: PendingStatus,
    pub submitted_at: Timestamp,
    /// Earliest activation time: submission plus the timelock in force.
    pub valid_at: Timestamp,
}

impl PendingValue {
    /// Id derivation includes the submission envelope so every submission is
    /// a distinct record and history survives finalization.
    pub fn pending_id(
        vault: &Address,
        payload: &PendingPayload,
        tx_hash: &str,
        log_index: u64,
    ) -> String {
        let scope = match payload {
            PendingPayload::Cap { market, .. } => format!("cap-{}", market),
            PendingPayload::Guardian { .. } => "guardian".to_string(),
            PendingPayload::Timelock { .. } => "timelock".to_string(),
        };
        format!("{}-{}-{}-{}", vault, scope, tx_hash, log_index)
    }

    pub fn submit(
        vault: Address,
        payload: PendingPayload,
        timelock: u64,
        submitted_at: Timestamp,
        tx_hash: &str,
        log_index: u64,
    ) -> Self {
        PendingValue {
            id: Self::pending_id(&vault, &payload, tx_hash, log_index),
            vault,
            payload,
            status: PendingStatus::Pending,
            submitted_at,
            valid_at: Timestamp::new(submitted_at.as_secs() + timelock as i64),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum QueueKind {
    Supply,
    Withdraw,
}

impl QueueKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            QueueKind::Supply => "SUPPLY",
            QueueKind::Withdraw => "WITHDRAW",
        }
    }
}

/// Audit record appended on every full-list queue replacement.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueueSetRecord {
    pub id: String,
    pub vault: Address,
    pub queue: QueueKind,
    pub previous: Vec<MarketId>,
    pub new: Vec<MarketId>,
    pub added: Vec<MarketId>,
    pub removed: Vec<MarketId>,
    pub timestamp: Timestamp,
    pub block_number: u64,
}

impl QueueSetRecord {
    pub fn record_id(vault: &Address, queue: QueueKind, tx_hash: &str, log_index: u64) -> String {
        format!("{}-{}-{}-{}", vault, queue.as_str(), tx_hash, log_index)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pending_valid_at_adds_timelock() {
        let pending = PendingValue::submit(
            Address::zero(),
            PendingPayload::Timelock { timelock: 86_400 },
            604_800,
            Timestamp::new(1_000),
            "0xaa",
            0,
        );
        assert_eq!(pending.valid_at, Timestamp::new(605_800));
        assert_eq!(pending.status, PendingStatus::Pending);
    }

    #[test]
    fn test_cap_pending_ids_scope_by_market() {
        let vault = Address::zero();
        let a = PendingValue::pending_id(
            &vault,
            &PendingPayload::Cap {
                market: MarketId::zero(),
                cap: TokenAmount::zero(),
            },
            "0xaa",
            0,
        );
        let b = PendingValue::pending_id(
            &vault,
            &PendingPayload::Timelock { timelock: 0 },
            "0xaa",
            0,
        );
        assert_ne!(a, b);
    }

    #[test]
    fn test_vault_market_id_layout() {
        let id = VaultMarket::vault_market_id(&Address::zero(), &MarketId::zero());
        assert!(id.contains('-'));
    }
}
