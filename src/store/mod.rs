//! Keyed record store.
//!
//! Every entity is a row in a logical table, addressed by a content-derived
//! key that is stable across replays. The store only knows JSON values; typed
//! access goes through [`Record`] and the per-event [`ctx::EventCtx`].

pub mod ctx;
pub mod memory;
pub mod sqlite;

pub use ctx::EventCtx;
pub use memory::MemoryStore;
pub use sqlite::{init_store, SqliteStore};

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::domain::{
    Account, ActivityMarker, AllocatorMarket, AllocatorVault, FlowCapsChange, InterestRate,
    Market, MarketList, PendingValue, Position, PositionCounter, PositionSnapshot, Protocol,
    QueueSetRecord, RevenueDetail, TransactionRecord, Vault, VaultMarket,
};

/// A storable entity: a table name plus a replay-stable key.
///
/// Changing either for an entity type is a breaking migration.
pub trait Record: Serialize + DeserializeOwned + Clone + Send + Sync {
    const TABLE: &'static str;

    fn key(&self) -> String;
}

/// One pending upsert, already serialized.
#[derive(Debug, Clone, PartialEq)]
pub struct RawWrite {
    pub table: &'static str,
    pub key: String,
    pub value: serde_json::Value,
}

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Keyed upsert store with atomic batch commit.
#[async_trait]
pub trait Store: Send + Sync {
    async fn get_raw(
        &self,
        table: &str,
        key: &str,
    ) -> Result<Option<serde_json::Value>, StoreError>;

    /// Apply all writes atomically; either every upsert lands or none do.
    async fn commit(&self, writes: Vec<RawWrite>) -> Result<(), StoreError>;
}

impl Record for Market {
    const TABLE: &'static str = "markets";

    fn key(&self) -> String {
        self.id.to_string()
    }
}

impl Record for InterestRate {
    const TABLE: &'static str = "interest_rates";

    fn key(&self) -> String {
        self.id.clone()
    }
}

impl Record for Position {
    const TABLE: &'static str = "positions";

    fn key(&self) -> String {
        self.id.clone()
    }
}

impl Record for PositionCounter {
    const TABLE: &'static str = "position_counters";

    fn key(&self) -> String {
        self.key.counter_id()
    }
}

impl Record for PositionSnapshot {
    const TABLE: &'static str = "position_snapshots";

    fn key(&self) -> String {
        self.id.clone()
    }
}

impl Record for Account {
    const TABLE: &'static str = "accounts";

    fn key(&self) -> String {
        self.address.to_string()
    }
}

impl Record for Protocol {
    const TABLE: &'static str = "protocols";

    fn key(&self) -> String {
        self.address.to_string()
    }
}

impl Record for MarketList {
    const TABLE: &'static str = "market_lists";

    fn key(&self) -> String {
        self.protocol.to_string()
    }
}

impl Record for RevenueDetail {
    const TABLE: &'static str = "revenue_details";

    fn key(&self) -> String {
        self.id.clone()
    }
}

impl Record for ActivityMarker {
    const TABLE: &'static str = "activity_markers";

    fn key(&self) -> String {
        self.id.clone()
    }
}

impl Record for TransactionRecord {
    const TABLE: &'static str = "transactions";

    fn key(&self) -> String {
        self.id.clone()
    }
}

impl Record for Vault {
    const TABLE: &'static str = "vaults";

    fn key(&self) -> String {
        self.address.to_string()
    }
}

impl Record for VaultMarket {
    const TABLE: &'static str = "vault_markets";

    fn key(&self) -> String {
        self.id.clone()
    }
}

impl Record for PendingValue {
    const TABLE: &'static str = "pending_values";

    fn key(&self) -> String {
        self.id.clone()
    }
}

impl Record for QueueSetRecord {
    const TABLE: &'static str = "queue_set_records";

    fn key(&self) -> String {
        self.id.clone()
    }
}

impl Record for AllocatorVault {
    const TABLE: &'static str = "allocator_vaults";

    fn key(&self) -> String {
        self.vault.to_string()
    }
}

impl Record for AllocatorMarket {
    const TABLE: &'static str = "allocator_markets";

    fn key(&self) -> String {
        self.id.clone()
    }
}

impl Record for FlowCapsChange {
    const TABLE: &'static str = "flow_caps_changes";

    fn key(&self) -> String {
        self.id.clone()
    }
}
