//! Domain types for the accounting ledger.

pub mod account;
pub mod allocator;
pub mod amount;
pub mod decimal;
pub mod envelope;
pub mod event;
pub mod market;
pub mod position;
pub mod primitives;
pub mod protocol;
pub mod txn;
pub mod vault;

pub use account::Account;
pub use allocator::{AllocatorMarket, AllocatorVault, FlowCapsChange};
pub use amount::{AmountParseError, TokenAmount};
pub use decimal::Decimal;
pub use envelope::EventEnvelope;
pub use event::{ChainEvent, EventPayload, FlowCapUpdate};
pub use market::{InterestRate, Market, RateSide, RateType};
pub use position::{Position, PositionCounter, PositionKey, PositionSnapshot};
pub use primitives::{
    Address, AddressParseError, MarketId, PositionSide, Timestamp, TransactionKind,
    SECONDS_PER_DAY,
};
pub use protocol::{ActivityMarker, MarketList, Protocol, RevenueDetail};
pub use txn::TransactionRecord;
pub use vault::{
    PendingPayload, PendingStatus, PendingValue, QueueKind, QueueSetRecord, Vault, VaultMarket,
};
