pub mod config;
pub mod domain;
pub mod engine;
pub mod error;
pub mod handlers;
pub mod pricing;
pub mod store;

pub use config::{Config, Deployment};
pub use domain::{
    Address, ChainEvent, Decimal, EventEnvelope, EventPayload, MarketId, PositionSide, Timestamp,
    TokenAmount, TransactionKind,
};
pub use error::IndexError;
pub use handlers::{Dispatcher, Outcome};
pub use pricing::{PriceSource, StaticPriceSource};
pub use store::{init_store, MemoryStore, SqliteStore, Store};
