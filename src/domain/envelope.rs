//! Per-event chain envelope shared by every handler.

use serde::{Deserialize, Serialize};

use crate::domain::{Timestamp, TokenAmount, TransactionKind};

/// Chain metadata attached to every inbound event.
///
/// The host guarantees events arrive in exact chain order; the envelope is
/// carried into transaction records and used to derive replay-stable ids.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventEnvelope {
    pub block_number: u64,
    pub timestamp: Timestamp,
    pub tx_hash: String,
    pub tx_nonce: u64,
    pub log_index: u64,
    pub gas_price: TokenAmount,
    pub gas_limit: TokenAmount,
    pub gas_used: TokenAmount,
}

impl EventEnvelope {
    /// Content key for this event: stable across replays, unique within a
    /// transaction because the log index disambiguates.
    pub fn event_key(&self) -> String {
        format!("{}-{}", self.tx_hash, self.log_index)
    }

    /// Id for the transaction record a handler writes for this event.
    pub fn record_id(&self, kind: TransactionKind) -> String {
        format!("{}-{}-{}", self.tx_hash, self.log_index, kind.discriminant())
    }
}
