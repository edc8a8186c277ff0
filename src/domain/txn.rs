//! Immutable transaction records, one per balance-mutating event.

use serde::{Deserialize, Serialize};

use crate::domain::{
    Address, Decimal, EventEnvelope, MarketId, Timestamp, TokenAmount, TransactionKind,
};

/// One row per mutating operation, carrying the full chain envelope for
/// provenance. Keyed by `(tx_hash, log_index, kind)` so an identical
/// re-delivery is a no-op upsert.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransactionRecord {
    pub id: String,
    pub kind: TransactionKind,
    pub market: MarketId,
    pub account: Address,
    /// The other account involved, when there is one (receiver, borrower,
    /// liquidated account).
    pub counterparty: Option<Address>,
    pub amount: TokenAmount,
    pub shares: Option<TokenAmount>,
    pub amount_usd: Decimal,
    /// Ids of the positions this operation touched.
    pub position_ids: Vec<String>,

    pub tx_hash: String,
    pub tx_nonce: u64,
    pub log_index: u64,
    pub block_number: u64,
    pub timestamp: Timestamp,
    pub gas_price: TokenAmount,
    pub gas_limit: TokenAmount,
    pub gas_used: TokenAmount,
}

impl TransactionRecord {
    pub fn from_envelope(
        envelope: &EventEnvelope,
        kind: TransactionKind,
        market: MarketId,
        account: Address,
        amount: TokenAmount,
        amount_usd: Decimal,
    ) -> Self {
        TransactionRecord {
            id: envelope.record_id(kind),
            kind,
            market,
            account,
            counterparty: None,
            amount,
            shares: None,
            amount_usd,
            position_ids: Vec::new(),
            tx_hash: envelope.tx_hash.clone(),
            tx_nonce: envelope.tx_nonce,
            log_index: envelope.log_index,
            block_number: envelope.block_number,
            timestamp: envelope.timestamp,
            gas_price: envelope.gas_price.clone(),
            gas_limit: envelope.gas_limit.clone(),
            gas_used: envelope.gas_used.clone(),
        }
    }
}
