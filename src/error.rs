//! Error types for event processing.

use crate::store::StoreError;

/// Errors surfaced while processing one chain event.
///
/// A `Consistency` error is a protocol-invariant violation (a row that must
/// exist is absent, a submit over an existing pending value). It aborts the
/// event with nothing committed and is a bug to investigate, not a transient
/// fault. Store errors are transient; replay is safe by construction.
#[derive(Debug, thiserror::Error)]
pub enum IndexError {
    #[error("consistency violation: {0}")]
    Consistency(String),
    #[error(transparent)]
    Store(#[from] StoreError),
}

impl IndexError {
    pub fn consistency(msg: impl Into<String>) -> Self {
        IndexError::Consistency(msg.into())
    }
}

pub type Result<T> = std::result::Result<T, IndexError>;
