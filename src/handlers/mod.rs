//! Event dispatch: one entry point per chain event, with a replay guard.

pub mod market;
pub mod vault;

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::domain::{Address, ChainEvent};
use crate::error::Result;
use crate::pricing::PriceSource;
use crate::store::{EventCtx, Record, Store};

/// Marker row recording that an event was fully processed. Written inside the
/// same commit as the event's own mutations, so a crash between processing
/// and marking cannot happen.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProcessedEvent {
    pub id: String,
}

impl Record for ProcessedEvent {
    const TABLE: &'static str = "processed_events";

    fn key(&self) -> String {
        self.id.clone()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// The event was applied; `writes` rows were committed.
    Processed { writes: usize },
    /// The event had already been processed; nothing was written.
    Replayed,
}

pub struct Dispatcher {
    store: Box<dyn Store>,
    prices: Box<dyn PriceSource>,
    protocol_address: Address,
}

impl Dispatcher {
    pub fn new(
        store: Box<dyn Store>,
        prices: Box<dyn PriceSource>,
        protocol_address: Address,
    ) -> Self {
        Dispatcher {
            store,
            prices,
            protocol_address,
        }
    }

    /// The underlying store, for read-side consumers.
    pub fn store(&self) -> &dyn Store {
        self.store.as_ref()
    }

    /// Process one chain event. All mutations are buffered and committed
    /// atomically together with the processed marker; any error drops the
    /// buffer, committing nothing. Re-delivery of an already-processed event
    /// is a no-op.
    pub async fn process(&self, event: &ChainEvent) -> Result<Outcome> {
        let mut ctx = EventCtx::new(self.store.as_ref());

        let marker_id = format!("{}-{}", event.envelope.event_key(), event.payload.name());
        if ctx.exists::<ProcessedEvent>(&marker_id).await? {
            info!(event = event.payload.name(), key = %marker_id, "replayed event skipped");
            return Ok(Outcome::Replayed);
        }

        let handled = market::handle(
            &mut ctx,
            self.prices.as_ref(),
            &self.protocol_address,
            event,
        )
        .await?;
        if !handled {
            vault::handle(&mut ctx, event).await?;
        }

        ctx.put(&ProcessedEvent { id: marker_id })?;
        let writes = ctx.commit().await?;
        Ok(Outcome::Processed { writes })
    }
}
