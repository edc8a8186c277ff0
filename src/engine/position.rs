//! Position lifecycle: open, update, close, snapshot.

use tracing::debug;

use crate::domain::{
    ActivityMarker, Decimal, EventEnvelope, MarketId, Position, PositionCounter, PositionKey,
    PositionSnapshot, PositionSide, TokenAmount, TransactionKind,
};
use crate::error::{IndexError, Result};
use crate::store::EventCtx;

/// Outcome of one position mutation, consumed by the rollup to adjust
/// market/account/protocol counters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PositionUpdate {
    pub position_id: String,
    /// A new position record was created by this mutation.
    pub opened: bool,
    /// The balance crossed to zero and the position closed.
    pub closed: bool,
}

/// Open a new position or overwrite the open one for `key`.
///
/// `new_balance`/`new_shares` are the fully recomputed values, never deltas.
/// A mutation that finds no open position and would not create one (balance
/// zero) is a fatal inconsistency: it means reducing a position that was
/// never opened. Closing bumps the generation counter so a later reopen
/// allocates a fresh id instead of resurrecting the closed record.
pub async fn open_or_update(
    ctx: &mut EventCtx<'_>,
    key: &PositionKey,
    new_balance: TokenAmount,
    new_shares: Option<TokenAmount>,
    kind: TransactionKind,
    envelope: &EventEnvelope,
    balance_usd: Decimal,
) -> Result<PositionUpdate> {
    if !kind.valid_for(key.side) {
        return Err(IndexError::consistency(format!(
            "{} not valid for {} position {}",
            kind,
            key.side,
            key.counter_id()
        )));
    }

    let counter_id = key.counter_id();
    let mut counter = ctx
        .get::<PositionCounter>(&counter_id)
        .await?
        .unwrap_or_else(|| PositionCounter::new(key.clone()));

    let update = match counter.open_position_id.clone() {
        None => {
            if new_balance.is_zero() {
                return Err(IndexError::consistency(format!(
                    "position {} mutated to zero but was never opened",
                    counter_id
                )));
            }
            let position = Position::open(
                key,
                counter.next_generation,
                new_balance.clone(),
                new_shares.clone(),
                envelope.timestamp,
                envelope.block_number,
            );
            counter.open_position_id = Some(position.id.clone());
            let mut position = position;
            bump_kind_counter(&mut position, kind);
            snapshot(ctx, &mut position, envelope, balance_usd)?;
            let id = position.id.clone();
            ctx.put(&position)?;
            PositionUpdate {
                position_id: id,
                opened: true,
                closed: false,
            }
        }
        Some(open_id) => {
            let mut position = ctx.get::<Position>(&open_id).await?.ok_or_else(|| {
                IndexError::consistency(format!("open position {} missing from store", open_id))
            })?;
            position.balance = new_balance.clone();
            position.shares = new_shares.clone();
            bump_kind_counter(&mut position, kind);

            let closed = position.balance.is_zero();
            if closed {
                position.is_open = false;
                position.closed_at = Some(envelope.timestamp);
                position.closed_at_block = Some(envelope.block_number);
                counter.open_position_id = None;
                counter.next_generation += 1;
                debug!(position = %position.id, "position closed");
            }
            snapshot(ctx, &mut position, envelope, balance_usd)?;
            let id = position.id.clone();
            ctx.put(&position)?;
            PositionUpdate {
                position_id: id,
                opened: false,
                closed,
            }
        }
    };

    ctx.put(&counter)?;
    Ok(update)
}

/// Look up the currently open position id for `key`, if any.
pub async fn open_position_id(
    ctx: &mut EventCtx<'_>,
    key: &PositionKey,
) -> Result<Option<String>> {
    Ok(ctx
        .get::<PositionCounter>(&key.counter_id())
        .await?
        .and_then(|counter| counter.open_position_id))
}

/// Mark a market side active for the event's UTC day.
///
/// Returns true the first time that (market, side, day) is seen; later calls
/// in the same day are no-ops. Used only for usage-snapshot statistics.
pub async fn mark_daily_active(
    ctx: &mut EventCtx<'_>,
    market: &MarketId,
    side: PositionSide,
    day: i64,
) -> Result<bool> {
    let id = ActivityMarker::daily_active_id(market, side.as_str(), day);
    if ctx.exists::<ActivityMarker>(&id).await? {
        return Ok(false);
    }
    ctx.put(&ActivityMarker { id })?;
    Ok(true)
}

fn bump_kind_counter(position: &mut Position, kind: TransactionKind) {
    match kind {
        TransactionKind::Deposit | TransactionKind::DepositCollateral => {
            position.deposit_count += 1
        }
        TransactionKind::Withdraw | TransactionKind::WithdrawCollateral => {
            position.withdraw_count += 1
        }
        TransactionKind::Borrow => position.borrow_count += 1,
        TransactionKind::Repay => position.repay_count += 1,
        TransactionKind::Liquidate => position.liquidation_count += 1,
        TransactionKind::Transfer => position.transfer_count += 1,
        TransactionKind::Flashloan => {}
    }
}

fn snapshot(
    ctx: &mut EventCtx<'_>,
    position: &mut Position,
    envelope: &EventEnvelope,
    balance_usd: Decimal,
) -> Result<()> {
    let snapshot = PositionSnapshot {
        id: PositionSnapshot::snapshot_id(&position.id, position.snapshot_count),
        position_id: position.id.clone(),
        balance: position.balance.clone(),
        shares: position.shares.clone(),
        balance_usd,
        timestamp: envelope.timestamp,
        block_number: envelope.block_number,
        tx_nonce: envelope.tx_nonce,
    };
    position.snapshot_count += 1;
    ctx.put(&snapshot)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{Address, Timestamp};
    use crate::store::MemoryStore;

    fn envelope(log_index: u64) -> EventEnvelope {
        EventEnvelope {
            block_number: 100,
            timestamp: Timestamp::new(1_700_000_000),
            tx_hash: "0xaa".to_string(),
            tx_nonce: 0,
            log_index,
            gas_price: TokenAmount::zero(),
            gas_limit: TokenAmount::zero(),
            gas_used: TokenAmount::zero(),
        }
    }

    fn supplier_key() -> PositionKey {
        PositionKey::new(Address::zero(), MarketId::zero(), PositionSide::Supplier)
    }

    #[tokio::test]
    async fn test_open_then_close_then_reopen_gets_new_id() {
        let store = MemoryStore::new();
        let mut ctx = EventCtx::new(&store);
        let key = supplier_key();

        let opened = open_or_update(
            &mut ctx,
            &key,
            TokenAmount::from_u128(100),
            Some(TokenAmount::from_u128(100)),
            TransactionKind::Deposit,
            &envelope(0),
            Decimal::zero(),
        )
        .await
        .unwrap();
        assert!(opened.opened && !opened.closed);

        let closed = open_or_update(
            &mut ctx,
            &key,
            TokenAmount::zero(),
            Some(TokenAmount::zero()),
            TransactionKind::Withdraw,
            &envelope(1),
            Decimal::zero(),
        )
        .await
        .unwrap();
        assert!(closed.closed && !closed.opened);
        assert_eq!(closed.position_id, opened.position_id);

        let reopened = open_or_update(
            &mut ctx,
            &key,
            TokenAmount::from_u128(50),
            Some(TokenAmount::from_u128(50)),
            TransactionKind::Deposit,
            &envelope(2),
            Decimal::zero(),
        )
        .await
        .unwrap();
        assert!(reopened.opened);
        assert_ne!(reopened.position_id, opened.position_id);
    }

    #[tokio::test]
    async fn test_update_overwrites_balance() {
        let store = MemoryStore::new();
        let mut ctx = EventCtx::new(&store);
        let key = supplier_key();

        open_or_update(
            &mut ctx,
            &key,
            TokenAmount::from_u128(100),
            Some(TokenAmount::from_u128(100)),
            TransactionKind::Deposit,
            &envelope(0),
            Decimal::zero(),
        )
        .await
        .unwrap();
        let update = open_or_update(
            &mut ctx,
            &key,
            TokenAmount::from_u128(250),
            Some(TokenAmount::from_u128(250)),
            TransactionKind::Deposit,
            &envelope(1),
            Decimal::zero(),
        )
        .await
        .unwrap();
        assert!(!update.opened && !update.closed);

        let position: Position = ctx.get(&update.position_id).await.unwrap().unwrap();
        assert_eq!(position.balance, TokenAmount::from_u128(250));
        assert_eq!(position.deposit_count, 2);
        assert_eq!(position.snapshot_count, 2);
    }

    #[tokio::test]
    async fn test_reduce_unopened_position_is_fatal() {
        let store = MemoryStore::new();
        let mut ctx = EventCtx::new(&store);
        let result = open_or_update(
            &mut ctx,
            &supplier_key(),
            TokenAmount::zero(),
            Some(TokenAmount::zero()),
            TransactionKind::Withdraw,
            &envelope(0),
            Decimal::zero(),
        )
        .await;
        assert!(matches!(result, Err(IndexError::Consistency(_))));
    }

    #[tokio::test]
    async fn test_side_kind_mismatch_is_fatal() {
        let store = MemoryStore::new();
        let mut ctx = EventCtx::new(&store);
        let result = open_or_update(
            &mut ctx,
            &supplier_key(),
            TokenAmount::from_u128(10),
            None,
            TransactionKind::Borrow,
            &envelope(0),
            Decimal::zero(),
        )
        .await;
        assert!(matches!(result, Err(IndexError::Consistency(_))));
    }

    #[tokio::test]
    async fn test_daily_active_marks_once_per_day() {
        let store = MemoryStore::new();
        let mut ctx = EventCtx::new(&store);
        let market = MarketId::zero();
        assert!(mark_daily_active(&mut ctx, &market, PositionSide::Supplier, 19_700)
            .await
            .unwrap());
        assert!(!mark_daily_active(&mut ctx, &market, PositionSide::Supplier, 19_700)
            .await
            .unwrap());
        assert!(mark_daily_active(&mut ctx, &market, PositionSide::Supplier, 19_701)
            .await
            .unwrap());
        assert!(mark_daily_active(&mut ctx, &market, PositionSide::Borrower, 19_700)
            .await
            .unwrap());
    }
}
