//! Lending-core event handlers, routed through the aggregate rollup.

use crate::domain::{Address, ChainEvent, EventPayload};
use crate::engine::Rollup;
use crate::error::Result;
use crate::pricing::PriceSource;
use crate::store::EventCtx;

/// Handle a lending-core event. Returns false when the payload belongs to the
/// vault/allocator family instead.
pub async fn handle(
    ctx: &mut EventCtx<'_>,
    prices: &dyn PriceSource,
    protocol_address: &Address,
    event: &ChainEvent,
) -> Result<bool> {
    let envelope = &event.envelope;
    let mut rollup = Rollup::new(ctx, prices, protocol_address.clone());

    match &event.payload {
        EventPayload::CreateMarket {
            market,
            loan_token,
            collateral_token,
            oracle,
            irm,
            lltv,
        } => {
            rollup
                .create_market(
                    envelope,
                    market.clone(),
                    loan_token.clone(),
                    collateral_token.clone(),
                    oracle.clone(),
                    irm.clone(),
                    lltv.clone(),
                )
                .await?
        }
        EventPayload::Supply {
            market,
            caller,
            on_behalf,
            assets,
            shares,
        } => {
            rollup
                .deposit(envelope, market, caller, on_behalf, assets.clone(), shares.clone())
                .await?
        }
        EventPayload::Withdraw {
            market,
            caller,
            on_behalf,
            assets,
            shares,
            ..
        } => {
            rollup
                .withdraw(envelope, market, caller, on_behalf, assets.clone(), shares.clone())
                .await?
        }
        EventPayload::Borrow {
            market,
            caller,
            on_behalf,
            assets,
            shares,
            ..
        } => {
            rollup
                .borrow(envelope, market, caller, on_behalf, assets.clone(), shares.clone())
                .await?
        }
        EventPayload::Repay {
            market,
            caller,
            on_behalf,
            assets,
            shares,
        } => {
            rollup
                .repay(envelope, market, caller, on_behalf, assets.clone(), shares.clone())
                .await?
        }
        EventPayload::SupplyCollateral {
            market,
            caller,
            on_behalf,
            assets,
        } => {
            rollup
                .supply_collateral(envelope, market, caller, on_behalf, assets.clone())
                .await?
        }
        EventPayload::WithdrawCollateral {
            market,
            caller,
            on_behalf,
            assets,
            ..
        } => {
            rollup
                .withdraw_collateral(envelope, market, caller, on_behalf, assets.clone())
                .await?
        }
        EventPayload::Liquidate {
            market,
            caller,
            borrower,
            repaid_assets,
            repaid_shares,
            seized_assets,
            bad_debt_shares,
            ..
        } => {
            rollup
                .liquidate(
                    envelope,
                    market,
                    caller,
                    borrower,
                    repaid_assets.clone(),
                    repaid_shares.clone(),
                    seized_assets.clone(),
                    bad_debt_shares.clone(),
                )
                .await?
        }
        EventPayload::CollateralTransfer {
            market,
            sender,
            receiver,
            amount,
        } => {
            rollup
                .transfer(envelope, market, sender, receiver, amount.clone())
                .await?
        }
        EventPayload::Flashloan {
            caller,
            token,
            assets,
        } => rollup.flashloan(envelope, caller, token, assets.clone()).await?,
        EventPayload::AccrueInterest {
            market,
            prev_borrow_rate,
            interest,
            fee_shares,
        } => {
            rollup
                .accrue_interest(
                    envelope,
                    market,
                    prev_borrow_rate.clone(),
                    interest.clone(),
                    fee_shares.clone(),
                )
                .await?
        }
        EventPayload::SetFee { market, new_fee } => {
            rollup.set_fee(market, new_fee.clone()).await?
        }
        EventPayload::SetFeeRecipient { new_fee_recipient } => {
            rollup.set_fee_recipient(new_fee_recipient.clone()).await?
        }
        EventPayload::SetOwner { new_owner } => rollup.set_owner(new_owner.clone()).await?,
        EventPayload::EnableIrm { irm } => rollup.enable_irm(irm.clone()).await?,
        EventPayload::EnableLltv { lltv } => rollup.enable_lltv(lltv.clone()).await?,
        _ => return Ok(false),
    }
    Ok(true)
}
