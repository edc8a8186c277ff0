//! Vault-family event handlers: factory, governance, share accounting and the
//! public allocator.

use crate::domain::{ChainEvent, EventPayload};
use crate::engine::{AllocatorEngine, VaultEngine};
use crate::error::Result;
use crate::store::EventCtx;

pub async fn handle(ctx: &mut EventCtx<'_>, event: &ChainEvent) -> Result<()> {
    let envelope = &event.envelope;

    match &event.payload {
        EventPayload::CreateVault {
            vault,
            owner,
            initial_timelock,
            asset,
            name,
            symbol,
        } => {
            VaultEngine::new(ctx)
                .create_vault(
                    envelope,
                    vault.clone(),
                    owner.clone(),
                    *initial_timelock,
                    asset.clone(),
                    name.clone(),
                    symbol.clone(),
                )
                .await
        }
        EventPayload::SubmitCap { vault, market, cap } => {
            VaultEngine::new(ctx)
                .submit_cap(envelope, vault, market, cap.clone())
                .await
        }
        EventPayload::SetCap { vault, market, cap } => {
            VaultEngine::new(ctx).set_cap(vault, market, cap.clone()).await
        }
        EventPayload::RevokePendingCap { vault, market } => {
            VaultEngine::new(ctx).revoke_cap(vault, market).await
        }
        EventPayload::SubmitTimelock { vault, new_timelock } => {
            VaultEngine::new(ctx)
                .submit_timelock(envelope, vault, *new_timelock)
                .await
        }
        EventPayload::SetTimelock { vault, new_timelock } => {
            VaultEngine::new(ctx).set_timelock(vault, *new_timelock).await
        }
        EventPayload::RevokePendingTimelock { vault } => {
            VaultEngine::new(ctx).revoke_timelock(vault).await
        }
        EventPayload::SubmitGuardian { vault, new_guardian } => {
            VaultEngine::new(ctx)
                .submit_guardian(envelope, vault, new_guardian.clone())
                .await
        }
        EventPayload::SetGuardian { vault, guardian } => {
            VaultEngine::new(ctx).set_guardian(vault, guardian.clone()).await
        }
        EventPayload::RevokePendingGuardian { vault } => {
            VaultEngine::new(ctx).revoke_guardian(vault).await
        }
        EventPayload::SetSupplyQueue { vault, queue } => {
            VaultEngine::new(ctx)
                .set_supply_queue(envelope, vault, queue.clone())
                .await
        }
        EventPayload::SetWithdrawQueue { vault, queue } => {
            VaultEngine::new(ctx)
                .set_withdraw_queue(envelope, vault, queue.clone())
                .await
        }
        EventPayload::VaultDeposit {
            vault,
            assets,
            shares,
            ..
        } => VaultEngine::new(ctx).deposit(vault, assets, shares).await,
        EventPayload::VaultWithdraw {
            vault,
            assets,
            shares,
            ..
        } => VaultEngine::new(ctx).withdraw(vault, assets, shares).await,
        EventPayload::UpdateLastTotalAssets {
            vault,
            total_assets,
        } => {
            VaultEngine::new(ctx)
                .update_last_total_assets(vault, total_assets.clone())
                .await
        }
        EventPayload::SetFlowCaps { vault, caps } => {
            AllocatorEngine::new(ctx)
                .set_flow_caps(envelope, vault, caps)
                .await
        }
        EventPayload::AllocatorSetFee { vault, fee } => {
            AllocatorEngine::new(ctx).set_fee(vault, fee.clone()).await
        }
        EventPayload::AllocatorSetAdmin { vault, admin } => {
            AllocatorEngine::new(ctx).set_admin(vault, admin.clone()).await
        }
        EventPayload::AllocatorTransferFee { vault, amount, .. } => {
            AllocatorEngine::new(ctx).transfer_fee(vault, amount).await
        }
        EventPayload::PublicWithdrawal {
            vault,
            market,
            withdrawn,
        } => {
            AllocatorEngine::new(ctx)
                .public_withdrawal(envelope, vault, market, withdrawn)
                .await
        }
        EventPayload::PublicReallocateTo {
            vault,
            market,
            supplied,
        } => {
            AllocatorEngine::new(ctx)
                .public_reallocate_to(envelope, vault, market, supplied)
                .await
        }
        // lending-core payloads are routed before this handler
        _ => Ok(()),
    }
}
