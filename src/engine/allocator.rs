//! Public-allocator accounting.
//!
//! The allocator contract accepts configuration for arbitrary addresses, but
//! only vaults created through the tracked factory are indexed; every handler
//! no-op-skips otherwise.

use tracing::debug;

use crate::domain::{
    Address, AllocatorMarket, AllocatorVault, EventEnvelope, FlowCapUpdate, FlowCapsChange,
    MarketId, TokenAmount, Vault,
};
use crate::error::Result;
use crate::store::EventCtx;

pub struct AllocatorEngine<'a, 'c> {
    ctx: &'a mut EventCtx<'c>,
}

impl<'a, 'c> AllocatorEngine<'a, 'c> {
    pub fn new(ctx: &'a mut EventCtx<'c>) -> Self {
        AllocatorEngine { ctx }
    }

    async fn registered(&mut self, vault: &Address) -> Result<bool> {
        let known = self.ctx.exists::<Vault>(vault.as_str()).await?;
        if !known {
            debug!(vault = %vault, "allocator event for unregistered vault skipped");
        }
        Ok(known)
    }

    async fn allocator_vault(&mut self, vault: &Address) -> Result<AllocatorVault> {
        Ok(self
            .ctx
            .get::<AllocatorVault>(vault.as_str())
            .await?
            .unwrap_or_else(|| AllocatorVault::new(vault.clone())))
    }

    async fn allocator_market(
        &mut self,
        vault: &Address,
        market: &MarketId,
    ) -> Result<AllocatorMarket> {
        let id = AllocatorMarket::allocator_market_id(vault, market);
        Ok(self
            .ctx
            .get::<AllocatorMarket>(&id)
            .await?
            .unwrap_or_else(|| AllocatorMarket::new(vault.clone(), market.clone())))
    }

    pub async fn set_admin(&mut self, vault: &Address, admin: Address) -> Result<()> {
        if !self.registered(vault).await? {
            return Ok(());
        }
        let mut record = self.allocator_vault(vault).await?;
        record.admin = Some(admin);
        self.ctx.put(&record)?;
        Ok(())
    }

    pub async fn set_fee(&mut self, vault: &Address, fee: TokenAmount) -> Result<()> {
        if !self.registered(vault).await? {
            return Ok(());
        }
        let mut record = self.allocator_vault(vault).await?;
        record.fee = fee;
        self.ctx.put(&record)?;
        Ok(())
    }

    pub async fn transfer_fee(&mut self, vault: &Address, amount: &TokenAmount) -> Result<()> {
        if !self.registered(vault).await? {
            return Ok(());
        }
        let mut record = self.allocator_vault(vault).await?;
        record.claimable_fee = record.claimable_fee.minus_or_zero(amount);
        record.claimed_fee = record.claimed_fee.plus(amount);
        self.ctx.put(&record)?;
        Ok(())
    }

    /// Replace flow caps for each configured market, one history row apiece.
    pub async fn set_flow_caps(
        &mut self,
        envelope: &EventEnvelope,
        vault: &Address,
        caps: &[FlowCapUpdate],
    ) -> Result<()> {
        if !self.registered(vault).await? {
            return Ok(());
        }
        for update in caps {
            let mut market = self.allocator_market(vault, &update.market).await?;
            self.record_change(envelope, &market, &update.max_in, &update.max_out)?;
            market.flow_cap_in = update.max_in.clone();
            market.flow_cap_out = update.max_out.clone();
            self.ctx.put(&market)?;
        }
        Ok(())
    }

    /// A public withdrawal consumes outbound flow capacity and accrues the
    /// per-move fee to the allocator.
    pub async fn public_withdrawal(
        &mut self,
        envelope: &EventEnvelope,
        vault: &Address,
        market_id: &MarketId,
        withdrawn: &TokenAmount,
    ) -> Result<()> {
        if !self.registered(vault).await? {
            return Ok(());
        }
        let mut allocator = self.allocator_vault(vault).await?;
        allocator.accrued_fee = allocator.accrued_fee.plus(&allocator.fee);
        allocator.claimable_fee = allocator.claimable_fee.plus(&allocator.fee);
        self.ctx.put(&allocator)?;

        let mut market = self.allocator_market(vault, market_id).await?;
        let new_out = market.flow_cap_out.minus_or_zero(withdrawn);
        self.record_change(envelope, &market, &market.flow_cap_in.clone(), &new_out)?;
        market.flow_cap_out = new_out;
        self.ctx.put(&market)?;
        Ok(())
    }

    /// A public reallocation into a market consumes inbound flow capacity.
    pub async fn public_reallocate_to(
        &mut self,
        envelope: &EventEnvelope,
        vault: &Address,
        market_id: &MarketId,
        supplied: &TokenAmount,
    ) -> Result<()> {
        if !self.registered(vault).await? {
            return Ok(());
        }
        let mut market = self.allocator_market(vault, market_id).await?;
        let new_in = market.flow_cap_in.minus_or_zero(supplied);
        self.record_change(envelope, &market, &new_in, &market.flow_cap_out.clone())?;
        market.flow_cap_in = new_in;
        self.ctx.put(&market)?;
        Ok(())
    }

    fn record_change(
        &mut self,
        envelope: &EventEnvelope,
        market: &AllocatorMarket,
        new_in: &TokenAmount,
        new_out: &TokenAmount,
    ) -> Result<()> {
        let change = FlowCapsChange {
            id: FlowCapsChange::change_id(&envelope.tx_hash, envelope.log_index, &market.market),
            vault: market.vault.clone(),
            market: market.market.clone(),
            prev_flow_cap_in: market.flow_cap_in.clone(),
            flow_cap_in: new_in.clone(),
            prev_flow_cap_out: market.flow_cap_out.clone(),
            flow_cap_out: new_out.clone(),
            timestamp: envelope.timestamp,
            block_number: envelope.block_number,
            tx_hash: envelope.tx_hash.clone(),
            log_index: envelope.log_index,
        };
        self.ctx.put(&change)?;
        Ok(())
    }
}
