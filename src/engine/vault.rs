//! Vault governance: pending values under timelock, queue reconciliation and
//! share accounting.

use tracing::debug;

use crate::domain::{
    Address, EventEnvelope, MarketId, PendingPayload, PendingStatus, PendingValue, QueueKind,
    QueueSetRecord, TokenAmount, Vault, VaultMarket,
};
use crate::error::{IndexError, Result};
use crate::store::EventCtx;

pub struct VaultEngine<'a, 'c> {
    ctx: &'a mut EventCtx<'c>,
}

impl<'a, 'c> VaultEngine<'a, 'c> {
    pub fn new(ctx: &'a mut EventCtx<'c>) -> Self {
        VaultEngine { ctx }
    }

    async fn require_vault(&mut self, address: &Address) -> Result<Vault> {
        self.ctx.get::<Vault>(address.as_str()).await?.ok_or_else(|| {
            IndexError::consistency(format!("vault {} referenced before creation", address))
        })
    }

    async fn vault_market(&mut self, vault: &Address, market: &MarketId) -> Result<VaultMarket> {
        let id = VaultMarket::vault_market_id(vault, market);
        Ok(self
            .ctx
            .get::<VaultMarket>(&id)
            .await?
            .unwrap_or_else(|| VaultMarket::new(vault.clone(), market.clone())))
    }

    #[allow(clippy::too_many_arguments)]
    pub async fn create_vault(
        &mut self,
        envelope: &EventEnvelope,
        address: Address,
        owner: Address,
        initial_timelock: u64,
        asset: Address,
        name: String,
        symbol: String,
    ) -> Result<()> {
        let vault = Vault::new(
            address,
            owner,
            initial_timelock,
            asset,
            name,
            symbol,
            envelope.timestamp,
            envelope.block_number,
        );
        self.ctx.put(&vault)?;
        Ok(())
    }

    pub async fn submit_cap(
        &mut self,
        envelope: &EventEnvelope,
        vault_address: &Address,
        market: &MarketId,
        cap: TokenAmount,
    ) -> Result<()> {
        let vault = self.require_vault(vault_address).await?;
        let mut vault_market = self.vault_market(vault_address, market).await?;
        if vault_market.pending_cap_id.is_some() {
            return Err(IndexError::consistency(format!(
                "cap submitted for {} while another is pending",
                vault_market.id
            )));
        }
        let pending = PendingValue::submit(
            vault_address.clone(),
            PendingPayload::Cap {
                market: market.clone(),
                cap,
            },
            vault.timelock,
            envelope.timestamp,
            &envelope.tx_hash,
            envelope.log_index,
        );
        vault_market.pending_cap_id = Some(pending.id.clone());
        self.ctx.put(&pending)?;
        self.ctx.put(&vault_market)?;
        Ok(())
    }

    /// Finalize a cap: resolve the pending record, set the live cap, and on
    /// the first strictly-positive cap enroll the market in both queues.
    pub async fn set_cap(
        &mut self,
        vault_address: &Address,
        market: &MarketId,
        cap: TokenAmount,
    ) -> Result<()> {
        let mut vault = self.require_vault(vault_address).await?;
        let mut vault_market = self.vault_market(vault_address, market).await?;

        let pending_id = vault_market.pending_cap_id.take().ok_or_else(|| {
            IndexError::consistency(format!(
                "cap finalized for {} but none was submitted",
                vault_market.id
            ))
        })?;
        let mut pending = self.ctx.get::<PendingValue>(&pending_id).await?.ok_or_else(|| {
            IndexError::consistency(format!("pending cap {} missing from store", pending_id))
        })?;
        pending.status = match &pending.payload {
            PendingPayload::Cap { cap: proposed, .. } if *proposed == cap => {
                PendingStatus::Accepted
            }
            _ => PendingStatus::Overridden,
        };
        self.ctx.put(&pending)?;

        vault_market.cap = cap.clone();
        if !cap.is_zero() && !vault_market.in_withdraw_queue {
            vault.supply_queue.push(market.clone());
            vault.withdraw_queue.push(market.clone());
            vault_market.in_supply_queue = true;
            vault_market.in_withdraw_queue = true;
            vault_market.evicted_from_supply = false;
            vault_market.evicted_from_withdraw = false;
            vault_market.withdraw_rank = vault.withdraw_queue.len() as u64;
            debug!(vault = %vault_address, market = %market, "cap activation enrolled market in queues");
            self.ctx.put(&vault)?;
        }
        self.ctx.put(&vault_market)?;
        Ok(())
    }

    pub async fn revoke_cap(&mut self, vault_address: &Address, market: &MarketId) -> Result<()> {
        let mut vault_market = self.vault_market(vault_address, market).await?;
        let pending_id = vault_market.pending_cap_id.take().ok_or_else(|| {
            IndexError::consistency(format!(
                "cap revoked for {} but none was pending",
                vault_market.id
            ))
        })?;
        self.reject_pending(&pending_id).await?;
        self.ctx.put(&vault_market)?;
        Ok(())
    }

    pub async fn submit_timelock(
        &mut self,
        envelope: &EventEnvelope,
        vault_address: &Address,
        new_timelock: u64,
    ) -> Result<()> {
        let mut vault = self.require_vault(vault_address).await?;
        if vault.pending_timelock_id.is_some() {
            return Err(IndexError::consistency(format!(
                "timelock submitted for {} while another is pending",
                vault_address
            )));
        }
        let pending = PendingValue::submit(
            vault_address.clone(),
            PendingPayload::Timelock {
                timelock: new_timelock,
            },
            vault.timelock,
            envelope.timestamp,
            &envelope.tx_hash,
            envelope.log_index,
        );
        vault.pending_timelock_id = Some(pending.id.clone());
        self.ctx.put(&pending)?;
        self.ctx.put(&vault)?;
        Ok(())
    }

    /// Finalize a timelock. With no pending record this is the owner's
    /// construction-time direct-set path: the live field changes and no
    /// state-machine transition is recorded.
    pub async fn set_timelock(&mut self, vault_address: &Address, new_timelock: u64) -> Result<()> {
        let mut vault = self.require_vault(vault_address).await?;
        if let Some(pending_id) = vault.pending_timelock_id.take() {
            self.finalize_pending(&pending_id, |payload| {
                matches!(payload, PendingPayload::Timelock { timelock } if *timelock == new_timelock)
            })
            .await?;
        }
        vault.timelock = new_timelock;
        self.ctx.put(&vault)?;
        Ok(())
    }

    pub async fn revoke_timelock(&mut self, vault_address: &Address) -> Result<()> {
        let mut vault = self.require_vault(vault_address).await?;
        let pending_id = vault.pending_timelock_id.take().ok_or_else(|| {
            IndexError::consistency(format!(
                "timelock revoked for {} but none was pending",
                vault_address
            ))
        })?;
        self.reject_pending(&pending_id).await?;
        self.ctx.put(&vault)?;
        Ok(())
    }

    pub async fn submit_guardian(
        &mut self,
        envelope: &EventEnvelope,
        vault_address: &Address,
        new_guardian: Address,
    ) -> Result<()> {
        let mut vault = self.require_vault(vault_address).await?;
        if vault.pending_guardian_id.is_some() {
            return Err(IndexError::consistency(format!(
                "guardian submitted for {} while another is pending",
                vault_address
            )));
        }
        let pending = PendingValue::submit(
            vault_address.clone(),
            PendingPayload::Guardian {
                guardian: new_guardian,
            },
            vault.timelock,
            envelope.timestamp,
            &envelope.tx_hash,
            envelope.log_index,
        );
        vault.pending_guardian_id = Some(pending.id.clone());
        self.ctx.put(&pending)?;
        self.ctx.put(&vault)?;
        Ok(())
    }

    /// Finalize a guardian; like the timelock, a missing pending record is
    /// the construction-time direct-set path.
    pub async fn set_guardian(&mut self, vault_address: &Address, guardian: Address) -> Result<()> {
        let mut vault = self.require_vault(vault_address).await?;
        if let Some(pending_id) = vault.pending_guardian_id.take() {
            let expected = guardian.clone();
            self.finalize_pending(&pending_id, move |payload| {
                matches!(payload, PendingPayload::Guardian { guardian } if *guardian == expected)
            })
            .await?;
        }
        vault.guardian = Some(guardian);
        self.ctx.put(&vault)?;
        Ok(())
    }

    pub async fn revoke_guardian(&mut self, vault_address: &Address) -> Result<()> {
        let mut vault = self.require_vault(vault_address).await?;
        let pending_id = vault.pending_guardian_id.take().ok_or_else(|| {
            IndexError::consistency(format!(
                "guardian revoked for {} but none was pending",
                vault_address
            ))
        })?;
        self.reject_pending(&pending_id).await?;
        self.ctx.put(&vault)?;
        Ok(())
    }

    /// Replace the supply queue with `new_queue`, diffing against the old
    /// list and appending an audit record.
    pub async fn set_supply_queue(
        &mut self,
        envelope: &EventEnvelope,
        vault_address: &Address,
        new_queue: Vec<MarketId>,
    ) -> Result<()> {
        let mut vault = self.require_vault(vault_address).await?;
        let previous = vault.supply_queue.clone();

        for market in &new_queue {
            let mut vault_market = self.vault_market(vault_address, market).await?;
            vault_market.in_supply_queue = true;
            vault_market.evicted_from_supply = false;
            self.ctx.put(&vault_market)?;
        }
        let removed = diff(&previous, &new_queue);
        for market in &removed {
            let mut vault_market = self.vault_market(vault_address, market).await?;
            vault_market.in_supply_queue = false;
            vault_market.evicted_from_supply = true;
            self.ctx.put(&vault_market)?;
        }

        self.queue_record(envelope, vault_address, QueueKind::Supply, &previous, &new_queue)?;
        vault.supply_queue = new_queue;
        self.ctx.put(&vault)?;
        Ok(())
    }

    /// Replace the withdraw queue: same diff as the supply queue, plus
    /// 1-based rank assignment and rank reset for evicted markets.
    pub async fn set_withdraw_queue(
        &mut self,
        envelope: &EventEnvelope,
        vault_address: &Address,
        new_queue: Vec<MarketId>,
    ) -> Result<()> {
        let mut vault = self.require_vault(vault_address).await?;
        let previous = vault.withdraw_queue.clone();

        for (index, market) in new_queue.iter().enumerate() {
            let mut vault_market = self.vault_market(vault_address, market).await?;
            vault_market.in_withdraw_queue = true;
            vault_market.evicted_from_withdraw = false;
            vault_market.withdraw_rank = index as u64 + 1;
            self.ctx.put(&vault_market)?;
        }
        let removed = diff(&previous, &new_queue);
        for market in &removed {
            let mut vault_market = self.vault_market(vault_address, market).await?;
            vault_market.in_withdraw_queue = false;
            vault_market.evicted_from_withdraw = true;
            vault_market.withdraw_rank = 0;
            self.ctx.put(&vault_market)?;
        }

        self.queue_record(envelope, vault_address, QueueKind::Withdraw, &previous, &new_queue)?;
        vault.withdraw_queue = new_queue;
        self.ctx.put(&vault)?;
        Ok(())
    }

    pub async fn deposit(
        &mut self,
        vault_address: &Address,
        assets: &TokenAmount,
        shares: &TokenAmount,
    ) -> Result<()> {
        let mut vault = self.require_vault(vault_address).await?;
        vault.total_shares = vault.total_shares.plus(shares);
        vault.last_total_assets = vault.last_total_assets.plus(assets);
        self.ctx.put(&vault)?;
        Ok(())
    }

    pub async fn withdraw(
        &mut self,
        vault_address: &Address,
        assets: &TokenAmount,
        shares: &TokenAmount,
    ) -> Result<()> {
        let mut vault = self.require_vault(vault_address).await?;
        vault.total_shares = vault.total_shares.minus_or_zero(shares);
        vault.last_total_assets = vault.last_total_assets.minus_or_zero(assets);
        self.ctx.put(&vault)?;
        Ok(())
    }

    pub async fn update_last_total_assets(
        &mut self,
        vault_address: &Address,
        total_assets: TokenAmount,
    ) -> Result<()> {
        let mut vault = self.require_vault(vault_address).await?;
        vault.last_total_assets = total_assets;
        self.ctx.put(&vault)?;
        Ok(())
    }

    async fn reject_pending(&mut self, pending_id: &str) -> Result<()> {
        let mut pending = self.ctx.get::<PendingValue>(pending_id).await?.ok_or_else(|| {
            IndexError::consistency(format!("pending value {} missing from store", pending_id))
        })?;
        pending.status = PendingStatus::Rejected;
        self.ctx.put(&pending)?;
        Ok(())
    }

    async fn finalize_pending(
        &mut self,
        pending_id: &str,
        matches_proposal: impl FnOnce(&PendingPayload) -> bool,
    ) -> Result<()> {
        let mut pending = self.ctx.get::<PendingValue>(pending_id).await?.ok_or_else(|| {
            IndexError::consistency(format!("pending value {} missing from store", pending_id))
        })?;
        pending.status = if matches_proposal(&pending.payload) {
            PendingStatus::Accepted
        } else {
            PendingStatus::Overridden
        };
        self.ctx.put(&pending)?;
        Ok(())
    }

    fn queue_record(
        &mut self,
        envelope: &EventEnvelope,
        vault: &Address,
        queue: QueueKind,
        previous: &[MarketId],
        new: &[MarketId],
    ) -> Result<()> {
        let record = QueueSetRecord {
            id: QueueSetRecord::record_id(vault, queue, &envelope.tx_hash, envelope.log_index),
            vault: vault.clone(),
            queue,
            previous: previous.to_vec(),
            new: new.to_vec(),
            added: diff(new, previous),
            removed: diff(previous, new),
            timestamp: envelope.timestamp,
            block_number: envelope.block_number,
        };
        self.ctx.put(&record)?;
        Ok(())
    }
}

/// Markets in `a` but not in `b`, in `a`'s order.
fn diff(a: &[MarketId], b: &[MarketId]) -> Vec<MarketId> {
    a.iter().filter(|id| !b.contains(id)).cloned().collect()
}
