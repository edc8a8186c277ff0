//! Aggregate rollup: the single write path for market and protocol totals.
//!
//! Every balance-mutating operation flows through here. The rollup resolves
//! accounts, delegates share conversion and position updates, appends the
//! immutable transaction record, bumps usage counters idempotently and
//! recomputes USD balances over the full registered market list.

use tracing::warn;

use crate::domain::{
    Account, ActivityMarker, Address, Decimal, EventEnvelope, InterestRate, Market, MarketId,
    MarketList, PositionKey, PositionSide, Protocol, RateSide, RateType, TokenAmount,
    TransactionKind, TransactionRecord,
};
use crate::engine::position::{mark_daily_active, open_or_update};
use crate::engine::revenue::{attribute, RevenueSide};
use crate::engine::share_math::{to_assets_down, to_assets_up};
use crate::error::{IndexError, Result};
use crate::pricing::PriceSource;
use crate::store::EventCtx;

/// Revenue source name for interest earned by suppliers.
pub const SOURCE_SUPPLY_INTEREST: &str = "supply-interest";
/// Revenue source name for the protocol's cut of accrued interest.
pub const SOURCE_PROTOCOL_FEE: &str = "protocol-fee";

pub struct Rollup<'a, 'c> {
    ctx: &'a mut EventCtx<'c>,
    prices: &'a dyn PriceSource,
    protocol_address: Address,
}

impl<'a, 'c> Rollup<'a, 'c> {
    pub fn new(
        ctx: &'a mut EventCtx<'c>,
        prices: &'a dyn PriceSource,
        protocol_address: Address,
    ) -> Self {
        Rollup {
            ctx,
            prices,
            protocol_address,
        }
    }

    /// Load the protocol singleton, creating it on first sight.
    pub async fn protocol(&mut self) -> Result<Protocol> {
        let key = self.protocol_address.to_string();
        match self.ctx.get::<Protocol>(&key).await? {
            Some(protocol) => Ok(protocol),
            None => {
                let protocol = Protocol::new(self.protocol_address.clone(), Address::zero());
                let list = MarketList::new(self.protocol_address.clone());
                self.ctx.put(&protocol)?;
                self.ctx.put(&list)?;
                Ok(protocol)
            }
        }
    }

    async fn require_market(&mut self, id: &MarketId) -> Result<Market> {
        self.ctx.get::<Market>(&id.to_string()).await?.ok_or_else(|| {
            IndexError::consistency(format!("market {} referenced before creation", id))
        })
    }

    async fn account(&mut self, address: &Address) -> Result<Account> {
        Ok(self
            .ctx
            .get::<Account>(address.as_str())
            .await?
            .unwrap_or_else(|| Account::new(address.clone())))
    }

    /// Register a newly created market with empty totals and its rate records.
    pub async fn create_market(
        &mut self,
        envelope: &EventEnvelope,
        id: MarketId,
        loan_token: Address,
        collateral_token: Address,
        oracle: Address,
        irm: Address,
        lltv: TokenAmount,
    ) -> Result<()> {
        let protocol = self.protocol().await?;
        let mut market = Market::new(
            id.clone(),
            loan_token,
            collateral_token,
            oracle,
            irm,
            lltv,
            envelope.timestamp,
            envelope.block_number,
        );

        for side in [RateSide::Lender, RateSide::Borrower] {
            let rate = InterestRate {
                id: InterestRate::rate_id(side, RateType::Variable, &id),
                market: id.clone(),
                side,
                rate_type: RateType::Variable,
                rate: Decimal::zero(),
            };
            market.rate_ids.push(rate.id.clone());
            self.ctx.put(&rate)?;
        }

        let mut list = self.market_list().await?;
        list.add(id);
        self.ctx.put(&list)?;
        self.ctx.put(&market)?;
        self.ctx.put(&protocol)?;
        Ok(())
    }

    pub async fn deposit(
        &mut self,
        envelope: &EventEnvelope,
        market_id: &MarketId,
        caller: &Address,
        on_behalf: &Address,
        assets: TokenAmount,
        shares: TokenAmount,
    ) -> Result<()> {
        let mut market = self.require_market(market_id).await?;
        let mut protocol = self.protocol().await?;
        let mut account = self.account(on_behalf).await?;

        self.track_new_user(&mut protocol, &account);
        account.deposit_count += 1;

        market.total_supply = market.total_supply.plus(&assets);
        market.total_supply_shares = market.total_supply_shares.plus(&shares);

        let key = PositionKey::new(on_behalf.clone(), market_id.clone(), PositionSide::Supplier);
        let new_shares = self
            .open_shares(&key)
            .await?
            .unwrap_or_else(TokenAmount::zero)
            .plus(&shares);
        let new_balance = to_assets_down(
            &new_shares,
            &market.total_supply_shares,
            &market.total_supply,
        );
        let balance_usd = self.prices.value_usd(&market.loan_token, &new_balance);
        let update = self
            .apply_position(
                &mut protocol,
                &mut market,
                &mut account,
                &key,
                new_balance,
                Some(new_shares),
                TransactionKind::Deposit,
                envelope,
                balance_usd,
            )
            .await?;

        let amount_usd = self.prices.value_usd(&market.loan_token, &assets);
        let mut record = TransactionRecord::from_envelope(
            envelope,
            TransactionKind::Deposit,
            market_id.clone(),
            on_behalf.clone(),
            assets,
            amount_usd,
        );
        record.shares = Some(shares);
        record.counterparty = counterparty(caller, on_behalf);
        record.position_ids = vec![update];
        self.ctx.put(&record)?;

        self.bump_transaction(&mut market, &mut protocol, TransactionKind::Deposit, amount_usd);
        self.mark_participant(&mut protocol, on_behalf, TransactionKind::Deposit)
            .await?;
        self.finish(envelope, market, protocol, account).await
    }

    pub async fn withdraw(
        &mut self,
        envelope: &EventEnvelope,
        market_id: &MarketId,
        caller: &Address,
        on_behalf: &Address,
        assets: TokenAmount,
        shares: TokenAmount,
    ) -> Result<()> {
        let mut market = self.require_market(market_id).await?;
        let mut protocol = self.protocol().await?;
        let mut account = self.account(on_behalf).await?;

        self.track_new_user(&mut protocol, &account);
        account.withdraw_count += 1;

        market.total_supply = sub_total(&market.total_supply, &assets, market_id, "totalSupply");
        market.total_supply_shares = sub_total(
            &market.total_supply_shares,
            &shares,
            market_id,
            "totalSupplyShares",
        );

        let key = PositionKey::new(on_behalf.clone(), market_id.clone(), PositionSide::Supplier);
        let new_shares = self
            .open_shares(&key)
            .await?
            .ok_or_else(|| {
                IndexError::consistency(format!(
                    "withdraw from unopened supplier position {}",
                    key.counter_id()
                ))
            })?
            .minus_or_zero(&shares);
        let new_balance = if new_shares.is_zero() {
            TokenAmount::zero()
        } else {
            to_assets_down(
                &new_shares,
                &market.total_supply_shares,
                &market.total_supply,
            )
        };
        let balance_usd = self.prices.value_usd(&market.loan_token, &new_balance);
        let update = self
            .apply_position(
                &mut protocol,
                &mut market,
                &mut account,
                &key,
                new_balance,
                Some(new_shares),
                TransactionKind::Withdraw,
                envelope,
                balance_usd,
            )
            .await?;

        let amount_usd = self.prices.value_usd(&market.loan_token, &assets);
        let mut record = TransactionRecord::from_envelope(
            envelope,
            TransactionKind::Withdraw,
            market_id.clone(),
            on_behalf.clone(),
            assets,
            amount_usd,
        );
        record.shares = Some(shares);
        record.counterparty = counterparty(caller, on_behalf);
        record.position_ids = vec![update];
        self.ctx.put(&record)?;

        self.bump_transaction(&mut market, &mut protocol, TransactionKind::Withdraw, amount_usd);
        self.finish(envelope, market, protocol, account).await
    }

    pub async fn borrow(
        &mut self,
        envelope: &EventEnvelope,
        market_id: &MarketId,
        caller: &Address,
        on_behalf: &Address,
        assets: TokenAmount,
        shares: TokenAmount,
    ) -> Result<()> {
        let mut market = self.require_market(market_id).await?;
        let mut protocol = self.protocol().await?;
        let mut account = self.account(on_behalf).await?;

        self.track_new_user(&mut protocol, &account);
        account.borrow_count += 1;

        market.total_borrow = market.total_borrow.plus(&assets);
        market.total_borrow_shares = market.total_borrow_shares.plus(&shares);

        let key = PositionKey::new(on_behalf.clone(), market_id.clone(), PositionSide::Borrower);
        let new_shares = self
            .open_shares(&key)
            .await?
            .unwrap_or_else(TokenAmount::zero)
            .plus(&shares);
        let new_balance = to_assets_up(
            &new_shares,
            &market.total_borrow_shares,
            &market.total_borrow,
        );
        let balance_usd = self.prices.value_usd(&market.loan_token, &new_balance);
        let update = self
            .apply_position(
                &mut protocol,
                &mut market,
                &mut account,
                &key,
                new_balance,
                Some(new_shares),
                TransactionKind::Borrow,
                envelope,
                balance_usd,
            )
            .await?;

        let amount_usd = self.prices.value_usd(&market.loan_token, &assets);
        let mut record = TransactionRecord::from_envelope(
            envelope,
            TransactionKind::Borrow,
            market_id.clone(),
            on_behalf.clone(),
            assets,
            amount_usd,
        );
        record.shares = Some(shares);
        record.counterparty = counterparty(caller, on_behalf);
        record.position_ids = vec![update];
        self.ctx.put(&record)?;

        self.bump_transaction(&mut market, &mut protocol, TransactionKind::Borrow, amount_usd);
        self.mark_participant(&mut protocol, on_behalf, TransactionKind::Borrow)
            .await?;
        self.finish(envelope, market, protocol, account).await
    }

    pub async fn repay(
        &mut self,
        envelope: &EventEnvelope,
        market_id: &MarketId,
        caller: &Address,
        on_behalf: &Address,
        assets: TokenAmount,
        shares: TokenAmount,
    ) -> Result<()> {
        let mut market = self.require_market(market_id).await?;
        let mut protocol = self.protocol().await?;
        let mut account = self.account(on_behalf).await?;

        self.track_new_user(&mut protocol, &account);
        account.repay_count += 1;

        market.total_borrow = sub_total(&market.total_borrow, &assets, market_id, "totalBorrow");
        market.total_borrow_shares = sub_total(
            &market.total_borrow_shares,
            &shares,
            market_id,
            "totalBorrowShares",
        );

        let key = PositionKey::new(on_behalf.clone(), market_id.clone(), PositionSide::Borrower);
        let new_shares = self
            .open_shares(&key)
            .await?
            .ok_or_else(|| {
                IndexError::consistency(format!(
                    "repay against unopened borrower position {}",
                    key.counter_id()
                ))
            })?
            .minus_or_zero(&shares);
        let new_balance = if new_shares.is_zero() {
            TokenAmount::zero()
        } else {
            to_assets_up(
                &new_shares,
                &market.total_borrow_shares,
                &market.total_borrow,
            )
        };
        let balance_usd = self.prices.value_usd(&market.loan_token, &new_balance);
        let update = self
            .apply_position(
                &mut protocol,
                &mut market,
                &mut account,
                &key,
                new_balance,
                Some(new_shares),
                TransactionKind::Repay,
                envelope,
                balance_usd,
            )
            .await?;

        let amount_usd = self.prices.value_usd(&market.loan_token, &assets);
        let mut record = TransactionRecord::from_envelope(
            envelope,
            TransactionKind::Repay,
            market_id.clone(),
            on_behalf.clone(),
            assets,
            amount_usd,
        );
        record.shares = Some(shares);
        record.counterparty = counterparty(caller, on_behalf);
        record.position_ids = vec![update];
        self.ctx.put(&record)?;

        self.bump_transaction(&mut market, &mut protocol, TransactionKind::Repay, amount_usd);
        self.finish(envelope, market, protocol, account).await
    }

    pub async fn supply_collateral(
        &mut self,
        envelope: &EventEnvelope,
        market_id: &MarketId,
        caller: &Address,
        on_behalf: &Address,
        assets: TokenAmount,
    ) -> Result<()> {
        let mut market = self.require_market(market_id).await?;
        let mut protocol = self.protocol().await?;
        let mut account = self.account(on_behalf).await?;

        self.track_new_user(&mut protocol, &account);
        account.deposit_count += 1;

        market.total_collateral = market.total_collateral.plus(&assets);

        let key = PositionKey::new(on_behalf.clone(), market_id.clone(), PositionSide::Collateral);
        let new_balance = self
            .open_balance(&key)
            .await?
            .unwrap_or_else(TokenAmount::zero)
            .plus(&assets);
        let balance_usd = self
            .prices
            .value_usd(&market.collateral_token, &new_balance);
        let update = self
            .apply_position(
                &mut protocol,
                &mut market,
                &mut account,
                &key,
                new_balance,
                None,
                TransactionKind::DepositCollateral,
                envelope,
                balance_usd,
            )
            .await?;

        let amount_usd = self.prices.value_usd(&market.collateral_token, &assets);
        let mut record = TransactionRecord::from_envelope(
            envelope,
            TransactionKind::DepositCollateral,
            market_id.clone(),
            on_behalf.clone(),
            assets,
            amount_usd,
        );
        record.counterparty = counterparty(caller, on_behalf);
        record.position_ids = vec![update];
        self.ctx.put(&record)?;

        self.bump_transaction(
            &mut market,
            &mut protocol,
            TransactionKind::DepositCollateral,
            amount_usd,
        );
        self.mark_participant(&mut protocol, on_behalf, TransactionKind::DepositCollateral)
            .await?;
        self.finish(envelope, market, protocol, account).await
    }

    pub async fn withdraw_collateral(
        &mut self,
        envelope: &EventEnvelope,
        market_id: &MarketId,
        caller: &Address,
        on_behalf: &Address,
        assets: TokenAmount,
    ) -> Result<()> {
        let mut market = self.require_market(market_id).await?;
        let mut protocol = self.protocol().await?;
        let mut account = self.account(on_behalf).await?;

        self.track_new_user(&mut protocol, &account);
        account.withdraw_count += 1;

        market.total_collateral = sub_total(
            &market.total_collateral,
            &assets,
            market_id,
            "totalCollateral",
        );

        let key = PositionKey::new(on_behalf.clone(), market_id.clone(), PositionSide::Collateral);
        let new_balance = self
            .open_balance(&key)
            .await?
            .ok_or_else(|| {
                IndexError::consistency(format!(
                    "collateral withdraw from unopened position {}",
                    key.counter_id()
                ))
            })?
            .minus_or_zero(&assets);
        let balance_usd = self
            .prices
            .value_usd(&market.collateral_token, &new_balance);
        let update = self
            .apply_position(
                &mut protocol,
                &mut market,
                &mut account,
                &key,
                new_balance,
                None,
                TransactionKind::WithdrawCollateral,
                envelope,
                balance_usd,
            )
            .await?;

        let amount_usd = self.prices.value_usd(&market.collateral_token, &assets);
        let mut record = TransactionRecord::from_envelope(
            envelope,
            TransactionKind::WithdrawCollateral,
            market_id.clone(),
            on_behalf.clone(),
            assets,
            amount_usd,
        );
        record.counterparty = counterparty(caller, on_behalf);
        record.position_ids = vec![update];
        self.ctx.put(&record)?;

        self.bump_transaction(
            &mut market,
            &mut protocol,
            TransactionKind::WithdrawCollateral,
            amount_usd,
        );
        self.finish(envelope, market, protocol, account).await
    }

    /// Liquidation: seize collateral, retire repaid debt, then socialize any
    /// bad debt to suppliers.
    ///
    /// Subtraction order is load-bearing: repaid assets/shares come off the
    /// totals first, bad debt is valued with `to_assets_up` against the
    /// post-repay totals, and only then is it subtracted from both
    /// `total_supply` and `total_borrow`.
    #[allow(clippy::too_many_arguments)]
    pub async fn liquidate(
        &mut self,
        envelope: &EventEnvelope,
        market_id: &MarketId,
        liquidator: &Address,
        borrower: &Address,
        repaid_assets: TokenAmount,
        repaid_shares: TokenAmount,
        seized_assets: TokenAmount,
        bad_debt_shares: TokenAmount,
    ) -> Result<()> {
        let mut market = self.require_market(market_id).await?;
        let mut protocol = self.protocol().await?;
        let mut liquidator_account = self.account(liquidator).await?;

        self.track_new_user(&mut protocol, &liquidator_account);
        liquidator_account.liquidate_count += 1;
        // buffered now so a self-liquidation reads the bumped row back as the
        // borrower instead of a stale store copy
        self.ctx.put(&liquidator_account)?;

        // collateral side: the borrower loses the seized amount
        market.total_collateral = sub_total(
            &market.total_collateral,
            &seized_assets,
            market_id,
            "totalCollateral",
        );
        let collateral_key =
            PositionKey::new(borrower.clone(), market_id.clone(), PositionSide::Collateral);
        let collateral_balance = self
            .open_balance(&collateral_key)
            .await?
            .ok_or_else(|| {
                IndexError::consistency(format!(
                    "liquidation seized unopened collateral position {}",
                    collateral_key.counter_id()
                ))
            })?
            .minus_or_zero(&seized_assets);
        let collateral_usd = self
            .prices
            .value_usd(&market.collateral_token, &collateral_balance);
        let mut borrower_account = self.account(borrower).await?;
        borrower_account.liquidated_count += 1;
        let collateral_position = self
            .apply_position(
                &mut protocol,
                &mut market,
                &mut borrower_account,
                &collateral_key,
                collateral_balance,
                None,
                TransactionKind::Liquidate,
                envelope,
                collateral_usd,
            )
            .await?;

        // debt side: repaid first
        market.total_borrow = sub_total(
            &market.total_borrow,
            &repaid_assets,
            market_id,
            "totalBorrow",
        );
        market.total_borrow_shares = sub_total(
            &market.total_borrow_shares,
            &repaid_shares,
            market_id,
            "totalBorrowShares",
        );

        // bad debt valued against the post-repay totals, then socialized
        let bad_debt = if bad_debt_shares.is_zero() {
            TokenAmount::zero()
        } else {
            let bad_debt = to_assets_up(
                &bad_debt_shares,
                &market.total_borrow_shares,
                &market.total_borrow,
            );
            market.total_borrow = sub_total(&market.total_borrow, &bad_debt, market_id, "totalBorrow");
            market.total_borrow_shares = sub_total(
                &market.total_borrow_shares,
                &bad_debt_shares,
                market_id,
                "totalBorrowShares",
            );
            market.total_supply =
                sub_total(&market.total_supply, &bad_debt, market_id, "totalSupply");
            bad_debt
        };

        let borrower_key =
            PositionKey::new(borrower.clone(), market_id.clone(), PositionSide::Borrower);
        let retired_shares = repaid_shares.plus(&bad_debt_shares);
        let new_borrow_shares = self
            .open_shares(&borrower_key)
            .await?
            .ok_or_else(|| {
                IndexError::consistency(format!(
                    "liquidation against unopened borrower position {}",
                    borrower_key.counter_id()
                ))
            })?
            .minus_or_zero(&retired_shares);
        let new_debt = if new_borrow_shares.is_zero() {
            TokenAmount::zero()
        } else {
            to_assets_up(
                &new_borrow_shares,
                &market.total_borrow_shares,
                &market.total_borrow,
            )
        };
        let debt_usd = self.prices.value_usd(&market.loan_token, &new_debt);
        let borrower_position = self
            .apply_position(
                &mut protocol,
                &mut market,
                &mut borrower_account,
                &borrower_key,
                new_debt,
                Some(new_borrow_shares),
                TransactionKind::Liquidate,
                envelope,
                debt_usd,
            )
            .await?;

        let seized_usd = self
            .prices
            .value_usd(&market.collateral_token, &seized_assets);
        let mut record = TransactionRecord::from_envelope(
            envelope,
            TransactionKind::Liquidate,
            market_id.clone(),
            liquidator.clone(),
            seized_assets,
            seized_usd,
        );
        record.counterparty = Some(borrower.clone());
        record.shares = Some(repaid_shares);
        record.position_ids = vec![collateral_position, borrower_position];
        self.ctx.put(&record)?;

        if !bad_debt.is_zero() {
            warn!(market = %market_id, bad_debt = %bad_debt, "bad debt socialized to suppliers");
        }

        self.bump_transaction(&mut market, &mut protocol, TransactionKind::Liquidate, seized_usd);
        self.mark_participant(&mut protocol, liquidator, TransactionKind::Liquidate)
            .await?;
        self.mark_liquidatee(&mut protocol, borrower).await?;
        self.finish(envelope, market, protocol, borrower_account)
            .await
    }

    /// Move collateral between two accounts inside one market.
    ///
    /// The receiver is not counted as a user: it spent no gas.
    pub async fn transfer(
        &mut self,
        envelope: &EventEnvelope,
        market_id: &MarketId,
        sender: &Address,
        receiver: &Address,
        amount: TokenAmount,
    ) -> Result<()> {
        let mut market = self.require_market(market_id).await?;
        let mut protocol = self.protocol().await?;
        let mut sender_account = self.account(sender).await?;

        self.track_new_user(&mut protocol, &sender_account);
        sender_account.transferred_count += 1;

        let sender_key =
            PositionKey::new(sender.clone(), market_id.clone(), PositionSide::Collateral);
        let sender_balance = self
            .open_balance(&sender_key)
            .await?
            .ok_or_else(|| {
                IndexError::consistency(format!(
                    "transfer from unopened collateral position {}",
                    sender_key.counter_id()
                ))
            })?
            .minus_or_zero(&amount);
        let sender_usd = self
            .prices
            .value_usd(&market.collateral_token, &sender_balance);
        let sender_position = self
            .apply_position(
                &mut protocol,
                &mut market,
                &mut sender_account,
                &sender_key,
                sender_balance,
                None,
                TransactionKind::Transfer,
                envelope,
                sender_usd,
            )
            .await?;
        // buffered now so a self-transfer reads the bumped row back as the
        // receiver instead of a stale store copy
        self.ctx.put(&sender_account)?;

        let mut receiver_account = self.account(receiver).await?;
        receiver_account.received_count += 1;
        let receiver_key =
            PositionKey::new(receiver.clone(), market_id.clone(), PositionSide::Collateral);
        let receiver_balance = self
            .open_balance(&receiver_key)
            .await?
            .unwrap_or_else(TokenAmount::zero)
            .plus(&amount);
        let receiver_usd = self
            .prices
            .value_usd(&market.collateral_token, &receiver_balance);
        let receiver_position = self
            .apply_position(
                &mut protocol,
                &mut market,
                &mut receiver_account,
                &receiver_key,
                receiver_balance,
                None,
                TransactionKind::Transfer,
                envelope,
                receiver_usd,
            )
            .await?;

        let amount_usd = self.prices.value_usd(&market.collateral_token, &amount);
        let mut record = TransactionRecord::from_envelope(
            envelope,
            TransactionKind::Transfer,
            market_id.clone(),
            sender.clone(),
            amount,
            amount_usd,
        );
        record.counterparty = Some(receiver.clone());
        record.position_ids = vec![receiver_position, sender_position];
        self.ctx.put(&record)?;

        self.bump_transaction(&mut market, &mut protocol, TransactionKind::Transfer, amount_usd);
        self.mark_participant(&mut protocol, sender, TransactionKind::Transfer)
            .await?;
        self.finish(envelope, market, protocol, receiver_account).await
    }

    /// Flashloans have no market of their own; they aggregate under the
    /// auto-created zero market.
    pub async fn flashloan(
        &mut self,
        envelope: &EventEnvelope,
        caller: &Address,
        token: &Address,
        assets: TokenAmount,
    ) -> Result<()> {
        let mut market = self.zero_market(envelope).await?;
        let mut protocol = self.protocol().await?;
        let mut account = self.account(caller).await?;

        self.track_new_user(&mut protocol, &account);
        account.flashloan_count += 1;

        let amount_usd = self.prices.value_usd(token, &assets);
        let mut record = TransactionRecord::from_envelope(
            envelope,
            TransactionKind::Flashloan,
            market.id.clone(),
            caller.clone(),
            assets,
            amount_usd,
        );
        record.counterparty = Some(token.clone());
        self.ctx.put(&record)?;

        self.bump_transaction(&mut market, &mut protocol, TransactionKind::Flashloan, amount_usd);
        self.mark_participant(&mut protocol, caller, TransactionKind::Flashloan)
            .await?;
        self.finish(envelope, market, protocol, account).await
    }

    /// Interest accrual: grow both sides of the book, mint fee shares to the
    /// fee recipient and split the interest's USD value into supply-side and
    /// protocol-side revenue.
    pub async fn accrue_interest(
        &mut self,
        envelope: &EventEnvelope,
        market_id: &MarketId,
        prev_borrow_rate: TokenAmount,
        interest: TokenAmount,
        fee_shares: TokenAmount,
    ) -> Result<()> {
        let mut market = self.require_market(market_id).await?;
        let mut protocol = self.protocol().await?;

        market.total_supply = market.total_supply.plus(&interest);
        market.total_borrow = market.total_borrow.plus(&interest);
        market.accrued_interests = market.accrued_interests.plus(&interest);

        let borrower_rate_id =
            InterestRate::rate_id(RateSide::Borrower, RateType::Variable, market_id);
        if let Some(mut rate) = self.ctx.get::<InterestRate>(&borrower_rate_id).await? {
            rate.rate = prev_borrow_rate.to_decimal(18);
            self.ctx.put(&rate)?;
        }

        if !fee_shares.is_zero() {
            market.total_supply_shares = market.total_supply_shares.plus(&fee_shares);
            let recipient = protocol.fee_recipient.clone();
            let mut recipient_account = self.account(&recipient).await?;
            // the fee recipient earns shares passively and does not count as
            // a user or depositor
            let key =
                PositionKey::new(recipient, market_id.clone(), PositionSide::Supplier);
            let new_shares = self
                .open_shares(&key)
                .await?
                .unwrap_or_else(TokenAmount::zero)
                .plus(&fee_shares);
            let new_balance = to_assets_down(
                &new_shares,
                &market.total_supply_shares,
                &market.total_supply,
            );
            let balance_usd = self.prices.value_usd(&market.loan_token, &new_balance);
            self.apply_position(
                &mut protocol,
                &mut market,
                &mut recipient_account,
                &key,
                new_balance,
                Some(new_shares),
                TransactionKind::Deposit,
                envelope,
                balance_usd,
            )
            .await?;
            self.ctx.put(&recipient_account)?;
        }

        let interest_usd = self.prices.value_usd(&market.loan_token, &interest);
        let fee_rate = market.fee.to_decimal(18);
        let protocol_side = interest_usd * fee_rate;
        let supply_side = interest_usd - protocol_side;
        attribute(
            self.ctx,
            &mut market,
            &mut protocol,
            SOURCE_SUPPLY_INTEREST,
            supply_side,
            RevenueSide::Supply,
        )
        .await?;
        attribute(
            self.ctx,
            &mut market,
            &mut protocol,
            SOURCE_PROTOCOL_FEE,
            protocol_side,
            RevenueSide::Protocol,
        )
        .await?;

        market.last_update = envelope.timestamp;
        self.recompute_balances(&mut market, &mut protocol).await?;
        self.ctx.put(&market)?;
        self.ctx.put(&protocol)?;
        Ok(())
    }

    pub async fn set_fee(&mut self, market_id: &MarketId, new_fee: TokenAmount) -> Result<()> {
        let mut market = self.require_market(market_id).await?;
        market.fee = new_fee;
        self.ctx.put(&market)?;
        Ok(())
    }

    pub async fn set_fee_recipient(&mut self, recipient: Address) -> Result<()> {
        let mut protocol = self.protocol().await?;
        protocol.fee_recipient = recipient;
        self.ctx.put(&protocol)?;
        Ok(())
    }

    pub async fn set_owner(&mut self, owner: Address) -> Result<()> {
        let mut protocol = self.protocol().await?;
        protocol.owner = owner;
        self.ctx.put(&protocol)?;
        Ok(())
    }

    pub async fn enable_irm(&mut self, irm: Address) -> Result<()> {
        let mut protocol = self.protocol().await?;
        protocol.enable_irm(irm);
        self.ctx.put(&protocol)?;
        Ok(())
    }

    pub async fn enable_lltv(&mut self, lltv: TokenAmount) -> Result<()> {
        let mut protocol = self.protocol().await?;
        protocol.enable_lltv(lltv);
        self.ctx.put(&protocol)?;
        Ok(())
    }

    async fn market_list(&mut self) -> Result<MarketList> {
        let key = self.protocol_address.to_string();
        Ok(self
            .ctx
            .get::<MarketList>(&key)
            .await?
            .unwrap_or_else(|| MarketList::new(self.protocol_address.clone())))
    }

    async fn zero_market(&mut self, envelope: &EventEnvelope) -> Result<Market> {
        let id = MarketId::zero();
        match self.ctx.get::<Market>(&id.to_string()).await? {
            Some(market) => Ok(market),
            None => {
                let market = Market::zero_market(envelope.timestamp, envelope.block_number);
                let mut list = self.market_list().await?;
                list.add(id);
                self.ctx.put(&list)?;
                self.ctx.put(&market)?;
                Ok(market)
            }
        }
    }

    async fn open_shares(&mut self, key: &PositionKey) -> Result<Option<TokenAmount>> {
        match crate::engine::position::open_position_id(self.ctx, key).await? {
            None => Ok(None),
            Some(id) => {
                let position = self
                    .ctx
                    .get::<crate::domain::Position>(&id)
                    .await?
                    .ok_or_else(|| {
                        IndexError::consistency(format!("open position {} missing", id))
                    })?;
                Ok(Some(position.shares.unwrap_or_else(TokenAmount::zero)))
            }
        }
    }

    async fn open_balance(&mut self, key: &PositionKey) -> Result<Option<TokenAmount>> {
        match crate::engine::position::open_position_id(self.ctx, key).await? {
            None => Ok(None),
            Some(id) => {
                let position = self
                    .ctx
                    .get::<crate::domain::Position>(&id)
                    .await?
                    .ok_or_else(|| {
                        IndexError::consistency(format!("open position {} missing", id))
                    })?;
                Ok(Some(position.balance))
            }
        }
    }

    /// Run the position ledger and mirror open/close transitions into
    /// market, account and protocol counters.
    #[allow(clippy::too_many_arguments)]
    async fn apply_position(
        &mut self,
        protocol: &mut Protocol,
        market: &mut Market,
        account: &mut Account,
        key: &PositionKey,
        new_balance: TokenAmount,
        new_shares: Option<TokenAmount>,
        kind: TransactionKind,
        envelope: &EventEnvelope,
        balance_usd: Decimal,
    ) -> Result<String> {
        let update = open_or_update(
            self.ctx,
            key,
            new_balance,
            new_shares,
            kind,
            envelope,
            balance_usd,
        )
        .await?;

        if update.opened {
            account.position_count += 1;
            account.open_position_count += 1;
            market.position_count += 1;
            market.open_position_count += 1;
            protocol.position_count += 1;
            protocol.open_position_count += 1;
            side_count(market, key.side, 1);
        }
        if update.closed {
            account.open_position_count = account.open_position_count.saturating_sub(1);
            account.closed_position_count += 1;
            market.open_position_count = market.open_position_count.saturating_sub(1);
            market.closed_position_count += 1;
            protocol.open_position_count = protocol.open_position_count.saturating_sub(1);
            protocol.closed_position_count += 1;
            side_count(market, key.side, -1);
        }

        mark_daily_active(
            self.ctx,
            &key.market,
            key.side,
            envelope.timestamp.day(),
        )
        .await?;
        Ok(update.position_id)
    }

    fn track_new_user(&self, protocol: &mut Protocol, account: &Account) {
        if account.is_new_user() {
            protocol.cumulative_unique_users += 1;
        }
    }

    /// Bump a unique-participant counter the first time this (account, kind)
    /// pair is seen, via a content-keyed marker.
    async fn mark_participant(
        &mut self,
        protocol: &mut Protocol,
        account: &Address,
        kind: TransactionKind,
    ) -> Result<()> {
        let role = match kind {
            TransactionKind::Deposit | TransactionKind::DepositCollateral => "depositor",
            TransactionKind::Borrow => "borrower",
            TransactionKind::Liquidate => "liquidator",
            TransactionKind::Transfer => "transferrer",
            TransactionKind::Flashloan => "flashloaner",
            _ => return Ok(()),
        };
        let id = ActivityMarker::participant_id(account, role);
        if self.ctx.exists::<ActivityMarker>(&id).await? {
            return Ok(());
        }
        self.ctx.put(&ActivityMarker { id })?;
        match role {
            "depositor" => protocol.cumulative_unique_depositors += 1,
            "borrower" => protocol.cumulative_unique_borrowers += 1,
            "liquidator" => protocol.cumulative_unique_liquidators += 1,
            "transferrer" => protocol.cumulative_unique_transferrers += 1,
            "flashloaner" => protocol.cumulative_unique_flashloaners += 1,
            _ => {}
        }
        Ok(())
    }

    async fn mark_liquidatee(&mut self, protocol: &mut Protocol, account: &Address) -> Result<()> {
        let id = ActivityMarker::participant_id(account, "liquidatee");
        if self.ctx.exists::<ActivityMarker>(&id).await? {
            return Ok(());
        }
        self.ctx.put(&ActivityMarker { id })?;
        protocol.cumulative_unique_liquidatees += 1;
        Ok(())
    }

    fn bump_transaction(
        &self,
        market: &mut Market,
        protocol: &mut Protocol,
        kind: TransactionKind,
        amount_usd: Decimal,
    ) {
        market.transaction_count += 1;
        protocol.transaction_count += 1;
        match kind {
            TransactionKind::Deposit | TransactionKind::DepositCollateral => {
                market.deposit_count += 1;
                protocol.deposit_count += 1;
                market.cumulative_deposit_usd += amount_usd;
                protocol.cumulative_deposit_usd += amount_usd;
            }
            TransactionKind::Withdraw | TransactionKind::WithdrawCollateral => {
                market.withdraw_count += 1;
                protocol.withdraw_count += 1;
                market.cumulative_withdraw_usd += amount_usd;
            }
            TransactionKind::Borrow => {
                market.borrow_count += 1;
                protocol.borrow_count += 1;
                market.cumulative_borrow_usd += amount_usd;
                protocol.cumulative_borrow_usd += amount_usd;
            }
            TransactionKind::Repay => {
                market.repay_count += 1;
                protocol.repay_count += 1;
                market.cumulative_repay_usd += amount_usd;
            }
            TransactionKind::Liquidate => {
                market.liquidate_count += 1;
                protocol.liquidate_count += 1;
                market.cumulative_liquidate_usd += amount_usd;
                protocol.cumulative_liquidate_usd += amount_usd;
            }
            TransactionKind::Transfer => {
                market.transfer_count += 1;
                protocol.transfer_count += 1;
                market.cumulative_transfer_usd += amount_usd;
            }
            TransactionKind::Flashloan => {
                market.flashloan_count += 1;
                protocol.flashloan_count += 1;
                market.cumulative_flashloan_usd += amount_usd;
            }
        }
    }

    /// Recompute the market's USD balances from current prices, then rebuild
    /// protocol-wide TVL by summing over the full registered market list.
    ///
    /// Full recomputation instead of incremental adjustment keeps replays
    /// convergent.
    async fn recompute_balances(
        &mut self,
        market: &mut Market,
        protocol: &mut Protocol,
    ) -> Result<()> {
        market.total_deposit_balance_usd =
            self.prices.value_usd(&market.loan_token, &market.total_supply);
        market.total_borrow_balance_usd =
            self.prices.value_usd(&market.loan_token, &market.total_borrow);
        let collateral_usd = self
            .prices
            .value_usd(&market.collateral_token, &market.total_collateral);
        market.total_value_locked_usd = market.total_deposit_balance_usd + collateral_usd;

        let list = self.market_list().await?;
        let mut tvl = Decimal::zero();
        let mut deposits = Decimal::zero();
        let mut borrows = Decimal::zero();
        for id in &list.markets {
            if *id == market.id {
                tvl += market.total_value_locked_usd;
                deposits += market.total_deposit_balance_usd;
                borrows += market.total_borrow_balance_usd;
                continue;
            }
            if let Some(other) = self.ctx.get::<Market>(&id.to_string()).await? {
                tvl += other.total_value_locked_usd;
                deposits += other.total_deposit_balance_usd;
                borrows += other.total_borrow_balance_usd;
            }
        }
        protocol.total_value_locked_usd = tvl;
        protocol.total_deposit_balance_usd = deposits;
        protocol.total_borrow_balance_usd = borrows;
        Ok(())
    }

    async fn finish(
        &mut self,
        envelope: &EventEnvelope,
        mut market: Market,
        mut protocol: Protocol,
        account: Account,
    ) -> Result<()> {
        market.last_update = envelope.timestamp;
        self.recompute_balances(&mut market, &mut protocol).await?;
        self.ctx.put(&market)?;
        self.ctx.put(&protocol)?;
        self.ctx.put(&account)?;
        Ok(())
    }
}

fn counterparty(caller: &Address, on_behalf: &Address) -> Option<Address> {
    if caller == on_behalf {
        None
    } else {
        Some(caller.clone())
    }
}

fn side_count(market: &mut Market, side: PositionSide, delta: i64) {
    let slot = match side {
        PositionSide::Supplier => &mut market.supplier_count,
        PositionSide::Borrower => &mut market.borrower_count,
        PositionSide::Collateral => &mut market.collateral_holder_count,
    };
    if delta >= 0 {
        *slot += delta as u64;
    } else {
        *slot = slot.saturating_sub(delta.unsigned_abs());
    }
}

/// Subtract from an aggregate total, flooring at zero with a logged warning.
fn sub_total(
    total: &TokenAmount,
    delta: &TokenAmount,
    market: &MarketId,
    field: &str,
) -> TokenAmount {
    match total.checked_sub(delta) {
        Some(result) => result,
        None => {
            warn!(market = %market, field, total = %total, delta = %delta,
                "aggregate under-run clamped to zero");
            TokenAmount::zero()
        }
    }
}
