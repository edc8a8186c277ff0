//! Vault governance lifecycle: pending values under timelock, cap activation,
//! queue reconciliation, share accounting and the public allocator.

use poolgraph::domain::{
    AllocatorMarket, AllocatorVault, ChainEvent, EventEnvelope, EventPayload, FlowCapUpdate,
    PendingStatus, PendingValue, QueueKind, QueueSetRecord, Vault, VaultMarket,
};
use poolgraph::store::{EventCtx, MemoryStore};
use poolgraph::{Address, Dispatcher, MarketId, StaticPriceSource, Timestamp, TokenAmount};

fn protocol_address() -> Address {
    Address::parse("0xbbbbbbbbbb9cc5e90e3b3af64bdaf62c37eeffcb").unwrap()
}

fn vault_address() -> Address {
    Address::parse("0x4444444444444444444444444444444444444444").unwrap()
}

fn owner() -> Address {
    Address::parse("0x5555555555555555555555555555555555555555").unwrap()
}

fn asset() -> Address {
    Address::parse("0xa0b86991c6218b36c1d19d4a2e9eb0ce3606eb48").unwrap()
}

fn m1() -> MarketId {
    MarketId::parse("0x1111111111111111111111111111111111111111111111111111111111111111").unwrap()
}

fn m2() -> MarketId {
    MarketId::parse("0x2222222222222222222222222222222222222222222222222222222222222222").unwrap()
}

fn m3() -> MarketId {
    MarketId::parse("0x3333333333333333333333333333333333333333333333333333333333333333").unwrap()
}

fn event(block: u64, payload: EventPayload) -> ChainEvent {
    ChainEvent {
        envelope: EventEnvelope {
            block_number: block,
            timestamp: Timestamp::new(1_700_000_000 + block as i64 * 12),
            tx_hash: format!("0xvault{}", block),
            tx_nonce: block,
            log_index: 0,
            gas_price: TokenAmount::zero(),
            gas_limit: TokenAmount::zero(),
            gas_used: TokenAmount::zero(),
        },
        payload,
    }
}

fn dispatcher() -> Dispatcher {
    Dispatcher::new(
        Box::new(MemoryStore::new()),
        Box::new(StaticPriceSource::new()),
        protocol_address(),
    )
}

async fn create_vault(d: &Dispatcher) {
    d.process(&event(
        1,
        EventPayload::CreateVault {
            vault: vault_address(),
            owner: owner(),
            initial_timelock: 86_400,
            asset: asset(),
            name: "Flagship USDC".to_string(),
            symbol: "flUSDC".to_string(),
        },
    ))
    .await
    .unwrap();
}

async fn get_vault(d: &Dispatcher) -> Vault {
    let mut ctx = EventCtx::new(d.store());
    ctx.get(vault_address().as_str()).await.unwrap().unwrap()
}

async fn get_vault_market(d: &Dispatcher, market: &MarketId) -> VaultMarket {
    let mut ctx = EventCtx::new(d.store());
    ctx.get(&VaultMarket::vault_market_id(&vault_address(), market))
        .await
        .unwrap()
        .unwrap()
}

#[tokio::test]
async fn timelock_submit_finalize_accepts_matching_value() {
    let d = dispatcher();
    create_vault(&d).await;

    d.process(&event(
        2,
        EventPayload::SubmitTimelock {
            vault: vault_address(),
            new_timelock: 604_800,
        },
    ))
    .await
    .unwrap();

    let vault = get_vault(&d).await;
    let pending_id = vault.pending_timelock_id.clone().unwrap();
    let mut ctx = EventCtx::new(d.store());
    let pending: PendingValue = ctx.get(&pending_id).await.unwrap().unwrap();
    assert_eq!(pending.status, PendingStatus::Pending);
    // valid_at = submission + the timelock in force at submission time
    assert_eq!(
        pending.valid_at.as_secs(),
        pending.submitted_at.as_secs() + 86_400
    );

    d.process(&event(
        3,
        EventPayload::SetTimelock {
            vault: vault_address(),
            new_timelock: 604_800,
        },
    ))
    .await
    .unwrap();

    let vault = get_vault(&d).await;
    assert_eq!(vault.timelock, 604_800);
    assert!(vault.pending_timelock_id.is_none());
    let mut ctx = EventCtx::new(d.store());
    let pending: PendingValue = ctx.get(&pending_id).await.unwrap().unwrap();
    assert_eq!(pending.status, PendingStatus::Accepted);
}

#[tokio::test]
async fn second_submit_while_pending_is_fatal() {
    let d = dispatcher();
    create_vault(&d).await;
    d.process(&event(
        2,
        EventPayload::SubmitTimelock {
            vault: vault_address(),
            new_timelock: 604_800,
        },
    ))
    .await
    .unwrap();

    let result = d
        .process(&event(
            3,
            EventPayload::SubmitTimelock {
                vault: vault_address(),
                new_timelock: 172_800,
            },
        ))
        .await;
    assert!(result.is_err());

    // the first submission survives untouched
    let vault = get_vault(&d).await;
    assert!(vault.pending_timelock_id.is_some());
}

#[tokio::test]
async fn finalize_with_different_value_marks_overridden() {
    let d = dispatcher();
    create_vault(&d).await;
    d.process(&event(
        2,
        EventPayload::SubmitTimelock {
            vault: vault_address(),
            new_timelock: 604_800,
        },
    ))
    .await
    .unwrap();
    let pending_id = get_vault(&d).await.pending_timelock_id.clone().unwrap();

    d.process(&event(
        3,
        EventPayload::SetTimelock {
            vault: vault_address(),
            new_timelock: 172_800,
        },
    ))
    .await
    .unwrap();

    let vault = get_vault(&d).await;
    assert_eq!(vault.timelock, 172_800);
    let mut ctx = EventCtx::new(d.store());
    let pending: PendingValue = ctx.get(&pending_id).await.unwrap().unwrap();
    assert_eq!(pending.status, PendingStatus::Overridden);
}

#[tokio::test]
async fn guardian_set_without_pending_is_direct() {
    let d = dispatcher();
    create_vault(&d).await;

    // construction-time path: no submission preceded this
    d.process(&event(
        2,
        EventPayload::SetGuardian {
            vault: vault_address(),
            guardian: owner(),
        },
    ))
    .await
    .unwrap();

    let vault = get_vault(&d).await;
    assert_eq!(vault.guardian, Some(owner()));
}

#[tokio::test]
async fn cap_finalize_without_submission_is_fatal() {
    let d = dispatcher();
    create_vault(&d).await;

    let result = d
        .process(&event(
            2,
            EventPayload::SetCap {
                vault: vault_address(),
                market: m1(),
                cap: TokenAmount::from_u128(1_000_000),
            },
        ))
        .await;
    assert!(result.is_err());
}

#[tokio::test]
async fn cap_revocation_marks_rejected() {
    let d = dispatcher();
    create_vault(&d).await;
    d.process(&event(
        2,
        EventPayload::SubmitCap {
            vault: vault_address(),
            market: m1(),
            cap: TokenAmount::from_u128(1_000_000),
        },
    ))
    .await
    .unwrap();
    let pending_id = get_vault_market(&d, &m1())
        .await
        .pending_cap_id
        .clone()
        .unwrap();

    d.process(&event(
        3,
        EventPayload::RevokePendingCap {
            vault: vault_address(),
            market: m1(),
        },
    ))
    .await
    .unwrap();

    let vault_market = get_vault_market(&d, &m1()).await;
    assert!(vault_market.pending_cap_id.is_none());
    assert!(vault_market.cap.is_zero());
    let mut ctx = EventCtx::new(d.store());
    let pending: PendingValue = ctx.get(&pending_id).await.unwrap().unwrap();
    assert_eq!(pending.status, PendingStatus::Rejected);
}

#[tokio::test]
async fn first_positive_cap_enrolls_market_in_both_queues() {
    let d = dispatcher();
    create_vault(&d).await;
    d.process(&event(
        2,
        EventPayload::SubmitCap {
            vault: vault_address(),
            market: m1(),
            cap: TokenAmount::from_u128(1_000_000),
        },
    ))
    .await
    .unwrap();
    d.process(&event(
        3,
        EventPayload::SetCap {
            vault: vault_address(),
            market: m1(),
            cap: TokenAmount::from_u128(1_000_000),
        },
    ))
    .await
    .unwrap();

    let vault = get_vault(&d).await;
    assert_eq!(vault.supply_queue, vec![m1()]);
    assert_eq!(vault.withdraw_queue, vec![m1()]);

    let vault_market = get_vault_market(&d, &m1()).await;
    assert_eq!(vault_market.cap, TokenAmount::from_u128(1_000_000));
    assert!(vault_market.in_supply_queue);
    assert!(vault_market.in_withdraw_queue);
    assert_eq!(vault_market.withdraw_rank, 1);

    // raising the cap again does not re-enroll
    d.process(&event(
        4,
        EventPayload::SubmitCap {
            vault: vault_address(),
            market: m1(),
            cap: TokenAmount::from_u128(2_000_000),
        },
    ))
    .await
    .unwrap();
    d.process(&event(
        5,
        EventPayload::SetCap {
            vault: vault_address(),
            market: m1(),
            cap: TokenAmount::from_u128(2_000_000),
        },
    ))
    .await
    .unwrap();
    let vault = get_vault(&d).await;
    assert_eq!(vault.supply_queue.len(), 1);
    assert_eq!(vault.withdraw_queue.len(), 1);
}

#[tokio::test]
async fn queue_replacement_diffs_and_reranks() {
    let d = dispatcher();
    create_vault(&d).await;
    let set_queue = event(
        2,
        EventPayload::SetWithdrawQueue {
            vault: vault_address(),
            queue: vec![m1(), m2()],
        },
    );
    d.process(&set_queue).await.unwrap();

    let replace = event(
        3,
        EventPayload::SetWithdrawQueue {
            vault: vault_address(),
            queue: vec![m2(), m3()],
        },
    );
    d.process(&replace).await.unwrap();

    let vault = get_vault(&d).await;
    assert_eq!(vault.withdraw_queue, vec![m2(), m3()]);

    let evicted = get_vault_market(&d, &m1()).await;
    assert!(!evicted.in_withdraw_queue);
    assert!(evicted.evicted_from_withdraw);
    assert!(!evicted.evicted_from_supply);
    assert_eq!(evicted.withdraw_rank, 0);

    assert_eq!(get_vault_market(&d, &m2()).await.withdraw_rank, 1);
    assert_eq!(get_vault_market(&d, &m3()).await.withdraw_rank, 2);

    let mut ctx = EventCtx::new(d.store());
    let record: QueueSetRecord = ctx
        .get(&QueueSetRecord::record_id(
            &vault_address(),
            QueueKind::Withdraw,
            &replace.envelope.tx_hash,
            replace.envelope.log_index,
        ))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(record.previous, vec![m1(), m2()]);
    assert_eq!(record.added, vec![m3()]);
    assert_eq!(record.removed, vec![m1()]);
}

#[tokio::test]
async fn queue_evictions_are_tracked_per_queue() {
    let d = dispatcher();
    create_vault(&d).await;
    d.process(&event(
        2,
        EventPayload::SetWithdrawQueue {
            vault: vault_address(),
            queue: vec![m1()],
        },
    ))
    .await
    .unwrap();
    d.process(&event(
        3,
        EventPayload::SetWithdrawQueue {
            vault: vault_address(),
            queue: vec![],
        },
    ))
    .await
    .unwrap();
    assert!(get_vault_market(&d, &m1()).await.evicted_from_withdraw);

    // a supply-queue add must not erase the withdraw-queue eviction
    d.process(&event(
        4,
        EventPayload::SetSupplyQueue {
            vault: vault_address(),
            queue: vec![m1()],
        },
    ))
    .await
    .unwrap();

    let vault_market = get_vault_market(&d, &m1()).await;
    assert!(vault_market.in_supply_queue);
    assert!(!vault_market.evicted_from_supply);
    assert!(vault_market.evicted_from_withdraw);
    assert!(!vault_market.in_withdraw_queue);
    assert_eq!(vault_market.withdraw_rank, 0);
}

#[tokio::test]
async fn vault_share_accounting_tracks_deposits_and_withdrawals() {
    let d = dispatcher();
    create_vault(&d).await;
    d.process(&event(
        2,
        EventPayload::VaultDeposit {
            vault: vault_address(),
            sender: owner(),
            owner: owner(),
            assets: TokenAmount::from_u128(1_000_000),
            shares: TokenAmount::from_u128(1_000_000),
        },
    ))
    .await
    .unwrap();
    d.process(&event(
        3,
        EventPayload::VaultWithdraw {
            vault: vault_address(),
            sender: owner(),
            receiver: owner(),
            owner: owner(),
            assets: TokenAmount::from_u128(400_000),
            shares: TokenAmount::from_u128(400_000),
        },
    ))
    .await
    .unwrap();
    d.process(&event(
        4,
        EventPayload::UpdateLastTotalAssets {
            vault: vault_address(),
            total_assets: TokenAmount::from_u128(605_000),
        },
    ))
    .await
    .unwrap();

    let vault = get_vault(&d).await;
    assert_eq!(vault.total_shares, TokenAmount::from_u128(600_000));
    assert_eq!(vault.last_total_assets, TokenAmount::from_u128(605_000));
}

#[tokio::test]
async fn allocator_skips_unregistered_vault() {
    let d = dispatcher();
    // no vault created
    d.process(&event(
        1,
        EventPayload::AllocatorSetFee {
            vault: vault_address(),
            fee: TokenAmount::from_u128(100),
        },
    ))
    .await
    .unwrap();

    let mut ctx = EventCtx::new(d.store());
    let record: Option<AllocatorVault> = ctx.get(vault_address().as_str()).await.unwrap();
    assert!(record.is_none());
}

#[tokio::test]
async fn public_withdrawal_accrues_fee_and_consumes_outbound_cap() {
    let d = dispatcher();
    create_vault(&d).await;
    d.process(&event(
        2,
        EventPayload::AllocatorSetFee {
            vault: vault_address(),
            fee: TokenAmount::from_u128(100),
        },
    ))
    .await
    .unwrap();
    d.process(&event(
        3,
        EventPayload::SetFlowCaps {
            vault: vault_address(),
            caps: vec![FlowCapUpdate {
                market: m1(),
                max_in: TokenAmount::from_u128(500),
                max_out: TokenAmount::from_u128(1_000),
            }],
        },
    ))
    .await
    .unwrap();

    d.process(&event(
        4,
        EventPayload::PublicWithdrawal {
            vault: vault_address(),
            market: m1(),
            withdrawn: TokenAmount::from_u128(300),
        },
    ))
    .await
    .unwrap();

    let mut ctx = EventCtx::new(d.store());
    let allocator: AllocatorVault = ctx.get(vault_address().as_str()).await.unwrap().unwrap();
    assert_eq!(allocator.accrued_fee, TokenAmount::from_u128(100));
    assert_eq!(allocator.claimable_fee, TokenAmount::from_u128(100));

    let market: AllocatorMarket = ctx
        .get(&AllocatorMarket::allocator_market_id(&vault_address(), &m1()))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(market.flow_cap_out, TokenAmount::from_u128(700));
    assert_eq!(market.flow_cap_in, TokenAmount::from_u128(500));
}

#[tokio::test]
async fn public_reallocation_consumes_inbound_cap_and_fee_transfer_settles() {
    let d = dispatcher();
    create_vault(&d).await;
    d.process(&event(
        2,
        EventPayload::SetFlowCaps {
            vault: vault_address(),
            caps: vec![FlowCapUpdate {
                market: m1(),
                max_in: TokenAmount::from_u128(500),
                max_out: TokenAmount::from_u128(1_000),
            }],
        },
    ))
    .await
    .unwrap();
    d.process(&event(
        3,
        EventPayload::PublicReallocateTo {
            vault: vault_address(),
            market: m1(),
            supplied: TokenAmount::from_u128(200),
        },
    ))
    .await
    .unwrap();

    let mut ctx = EventCtx::new(d.store());
    let market: AllocatorMarket = ctx
        .get(&AllocatorMarket::allocator_market_id(&vault_address(), &m1()))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(market.flow_cap_in, TokenAmount::from_u128(300));
    assert_eq!(market.flow_cap_out, TokenAmount::from_u128(1_000));

    // settle fees: claimable drains into claimed
    d.process(&event(
        4,
        EventPayload::AllocatorSetFee {
            vault: vault_address(),
            fee: TokenAmount::from_u128(100),
        },
    ))
    .await
    .unwrap();
    d.process(&event(
        5,
        EventPayload::PublicWithdrawal {
            vault: vault_address(),
            market: m1(),
            withdrawn: TokenAmount::from_u128(50),
        },
    ))
    .await
    .unwrap();
    d.process(&event(
        6,
        EventPayload::AllocatorTransferFee {
            vault: vault_address(),
            amount: TokenAmount::from_u128(100),
            fee_recipient: owner(),
        },
    ))
    .await
    .unwrap();

    let mut ctx = EventCtx::new(d.store());
    let allocator: AllocatorVault = ctx.get(vault_address().as_str()).await.unwrap().unwrap();
    assert_eq!(allocator.claimable_fee, TokenAmount::zero());
    assert_eq!(allocator.claimed_fee, TokenAmount::from_u128(100));
    assert_eq!(allocator.accrued_fee, TokenAmount::from_u128(100));
}
