//! Replay semantics: redelivered events are skipped, failed events leave no
//! marker and can be retried after the missing state arrives.

use poolgraph::domain::{ChainEvent, EventEnvelope, EventPayload};
use poolgraph::handlers::Outcome;
use poolgraph::store::{EventCtx, MemoryStore};
use poolgraph::{
    Address, Decimal, Dispatcher, MarketId, StaticPriceSource, Timestamp, TokenAmount,
};

fn protocol_address() -> Address {
    Address::parse("0xbbbbbbbbbb9cc5e90e3b3af64bdaf62c37eeffcb").unwrap()
}

fn token() -> Address {
    Address::parse("0xa0b86991c6218b36c1d19d4a2e9eb0ce3606eb48").unwrap()
}

fn alice() -> Address {
    Address::parse("0x1111111111111111111111111111111111111111").unwrap()
}

fn market_id() -> MarketId {
    MarketId::parse("0xc54d7acf14de29e0e5527cabd7a576506870346a78a11a6762e2cca66322ec41").unwrap()
}

fn event(tx_hash: &str, log_index: u64, payload: EventPayload) -> ChainEvent {
    ChainEvent {
        envelope: EventEnvelope {
            block_number: 10,
            timestamp: Timestamp::new(1_700_000_000),
            tx_hash: tx_hash.to_string(),
            tx_nonce: 1,
            log_index,
            gas_price: TokenAmount::zero(),
            gas_limit: TokenAmount::zero(),
            gas_used: TokenAmount::zero(),
        },
        payload,
    }
}

fn dispatcher() -> Dispatcher {
    let prices = StaticPriceSource::new().with_price(
        token(),
        Decimal::from_str_canonical("1").unwrap(),
        6,
    );
    Dispatcher::new(
        Box::new(MemoryStore::new()),
        Box::new(prices),
        protocol_address(),
    )
}

fn supply_event(tx_hash: &str) -> ChainEvent {
    event(
        tx_hash,
        1,
        EventPayload::Supply {
            market: market_id(),
            caller: alice(),
            on_behalf: alice(),
            assets: TokenAmount::from_u128(1_000_000),
            shares: TokenAmount::parse("1000000000000000000").unwrap(),
        },
    )
}

fn create_market_event(tx_hash: &str) -> ChainEvent {
    event(
        tx_hash,
        0,
        EventPayload::CreateMarket {
            market: market_id(),
            loan_token: token(),
            collateral_token: token(),
            oracle: Address::zero(),
            irm: Address::zero(),
            lltv: TokenAmount::parse("860000000000000000").unwrap(),
        },
    )
}

#[tokio::test]
async fn redelivered_event_is_skipped_without_writes() {
    let d = dispatcher();
    d.process(&create_market_event("0xa")).await.unwrap();
    d.process(&supply_event("0xb")).await.unwrap();

    let mut ctx = EventCtx::new(d.store());
    let once: poolgraph::domain::Market =
        ctx.get(&market_id().to_string()).await.unwrap().unwrap();

    let outcome = d.process(&supply_event("0xb")).await.unwrap();
    assert_eq!(outcome, Outcome::Replayed);

    let mut ctx = EventCtx::new(d.store());
    let twice: poolgraph::domain::Market =
        ctx.get(&market_id().to_string()).await.unwrap().unwrap();
    assert_eq!(once, twice);
    assert_eq!(twice.total_supply, TokenAmount::from_u128(1_000_000));
    assert_eq!(twice.deposit_count, 1);
}

#[tokio::test]
async fn distinct_payloads_in_one_log_slot_both_process() {
    let d = dispatcher();
    d.process(&create_market_event("0xa")).await.unwrap();

    // same (tx, log_index) but a different payload name: not a replay
    let supply = supply_event("0xc");
    let withdraw = event(
        "0xc",
        1,
        EventPayload::Withdraw {
            market: market_id(),
            caller: alice(),
            on_behalf: alice(),
            receiver: alice(),
            assets: TokenAmount::from_u128(400_000),
            shares: TokenAmount::parse("400000000000000000").unwrap(),
        },
    );
    assert!(matches!(
        d.process(&supply).await.unwrap(),
        Outcome::Processed { .. }
    ));
    assert!(matches!(
        d.process(&withdraw).await.unwrap(),
        Outcome::Processed { .. }
    ));

    let mut ctx = EventCtx::new(d.store());
    let market: poolgraph::domain::Market =
        ctx.get(&market_id().to_string()).await.unwrap().unwrap();
    assert_eq!(market.total_supply, TokenAmount::from_u128(600_000));
}

#[tokio::test]
async fn failed_event_leaves_no_marker_and_can_be_retried() {
    let d = dispatcher();

    // fails: the market does not exist yet
    let supply = supply_event("0xd");
    assert!(d.process(&supply).await.is_err());

    d.process(&create_market_event("0xa")).await.unwrap();

    // the retry is a fresh processing run, not a replay skip
    let outcome = d.process(&supply).await.unwrap();
    assert!(matches!(outcome, Outcome::Processed { .. }));

    let mut ctx = EventCtx::new(d.store());
    let market: poolgraph::domain::Market =
        ctx.get(&market_id().to_string()).await.unwrap().unwrap();
    assert_eq!(market.total_supply, TokenAmount::from_u128(1_000_000));
}

#[tokio::test]
async fn vault_events_share_the_replay_guard() {
    let d = dispatcher();
    let vault = Address::parse("0x4444444444444444444444444444444444444444").unwrap();
    let create = event(
        "0xe",
        0,
        EventPayload::CreateVault {
            vault: vault.clone(),
            owner: alice(),
            initial_timelock: 86_400,
            asset: token(),
            name: "Flagship USDC".to_string(),
            symbol: "flUSDC".to_string(),
        },
    );
    d.process(&create).await.unwrap();

    let deposit = event(
        "0xf",
        0,
        EventPayload::VaultDeposit {
            vault: vault.clone(),
            sender: alice(),
            owner: alice(),
            assets: TokenAmount::from_u128(1_000),
            shares: TokenAmount::from_u128(1_000),
        },
    );
    d.process(&deposit).await.unwrap();
    assert_eq!(d.process(&deposit).await.unwrap(), Outcome::Replayed);

    let mut ctx = EventCtx::new(d.store());
    let record: poolgraph::domain::Vault = ctx.get(vault.as_str()).await.unwrap().unwrap();
    assert_eq!(record.total_shares, TokenAmount::from_u128(1_000));
}
