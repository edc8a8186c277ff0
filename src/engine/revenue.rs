//! Ordered revenue attribution at market and protocol granularity.

use crate::domain::{Decimal, Market, Protocol, RevenueDetail};
use crate::error::Result;
use crate::store::EventCtx;

/// Which side of the protocol the revenue accrues to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RevenueSide {
    Supply,
    Protocol,
}

/// Accumulate `amount_usd` under `source`, keeping the parallel arrays sorted.
///
/// `sources` stays lexicographically ordered with `amounts_usd[i]` aligned to
/// `sources[i]`, so downstream consumers can diff breakdowns deterministically
/// across blocks. An existing source accumulates in place.
pub fn insert_in_order(detail: &mut RevenueDetail, amount_usd: Decimal, source: &str) {
    match detail.sources.binary_search_by(|s| s.as_str().cmp(source)) {
        Ok(index) => {
            detail.amounts_usd[index] += amount_usd;
        }
        Err(index) => {
            detail.sources.insert(index, source.to_string());
            detail.amounts_usd.insert(index, amount_usd);
        }
    }
}

/// Attribute one revenue delta to both the market's and the protocol's detail
/// records, and bump the matching cumulative totals on both entities.
///
/// The two details are always written together; protocol totals stay the sum
/// across markets by construction.
pub async fn attribute(
    ctx: &mut EventCtx<'_>,
    market: &mut Market,
    protocol: &mut Protocol,
    source: &str,
    amount_usd: Decimal,
    side: RevenueSide,
) -> Result<()> {
    let market_detail_id = RevenueDetail::market_id(&market.id);
    let mut market_detail = ctx
        .get::<RevenueDetail>(&market_detail_id)
        .await?
        .unwrap_or_else(|| RevenueDetail::new(market_detail_id));
    insert_in_order(&mut market_detail, amount_usd, source);
    ctx.put(&market_detail)?;

    let protocol_detail_id = RevenueDetail::protocol_id(&protocol.address);
    let mut protocol_detail = ctx
        .get::<RevenueDetail>(&protocol_detail_id)
        .await?
        .unwrap_or_else(|| RevenueDetail::new(protocol_detail_id));
    insert_in_order(&mut protocol_detail, amount_usd, source);
    ctx.put(&protocol_detail)?;

    match side {
        RevenueSide::Supply => {
            market.cumulative_supply_side_revenue_usd += amount_usd;
            protocol.cumulative_supply_side_revenue_usd += amount_usd;
        }
        RevenueSide::Protocol => {
            market.cumulative_protocol_side_revenue_usd += amount_usd;
            protocol.cumulative_protocol_side_revenue_usd += amount_usd;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{Address, MarketId, Timestamp};
    use crate::store::MemoryStore;

    fn usd(s: &str) -> Decimal {
        Decimal::from_str_canonical(s).unwrap()
    }

    #[test]
    fn test_insert_keeps_sources_sorted() {
        let mut detail = RevenueDetail::new("d".to_string());
        insert_in_order(&mut detail, usd("2"), "b");
        insert_in_order(&mut detail, usd("1"), "a");
        assert_eq!(detail.sources, vec!["a".to_string(), "b".to_string()]);
        assert_eq!(detail.amounts_usd, vec![usd("1"), usd("2")]);
    }

    #[test]
    fn test_insert_accumulates_existing_source() {
        let mut detail = RevenueDetail::new("d".to_string());
        insert_in_order(&mut detail, usd("2"), "a");
        insert_in_order(&mut detail, usd("3"), "a");
        assert_eq!(detail.sources.len(), 1);
        assert_eq!(detail.amounts_usd, vec![usd("5")]);
    }

    #[tokio::test]
    async fn test_attribute_updates_market_and_protocol_together() {
        let store = MemoryStore::new();
        let mut ctx = EventCtx::new(&store);
        let mut market = Market::zero_market(Timestamp::new(0), 0);
        let mut protocol = Protocol::new(Address::zero(), Address::zero());

        attribute(
            &mut ctx,
            &mut market,
            &mut protocol,
            "interest",
            usd("7"),
            RevenueSide::Supply,
        )
        .await
        .unwrap();

        assert_eq!(market.cumulative_supply_side_revenue_usd, usd("7"));
        assert_eq!(protocol.cumulative_supply_side_revenue_usd, usd("7"));
        assert!(market.cumulative_protocol_side_revenue_usd.is_zero());

        let market_detail: RevenueDetail = ctx
            .get(&RevenueDetail::market_id(&MarketId::zero()))
            .await
            .unwrap()
            .unwrap();
        let protocol_detail: RevenueDetail = ctx
            .get(&RevenueDetail::protocol_id(&Address::zero()))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(market_detail.amounts_usd, protocol_detail.amounts_usd);
    }
}
