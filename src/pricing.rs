//! Pluggable USD price lookup.

use std::collections::HashMap;

use crate::domain::{Address, Decimal, TokenAmount};

/// External price oracle boundary.
///
/// Must be pure and total: unknown tokens price at zero rather than failing,
/// so valuation never aborts an event.
pub trait PriceSource: Send + Sync {
    /// USD price of one whole token.
    fn price_usd(&self, token: &Address) -> Decimal;

    /// Token decimals used to scale base units to whole tokens.
    fn decimals(&self, _token: &Address) -> u32 {
        18
    }

    /// USD value of `amount` base units of `token`.
    fn value_usd(&self, token: &Address, amount: &TokenAmount) -> Decimal {
        amount.to_decimal(self.decimals(token)) * self.price_usd(token)
    }
}

/// Fixed price table, used in tests and standalone replays.
#[derive(Debug, Default, Clone)]
pub struct StaticPriceSource {
    prices: HashMap<Address, (Decimal, u32)>,
}

impl StaticPriceSource {
    pub fn new() -> Self {
        StaticPriceSource::default()
    }

    pub fn with_price(mut self, token: Address, price: Decimal, decimals: u32) -> Self {
        self.prices.insert(token, (price, decimals));
        self
    }
}

impl PriceSource for StaticPriceSource {
    fn price_usd(&self, token: &Address) -> Decimal {
        self.prices
            .get(token)
            .map(|(price, _)| *price)
            .unwrap_or_else(Decimal::zero)
    }

    fn decimals(&self, token: &Address) -> u32 {
        self.prices
            .get(token)
            .map(|(_, decimals)| *decimals)
            .unwrap_or(18)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unknown_token_prices_at_zero() {
        let source = StaticPriceSource::new();
        assert!(source.price_usd(&Address::zero()).is_zero());
    }

    #[test]
    fn test_value_usd_scales_by_decimals() {
        let token = Address::zero();
        let source = StaticPriceSource::new().with_price(
            token.clone(),
            Decimal::from_str_canonical("2").unwrap(),
            6,
        );
        let amount = TokenAmount::from_u128(1_500_000);
        assert_eq!(source.value_usd(&token, &amount).to_canonical_string(), "3");
    }
}
