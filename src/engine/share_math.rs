//! Share to asset conversion with a virtual-liquidity offset.
//!
//! Both conversions add a fixed virtual offset to the pool totals on every
//! call, never only on the first deposit: `VIRTUAL_SHARES` of 1e18 prevents
//! division by zero on an empty pool and makes first-depositor share-price
//! manipulation unprofitable. Rounding direction is fixed by the triggering
//! operation, not chosen by the caller: computations that reduce what the
//! protocol owes round down, debt computations round up.

use num_bigint::BigUint;
use num_traits::{One, Zero};

use crate::domain::TokenAmount;

/// Virtual shares added to the denominator on every conversion: 1e18.
pub fn virtual_shares() -> BigUint {
    BigUint::from(10u32).pow(18)
}

/// Virtual assets added to the numerator on every conversion.
pub fn virtual_assets() -> BigUint {
    BigUint::zero()
}

fn mul_div_down(x: &BigUint, y: &BigUint, d: &BigUint) -> BigUint {
    (x * y) / d
}

fn mul_div_up(x: &BigUint, y: &BigUint, d: &BigUint) -> BigUint {
    (x * y + (d - BigUint::one())) / d
}

/// Assets owed for `shares`, rounded in the protocol's favor (floor).
pub fn to_assets_down(
    shares: &TokenAmount,
    total_shares: &TokenAmount,
    total_assets: &TokenAmount,
) -> TokenAmount {
    let numerator = total_assets.inner() + virtual_assets();
    let denominator = total_shares.inner() + virtual_shares();
    TokenAmount::new(mul_div_down(shares.inner(), &numerator, &denominator))
}

/// Assets owed for `shares`, rounded against the holder (ceiling).
pub fn to_assets_up(
    shares: &TokenAmount,
    total_shares: &TokenAmount,
    total_assets: &TokenAmount,
) -> TokenAmount {
    let numerator = total_assets.inner() + virtual_assets();
    let denominator = total_shares.inner() + virtual_shares();
    TokenAmount::new(mul_div_up(shares.inner(), &numerator, &denominator))
}
