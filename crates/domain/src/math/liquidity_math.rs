//! Amount/liquidity conversions for a concentrated-liquidity range,
//! matching the on-chain LiquidityAmounts library.
//!
//! All results round down, so amounts computed for a given liquidity
//! never exceed what that liquidity is worth, and liquidity computed
//! for given amounts never requires more than those amounts.

use crate::error::BacktestError;
use crate::math::{mul_div, narrow};
use primitive_types::U256;

/// 2^96, the fixed-point one of the sqrt-price encoding.
const Q96: U256 = U256([0, 0x1_0000_0000, 0, 0]);

fn sort(a: U256, b: U256) -> (U256, U256) {
    if a < b { (a, b) } else { (b, a) }
}

fn to_u128(value: U256) -> Result<u128, BacktestError> {
    if value > U256::from(u128::MAX) {
        return Err(BacktestError::Overflow("liquidity"));
    }
    Ok(value.low_u128())
}

/// Token0 owed by `liquidity` between two sqrt prices:
/// `L * (upper - lower) / (upper * lower) * 2^96`, rounded down.
pub fn get_amount0_for_liquidity(
    sqrt_ratio_a_x96: U256,
    sqrt_ratio_b_x96: U256,
    liquidity: u128,
) -> Result<U256, BacktestError> {
    let (lower, upper) = sort(sqrt_ratio_a_x96, sqrt_ratio_b_x96);
    if lower.is_zero() {
        return Err(BacktestError::InvalidInput {
            what: "sqrt_ratio",
            value: "0".to_string(),
        });
    }
    let numerator = U256::from(liquidity) << 96;
    Ok(mul_div(numerator, upper - lower, upper)? / lower)
}

/// Token1 owed by `liquidity` between two sqrt prices:
/// `L * (upper - lower) / 2^96`, rounded down.
pub fn get_amount1_for_liquidity(
    sqrt_ratio_a_x96: U256,
    sqrt_ratio_b_x96: U256,
    liquidity: u128,
) -> Result<U256, BacktestError> {
    let (lower, upper) = sort(sqrt_ratio_a_x96, sqrt_ratio_b_x96);
    mul_div(U256::from(liquidity), upper - lower, Q96)
}

/// Largest liquidity fundable with `amount0` of token0 between two
/// sqrt prices.
pub fn get_liquidity_for_amount0(
    sqrt_ratio_a_x96: U256,
    sqrt_ratio_b_x96: U256,
    amount0: U256,
) -> Result<u128, BacktestError> {
    let (lower, upper) = sort(sqrt_ratio_a_x96, sqrt_ratio_b_x96);
    if lower == upper {
        return Err(BacktestError::InvalidInput {
            what: "sqrt_ratio range",
            value: lower.to_string(),
        });
    }
    let intermediate = mul_div(upper, lower, Q96)?;
    to_u128(mul_div(amount0, intermediate, upper - lower)?)
}

/// Largest liquidity fundable with `amount1` of token1 between two
/// sqrt prices.
pub fn get_liquidity_for_amount1(
    sqrt_ratio_a_x96: U256,
    sqrt_ratio_b_x96: U256,
    amount1: U256,
) -> Result<u128, BacktestError> {
    let (lower, upper) = sort(sqrt_ratio_a_x96, sqrt_ratio_b_x96);
    if lower == upper {
        return Err(BacktestError::InvalidInput {
            what: "sqrt_ratio range",
            value: lower.to_string(),
        });
    }
    to_u128(mul_div(amount1, Q96, upper - lower)?)
}

/// Token amounts owed by `liquidity` at the current price.
///
/// Below the range the position is entirely token0, above it entirely
/// token1, inside it a mix split at the current price.
pub fn get_amounts_for_liquidity(
    sqrt_ratio_x96: U256,
    sqrt_ratio_a_x96: U256,
    sqrt_ratio_b_x96: U256,
    liquidity: u128,
) -> Result<(U256, U256), BacktestError> {
    let (lower, upper) = sort(sqrt_ratio_a_x96, sqrt_ratio_b_x96);
    if sqrt_ratio_x96 <= lower {
        Ok((
            get_amount0_for_liquidity(lower, upper, liquidity)?,
            U256::zero(),
        ))
    } else if sqrt_ratio_x96 < upper {
        Ok((
            get_amount0_for_liquidity(sqrt_ratio_x96, upper, liquidity)?,
            get_amount1_for_liquidity(lower, sqrt_ratio_x96, liquidity)?,
        ))
    } else {
        Ok((
            U256::zero(),
            get_amount1_for_liquidity(lower, upper, liquidity)?,
        ))
    }
}

/// Largest liquidity fundable with both amounts at the current price.
///
/// Inside the range this is the minimum of the two one-sided answers,
/// so neither token budget is exceeded.
pub fn get_liquidity_for_amounts(
    sqrt_ratio_x96: U256,
    sqrt_ratio_a_x96: U256,
    sqrt_ratio_b_x96: U256,
    amount0: U256,
    amount1: U256,
) -> Result<u128, BacktestError> {
    let (lower, upper) = sort(sqrt_ratio_a_x96, sqrt_ratio_b_x96);
    if sqrt_ratio_x96 <= lower {
        get_liquidity_for_amount0(lower, upper, amount0)
    } else if sqrt_ratio_x96 < upper {
        let liquidity0 = get_liquidity_for_amount0(sqrt_ratio_x96, upper, amount0)?;
        let liquidity1 = get_liquidity_for_amount1(lower, sqrt_ratio_x96, amount1)?;
        Ok(liquidity0.min(liquidity1))
    } else {
        get_liquidity_for_amount1(lower, upper, amount1)
    }
}
