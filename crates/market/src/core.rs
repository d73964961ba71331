//! Stateless position math shared by the engine: opening and closing
//! positions at a price, and accruing one minute of swap fees.

use crate::status::MarketStatus;
use primitive_types::U256;
use rust_decimal::Decimal;
use rust_decimal::prelude::*;
use univ3_backtest_domain::math::liquidity_math::{
    get_amounts_for_liquidity, get_liquidity_for_amounts,
};
use univ3_backtest_domain::math::price_codec::decimal_price_to_tick;
use univ3_backtest_domain::math::tick_math::get_sqrt_ratio_at_tick;
use univ3_backtest_domain::token::pow10;
use univ3_backtest_domain::{BacktestError, Position, PositionInfo, UniV3Pool};

/// Maps a pair of quote-unit prices to a tick range.
///
/// Tick order follows price order only when the quote is token1; the
/// constructed [`PositionInfo`] normalises either way, so callers can
/// pass the prices in any order.
pub fn quote_price_pair_to_ticks(
    pool: &UniV3Pool,
    price_a: Decimal,
    price_b: Decimal,
) -> Result<PositionInfo, BacktestError> {
    let d0 = pool.token0.decimals;
    let d1 = pool.token1.decimals;
    let tick_a = decimal_price_to_tick(price_a, d0, d1, pool.is_token0_quote)?;
    let tick_b = decimal_price_to_tick(price_b, d0, d1, pool.is_token0_quote)?;
    PositionInfo::new(tick_a, tick_b)
}

/// Computes the largest position fundable within the given budgets at
/// the given price.
///
/// Returns the token0 and token1 actually consumed (human units) and
/// the resulting liquidity. Both conversions round down, so the used
/// amounts never exceed the budgets.
pub fn new_position(
    pool: &UniV3Pool,
    info: PositionInfo,
    token0_max: Decimal,
    token1_max: Decimal,
    sqrt_price_x96: U256,
) -> Result<(Decimal, Decimal, u128), BacktestError> {
    let lower = get_sqrt_ratio_at_tick(info.lower_tick)?;
    let upper = get_sqrt_ratio_at_tick(info.upper_tick)?;
    let max0 = pool.token0.to_atomic(token0_max)?;
    let max1 = pool.token1.to_atomic(token1_max)?;

    let liquidity = get_liquidity_for_amounts(sqrt_price_x96, lower, upper, max0, max1)?;
    let (used0, used1) = get_amounts_for_liquidity(sqrt_price_x96, lower, upper, liquidity)?;

    Ok((
        pool.token0.from_atomic(used0)?,
        pool.token1.from_atomic(used1)?,
        liquidity,
    ))
}

/// Token amounts (human units) released by burning `liquidity` of the
/// position at the given price.
pub fn position_amounts(
    pool: &UniV3Pool,
    info: PositionInfo,
    liquidity: u128,
    sqrt_price_x96: U256,
) -> Result<(Decimal, Decimal), BacktestError> {
    let lower = get_sqrt_ratio_at_tick(info.lower_tick)?;
    let upper = get_sqrt_ratio_at_tick(info.upper_tick)?;
    let (amount0, amount1) = get_amounts_for_liquidity(sqrt_price_x96, lower, upper, liquidity)?;
    Ok((
        pool.token0.from_atomic(amount0)?,
        pool.token1.from_atomic(amount1)?,
    ))
}

/// Amounts owed for burning `liquidity` of a position at the given
/// price; the burn itself is bookkeeping the caller does.
pub fn close_position(
    pool: &UniV3Pool,
    info: PositionInfo,
    liquidity: u128,
    sqrt_price_x96: U256,
) -> Result<(Decimal, Decimal), BacktestError> {
    position_amounts(pool, info, liquidity, sqrt_price_x96)
}

/// Accrues one minute of swap fees to a position.
///
/// A position earns on the minute's in-amounts in proportion to its
/// share of the pool liquidity, but only if it was in range at the tick
/// the previous minute closed on. With no previous tick (the first
/// snapshot ever replayed) nothing accrues.
pub fn update_fee(
    pool: &UniV3Pool,
    last_tick: Option<i32>,
    status: &MarketStatus,
    info: PositionInfo,
    position: &mut Position,
) -> Result<(), BacktestError> {
    let Some(tick) = last_tick else {
        return Ok(());
    };
    if position.liquidity == 0 || !info.contains_tick(tick) {
        return Ok(());
    }
    if status.current_liquidity <= Decimal::ZERO {
        return Ok(());
    }
    let liquidity = Decimal::from_u128(position.liquidity)
        .ok_or(BacktestError::Overflow("position liquidity"))?;
    let share = liquidity / status.current_liquidity;

    position.pending_amount0 +=
        status.in_amount0 * pool.fee_rate * share / pow10(pool.token0.decimals);
    position.pending_amount1 +=
        status.in_amount1 * pool.fee_rate * share / pow10(pool.token1.decimals);
    Ok(())
}
