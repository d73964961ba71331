//! Conversions between sqrt-price X96, ticks, and human-readable
//! decimal prices.
//!
//! All value-path arithmetic is integer or `Decimal`; binary floating
//! point only ever seeds a tick estimate that is corrected exactly, so
//! repeated conversions over thousands of minutes do not accumulate
//! rounding error.
//!
//! A "decimal price" is always expressed in the pool's quote token:
//! when `quote_is_token0` the raw token1/token0 pool price is inverted
//! on the way out and on the way in.

use crate::error::BacktestError;
use crate::math::tick_math::{self, MAX_SQRT_RATIO, MAX_TICK, MIN_TICK};
use crate::math::{integer_sqrt, narrow, pow10_u512, widen};
use primitive_types::{U256, U512};
use rust_decimal::Decimal;
use rust_decimal::prelude::*;

/// Fractional digits carried through the codec; `Decimal`'s ceiling.
const MAX_SCALE: u32 = 28;

/// Converts a Q64.96 sqrt price into a decimal price in quote-token
/// units.
///
/// Computes `(s / 2^96)^2 * 10^(decimals0 - decimals1)` with 512-bit
/// integer arithmetic, keeping as many of the 28 available fractional
/// digits as the integer part leaves room for, then inverts when the
/// quote is token0.
pub fn sqrt_price_x96_to_decimal_price(
    sqrt_price_x96: U256,
    decimals0: u8,
    decimals1: u8,
    quote_is_token0: bool,
) -> Result<Decimal, BacktestError> {
    if sqrt_price_x96.is_zero() {
        return Err(BacktestError::InvalidInput {
            what: "sqrt_price_x96",
            value: "0".to_string(),
        });
    }
    if sqrt_price_x96 > MAX_SQRT_RATIO {
        return Err(BacktestError::SqrtPriceOutOfRange(sqrt_price_x96.to_string()));
    }

    let squared = sqrt_price_x96.full_mul(sqrt_price_x96);
    let exponent = i32::from(decimals0) - i32::from(decimals1);
    let (numerator, denominator) = if exponent >= 0 {
        let scale = pow10_u512(exponent as u32)?;
        (
            squared
                .checked_mul(scale)
                .ok_or(BacktestError::Overflow("price numerator"))?,
            U512::one() << 192,
        )
    } else {
        let scale = pow10_u512(exponent.unsigned_abs())?;
        (
            squared,
            (U512::one() << 192)
                .checked_mul(scale)
                .ok_or(BacktestError::Overflow("price denominator"))?,
        )
    };

    let pool_price = ratio_to_decimal(numerator, denominator)?;
    let price = if quote_is_token0 {
        if pool_price.is_zero() {
            return Err(BacktestError::Overflow("price inversion"));
        }
        Decimal::ONE / pool_price
    } else {
        pool_price
    };
    if price <= Decimal::ZERO {
        return Err(BacktestError::Overflow("price underflow"));
    }
    Ok(price)
}

/// Converts a decimal quote-token price back into a Q64.96 sqrt price.
///
/// The inverse of [`sqrt_price_x96_to_decimal_price`]: invert first
/// when the quote is token0, rescale by token decimals, then take the
/// integer square root of the 2^192-scaled value.
pub fn decimal_price_to_sqrt_price_x96(
    price: Decimal,
    decimals0: u8,
    decimals1: u8,
    quote_is_token0: bool,
) -> Result<U256, BacktestError> {
    if price <= Decimal::ZERO {
        return Err(BacktestError::InvalidInput {
            what: "price",
            value: price.to_string(),
        });
    }
    let pool_price = if quote_is_token0 {
        Decimal::ONE / price
    } else {
        price
    };

    let mantissa = pool_price.mantissa().unsigned_abs();
    let mantissa = U512::from(mantissa) << 192;
    // Fold the token-decimal rescale and the Decimal scale into one
    // power-of-ten exponent.
    let exponent =
        i32::from(decimals1) - i32::from(decimals0) - pool_price.scale() as i32;
    let scaled = if exponent >= 0 {
        mantissa
            .checked_mul(pow10_u512(exponent as u32)?)
            .ok_or(BacktestError::Overflow("sqrt price numerator"))?
    } else {
        mantissa / pow10_u512(exponent.unsigned_abs())?
    };

    let root = narrow(integer_sqrt(scaled))?;
    if root.is_zero() {
        return Err(BacktestError::InvalidInput {
            what: "price",
            value: price.to_string(),
        });
    }
    Ok(root)
}

/// Floor tick for a Q64.96 sqrt price. See
/// [`tick_math::get_tick_at_sqrt_ratio`].
pub fn sqrt_price_x96_to_tick(sqrt_price_x96: U256) -> Result<i32, BacktestError> {
    tick_math::get_tick_at_sqrt_ratio(sqrt_price_x96)
}

/// Decimal quote-token price at a tick boundary.
pub fn tick_to_decimal_price(
    tick: i32,
    decimals0: u8,
    decimals1: u8,
    quote_is_token0: bool,
) -> Result<Decimal, BacktestError> {
    let ratio = tick_math::get_sqrt_ratio_at_tick(tick)?;
    sqrt_price_x96_to_decimal_price(ratio, decimals0, decimals1, quote_is_token0)
}

/// The tick whose price interval contains `price`.
///
/// When the quote is token1 prices increase with the tick and this is
/// the largest tick with `price_at(tick) <= price`; when the quote is
/// token0 the curve is decreasing and the comparisons mirror. Both
/// sides of the comparison go through [`tick_to_decimal_price`], so
/// truncation is consistent and the round trip from a tick boundary is
/// exact.
pub fn decimal_price_to_tick(
    price: Decimal,
    decimals0: u8,
    decimals1: u8,
    quote_is_token0: bool,
) -> Result<i32, BacktestError> {
    if price <= Decimal::ZERO {
        return Err(BacktestError::InvalidInput {
            what: "price",
            value: price.to_string(),
        });
    }

    let price_f = price
        .to_f64()
        .ok_or(BacktestError::Overflow("price to f64"))?;
    let pool_price_f = if quote_is_token0 { 1.0 / price_f } else { price_f };
    let raw_f = pool_price_f * 10f64.powi(i32::from(decimals1) - i32::from(decimals0));
    let mut tick = (raw_f.ln() / 1.0001f64.ln()).floor() as i32;
    tick = tick.clamp(MIN_TICK, MAX_TICK);

    let price_at = |t: i32| tick_to_decimal_price(t, decimals0, decimals1, quote_is_token0);
    if quote_is_token0 {
        while tick > MIN_TICK && price_at(tick)? < price {
            tick -= 1;
        }
        while tick < MAX_TICK && price_at(tick + 1)? >= price {
            tick += 1;
        }
    } else {
        while tick > MIN_TICK && price_at(tick)? > price {
            tick -= 1;
        }
        while tick < MAX_TICK && price_at(tick + 1)? <= price {
            tick += 1;
        }
    }
    Ok(tick)
}

/// Renders `numerator / denominator` as a `Decimal`, filling whatever
/// fractional digits the integer part leaves available.
fn ratio_to_decimal(numerator: U512, denominator: U512) -> Result<Decimal, BacktestError> {
    let int_part = numerator / denominator;
    let remainder = numerator % denominator;

    if int_part > widen(U256::from(u128::MAX)) {
        return Err(BacktestError::Overflow("price integer part"));
    }
    let int_u128 = int_part.low_u128();
    let int_digits = if int_u128 == 0 {
        0
    } else {
        int_u128.to_string().len() as u32
    };
    let scale = MAX_SCALE.saturating_sub(int_digits);

    let frac = remainder
        .checked_mul(pow10_u512(scale)?)
        .ok_or(BacktestError::Overflow("price fraction"))?
        / denominator;
    // frac < 10^scale <= 10^28, so it fits comfortably in u128.
    let mantissa = int_u128
        .checked_mul(10u128.pow(scale))
        .and_then(|v| v.checked_add(frac.low_u128()))
        .ok_or(BacktestError::Overflow("price mantissa"))?;

    Decimal::try_from_i128_with_scale(mantissa as i128, scale)
        .map_err(|_| BacktestError::Overflow("price mantissa"))
}
