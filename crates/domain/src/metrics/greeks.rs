//! Closed-form net value, delta, and gamma of a range position as
//! functions of the quote-unit price.
//!
//! Working in quote units collapses the two pool orientations into one
//! set of formulas: whichever token is the quote, a price below the
//! range means the position is entirely base token (value linear in
//! price), above the range entirely quote token (value constant), and
//! inside the range a mix with strictly negative gamma. Prices and
//! bounds must all be expressed in the same quote unit; the decimal
//! pair only enters through a constant scale factor.

use crate::error::BacktestError;
use rust_decimal::prelude::*;
use rust_decimal::{Decimal, MathematicalOps};

fn liquidity_to_decimal(liquidity: u128) -> Result<Decimal, BacktestError> {
    Decimal::from_u128(liquidity).ok_or(BacktestError::Overflow("liquidity to decimal"))
}

/// `10^(-(decimals0 + decimals1) / 2)`, the factor that turns the
/// atomic-liquidity expressions into human quote units.
fn liquidity_scale(decimals0: u8, decimals1: u8) -> Result<Decimal, BacktestError> {
    let sum = u32::from(decimals0) + u32::from(decimals1);
    if sum / 2 > 28 {
        return Err(BacktestError::Overflow("liquidity scale"));
    }
    let even_part = Decimal::new(1, sum / 2);
    if sum % 2 == 0 {
        Ok(even_part)
    } else {
        let sqrt_ten = Decimal::TEN
            .sqrt()
            .ok_or(BacktestError::Overflow("sqrt(10)"))?;
        Ok(even_part / sqrt_ten)
    }
}

fn sqrt_checked(value: Decimal, what: &'static str) -> Result<Decimal, BacktestError> {
    value.sqrt().ok_or(BacktestError::Overflow(what))
}

fn validate(
    price: Decimal,
    lower_price: Decimal,
    upper_price: Decimal,
) -> Result<(Decimal, Decimal), BacktestError> {
    if price <= Decimal::ZERO || lower_price <= Decimal::ZERO || upper_price <= Decimal::ZERO {
        return Err(BacktestError::InvalidInput {
            what: "price",
            value: format!("{price} in [{lower_price}, {upper_price}]"),
        });
    }
    let (lower, upper) = if lower_price < upper_price {
        (lower_price, upper_price)
    } else {
        (upper_price, lower_price)
    };
    if lower == upper {
        return Err(BacktestError::InvalidInput {
            what: "price range",
            value: lower.to_string(),
        });
    }
    Ok((lower, upper))
}

/// Net value of the position in quote units at the given quote-unit
/// price.
///
/// Continuous across the range boundaries: below the range the value is
/// `price * base_holdings`, above it a constant, and inside it the
/// concave mix `L * (2 sqrt(p) - sqrt(pl) - p / sqrt(pu))` scaled to
/// human units.
pub fn position_net_value(
    liquidity: u128,
    price: Decimal,
    lower_price: Decimal,
    upper_price: Decimal,
    decimals0: u8,
    decimals1: u8,
) -> Result<Decimal, BacktestError> {
    let (lower, upper) = validate(price, lower_price, upper_price)?;
    let liquidity = liquidity_to_decimal(liquidity)?;
    let scale = liquidity_scale(decimals0, decimals1)?;
    let sqrt_lower = sqrt_checked(lower, "sqrt lower price")?;
    let sqrt_upper = sqrt_checked(upper, "sqrt upper price")?;

    let value = if price <= lower {
        price * liquidity * (Decimal::ONE / sqrt_lower - Decimal::ONE / sqrt_upper)
    } else if price >= upper {
        liquidity * (sqrt_upper - sqrt_lower)
    } else {
        let sqrt_price = sqrt_checked(price, "sqrt price")?;
        liquidity * (Decimal::TWO * sqrt_price - sqrt_lower - price / sqrt_upper)
    };
    Ok(value * scale)
}

/// First and second derivatives of [`position_net_value`] with respect
/// to the quote-unit price.
///
/// Delta is the constant base holding below the range, decays to zero
/// across it, and is zero above; gamma is strictly negative inside the
/// range and zero outside.
pub fn position_delta_gamma(
    liquidity: u128,
    price: Decimal,
    lower_price: Decimal,
    upper_price: Decimal,
    decimals0: u8,
    decimals1: u8,
) -> Result<(Decimal, Decimal), BacktestError> {
    let (lower, upper) = validate(price, lower_price, upper_price)?;
    let liquidity = liquidity_to_decimal(liquidity)?;
    let scale = liquidity_scale(decimals0, decimals1)?;
    let sqrt_lower = sqrt_checked(lower, "sqrt lower price")?;
    let sqrt_upper = sqrt_checked(upper, "sqrt upper price")?;

    let (delta, gamma) = if price <= lower {
        (
            liquidity * (Decimal::ONE / sqrt_lower - Decimal::ONE / sqrt_upper),
            Decimal::ZERO,
        )
    } else if price >= upper {
        (Decimal::ZERO, Decimal::ZERO)
    } else {
        let sqrt_price = sqrt_checked(price, "sqrt price")?;
        (
            liquidity * (Decimal::ONE / sqrt_price - Decimal::ONE / sqrt_upper),
            -liquidity / (Decimal::TWO * price * sqrt_price),
        )
    };
    Ok((delta * scale, gamma * scale))
}
