//! Fixed-point AMM math: tick conversions, the decimal price codec, and
//! range-liquidity amount calculations.

pub mod liquidity_math;
pub mod price_codec;
pub mod tick_math;

use crate::error::BacktestError;
use primitive_types::{U256, U512};

/// Widens a `U256` into a `U512`.
#[must_use]
pub(crate) fn widen(value: U256) -> U512 {
    let mut limbs = [0u64; 8];
    limbs[..4].copy_from_slice(&value.0);
    U512(limbs)
}

/// Narrows a `U512` back into a `U256`, failing when the value does not
/// fit.
pub(crate) fn narrow(value: U512) -> Result<U256, BacktestError> {
    if value.0[4..].iter().any(|limb| *limb != 0) {
        return Err(BacktestError::Overflow("u512 to u256"));
    }
    let mut limbs = [0u64; 4];
    limbs.copy_from_slice(&value.0[..4]);
    Ok(U256(limbs))
}

/// `floor(a * b / denominator)` with a 512-bit intermediate product.
pub(crate) fn mul_div(a: U256, b: U256, denominator: U256) -> Result<U256, BacktestError> {
    if denominator.is_zero() {
        return Err(BacktestError::InvalidInput {
            what: "denominator",
            value: "0".to_string(),
        });
    }
    let product = a.full_mul(b);
    narrow(product / widen(denominator))
}

/// Floor integer square root of a 512-bit value, by Newton iteration.
#[must_use]
pub(crate) fn integer_sqrt(value: U512) -> U512 {
    if value.is_zero() {
        return U512::zero();
    }
    // Initial guess >= sqrt(value) so the sequence decreases to the floor.
    let shift = value.bits().div_ceil(2);
    let mut x = U512::one() << shift;
    loop {
        let next = (x + value / x) >> 1;
        if next >= x {
            return x;
        }
        x = next;
    }
}

/// `10^exp` as a `U512`. Supports every exponent reachable from token
/// decimal pairs plus the codec's 28 fractional digits.
pub(crate) fn pow10_u512(exp: u32) -> Result<U512, BacktestError> {
    let mut value = U512::one();
    let ten = U512::from(10u8);
    for _ in 0..exp {
        value = value
            .checked_mul(ten)
            .ok_or(BacktestError::Overflow("pow10"))?;
    }
    Ok(value)
}
