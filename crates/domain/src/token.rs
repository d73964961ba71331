//! ERC20-like token identity and unit conversions.

use crate::error::BacktestError;
use primitive_types::U256;
use rust_decimal::Decimal;
use rust_decimal::prelude::*;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Identity of one pool token: a display name and the decimal exponent
/// used to scale between atomic units and human units.
///
/// Created once at pool setup and never mutated afterwards.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TokenInfo {
    /// Token symbol, e.g. "WETH".
    pub name: String,
    /// Decimal exponent, e.g. 18 for WETH, 6 for USDC.
    pub decimals: u8,
}

impl TokenInfo {
    /// Creates a new token description.
    #[must_use]
    pub fn new(name: impl Into<String>, decimals: u8) -> Self {
        Self {
            name: name.into(),
            decimals,
        }
    }

    /// Converts a human-unit amount into atomic units, truncating any
    /// fraction below one atomic unit.
    pub fn to_atomic(&self, amount: Decimal) -> Result<U256, BacktestError> {
        if amount.is_sign_negative() {
            return Err(BacktestError::InvalidInput {
                what: "amount",
                value: amount.to_string(),
            });
        }
        let scaled = amount
            .checked_mul(pow10(self.decimals))
            .ok_or(BacktestError::Overflow("to_atomic"))?;
        let raw = scaled
            .trunc()
            .to_u128()
            .ok_or(BacktestError::Overflow("to_atomic"))?;
        Ok(U256::from(raw))
    }

    /// Converts an atomic amount into human units.
    pub fn from_atomic(&self, raw: U256) -> Result<Decimal, BacktestError> {
        if raw > U256::from(u128::MAX) {
            return Err(BacktestError::Overflow("from_atomic"));
        }
        let value =
            Decimal::from_u128(raw.as_u128()).ok_or(BacktestError::Overflow("from_atomic"))?;
        Ok(value / pow10(self.decimals))
    }
}

impl fmt::Display for TokenInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name)
    }
}

/// `10^exp` as a `Decimal`. Only called with token decimal exponents,
/// which are all far below `Decimal`'s 28-digit ceiling.
#[must_use]
pub fn pow10(exp: u8) -> Decimal {
    let mut value = Decimal::ONE;
    for _ in 0..exp {
        value *= Decimal::TEN;
    }
    value
}
