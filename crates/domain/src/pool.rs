//! Trading-pair identity for a Uniswap v3 pool.

use crate::error::BacktestError;
use crate::token::TokenInfo;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Immutable identity of one pool: the token pair, the fee rate, and
/// which of the two tokens is the quote unit for human-readable prices.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UniV3Pool {
    /// Token at slot 0 of the pair.
    pub token0: TokenInfo,
    /// Token at slot 1 of the pair.
    pub token1: TokenInfo,
    /// Fee rate as a fraction, e.g. 0.003 for a 0.3% pool.
    pub fee_rate: Decimal,
    /// When true, prices and net values are expressed in token0 units;
    /// otherwise in token1 units.
    pub is_token0_quote: bool,
}

impl UniV3Pool {
    /// Creates a new pool description.
    pub fn new(
        token0: TokenInfo,
        token1: TokenInfo,
        fee_rate: Decimal,
        is_token0_quote: bool,
    ) -> Result<Self, BacktestError> {
        if fee_rate.is_sign_negative() || fee_rate >= Decimal::ONE {
            return Err(BacktestError::InvalidInput {
                what: "fee_rate",
                value: fee_rate.to_string(),
            });
        }
        Ok(Self {
            token0,
            token1,
            fee_rate,
            is_token0_quote,
        })
    }

    /// The token prices are expressed in.
    #[must_use]
    pub fn quote_token(&self) -> &TokenInfo {
        if self.is_token0_quote {
            &self.token0
        } else {
            &self.token1
        }
    }

    /// The non-quote token.
    #[must_use]
    pub fn base_token(&self) -> &TokenInfo {
        if self.is_token0_quote {
            &self.token1
        } else {
            &self.token0
        }
    }

    /// Reorders a `(token0, token1)` pair of values into `(base, quote)`
    /// order. The mapping is its own inverse, so it also converts
    /// `(base, quote)` back into `(token0, token1)` order.
    #[must_use]
    pub fn convert_pair<T>(&self, any0: T, any1: T) -> (T, T) {
        if self.is_token0_quote {
            (any1, any0)
        } else {
            (any0, any1)
        }
    }

    /// True when the given token is one of the pair.
    #[must_use]
    pub fn contains(&self, token: &TokenInfo) -> bool {
        *token == self.token0 || *token == self.token1
    }
}
