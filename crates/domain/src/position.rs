//! Liquidity-position key and mutable ledger record.

use crate::error::BacktestError;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Immutable key of a liquidity position: its tick range.
///
/// Two add-liquidity calls with the same range merge into one ledger
/// entry. The constructor normalises tick order, so a reversed pair is
/// accepted and corrected rather than rejected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PositionInfo {
    /// Inclusive lower tick bound.
    pub lower_tick: i32,
    /// Exclusive upper tick bound.
    pub upper_tick: i32,
}

impl PositionInfo {
    /// Creates a position key, swapping the bounds if they arrive
    /// reversed. A zero-width range is rejected.
    pub fn new(lower_tick: i32, upper_tick: i32) -> Result<Self, BacktestError> {
        if lower_tick == upper_tick {
            return Err(BacktestError::InvalidInput {
                what: "tick range",
                value: format!("[{lower_tick}, {upper_tick}]"),
            });
        }
        let (lower_tick, upper_tick) = if lower_tick < upper_tick {
            (lower_tick, upper_tick)
        } else {
            (upper_tick, lower_tick)
        };
        Ok(Self {
            lower_tick,
            upper_tick,
        })
    }

    /// True when `tick` lies inside `[lower_tick, upper_tick)`, the
    /// half-open interval Uniswap uses for liquidity membership.
    #[must_use]
    pub fn contains_tick(&self, tick: i32) -> bool {
        self.lower_tick <= tick && tick < self.upper_tick
    }
}

impl fmt::Display for PositionInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}, {}]", self.lower_tick, self.upper_tick)
    }
}

/// Mutable state of one ledger entry.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Position {
    /// Current liquidity in Uniswap's abstract unit.
    pub liquidity: u128,
    /// Uncollected token0, in human units. Accrues monotonically until
    /// collected.
    pub pending_amount0: Decimal,
    /// Uncollected token1, in human units.
    pub pending_amount1: Decimal,
    /// When true the position (its NFT) has left the simulated wallet
    /// and is excluded from balance aggregation.
    pub transferred: bool,
}

impl Position {
    /// Creates a fresh position with the given liquidity and no
    /// pending fees.
    #[must_use]
    pub fn with_liquidity(liquidity: u128) -> Self {
        Self {
            liquidity,
            ..Self::default()
        }
    }

    /// True when liquidity and both pending amounts are all zero, i.e.
    /// the entry holds nothing and may be garbage-collected.
    #[must_use]
    pub fn is_dry(&self) -> bool {
        self.liquidity == 0 && self.pending_amount0.is_zero() && self.pending_amount1.is_zero()
    }
}
