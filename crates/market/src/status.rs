//! Per-minute pool snapshot and aggregated wallet valuation.

use chrono::NaiveDateTime;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// One minute of observed pool state, the unit the market replays.
///
/// `in_amount0`/`in_amount1` are the swap volumes that entered the pool
/// during the minute, in atomic units; fee accrual multiplies them by
/// the pool fee rate and each position's share of `current_liquidity`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MarketStatus {
    /// Minute timestamp of the snapshot.
    pub timestamp: NaiveDateTime,
    /// Pool tick at minute close.
    pub close_tick: i32,
    /// Active pool liquidity during the minute. The market adds its own
    /// positions' liquidity on top before accruing fees.
    pub current_liquidity: Decimal,
    /// Token0 swapped into the pool during the minute, atomic units.
    pub in_amount0: Decimal,
    /// Token1 swapped into the pool during the minute, atomic units.
    pub in_amount1: Decimal,
    /// Close price in quote-token units.
    pub price: Decimal,
}

/// Valuation of everything the market holds in positions, in
/// quote-token units. Wallet balances belong to the broker and are
/// valued there.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MarketBalance {
    /// Non-transferred position holdings plus uncollected fees, all
    /// priced in the quote token.
    pub net_value: Decimal,
    /// Uncollected base-token fees across open positions.
    pub base_uncollected: Decimal,
    /// Uncollected quote-token fees across open positions.
    pub quote_uncollected: Decimal,
    /// Base token currently locked in open positions.
    pub base_in_position: Decimal,
    /// Quote token currently locked in open positions.
    pub quote_in_position: Decimal,
    /// Number of open positions, transferred ones excluded.
    pub position_count: usize,
}
