//! Audit records appended by every mutating market operation.

use chrono::NaiveDateTime;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use univ3_backtest_domain::PositionInfo;

/// One executed market operation, with enough detail to replay or audit
/// a strategy run. Amounts are human units in (base, quote) orientation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum MarketAction {
    AddLiquidity {
        timestamp: NaiveDateTime,
        position: PositionInfo,
        base_amount_max: Decimal,
        quote_amount_max: Decimal,
        base_amount_actual: Decimal,
        quote_amount_actual: Decimal,
        liquidity: u128,
    },
    RemoveLiquidity {
        timestamp: NaiveDateTime,
        position: PositionInfo,
        liquidity: u128,
        base_amount: Decimal,
        quote_amount: Decimal,
    },
    CollectFee {
        timestamp: NaiveDateTime,
        position: PositionInfo,
        base_amount: Decimal,
        quote_amount: Decimal,
    },
    Swap {
        timestamp: NaiveDateTime,
        from_token: String,
        to_token: String,
        from_amount: Decimal,
        fee: Decimal,
        to_amount: Decimal,
        price: Decimal,
    },
    Buy {
        timestamp: NaiveDateTime,
        amount: Decimal,
        price: Decimal,
        fee: Decimal,
        base_balance_after: Decimal,
        quote_balance_after: Decimal,
    },
    Sell {
        timestamp: NaiveDateTime,
        amount: Decimal,
        price: Decimal,
        fee: Decimal,
        base_balance_after: Decimal,
        quote_balance_after: Decimal,
    },
}
