//! Gap filling and column derivation over raw minute rows.

use crate::loader::{RawMinuteRow, load_minute_files};
use chrono::{Duration, NaiveDate, NaiveDateTime};
use rust_decimal::Decimal;
use std::collections::BTreeMap;
use std::path::Path;
use tracing::debug;
use univ3_backtest_domain::math::price_codec::tick_to_decimal_price;
use univ3_backtest_domain::token::pow10;
use univ3_backtest_domain::{BacktestError, UniV3Pool};
use univ3_backtest_market::MarketStatus;

/// One fully-populated minute, ready to replay.
///
/// Tick and amount columns stay in pool-native units (ticks, atomic
/// amounts); the derived OHLC columns and volumes are human quote-unit
/// prices and human token amounts.
#[derive(Debug, Clone, PartialEq)]
pub struct PoolMinute {
    pub timestamp: NaiveDateTime,
    pub close_tick: i32,
    pub open_tick: i32,
    pub highest_tick: i32,
    pub lowest_tick: i32,
    /// Active pool liquidity, atomic.
    pub current_liquidity: Decimal,
    /// Swap volume into the pool, atomic.
    pub in_amount0: Decimal,
    pub in_amount1: Decimal,
    /// Net pool balance change, atomic; negative when the pool paid out.
    pub net_amount0: Decimal,
    pub net_amount1: Decimal,
    /// Quote-unit prices derived from the tick columns.
    pub open: Decimal,
    pub close: Decimal,
    pub high: Decimal,
    pub low: Decimal,
    /// Swap volumes in human units.
    pub volume0: Decimal,
    pub volume1: Decimal,
}

impl PoolMinute {
    /// The snapshot the market engine replays for this minute.
    #[must_use]
    pub fn to_market_status(&self) -> MarketStatus {
        MarketStatus {
            timestamp: self.timestamp,
            close_tick: self.close_tick,
            current_liquidity: self.current_liquidity,
            in_amount0: self.in_amount0,
            in_amount1: self.in_amount1,
            price: self.close,
        }
    }
}

/// Tick/liquidity columns of one grid minute before price derivation.
struct FilledMinute {
    timestamp: NaiveDateTime,
    close_tick: Option<i32>,
    open_tick: Option<i32>,
    highest_tick: Option<i32>,
    lowest_tick: Option<i32>,
    liquidity: Option<Decimal>,
    in_amount0: Decimal,
    in_amount1: Decimal,
    net_amount0: Decimal,
    net_amount1: Decimal,
}

/// Reindexes raw rows onto the complete one-minute grid covering
/// `[start_date 00:00, end_date 23:59]` and derives prices and volumes.
///
/// Missing minutes (and rows without a tick) carry the previous tick
/// and liquidity forward with zero volume; a missing leading block is
/// back-filled from the first observed values. The result has exactly
/// one row per grid minute, strictly increasing, with every column
/// populated.
pub fn prepare(
    pool: &UniV3Pool,
    rows: &[RawMinuteRow],
    start_date: NaiveDate,
    end_date: NaiveDate,
) -> Result<Vec<PoolMinute>, BacktestError> {
    if end_date < start_date {
        return Err(BacktestError::InvalidInput {
            what: "date range",
            value: format!("{start_date}..{end_date}"),
        });
    }

    let mut by_minute: BTreeMap<NaiveDateTime, &RawMinuteRow> = BTreeMap::new();
    for row in rows {
        by_minute.insert(row.parsed_timestamp()?, row);
    }

    let grid_start = start_date
        .and_hms_opt(0, 0, 0)
        .ok_or(BacktestError::DataFormat("bad start date".to_string()))?;
    let grid_end = end_date
        .and_hms_opt(23, 59, 0)
        .ok_or(BacktestError::DataFormat("bad end date".to_string()))?;

    // Forward fill.
    let mut filled = Vec::new();
    let mut last_tick: Option<i32> = None;
    let mut last_liquidity: Option<Decimal> = None;
    let mut timestamp = grid_start;
    while timestamp <= grid_end {
        let row = by_minute.get(&timestamp).copied();
        let minute = match row {
            Some(row) if row.close_tick.is_some() => {
                let close = row.close_tick;
                let liquidity = row.current_liquidity.or(last_liquidity);
                last_tick = close;
                last_liquidity = liquidity;
                FilledMinute {
                    timestamp,
                    close_tick: close,
                    open_tick: row.open_tick.or(close),
                    highest_tick: row.highest_tick.or(close),
                    lowest_tick: row.lowest_tick.or(close),
                    liquidity,
                    in_amount0: row.in_amount0.unwrap_or(Decimal::ZERO),
                    in_amount1: row.in_amount1.unwrap_or(Decimal::ZERO),
                    net_amount0: row.net_amount0.unwrap_or(Decimal::ZERO),
                    net_amount1: row.net_amount1.unwrap_or(Decimal::ZERO),
                }
            }
            _ => FilledMinute {
                timestamp,
                close_tick: last_tick,
                open_tick: last_tick,
                highest_tick: last_tick,
                lowest_tick: last_tick,
                liquidity: last_liquidity,
                in_amount0: Decimal::ZERO,
                in_amount1: Decimal::ZERO,
                net_amount0: Decimal::ZERO,
                net_amount1: Decimal::ZERO,
            },
        };
        filled.push(minute);
        timestamp += Duration::minutes(1);
    }

    // Back fill the leading block that precedes the first observation.
    let first_tick = filled
        .iter()
        .find_map(|m| m.close_tick)
        .ok_or(BacktestError::DataFormat("no usable rows in range".to_string()))?;
    let first_liquidity = filled
        .iter()
        .find_map(|m| m.liquidity)
        .unwrap_or(Decimal::ZERO);
    for minute in &mut filled {
        if minute.close_tick.is_some() {
            break;
        }
        minute.close_tick = Some(first_tick);
        minute.open_tick = Some(first_tick);
        minute.highest_tick = Some(first_tick);
        minute.lowest_tick = Some(first_tick);
    }

    let d0 = pool.token0.decimals;
    let d1 = pool.token1.decimals;
    let quote0 = pool.is_token0_quote;
    let price_at = |tick: i32| tick_to_decimal_price(tick, d0, d1, quote0);

    let mut prepared = Vec::with_capacity(filled.len());
    let mut previous_close: Option<Decimal> = None;
    for minute in filled {
        // Back fill made every tick Some; liquidity may still be absent
        // when the export never carried it.
        let close_tick = minute
            .close_tick
            .ok_or(BacktestError::DataFormat("unfilled minute".to_string()))?;
        let open_tick = minute.open_tick.unwrap_or(close_tick);
        let highest_tick = minute.highest_tick.unwrap_or(close_tick);
        let lowest_tick = minute.lowest_tick.unwrap_or(close_tick);
        let current_liquidity = minute.liquidity.unwrap_or(first_liquidity);

        let close = price_at(close_tick)?;
        let open = match minute.open_tick {
            Some(tick) => price_at(tick)?,
            None => previous_close.unwrap_or(close),
        };
        // Tick extremes swap roles in price space when the quote is
        // token0, so take max/min rather than trusting the labels.
        let price_a = price_at(highest_tick)?;
        let price_b = price_at(lowest_tick)?;
        previous_close = Some(close);

        prepared.push(PoolMinute {
            timestamp: minute.timestamp,
            close_tick,
            open_tick,
            highest_tick,
            lowest_tick,
            current_liquidity,
            in_amount0: minute.in_amount0,
            in_amount1: minute.in_amount1,
            net_amount0: minute.net_amount0,
            net_amount1: minute.net_amount1,
            open,
            close,
            high: price_a.max(price_b),
            low: price_a.min(price_b),
            volume0: minute.in_amount0 / pow10(d0),
            volume1: minute.in_amount1 / pow10(d1),
        });
    }
    debug!(rows = prepared.len(), "prepared minute grid");
    Ok(prepared)
}

/// Loads and prepares the per-day files for a date range in one call.
pub fn load_and_prepare(
    dir: &Path,
    chain: &str,
    address: &str,
    pool: &UniV3Pool,
    start_date: NaiveDate,
    end_date: NaiveDate,
) -> Result<Vec<PoolMinute>, BacktestError> {
    let rows = load_minute_files(dir, chain, address, start_date, end_date)?;
    prepare(pool, &rows, start_date, end_date)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;
    use std::fs;
    use univ3_backtest_domain::TokenInfo;

    const HEADER: &str = "timestamp,netAmount0,netAmount1,closeTick,openTick,lowestTick,highestTick,inAmount0,inAmount1,currentLiquidity";

    fn weth_usdc() -> UniV3Pool {
        UniV3Pool::new(
            TokenInfo::new("WETH", 18),
            TokenInfo::new("USDC", 6),
            dec!(0.003),
            false,
        )
        .unwrap()
    }

    fn raw(ts: &str, tick: Option<i32>, in0: &str, in1: &str, liquidity: &str) -> RawMinuteRow {
        let line = format!(
            "{HEADER}\n{ts},0,0,{t},{t},{t},{t},{in0},{in1},{liquidity}\n",
            t = tick.map(|t| t.to_string()).unwrap_or_default(),
        );
        let mut reader = csv::Reader::from_reader(line.as_bytes());
        reader.deserialize().next().unwrap().unwrap()
    }

    #[test]
    fn grid_covers_the_full_day() {
        let pool = weth_usdc();
        let day = NaiveDate::from_ymd_opt(2024, 1, 1).unwrap();
        let rows = vec![raw(
            "2024-01-01 10:00:00",
            Some(-200_312),
            "1000000000000000000",
            "2000000000",
            "5000000000000000000",
        )];
        let prepared = prepare(&pool, &rows, day, day).unwrap();
        assert_eq!(prepared.len(), 24 * 60);
        for pair in prepared.windows(2) {
            assert_eq!(pair[1].timestamp - pair[0].timestamp, Duration::minutes(1));
        }
    }

    #[test]
    fn gaps_carry_ticks_forward_with_zero_volume() {
        let pool = weth_usdc();
        let day = NaiveDate::from_ymd_opt(2024, 1, 1).unwrap();
        let rows = vec![
            raw("2024-01-01 00:00:00", Some(-200_312), "5", "7", "1000"),
            raw("2024-01-01 00:03:00", Some(-200_300), "5", "7", "1001"),
        ];
        let prepared = prepare(&pool, &rows, day, day).unwrap();

        let gap = &prepared[1];
        assert_eq!(gap.close_tick, -200_312);
        assert_eq!(gap.in_amount0, Decimal::ZERO);
        assert_eq!(gap.volume1, Decimal::ZERO);
        assert_eq!(gap.current_liquidity, dec!(1000));
        assert_eq!(gap.close, prepared[0].close);
        assert_eq!(prepared[3].close_tick, -200_300);
    }

    #[test]
    fn leading_gap_back_fills_from_first_observation() {
        let pool = weth_usdc();
        let day = NaiveDate::from_ymd_opt(2024, 1, 1).unwrap();
        let rows = vec![raw("2024-01-01 00:05:00", Some(-200_312), "5", "7", "1000")];
        let prepared = prepare(&pool, &rows, day, day).unwrap();
        assert_eq!(prepared[0].close_tick, -200_312);
        assert_eq!(prepared[0].in_amount0, Decimal::ZERO);
        assert_eq!(prepared[0].current_liquidity, dec!(1000));
    }

    #[test]
    fn no_usable_rows_is_an_error() {
        let pool = weth_usdc();
        let day = NaiveDate::from_ymd_opt(2024, 1, 1).unwrap();
        let rows = vec![raw("2024-01-01 00:00:00", None, "", "", "")];
        assert!(matches!(
            prepare(&pool, &rows, day, day),
            Err(BacktestError::DataFormat(_))
        ));
    }

    #[test]
    fn high_low_swap_roles_when_quote_is_token0() {
        let day = NaiveDate::from_ymd_opt(2024, 1, 1).unwrap();
        let line = format!(
            "{HEADER}\n2024-01-01 00:00:00,0,0,-200312,-200312,-200400,-200250,1,1,1000\n"
        );
        let mut reader = csv::Reader::from_reader(line.as_bytes());
        let rows: Vec<RawMinuteRow> = reader.deserialize().map(|r| r.unwrap()).collect();

        let quote1 = weth_usdc();
        let prepared = prepare(&quote1, &rows, day, day).unwrap();
        assert!(prepared[0].high >= prepared[0].low);
        assert!(prepared[0].low <= prepared[0].close);
        assert!(prepared[0].close <= prepared[0].high);

        let quote0 = UniV3Pool::new(
            TokenInfo::new("WETH", 18),
            TokenInfo::new("USDC", 6),
            dec!(0.003),
            true,
        )
        .unwrap();
        let prepared = prepare(&quote0, &rows, day, day).unwrap();
        assert!(prepared[0].high >= prepared[0].low);
        assert!(prepared[0].low <= prepared[0].close);
        assert!(prepared[0].close <= prepared[0].high);
    }

    #[test]
    fn volumes_convert_to_human_units() {
        let pool = weth_usdc();
        let day = NaiveDate::from_ymd_opt(2024, 1, 1).unwrap();
        let rows = vec![raw(
            "2024-01-01 00:00:00",
            Some(-200_312),
            "1500000000000000000",
            "3000000000",
            "1000",
        )];
        let prepared = prepare(&pool, &rows, day, day).unwrap();
        assert_eq!(prepared[0].volume0, dec!(1.5));
        assert_eq!(prepared[0].volume1, dec!(3000));
    }

    #[test]
    fn end_to_end_load_prepare_and_replay() {
        use std::cell::RefCell;
        use std::rc::Rc;
        use univ3_backtest_market::{AssetLedger, InMemoryBroker, UniLpMarket};

        let dir = tempfile::tempdir().unwrap();
        fs::write(
            dir.path().join("polygon-0xpool-2024-01-01.minute.csv"),
            format!(
                "{HEADER}\n\
                 2024-01-01 00:00:00,0,0,-200312,-200312,-200312,-200312,1000000000000000000,2000000000,5000000000000000000\n\
                 2024-01-01 00:02:00,0,0,-200310,-200312,-200312,-200310,1000000000000000000,2000000000,5000000000000000000\n"
            ),
        )
        .unwrap();

        let pool = weth_usdc();
        let day = NaiveDate::from_ymd_opt(2024, 1, 1).unwrap();
        let minutes =
            load_and_prepare(dir.path(), "polygon", "0xpool", &pool, day, day).unwrap();
        assert_eq!(minutes.len(), 24 * 60);

        let broker = Rc::new(RefCell::new(InMemoryBroker::new()));
        broker.borrow_mut().set_balance(pool.base_token(), dec!(10));
        broker
            .borrow_mut()
            .set_balance(pool.quote_token(), dec!(20000));
        let mut market = UniLpMarket::new(pool.clone(), broker.clone());

        market
            .set_market_status(minutes[0].to_market_status(), None)
            .unwrap();
        let (info, _, _, _) = market
            .add_liquidity(dec!(1800), dec!(2200), None, None)
            .unwrap();
        for minute in &minutes[1..10] {
            market
                .set_market_status(minute.to_market_status(), None)
                .unwrap();
        }
        assert!(market.positions()[&info].pending_amount1 > Decimal::ZERO);
        let balance = market.get_market_balance(None).unwrap();
        assert!(balance.net_value > Decimal::ZERO);
        assert!(broker.borrow().balance(pool.base_token()) < dec!(10));
    }
}
