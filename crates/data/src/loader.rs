//! Per-day minute CSV files, read in date order.

use chrono::{NaiveDate, NaiveDateTime};
use rust_decimal::Decimal;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use tracing::debug;
use univ3_backtest_domain::BacktestError;

/// One CSV row as exported by the indexer. Minutes without swaps leave
/// most columns empty, hence the options.
#[derive(Debug, Clone, Deserialize)]
pub struct RawMinuteRow {
    /// `YYYY-MM-DD HH:MM:SS` minute timestamp.
    pub timestamp: String,
    #[serde(rename = "netAmount0")]
    pub net_amount0: Option<Decimal>,
    #[serde(rename = "netAmount1")]
    pub net_amount1: Option<Decimal>,
    #[serde(rename = "closeTick")]
    pub close_tick: Option<i32>,
    #[serde(rename = "openTick")]
    pub open_tick: Option<i32>,
    #[serde(rename = "lowestTick")]
    pub lowest_tick: Option<i32>,
    #[serde(rename = "highestTick")]
    pub highest_tick: Option<i32>,
    #[serde(rename = "inAmount0")]
    pub in_amount0: Option<Decimal>,
    #[serde(rename = "inAmount1")]
    pub in_amount1: Option<Decimal>,
    #[serde(rename = "currentLiquidity")]
    pub current_liquidity: Option<Decimal>,
    /// Close price column some exports carry; ignored when absent
    /// since prices are rederived from ticks anyway.
    #[serde(default)]
    pub price: Option<Decimal>,
}

impl RawMinuteRow {
    /// Parses the timestamp column.
    pub fn parsed_timestamp(&self) -> Result<NaiveDateTime, BacktestError> {
        NaiveDateTime::parse_from_str(&self.timestamp, "%Y-%m-%d %H:%M:%S")
            .map_err(|_| BacktestError::DataFormat(format!("bad timestamp {:?}", self.timestamp)))
    }
}

/// Path of one day's export: `{chain}-{address}-{date}.minute.csv`,
/// with the legacy `.csv` suffix as fallback.
fn day_file(dir: &Path, chain: &str, address: &str, date: NaiveDate) -> PathBuf {
    let minute = dir.join(format!("{chain}-{address}-{date}.minute.csv"));
    if minute.exists() {
        minute
    } else {
        dir.join(format!("{chain}-{address}-{date}.csv"))
    }
}

/// Reads the per-day minute files for `[start_date, end_date]`,
/// concatenated in date order.
///
/// A missing or unreadable day is an error naming the path; malformed
/// rows are errors as well. The rows come back as exported, holes and
/// all; see [`crate::prepare`] for the gap-filled version.
pub fn load_minute_files(
    dir: &Path,
    chain: &str,
    address: &str,
    start_date: NaiveDate,
    end_date: NaiveDate,
) -> Result<Vec<RawMinuteRow>, BacktestError> {
    if end_date < start_date {
        return Err(BacktestError::InvalidInput {
            what: "date range",
            value: format!("{start_date}..{end_date}"),
        });
    }

    let mut rows = Vec::new();
    let mut date = start_date;
    while date <= end_date {
        let path = day_file(dir, chain, address, date);
        let mut reader = csv::Reader::from_path(&path).map_err(|e| match e.into_kind() {
            csv::ErrorKind::Io(source) => BacktestError::DataFile {
                path: path.display().to_string(),
                source,
            },
            other => BacktestError::DataFormat(format!("{}: {other:?}", path.display())),
        })?;
        let mut day_rows = 0usize;
        for record in reader.deserialize::<RawMinuteRow>() {
            let row = record.map_err(|e| {
                BacktestError::DataFormat(format!("{}: {e}", path.display()))
            })?;
            rows.push(row);
            day_rows += 1;
        }
        debug!(path = %path.display(), rows = day_rows, "loaded minute file");
        date = date.succ_opt().ok_or(BacktestError::InvalidInput {
            what: "end_date",
            value: end_date.to_string(),
        })?;
    }
    Ok(rows)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    const HEADER: &str = "timestamp,netAmount0,netAmount1,closeTick,openTick,lowestTick,highestTick,inAmount0,inAmount1,currentLiquidity";

    #[test]
    fn loads_days_in_order_with_legacy_fallback() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(
            dir.path().join("polygon-0xpool-2024-01-01.minute.csv"),
            format!(
                "{HEADER}\n2024-01-01 00:00:00,100,-200,1000,999,998,1001,100,200,5000000\n"
            ),
        )
        .unwrap();
        fs::write(
            dir.path().join("polygon-0xpool-2024-01-02.csv"),
            format!(
                "{HEADER}\n2024-01-02 00:00:00,50,-90,1002,1000,1000,1003,50,90,5000001\n"
            ),
        )
        .unwrap();

        let start = NaiveDate::from_ymd_opt(2024, 1, 1).unwrap();
        let end = NaiveDate::from_ymd_opt(2024, 1, 2).unwrap();
        let rows = load_minute_files(dir.path(), "polygon", "0xpool", start, end).unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].close_tick, Some(1000));
        assert_eq!(rows[1].close_tick, Some(1002));
        assert!(rows[0].parsed_timestamp().unwrap() < rows[1].parsed_timestamp().unwrap());
    }

    #[test]
    fn missing_day_is_an_error_naming_the_path() {
        let dir = tempfile::tempdir().unwrap();
        let start = NaiveDate::from_ymd_opt(2024, 1, 1).unwrap();
        let result = load_minute_files(dir.path(), "polygon", "0xpool", start, start);
        match result {
            Err(BacktestError::DataFile { path, .. }) => {
                assert!(path.contains("polygon-0xpool-2024-01-01"));
            }
            other => panic!("expected DataFile error, got {other:?}"),
        }
    }

    #[test]
    fn empty_columns_deserialize_as_none() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(
            dir.path().join("polygon-0xpool-2024-01-01.minute.csv"),
            format!("{HEADER}\n2024-01-01 00:03:00,,,,,,,,,\n"),
        )
        .unwrap();
        let start = NaiveDate::from_ymd_opt(2024, 1, 1).unwrap();
        let rows = load_minute_files(dir.path(), "polygon", "0xpool", start, start).unwrap();
        assert_eq!(rows.len(), 1);
        assert!(rows[0].close_tick.is_none());
        assert!(rows[0].in_amount0.is_none());
    }

    #[test]
    fn reversed_date_range_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let start = NaiveDate::from_ymd_opt(2024, 1, 2).unwrap();
        let end = NaiveDate::from_ymd_opt(2024, 1, 1).unwrap();
        assert!(load_minute_files(dir.path(), "polygon", "0xpool", start, end).is_err());
    }

    #[test]
    fn malformed_row_is_a_format_error() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(
            dir.path().join("polygon-0xpool-2024-01-01.minute.csv"),
            format!("{HEADER}\n2024-01-01 00:00:00,abc,,,,,,,,\n"),
        )
        .unwrap();
        let start = NaiveDate::from_ymd_opt(2024, 1, 1).unwrap();
        let result = load_minute_files(dir.path(), "polygon", "0xpool", start, start);
        assert!(matches!(result, Err(BacktestError::DataFormat(_))));
    }
}
