//! Historical pool data for backtests: per-day minute CSV loading,
//! gap filling, and derivation of price/volume columns.
//!
//! The input format is the minute-resolution pool export produced by
//! on-chain indexers: one CSV per pool per calendar day, one row per
//! minute with tick, liquidity, and swap-volume columns. Real exports
//! have holes (minutes without swaps), so preparation reindexes onto a
//! complete one-minute grid before anything downstream sees the data.

pub mod loader;
pub mod prepared;

pub use loader::{RawMinuteRow, load_minute_files};
pub use prepared::{PoolMinute, load_and_prepare, prepare};
