//! Backtesting market engine for a single Uniswap v3 pool.
//!
//! [`UniLpMarket`] replays minute-resolution pool snapshots
//! ([`MarketStatus`]) against a simulated wallet, maintaining a ledger
//! of liquidity positions, accruing swap fees to in-range positions,
//! and executing liquidity and trade operations at the observed price.
//! Every mutating operation appends a [`MarketAction`] so a strategy
//! run can be audited after the fact.

pub mod action;
pub mod broker;
pub mod core;
pub mod engine;
pub mod status;

pub use action::MarketAction;
pub use broker::{AssetLedger, InMemoryBroker};
pub use engine::UniLpMarket;
pub use status::{MarketBalance, MarketStatus};
