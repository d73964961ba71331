//! Domain model and closed-form math for a Uniswap v3 backtesting core.
//!
//! This crate owns the pool/token/position data model, the fixed-point
//! tick and sqrt-price math, the decimal price codec, and the risk
//! analytics (net value, delta, gamma) for concentrated-liquidity
//! positions. It has no I/O and no mutable global state; everything is
//! pure functions over explicit values.

pub mod error;
pub mod math;
pub mod metrics;
pub mod pool;
pub mod position;
pub mod token;

pub use error::BacktestError;
pub use pool::UniV3Pool;
pub use position::{Position, PositionInfo};
pub use token::TokenInfo;
