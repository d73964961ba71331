//! Risk analytics over liquidity positions.

pub mod greeks;

pub use greeks::{position_delta_gamma, position_net_value};
