//! Canonical Uniswap v3 tick math over 256-bit fixed point.
//!
//! `get_sqrt_ratio_at_tick` is a bit-exact port of the on-chain
//! TickMath, so tick boundaries computed here agree with what the pool
//! contract would report. `get_tick_at_sqrt_ratio` recovers the floor
//! tick exactly by correcting a float estimate against the forward
//! conversion.

use crate::error::BacktestError;
use crate::math::narrow;
use primitive_types::U256;

/// Lowest tick with a representable sqrt price.
pub const MIN_TICK: i32 = -887272;
/// Highest tick with a representable sqrt price.
pub const MAX_TICK: i32 = 887272;

/// `get_sqrt_ratio_at_tick(MIN_TICK)`.
pub const MIN_SQRT_RATIO: U256 = U256([4_295_128_739, 0, 0, 0]);
/// `get_sqrt_ratio_at_tick(MAX_TICK)`.
pub const MAX_SQRT_RATIO: U256 = U256([
    0x5d95_1d52_6398_8d26,
    0xefd1_fc6a_5064_8849,
    0xfffd_8963,
    0,
]);

/// `sqrt(1.0001^(-2^i)) * 2^128` for `i = 1..=19`, the per-bit
/// multipliers of the TickMath ladder. Stored as `(low, high)` limbs of
/// the 128-bit constant.
const RATIO_MULTIPLIERS: [(u64, u64); 19] = [
    (0x59a4_6990_580e_213a, 0xfff9_7272_373d_4132),
    (0xef12_357c_f3c7_fdcc, 0xfff2_e50f_5f65_6932),
    (0x1c36_24ea_a094_1cd0, 0xffe5_caca_7e10_e4e6),
    (0xc9db_5883_5c92_6644, 0xffcb_9843_d60f_6159),
    (0x472e_6896_dfb2_54c0, 0xff97_3b41_fa98_c081),
    (0x43ec_78b3_26b5_2861, 0xff2e_a164_66c9_6a38),
    (0x11c4_61f1_969c_3053, 0xfe5d_ee04_6a99_a2a8),
    (0xdcff_c83b_479a_a3a4, 0xfcbe_86c7_900a_88ae),
    (0x6f2b_074c_f781_5e54, 0xf987_a725_3ac4_1317),
    (0x940c_7a39_8e4b_70f3, 0xf339_2b08_22b7_0005),
    (0x43b2_9c7f_a6e8_89d9, 0xe715_9475_a2c2_9b74),
    (0x845a_d8f7_92aa_5825, 0xd097_f3bd_fd20_22b8),
    (0x8a65_dc1f_90e0_61e5, 0xa9f7_4646_2d87_0fdf),
    (0x90bb_3df6_2baf_32f7, 0x70d8_69a1_56d2_a1b8),
    (0x8123_1505_542f_cfa6, 0x31be_135f_97d0_8fd9),
    (0xc677_de54_f3e9_9bc9, 0x09aa_508b_5b7a_84e1),
    (0x6699_c329_225e_e604, 0x005d_6af8_dedb_8119),
    (0x1ea9_2604_1bed_fe98, 0x0000_2216_e584_f5fa),
    (0x91f7_dc42_444e_8fa2, 0x0000_0000_048a_1703),
];

/// Multiplier for the lowest bit, `sqrt(1.0001^-1) * 2^128`.
const RATIO_BIT0: U256 = U256([0xaa2d_162d_1a59_4001, 0xfffc_b933_bd6f_ad37, 0, 0]);

/// `ln(sqrt(1.0001))`, the tick spacing in log space.
const LN_SQRT_RATIO: f64 = 4.999_750_016_665_417e-5;

fn mul_shift_128(ratio: U256, multiplier: U256) -> U256 {
    let product = ratio.full_mul(multiplier) >> 128;
    // ratio and multiplier are both below 2^129, so the shifted product
    // always fits.
    narrow(product).unwrap_or_else(|_| unreachable!())
}

/// Returns `sqrt(1.0001^tick) * 2^96` rounded up, exactly as the pool
/// contract computes it.
pub fn get_sqrt_ratio_at_tick(tick: i32) -> Result<U256, BacktestError> {
    if !(MIN_TICK..=MAX_TICK).contains(&tick) {
        return Err(BacktestError::TickOutOfRange(tick));
    }
    let abs_tick = tick.unsigned_abs();

    let mut ratio = if abs_tick & 0x1 != 0 {
        RATIO_BIT0
    } else {
        U256([0, 0, 1, 0]) // 1 << 128
    };
    for (i, &(low, high)) in RATIO_MULTIPLIERS.iter().enumerate() {
        if abs_tick & (1 << (i + 1)) != 0 {
            ratio = mul_shift_128(ratio, U256([low, high, 0, 0]));
        }
    }
    if tick > 0 {
        ratio = U256::MAX / ratio;
    }

    // Q128.128 -> Q64.96, rounding up so price_at(tick) never rounds
    // below the true boundary.
    let shifted = ratio >> 32;
    if ratio & U256::from(u32::MAX) == U256::zero() {
        Ok(shifted)
    } else {
        Ok(shifted + U256::one())
    }
}

/// Returns the largest tick whose sqrt ratio is `<= sqrt_price_x96`.
///
/// The float estimate is off by at most a couple of ticks; the
/// correction loops compare against the exact forward conversion, so
/// the result has true floor semantics and round-trips with
/// [`get_sqrt_ratio_at_tick`] for every valid tick.
pub fn get_tick_at_sqrt_ratio(sqrt_price_x96: U256) -> Result<i32, BacktestError> {
    if sqrt_price_x96 < MIN_SQRT_RATIO || sqrt_price_x96 > MAX_SQRT_RATIO {
        return Err(BacktestError::SqrtPriceOutOfRange(sqrt_price_x96.to_string()));
    }

    let ratio = u256_to_f64(sqrt_price_x96) / 2f64.powi(96);
    let mut tick = (ratio.ln() / LN_SQRT_RATIO).floor() as i32;
    tick = tick.clamp(MIN_TICK, MAX_TICK);

    while tick > MIN_TICK && get_sqrt_ratio_at_tick(tick)? > sqrt_price_x96 {
        tick -= 1;
    }
    while tick < MAX_TICK && get_sqrt_ratio_at_tick(tick + 1)? <= sqrt_price_x96 {
        tick += 1;
    }
    Ok(tick)
}

/// Lossy conversion used only to seed the tick estimate.
fn u256_to_f64(value: U256) -> f64 {
    value
        .0
        .iter()
        .rev()
        .fold(0f64, |acc, &limb| acc * 2f64.powi(64) + limb as f64)
}
