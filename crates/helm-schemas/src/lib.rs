//! helm-schemas
//!
//! Shared data model for the Helm trading loop. Every type that crosses a
//! crate boundary lives here: bars, signals, order requests and outcomes,
//! position records, and account snapshots.
//!
//! # Fixed-point convention
//!
//! All prices, lot volumes, and currency amounts are `i64` values at 1e-6
//! scale ("micros"): 1.0 == 1_000_000. `f64` appears only for signal
//! confidence and at the config boundary. Arithmetic that multiplies two
//! micros quantities must go through [`mul_micros`] (i128 intermediate).

mod market;
mod order;
mod position;
mod signal;

pub use market::{AccountSnapshot, Bar, Timeframe};
pub use order::{FillReport, OrderOutcome, OrderRequest, OrderSide, OrderType};
pub use position::{PositionOrigin, PositionRecord, PositionSide};
pub use signal::{Signal, SignalSide};

use std::collections::BTreeMap;

/// 1e-6 fixed-point scale shared by prices, volumes, and currency amounts.
pub const MICROS_SCALE: i64 = 1_000_000;

/// Opaque string-keyed metadata bag. Used only at the wire / persistence
/// boundary; internal fields are statically typed.
pub type Metadata = BTreeMap<String, String>;

/// Multiply two micros-scaled quantities, yielding a micros-scaled result.
///
/// `price × volume` and `notional × fraction` both reduce to this shape.
/// Uses an i128 intermediate; saturates instead of wrapping on the (never
/// expected) overflow of the final narrowing.
pub fn mul_micros(a: i64, b: i64) -> i64 {
    let wide = a as i128 * b as i128 / MICROS_SCALE as i128;
    if wide > i64::MAX as i128 {
        i64::MAX
    } else if wide < i64::MIN as i128 {
        i64::MIN
    } else {
        wide as i64
    }
}

/// Divide two micros-scaled quantities, yielding a micros-scaled ratio.
///
/// Returns 0 when the denominator is 0.
pub fn div_micros(num: i64, den: i64) -> i64 {
    if den == 0 {
        return 0;
    }
    let wide = num as i128 * MICROS_SCALE as i128 / den as i128;
    if wide > i64::MAX as i128 {
        i64::MAX
    } else if wide < i64::MIN as i128 {
        i64::MIN
    } else {
        wide as i64
    }
}

/// Convert a boundary `f64` (config, wire) into micros, rounding half away
/// from zero.
pub fn to_micros(v: f64) -> i64 {
    (v * MICROS_SCALE as f64).round() as i64
}

/// Convert micros back into an `f64` for display or wire output.
pub fn from_micros(m: i64) -> f64 {
    m as f64 / MICROS_SCALE as f64
}
