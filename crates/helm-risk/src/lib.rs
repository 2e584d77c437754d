//! helm-risk
//!
//! The risk gate: converts a raw signal plus account state into an approved,
//! sized order volume — or a typed refusal. Also owns the daily-loss
//! accounting, the circuit breaker keyed to the broker's server date, and
//! emergency-drawdown detection.
//!
//! All evaluation is pure over `(limits, state, inputs)`; state mutation is
//! confined to the accumulator, breaker, and emergency latch.

mod engine;
mod types;

pub use engine::RiskGate;
pub use types::{PositionExposure, RefusalCode, RiskLimits, RiskState, RiskVerdict};
