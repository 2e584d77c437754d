//! helm-testkit
//!
//! Deterministic fixtures for scenario tests: a scripted [`MockBroker`] that
//! implements the full session capability, and bar-series builders. No
//! randomness, no wall-clock — every scenario drives time and prices
//! explicitly.

mod bars;
mod mock_broker;

pub use bars::{bars_from_closes, base_time};
pub use mock_broker::MockBroker;
