//! helm-strategy
//!
//! The entry-signal capability. A strategy is anything implementing
//! [`Strategy`]: it sees the last closed bar with its indicator columns and
//! may emit at most one [`Signal`]. Exactly one strategy drives a loop;
//! strategies are built from tagged config entries, not discovered.

mod sma_crossover;
mod validate;

pub use sma_crossover::{SmaCrossover, SmaCrossoverParams};
pub use validate::{validate_signal, SignalFlaw};

use serde::{Deserialize, Serialize};

use helm_feed::{FeatureRow, IndicatorSpec};
use helm_schemas::Signal;

/// The strategy capability. Implementations hold their own state; the loop
/// calls `on_bar` once per new closed bar.
pub trait Strategy: Send {
    fn name(&self) -> &str;

    /// Indicator columns this strategy needs. The runtime unions these into
    /// the pipeline so the columns are always present.
    fn required_indicators(&self) -> Vec<IndicatorSpec>;

    fn on_bar(&mut self, row: &FeatureRow) -> Option<Signal>;
}

/// Tagged strategy configuration: `{ type: ..., params: {...} }`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "params", rename_all = "snake_case")]
pub enum StrategyConfig {
    SmaCrossover(SmaCrossoverParams),
}

impl StrategyConfig {
    pub fn build(&self, symbol: &str) -> Box<dyn Strategy> {
        match self {
            StrategyConfig::SmaCrossover(params) => {
                Box::new(SmaCrossover::new(symbol, params.clone()))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_deserialises_from_tagged_yaml_shape() {
        let json = r#"{"type": "sma_crossover", "params": {"fast": 10, "slow": 30}}"#;
        let cfg: StrategyConfig = serde_json::from_str(json).unwrap();
        let StrategyConfig::SmaCrossover(params) = cfg;
        assert_eq!(params.fast, 10);
        assert_eq!(params.slow, 30);
    }

    #[test]
    fn unknown_strategy_type_fails_deserialisation() {
        let json = r#"{"type": "martingale", "params": {}}"#;
        assert!(serde_json::from_str::<StrategyConfig>(json).is_err());
    }
}
