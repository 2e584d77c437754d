use serde::{Deserialize, Serialize};
use tracing::debug;

use helm_feed::{FeatureRow, IndicatorSpec};
use helm_schemas::{to_micros, Metadata, Signal, SignalSide};

use crate::{validate_signal, Strategy};

fn default_fast() -> usize {
    20
}
fn default_slow() -> usize {
    50
}
fn default_atr_period() -> usize {
    14
}
fn default_atr_multiplier() -> f64 {
    2.0
}
fn default_risk_reward() -> f64 {
    2.0
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SmaCrossoverParams {
    #[serde(default = "default_fast")]
    pub fast: usize,
    #[serde(default = "default_slow")]
    pub slow: usize,
    #[serde(default = "default_atr_period")]
    pub atr_period: usize,
    /// Stop distance = ATR × this.
    #[serde(default = "default_atr_multiplier")]
    pub atr_multiplier: f64,
    /// Take-profit distance = stop distance × this.
    #[serde(default = "default_risk_reward")]
    pub risk_reward: f64,
}

impl Default for SmaCrossoverParams {
    fn default() -> Self {
        Self {
            fast: default_fast(),
            slow: default_slow(),
            atr_period: default_atr_period(),
            atr_multiplier: default_atr_multiplier(),
            risk_reward: default_risk_reward(),
        }
    }
}

/// Moving-average crossover. Long when the fast average crosses above the
/// slow one, short on the opposite cross. Stop from ATR, take-profit from
/// the configured reward ratio.
pub struct SmaCrossover {
    symbol: String,
    params: SmaCrossoverParams,
    prev: Option<(f64, f64)>,
}

impl SmaCrossover {
    pub const NAME: &'static str = "sma_crossover";

    pub fn new(symbol: impl Into<String>, params: SmaCrossoverParams) -> Self {
        Self {
            symbol: symbol.into(),
            params,
            prev: None,
        }
    }

    fn build_signal(&self, row: &FeatureRow, side: SignalSide, atr: f64) -> Signal {
        let price = row.bar.close_micros;
        let stop_distance = to_micros(atr * self.params.atr_multiplier);
        let reward_distance = to_micros(atr * self.params.atr_multiplier * self.params.risk_reward);
        let (stop, take_profit) = match side {
            SignalSide::Long => (price - stop_distance, price + reward_distance),
            SignalSide::Short => (price + stop_distance, price - reward_distance),
            SignalSide::Flat => (price, price),
        };
        let mut metadata = Metadata::new();
        metadata.insert("atr".to_string(), format!("{atr:.6}"));
        metadata.insert("fast".to_string(), self.params.fast.to_string());
        metadata.insert("slow".to_string(), self.params.slow.to_string());
        Signal {
            // Derived from the bar open time, so re-emitting for the same bar
            // reuses the same id (and therefore the same execution tag).
            id: format!("{}:{}", Self::NAME, row.bar.open_time.timestamp()),
            emitted_at: row.bar.open_time,
            symbol: self.symbol.clone(),
            side,
            reference_price_micros: price,
            stop_micros: Some(stop),
            take_profit_micros: Some(take_profit),
            confidence: 0.7,
            strategy: Self::NAME.to_string(),
            metadata,
        }
    }
}

impl Strategy for SmaCrossover {
    fn name(&self) -> &str {
        Self::NAME
    }

    fn required_indicators(&self) -> Vec<IndicatorSpec> {
        vec![
            IndicatorSpec::Sma {
                period: self.params.fast,
            },
            IndicatorSpec::Sma {
                period: self.params.slow,
            },
            IndicatorSpec::Atr {
                period: self.params.atr_period,
            },
        ]
    }

    fn on_bar(&mut self, row: &FeatureRow) -> Option<Signal> {
        let fast_col = format!("sma_{}", self.params.fast);
        let slow_col = format!("sma_{}", self.params.slow);
        let atr_col = format!("atr_{}", self.params.atr_period);

        let fast = row.feature(&fast_col)?;
        let slow = row.feature(&slow_col)?;
        let atr = row.feature(&atr_col)?;

        let prev = self.prev.replace((fast, slow));
        let (prev_fast, prev_slow) = prev?;

        let side = if prev_fast <= prev_slow && fast > slow {
            SignalSide::Long
        } else if prev_fast >= prev_slow && fast < slow {
            SignalSide::Short
        } else {
            return None;
        };
        debug!(side = %side, fast, slow, "moving-average cross detected");

        let signal = self.build_signal(row, side, atr);
        match validate_signal(&signal) {
            Ok(()) => Some(signal),
            Err(flaw) => {
                tracing::error!(error = %flaw, "discarding structurally invalid signal");
                None
            }
        }
    }
}
