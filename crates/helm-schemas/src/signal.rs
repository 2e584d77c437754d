use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::Metadata;

/// Direction of a strategy signal. `Flat` asks the loop to stand aside; only
/// `Long` / `Short` reach the risk gate.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum SignalSide {
    Long,
    Short,
    Flat,
}

impl SignalSide {
    pub fn is_directional(self) -> bool {
        matches!(self, SignalSide::Long | SignalSide::Short)
    }
}

impl std::fmt::Display for SignalSide {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SignalSide::Long => write!(f, "LONG"),
            SignalSide::Short => write!(f, "SHORT"),
            SignalSide::Flat => write!(f, "FLAT"),
        }
    }
}

/// A strategy's intent to enter (or flatten). Created by the strategy,
/// consumed by the risk gate, never mutated.
///
/// `id` is unique within a run and deterministic for a given bar, so a
/// re-emitted signal derives the same execution client tag and cannot
/// produce a duplicate order.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Signal {
    pub id: String,
    pub emitted_at: DateTime<Utc>,
    pub symbol: String,
    pub side: SignalSide,
    pub reference_price_micros: i64,
    pub stop_micros: Option<i64>,
    pub take_profit_micros: Option<i64>,
    /// Confidence in [0, 1].
    pub confidence: f64,
    pub strategy: String,
    pub metadata: Metadata,
}

impl Signal {
    /// Distance from reference price to the stop level, if a stop is set.
    /// Always non-negative.
    pub fn stop_distance_micros(&self) -> Option<i64> {
        self.stop_micros
            .map(|sl| (self.reference_price_micros - sl).abs())
    }

    /// Distance from reference price to the take-profit level, if set.
    pub fn reward_distance_micros(&self) -> Option<i64> {
        self.take_profit_micros
            .map(|tp| (tp - self.reference_price_micros).abs())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn signal(side: SignalSide, stop: Option<i64>, tp: Option<i64>) -> Signal {
        Signal {
            id: "t-1".to_string(),
            emitted_at: Utc.with_ymd_and_hms(2024, 3, 4, 12, 0, 0).unwrap(),
            symbol: "EURUSD".to_string(),
            side,
            reference_price_micros: 100_000_000,
            stop_micros: stop,
            take_profit_micros: tp,
            confidence: 0.7,
            strategy: "test".to_string(),
            metadata: Metadata::new(),
        }
    }

    #[test]
    fn directional_sides() {
        assert!(SignalSide::Long.is_directional());
        assert!(SignalSide::Short.is_directional());
        assert!(!SignalSide::Flat.is_directional());
    }

    #[test]
    fn stop_distance_is_absolute() {
        let long = signal(SignalSide::Long, Some(99_000_000), None);
        assert_eq!(long.stop_distance_micros(), Some(1_000_000));
        let short = signal(SignalSide::Short, Some(101_000_000), None);
        assert_eq!(short.stop_distance_micros(), Some(1_000_000));
    }

    #[test]
    fn reward_distance() {
        let s = signal(SignalSide::Long, Some(99_000_000), Some(102_000_000));
        assert_eq!(s.reward_distance_micros(), Some(2_000_000));
    }

    #[test]
    fn missing_levels_give_none() {
        let s = signal(SignalSide::Long, None, None);
        assert_eq!(s.stop_distance_micros(), None);
        assert_eq!(s.reward_distance_micros(), None);
    }
}
