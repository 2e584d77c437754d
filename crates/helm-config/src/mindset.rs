use serde::{Deserialize, Serialize};

use helm_exit::{
    AdverseMovementParams, ExitRuleEntry, ExitRuleKind, ProfitLevel, ProfitTargetParams,
    TimeBasedParams, TrailingStopParams,
};

/// A named risk temperament. Expands to default risk limits and a default
/// exit-rule set; any explicitly configured field wins over the preset.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Mindset {
    Aggressive,
    Balanced,
    Conservative,
}

/// Risk defaults contributed by a mindset, in config-boundary units
/// (lots / account currency / fractions).
#[derive(Clone, Debug, PartialEq)]
pub struct RiskPreset {
    pub max_volume_per_order: f64,
    pub default_volume: f64,
    pub max_daily_loss: f64,
    pub max_positions_per_symbol: usize,
    pub max_total_positions: usize,
    pub position_size_pct: f64,
    pub emergency_drawdown_pct: f64,
    pub circuit_breaker_enabled: bool,
    pub min_risk_reward: f64,
}

impl Mindset {
    pub fn risk_preset(self) -> RiskPreset {
        match self {
            Mindset::Conservative => RiskPreset {
                max_volume_per_order: 0.5,
                default_volume: 0.01,
                max_daily_loss: 200.0,
                max_positions_per_symbol: 1,
                max_total_positions: 2,
                position_size_pct: 0.01,
                emergency_drawdown_pct: 0.10,
                circuit_breaker_enabled: true,
                min_risk_reward: 1.5,
            },
            Mindset::Balanced => RiskPreset {
                max_volume_per_order: 1.0,
                default_volume: 0.02,
                max_daily_loss: 500.0,
                max_positions_per_symbol: 1,
                max_total_positions: 3,
                position_size_pct: 0.02,
                emergency_drawdown_pct: 0.15,
                circuit_breaker_enabled: true,
                min_risk_reward: 1.0,
            },
            Mindset::Aggressive => RiskPreset {
                max_volume_per_order: 2.0,
                default_volume: 0.05,
                max_daily_loss: 1_000.0,
                max_positions_per_symbol: 2,
                max_total_positions: 5,
                position_size_pct: 0.05,
                emergency_drawdown_pct: 0.25,
                circuit_breaker_enabled: true,
                min_risk_reward: 0.0,
            },
        }
    }

    /// Default exit-rule set used when `exit_strategies` is not configured.
    pub fn default_exit_entries(self) -> Vec<ExitRuleEntry> {
        let (adverse_pct, hold_hours, target_pct, activation_pct) = match self {
            Mindset::Conservative => (0.7, 12.0, 1.5, 0.3),
            Mindset::Balanced => (1.0, 24.0, 2.0, 0.5),
            Mindset::Aggressive => (1.5, 48.0, 3.0, 0.8),
        };
        vec![
            ExitRuleEntry {
                enabled: true,
                kind: ExitRuleKind::AdverseMovement(AdverseMovementParams {
                    threshold_pct: adverse_pct,
                    consecutive_ticks: 3,
                    ..AdverseMovementParams::default()
                }),
            },
            ExitRuleEntry {
                enabled: true,
                kind: ExitRuleKind::TimeBased(TimeBasedParams {
                    max_hold_hours: hold_hours,
                    ..TimeBasedParams::default()
                }),
            },
            ExitRuleEntry {
                enabled: true,
                kind: ExitRuleKind::ProfitTarget(ProfitTargetParams {
                    target_pct,
                    partial_close_enabled: self == Mindset::Conservative,
                    levels: if self == Mindset::Conservative {
                        vec![
                            ProfitLevel { target_pct: target_pct / 2.0, close_pct: 50.0 },
                            ProfitLevel { target_pct, close_pct: 50.0 },
                        ]
                    } else {
                        Vec::new()
                    },
                }),
            },
            ExitRuleEntry {
                enabled: true,
                kind: ExitRuleKind::TrailingStop(TrailingStopParams {
                    activation_profit_pct: activation_pct,
                    ..TrailingStopParams::default()
                }),
            },
        ]
    }
}
