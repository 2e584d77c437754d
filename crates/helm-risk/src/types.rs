use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

/// Risk configuration. Volumes, currency amounts, and fractions are micros.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RiskLimits {
    pub max_volume_per_order_micros: i64,
    pub default_volume_micros: i64,
    /// Absolute daily-loss limit in account currency. 0 disables.
    pub max_daily_loss_micros: i64,
    pub max_positions_per_symbol: usize,
    pub max_total_positions: usize,
    /// Fraction of balance risked per stop-sized entry (1.0 == 1_000_000).
    pub position_size_pct_micros: i64,
    /// Equity drop from session start that triggers flatten-and-halt.
    /// 0 disables.
    pub emergency_drawdown_pct_micros: i64,
    pub circuit_breaker_enabled: bool,
    /// Minimum reward/risk ratio when a signal carries both levels
    /// (1.0 == 1_000_000). 0 disables the check.
    pub min_risk_reward_micros: i64,
}

impl RiskLimits {
    pub fn sane_defaults() -> Self {
        Self {
            max_volume_per_order_micros: 1_000_000, // 1.00 lot
            default_volume_micros: 10_000,          // 0.01 lot
            max_daily_loss_micros: 0,
            max_positions_per_symbol: 1,
            max_total_positions: 3,
            position_size_pct_micros: 20_000, // 2%
            emergency_drawdown_pct_micros: 0,
            circuit_breaker_enabled: true,
            min_risk_reward_micros: 0,
        }
    }
}

/// Open-position counts supplied by the tracker.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct PositionExposure {
    pub for_symbol: usize,
    pub total: usize,
}

/// Why an entry was refused. Every variant has a stable code string.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum RefusalCode {
    TradingDisabled,
    SymbolCap,
    TotalCap,
    DailyLossBreached,
    ZeroOrNegativeSize,
    VolumeBelowBrokerMinimum,
    VolumeAboveConfigMax,
    InsufficientMargin,
    CircuitBreakerOpen,
    RewardRiskTooLow,
}

impl RefusalCode {
    pub fn code_str(&self) -> &'static str {
        match self {
            RefusalCode::TradingDisabled => "trading_disabled",
            RefusalCode::SymbolCap => "symbol_cap",
            RefusalCode::TotalCap => "total_cap",
            RefusalCode::DailyLossBreached => "daily_loss_breached",
            RefusalCode::ZeroOrNegativeSize => "zero_or_negative_size",
            RefusalCode::VolumeBelowBrokerMinimum => "volume_below_broker_minimum",
            RefusalCode::VolumeAboveConfigMax => "volume_above_config_max",
            RefusalCode::InsufficientMargin => "insufficient_margin",
            RefusalCode::CircuitBreakerOpen => "circuit_breaker_open",
            RefusalCode::RewardRiskTooLow => "reward_risk_too_low",
        }
    }
}

impl std::fmt::Display for RefusalCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.code_str())
    }
}

/// Gate output: an approved, sized entry or a typed refusal.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum RiskVerdict {
    Approved { volume_micros: i64 },
    Refused { code: RefusalCode, message: String },
}

impl RiskVerdict {
    pub fn is_approved(&self) -> bool {
        matches!(self, RiskVerdict::Approved { .. })
    }

    pub fn refusal_code(&self) -> Option<&RefusalCode> {
        match self {
            RiskVerdict::Refused { code, .. } => Some(code),
            _ => None,
        }
    }
}

/// Mutable gate state. Persisted only in memory; rebuilt at process start.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct RiskState {
    pub realised_today_micros: i64,
    pub trades_today: u32,
    /// Server date the accumulator was last reset on.
    pub accounting_date: Option<NaiveDate>,
    pub breaker_open: bool,
    pub session_start_equity_micros: Option<i64>,
    pub emergency_latched: bool,
}
