use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One OHLCV record for a fixed timeframe. Immutable once observed; keyed by
/// `open_time`, which is strictly monotonic per (symbol, timeframe).
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Bar {
    pub open_time: DateTime<Utc>,
    pub open_micros: i64,
    pub high_micros: i64,
    pub low_micros: i64,
    pub close_micros: i64,
    pub volume: i64,
}

impl Bar {
    /// True range against the previous bar's close; plain range when no
    /// previous bar is available.
    pub fn true_range_micros(&self, prev_close_micros: Option<i64>) -> i64 {
        let hl = self.high_micros - self.low_micros;
        match prev_close_micros {
            None => hl,
            Some(pc) => {
                let hc = (self.high_micros - pc).abs();
                let lc = (self.low_micros - pc).abs();
                hl.max(hc).max(lc)
            }
        }
    }
}

/// Bar timeframe. Wire form is the conventional short code ("M1", "H1", ...).
#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Timeframe {
    M1,
    M5,
    M15,
    M30,
    H1,
    H4,
    D1,
}

impl Timeframe {
    pub fn seconds(self) -> i64 {
        match self {
            Timeframe::M1 => 60,
            Timeframe::M5 => 300,
            Timeframe::M15 => 900,
            Timeframe::M30 => 1_800,
            Timeframe::H1 => 3_600,
            Timeframe::H4 => 14_400,
            Timeframe::D1 => 86_400,
        }
    }

    pub fn parse(code: &str) -> Option<Self> {
        match code.trim().to_ascii_uppercase().as_str() {
            "M1" => Some(Timeframe::M1),
            "M5" => Some(Timeframe::M5),
            "M15" => Some(Timeframe::M15),
            "M30" => Some(Timeframe::M30),
            "H1" => Some(Timeframe::H1),
            "H4" => Some(Timeframe::H4),
            "D1" => Some(Timeframe::D1),
            _ => None,
        }
    }
}

impl std::fmt::Display for Timeframe {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let code = match self {
            Timeframe::M1 => "M1",
            Timeframe::M5 => "M5",
            Timeframe::M15 => "M15",
            Timeframe::M30 => "M30",
            Timeframe::H1 => "H1",
            Timeframe::H4 => "H4",
            Timeframe::D1 => "D1",
        };
        write!(f, "{code}")
    }
}

/// Point-in-time account state as reported by the broker.
///
/// `server_time` is the broker's clock, not the local one. Every calendar
/// decision in the loop (daily-loss reset, weekend protection, end-of-day
/// close) is made against this field.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccountSnapshot {
    pub balance_micros: i64,
    pub equity_micros: i64,
    pub margin_used_micros: i64,
    pub margin_free_micros: i64,
    pub realised_today_micros: i64,
    pub trading_enabled: bool,
    pub server_time: DateTime<Utc>,
}
