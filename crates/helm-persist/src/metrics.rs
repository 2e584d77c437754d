use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::info;

/// Point-in-time performance snapshot, journaled periodically and at
/// shutdown.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct MetricsSample {
    pub ts_utc: DateTime<Utc>,
    pub total_trades: u32,
    pub winning_trades: u32,
    pub losing_trades: u32,
    pub gross_profit_micros: i64,
    pub gross_loss_micros: i64,
    pub net_profit_micros: i64,
    pub win_rate: f64,
    pub profit_factor: f64,
    pub max_drawdown_micros: i64,
}

/// Running trade-performance counters over one process lifetime.
///
/// Max drawdown is measured on the realised equity curve (cumulative closed
/// P&L), peak-to-trough.
#[derive(Clone, Debug, Default)]
pub struct MetricsCollector {
    total_trades: u32,
    winning_trades: u32,
    losing_trades: u32,
    gross_profit_micros: i64,
    gross_loss_micros: i64,
    realised_micros: i64,
    peak_realised_micros: i64,
    max_drawdown_micros: i64,
}

impl MetricsCollector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_trade(&mut self, profit_micros: i64) {
        self.total_trades += 1;
        if profit_micros > 0 {
            self.winning_trades += 1;
            self.gross_profit_micros += profit_micros;
        } else if profit_micros < 0 {
            self.losing_trades += 1;
            self.gross_loss_micros += -profit_micros;
        }

        self.realised_micros += profit_micros;
        if self.realised_micros > self.peak_realised_micros {
            self.peak_realised_micros = self.realised_micros;
        }
        let drawdown = self.peak_realised_micros - self.realised_micros;
        if drawdown > self.max_drawdown_micros {
            self.max_drawdown_micros = drawdown;
        }
    }

    pub fn total_trades(&self) -> u32 {
        self.total_trades
    }

    pub fn net_profit_micros(&self) -> i64 {
        self.gross_profit_micros - self.gross_loss_micros
    }

    pub fn sample(&self, now: DateTime<Utc>) -> MetricsSample {
        let win_rate = if self.total_trades > 0 {
            self.winning_trades as f64 / self.total_trades as f64
        } else {
            0.0
        };
        let profit_factor = if self.gross_loss_micros > 0 {
            self.gross_profit_micros as f64 / self.gross_loss_micros as f64
        } else if self.gross_profit_micros > 0 {
            f64::INFINITY
        } else {
            0.0
        };
        MetricsSample {
            ts_utc: now,
            total_trades: self.total_trades,
            winning_trades: self.winning_trades,
            losing_trades: self.losing_trades,
            gross_profit_micros: self.gross_profit_micros,
            gross_loss_micros: self.gross_loss_micros,
            net_profit_micros: self.net_profit_micros(),
            win_rate,
            profit_factor,
            max_drawdown_micros: self.max_drawdown_micros,
        }
    }

    pub fn log_summary(&self, now: DateTime<Utc>) {
        let s = self.sample(now);
        info!(
            total_trades = s.total_trades,
            winning = s.winning_trades,
            losing = s.losing_trades,
            net_profit = s.net_profit_micros,
            win_rate = format!("{:.2}", s.win_rate),
            max_drawdown = s.max_drawdown_micros,
            "performance summary"
        );
    }
}
