use chrono::{DateTime, Utc};
use tracing::{info, warn};

use helm_schemas::{div_micros, mul_micros, AccountSnapshot, Signal, MICROS_SCALE};

use crate::{PositionExposure, RefusalCode, RiskLimits, RiskState, RiskVerdict};

/// Margin heuristic: required margin ≈ notional / this leverage. The broker's
/// own rejection remains the authority; this only catches obvious cases early.
const MARGIN_HEURISTIC_LEVERAGE: i64 = 100;

/// The risk gate. Owned by the control loop; single-writer.
#[derive(Clone, Debug)]
pub struct RiskGate {
    limits: RiskLimits,
    state: RiskState,
}

impl RiskGate {
    pub fn new(limits: RiskLimits) -> Self {
        Self {
            limits,
            state: RiskState::default(),
        }
    }

    pub fn limits(&self) -> &RiskLimits {
        &self.limits
    }

    pub fn state(&self) -> &RiskState {
        &self.state
    }

    pub fn breaker_open(&self) -> bool {
        self.state.breaker_open
    }

    pub fn emergency_latched(&self) -> bool {
        self.state.emergency_latched
    }

    pub fn realised_today_micros(&self) -> i64 {
        self.state.realised_today_micros
    }

    /// Per-tick maintenance against fresh account state:
    /// - resets the daily accumulator (and the breaker) when the server date
    ///   advances — never from the local clock;
    /// - captures session-start equity on first observation;
    /// - latches the emergency-drawdown flag once breached.
    pub fn observe_account(&mut self, account: &AccountSnapshot) {
        self.roll_day(account.server_time);

        let start = *self
            .state
            .session_start_equity_micros
            .get_or_insert(account.equity_micros);

        if self.limits.emergency_drawdown_pct_micros > 0 && !self.state.emergency_latched {
            let floor = start - mul_micros(start, self.limits.emergency_drawdown_pct_micros);
            if account.equity_micros <= floor {
                warn!(
                    equity = account.equity_micros,
                    floor, "emergency drawdown breached, latching"
                );
                self.state.emergency_latched = true;
            }
        }
    }

    fn roll_day(&mut self, server_time: DateTime<Utc>) {
        let today = server_time.date_naive();
        if self.state.accounting_date != Some(today) {
            if self.state.accounting_date.is_some() {
                info!(
                    previous_pnl = self.state.realised_today_micros,
                    trades = self.state.trades_today,
                    "server date advanced, daily accounting reset"
                );
            }
            self.state.accounting_date = Some(today);
            self.state.realised_today_micros = 0;
            self.state.trades_today = 0;
            self.state.breaker_open = false;
        }
    }

    /// Record a confirmed close. Trips the circuit breaker when the daily
    /// loss limit is reached and the breaker is enabled.
    pub fn record_close(&mut self, realised_micros: i64) {
        self.state.realised_today_micros += realised_micros;
        self.state.trades_today += 1;
        if self.limits.circuit_breaker_enabled
            && self.limits.max_daily_loss_micros > 0
            && self.state.realised_today_micros <= -self.limits.max_daily_loss_micros
            && !self.state.breaker_open
        {
            warn!(
                realised_today = self.state.realised_today_micros,
                limit = self.limits.max_daily_loss_micros,
                "daily loss limit reached, circuit breaker open until server date change"
            );
            self.state.breaker_open = true;
        }
    }

    /// Evaluate one directional signal. Never mutates anything but the
    /// breaker (lazy trip) and the day rollover.
    pub fn evaluate(
        &mut self,
        signal: &Signal,
        account: &AccountSnapshot,
        exposure: &PositionExposure,
        broker_min_volume_micros: i64,
    ) -> RiskVerdict {
        self.roll_day(account.server_time);

        if !account.trading_enabled {
            return refuse(RefusalCode::TradingDisabled, "account has trading disabled");
        }

        if self.daily_loss_reached() {
            if self.limits.circuit_breaker_enabled {
                self.state.breaker_open = true;
            } else {
                return refuse(
                    RefusalCode::DailyLossBreached,
                    format!(
                        "daily loss {} beyond limit {}",
                        self.state.realised_today_micros, self.limits.max_daily_loss_micros
                    ),
                );
            }
        }
        if self.state.breaker_open {
            return refuse(
                RefusalCode::CircuitBreakerOpen,
                "circuit breaker open after daily loss; resets on server date change",
            );
        }

        if exposure.for_symbol >= self.limits.max_positions_per_symbol {
            return refuse(
                RefusalCode::SymbolCap,
                format!(
                    "{} open positions on {} (cap {})",
                    exposure.for_symbol, signal.symbol, self.limits.max_positions_per_symbol
                ),
            );
        }
        if exposure.total >= self.limits.max_total_positions {
            return refuse(
                RefusalCode::TotalCap,
                format!(
                    "{} open positions (cap {})",
                    exposure.total, self.limits.max_total_positions
                ),
            );
        }

        if self.limits.min_risk_reward_micros > 0 {
            if let (Some(risk), Some(reward)) = (
                signal.stop_distance_micros(),
                signal.reward_distance_micros(),
            ) {
                if risk > 0 {
                    let ratio = div_micros(reward, risk);
                    if ratio < self.limits.min_risk_reward_micros {
                        return refuse(
                            RefusalCode::RewardRiskTooLow,
                            format!(
                                "reward/risk {:.2} below minimum {:.2}",
                                ratio as f64 / MICROS_SCALE as f64,
                                self.limits.min_risk_reward_micros as f64 / MICROS_SCALE as f64
                            ),
                        );
                    }
                }
            }
        }

        let volume = match self.size(signal, account, broker_min_volume_micros) {
            Ok(v) => v,
            Err(verdict) => return verdict,
        };

        // Margin heuristic; the broker reject is the authority.
        let notional = mul_micros(signal.reference_price_micros, volume);
        let margin_required = notional / MARGIN_HEURISTIC_LEVERAGE;
        if margin_required > account.margin_free_micros {
            return refuse(
                RefusalCode::InsufficientMargin,
                format!(
                    "estimated margin {} exceeds free margin {}",
                    margin_required, account.margin_free_micros
                ),
            );
        }

        RiskVerdict::Approved {
            volume_micros: volume,
        }
    }

    fn daily_loss_reached(&self) -> bool {
        self.limits.max_daily_loss_micros > 0
            && self.state.realised_today_micros <= -self.limits.max_daily_loss_micros
    }

    /// Sizing policy, in order of precedence:
    /// 1. explicit stop level: risk `balance × position_size_pct` over the
    ///    stop distance, clamped into [broker_min, max_volume_per_order];
    /// 2. otherwise the configured default volume.
    /// Lot-step quantisation is the execution engine's job.
    fn size(
        &self,
        signal: &Signal,
        account: &AccountSnapshot,
        broker_min_volume_micros: i64,
    ) -> Result<i64, RiskVerdict> {
        let cap = self.limits.max_volume_per_order_micros;
        if cap < broker_min_volume_micros {
            return Err(refuse(
                RefusalCode::VolumeBelowBrokerMinimum,
                format!(
                    "configured max volume {cap} below broker minimum {broker_min_volume_micros}"
                ),
            ));
        }

        match signal.stop_distance_micros() {
            Some(stop_distance) if stop_distance > 0 => {
                let risk_budget =
                    mul_micros(account.balance_micros, self.limits.position_size_pct_micros);
                let raw = div_micros(risk_budget, stop_distance);
                if raw <= 0 {
                    return Err(refuse(
                        RefusalCode::ZeroOrNegativeSize,
                        "stop-distance sizing produced a non-positive volume",
                    ));
                }
                Ok(raw.clamp(broker_min_volume_micros, cap))
            }
            Some(_) => Err(refuse(
                RefusalCode::ZeroOrNegativeSize,
                "stop level equals reference price",
            )),
            None => {
                let v = self.limits.default_volume_micros;
                if v <= 0 {
                    Err(refuse(
                        RefusalCode::ZeroOrNegativeSize,
                        "default volume is not positive",
                    ))
                } else if v < broker_min_volume_micros {
                    Err(refuse(
                        RefusalCode::VolumeBelowBrokerMinimum,
                        format!("default volume {v} below broker minimum {broker_min_volume_micros}"),
                    ))
                } else if v > cap {
                    Err(refuse(
                        RefusalCode::VolumeAboveConfigMax,
                        format!("default volume {v} above configured max {cap}"),
                    ))
                } else {
                    Ok(v)
                }
            }
        }
    }
}

fn refuse(code: RefusalCode, message: impl Into<String>) -> RiskVerdict {
    RiskVerdict::Refused {
        code,
        message: message.into(),
    }
}
