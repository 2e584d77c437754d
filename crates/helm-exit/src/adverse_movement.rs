use std::collections::{BTreeMap, VecDeque};

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use helm_schemas::{div_micros, to_micros, Metadata, PositionRecord, PositionSide};

use crate::{EvalContext, ExitDecision, ExitRule};

/// Bounded per-ticket price history length.
const HISTORY_CAP: usize = 100;

fn default_threshold_pct() -> f64 {
    1.0
}
fn default_window_seconds() -> i64 {
    60
}
fn default_consecutive_ticks() -> u32 {
    1
}
fn default_cooldown_seconds() -> i64 {
    300
}
fn default_volatility_threshold_pct() -> f64 {
    2.5
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AdverseMovementParams {
    /// Adverse move (percent of window-start price) that triggers.
    #[serde(default = "default_threshold_pct")]
    pub threshold_pct: f64,
    #[serde(default = "default_window_seconds")]
    pub window_seconds: i64,
    /// Consecutive adverse observations required for confirmation.
    #[serde(default = "default_consecutive_ticks")]
    pub consecutive_ticks: u32,
    /// Re-trigger lockout after a trigger for the same ticket.
    #[serde(default = "default_cooldown_seconds")]
    pub cooldown_seconds: i64,
    /// Suppress triggering while ATR (as percent of the open price) exceeds
    /// `volatility_threshold_pct`.
    #[serde(default)]
    pub ignore_during_high_volatility: bool,
    #[serde(default = "default_volatility_threshold_pct")]
    pub volatility_threshold_pct: f64,
}

impl Default for AdverseMovementParams {
    fn default() -> Self {
        Self {
            threshold_pct: default_threshold_pct(),
            window_seconds: default_window_seconds(),
            consecutive_ticks: default_consecutive_ticks(),
            cooldown_seconds: default_cooldown_seconds(),
            ignore_during_high_volatility: false,
            volatility_threshold_pct: default_volatility_threshold_pct(),
        }
    }
}

/// Emergency exit on rapid adverse movement — flash-crash protection.
/// Highest-priority rule: when it fires, nothing else gets a say.
pub struct AdverseMovement {
    params: AdverseMovementParams,
    threshold_fraction_micros: i64,
    volatility_fraction_micros: i64,
    history: BTreeMap<i64, VecDeque<(DateTime<Utc>, i64)>>,
    last_trigger: BTreeMap<i64, DateTime<Utc>>,
}

impl AdverseMovement {
    pub const NAME: &'static str = "adverse_movement";
    pub const PRIORITY: u8 = 90;

    pub fn new(params: AdverseMovementParams) -> Self {
        Self {
            threshold_fraction_micros: to_micros(params.threshold_pct / 100.0),
            volatility_fraction_micros: to_micros(params.volatility_threshold_pct / 100.0),
            params,
            history: BTreeMap::new(),
            last_trigger: BTreeMap::new(),
        }
    }

    fn high_volatility(&self, position: &PositionRecord, ctx: &EvalContext) -> bool {
        if !self.params.ignore_during_high_volatility {
            return false;
        }
        let Some(atr) = ctx.atr_micros else { return false };
        let atr_fraction = div_micros(atr, position.open_price_micros);
        atr_fraction > self.volatility_fraction_micros
    }
}

impl ExitRule for AdverseMovement {
    fn name(&self) -> &'static str {
        Self::NAME
    }

    fn priority(&self) -> u8 {
        Self::PRIORITY
    }

    fn evaluate(&mut self, position: &PositionRecord, ctx: &EvalContext) -> Option<ExitDecision> {
        let ticket = position.ticket;
        let price = position.current_price_micros;
        let now = ctx.now;

        if let Some(last) = self.last_trigger.get(&ticket) {
            if now - *last < Duration::seconds(self.params.cooldown_seconds) {
                return None;
            }
        }

        let history = self.history.entry(ticket).or_default();
        history.push_back((now, price));
        while history.len() > HISTORY_CAP {
            history.pop_front();
        }
        if history.len() < 2 {
            return None;
        }

        if self.high_volatility(position, ctx) {
            debug!(ticket, "adverse check suppressed during high volatility");
            return None;
        }

        let window_start = now - Duration::seconds(self.params.window_seconds);
        let recent: Vec<(DateTime<Utc>, i64)> = self
            .history
            .get(&ticket)
            .map(|h| h.iter().filter(|(ts, _)| *ts >= window_start).copied().collect())
            .unwrap_or_default();
        if recent.len() < 2 {
            return None;
        }

        // Confirmation: a run of consecutive adverse observations ending at
        // the latest sample. Any favourable print resets the count.
        let is_long = position.side == PositionSide::Long;
        let mut adverse_run: u32 = 0;
        for pair in recent.windows(2) {
            let (prev, curr) = (pair[0].1, pair[1].1);
            let adverse = if is_long { curr < prev } else { curr > prev };
            if adverse {
                adverse_run += 1;
            } else {
                adverse_run = 0;
            }
        }
        if adverse_run < self.params.consecutive_ticks {
            return None;
        }

        let start_price = recent[0].1;
        let change = price - start_price;
        let adverse = if is_long { change < 0 } else { change > 0 };
        if !adverse {
            return None;
        }
        let moved_fraction = div_micros(change.abs(), start_price);
        if moved_fraction < self.threshold_fraction_micros {
            return None;
        }

        warn!(
            ticket,
            moved_micros = moved_fraction,
            window_seconds = self.params.window_seconds,
            adverse_run,
            "adverse movement detected, emergency exit"
        );
        self.last_trigger.insert(ticket, now);

        let mut metadata = Metadata::new();
        metadata.insert(
            "movement_pct".to_string(),
            format!("{:.4}", moved_fraction as f64 / 10_000.0),
        );
        metadata.insert(
            "window_seconds".to_string(),
            self.params.window_seconds.to_string(),
        );
        metadata.insert("consecutive_adverse".to_string(), adverse_run.to_string());

        Some(ExitDecision {
            ticket,
            reason: Self::NAME.to_string(),
            rule: Self::NAME.to_string(),
            close_volume_micros: None,
            triggered_at: now,
            confidence: 1.0,
            metadata,
        })
    }

    fn forget(&mut self, ticket: i64) {
        self.history.remove(&ticket);
        self.last_trigger.remove(&ticket);
    }

    fn reset(&mut self) {
        self.history.clear();
        self.last_trigger.clear();
    }

    fn scratch_tickets(&self) -> Vec<i64> {
        self.history.keys().copied().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use helm_schemas::{AccountSnapshot, PositionOrigin};

    fn account(now: DateTime<Utc>) -> AccountSnapshot {
        AccountSnapshot {
            balance_micros: 10_000_000_000,
            equity_micros: 10_000_000_000,
            margin_used_micros: 0,
            margin_free_micros: 10_000_000_000,
            realised_today_micros: 0,
            trading_enabled: true,
            server_time: now,
        }
    }

    fn long_position(current: i64) -> PositionRecord {
        let t = Utc.with_ymd_and_hms(2024, 3, 4, 9, 0, 0).unwrap();
        PositionRecord {
            ticket: 1001,
            symbol: "EURUSD".to_string(),
            side: PositionSide::Long,
            volume_micros: 50_000,
            open_price_micros: 100_000_000,
            open_time: t,
            current_price_micros: current,
            stop_micros: None,
            take_profit_micros: None,
            unrealised_pnl_micros: 0,
            realised_pnl_micros: 0,
            commission_micros: 0,
            swap_micros: 0,
            first_seen: t,
            origin: PositionOrigin::Native,
            metadata: Metadata::new(),
        }
    }

    fn rule(consecutive: u32) -> AdverseMovement {
        AdverseMovement::new(AdverseMovementParams {
            threshold_pct: 1.0,
            window_seconds: 60,
            consecutive_ticks: consecutive,
            cooldown_seconds: 300,
            ignore_during_high_volatility: false,
            volatility_threshold_pct: 2.5,
        })
    }

    fn eval_at(
        rule: &mut AdverseMovement,
        price: i64,
        second: u32,
    ) -> Option<ExitDecision> {
        let now = Utc.with_ymd_and_hms(2024, 3, 4, 9, 0, 0).unwrap() + Duration::seconds(second as i64);
        let acc = account(now);
        let ctx = EvalContext {
            now,
            account: &acc,
            atr_micros: None,
        };
        rule.evaluate(&long_position(price), &ctx)
    }

    #[test]
    fn three_consecutive_adverse_ticks_trigger_emergency() {
        let mut rule = rule(3);
        assert!(eval_at(&mut rule, 100_000_000, 0).is_none());
        assert!(eval_at(&mut rule, 99_500_000, 10).is_none());
        assert!(eval_at(&mut rule, 99_200_000, 20).is_none());
        let decision = eval_at(&mut rule, 98_900_000, 30).expect("third adverse tick fires");
        assert_eq!(decision.reason, "adverse_movement");
        assert_eq!(decision.close_volume_micros, None);
        assert_eq!(decision.confidence, 1.0);
    }

    #[test]
    fn favourable_print_resets_the_run() {
        let mut rule = rule(3);
        eval_at(&mut rule, 100_000_000, 0);
        eval_at(&mut rule, 99_500_000, 10);
        eval_at(&mut rule, 99_600_000, 20); // bounce resets
        assert!(eval_at(&mut rule, 99_200_000, 30).is_none());
    }

    #[test]
    fn small_move_below_threshold_does_not_trigger() {
        let mut rule = rule(1);
        eval_at(&mut rule, 100_000_000, 0);
        // −0.5% in window, threshold 1%.
        assert!(eval_at(&mut rule, 99_500_000, 10).is_none());
    }

    #[test]
    fn cooldown_suppresses_immediate_retrigger() {
        let mut rule = rule(1);
        eval_at(&mut rule, 100_000_000, 0);
        assert!(eval_at(&mut rule, 98_500_000, 10).is_some());
        // Still falling, but inside the 300 s cooldown.
        assert!(eval_at(&mut rule, 97_000_000, 40).is_none());
    }

    #[test]
    fn old_samples_age_out_of_the_window() {
        let mut rule = rule(1);
        eval_at(&mut rule, 100_000_000, 0);
        // 120 s later: the 100.00 sample is out of the 60 s window; only one
        // sample remains in the window, so no evaluation possible.
        assert!(eval_at(&mut rule, 98_500_000, 120).is_none());
    }

    #[test]
    fn volatility_filter_suppresses_trigger() {
        let mut rule = AdverseMovement::new(AdverseMovementParams {
            ignore_during_high_volatility: true,
            volatility_threshold_pct: 2.5,
            consecutive_ticks: 1,
            ..AdverseMovementParams::default()
        });
        let now0 = Utc.with_ymd_and_hms(2024, 3, 4, 9, 0, 0).unwrap();
        let acc = account(now0);
        let ctx = EvalContext {
            now: now0,
            account: &acc,
            atr_micros: Some(3_000_000), // 3% of a 100.00 open price
        };
        rule.evaluate(&long_position(100_000_000), &ctx);

        let now1 = Utc.with_ymd_and_hms(2024, 3, 4, 9, 0, 10).unwrap();
        let acc1 = account(now1);
        let ctx1 = EvalContext {
            now: now1,
            account: &acc1,
            atr_micros: Some(3_000_000),
        };
        assert!(rule.evaluate(&long_position(98_500_000), &ctx1).is_none());
    }

    #[test]
    fn forget_frees_scratch() {
        let mut rule = rule(1);
        eval_at(&mut rule, 100_000_000, 0);
        assert_eq!(rule.scratch_tickets(), vec![1001]);
        rule.forget(1001);
        assert!(rule.scratch_tickets().is_empty());
    }
}
