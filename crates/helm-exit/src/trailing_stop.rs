use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use helm_schemas::{div_micros, to_micros, Metadata, PositionRecord, PositionSide};

use crate::{EvalContext, ExitDecision, ExitRule};

fn default_atr_multiplier() -> f64 {
    2.0
}
fn default_activation_profit_pct() -> f64 {
    0.5
}
fn default_min_stop_distance() -> f64 {
    0.01
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TrailingStopParams {
    /// Trailing distance = ATR × this.
    #[serde(default = "default_atr_multiplier")]
    pub atr_multiplier: f64,
    /// Unrealised profit (percent of entry notional) required to activate.
    #[serde(default = "default_activation_profit_pct")]
    pub activation_profit_pct: f64,
    /// Absolute floor for the trailing distance, in price units.
    #[serde(default = "default_min_stop_distance")]
    pub min_stop_distance: f64,
}

impl Default for TrailingStopParams {
    fn default() -> Self {
        Self {
            atr_multiplier: default_atr_multiplier(),
            activation_profit_pct: default_activation_profit_pct(),
            min_stop_distance: default_min_stop_distance(),
        }
    }
}

#[derive(Clone, Debug)]
struct Trail {
    best_price_micros: i64,
    stop_micros: Option<i64>,
}

/// Volatility-scaled trailing stop. Dormant until the position shows enough
/// profit; once active it ratchets a stop behind the best price seen and
/// never moves it toward loss.
///
/// The best-price-seen lives here, in the rule's scratch — the position
/// record deliberately carries no such field.
pub struct TrailingStop {
    params: TrailingStopParams,
    activation_fraction_micros: i64,
    min_distance_micros: i64,
    trails: BTreeMap<i64, Trail>,
}

impl TrailingStop {
    pub const NAME: &'static str = "trailing_stop";
    pub const PRIORITY: u8 = 25;

    pub fn new(params: TrailingStopParams) -> Self {
        Self {
            activation_fraction_micros: to_micros(params.activation_profit_pct / 100.0),
            min_distance_micros: to_micros(params.min_stop_distance),
            params,
            trails: BTreeMap::new(),
        }
    }

    /// Current trailing stop level for a ticket, if the trail is active.
    pub fn stop_for(&self, ticket: i64) -> Option<i64> {
        self.trails.get(&ticket).and_then(|t| t.stop_micros)
    }

    fn distance_micros(&self, ctx: &EvalContext) -> i64 {
        let atr_distance = ctx
            .atr_micros
            .map(|atr| to_micros(self.params.atr_multiplier * helm_schemas::from_micros(atr)))
            .unwrap_or(0);
        atr_distance.max(self.min_distance_micros)
    }
}

impl ExitRule for TrailingStop {
    fn name(&self) -> &'static str {
        Self::NAME
    }

    fn priority(&self) -> u8 {
        Self::PRIORITY
    }

    fn evaluate(&mut self, position: &PositionRecord, ctx: &EvalContext) -> Option<ExitDecision> {
        let ticket = position.ticket;
        let price = position.current_price_micros;
        let is_long = position.side == PositionSide::Long;

        if !self.trails.contains_key(&ticket) {
            let profit_fraction =
                div_micros(position.unrealised_pnl_micros, position.notional_micros());
            if profit_fraction < self.activation_fraction_micros {
                return None;
            }
            info!(ticket, price, "trailing stop activated");
            self.trails.insert(
                ticket,
                Trail {
                    best_price_micros: price,
                    stop_micros: None,
                },
            );
        }

        let distance = self.distance_micros(ctx);
        let trail = self.trails.get_mut(&ticket)?;

        if is_long {
            if price > trail.best_price_micros {
                trail.best_price_micros = price;
                debug!(ticket, price, "new best price");
            }
            let candidate = trail.best_price_micros - distance;
            // The stop only ever ratchets upward.
            trail.stop_micros = Some(match trail.stop_micros {
                Some(stop) => stop.max(candidate),
                None => candidate,
            });
            let stop = trail.stop_micros?;
            if price <= stop {
                return Some(trigger(position, ctx, stop, trail.best_price_micros));
            }
        } else {
            if price < trail.best_price_micros {
                trail.best_price_micros = price;
                debug!(ticket, price, "new best price");
            }
            let candidate = trail.best_price_micros + distance;
            // The stop only ever ratchets downward.
            trail.stop_micros = Some(match trail.stop_micros {
                Some(stop) => stop.min(candidate),
                None => candidate,
            });
            let stop = trail.stop_micros?;
            if price >= stop {
                return Some(trigger(position, ctx, stop, trail.best_price_micros));
            }
        }

        None
    }

    fn forget(&mut self, ticket: i64) {
        self.trails.remove(&ticket);
    }

    fn reset(&mut self) {
        self.trails.clear();
    }

    fn scratch_tickets(&self) -> Vec<i64> {
        self.trails.keys().copied().collect()
    }
}

fn trigger(
    position: &PositionRecord,
    ctx: &EvalContext,
    stop_micros: i64,
    best_price_micros: i64,
) -> ExitDecision {
    info!(
        ticket = position.ticket,
        stop = stop_micros,
        best = best_price_micros,
        protected = position.unrealised_pnl_micros,
        "trailing stop hit"
    );
    let mut metadata = Metadata::new();
    metadata.insert("stop_price".to_string(), stop_micros.to_string());
    metadata.insert("best_price".to_string(), best_price_micros.to_string());
    metadata.insert(
        "profit_protected".to_string(),
        position.unrealised_pnl_micros.to_string(),
    );
    ExitDecision {
        ticket: position.ticket,
        reason: TrailingStop::NAME.to_string(),
        rule: TrailingStop::NAME.to_string(),
        close_volume_micros: None,
        triggered_at: ctx.now,
        confidence: 1.0,
        metadata,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{DateTime, TimeZone, Utc};
    use helm_schemas::{AccountSnapshot, PositionOrigin};

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 4, 12, 0, 0).unwrap()
    }

    fn position(side: PositionSide, current: i64) -> PositionRecord {
        let t = Utc.with_ymd_and_hms(2024, 3, 4, 9, 0, 0).unwrap();
        let mut p = PositionRecord {
            ticket: 1001,
            symbol: "EURUSD".to_string(),
            side,
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
        };
        p.unrealised_pnl_micros = p.computed_pnl_micros();
        p
    }

    fn eval(rule: &mut TrailingStop, pos: &PositionRecord, atr: Option<f64>) -> Option<ExitDecision> {
        let account = AccountSnapshot {
            balance_micros: 10_000_000_000,
            equity_micros: 10_000_000_000,
            margin_used_micros: 0,
            margin_free_micros: 10_000_000_000,
            realised_today_micros: 0,
            trading_enabled: true,
            server_time: now(),
        };
        let ctx = EvalContext {
            now: now(),
            account: &account,
            atr_micros: atr.map(to_micros),
        };
        rule.evaluate(pos, &ctx)
    }

    fn rule() -> TrailingStop {
        TrailingStop::new(TrailingStopParams {
            atr_multiplier: 2.0,
            activation_profit_pct: 0.5,
            min_stop_distance: 0.01,
        })
    }

    #[test]
    fn dormant_below_activation_profit() {
        let mut r = rule();
        // +0.2% — below the 0.5% activation threshold.
        assert!(eval(&mut r, &position(PositionSide::Long, 100_200_000), Some(0.5)).is_none());
        assert!(r.scratch_tickets().is_empty());
    }

    #[test]
    fn never_activates_on_a_losing_position() {
        let mut r = rule();
        assert!(eval(&mut r, &position(PositionSide::Long, 99_000_000), Some(0.5)).is_none());
        assert!(eval(&mut r, &position(PositionSide::Long, 98_500_000), Some(0.5)).is_none());
        assert!(r.stop_for(1001).is_none());
    }

    #[test]
    fn activates_then_triggers_when_price_crosses_stop() {
        let mut r = rule();
        // +1%: activates; stop = best (101.00) − ATR×2 (1.00) = 100.00.
        assert!(eval(&mut r, &position(PositionSide::Long, 101_000_000), Some(0.5)).is_none());
        assert_eq!(r.stop_for(1001), Some(100_000_000));

        // Price falls to the stop: trigger.
        let decision = eval(&mut r, &position(PositionSide::Long, 100_000_000), Some(0.5)).unwrap();
        assert_eq!(decision.reason, "trailing_stop");
    }

    #[test]
    fn stop_is_monotonic_in_profit_direction() {
        let mut r = rule();
        eval(&mut r, &position(PositionSide::Long, 101_000_000), Some(0.5));
        let first = r.stop_for(1001).unwrap();

        // Price advances: stop ratchets up.
        eval(&mut r, &position(PositionSide::Long, 102_000_000), Some(0.5));
        let second = r.stop_for(1001).unwrap();
        assert!(second > first);

        // Volatility balloons: the candidate stop would be lower, but the
        // ratchet holds.
        eval(&mut r, &position(PositionSide::Long, 101_900_000), Some(5.0));
        let third = r.stop_for(1001).unwrap();
        assert_eq!(third, second, "stop must never move toward loss");
    }

    #[test]
    fn short_side_trails_downward() {
        let mut r = rule();
        // Short from 100.00, price at 99.00: +1% profit, stop = 99 + 1.00.
        eval(&mut r, &position(PositionSide::Short, 99_000_000), Some(0.5));
        assert_eq!(r.stop_for(1001), Some(100_000_000));

        // Price keeps falling: stop follows down.
        eval(&mut r, &position(PositionSide::Short, 98_000_000), Some(0.5));
        assert_eq!(r.stop_for(1001), Some(99_000_000));

        // Bounce to the stop triggers.
        let decision = eval(&mut r, &position(PositionSide::Short, 99_000_000), Some(0.5)).unwrap();
        assert_eq!(decision.reason, "trailing_stop");
    }

    #[test]
    fn min_floor_applies_without_atr() {
        let mut r = TrailingStop::new(TrailingStopParams {
            atr_multiplier: 2.0,
            activation_profit_pct: 0.5,
            min_stop_distance: 0.5,
        });
        eval(&mut r, &position(PositionSide::Long, 101_000_000), None);
        // distance = floor 0.50; stop = 101.00 − 0.50.
        assert_eq!(r.stop_for(1001), Some(100_500_000));
    }

    #[test]
    fn forget_drops_the_trail() {
        let mut r = rule();
        eval(&mut r, &position(PositionSide::Long, 101_000_000), Some(0.5));
        assert_eq!(r.scratch_tickets(), vec![1001]);
        r.forget(1001);
        assert!(r.scratch_tickets().is_empty());
    }
}
