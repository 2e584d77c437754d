use chrono::{Datelike, NaiveTime, Weekday};
use serde::{Deserialize, Serialize};
use tracing::info;

use helm_schemas::{Metadata, PositionRecord};

use crate::{EvalContext, ExitBuildError, ExitDecision, ExitRule};

fn default_max_hold_hours() -> f64 {
    24.0
}
fn default_weekend_protection() -> bool {
    true
}
fn default_friday_close() -> String {
    "16:00".to_string()
}
fn default_eod_close() -> String {
    "16:45".to_string()
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TimeBasedParams {
    #[serde(default = "default_max_hold_hours")]
    pub max_hold_hours: f64,
    /// Close ahead of the weekly market close.
    #[serde(default = "default_weekend_protection")]
    pub weekend_protection: bool,
    /// Server time on Friday after which positions are closed ("HH:MM").
    #[serde(default = "default_friday_close")]
    pub friday_close: String,
    /// Close everything by end of day.
    #[serde(default)]
    pub day_trading_mode: bool,
    #[serde(default = "default_eod_close")]
    pub eod_close: String,
}

impl Default for TimeBasedParams {
    fn default() -> Self {
        Self {
            max_hold_hours: default_max_hold_hours(),
            weekend_protection: default_weekend_protection(),
            friday_close: default_friday_close(),
            day_trading_mode: false,
            eod_close: default_eod_close(),
        }
    }
}

fn parse_hh_mm(rule: &'static str, raw: &str) -> Result<NaiveTime, ExitBuildError> {
    NaiveTime::parse_from_str(raw.trim(), "%H:%M").map_err(|e| ExitBuildError {
        rule,
        detail: format!("cannot parse time {raw:?}: {e}"),
    })
}

/// Closes positions on age or session clock: maximum hold time, weekend
/// protection ahead of the Friday close, and day-trading end-of-day.
/// All clock checks use the broker's server time from the tick context.
#[derive(Debug)]
pub struct TimeBased {
    params: TimeBasedParams,
    max_hold_seconds: i64,
    friday_close: NaiveTime,
    eod_close: NaiveTime,
}

impl TimeBased {
    pub const NAME: &'static str = "time_based";
    pub const PRIORITY: u8 = 50;

    pub fn new(params: TimeBasedParams) -> Result<Self, ExitBuildError> {
        if params.max_hold_hours <= 0.0 {
            return Err(ExitBuildError {
                rule: Self::NAME,
                detail: format!("max_hold_hours must be positive, got {}", params.max_hold_hours),
            });
        }
        let friday_close = parse_hh_mm(Self::NAME, &params.friday_close)?;
        let eod_close = parse_hh_mm(Self::NAME, &params.eod_close)?;
        Ok(Self {
            max_hold_seconds: (params.max_hold_hours * 3600.0) as i64,
            friday_close,
            eod_close,
            params,
        })
    }

    fn decision(
        &self,
        position: &PositionRecord,
        ctx: &EvalContext,
        reason: &str,
        confidence: f64,
        metadata: Metadata,
    ) -> ExitDecision {
        ExitDecision {
            ticket: position.ticket,
            reason: reason.to_string(),
            rule: Self::NAME.to_string(),
            close_volume_micros: None,
            triggered_at: ctx.now,
            confidence,
            metadata,
        }
    }
}

impl ExitRule for TimeBased {
    fn name(&self) -> &'static str {
        Self::NAME
    }

    fn priority(&self) -> u8 {
        Self::PRIORITY
    }

    fn evaluate(&mut self, position: &PositionRecord, ctx: &EvalContext) -> Option<ExitDecision> {
        let age_seconds = position.age(ctx.now).num_seconds();
        if age_seconds >= self.max_hold_seconds {
            info!(
                ticket = position.ticket,
                age_seconds, "maximum hold time exceeded"
            );
            let mut metadata = Metadata::new();
            metadata.insert(
                "age_hours".to_string(),
                format!("{:.2}", age_seconds as f64 / 3600.0),
            );
            metadata.insert(
                "max_hold_hours".to_string(),
                format!("{}", self.params.max_hold_hours),
            );
            return Some(self.decision(position, ctx, "max_hold_time", 0.9, metadata));
        }

        if self.params.weekend_protection
            && ctx.now.weekday() == Weekday::Fri
            && ctx.now.time() >= self.friday_close
        {
            info!(ticket = position.ticket, "weekend protection close");
            let mut metadata = Metadata::new();
            metadata.insert("close_time".to_string(), self.params.friday_close.clone());
            return Some(self.decision(position, ctx, "weekend_protection", 1.0, metadata));
        }

        if self.params.day_trading_mode && ctx.now.time() >= self.eod_close {
            info!(ticket = position.ticket, "end-of-day close");
            let mut metadata = Metadata::new();
            metadata.insert("close_time".to_string(), self.params.eod_close.clone());
            return Some(self.decision(position, ctx, "eod_close", 1.0, metadata));
        }

        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{DateTime, Duration, TimeZone, Utc};
    use helm_schemas::{AccountSnapshot, PositionOrigin, PositionSide};

    fn position(open_time: DateTime<Utc>) -> PositionRecord {
        PositionRecord {
            ticket: 1001,
            symbol: "EURUSD".to_string(),
            side: PositionSide::Long,
            volume_micros: 50_000,
            open_price_micros: 100_000_000,
            open_time,
            current_price_micros: 100_000_000,
            stop_micros: None,
            take_profit_micros: None,
            unrealised_pnl_micros: 0,
            realised_pnl_micros: 0,
            commission_micros: 0,
            swap_micros: 0,
            first_seen: open_time,
            origin: PositionOrigin::Native,
            metadata: Metadata::new(),
        }
    }

    fn eval(rule: &mut TimeBased, position: &PositionRecord, now: DateTime<Utc>) -> Option<ExitDecision> {
        let account = AccountSnapshot {
            balance_micros: 10_000_000_000,
            equity_micros: 10_000_000_000,
            margin_used_micros: 0,
            margin_free_micros: 10_000_000_000,
            realised_today_micros: 0,
            trading_enabled: true,
            server_time: now,
        };
        let ctx = EvalContext {
            now,
            account: &account,
            atr_micros: None,
        };
        rule.evaluate(position, &ctx)
    }

    #[test]
    fn max_hold_time_fires_after_configured_hours() {
        let mut rule = TimeBased::new(TimeBasedParams {
            max_hold_hours: 24.0,
            weekend_protection: false,
            ..TimeBasedParams::default()
        })
        .unwrap();
        // Monday open.
        let open = Utc.with_ymd_and_hms(2024, 3, 4, 9, 0, 0).unwrap();
        let pos = position(open);

        assert!(eval(&mut rule, &pos, open + Duration::hours(23)).is_none());
        let decision = eval(&mut rule, &pos, open + Duration::hours(24)).unwrap();
        assert_eq!(decision.reason, "max_hold_time");
    }

    #[test]
    fn weekend_protection_fires_friday_after_close_time() {
        let mut rule = TimeBased::new(TimeBasedParams {
            max_hold_hours: 1000.0,
            weekend_protection: true,
            friday_close: "16:00".to_string(),
            ..TimeBasedParams::default()
        })
        .unwrap();
        // 2024-03-08 is a Friday.
        let open = Utc.with_ymd_and_hms(2024, 3, 8, 9, 0, 0).unwrap();
        let pos = position(open);

        let before = Utc.with_ymd_and_hms(2024, 3, 8, 15, 59, 0).unwrap();
        assert!(eval(&mut rule, &pos, before).is_none());

        let after = Utc.with_ymd_and_hms(2024, 3, 8, 16, 0, 0).unwrap();
        let decision = eval(&mut rule, &pos, after).unwrap();
        assert_eq!(decision.reason, "weekend_protection");
    }

    #[test]
    fn weekend_protection_silent_on_other_days() {
        let mut rule = TimeBased::new(TimeBasedParams {
            max_hold_hours: 1000.0,
            ..TimeBasedParams::default()
        })
        .unwrap();
        // Thursday 17:00, past the close time but not Friday.
        let open = Utc.with_ymd_and_hms(2024, 3, 7, 9, 0, 0).unwrap();
        let now = Utc.with_ymd_and_hms(2024, 3, 7, 17, 0, 0).unwrap();
        assert!(eval(&mut rule, &position(open), now).is_none());
    }

    #[test]
    fn day_trading_mode_closes_at_eod() {
        let mut rule = TimeBased::new(TimeBasedParams {
            max_hold_hours: 1000.0,
            weekend_protection: false,
            day_trading_mode: true,
            eod_close: "16:45".to_string(),
            ..TimeBasedParams::default()
        })
        .unwrap();
        let open = Utc.with_ymd_and_hms(2024, 3, 4, 9, 0, 0).unwrap();
        let now = Utc.with_ymd_and_hms(2024, 3, 4, 16, 45, 0).unwrap();
        let decision = eval(&mut rule, &position(open), now).unwrap();
        assert_eq!(decision.reason, "eod_close");
    }

    #[test]
    fn bad_time_string_fails_at_build() {
        let err = TimeBased::new(TimeBasedParams {
            friday_close: "25:99".to_string(),
            ..TimeBasedParams::default()
        })
        .unwrap_err();
        assert_eq!(err.rule, "time_based");
    }

    #[test]
    fn non_positive_hold_hours_fails_at_build() {
        assert!(TimeBased::new(TimeBasedParams {
            max_hold_hours: 0.0,
            ..TimeBasedParams::default()
        })
        .is_err());
    }
}
