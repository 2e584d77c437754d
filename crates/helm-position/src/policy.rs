use std::collections::BTreeSet;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use helm_broker::BrokerPosition;

/// What to do with a broker position the tracker does not own.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum AdoptionRuling {
    Adopt,
    /// Report the orphan but take no ownership. The stable reason string
    /// lands in logs and the reconcile report.
    Skip { reason: &'static str },
}

/// Orphan-trade adoption policy.
///
/// A deny-listed symbol is never adopted — but a position that was already
/// adopted stays managed; the policy is consulted only at adoption time.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AdoptionPolicy {
    pub enabled: bool,
    /// Allow-list; empty means all symbols are adoptable.
    pub adopt_symbols: BTreeSet<String>,
    /// Deny-list; wins over the allow-list.
    pub ignore_symbols: BTreeSet<String>,
    /// Positions older than this are refused. 0 disables the age check.
    pub max_age_hours: i64,
    /// Report orphans without taking ownership.
    pub log_only: bool,
}

impl AdoptionPolicy {
    pub fn disabled() -> Self {
        Self {
            enabled: false,
            adopt_symbols: BTreeSet::new(),
            ignore_symbols: BTreeSet::new(),
            max_age_hours: 0,
            log_only: false,
        }
    }

    pub fn adopt_all() -> Self {
        Self {
            enabled: true,
            adopt_symbols: BTreeSet::new(),
            ignore_symbols: BTreeSet::new(),
            max_age_hours: 0,
            log_only: false,
        }
    }

    pub fn rule(&self, position: &BrokerPosition, now: DateTime<Utc>) -> AdoptionRuling {
        if !self.enabled {
            return AdoptionRuling::Skip { reason: "adoption_disabled" };
        }
        if self.ignore_symbols.contains(&position.symbol) {
            return AdoptionRuling::Skip { reason: "symbol_ignored" };
        }
        if !self.adopt_symbols.is_empty() && !self.adopt_symbols.contains(&position.symbol) {
            return AdoptionRuling::Skip { reason: "symbol_not_whitelisted" };
        }
        if self.max_age_hours > 0 {
            let age = now - position.open_time;
            if age > Duration::hours(self.max_age_hours) {
                return AdoptionRuling::Skip { reason: "too_old" };
            }
        }
        if self.log_only {
            return AdoptionRuling::Skip { reason: "log_only" };
        }
        AdoptionRuling::Adopt
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use helm_schemas::PositionSide;

    fn orphan(symbol: &str, age_hours: i64) -> (BrokerPosition, DateTime<Utc>) {
        let now = Utc.with_ymd_and_hms(2024, 3, 4, 12, 0, 0).unwrap();
        let pos = BrokerPosition {
            ticket: 500,
            symbol: symbol.to_string(),
            side: PositionSide::Long,
            volume_micros: 50_000,
            open_price_micros: 100_000_000,
            open_time: now - Duration::hours(age_hours),
            current_price_micros: 100_000_000,
            unrealised_pnl_micros: 0,
            stop_micros: None,
            take_profit_micros: None,
            commission_micros: 0,
            swap_micros: 0,
            magic_tag: 7,
            client_tag: None,
        };
        (pos, now)
    }

    #[test]
    fn disabled_policy_skips() {
        let (pos, now) = orphan("EURUSD", 2);
        assert_eq!(
            AdoptionPolicy::disabled().rule(&pos, now),
            AdoptionRuling::Skip { reason: "adoption_disabled" }
        );
    }

    #[test]
    fn open_policy_adopts_within_age() {
        let (pos, now) = orphan("EURUSD", 2);
        let mut policy = AdoptionPolicy::adopt_all();
        policy.max_age_hours = 72;
        assert_eq!(policy.rule(&pos, now), AdoptionRuling::Adopt);
    }

    #[test]
    fn age_limit_refuses_old_positions() {
        let (pos, now) = orphan("EURUSD", 100);
        let mut policy = AdoptionPolicy::adopt_all();
        policy.max_age_hours = 72;
        assert_eq!(
            policy.rule(&pos, now),
            AdoptionRuling::Skip { reason: "too_old" }
        );
    }

    #[test]
    fn deny_list_beats_allow_list() {
        let (pos, now) = orphan("EURUSD", 1);
        let mut policy = AdoptionPolicy::adopt_all();
        policy.adopt_symbols.insert("EURUSD".to_string());
        policy.ignore_symbols.insert("EURUSD".to_string());
        assert_eq!(
            policy.rule(&pos, now),
            AdoptionRuling::Skip { reason: "symbol_ignored" }
        );
    }

    #[test]
    fn non_whitelisted_symbol_skipped() {
        let (pos, now) = orphan("GBPUSD", 1);
        let mut policy = AdoptionPolicy::adopt_all();
        policy.adopt_symbols.insert("EURUSD".to_string());
        assert_eq!(
            policy.rule(&pos, now),
            AdoptionRuling::Skip { reason: "symbol_not_whitelisted" }
        );
    }

    #[test]
    fn log_only_reports_without_adopting() {
        let (pos, now) = orphan("EURUSD", 1);
        let mut policy = AdoptionPolicy::adopt_all();
        policy.log_only = true;
        assert_eq!(
            policy.rule(&pos, now),
            AdoptionRuling::Skip { reason: "log_only" }
        );
    }
}
