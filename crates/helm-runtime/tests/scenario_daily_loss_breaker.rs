//! Daily-loss circuit breaker: a realised loss beyond the limit opens the
//! breaker, every further entry is refused with the stable code, and the
//! breaker resets exactly when the server date advances.

mod common;

use chrono::{Duration, TimeZone, Utc};

use common::{long_signal, make_loop, permissive_limits, QueueStrategy};
use helm_exit::{AdverseMovementParams, ExitRuleEntry, ExitRuleKind};
use helm_risk::RefusalCode;
use helm_schemas::{to_micros, Timeframe};
use helm_testkit::{bars_from_closes, base_time, MockBroker};

#[test]
fn loss_opens_breaker_and_server_midnight_closes_it() {
    let bars = bars_from_closes(
        base_time(),
        Timeframe::M1,
        &[100.0, 100.0, 100.0, 100.0],
    );
    let broker = MockBroker::new("EURUSD", Timeframe::M1, bars);

    let strategy = QueueStrategy::new(vec![
        long_signal("day1-entry", 100.0, Some(99.0), None),
        long_signal("day1-refused", 100.0, Some(99.0), None),
        long_signal("day2-accepted", 100.0, Some(99.0), None),
    ]);

    let mut limits = permissive_limits();
    limits.max_daily_loss_micros = 50_000; // 0.05 in account currency
    limits.circuit_breaker_enabled = true;

    // A hair-trigger adverse rule produces the realising loss.
    let exits = vec![ExitRuleEntry {
        enabled: true,
        kind: ExitRuleKind::AdverseMovement(AdverseMovementParams {
            threshold_pct: 1.0,
            consecutive_ticks: 1,
            ..AdverseMovementParams::default()
        }),
    }];

    let mut harness = make_loop(broker, Box::new(strategy), limits, exits, false);

    // Tick 1: entry at 100.00, 0.05 lots.
    let report = harness.tick();
    assert!(report.entry_ticket.is_some());

    // Tick 2: −1.1% mark realises −0.055, beyond the 0.05 daily limit — the
    // close itself trips the breaker.
    {
        let session = harness.control.session_mut();
        session.set_mark_price(to_micros(98.9));
        session.set_server_time(base_time() + Duration::seconds(30));
    }
    let report = harness.tick();
    assert_eq!(report.exits.len(), 1);
    assert!(harness.control.risk().breaker_open());

    // Tick 3: new bar, next signal — refused, and no order reaches the
    // broker while the breaker is open.
    let submits_before = harness.control.session().submit_count();
    harness.control.session_mut().advance_bar();
    let report = harness.tick();
    assert_eq!(report.refusal, Some(RefusalCode::CircuitBreakerOpen));
    assert!(report.entry_ticket.is_none());
    assert_eq!(harness.control.session().submit_count(), submits_before);

    // Tick 4: the server date advances past midnight — the accumulator
    // resets, the breaker closes, and the next signal is accepted.
    {
        let session = harness.control.session_mut();
        session.advance_bar();
        session.set_server_time(Utc.with_ymd_and_hms(2024, 3, 5, 0, 0, 30).unwrap());
    }
    let report = harness.tick();
    assert!(!harness.control.risk().breaker_open());
    assert_eq!(report.refusal, None);
    assert!(report.entry_ticket.is_some());
    assert_eq!(harness.control.risk().realised_today_micros(), 0);
}

#[test]
fn breaker_disabled_still_refuses_with_daily_loss_code() {
    let bars = bars_from_closes(base_time(), Timeframe::M1, &[100.0, 100.0, 100.0]);
    let broker = MockBroker::new("EURUSD", Timeframe::M1, bars);
    let strategy = QueueStrategy::new(vec![
        long_signal("entry", 100.0, Some(99.0), None),
        long_signal("refused", 100.0, Some(99.0), None),
    ]);

    let mut limits = permissive_limits();
    limits.max_daily_loss_micros = 50_000;
    limits.circuit_breaker_enabled = false;

    let exits = vec![ExitRuleEntry {
        enabled: true,
        kind: ExitRuleKind::AdverseMovement(AdverseMovementParams {
            threshold_pct: 1.0,
            consecutive_ticks: 1,
            ..AdverseMovementParams::default()
        }),
    }];

    let mut harness = make_loop(broker, Box::new(strategy), limits, exits, false);
    harness.tick();
    {
        let session = harness.control.session_mut();
        session.set_mark_price(to_micros(98.9));
        session.set_server_time(base_time() + Duration::seconds(30));
    }
    harness.tick();
    assert!(!harness.control.risk().breaker_open());

    harness.control.session_mut().advance_bar();
    let report = harness.tick();
    assert_eq!(report.refusal, Some(RefusalCode::DailyLossBreached));
}
