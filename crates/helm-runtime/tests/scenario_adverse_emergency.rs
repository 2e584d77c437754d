//! Adverse-movement emergency: three consecutive adverse marks inside the
//! window force an emergency close; the trailing stop never activates on a
//! losing position.

mod common;

use chrono::Duration;

use common::{long_signal, make_loop, permissive_limits, QueueStrategy};
use helm_exit::{
    AdverseMovementParams, ExitRuleEntry, ExitRuleKind, TrailingStopParams,
};
use helm_schemas::{to_micros, Timeframe};
use helm_testkit::{bars_from_closes, base_time, MockBroker};

fn exits() -> Vec<ExitRuleEntry> {
    vec![
        ExitRuleEntry {
            enabled: true,
            kind: ExitRuleKind::AdverseMovement(AdverseMovementParams {
                threshold_pct: 1.0,
                window_seconds: 60,
                consecutive_ticks: 3,
                cooldown_seconds: 300,
                ..AdverseMovementParams::default()
            }),
        },
        ExitRuleEntry {
            enabled: true,
            kind: ExitRuleKind::TrailingStop(TrailingStopParams::default()),
        },
    ]
}

#[test]
fn three_adverse_ticks_force_emergency_close() {
    let bars = bars_from_closes(base_time(), Timeframe::M1, &[100.0, 100.0]);
    let broker = MockBroker::new("EURUSD", Timeframe::M1, bars);
    let strategy = QueueStrategy::new(vec![long_signal("s1", 100.0, Some(99.0), None)]);
    let mut harness = make_loop(
        broker,
        Box::new(strategy),
        permissive_limits(),
        exits(),
        false,
    );

    // Entry at 100.00.
    let report = harness.tick();
    let ticket = report.entry_ticket.expect("entry filled");

    // Three intra-bar adverse marks, ten seconds apart. The first two
    // confirm nothing; the third completes the run and breaches −1%.
    let t0 = base_time();
    for (i, (price, secs)) in [(99.5, 10), (99.2, 20), (98.9, 30)].iter().enumerate() {
        let session = harness.control.session_mut();
        session.set_mark_price(to_micros(*price));
        session.set_server_time(t0 + Duration::seconds(*secs));
        let report = harness.tick();
        if i < 2 {
            assert!(report.exits.is_empty(), "no exit before confirmation");
        } else {
            assert_eq!(
                report.exits,
                vec![(ticket, "adverse_movement".to_string())],
                "third adverse observation fires the emergency exit"
            );
        }
    }

    assert!(harness.control.tracker().is_empty());

    // One trade row, closed near 98.90, with the adverse reason code.
    let trades = harness.stream_rows("trades");
    assert_eq!(trades.len(), 1);
    assert_eq!(trades[0]["exit_reason"], "adverse_movement");
    assert_eq!(trades[0]["exit_price_micros"], 98_900_000);
    assert_eq!(trades[0]["profit_micros"], -55_000); // −1.10 × 0.05

    // The trailing stop never activated: no scratch outlived the close, and
    // none was created for a position that was never in profit.
    assert!(harness.control.arbiter().scratch_tickets().is_empty());
}
