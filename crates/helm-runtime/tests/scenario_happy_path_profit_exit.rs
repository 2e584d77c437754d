//! Happy path: one long entry sized off the stop distance, price runs up,
//! the profit target closes the position, and the books balance.

mod common;

use common::{long_signal, make_loop, permissive_limits, QueueStrategy, MAGIC};
use helm_exit::{ExitRuleEntry, ExitRuleKind, ProfitTargetParams};
use helm_schemas::Timeframe;
use helm_testkit::{bars_from_closes, base_time, MockBroker};

fn profit_target_2pct() -> Vec<ExitRuleEntry> {
    vec![ExitRuleEntry {
        enabled: true,
        kind: ExitRuleKind::ProfitTarget(ProfitTargetParams {
            target_pct: 2.0,
            ..ProfitTargetParams::default()
        }),
    }]
}

#[test]
fn entry_runs_to_profit_target_and_closes() {
    let bars = bars_from_closes(
        base_time(),
        Timeframe::M1,
        &[100.0, 101.0, 102.0, 102.0],
    );
    let broker = MockBroker::new("EURUSD", Timeframe::M1, bars);

    let strategy = QueueStrategy::new(vec![long_signal("s1", 100.0, Some(99.0), Some(102.0))]);
    let mut harness = make_loop(
        broker,
        Box::new(strategy),
        permissive_limits(),
        profit_target_2pct(),
        false,
    );

    // Tick 1: reconcile (clean), entry fills at 100.00 sized to 0.05 lots.
    let report = harness.tick();
    assert!(report.connected);
    assert!(report.reconciled);
    assert_eq!(report.signal_id.as_deref(), Some("s1"));
    let ticket = report.entry_ticket.expect("entry filled");
    assert_eq!(harness.control.tracker().len(), 1);
    let record = harness.control.tracker().get(ticket).unwrap();
    assert_eq!(record.volume_micros, 50_000, "risk gate sizes to 0.05 lots");
    assert_eq!(record.open_price_micros, 100_000_000);

    // Tick 2: +1% — target not reached yet.
    harness.control.session_mut().advance_bar();
    let report = harness.tick();
    assert!(report.exits.is_empty());
    assert_eq!(harness.control.tracker().len(), 1);

    // Tick 3: +2% — profit target fires, full close at 102.00.
    harness.control.session_mut().advance_bar();
    let report = harness.tick();
    assert_eq!(report.exits, vec![(ticket, "profit_target".to_string())]);
    assert!(harness.control.tracker().is_empty(), "tracker must be empty");

    // Exactly one trade row with the expected realised profit (+0.10).
    let trades = harness.stream_rows("trades");
    assert_eq!(trades.len(), 1);
    assert_eq!(trades[0]["ticket"], ticket);
    assert_eq!(trades[0]["volume_micros"], 50_000);
    assert_eq!(trades[0]["profit_micros"], 100_000);
    assert_eq!(trades[0]["exit_price_micros"], 102_000_000);
    assert_eq!(trades[0]["exit_reason"], "profit_target");
    assert_eq!(trades[0]["external"], false);

    // The signal was journaled as executed, and exactly one broker order
    // ever carried the entry tag.
    let signals = harness.stream_rows("signals");
    assert_eq!(signals.len(), 1);
    assert_eq!(signals[0]["executed"], true);
    assert_eq!(harness.control.session().orders_for_tag("sig:s1"), 1);
}

#[test]
fn no_new_bar_suppresses_strategy_but_not_exits() {
    let bars = bars_from_closes(base_time(), Timeframe::M1, &[100.0, 100.2]);
    let broker = MockBroker::new("EURUSD", Timeframe::M1, bars);
    let strategy = QueueStrategy::new(vec![
        long_signal("s1", 100.0, Some(99.0), None),
        long_signal("s2", 100.0, Some(99.0), None),
    ]);
    let mut harness = make_loop(
        broker,
        Box::new(strategy),
        permissive_limits(),
        profit_target_2pct(),
        false,
    );

    // Tick 1 consumes s1.
    let report = harness.tick();
    assert!(report.new_bar);
    assert_eq!(report.signal_id.as_deref(), Some("s1"));

    // Tick 2 with no new bar: the strategy must not even be consulted, so
    // s2 stays queued and no order is placed.
    let report = harness.tick();
    assert!(!report.new_bar);
    assert!(report.signal_id.is_none());
    assert_eq!(harness.control.session().submit_count(), 1);
    assert_eq!(harness.control.tracker().len(), 1, "position still managed");

    // Tick 3 with a new bar consumes s2 (refused by nothing — second
    // position allowed by the permissive caps).
    harness.control.session_mut().advance_bar();
    let report = harness.tick();
    assert_eq!(report.signal_id.as_deref(), Some("s2"));
}
