//! Reconcile scenarios: adoption of orphan broker positions under the
//! configured policy, refresh of known tickets, and drop of tickets the
//! broker no longer reports.

use chrono::Duration;

use helm_broker::{BrokerPosition, BrokerSession};
use helm_position::{AdoptionPolicy, PositionTracker};
use helm_schemas::{PositionOrigin, PositionSide, Timeframe};
use helm_testkit::{bars_from_closes, base_time, MockBroker};

const MAGIC: i64 = 7;

fn broker() -> MockBroker {
    let bars = bars_from_closes(base_time(), Timeframe::M1, &[100.0, 100.5, 101.0]);
    let mut b = MockBroker::new("EURUSD", Timeframe::M1, bars);
    b.connect().unwrap();
    b
}

fn orphan(ticket: i64, age_hours: i64) -> BrokerPosition {
    BrokerPosition {
        ticket,
        symbol: "EURUSD".to_string(),
        side: PositionSide::Long,
        volume_micros: 50_000,
        open_price_micros: 99_500_000,
        open_time: base_time() - Duration::hours(age_hours),
        current_price_micros: 100_000_000,
        unrealised_pnl_micros: 25_000,
        stop_micros: None,
        take_profit_micros: None,
        commission_micros: 0,
        swap_micros: 0,
        magic_tag: MAGIC,
        client_tag: None,
    }
}

fn policy_with_age(max_age_hours: i64) -> AdoptionPolicy {
    let mut policy = AdoptionPolicy::adopt_all();
    policy.max_age_hours = max_age_hours;
    policy
}

#[test]
fn orphan_with_magic_tag_is_adopted_with_adopted_origin() {
    let mut broker = broker();
    // Opened 2 h ago by a previous process run; policy allows up to 72 h.
    broker.seed_position(orphan(501, 2));

    let mut tracker = PositionTracker::new(MAGIC, policy_with_age(72));
    let report = tracker.reconcile(&mut broker, base_time()).unwrap();

    assert_eq!(report.adopted, vec![501]);
    let record = tracker.get(501).expect("adopted position is tracked");
    assert_eq!(record.origin, PositionOrigin::Adopted);
    assert_eq!(record.first_seen, base_time());
    assert_eq!(record.volume_micros, 50_000);
}

#[test]
fn orphan_older_than_max_age_is_reported_not_adopted() {
    let mut broker = broker();
    broker.seed_position(orphan(502, 100));

    let mut tracker = PositionTracker::new(MAGIC, policy_with_age(72));
    let report = tracker.reconcile(&mut broker, base_time()).unwrap();

    assert!(report.adopted.is_empty());
    assert_eq!(report.orphans_skipped, vec![(502, "too_old")]);
    assert!(tracker.is_empty());
}

#[test]
fn deny_listed_symbol_is_never_adopted() {
    let mut broker = broker();
    broker.seed_position(orphan(503, 1));

    let mut policy = AdoptionPolicy::adopt_all();
    policy.ignore_symbols.insert("EURUSD".to_string());
    let mut tracker = PositionTracker::new(MAGIC, policy);
    let report = tracker.reconcile(&mut broker, base_time()).unwrap();

    assert_eq!(report.orphans_skipped, vec![(503, "symbol_ignored")]);
    assert!(tracker.is_empty());
}

#[test]
fn log_only_mode_reports_orphans_without_ownership() {
    let mut broker = broker();
    broker.seed_position(orphan(504, 1));

    let mut policy = AdoptionPolicy::adopt_all();
    policy.log_only = true;
    let mut tracker = PositionTracker::new(MAGIC, policy);
    let report = tracker.reconcile(&mut broker, base_time()).unwrap();

    assert_eq!(report.orphans_skipped, vec![(504, "log_only")]);
    assert!(tracker.is_empty());
}

#[test]
fn reconcile_matches_tracker_to_broker_book() {
    // After a clean reconcile, tracker tickets == broker tickets (magic tag).
    let mut broker = broker();
    broker.seed_position(orphan(505, 1));
    broker.seed_position(orphan(506, 2));

    let mut tracker = PositionTracker::new(MAGIC, AdoptionPolicy::adopt_all());
    tracker.reconcile(&mut broker, base_time()).unwrap();

    let tracked: Vec<i64> = tracker.positions().keys().copied().collect();
    assert_eq!(tracked, broker.open_tickets());

    // Broker-side close of 505: next reconcile drops it and converges again.
    broker.remove_position(505);
    let report = tracker.reconcile(&mut broker, base_time()).unwrap();
    assert_eq!(report.dropped.len(), 1);
    assert_eq!(report.dropped[0].ticket, 505);
    assert!(report.dropped[0].external);

    let tracked: Vec<i64> = tracker.positions().keys().copied().collect();
    assert_eq!(tracked, broker.open_tickets());
}

#[test]
fn foreign_magic_positions_are_invisible() {
    let mut broker = broker();
    let mut foreign = orphan(507, 1);
    foreign.magic_tag = 999;
    broker.seed_position(foreign);

    let mut tracker = PositionTracker::new(MAGIC, AdoptionPolicy::adopt_all());
    let report = tracker.reconcile(&mut broker, base_time()).unwrap();
    assert!(report.is_quiet());
    assert!(tracker.is_empty());
}
