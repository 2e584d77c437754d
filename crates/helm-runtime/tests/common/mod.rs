//! Shared harness for control-loop scenario tests: a scripted strategy, a
//! mock-broker loop builder, and journal readers.
#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use std::time::Duration;

use chrono::{TimeZone, Utc};
use uuid::Uuid;

use helm_broker::retry::RetryPolicy;
use helm_execution::{ExecutionConfig, ExecutionEngine};
use helm_exit::{ExitArbiter, ExitRuleEntry};
use helm_feed::{FeatureRow, IndicatorPipeline, IndicatorSpec};
use helm_persist::{Journal, JournalConfig};
use helm_position::{AdoptionPolicy, PositionTracker};
use helm_risk::{RiskGate, RiskLimits};
use helm_runtime::{ControlLoop, LoopConfig};
use helm_schemas::{to_micros, Metadata, Signal, SignalSide, Timeframe};
use helm_strategy::Strategy;
use helm_testkit::MockBroker;

pub const MAGIC: i64 = 7;

/// Emits the queued signals, one per new closed bar, then stays quiet.
pub struct QueueStrategy {
    pub signals: VecDeque<Signal>,
}

impl QueueStrategy {
    pub fn new(signals: Vec<Signal>) -> Self {
        Self {
            signals: signals.into(),
        }
    }

    pub fn empty() -> Self {
        Self {
            signals: VecDeque::new(),
        }
    }
}

impl Strategy for QueueStrategy {
    fn name(&self) -> &str {
        "scripted_queue"
    }
    fn required_indicators(&self) -> Vec<IndicatorSpec> {
        Vec::new()
    }
    fn on_bar(&mut self, _row: &FeatureRow) -> Option<Signal> {
        self.signals.pop_front()
    }
}

/// Re-emits the same signal on every bar — the misbehaving-strategy case.
pub struct RepeatStrategy(pub Signal);

impl Strategy for RepeatStrategy {
    fn name(&self) -> &str {
        "scripted_repeat"
    }
    fn required_indicators(&self) -> Vec<IndicatorSpec> {
        Vec::new()
    }
    fn on_bar(&mut self, _row: &FeatureRow) -> Option<Signal> {
        Some(self.0.clone())
    }
}

pub fn long_signal(id: &str, price: f64, stop: Option<f64>, take_profit: Option<f64>) -> Signal {
    Signal {
        id: id.to_string(),
        emitted_at: Utc.with_ymd_and_hms(2024, 3, 4, 9, 0, 0).unwrap(),
        symbol: "EURUSD".to_string(),
        side: SignalSide::Long,
        reference_price_micros: to_micros(price),
        stop_micros: stop.map(to_micros),
        take_profit_micros: take_profit.map(to_micros),
        confidence: 0.7,
        strategy: "scripted".to_string(),
        metadata: Metadata::new(),
    }
}

/// Limits loose enough that only the knob under test bites.
pub fn permissive_limits() -> RiskLimits {
    RiskLimits {
        max_volume_per_order_micros: 1_000_000,
        default_volume_micros: 50_000, // 0.05 lots
        max_daily_loss_micros: 0,
        max_positions_per_symbol: 3,
        max_total_positions: 5,
        position_size_pct_micros: 5, // sizes 10 000.00 × 0.0005% / 1.00 = 0.05
        emergency_drawdown_pct_micros: 0,
        circuit_breaker_enabled: true,
        min_risk_reward_micros: 0,
    }
}

pub fn loop_config() -> LoopConfig {
    LoopConfig {
        symbol: "EURUSD".to_string(),
        timeframe: Timeframe::M1,
        poll_interval: Duration::from_secs(60),
        lookback_bars: 20,
        magic_tag: MAGIC,
        metrics_every_ticks: 0,
        flatten_on_shutdown: false,
        shutdown_grace: Duration::from_secs(5),
        reconnect: RetryPolicy::new(1, Duration::ZERO, Duration::ZERO),
        max_connect_failure_ticks: 10,
        dry_run: false,
    }
}

pub struct Harness {
    pub control: ControlLoop<MockBroker>,
    pub journal_dir: tempfile::TempDir,
    pub shutdown: Arc<AtomicBool>,
}

pub fn make_loop(
    broker: MockBroker,
    strategy: Box<dyn Strategy>,
    limits: RiskLimits,
    exits: Vec<ExitRuleEntry>,
    dry_run: bool,
) -> Harness {
    let journal_dir = tempfile::tempdir().expect("tempdir");
    let journal_path = journal_dir.path().join("journal.jsonl");
    let now = Utc.with_ymd_and_hms(2024, 3, 4, 9, 0, 0).unwrap();
    let journal = Journal::open(
        JournalConfig::new(&journal_path),
        Uuid::new_v4(),
        "test-config-hash",
        now,
    )
    .expect("open journal");

    let mut exec_cfg = ExecutionConfig::with_defaults(MAGIC);
    exec_cfg.fill_timeout_ms = 20;
    exec_cfg.fill_poll_interval_ms = 0;
    exec_cfg.dry_run = dry_run;

    let mut cfg = loop_config();
    cfg.dry_run = dry_run;

    let arbiter = ExitArbiter::from_entries(&exits).expect("exit rules");
    let shutdown = Arc::new(AtomicBool::new(false));

    let control = ControlLoop::new(
        broker,
        cfg,
        strategy,
        IndicatorPipeline::new(vec![]),
        RiskGate::new(limits),
        ExecutionEngine::new(exec_cfg),
        PositionTracker::new(MAGIC, AdoptionPolicy::adopt_all()),
        arbiter,
        journal,
        shutdown.clone(),
    );

    Harness {
        control,
        journal_dir,
        shutdown,
    }
}

impl Harness {
    /// Drop the loop and keep the broker — simulates a process restart over
    /// unchanged broker state.
    pub fn into_broker(self) -> MockBroker {
        self.control.into_session()
    }

    /// One tick at the broker's current server time.
    pub fn tick(&mut self) -> helm_runtime::TickReport {
        let now = self.control.session().server_time();
        self.control.tick(now)
    }

    pub fn journal_lines(&mut self) -> Vec<serde_json::Value> {
        // Everything buffered must be visible to assertions.
        let path = self.journal_dir.path().join("journal.jsonl");
        std::fs::read_to_string(path)
            .unwrap_or_default()
            .lines()
            .map(|l| serde_json::from_str(l).expect("journal line is JSON"))
            .collect()
    }

    pub fn stream_rows(&mut self, stream: &str) -> Vec<serde_json::Value> {
        self.journal_lines()
            .into_iter()
            .filter(|l| l["stream"] == stream)
            .map(|l| l["payload"].clone())
            .collect()
    }
}
