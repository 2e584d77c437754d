use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{bail, Context, Result};
use chrono::{DateTime, Utc};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use helm_broker::retry::{with_retry, RetryPolicy};
use helm_broker::BrokerSession;
use helm_config::Config;
use helm_execution::{ExecutionConfig, ExecutionEngine};
use helm_exit::{EvalContext, ExitArbiter};
use helm_feed::{BarFeed, FeatureRow, IndicatorPipeline, IndicatorSpec};
use helm_persist::{Journal, JournalConfig, MetricsCollector, OrderRow, SignalRow, TradeRow};
use helm_position::{CloseOutcome, ClosedPosition, PositionTracker};
use helm_risk::{PositionExposure, RiskGate, RiskVerdict};
use helm_schemas::{to_micros, AccountSnapshot, Signal, Timeframe};
use helm_strategy::{validate_signal, Strategy};

use crate::{Phase, TickReport};

/// ATR period used as the exit rules' volatility proxy.
const EXIT_ATR_PERIOD: usize = 14;

#[derive(Clone, Debug)]
pub struct LoopConfig {
    pub symbol: String,
    pub timeframe: Timeframe,
    pub poll_interval: Duration,
    pub lookback_bars: usize,
    pub magic_tag: i64,
    /// Emit a metrics sample every N ticks.
    pub metrics_every_ticks: u64,
    pub flatten_on_shutdown: bool,
    pub shutdown_grace: Duration,
    pub reconnect: RetryPolicy,
    /// Fatal after this many consecutive ticks without a connection.
    pub max_connect_failure_ticks: u32,
    pub dry_run: bool,
}

/// Final accounting returned by `run`.
#[derive(Clone, Debug)]
pub struct LoopSummary {
    pub ticks: u64,
    /// Tickets still open after the shutdown grace period.
    pub left_open: Vec<i64>,
}

/// The top-level scheduler. Owns every stateful component for the process
/// lifetime; all mutation happens on this single writer.
pub struct ControlLoop<S: BrokerSession> {
    session: S,
    feed: BarFeed,
    pipeline: IndicatorPipeline,
    strategy: Box<dyn Strategy>,
    risk: RiskGate,
    engine: ExecutionEngine,
    tracker: PositionTracker,
    arbiter: ExitArbiter,
    journal: Journal,
    metrics: MetricsCollector,
    cfg: LoopConfig,
    atr_column: String,
    tick_count: u64,
    /// Entries are gated until the next successful reconcile.
    needs_reconcile: bool,
    /// Latched by emergency drawdown: no further entries, loop keeps
    /// monitoring.
    entries_halted: bool,
    connect_failure_ticks: u32,
    shutdown: Arc<AtomicBool>,
}

impl<S: BrokerSession> ControlLoop<S> {
    /// Wire every component from a validated config. The session arrives
    /// already constructed (live, paper, or mock) but not yet connected.
    pub fn from_config(
        config: &Config,
        session: S,
        shutdown: Arc<AtomicBool>,
        run_id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<Self> {
        let strategy = config.strategy.build(&config.trading.symbol);

        let mut pipeline = IndicatorPipeline::new(config.indicators.clone());
        for spec in strategy.required_indicators() {
            pipeline.ensure(spec);
        }
        let atr_spec = IndicatorSpec::Atr {
            period: EXIT_ATR_PERIOD,
        };
        let atr_column = atr_spec.column();
        pipeline.ensure(atr_spec);

        let arbiter = ExitArbiter::from_entries(&config.exit_strategies)
            .context("exit strategy construction")?;

        let mut exec_cfg = ExecutionConfig::with_defaults(config.trading.magic_tag);
        exec_cfg.deviation_points = config.trading.deviation_points;
        exec_cfg.dry_run = config.dry_run;

        let journal = Journal::open(
            JournalConfig::new(&config.persistence_path),
            run_id,
            &config.config_hash,
            now,
        )
        .context("open journal")?;

        let cfg = LoopConfig {
            symbol: config.trading.symbol.clone(),
            timeframe: config.trading.timeframe,
            poll_interval: Duration::from_secs(config.trading.poll_interval_seconds),
            lookback_bars: config.trading.lookback_bars,
            magic_tag: config.trading.magic_tag,
            metrics_every_ticks: 100,
            flatten_on_shutdown: config.shutdown.flatten_on_shutdown,
            shutdown_grace: Duration::from_secs(config.shutdown.grace_seconds),
            reconnect: RetryPolicy::new(
                config.broker.max_retries.max(1),
                Duration::from_millis(config.broker.retry_delay_ms),
                Duration::from_secs(60),
            ),
            max_connect_failure_ticks: 10,
            dry_run: config.dry_run,
        };

        Ok(Self {
            feed: BarFeed::new(&config.trading.symbol, config.trading.timeframe, config.trading.lookback_bars),
            pipeline,
            strategy,
            risk: RiskGate::new(config.risk.clone()),
            engine: ExecutionEngine::new(exec_cfg),
            tracker: PositionTracker::new(config.trading.magic_tag, config.orphan_trades.clone()),
            arbiter,
            journal,
            metrics: MetricsCollector::new(),
            session,
            cfg,
            atr_column,
            tick_count: 0,
            needs_reconcile: true,
            entries_halted: false,
            connect_failure_ticks: 0,
            shutdown,
        })
    }

    /// Construct with explicit components (tests and the manual CLI).
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        session: S,
        cfg: LoopConfig,
        strategy: Box<dyn Strategy>,
        pipeline: IndicatorPipeline,
        risk: RiskGate,
        engine: ExecutionEngine,
        tracker: PositionTracker,
        arbiter: ExitArbiter,
        journal: Journal,
        shutdown: Arc<AtomicBool>,
    ) -> Self {
        let atr_spec = IndicatorSpec::Atr {
            period: EXIT_ATR_PERIOD,
        };
        let atr_column = atr_spec.column();
        let mut pipeline = pipeline;
        pipeline.ensure(atr_spec);
        for spec in strategy.required_indicators() {
            pipeline.ensure(spec);
        }
        Self {
            feed: BarFeed::new(&cfg.symbol, cfg.timeframe, cfg.lookback_bars),
            pipeline,
            strategy,
            risk,
            engine,
            tracker,
            arbiter,
            journal,
            metrics: MetricsCollector::new(),
            session,
            cfg,
            atr_column,
            tick_count: 0,
            needs_reconcile: true,
            entries_halted: false,
            connect_failure_ticks: 0,
            shutdown,
        }
    }

    pub fn tracker(&self) -> &PositionTracker {
        &self.tracker
    }

    pub fn session(&self) -> &S {
        &self.session
    }

    pub fn session_mut(&mut self) -> &mut S {
        &mut self.session
    }

    /// Tear down the loop and hand the session back (restart scenarios).
    pub fn into_session(self) -> S {
        self.session
    }

    pub fn risk(&self) -> &RiskGate {
        &self.risk
    }

    pub fn arbiter(&self) -> &ExitArbiter {
        &self.arbiter
    }

    pub fn entries_halted(&self) -> bool {
        self.entries_halted
    }

    fn stop_requested(&self) -> bool {
        self.shutdown.load(Ordering::Relaxed)
    }

    // -----------------------------------------------------------------
    // The loop
    // -----------------------------------------------------------------

    /// Drive ticks until a stop signal or a fatal condition, then run the
    /// shutdown sequence.
    pub fn run(&mut self) -> Result<LoopSummary> {
        info!(
            symbol = %self.cfg.symbol,
            timeframe = %self.cfg.timeframe,
            poll_interval_secs = self.cfg.poll_interval.as_secs(),
            dry_run = self.cfg.dry_run,
            "control loop starting"
        );

        while !self.stop_requested() {
            let started = Instant::now();
            let report = self.tick(Utc::now());
            debug!(
                tick = report.tick,
                duration_ms = started.elapsed().as_millis() as u64,
                faults = report.faults.len(),
                "tick complete"
            );

            if self.connect_failure_ticks >= self.cfg.max_connect_failure_ticks {
                self.shutdown_sequence()?;
                bail!(
                    "broker unreachable for {} consecutive ticks",
                    self.connect_failure_ticks
                );
            }

            let elapsed = started.elapsed();
            let mut remaining = self.cfg.poll_interval.saturating_sub(elapsed);
            while !remaining.is_zero() && !self.stop_requested() {
                let slice = remaining.min(Duration::from_millis(250));
                std::thread::sleep(slice);
                remaining = remaining.saturating_sub(slice);
            }
        }

        self.shutdown_sequence()
    }

    /// One tick. Public so scenario tests can drive the loop directly with a
    /// controlled clock.
    pub fn tick(&mut self, now: DateTime<Utc>) -> TickReport {
        self.tick_count += 1;
        let mut report = TickReport::new(self.tick_count);

        // Phase 1: health probe / reconnect. Failure skips everything else.
        let Some(account) = self.phase_health(&mut report) else {
            return report;
        };
        self.connect_failure_ticks = 0;
        report.connected = true;

        self.risk.observe_account(&account);
        self.check_emergency_drawdown(&account, now, &mut report);

        // Full reconcile before anything else whenever the session was
        // (re)established. Entries stay gated until it succeeds.
        if self.needs_reconcile {
            self.phase_reconcile(now, &mut report);
        }

        if self.stop_requested() {
            return report;
        }

        // Phase 2: bars.
        let update = match self.feed.pull(&mut self.session) {
            Ok(u) => Some(u),
            Err(e) => {
                warn!(error = %e, "bar fetch failed");
                report.fault(Phase::Bars, e.to_string());
                None
            }
        };
        report.new_bar = update.as_ref().map(|u| u.new_bar).unwrap_or(false);

        // Phase 3: indicators (per-column fault isolation happens inside).
        let row: Option<FeatureRow> = update
            .as_ref()
            .and_then(|u| self.pipeline.feature_row(&u.window));
        let atr_micros = row
            .as_ref()
            .and_then(|r| r.feature(&self.atr_column))
            .map(to_micros);

        // Phases 4–5: entry logic only on a new closed bar, never while a
        // reconcile is pending, never after an emergency halt.
        if report.new_bar && !self.needs_reconcile && !self.entries_halted && !self.stop_requested()
        {
            if let Some(row) = &row {
                self.phase_entry(row, &account, now, &mut report);
            }
        } else if report.new_bar {
            debug!(
                reconcile_pending = self.needs_reconcile,
                entries_halted = self.entries_halted,
                "entry phases skipped"
            );
        }

        // Phase 6: refresh tracked positions from the broker.
        let mark = update
            .as_ref()
            .and_then(|u| u.window.last())
            .map(|b| b.close_micros);
        self.phase_monitor(mark, now, &mut report);

        // Phase 7: exit arbitration, evaluated on every tick.
        self.phase_exits(&account, atr_micros, now, &mut report);

        // Phase 8: housekeeping.
        self.phase_housekeeping(now, &mut report);

        report
    }

    // -----------------------------------------------------------------
    // Phases
    // -----------------------------------------------------------------

    fn phase_health(&mut self, report: &mut TickReport) -> Option<AccountSnapshot> {
        if !self.session.is_connected() {
            warn!("broker session down, attempting reconnect");
            let policy = self.cfg.reconnect;
            let outcome = with_retry(&policy, "reconnect", || self.session.connect());
            match outcome {
                Ok(()) => {
                    info!("reconnected to broker");
                    self.needs_reconcile = true;
                }
                Err(e) => {
                    self.connect_failure_ticks += 1;
                    error!(
                        error = %e,
                        consecutive = self.connect_failure_ticks,
                        "reconnect failed"
                    );
                    report.fault(Phase::Health, e.to_string());
                    return None;
                }
            }
        }

        match self.session.health() {
            Ok(health) if !health.connected => {
                warn!("health probe reports a dead terminal link");
                report.fault(Phase::Health, "terminal link down".to_string());
                self.session.disconnect();
                self.needs_reconcile = true;
                return None;
            }
            Ok(health) => {
                if !health.trading_allowed {
                    debug!("health probe: trading disabled on account");
                }
            }
            Err(e) => {
                warn!(error = %e, "health probe failed");
                report.fault(Phase::Health, e.to_string());
                self.needs_reconcile = true;
                return None;
            }
        }

        match self.session.account() {
            Ok(account) => Some(account),
            Err(e) => {
                warn!(error = %e, "account probe failed");
                report.fault(Phase::Health, e.to_string());
                // Treat as connection trouble: force a reconcile once healthy.
                self.needs_reconcile = true;
                None
            }
        }
    }

    fn check_emergency_drawdown(
        &mut self,
        _account: &AccountSnapshot,
        now: DateTime<Utc>,
        report: &mut TickReport,
    ) {
        if !self.risk.emergency_latched() || self.entries_halted {
            return;
        }
        error!("emergency drawdown breached: flattening and halting entries");
        self.entries_halted = true;
        let outcomes =
            self.tracker
                .close_all(&mut self.session, &mut self.engine, "emergency_drawdown", now);
        for outcome in outcomes {
            self.settle_close(outcome, now, report);
        }
    }

    fn phase_reconcile(&mut self, now: DateTime<Utc>, report: &mut TickReport) {
        // Re-seed the execution engine's idempotency cache from the broker's
        // open orders first, so re-emitted signals map onto existing fills.
        match self.session.open_positions(self.cfg.magic_tag) {
            Ok(live) => self.engine.reseed_from_positions(&live),
            Err(e) => {
                report.fault(Phase::Reconcile, e.to_string());
                return;
            }
        }

        match self.tracker.reconcile(&mut self.session, now) {
            Ok(rec) => {
                if !rec.is_quiet() {
                    info!(
                        adopted = rec.adopted.len(),
                        refreshed = rec.refreshed.len(),
                        dropped = rec.dropped.len(),
                        orphans_skipped = rec.orphans_skipped.len(),
                        "reconcile complete"
                    );
                }
                for dropped in rec.dropped {
                    self.record_closed(&dropped, now);
                    self.arbiter.forget(dropped.ticket);
                    report.external_closes.push(dropped.ticket);
                }
                self.needs_reconcile = false;
                report.reconciled = true;
            }
            Err(e) => {
                error!(error = %e, "reconcile failed; entries stay gated");
                report.fault(Phase::Reconcile, e.to_string());
            }
        }
    }

    fn phase_entry(
        &mut self,
        row: &FeatureRow,
        account: &AccountSnapshot,
        now: DateTime<Utc>,
        report: &mut TickReport,
    ) {
        // Phase 4: ask the strategy.
        let Some(signal) = self.strategy.on_bar(row) else {
            return;
        };
        report.signal_id = Some(signal.id.clone());
        info!(
            signal = %signal.id,
            side = %signal.side,
            confidence = signal.confidence,
            "signal generated"
        );
        if !signal.side.is_directional() {
            return;
        }
        if let Err(flaw) = validate_signal(&signal) {
            error!(signal = %signal.id, error = %flaw, "signal failed validation");
            report.fault(Phase::Strategy, flaw.to_string());
            return;
        }

        // Phase 5: risk gate, then execution.
        let spec = match self.session.symbol_spec(&signal.symbol) {
            Ok(spec) => spec,
            Err(e) => {
                report.fault(Phase::Entry, e.to_string());
                return;
            }
        };
        let exposure = PositionExposure {
            for_symbol: self.tracker.count_for_symbol(&signal.symbol),
            total: self.tracker.len(),
        };
        let verdict = self
            .risk
            .evaluate(&signal, account, &exposure, spec.volume_min_micros);

        match verdict {
            RiskVerdict::Refused { code, message } => {
                info!(code = code.code_str(), message, "entry refused");
                report.refusal = Some(code);
                self.journal_signal(&signal, false, None, now);
            }
            RiskVerdict::Approved { volume_micros } => {
                let request = self.engine.build_entry_request(&signal, volume_micros, &spec);
                let outcome = self.engine.submit(&mut self.session, &request, now);
                if let Err(e) = self.journal.record_order(
                    &OrderRow {
                        request: request.clone(),
                        outcome: outcome.clone(),
                    },
                    now,
                ) {
                    report.fault(Phase::Entry, e.to_string());
                }

                match outcome.fill() {
                    Some(fill) => {
                        self.tracker
                            .register(&request, fill, signal.metadata.clone(), now);
                        report.entry_ticket = Some(fill.ticket);
                        self.journal_signal(&signal, true, Some(fill.ticket), now);
                    }
                    None => {
                        warn!(
                            signal = %signal.id,
                            outcome = outcome.label(),
                            "entry order did not fill"
                        );
                        self.journal_signal(&signal, false, None, now);
                    }
                }
            }
        }
    }

    fn phase_monitor(&mut self, mark: Option<i64>, now: DateTime<Utc>, report: &mut TickReport) {
        match self.tracker.monitor(&mut self.session, mark, now) {
            Ok(monitor) => {
                for closed in monitor.closed_externally {
                    self.record_closed(&closed, now);
                    self.arbiter.forget(closed.ticket);
                    report.external_closes.push(closed.ticket);
                }
            }
            Err(e) => {
                warn!(error = %e, "position monitor failed");
                report.fault(Phase::Monitor, e.to_string());
            }
        }
    }

    fn phase_exits(
        &mut self,
        account: &AccountSnapshot,
        atr_micros: Option<i64>,
        now: DateTime<Utc>,
        report: &mut TickReport,
    ) {
        if self.tracker.is_empty() || self.arbiter.is_empty() {
            return;
        }
        let ctx = EvalContext {
            now: account.server_time,
            account,
            atr_micros,
        };
        // Decisions are collected first, executed after the scan.
        let decisions = self.arbiter.evaluate(self.tracker.positions(), &ctx);

        for decision in decisions {
            info!(
                ticket = decision.ticket,
                rule = %decision.rule,
                reason = %decision.reason,
                "executing exit decision"
            );
            let outcome = self.tracker.close(
                &mut self.session,
                &mut self.engine,
                decision.ticket,
                decision.close_volume_micros,
                &decision.reason,
                now,
            );
            if let Some(closed) = outcome.closed_slice() {
                report.exits.push((closed.ticket, closed.reason.clone()));
            }
            self.settle_close(outcome, now, report);
        }
    }

    fn phase_housekeeping(&mut self, now: DateTime<Utc>, report: &mut TickReport) {
        if self.cfg.metrics_every_ticks > 0 && self.tick_count % self.cfg.metrics_every_ticks == 0 {
            let sample = self.metrics.sample(now);
            if let Err(e) = self.journal.record_metrics(&sample, now) {
                report.fault(Phase::Housekeeping, e.to_string());
            }
            self.metrics.log_summary(now);
            info!(
                open_positions = self.tracker.len(),
                opened_total = self.tracker.opened_total(),
                closed_total = self.tracker.closed_total(),
                unrealised = self.tracker.total_unrealised_micros(),
                realised_today = self.risk.realised_today_micros(),
                "position statistics"
            );
        }
        if let Err(e) = self.journal.flush() {
            error!(error = %e, "journal flush failed");
            report.fault(Phase::Housekeeping, e.to_string());
        }
    }

    // -----------------------------------------------------------------
    // Close bookkeeping shared by exits, flatten, and external closes
    // -----------------------------------------------------------------

    fn settle_close(&mut self, outcome: CloseOutcome, now: DateTime<Utc>, report: &mut TickReport) {
        match outcome {
            CloseOutcome::FullyClosed(closed) => {
                self.record_closed(&closed, now);
                self.arbiter.forget(closed.ticket);
            }
            CloseOutcome::PartiallyClosed { closed, .. } => {
                // Scratch survives: the remaining volume is still managed.
                self.record_closed(&closed, now);
            }
            CloseOutcome::Failed { ticket, outcome } => {
                error!(ticket, outcome = outcome.label(), "close failed");
                report.fault(Phase::Exits, format!("close of #{ticket} failed"));
            }
            CloseOutcome::UnknownTicket { ticket } => {
                error!(ticket, "close requested for untracked ticket");
                report.fault(Phase::Exits, format!("unknown ticket #{ticket}"));
            }
        }
    }

    /// Journal a trade row and feed risk + metrics accumulators.
    fn record_closed(&mut self, closed: &ClosedPosition, now: DateTime<Utc>) {
        self.risk.record_close(closed.realised_micros);
        self.metrics.record_trade(closed.realised_micros);
        let row = TradeRow {
            ticket: closed.ticket,
            symbol: closed.symbol.clone(),
            side: closed.side,
            volume_micros: closed.volume_micros,
            open_price_micros: closed.open_price_micros,
            open_time: closed.open_time,
            exit_price_micros: closed.exit_price_micros,
            exit_time: closed.exit_time,
            profit_micros: closed.realised_micros,
            commission_micros: closed.commission_micros,
            swap_micros: closed.swap_micros,
            exit_reason: closed.reason.clone(),
            external: closed.external,
            origin: closed.origin,
            metadata: closed.metadata.clone(),
        };
        if let Err(e) = self.journal.record_trade(&row, now) {
            error!(error = %e, ticket = closed.ticket, "trade journaling failed");
        }
    }

    fn journal_signal(
        &mut self,
        signal: &Signal,
        executed: bool,
        ticket: Option<i64>,
        now: DateTime<Utc>,
    ) {
        let row = SignalRow {
            signal: signal.clone(),
            executed,
            ticket,
        };
        if let Err(e) = self.journal.record_signal(&row, now) {
            error!(error = %e, signal = %signal.id, "signal journaling failed");
        }
    }

    // -----------------------------------------------------------------
    // Shutdown
    // -----------------------------------------------------------------

    /// Flatten (if configured), flush, disconnect — bounded by the grace
    /// period. Anything still open is reported as left open.
    fn shutdown_sequence(&mut self) -> Result<LoopSummary> {
        info!("shutdown sequence starting");
        let deadline = Instant::now() + self.cfg.shutdown_grace;
        let now = Utc::now();
        let mut report = TickReport::new(self.tick_count);

        if self.cfg.flatten_on_shutdown {
            let tickets: Vec<i64> = self.tracker.positions().keys().copied().collect();
            for ticket in tickets {
                if Instant::now() >= deadline {
                    warn!("shutdown grace period exhausted while flattening");
                    break;
                }
                let outcome = self.tracker.close(
                    &mut self.session,
                    &mut self.engine,
                    ticket,
                    None,
                    "shutdown",
                    now,
                );
                self.settle_close(outcome, now, &mut report);
            }
        }

        let left_open: Vec<i64> = self.tracker.positions().keys().copied().collect();
        for ticket in &left_open {
            warn!(ticket, "left_open: position still open at shutdown");
        }

        let sample = self.metrics.sample(now);
        if let Err(e) = self.journal.record_metrics(&sample, now) {
            error!(error = %e, "final metrics journaling failed");
        }
        self.metrics.log_summary(now);
        self.journal.flush().context("final journal flush")?;

        self.session.disconnect();
        info!(ticks = self.tick_count, left_open = left_open.len(), "control loop stopped");

        Ok(LoopSummary {
            ticks: self.tick_count,
            left_open,
        })
    }

    /// Public shutdown entry for callers that drive ticks manually.
    pub fn shutdown_now(&mut self) -> Result<LoopSummary> {
        self.shutdown.store(true, Ordering::Relaxed);
        self.shutdown_sequence()
    }
}

/// Convenience alias used by the CLI.
pub fn shutdown_flag() -> Arc<AtomicBool> {
    Arc::new(AtomicBool::new(false))
}
