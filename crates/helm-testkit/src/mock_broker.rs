use std::collections::BTreeMap;

use chrono::{DateTime, TimeZone, Utc};

use helm_broker::{
    BrokerError, BrokerPosition, BrokerSession, CloseRequest, HealthReport, SymbolSpec,
};
use helm_schemas::{
    mul_micros, AccountSnapshot, Bar, FillReport, OrderOutcome, OrderRequest, PositionSide,
    Timeframe,
};

/// Scripted deterministic broker for scenario tests.
///
/// Bars are pre-loaded; the scenario reveals them one at a time with
/// [`MockBroker::advance_bar`]. Orders fill immediately at the current mark
/// price (last visible close, unless overridden). Every submit is recorded
/// per client tag so tests can assert the at-most-one-order invariant.
pub struct MockBroker {
    symbol: String,
    timeframe: Timeframe,
    connected: bool,
    trading_enabled: bool,
    bars: Vec<Bar>,
    visible: usize,
    mark_override: Option<i64>,
    server_time_override: Option<DateTime<Utc>>,
    balance_micros: i64,
    realised_today_micros: i64,
    positions: BTreeMap<i64, BrokerPosition>,
    outcomes: BTreeMap<i64, OrderOutcome>,
    orders_by_tag: BTreeMap<String, u32>,
    next_ticket: i64,
    submit_count: usize,
    close_count: usize,
    fail_next_call: Option<BrokerError>,
    fail_next_positions: Option<BrokerError>,
    fail_next_bars: Option<BrokerError>,
}

impl MockBroker {
    pub fn new(symbol: impl Into<String>, timeframe: Timeframe, bars: Vec<Bar>) -> Self {
        Self {
            symbol: symbol.into(),
            timeframe,
            connected: false,
            trading_enabled: true,
            bars,
            visible: 1,
            mark_override: None,
            server_time_override: None,
            balance_micros: 10_000_000_000, // 10 000.00
            realised_today_micros: 0,
            positions: BTreeMap::new(),
            outcomes: BTreeMap::new(),
            orders_by_tag: BTreeMap::new(),
            next_ticket: 1_000,
            submit_count: 0,
            close_count: 0,
            fail_next_call: None,
            fail_next_positions: None,
            fail_next_bars: None,
        }
    }

    // -----------------------------------------------------------------
    // Scenario controls
    // -----------------------------------------------------------------

    /// Reveal the next scripted bar. Re-marks every open position.
    pub fn advance_bar(&mut self) {
        self.visible = (self.visible + 1).min(self.bars.len());
        self.mark_override = None;
        self.remark();
    }

    /// Override the mark price without revealing a new bar (intra-bar move).
    pub fn set_mark_price(&mut self, price_micros: i64) {
        self.mark_override = Some(price_micros);
        self.remark();
    }

    pub fn set_server_time(&mut self, t: DateTime<Utc>) {
        self.server_time_override = Some(t);
    }

    pub fn set_trading_enabled(&mut self, enabled: bool) {
        self.trading_enabled = enabled;
    }

    pub fn set_balance(&mut self, balance_micros: i64) {
        self.balance_micros = balance_micros;
    }

    /// Drop the connection; the next calls fail until `connect` again.
    pub fn force_disconnect(&mut self) {
        self.connected = false;
    }

    /// Fail exactly the next session call with the given error.
    pub fn fail_next_call(&mut self, error: BrokerError) {
        self.fail_next_call = Some(error);
    }

    /// Fail exactly the next `open_positions` call, leaving other calls
    /// untouched (reconcile-fault scenarios).
    pub fn fail_next_positions_call(&mut self, error: BrokerError) {
        self.fail_next_positions = Some(error);
    }

    /// Fail exactly the next `bars` call, leaving other calls untouched.
    pub fn fail_next_bars_call(&mut self, error: BrokerError) {
        self.fail_next_bars = Some(error);
    }

    /// Seed a pre-existing broker position (an orphan for adoption tests).
    pub fn seed_position(&mut self, position: BrokerPosition) {
        self.next_ticket = self.next_ticket.max(position.ticket + 1);
        self.positions.insert(position.ticket, position);
    }

    /// Remove a position broker-side without this process (external close).
    pub fn remove_position(&mut self, ticket: i64) {
        self.positions.remove(&ticket);
    }

    // -----------------------------------------------------------------
    // Observations
    // -----------------------------------------------------------------

    pub fn submit_count(&self) -> usize {
        self.submit_count
    }

    pub fn close_count(&self) -> usize {
        self.close_count
    }

    /// Broker orders ever created for a client tag (idempotency audits).
    pub fn orders_for_tag(&self, tag: &str) -> u32 {
        self.orders_by_tag.get(tag).copied().unwrap_or(0)
    }

    pub fn open_tickets(&self) -> Vec<i64> {
        self.positions.keys().copied().collect()
    }

    pub fn mark_price(&self) -> i64 {
        self.mark_override.unwrap_or_else(|| {
            self.bars
                .get(self.visible.saturating_sub(1))
                .map(|b| b.close_micros)
                .unwrap_or(0)
        })
    }

    pub fn server_time(&self) -> DateTime<Utc> {
        self.server_time_override.unwrap_or_else(|| {
            self.bars
                .get(self.visible.saturating_sub(1))
                .map(|b| b.open_time)
                .unwrap_or_else(|| Utc.with_ymd_and_hms(2024, 3, 4, 9, 0, 0).unwrap())
        })
    }

    fn remark(&mut self) {
        let mark = self.mark_price();
        for pos in self.positions.values_mut() {
            pos.current_price_micros = mark;
            let favourable = (mark - pos.open_price_micros) * pos.side.sign();
            pos.unrealised_pnl_micros = mul_micros(favourable, pos.volume_micros);
        }
    }

    fn take_scripted_failure(&mut self) -> Result<(), BrokerError> {
        if let Some(err) = self.fail_next_call.take() {
            return Err(err);
        }
        if !self.connected {
            return Err(BrokerError::NotConnected);
        }
        Ok(())
    }

    fn unrealised_total(&self) -> i64 {
        self.positions.values().map(|p| p.unrealised_pnl_micros).sum()
    }
}

impl BrokerSession for MockBroker {
    fn connect(&mut self) -> Result<(), BrokerError> {
        if let Some(err) = self.fail_next_call.take() {
            return Err(err);
        }
        self.connected = true;
        Ok(())
    }

    fn disconnect(&mut self) {
        self.connected = false;
    }

    fn is_connected(&self) -> bool {
        self.connected
    }

    fn health(&mut self) -> Result<HealthReport, BrokerError> {
        if let Some(err) = self.fail_next_call.take() {
            return Err(err);
        }
        Ok(HealthReport {
            connected: self.connected,
            trading_allowed: self.connected && self.trading_enabled,
            balance_micros: self.balance_micros,
            equity_micros: self.balance_micros + self.unrealised_total(),
        })
    }

    fn account(&mut self) -> Result<AccountSnapshot, BrokerError> {
        self.take_scripted_failure()?;
        let equity = self.balance_micros + self.unrealised_total();
        let margin_used: i64 = self
            .positions
            .values()
            .map(|p| mul_micros(p.open_price_micros, p.volume_micros) / 100)
            .sum();
        Ok(AccountSnapshot {
            balance_micros: self.balance_micros,
            equity_micros: equity,
            margin_used_micros: margin_used,
            margin_free_micros: equity - margin_used,
            realised_today_micros: self.realised_today_micros,
            trading_enabled: self.trading_enabled,
            server_time: self.server_time(),
        })
    }

    fn bars(
        &mut self,
        symbol: &str,
        timeframe: Timeframe,
        count: usize,
    ) -> Result<Vec<Bar>, BrokerError> {
        self.take_scripted_failure()?;
        if let Some(err) = self.fail_next_bars.take() {
            return Err(err);
        }
        if symbol != self.symbol {
            return Err(BrokerError::UnknownSymbol {
                symbol: symbol.to_string(),
            });
        }
        if timeframe != self.timeframe {
            return Err(BrokerError::Rejected {
                reason: "timeframe not scripted".to_string(),
            });
        }
        let end = self.visible.min(self.bars.len());
        let start = end.saturating_sub(count);
        Ok(self.bars[start..end].to_vec())
    }

    fn symbol_spec(&mut self, symbol: &str) -> Result<SymbolSpec, BrokerError> {
        if symbol != self.symbol {
            return Err(BrokerError::UnknownSymbol {
                symbol: symbol.to_string(),
            });
        }
        Ok(SymbolSpec {
            symbol: symbol.to_string(),
            digits: 2,
            point_micros: 10_000,
            volume_min_micros: 10_000,      // 0.01 lot
            volume_max_micros: 100_000_000, // 100 lots
            volume_step_micros: 10_000,
        })
    }

    fn open_positions(&mut self, magic_tag: i64) -> Result<Vec<BrokerPosition>, BrokerError> {
        self.take_scripted_failure()?;
        if let Some(err) = self.fail_next_positions.take() {
            return Err(err);
        }
        Ok(self
            .positions
            .values()
            .filter(|p| p.magic_tag == magic_tag)
            .cloned()
            .collect())
    }

    fn submit(&mut self, req: &OrderRequest) -> Result<OrderOutcome, BrokerError> {
        self.take_scripted_failure()?;
        self.submit_count += 1;
        *self.orders_by_tag.entry(req.client_tag.clone()).or_insert(0) += 1;

        if req.volume_micros <= 0 {
            return Ok(OrderOutcome::Rejected {
                reason: "invalid volume".to_string(),
            });
        }

        let price = req.limit_price_micros.unwrap_or_else(|| self.mark_price());
        let ticket = self.next_ticket;
        self.next_ticket += 1;
        let now = self.server_time();

        self.positions.insert(
            ticket,
            BrokerPosition {
                ticket,
                symbol: req.symbol.clone(),
                side: PositionSide::from_entry_order_side(req.side),
                volume_micros: req.volume_micros,
                open_price_micros: price,
                open_time: now,
                current_price_micros: price,
                unrealised_pnl_micros: 0,
                stop_micros: req.stop_micros,
                take_profit_micros: req.take_profit_micros,
                commission_micros: 0,
                swap_micros: 0,
                magic_tag: req.magic_tag,
                client_tag: Some(req.client_tag.clone()),
            },
        );

        let outcome = OrderOutcome::Filled(FillReport {
            ticket,
            price_micros: price,
            volume_micros: req.volume_micros,
            filled_at: now,
            commission_micros: 0,
            swap_micros: 0,
        });
        self.outcomes.insert(ticket, outcome.clone());
        Ok(outcome)
    }

    fn poll_order(&mut self, ticket: i64) -> Result<OrderOutcome, BrokerError> {
        self.take_scripted_failure()?;
        self.outcomes
            .get(&ticket)
            .cloned()
            .ok_or(BrokerError::UnknownTicket { ticket })
    }

    fn cancel_remainder(&mut self, ticket: i64) -> Result<OrderOutcome, BrokerError> {
        self.take_scripted_failure()?;
        self.outcomes
            .get(&ticket)
            .cloned()
            .ok_or(BrokerError::UnknownTicket { ticket })
    }

    fn close(&mut self, req: &CloseRequest) -> Result<OrderOutcome, BrokerError> {
        self.take_scripted_failure()?;
        self.close_count += 1;

        let (open_price, side, held) = match self.positions.get(&req.ticket) {
            Some(p) => (p.open_price_micros, p.side, p.volume_micros),
            None => return Err(BrokerError::UnknownTicket { ticket: req.ticket }),
        };
        if req.volume_micros <= 0 || req.volume_micros > held {
            return Ok(OrderOutcome::Rejected {
                reason: "close volume out of range".to_string(),
            });
        }

        let price = self.mark_price();
        let favourable = (price - open_price) * side.sign();
        let realised = mul_micros(favourable, req.volume_micros);

        if req.volume_micros == held {
            self.positions.remove(&req.ticket);
        } else if let Some(pos) = self.positions.get_mut(&req.ticket) {
            pos.volume_micros -= req.volume_micros;
            pos.unrealised_pnl_micros = mul_micros(favourable, pos.volume_micros);
        }
        self.balance_micros += realised;
        self.realised_today_micros += realised;

        Ok(OrderOutcome::Filled(FillReport {
            ticket: req.ticket,
            price_micros: price,
            volume_micros: req.volume_micros,
            filled_at: self.server_time(),
            commission_micros: 0,
            swap_micros: 0,
        }))
    }
}
