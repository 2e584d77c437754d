//! Deterministic in-memory "paper" session.
//!
//! Accepts orders from the execution layer and fills them immediately at the
//! current mark price. No randomness, no network I/O: the price path is a
//! fixed repeating drift pattern, so two paper runs with the same config
//! produce identical bars, fills, and account history.
//!
//! Used by `--dry-run` loops and the manual trade utility; scenario tests use
//! the scripted mock in `helm-testkit` instead.

use std::collections::BTreeMap;

use chrono::{DateTime, Duration, Utc};

use helm_schemas::{
    mul_micros, AccountSnapshot, Bar, FillReport, OrderOutcome, OrderRequest, OrderSide,
    PositionSide, Timeframe,
};

use crate::{BrokerError, BrokerPosition, BrokerSession, CloseRequest, HealthReport, SymbolSpec};

/// Per-bar price drift, in micros, applied cyclically. Sums to a small
/// positive drift so long dry runs trend gently upward.
const DRIFT_PATTERN: [i64; 8] = [
    30_000, 55_000, -20_000, 40_000, -65_000, 25_000, -35_000, 45_000,
];

/// Margin heuristic: notional / leverage.
const PAPER_LEVERAGE: i64 = 100;

#[derive(Clone, Debug)]
pub struct PaperConfig {
    pub symbol: String,
    pub timeframe: Timeframe,
    pub start_time: DateTime<Utc>,
    pub start_price_micros: i64,
    pub start_balance_micros: i64,
    /// Bars pre-seeded before the first fetch so indicators warm up.
    pub history_len: usize,
}

impl PaperConfig {
    pub fn with_defaults(symbol: impl Into<String>, start_time: DateTime<Utc>) -> Self {
        Self {
            symbol: symbol.into(),
            timeframe: Timeframe::M1,
            start_time,
            start_price_micros: 100_000_000,
            start_balance_micros: 10_000_000_000,
            history_len: 120,
        }
    }
}

pub struct PaperSession {
    cfg: PaperConfig,
    connected: bool,
    bars: Vec<Bar>,
    positions: BTreeMap<i64, BrokerPosition>,
    outcomes_by_ticket: BTreeMap<i64, OrderOutcome>,
    ticket_by_tag: BTreeMap<String, i64>,
    next_ticket: i64,
    balance_micros: i64,
    realised_today_micros: i64,
}

impl PaperSession {
    pub fn new(cfg: PaperConfig) -> Self {
        let mut session = Self {
            connected: false,
            bars: Vec::new(),
            positions: BTreeMap::new(),
            outcomes_by_ticket: BTreeMap::new(),
            ticket_by_tag: BTreeMap::new(),
            next_ticket: 1,
            balance_micros: cfg.start_balance_micros,
            realised_today_micros: 0,
            cfg,
        };
        for _ in 0..session.cfg.history_len {
            session.push_bar();
        }
        session
    }

    fn push_bar(&mut self) {
        let idx = self.bars.len();
        let step = Duration::seconds(self.cfg.timeframe.seconds());
        let open_time = self.cfg.start_time + step * idx as i32;
        let open = self
            .bars
            .last()
            .map(|b| b.close_micros)
            .unwrap_or(self.cfg.start_price_micros);
        let drift = DRIFT_PATTERN[idx % DRIFT_PATTERN.len()];
        let close = (open + drift).max(1);
        let high = open.max(close) + 10_000;
        let low = open.min(close) - 10_000;
        self.bars.push(Bar {
            open_time,
            open_micros: open,
            high_micros: high,
            low_micros: low,
            close_micros: close,
            volume: 1_000 + (idx as i64 % 7) * 100,
        });
        self.remark_positions();
    }

    fn mark_price(&self) -> i64 {
        self.bars
            .last()
            .map(|b| b.close_micros)
            .unwrap_or(self.cfg.start_price_micros)
    }

    fn server_time(&self) -> DateTime<Utc> {
        self.bars
            .last()
            .map(|b| b.open_time)
            .unwrap_or(self.cfg.start_time)
    }

    fn remark_positions(&mut self) {
        let mark = self.mark_price();
        for pos in self.positions.values_mut() {
            pos.current_price_micros = mark;
            let favourable = (mark - pos.open_price_micros) * pos.side.sign();
            pos.unrealised_pnl_micros = mul_micros(favourable, pos.volume_micros);
        }
    }

    fn unrealised_total(&self) -> i64 {
        self.positions
            .values()
            .map(|p| p.unrealised_pnl_micros)
            .sum()
    }

    fn margin_used(&self) -> i64 {
        self.positions
            .values()
            .map(|p| mul_micros(p.open_price_micros, p.volume_micros) / PAPER_LEVERAGE)
            .sum()
    }

    fn ensure_connected(&self) -> Result<(), BrokerError> {
        if self.connected {
            Ok(())
        } else {
            Err(BrokerError::NotConnected)
        }
    }
}

impl BrokerSession for PaperSession {
    fn connect(&mut self) -> Result<(), BrokerError> {
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
        Ok(HealthReport {
            connected: self.connected,
            trading_allowed: self.connected,
            balance_micros: self.balance_micros,
            equity_micros: self.balance_micros + self.unrealised_total(),
        })
    }

    fn account(&mut self) -> Result<AccountSnapshot, BrokerError> {
        self.ensure_connected()?;
        let margin_used = self.margin_used();
        let equity = self.balance_micros + self.unrealised_total();
        Ok(AccountSnapshot {
            balance_micros: self.balance_micros,
            equity_micros: equity,
            margin_used_micros: margin_used,
            margin_free_micros: equity - margin_used,
            realised_today_micros: self.realised_today_micros,
            trading_enabled: true,
            server_time: self.server_time(),
        })
    }

    fn bars(
        &mut self,
        symbol: &str,
        timeframe: Timeframe,
        count: usize,
    ) -> Result<Vec<Bar>, BrokerError> {
        self.ensure_connected()?;
        if symbol != self.cfg.symbol {
            return Err(BrokerError::UnknownSymbol {
                symbol: symbol.to_string(),
            });
        }
        if timeframe != self.cfg.timeframe {
            return Err(BrokerError::Rejected {
                reason: format!("paper session serves {} only", self.cfg.timeframe),
            });
        }
        // One new bar closes per fetch.
        self.push_bar();
        let start = self.bars.len().saturating_sub(count);
        Ok(self.bars[start..].to_vec())
    }

    fn symbol_spec(&mut self, symbol: &str) -> Result<SymbolSpec, BrokerError> {
        if symbol != self.cfg.symbol {
            return Err(BrokerError::UnknownSymbol {
                symbol: symbol.to_string(),
            });
        }
        Ok(SymbolSpec {
            symbol: symbol.to_string(),
            digits: 2,
            point_micros: 10_000,
            volume_min_micros: 10_000,
            volume_max_micros: 100_000_000,
            volume_step_micros: 10_000,
        })
    }

    fn open_positions(&mut self, magic_tag: i64) -> Result<Vec<BrokerPosition>, BrokerError> {
        self.ensure_connected()?;
        Ok(self
            .positions
            .values()
            .filter(|p| p.magic_tag == magic_tag)
            .cloned()
            .collect())
    }

    fn submit(&mut self, req: &OrderRequest) -> Result<OrderOutcome, BrokerError> {
        self.ensure_connected()?;
        if req.symbol != self.cfg.symbol {
            return Err(BrokerError::UnknownSymbol {
                symbol: req.symbol.clone(),
            });
        }
        if req.volume_micros <= 0 {
            return Ok(OrderOutcome::Rejected {
                reason: "volume must be positive".to_string(),
            });
        }
        // Idempotent on client tag, same as a live terminal dedupes comments.
        if let Some(ticket) = self.ticket_by_tag.get(&req.client_tag) {
            if let Some(outcome) = self.outcomes_by_ticket.get(ticket) {
                return Ok(outcome.clone());
            }
        }

        let price = req.limit_price_micros.unwrap_or_else(|| self.mark_price());
        let ticket = self.next_ticket;
        self.next_ticket += 1;

        let position = BrokerPosition {
            ticket,
            symbol: req.symbol.clone(),
            side: PositionSide::from_entry_order_side(req.side),
            volume_micros: req.volume_micros,
            open_price_micros: price,
            open_time: self.server_time(),
            current_price_micros: price,
            unrealised_pnl_micros: 0,
            stop_micros: req.stop_micros,
            take_profit_micros: req.take_profit_micros,
            commission_micros: 0,
            swap_micros: 0,
            magic_tag: req.magic_tag,
            client_tag: Some(req.client_tag.clone()),
        };
        self.positions.insert(ticket, position);

        let outcome = OrderOutcome::Filled(FillReport {
            ticket,
            price_micros: price,
            volume_micros: req.volume_micros,
            filled_at: self.server_time(),
            commission_micros: 0,
            swap_micros: 0,
        });
        self.outcomes_by_ticket.insert(ticket, outcome.clone());
        self.ticket_by_tag.insert(req.client_tag.clone(), ticket);
        Ok(outcome)
    }

    fn poll_order(&mut self, ticket: i64) -> Result<OrderOutcome, BrokerError> {
        self.ensure_connected()?;
        self.outcomes_by_ticket
            .get(&ticket)
            .cloned()
            .ok_or(BrokerError::UnknownTicket { ticket })
    }

    fn cancel_remainder(&mut self, ticket: i64) -> Result<OrderOutcome, BrokerError> {
        self.ensure_connected()?;
        // Fills are immediate here, so there is never a working remainder.
        self.outcomes_by_ticket
            .get(&ticket)
            .cloned()
            .ok_or(BrokerError::UnknownTicket { ticket })
    }

    fn close(&mut self, req: &CloseRequest) -> Result<OrderOutcome, BrokerError> {
        self.ensure_connected()?;
        let (open_price, side, held_volume) = match self.positions.get(&req.ticket) {
            Some(p) => (p.open_price_micros, p.side, p.volume_micros),
            None => return Err(BrokerError::UnknownTicket { ticket: req.ticket }),
        };
        if req.volume_micros <= 0 || req.volume_micros > held_volume {
            return Ok(OrderOutcome::Rejected {
                reason: format!(
                    "close volume {} out of range for ticket #{}",
                    req.volume_micros, req.ticket
                ),
            });
        }

        let price = self.mark_price();
        let favourable = (price - open_price) * side.sign();
        let realised = mul_micros(favourable, req.volume_micros);

        if req.volume_micros == held_volume {
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

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use helm_schemas::OrderType;

    fn session() -> PaperSession {
        let start = Utc.with_ymd_and_hms(2024, 3, 4, 9, 0, 0).unwrap();
        let mut s = PaperSession::new(PaperConfig::with_defaults("EURUSD", start));
        s.connect().unwrap();
        s
    }

    fn market_buy(tag: &str, volume: i64) -> OrderRequest {
        OrderRequest {
            client_tag: tag.to_string(),
            symbol: "EURUSD".to_string(),
            side: OrderSide::Buy,
            volume_micros: volume,
            order_type: OrderType::Market,
            reference_price_micros: 100_000_000,
            limit_price_micros: None,
            stop_micros: None,
            take_profit_micros: None,
            deviation_points: 10,
            magic_tag: 7,
        }
    }

    #[test]
    fn bars_are_deterministic_across_sessions() {
        let mut a = session();
        let mut b = session();
        let bars_a = a.bars("EURUSD", Timeframe::M1, 50).unwrap();
        let bars_b = b.bars("EURUSD", Timeframe::M1, 50).unwrap();
        assert_eq!(bars_a, bars_b);
    }

    #[test]
    fn each_fetch_advances_one_bar() {
        let mut s = session();
        let first = s.bars("EURUSD", Timeframe::M1, 10).unwrap();
        let second = s.bars("EURUSD", Timeframe::M1, 10).unwrap();
        let step = second.last().unwrap().open_time - first.last().unwrap().open_time;
        assert_eq!(step, Duration::seconds(60));
    }

    #[test]
    fn submit_fills_and_opens_position() {
        let mut s = session();
        let outcome = s.submit(&market_buy("sig:a", 50_000)).unwrap();
        let fill = outcome.fill().expect("market order fills immediately");
        assert_eq!(fill.volume_micros, 50_000);
        let open = s.open_positions(7).unwrap();
        assert_eq!(open.len(), 1);
        assert_eq!(open[0].client_tag.as_deref(), Some("sig:a"));
    }

    #[test]
    fn submit_is_idempotent_on_tag() {
        let mut s = session();
        let first = s.submit(&market_buy("sig:a", 50_000)).unwrap();
        let second = s.submit(&market_buy("sig:a", 50_000)).unwrap();
        assert_eq!(first, second);
        assert_eq!(s.open_positions(7).unwrap().len(), 1);
    }

    #[test]
    fn full_close_realises_pnl_into_balance() {
        let mut s = session();
        let outcome = s.submit(&market_buy("sig:a", 1_000_000)).unwrap();
        let ticket = outcome.fill().unwrap().ticket;
        let balance_before = s.account().unwrap().balance_micros;

        // Let the drift move the mark a few bars.
        for _ in 0..4 {
            s.bars("EURUSD", Timeframe::M1, 5).unwrap();
        }
        let close = s
            .close(&CloseRequest {
                ticket,
                symbol: "EURUSD".to_string(),
                side: OrderSide::Sell,
                volume_micros: 1_000_000,
                client_tag: "close:1:1".to_string(),
                reference_price_micros: 0,
                deviation_points: 10,
                magic_tag: 7,
                comment: "test".to_string(),
            })
            .unwrap();
        assert!(close.is_fill());
        assert!(s.open_positions(7).unwrap().is_empty());
        assert_ne!(s.account().unwrap().balance_micros, balance_before);
    }

    #[test]
    fn partial_close_shrinks_position() {
        let mut s = session();
        let ticket = s
            .submit(&market_buy("sig:a", 100_000))
            .unwrap()
            .fill()
            .unwrap()
            .ticket;
        s.close(&CloseRequest {
            ticket,
            symbol: "EURUSD".to_string(),
            side: OrderSide::Sell,
            volume_micros: 40_000,
            client_tag: "close:t:1".to_string(),
            reference_price_micros: 0,
            deviation_points: 10,
            magic_tag: 7,
            comment: "partial".to_string(),
        })
        .unwrap();
        let open = s.open_positions(7).unwrap();
        assert_eq!(open.len(), 1);
        assert_eq!(open[0].volume_micros, 60_000);
    }

    #[test]
    fn disconnected_session_refuses_reads() {
        let start = Utc.with_ymd_and_hms(2024, 3, 4, 9, 0, 0).unwrap();
        let mut s = PaperSession::new(PaperConfig::with_defaults("EURUSD", start));
        assert!(matches!(s.account(), Err(BrokerError::NotConnected)));
    }
}
