use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use tracing::{error, info, warn};

use helm_broker::{BrokerError, BrokerPosition, BrokerSession};
use helm_execution::{ExecutionEngine, SYNTHETIC_TICKET_BASE};
use helm_schemas::{
    mul_micros, FillReport, Metadata, OrderRequest, PositionOrigin, PositionRecord, PositionSide,
};

use crate::{AdoptionPolicy, AdoptionRuling};

/// A position (or slice of one) that has left the book, with everything the
/// journal needs to write a trade row.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ClosedPosition {
    pub ticket: i64,
    pub symbol: String,
    pub side: PositionSide,
    pub volume_micros: i64,
    pub open_price_micros: i64,
    pub open_time: DateTime<Utc>,
    pub exit_price_micros: i64,
    pub exit_time: DateTime<Utc>,
    pub realised_micros: i64,
    pub commission_micros: i64,
    pub swap_micros: i64,
    pub reason: String,
    /// True when the broker closed it outside this process (stop hit, manual
    /// close, ...) and the exit price is the last-known mark.
    pub external: bool,
    pub origin: PositionOrigin,
    pub metadata: Metadata,
}

#[derive(Clone, Debug, Default)]
pub struct MonitorReport {
    pub refreshed: usize,
    pub closed_externally: Vec<ClosedPosition>,
}

#[derive(Clone, Debug, Default)]
pub struct ReconcileReport {
    pub adopted: Vec<i64>,
    pub refreshed: Vec<i64>,
    pub dropped: Vec<ClosedPosition>,
    /// Orphans the policy refused, with the stable skip reason.
    pub orphans_skipped: Vec<(i64, &'static str)>,
}

impl ReconcileReport {
    pub fn is_quiet(&self) -> bool {
        self.adopted.is_empty() && self.dropped.is_empty() && self.orphans_skipped.is_empty()
    }
}

/// Result of a tracker-initiated close.
#[derive(Clone, Debug)]
pub enum CloseOutcome {
    FullyClosed(ClosedPosition),
    PartiallyClosed {
        closed: ClosedPosition,
        remaining_volume_micros: i64,
    },
    Failed {
        ticket: i64,
        outcome: helm_schemas::OrderOutcome,
    },
    UnknownTicket {
        ticket: i64,
    },
}

impl CloseOutcome {
    pub fn closed_slice(&self) -> Option<&ClosedPosition> {
        match self {
            CloseOutcome::FullyClosed(c) => Some(c),
            CloseOutcome::PartiallyClosed { closed, .. } => Some(closed),
            _ => None,
        }
    }
}

/// The authoritative local position book.
pub struct PositionTracker {
    positions: BTreeMap<i64, PositionRecord>,
    policy: AdoptionPolicy,
    magic_tag: i64,
    opened_total: u64,
    closed_total: u64,
}

impl PositionTracker {
    pub fn new(magic_tag: i64, policy: AdoptionPolicy) -> Self {
        Self {
            positions: BTreeMap::new(),
            policy,
            magic_tag,
            opened_total: 0,
            closed_total: 0,
        }
    }

    /// Ticket-ascending view, the iteration order exits are evaluated in.
    pub fn positions(&self) -> &BTreeMap<i64, PositionRecord> {
        &self.positions
    }

    pub fn get(&self, ticket: i64) -> Option<&PositionRecord> {
        self.positions.get(&ticket)
    }

    pub fn len(&self) -> usize {
        self.positions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.positions.is_empty()
    }

    pub fn count_for_symbol(&self, symbol: &str) -> usize {
        self.positions.values().filter(|p| p.symbol == symbol).count()
    }

    pub fn total_unrealised_micros(&self) -> i64 {
        self.positions.values().map(|p| p.unrealised_pnl_micros).sum()
    }

    pub fn opened_total(&self) -> u64 {
        self.opened_total
    }

    pub fn closed_total(&self) -> u64 {
        self.closed_total
    }

    /// Register a freshly filled entry. Ignored with a warning if the ticket
    /// is already present.
    pub fn register(
        &mut self,
        req: &OrderRequest,
        fill: &FillReport,
        metadata: Metadata,
        now: DateTime<Utc>,
    ) -> bool {
        if self.positions.contains_key(&fill.ticket) {
            warn!(ticket = fill.ticket, "register ignored: ticket already tracked");
            return false;
        }
        let side = PositionSide::from_entry_order_side(req.side);
        let record = PositionRecord {
            ticket: fill.ticket,
            symbol: req.symbol.clone(),
            side,
            volume_micros: fill.volume_micros,
            open_price_micros: fill.price_micros,
            open_time: fill.filled_at,
            current_price_micros: fill.price_micros,
            stop_micros: req.stop_micros,
            take_profit_micros: req.take_profit_micros,
            unrealised_pnl_micros: 0,
            realised_pnl_micros: 0,
            commission_micros: fill.commission_micros,
            swap_micros: fill.swap_micros,
            first_seen: now,
            origin: PositionOrigin::Native,
            metadata,
        };
        info!(
            ticket = record.ticket,
            symbol = %record.symbol,
            side = %record.side,
            volume = record.volume_micros,
            price = record.open_price_micros,
            "position tracked"
        );
        self.positions.insert(record.ticket, record);
        self.opened_total += 1;
        true
    }

    /// Refresh every tracked position from the broker's batched open-position
    /// list. Positions the broker no longer reports are removed as
    /// closed-externally. Synthetic (dry-run) tickets are refreshed from
    /// `mark_price_micros` instead — the broker has never heard of them.
    pub fn monitor<S: BrokerSession>(
        &mut self,
        session: &mut S,
        mark_price_micros: Option<i64>,
        now: DateTime<Utc>,
    ) -> Result<MonitorReport, BrokerError> {
        let live: BTreeMap<i64, BrokerPosition> = session
            .open_positions(self.magic_tag)?
            .into_iter()
            .map(|p| (p.ticket, p))
            .collect();

        let mut report = MonitorReport::default();
        let tickets: Vec<i64> = self.positions.keys().copied().collect();
        for ticket in tickets {
            if ticket >= SYNTHETIC_TICKET_BASE {
                if let (Some(mark), Some(record)) = (mark_price_micros, self.positions.get_mut(&ticket)) {
                    record.current_price_micros = mark;
                    record.unrealised_pnl_micros = record.computed_pnl_micros();
                    report.refreshed += 1;
                }
                continue;
            }
            match live.get(&ticket) {
                Some(broker_pos) => {
                    if let Some(record) = self.positions.get_mut(&ticket) {
                        refresh_record(record, broker_pos);
                        report.refreshed += 1;
                    }
                }
                None => {
                    if let Some(record) = self.positions.remove(&ticket) {
                        info!(ticket, "position closed externally");
                        self.closed_total += 1;
                        report
                            .closed_externally
                            .push(external_close(record, now));
                    }
                }
            }
        }
        Ok(report)
    }

    /// Close a position, in full (`volume = None`) or partially.
    pub fn close<S: BrokerSession>(
        &mut self,
        session: &mut S,
        engine: &mut ExecutionEngine,
        ticket: i64,
        volume_micros: Option<i64>,
        reason: &str,
        now: DateTime<Utc>,
    ) -> CloseOutcome {
        let Some(record) = self.positions.get(&ticket) else {
            error!(ticket, "close requested for untracked ticket");
            return CloseOutcome::UnknownTicket { ticket };
        };
        let record = record.clone();
        let close_volume = volume_micros
            .unwrap_or(record.volume_micros)
            .min(record.volume_micros);
        if close_volume <= 0 {
            error!(ticket, close_volume, "close requested with non-positive volume");
            return CloseOutcome::UnknownTicket { ticket };
        }

        let outcome = engine.close(session, &record, close_volume, reason, now);
        let Some(fill) = outcome.fill() else {
            warn!(ticket, outcome = outcome.label(), reason, "close did not fill");
            return CloseOutcome::Failed { ticket, outcome };
        };

        let closed_volume = fill.volume_micros.min(record.volume_micros);
        let favourable = (fill.price_micros - record.open_price_micros) * record.side.sign();
        let realised = mul_micros(favourable, closed_volume);
        let closed = ClosedPosition {
            ticket,
            symbol: record.symbol.clone(),
            side: record.side,
            volume_micros: closed_volume,
            open_price_micros: record.open_price_micros,
            open_time: record.open_time,
            exit_price_micros: fill.price_micros,
            exit_time: fill.filled_at,
            realised_micros: realised,
            commission_micros: fill.commission_micros,
            swap_micros: record.swap_micros,
            reason: reason.to_string(),
            external: false,
            origin: record.origin,
            metadata: record.metadata.clone(),
        };

        if closed_volume >= record.volume_micros {
            self.positions.remove(&ticket);
            self.closed_total += 1;
            info!(ticket, realised, reason, "position fully closed");
            CloseOutcome::FullyClosed(closed)
        } else {
            let remaining = match self.positions.get_mut(&ticket) {
                Some(live) => {
                    live.volume_micros -= closed_volume;
                    live.realised_pnl_micros += realised;
                    live.unrealised_pnl_micros = live.computed_pnl_micros();
                    live.volume_micros
                }
                None => 0,
            };
            info!(ticket, realised, remaining, reason, "position partially closed");
            CloseOutcome::PartiallyClosed {
                closed,
                remaining_volume_micros: remaining,
            }
        }
    }

    /// Best-effort flatten: closes every tracked position, collecting
    /// per-position outcomes. Failures do not stop the sweep.
    pub fn close_all<S: BrokerSession>(
        &mut self,
        session: &mut S,
        engine: &mut ExecutionEngine,
        reason: &str,
        now: DateTime<Utc>,
    ) -> Vec<CloseOutcome> {
        let tickets: Vec<i64> = self.positions.keys().copied().collect();
        tickets
            .into_iter()
            .map(|ticket| self.close(session, engine, ticket, None, reason, now))
            .collect()
    }

    /// Authoritative sync with the broker's open-position book. Invoked at
    /// startup and after every reconnect, before any entry logic runs.
    pub fn reconcile<S: BrokerSession>(
        &mut self,
        session: &mut S,
        now: DateTime<Utc>,
    ) -> Result<ReconcileReport, BrokerError> {
        let live_list = session.open_positions(self.magic_tag)?;
        let live: BTreeMap<i64, BrokerPosition> =
            live_list.into_iter().map(|p| (p.ticket, p)).collect();

        let mut report = ReconcileReport::default();

        // Broker-side walk: refresh what we know, adopt what we don't.
        for (ticket, broker_pos) in &live {
            match self.positions.get_mut(ticket) {
                Some(record) => {
                    refresh_record(record, broker_pos);
                    report.refreshed.push(*ticket);
                }
                None => match self.policy.rule(broker_pos, now) {
                    AdoptionRuling::Adopt => {
                        info!(ticket, symbol = %broker_pos.symbol, "adopting orphan position");
                        self.positions.insert(*ticket, adopt(broker_pos, now));
                        self.opened_total += 1;
                        report.adopted.push(*ticket);
                    }
                    AdoptionRuling::Skip { reason } => {
                        info!(ticket, reason, "orphan position not adopted");
                        report.orphans_skipped.push((*ticket, reason));
                    }
                },
            }
        }

        // Tracker-side walk: drop what the broker no longer has.
        let tickets: Vec<i64> = self.positions.keys().copied().collect();
        for ticket in tickets {
            if ticket >= SYNTHETIC_TICKET_BASE || live.contains_key(&ticket) {
                continue;
            }
            if let Some(record) = self.positions.remove(&ticket) {
                info!(ticket, "tracked position missing at broker, dropped as closed externally");
                self.closed_total += 1;
                report.dropped.push(external_close(record, now));
            }
        }

        Ok(report)
    }
}

fn refresh_record(record: &mut PositionRecord, broker_pos: &BrokerPosition) {
    record.current_price_micros = broker_pos.current_price_micros;
    record.unrealised_pnl_micros = broker_pos.unrealised_pnl_micros;
    record.swap_micros = broker_pos.swap_micros;
    record.commission_micros = broker_pos.commission_micros;
    record.stop_micros = broker_pos.stop_micros;
    record.take_profit_micros = broker_pos.take_profit_micros;
}

fn adopt(broker_pos: &BrokerPosition, now: DateTime<Utc>) -> PositionRecord {
    PositionRecord {
        ticket: broker_pos.ticket,
        symbol: broker_pos.symbol.clone(),
        side: broker_pos.side,
        volume_micros: broker_pos.volume_micros,
        open_price_micros: broker_pos.open_price_micros,
        open_time: broker_pos.open_time,
        current_price_micros: broker_pos.current_price_micros,
        stop_micros: broker_pos.stop_micros,
        take_profit_micros: broker_pos.take_profit_micros,
        unrealised_pnl_micros: broker_pos.unrealised_pnl_micros,
        realised_pnl_micros: 0,
        commission_micros: broker_pos.commission_micros,
        swap_micros: broker_pos.swap_micros,
        first_seen: now,
        origin: PositionOrigin::Adopted,
        metadata: Metadata::new(),
    }
}

fn external_close(record: PositionRecord, now: DateTime<Utc>) -> ClosedPosition {
    ClosedPosition {
        ticket: record.ticket,
        symbol: record.symbol.clone(),
        side: record.side,
        volume_micros: record.volume_micros,
        open_price_micros: record.open_price_micros,
        open_time: record.open_time,
        exit_price_micros: record.current_price_micros,
        exit_time: now,
        realised_micros: record.unrealised_pnl_micros,
        commission_micros: record.commission_micros,
        swap_micros: record.swap_micros,
        reason: "closed_externally".to_string(),
        external: true,
        origin: record.origin,
        metadata: record.metadata,
    }
}
