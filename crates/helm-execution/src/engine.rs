use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use tracing::{info, warn};

use helm_broker::{BrokerPosition, BrokerSession, CloseRequest, SymbolSpec};
use helm_schemas::{
    FillReport, OrderOutcome, OrderRequest, OrderType, PositionRecord, Signal, SignalSide,
};

/// First ticket of the synthetic range handed out in dry-run mode. Far above
/// anything a real broker assigns, so synthetic positions can never collide
/// with (or be mistaken for) live tickets.
pub const SYNTHETIC_TICKET_BASE: i64 = 9_000_000_000;

#[derive(Clone, Debug)]
pub struct ExecutionConfig {
    pub magic_tag: i64,
    pub deviation_points: i64,
    pub fill_timeout_ms: u64,
    pub fill_poll_interval_ms: u64,
    pub outcome_cache_capacity: usize,
    pub dry_run: bool,
}

impl ExecutionConfig {
    pub fn with_defaults(magic_tag: i64) -> Self {
        Self {
            magic_tag,
            deviation_points: 10,
            fill_timeout_ms: 10_000,
            fill_poll_interval_ms: 200,
            outcome_cache_capacity: 256,
            dry_run: false,
        }
    }
}

/// The execution engine. Owns the tag → outcome cache and the close nonce;
/// the only component that calls the session's mutating methods.
pub struct ExecutionEngine {
    cfg: ExecutionConfig,
    outcomes: crate::TagCache,
    next_close_nonce: u64,
    next_synthetic_ticket: i64,
}

impl ExecutionEngine {
    pub fn new(cfg: ExecutionConfig) -> Self {
        let capacity = cfg.outcome_cache_capacity;
        Self {
            cfg,
            outcomes: crate::TagCache::new(capacity),
            next_close_nonce: 1,
            next_synthetic_ticket: SYNTHETIC_TICKET_BASE,
        }
    }

    pub fn is_dry_run(&self) -> bool {
        self.cfg.dry_run
    }

    /// Canonical entry tag. Every call site — first submit or any retry —
    /// must derive the tag here, so retries automatically reuse the key.
    pub fn entry_tag(signal_id: &str) -> String {
        format!("sig:{signal_id}")
    }

    /// Floor the volume to the broker's lot step, then clamp into the
    /// broker's [min, max] band.
    pub fn quantise_volume(volume_micros: i64, spec: &SymbolSpec) -> i64 {
        let step = spec.volume_step_micros.max(1);
        let stepped = volume_micros / step * step;
        stepped.clamp(spec.volume_min_micros, spec.volume_max_micros)
    }

    /// Build the order request for an approved entry. The volume is
    /// quantised here; the tag is derived from the signal id.
    pub fn build_entry_request(
        &self,
        signal: &Signal,
        approved_volume_micros: i64,
        spec: &SymbolSpec,
    ) -> OrderRequest {
        // The gate only approves directional signals; Flat never gets here.
        let side = match signal.side {
            SignalSide::Short => helm_schemas::OrderSide::Sell,
            _ => helm_schemas::OrderSide::Buy,
        };
        OrderRequest {
            client_tag: Self::entry_tag(&signal.id),
            symbol: signal.symbol.clone(),
            side,
            volume_micros: Self::quantise_volume(approved_volume_micros, spec),
            order_type: OrderType::Market,
            reference_price_micros: signal.reference_price_micros,
            limit_price_micros: None,
            stop_micros: signal.stop_micros,
            take_profit_micros: signal.take_profit_micros,
            deviation_points: self.cfg.deviation_points,
            magic_tag: self.cfg.magic_tag,
        }
    }

    /// Submit an order. Idempotent over the client tag: a known tag returns
    /// the prior outcome without touching the broker.
    pub fn submit<S: BrokerSession>(
        &mut self,
        session: &mut S,
        req: &OrderRequest,
        now: DateTime<Utc>,
    ) -> OrderOutcome {
        if let Some(prior) = self.outcomes.get(&req.client_tag) {
            info!(tag = %req.client_tag, outcome = prior.label(), "duplicate tag, returning prior outcome");
            return prior.clone();
        }

        let outcome = if self.cfg.dry_run {
            self.synthesise_fill(req, now)
        } else {
            match session.submit(req) {
                Ok(first) => self.settle(session, first),
                Err(e) => {
                    warn!(tag = %req.client_tag, error = %e, "submit failed after session retries");
                    OrderOutcome::Error {
                        detail: e.to_string(),
                    }
                }
            }
        };

        self.outcomes.put(req.client_tag.clone(), outcome.clone());
        outcome
    }

    /// Close a position (full or partial) with an opposing-side order.
    pub fn close<S: BrokerSession>(
        &mut self,
        session: &mut S,
        position: &PositionRecord,
        volume_micros: i64,
        reason: &str,
        now: DateTime<Utc>,
    ) -> OrderOutcome {
        let nonce = self.next_close_nonce;
        self.next_close_nonce += 1;
        let tag = format!("close:{}:{nonce}", position.ticket);

        let outcome = if self.cfg.dry_run {
            OrderOutcome::Filled(FillReport {
                ticket: position.ticket,
                price_micros: position.current_price_micros,
                volume_micros,
                filled_at: now,
                commission_micros: 0,
                swap_micros: 0,
            })
        } else {
            let req = CloseRequest {
                ticket: position.ticket,
                symbol: position.symbol.clone(),
                side: position.side.close_order_side(),
                volume_micros,
                client_tag: tag.clone(),
                reference_price_micros: position.current_price_micros,
                deviation_points: self.cfg.deviation_points,
                magic_tag: self.cfg.magic_tag,
                comment: reason.to_string(),
            };
            match session.close(&req) {
                Ok(first) => self.settle(session, first),
                Err(e) => {
                    warn!(ticket = position.ticket, error = %e, "close failed after session retries");
                    OrderOutcome::Error {
                        detail: e.to_string(),
                    }
                }
            }
        };

        self.outcomes.put(tag, outcome.clone());
        outcome
    }

    /// Re-seed the idempotency cache from broker positions after a reconnect
    /// or restart. The broker-side order comment carries the original tag, so
    /// a re-emitted signal maps back onto the already-filled order.
    pub fn reseed_from_positions(&mut self, positions: &[BrokerPosition]) {
        for pos in positions {
            let Some(tag) = &pos.client_tag else { continue };
            if self.outcomes.contains(tag) {
                continue;
            }
            self.outcomes.put(
                tag.clone(),
                OrderOutcome::Filled(FillReport {
                    ticket: pos.ticket,
                    price_micros: pos.open_price_micros,
                    volume_micros: pos.volume_micros,
                    filled_at: pos.open_time,
                    commission_micros: pos.commission_micros,
                    swap_micros: pos.swap_micros,
                }),
            );
        }
    }

    fn synthesise_fill(&mut self, req: &OrderRequest, now: DateTime<Utc>) -> OrderOutcome {
        let ticket = self.next_synthetic_ticket;
        self.next_synthetic_ticket += 1;
        let price = req
            .limit_price_micros
            .unwrap_or(req.reference_price_micros);
        info!(tag = %req.client_tag, ticket, "dry run: synthesising fill");
        OrderOutcome::Filled(FillReport {
            ticket,
            price_micros: price,
            volume_micros: req.volume_micros,
            filled_at: now,
            commission_micros: 0,
            swap_micros: 0,
        })
    }

    /// Drive a non-terminal outcome (placed / partial) to its consolidated
    /// form by polling the broker, bounded by `fill_timeout_ms`. A partial is
    /// never converted into a failure: on timeout the remainder is cancelled
    /// and whatever filled stands.
    fn settle<S: BrokerSession>(&mut self, session: &mut S, first: OrderOutcome) -> OrderOutcome {
        let (ticket, mut last_partial) = match &first {
            OrderOutcome::Placed { ticket } => (*ticket, None),
            OrderOutcome::PartiallyFilled(report) => (report.ticket, Some(report.clone())),
            _ => return first,
        };

        let deadline = Instant::now() + Duration::from_millis(self.cfg.fill_timeout_ms);
        let poll_interval = Duration::from_millis(self.cfg.fill_poll_interval_ms);

        while Instant::now() < deadline {
            if !poll_interval.is_zero() {
                std::thread::sleep(poll_interval);
            }
            match session.poll_order(ticket) {
                Ok(OrderOutcome::Filled(report)) => return OrderOutcome::Filled(report),
                Ok(OrderOutcome::PartiallyFilled(report)) => last_partial = Some(report),
                Ok(OrderOutcome::Rejected { reason }) => {
                    // A rejection after a partial keeps the filled portion.
                    return match last_partial {
                        Some(report) => OrderOutcome::PartiallyFilled(report),
                        None => OrderOutcome::Rejected { reason },
                    };
                }
                Ok(OrderOutcome::Cancelled) => {
                    return match last_partial {
                        Some(report) => OrderOutcome::PartiallyFilled(report),
                        None => OrderOutcome::Cancelled,
                    };
                }
                Ok(OrderOutcome::Placed { .. }) => {}
                Ok(OrderOutcome::Error { detail }) | Err(helm_broker::BrokerError::Transport { detail }) => {
                    warn!(ticket, detail = %detail, "poll failed, continuing until timeout");
                }
                Err(e) => {
                    warn!(ticket, error = %e, "poll failed, continuing until timeout");
                }
            }
        }

        warn!(ticket, "fill timeout reached, cancelling remainder");
        match session.cancel_remainder(ticket) {
            Ok(OrderOutcome::Filled(report)) => OrderOutcome::Filled(report),
            _ => match last_partial {
                Some(report) => OrderOutcome::PartiallyFilled(report),
                None => OrderOutcome::Cancelled,
            },
        }
    }
}
