use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use helm_schemas::{
    AccountSnapshot, Bar, OrderOutcome, OrderRequest, OrderSide, PositionSide, Timeframe,
};

use crate::BrokerError;

/// A secret value (password, API key). The value is reachable only through
/// [`Secret::expose`]; `Debug` and `Display` always redact.
#[derive(Clone, PartialEq, Eq)]
pub struct Secret(String);

impl Secret {
    pub fn new(value: impl Into<String>) -> Self {
        Secret(value.into())
    }

    pub fn expose(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl std::fmt::Debug for Secret {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "<REDACTED>")
    }
}

impl std::fmt::Display for Secret {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "<REDACTED>")
    }
}

/// Connection parameters for a broker terminal session.
///
/// The password arrives via an environment variable resolved at startup; the
/// login is masked down to its last four digits in every log line.
#[derive(Clone, Debug)]
pub struct SessionCredentials {
    pub login: i64,
    pub password: Secret,
    pub server: String,
    pub timeout_ms: u64,
    pub terminal_path: Option<String>,
}

impl SessionCredentials {
    /// Login masked for logs: all but the last four digits replaced.
    pub fn masked_login(&self) -> String {
        let digits = self.login.to_string();
        if digits.len() <= 4 {
            format!("***{digits}")
        } else {
            let tail = &digits[digits.len() - 4..];
            format!("***{tail}")
        }
    }
}

/// Structured health probe result.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct HealthReport {
    pub connected: bool,
    pub trading_allowed: bool,
    pub balance_micros: i64,
    pub equity_micros: i64,
}

/// Trading specification for one symbol, as reported by the broker.
/// The execution engine uses the volume fields for lot-step quantisation.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SymbolSpec {
    pub symbol: String,
    pub digits: u32,
    pub point_micros: i64,
    pub volume_min_micros: i64,
    pub volume_max_micros: i64,
    pub volume_step_micros: i64,
}

/// An open position as the broker reports it. The tracker turns these into
/// `PositionRecord`s; `client_tag` (the broker-side order comment) lets the
/// execution engine re-seed its idempotency cache after a reconnect.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct BrokerPosition {
    pub ticket: i64,
    pub symbol: String,
    pub side: PositionSide,
    pub volume_micros: i64,
    pub open_price_micros: i64,
    pub open_time: DateTime<Utc>,
    pub current_price_micros: i64,
    pub unrealised_pnl_micros: i64,
    pub stop_micros: Option<i64>,
    pub take_profit_micros: Option<i64>,
    pub commission_micros: i64,
    pub swap_micros: i64,
    pub magic_tag: i64,
    pub client_tag: Option<String>,
}

/// A close instruction: an opposing-side deal against an existing ticket.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CloseRequest {
    pub ticket: i64,
    pub symbol: String,
    /// Side of the closing order (opposite of the position side).
    pub side: OrderSide,
    pub volume_micros: i64,
    pub client_tag: String,
    pub reference_price_micros: i64,
    pub deviation_points: i64,
    pub magic_tag: i64,
    pub comment: String,
}

/// The broker session capability.
///
/// All calls are synchronous; the loop treats each as a suspension point.
/// Any call may fail transiently — implementations retry internally and
/// surface [`BrokerError`] only after their retry budget.
pub trait BrokerSession {
    fn connect(&mut self) -> Result<(), BrokerError>;
    fn disconnect(&mut self);
    fn is_connected(&self) -> bool;
    fn health(&mut self) -> Result<HealthReport, BrokerError>;
    fn account(&mut self) -> Result<AccountSnapshot, BrokerError>;

    /// Most recent `count` bars for the symbol, ascending by open time.
    fn bars(
        &mut self,
        symbol: &str,
        timeframe: Timeframe,
        count: usize,
    ) -> Result<Vec<Bar>, BrokerError>;

    fn symbol_spec(&mut self, symbol: &str) -> Result<SymbolSpec, BrokerError>;

    /// All open positions carrying the given magic tag, in one batched call.
    fn open_positions(&mut self, magic_tag: i64) -> Result<Vec<BrokerPosition>, BrokerError>;

    /// Mutations below are reserved to the execution engine.
    fn submit(&mut self, req: &OrderRequest) -> Result<OrderOutcome, BrokerError>;

    /// Re-query the state of a working order (partial-fill polling).
    fn poll_order(&mut self, ticket: i64) -> Result<OrderOutcome, BrokerError>;

    /// Cancel the unfilled remainder of a working order.
    fn cancel_remainder(&mut self, ticket: i64) -> Result<OrderOutcome, BrokerError>;

    fn close(&mut self, req: &CloseRequest) -> Result<OrderOutcome, BrokerError>;
}
