use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Broker-facing order direction.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum OrderSide {
    Buy,
    Sell,
}

impl OrderSide {
    pub fn opposite(self) -> Self {
        match self {
            OrderSide::Buy => OrderSide::Sell,
            OrderSide::Sell => OrderSide::Buy,
        }
    }
}

impl std::fmt::Display for OrderSide {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            OrderSide::Buy => write!(f, "BUY"),
            OrderSide::Sell => write!(f, "SELL"),
        }
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum OrderType {
    Market,
    Limit,
    Stop,
    StopLimit,
}

/// An order the execution engine is asked to place.
///
/// `client_tag` is the idempotency key: it is derived deterministically from
/// the originating signal id (entries) or from `close:<ticket>:<nonce>`
/// (closes), and the engine guarantees at most one broker order per tag.
/// `reference_price_micros` is the price the order was built against; market
/// orders carry it for deviation checks and dry-run fill synthesis.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderRequest {
    pub client_tag: String,
    pub symbol: String,
    pub side: OrderSide,
    pub volume_micros: i64,
    pub order_type: OrderType,
    pub reference_price_micros: i64,
    pub limit_price_micros: Option<i64>,
    pub stop_micros: Option<i64>,
    pub take_profit_micros: Option<i64>,
    pub deviation_points: i64,
    pub magic_tag: i64,
}

/// Terminal (or last observed) state of a submitted order.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum OrderOutcome {
    /// Accepted and working; no fills yet.
    Placed { ticket: i64 },
    Filled(FillReport),
    /// Partially filled; `report.volume_micros` is the filled portion.
    PartiallyFilled(FillReport),
    Rejected { reason: String },
    Cancelled,
    /// Transport-level failure after the session's retry budget.
    Error { detail: String },
}

impl OrderOutcome {
    pub fn is_fill(&self) -> bool {
        matches!(
            self,
            OrderOutcome::Filled(_) | OrderOutcome::PartiallyFilled(_)
        )
    }

    pub fn fill(&self) -> Option<&FillReport> {
        match self {
            OrderOutcome::Filled(report) | OrderOutcome::PartiallyFilled(report) => Some(report),
            _ => None,
        }
    }

    /// Stable lowercase label for journaling and log fields.
    pub fn label(&self) -> &'static str {
        match self {
            OrderOutcome::Placed { .. } => "placed",
            OrderOutcome::Filled(_) => "filled",
            OrderOutcome::PartiallyFilled(_) => "partially_filled",
            OrderOutcome::Rejected { .. } => "rejected",
            OrderOutcome::Cancelled => "cancelled",
            OrderOutcome::Error { .. } => "error",
        }
    }
}

/// Fill details attached to `Filled` / `PartiallyFilled`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct FillReport {
    pub ticket: i64,
    pub price_micros: i64,
    pub volume_micros: i64,
    pub filled_at: DateTime<Utc>,
    pub commission_micros: i64,
    pub swap_micros: i64,
}
