use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::{mul_micros, Metadata, OrderSide};

/// Direction of an open position. A tracked position is always directional.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum PositionSide {
    Long,
    Short,
}

impl PositionSide {
    /// +1 for long, -1 for short. Multiplying a raw price move by this sign
    /// yields the move in the position's favour.
    pub fn sign(self) -> i64 {
        match self {
            PositionSide::Long => 1,
            PositionSide::Short => -1,
        }
    }

    /// Order side that opens a position in this direction.
    pub fn entry_order_side(self) -> OrderSide {
        match self {
            PositionSide::Long => OrderSide::Buy,
            PositionSide::Short => OrderSide::Sell,
        }
    }

    /// Order side that closes a position in this direction.
    pub fn close_order_side(self) -> OrderSide {
        self.entry_order_side().opposite()
    }

    pub fn from_entry_order_side(side: OrderSide) -> Self {
        match side {
            OrderSide::Buy => PositionSide::Long,
            OrderSide::Sell => PositionSide::Short,
        }
    }
}

impl std::fmt::Display for PositionSide {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PositionSide::Long => write!(f, "LONG"),
            PositionSide::Short => write!(f, "SHORT"),
        }
    }
}

/// How the tracker came to own a position.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum PositionOrigin {
    /// Opened by this process through the execution engine.
    Native,
    /// Found on the broker (same magic tag) and adopted during reconcile.
    Adopted,
}

/// One tracked open position. `ticket` is the broker-assigned primary key.
///
/// Invariants while tracked: `volume_micros > 0`; `side` never changes;
/// `current_price_micros` and `unrealised_pnl_micros` are at most one tick
/// behind broker truth.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PositionRecord {
    pub ticket: i64,
    pub symbol: String,
    pub side: PositionSide,
    pub volume_micros: i64,
    pub open_price_micros: i64,
    pub open_time: DateTime<Utc>,
    pub current_price_micros: i64,
    pub stop_micros: Option<i64>,
    pub take_profit_micros: Option<i64>,
    pub unrealised_pnl_micros: i64,
    pub realised_pnl_micros: i64,
    pub commission_micros: i64,
    pub swap_micros: i64,
    /// When this tracker first observed the position (not the broker open time).
    pub first_seen: DateTime<Utc>,
    pub origin: PositionOrigin,
    pub metadata: Metadata,
}

impl PositionRecord {
    /// Age against the given clock (server time in the live loop).
    pub fn age(&self, now: DateTime<Utc>) -> Duration {
        now - self.open_time
    }

    /// Price move in the position's favour: positive when the market has
    /// moved toward profit.
    pub fn favourable_move_micros(&self) -> i64 {
        (self.current_price_micros - self.open_price_micros) * self.side.sign()
    }

    /// Entry notional (open price × volume).
    pub fn notional_micros(&self) -> i64 {
        mul_micros(self.open_price_micros, self.volume_micros)
    }

    /// Unrealised P&L computed from prices alone. Broker-reported P&L is
    /// authoritative when available; this is the fallback used for external
    /// closes and by the paper session.
    pub fn computed_pnl_micros(&self) -> i64 {
        mul_micros(self.favourable_move_micros(), self.volume_micros)
    }
}
