use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use helm_schemas::{
    Metadata, OrderOutcome, OrderRequest, PositionOrigin, PositionSide, Signal,
};

/// A strategy signal as journaled, with its execution disposition.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SignalRow {
    pub signal: Signal,
    pub executed: bool,
    /// Ticket of the resulting position when the entry filled.
    pub ticket: Option<i64>,
}

/// An order submission and its outcome.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct OrderRow {
    pub request: OrderRequest,
    pub outcome: OrderOutcome,
}

/// One completed trade (or closed slice of one): open and close paired by
/// ticket. `external` marks closes the broker performed outside this process.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TradeRow {
    pub ticket: i64,
    pub symbol: String,
    pub side: PositionSide,
    pub volume_micros: i64,
    pub open_price_micros: i64,
    pub open_time: DateTime<Utc>,
    pub exit_price_micros: i64,
    pub exit_time: DateTime<Utc>,
    pub profit_micros: i64,
    pub commission_micros: i64,
    pub swap_micros: i64,
    pub exit_reason: String,
    pub external: bool,
    pub origin: PositionOrigin,
    pub metadata: Metadata,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn trade_row_roundtrips_through_json() {
        let t = Utc.with_ymd_and_hms(2024, 3, 4, 9, 0, 0).unwrap();
        let row = TradeRow {
            ticket: 1001,
            symbol: "EURUSD".to_string(),
            side: PositionSide::Long,
            volume_micros: 50_000,
            open_price_micros: 100_000_000,
            open_time: t,
            exit_price_micros: 102_000_000,
            exit_time: t + chrono::Duration::hours(1),
            profit_micros: 100_000,
            commission_micros: 0,
            swap_micros: 0,
            exit_reason: "profit_target".to_string(),
            external: false,
            origin: PositionOrigin::Native,
            metadata: Metadata::new(),
        };
        let json = serde_json::to_string(&row).unwrap();
        let back: TradeRow = serde_json::from_str(&json).unwrap();
        assert_eq!(back, row);
    }
}
