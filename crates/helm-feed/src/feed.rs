use chrono::{DateTime, Utc};
use tracing::debug;

use helm_broker::{BrokerError, BrokerSession};
use helm_schemas::Timeframe;

use crate::BarWindow;

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum FeedError {
    Broker(BrokerError),
    EmptyHistory,
}

impl std::fmt::Display for FeedError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FeedError::Broker(e) => write!(f, "bar fetch failed: {e}"),
            FeedError::EmptyHistory => write!(f, "broker returned no bars"),
        }
    }
}

impl std::error::Error for FeedError {}

impl From<BrokerError> for FeedError {
    fn from(e: BrokerError) -> Self {
        FeedError::Broker(e)
    }
}

/// One tick's worth of market data.
#[derive(Clone, Debug)]
pub struct FeedUpdate {
    pub window: BarWindow,
    /// False when the most recent bar's open time equals the previous tick's.
    /// Entry phases are suppressed on a stale window; exits still run.
    pub new_bar: bool,
}

/// Pulls a bounded history window per tick. Restartable: internal state is
/// only the open time of the last bar seen, used for new-bar detection.
#[derive(Debug)]
pub struct BarFeed {
    symbol: String,
    timeframe: Timeframe,
    lookback: usize,
    last_seen_open: Option<DateTime<Utc>>,
}

impl BarFeed {
    pub fn new(symbol: impl Into<String>, timeframe: Timeframe, lookback: usize) -> Self {
        Self {
            symbol: symbol.into(),
            timeframe,
            lookback,
            last_seen_open: None,
        }
    }

    pub fn symbol(&self) -> &str {
        &self.symbol
    }

    pub fn timeframe(&self) -> Timeframe {
        self.timeframe
    }

    pub fn pull<S: BrokerSession>(&mut self, session: &mut S) -> Result<FeedUpdate, FeedError> {
        let raw = session.bars(&self.symbol, self.timeframe, self.lookback)?;
        if raw.is_empty() {
            return Err(FeedError::EmptyHistory);
        }
        let window = BarWindow::from_bars(raw);
        let newest = window.last().map(|b| b.open_time);
        let new_bar = newest != self.last_seen_open;
        if new_bar {
            self.last_seen_open = newest;
        } else {
            debug!(symbol = %self.symbol, "no new closed bar this tick");
        }
        Ok(FeedUpdate { window, new_bar })
    }
}
