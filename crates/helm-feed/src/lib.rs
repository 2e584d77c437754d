//! helm-feed
//!
//! Bar ingestion and derived features. [`BarFeed`] pulls a bounded history
//! window per tick and normalises it into an ordered, deduplicated sequence;
//! [`IndicatorPipeline`] computes derived columns over the window. An error
//! in one indicator leaves that column absent and never aborts the others.

mod feed;
mod indicators;
mod window;

pub use feed::{BarFeed, FeedError, FeedUpdate};
pub use indicators::{FeatureRow, IndicatorPipeline, IndicatorSpec};
pub use window::BarWindow;
