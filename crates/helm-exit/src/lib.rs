//! helm-exit
//!
//! Exit-strategy arbitration. Each rule is an independent state machine
//! behind the narrow [`ExitRule`] capability; the [`ExitArbiter`] evaluates
//! them per position in priority order and emits at most one
//! [`ExitDecision`] per position per tick.
//!
//! Rules never mutate position records — all shared knowledge flows through
//! the record plus per-rule scratch, keyed by ticket and freed when the
//! tracker removes the ticket.

mod adverse_movement;
mod arbiter;
mod profit_target;
mod time_based;
mod trailing_stop;

pub use adverse_movement::{AdverseMovement, AdverseMovementParams};
pub use arbiter::ExitArbiter;
pub use profit_target::{ProfitLevel, ProfitTarget, ProfitTargetParams};
pub use time_based::{TimeBased, TimeBasedParams};
pub use trailing_stop::{TrailingStop, TrailingStopParams};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use helm_schemas::{AccountSnapshot, Metadata, PositionRecord};

/// Market context shared by every rule evaluation in a tick. `now` is the
/// broker's server time; all calendar logic keys off it, never the local
/// clock.
#[derive(Clone, Debug)]
pub struct EvalContext<'a> {
    pub now: DateTime<Utc>,
    pub account: &'a AccountSnapshot,
    /// Volatility proxy from the indicator pipeline, in price micros.
    pub atr_micros: Option<i64>,
}

/// A rule's instruction to close a position, in part or in full.
#[derive(Clone, Debug, PartialEq)]
pub struct ExitDecision {
    pub ticket: i64,
    /// Stable snake_case reason code ("adverse_movement", "profit_target", ...).
    pub reason: String,
    /// Name of the rule that produced the decision.
    pub rule: String,
    /// `None` closes the full position; `Some(v)` closes `v ≤ volume`.
    pub close_volume_micros: Option<i64>,
    pub triggered_at: DateTime<Utc>,
    pub confidence: f64,
    pub metadata: Metadata,
}

/// The exit-rule capability.
pub trait ExitRule: Send {
    fn name(&self) -> &'static str;

    /// Priority in [0, 100]; higher evaluates first.
    fn priority(&self) -> u8;

    fn is_enabled(&self) -> bool {
        true
    }

    /// Inspect one position. May update per-ticket scratch; must not assume
    /// it will be called for every position every tick (a higher-priority
    /// rule may have short-circuited).
    fn evaluate(&mut self, position: &PositionRecord, ctx: &EvalContext) -> Option<ExitDecision>;

    /// Drop all scratch for a ticket. Called when the tracker removes it.
    fn forget(&mut self, _ticket: i64) {}

    /// Drop all scratch.
    fn reset(&mut self) {}

    /// Tickets this rule currently holds scratch for (state audits).
    fn scratch_tickets(&self) -> Vec<i64> {
        Vec::new()
    }
}

fn default_enabled() -> bool {
    true
}

/// One `exit_strategies` config entry: `{ type, enabled, params: {...} }`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ExitRuleEntry {
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    #[serde(flatten)]
    pub kind: ExitRuleKind,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "params", rename_all = "snake_case")]
pub enum ExitRuleKind {
    AdverseMovement(AdverseMovementParams),
    TimeBased(TimeBasedParams),
    ProfitTarget(ProfitTargetParams),
    TrailingStop(TrailingStopParams),
}

/// Why a rule could not be built from its config entry.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ExitBuildError {
    pub rule: &'static str,
    pub detail: String,
}

impl std::fmt::Display for ExitBuildError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "cannot build exit rule {}: {}", self.rule, self.detail)
    }
}

impl std::error::Error for ExitBuildError {}

impl ExitRuleKind {
    pub fn build(&self) -> Result<Box<dyn ExitRule>, ExitBuildError> {
        match self {
            ExitRuleKind::AdverseMovement(p) => Ok(Box::new(AdverseMovement::new(p.clone()))),
            ExitRuleKind::TimeBased(p) => Ok(Box::new(TimeBased::new(p.clone())?)),
            ExitRuleKind::ProfitTarget(p) => Ok(Box::new(ProfitTarget::new(p.clone()))),
            ExitRuleKind::TrailingStop(p) => Ok(Box::new(TrailingStop::new(p.clone()))),
        }
    }
}
