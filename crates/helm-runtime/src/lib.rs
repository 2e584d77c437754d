//! helm-runtime
//!
//! The control loop: a single-writer scheduler that drives one tick of work
//! every poll interval through a fixed phase order — health/reconnect,
//! reconcile, bars, indicators, strategy, entry, position refresh, exits,
//! housekeeping — and owns startup wiring and the shutdown sequence.
//!
//! Faults are contained at phase boundaries: a failing phase is logged into
//! the tick report and the remaining phases still run, except where their
//! precondition is gone (no broker connection skips everything but the
//! reconnect attempt). Only a shutdown signal or a configured fatal breaks
//! the loop.

mod control;
mod report;

pub use control::{shutdown_flag, ControlLoop, LoopConfig, LoopSummary};
pub use report::{Phase, PhaseFault, TickReport};
