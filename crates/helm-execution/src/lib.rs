//! helm-execution
//!
//! The execution engine — the single choke-point for broker mutations.
//!
//! # Idempotency
//!
//! Every submission is keyed by a client tag derived deterministically from
//! the originating signal id (`sig:<id>`) or close intent
//! (`close:<ticket>:<nonce>`). The engine keeps a bounded cache of
//! tag → last-known-outcome: resubmission with a known tag returns the prior
//! outcome instead of placing a second order. After a reconnect the cache is
//! re-seeded from the broker's open positions (their order comments carry
//! the tag), so a restarted process cannot double-submit either.
//!
//! # Partial fills
//!
//! A partial fill is never a failure. The engine polls the working order up
//! to `fill_timeout_ms`; on timeout it cancels the remainder and reports the
//! consolidated outcome.

mod engine;
mod tag_cache;

pub use engine::{ExecutionConfig, ExecutionEngine, SYNTHETIC_TICKET_BASE};
pub use tag_cache::TagCache;
