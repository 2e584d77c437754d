//! helm-broker
//!
//! The broker session capability. Everything the loop needs from a broker is
//! behind [`BrokerSession`]: health probe, account state, bar history, open
//! positions, order submit/close. Implementations:
//!
//! - a live terminal adapter (out of tree — it implements this trait),
//! - [`paper::PaperSession`] — deterministic in-memory session used by
//!   dry runs and the manual CLI,
//! - the scripted mock in `helm-testkit` for scenario tests.
//!
//! The session is an exclusive resource: only the execution engine calls the
//! mutating methods; the bar feed and position tracker only read. Rate
//! limiting and transient-fault retry belong inside the session wrapper
//! (see [`retry`]), never at call sites.

mod error;
pub mod paper;
pub mod retry;
mod session;

pub use error::BrokerError;
pub use session::{
    BrokerPosition, BrokerSession, CloseRequest, HealthReport, Secret, SessionCredentials,
    SymbolSpec,
};
