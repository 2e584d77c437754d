use helm_risk::RefusalCode;

/// The tick phases, in execution order.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Phase {
    Health,
    Reconcile,
    Bars,
    Indicators,
    Strategy,
    Entry,
    Monitor,
    Exits,
    Housekeeping,
}

impl Phase {
    pub fn label(self) -> &'static str {
        match self {
            Phase::Health => "health",
            Phase::Reconcile => "reconcile",
            Phase::Bars => "bars",
            Phase::Indicators => "indicators",
            Phase::Strategy => "strategy",
            Phase::Entry => "entry",
            Phase::Monitor => "monitor",
            Phase::Exits => "exits",
            Phase::Housekeeping => "housekeeping",
        }
    }
}

/// A contained failure: the phase it happened in and what went wrong.
/// Faults never unwind through the tick.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PhaseFault {
    pub phase: Phase,
    pub detail: String,
}

/// What one tick did. Returned by `ControlLoop::tick` so tests (and the
/// housekeeping logs) can observe the loop without reaching into internals.
#[derive(Clone, Debug, Default)]
pub struct TickReport {
    pub tick: u64,
    pub connected: bool,
    pub reconciled: bool,
    pub new_bar: bool,
    pub signal_id: Option<String>,
    pub entry_ticket: Option<i64>,
    pub refusal: Option<RefusalCode>,
    /// (ticket, reason) per executed exit decision.
    pub exits: Vec<(i64, String)>,
    pub external_closes: Vec<i64>,
    pub faults: Vec<PhaseFault>,
}

impl TickReport {
    pub fn new(tick: u64) -> Self {
        Self {
            tick,
            ..Self::default()
        }
    }

    pub fn fault(&mut self, phase: Phase, detail: impl Into<String>) {
        self.faults.push(PhaseFault {
            phase,
            detail: detail.into(),
        });
    }

    pub fn has_fault_in(&self, phase: Phase) -> bool {
        self.faults.iter().any(|f| f.phase == phase)
    }
}
