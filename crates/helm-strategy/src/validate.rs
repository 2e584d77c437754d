use helm_schemas::{Signal, SignalSide};

/// Why a signal was rejected before reaching the risk gate.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SignalFlaw {
    MissingSymbol,
    ConfidenceOutOfRange { got: String },
    StopOnWrongSide,
    TakeProfitOnWrongSide,
}

impl std::fmt::Display for SignalFlaw {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SignalFlaw::MissingSymbol => write!(f, "signal has no symbol"),
            SignalFlaw::ConfidenceOutOfRange { got } => {
                write!(f, "confidence {got} outside [0, 1]")
            }
            SignalFlaw::StopOnWrongSide => {
                write!(f, "stop level on the wrong side of the reference price")
            }
            SignalFlaw::TakeProfitOnWrongSide => {
                write!(f, "take-profit level on the wrong side of the reference price")
            }
        }
    }
}

impl std::error::Error for SignalFlaw {}

/// Structural validation of a signal. Directional signals must have their
/// stop below (long) / above (short) the reference price, and take-profit on
/// the opposite side. Flat signals are always structurally valid.
pub fn validate_signal(signal: &Signal) -> Result<(), SignalFlaw> {
    if signal.symbol.is_empty() {
        return Err(SignalFlaw::MissingSymbol);
    }
    if !(0.0..=1.0).contains(&signal.confidence) {
        return Err(SignalFlaw::ConfidenceOutOfRange {
            got: format!("{:.4}", signal.confidence),
        });
    }
    let reference = signal.reference_price_micros;
    match signal.side {
        SignalSide::Long => {
            if signal.stop_micros.is_some_and(|sl| sl >= reference) {
                return Err(SignalFlaw::StopOnWrongSide);
            }
            if signal.take_profit_micros.is_some_and(|tp| tp <= reference) {
                return Err(SignalFlaw::TakeProfitOnWrongSide);
            }
        }
        SignalSide::Short => {
            if signal.stop_micros.is_some_and(|sl| sl <= reference) {
                return Err(SignalFlaw::StopOnWrongSide);
            }
            if signal.take_profit_micros.is_some_and(|tp| tp >= reference) {
                return Err(SignalFlaw::TakeProfitOnWrongSide);
            }
        }
        SignalSide::Flat => {}
    }
    Ok(())
}
