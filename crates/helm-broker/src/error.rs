/// Broker session failures.
///
/// Transient variants are retried inside the session wrapper with bounded
/// backoff; callers see them only after the retry budget is exhausted.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum BrokerError {
    NotConnected,
    Timeout { operation: String },
    RateLimited,
    /// The broker understood the request and said no.
    Rejected { reason: String },
    /// Network / terminal transport failure.
    Transport { detail: String },
    UnknownSymbol { symbol: String },
    UnknownTicket { ticket: i64 },
}

impl BrokerError {
    /// Transient faults are worth retrying; logical rejections are not.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            BrokerError::Timeout { .. } | BrokerError::RateLimited | BrokerError::Transport { .. }
        )
    }
}

impl std::fmt::Display for BrokerError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BrokerError::NotConnected => write!(f, "broker session not connected"),
            BrokerError::Timeout { operation } => write!(f, "broker timeout during {operation}"),
            BrokerError::RateLimited => write!(f, "broker rate limit hit"),
            BrokerError::Rejected { reason } => write!(f, "broker rejected request: {reason}"),
            BrokerError::Transport { detail } => write!(f, "broker transport failure: {detail}"),
            BrokerError::UnknownSymbol { symbol } => write!(f, "unknown symbol {symbol}"),
            BrokerError::UnknownTicket { ticket } => write!(f, "unknown ticket #{ticket}"),
        }
    }
}

impl std::error::Error for BrokerError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transient_classification() {
        assert!(BrokerError::Timeout {
            operation: "bars".to_string()
        }
        .is_transient());
        assert!(BrokerError::RateLimited.is_transient());
        assert!(BrokerError::Transport {
            detail: "socket reset".to_string()
        }
        .is_transient());
        assert!(!BrokerError::Rejected {
            reason: "off quotes".to_string()
        }
        .is_transient());
        assert!(!BrokerError::NotConnected.is_transient());
    }
}
