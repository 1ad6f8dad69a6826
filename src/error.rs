//! Error types for the session engine

/// Result type alias using the engine error
pub type Result<T> = std::result::Result<T, EngineError>;

/// Errors that can occur in session-engine operations
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    /// Invalid configuration parameter
    #[error("Invalid configuration: {0}")]
    Config(String),

    /// Engine invariant violation (wrong state for the requested operation)
    #[error("Invalid state: {0}")]
    State(String),

    /// A signaling deadline elapsed
    #[error("Signal timed out: {0}")]
    SignalTimedOut(String),

    /// A transport deadline elapsed
    #[error("Transport timed out: {0}")]
    TransportTimedOut(String),

    /// An engine-level deadline elapsed (e.g. server response to a request)
    #[error("Engine timed out: {0}")]
    EngineTimedOut(String),

    /// The underlying WebRTC stack rejected an operation
    #[error("WebRTC error: {0}")]
    WebRtc(String),

    /// Signaling socket or OS-level network failure
    #[error("Network error: {0}")]
    Network(String),

    /// Connection establishment failure
    #[error("Connect error: {0}")]
    Connect(String),

    /// A pending wait was cancelled by reset or teardown
    #[error("Cancelled: {0}")]
    Cancelled(String),

    /// I/O error from the socket layer
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Any other error
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl EngineError {
    /// Check if this error is a completer/operation deadline failure
    pub fn is_timeout(&self) -> bool {
        matches!(
            self,
            EngineError::SignalTimedOut(_)
                | EngineError::TransportTimedOut(_)
                | EngineError::EngineTimedOut(_)
        )
    }

    /// Check if this error came from an aborted or reset wait
    pub fn is_cancelled(&self) -> bool {
        matches!(self, EngineError::Cancelled(_))
    }

    /// Check if another connection attempt could plausibly succeed
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            EngineError::Network(_) | EngineError::Connect(_) | EngineError::Io(_)
        ) || self.is_timeout()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = EngineError::State("publisher is nil".to_string());
        assert_eq!(err.to_string(), "Invalid state: publisher is nil");
    }

    #[test]
    fn test_is_timeout() {
        assert!(EngineError::SignalTimedOut("join".into()).is_timeout());
        assert!(EngineError::TransportTimedOut("primary".into()).is_timeout());
        assert!(EngineError::EngineTimedOut("add track".into()).is_timeout());
        assert!(!EngineError::State("x".into()).is_timeout());
    }

    #[test]
    fn test_is_retryable() {
        assert!(EngineError::Network("socket reset".into()).is_retryable());
        assert!(EngineError::TransportTimedOut("ice".into()).is_retryable());
        assert!(!EngineError::State("already reconnecting".into()).is_retryable());
        assert!(!EngineError::Cancelled("reset".into()).is_retryable());
    }

    #[test]
    fn test_io_error_conversion() {
        let io_err = std::io::Error::new(std::io::ErrorKind::ConnectionReset, "reset");
        let err = EngineError::from(io_err);
        assert!(matches!(err, EngineError::Io(_)));
    }
}
