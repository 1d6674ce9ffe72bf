//! Runtime error types.

use neurovox_core::error::ConfigError;
use neurovox_core::ids::SessionId;

/// Errors surfaced by the session lifecycle API.
///
/// Everything degradable inside a running pipeline (stale drops, rejected
/// batches, failed decode steps) travels the event stream as warnings
/// instead; these errors are the calls that fail outright.
#[derive(Debug, thiserror::Error)]
pub enum RuntimeError {
    /// The session configuration failed validation.
    #[error("invalid session config: {0}")]
    InvalidConfig(#[from] ConfigError),

    /// No session with this id is open.
    #[error("session not found: {0}")]
    SessionNotFound(SessionId),

    /// The registry is at its concurrent-session bound.
    #[error("server busy: {current} of {max} sessions active")]
    ServerBusy {
        /// Sessions currently open.
        current: usize,
        /// Configured bound.
        max: usize,
    },

    /// The caller pushed samples faster than ingestion could accept.
    #[error("ingest saturated for session {0}")]
    IngestSaturated(SessionId),

    /// The session was closed; no further pushes are accepted.
    #[error("session closed: {0}")]
    SessionClosed(SessionId),
}

impl RuntimeError {
    /// Whether the caller can usefully retry the failed call.
    #[must_use]
    pub fn is_recoverable(&self) -> bool {
        match self {
            Self::ServerBusy { .. } | Self::IngestSaturated(_) => true,
            Self::InvalidConfig(_) | Self::SessionNotFound(_) | Self::SessionClosed(_) => false,
        }
    }

    /// Error category string for logging.
    #[must_use]
    pub fn category(&self) -> &'static str {
        match self {
            Self::InvalidConfig(_) => "invalid_config",
            Self::SessionNotFound(_) => "session_not_found",
            Self::ServerBusy { .. } => "server_busy",
            Self::IngestSaturated(_) => "ingest_saturated",
            Self::SessionClosed(_) => "session_closed",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_formats() {
        let err = RuntimeError::ServerBusy { current: 4, max: 4 };
        assert_eq!(err.to_string(), "server busy: 4 of 4 sessions active");
    }

    #[test]
    fn recoverability() {
        assert!(RuntimeError::ServerBusy { current: 1, max: 1 }.is_recoverable());
        assert!(RuntimeError::IngestSaturated(SessionId::new()).is_recoverable());
        assert!(!RuntimeError::SessionNotFound(SessionId::new()).is_recoverable());
        assert!(!RuntimeError::SessionClosed(SessionId::new()).is_recoverable());
    }

    #[test]
    fn config_error_converts() {
        let err: RuntimeError = ConfigError::OutOfRange {
            field: "beam_width",
            reason: "must be greater than zero".into(),
        }
        .into();
        assert_eq!(err.category(), "invalid_config");
    }
}
