//! Error types for tunnel operations.

use thiserror::Error;

/// Errors surfaced by tunnel construction and the application-facing tunnel API.
#[derive(Debug, Error)]
pub enum TunnelError {
    /// The caller supplied an argument the operation cannot work with.
    #[error("invalid argument: {reason}")]
    InvalidArgument {
        /// What was wrong with the argument.
        reason: String,
    },

    /// The deadline elapsed while the call was blocked. The tunnel stays open.
    #[error("operation timed out")]
    Timeout,

    /// The tunnel or its connection reached terminal state.
    #[error("tunnel closed")]
    Closed,

    /// The peer tore the tunnel down with a diagnostic.
    #[error("remote error: {reason}")]
    Remote {
        /// Diagnostic sent by the peer.
        reason: String,
    },

    /// The relay connection failed to deliver an outbound message.
    #[error("relay send failed: {reason}")]
    Relay {
        /// Transport failure description.
        reason: String,
    },

    /// A configuration file could not be parsed or failed validation.
    #[error("configuration error: {reason}")]
    Config {
        /// What was wrong with the configuration.
        reason: String,
    },

    /// Reading a configuration file failed.
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl TunnelError {
    pub(crate) fn invalid(reason: impl Into<String>) -> Self {
        TunnelError::InvalidArgument {
            reason: reason.into(),
        }
    }
}

/// Result alias for tunnel operations.
pub type Result<T> = std::result::Result<T, TunnelError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_remote_error_display() {
        let err = TunnelError::Remote {
            reason: "peer crashed".to_string(),
        };
        assert_eq!(err.to_string(), "remote error: peer crashed");
    }

    #[test]
    fn test_invalid_argument_display() {
        let err = TunnelError::invalid("nil or empty message");
        assert_eq!(err.to_string(), "invalid argument: nil or empty message");
    }

    #[test]
    fn test_io_error_conversion() {
        let io = std::io::Error::new(std::io::ErrorKind::NotFound, "missing");
        let err: TunnelError = io.into();
        assert!(matches!(err, TunnelError::Io(_)));
    }
}
