//! Error taxonomy for the distributed protocol
//!
//! Protocol-level failures are typed so the coordinator and worker run loops
//! can decide between retrying, dropping a worker and aborting the run.

use std::io;
use std::time::Duration;
use thiserror::Error;

/// A received record violated the wire contract
#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("connection closed by peer")]
    ConnectionClosed,

    #[error("short record: expected {expected} bytes, got {got} before end of stream")]
    ShortRecord { expected: usize, got: usize },

    #[error("datagram of {got} bytes does not match record size {expected}")]
    WrongSize { expected: usize, got: usize },

    #[error("invalid {field} in record: {value}")]
    InvalidField { field: &'static str, value: String },

    #[error("failed to encode record: {0}")]
    Encode(#[source] bincode::Error),

    #[error("failed to decode record: {0}")]
    Decode(#[source] bincode::Error),
}

/// Errors raised by rendezvous, registration, dispatch and collection
#[derive(Debug, Error)]
pub enum DistributedError {
    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    #[error("{context}: {source}")]
    Transport {
        context: String,
        #[source]
        source: io::Error,
    },

    #[error("timed out after {after:?} while {phase}")]
    Timeout { phase: &'static str, after: Duration },

    #[error("worker in slot {slot} dropped out: {reason}")]
    WorkerLost { slot: usize, reason: String },

    #[error("cannot partition work: {0}")]
    Partition(String),

    #[error("integration task panicked")]
    TaskPanicked,

    #[error("failed to spawn integration thread: {0}")]
    Spawn(#[source] io::Error),

    #[error("invalid configuration: {0}")]
    Config(String),
}

impl DistributedError {
    /// Wrap an IO error with a short description of what was being attempted
    pub fn transport(context: impl Into<String>, source: io::Error) -> Self {
        Self::Transport {
            context: context.into(),
            source,
        }
    }

    /// Whether a fresh attempt could plausibly succeed
    ///
    /// Deadlines and transient socket failures are retryable. Protocol
    /// violations, bad configuration and panics are not.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Timeout { .. } => true,
            Self::Transport { source, .. } => matches!(
                source.kind(),
                io::ErrorKind::ConnectionRefused
                    | io::ErrorKind::ConnectionReset
                    | io::ErrorKind::ConnectionAborted
                    | io::ErrorKind::NotConnected
                    | io::ErrorKind::BrokenPipe
                    | io::ErrorKind::TimedOut
                    | io::ErrorKind::Interrupted
                    | io::ErrorKind::WouldBlock
            ),
            Self::Protocol(ProtocolError::ConnectionClosed) => true,
            _ => false,
        }
    }
}

/// Result type for the distributed protocol layer
pub type NetResult<T> = std::result::Result<T, DistributedError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_timeout_is_retryable() {
        let err = DistributedError::Timeout {
            phase: "waiting for results",
            after: Duration::from_secs(5),
        };
        assert!(err.is_retryable());
        assert!(err.to_string().contains("waiting for results"));
    }

    #[test]
    fn test_transport_classification() {
        let refused = DistributedError::transport(
            "connecting",
            io::Error::from(io::ErrorKind::ConnectionRefused),
        );
        assert!(refused.is_retryable());

        let denied = DistributedError::transport(
            "binding",
            io::Error::from(io::ErrorKind::PermissionDenied),
        );
        assert!(!denied.is_retryable());
    }

    #[test]
    fn test_protocol_errors_are_fatal() {
        let err: DistributedError = ProtocolError::ShortRecord { expected: 36, got: 12 }.into();
        assert!(!err.is_retryable());
        assert!(err.to_string().contains("expected 36 bytes, got 12"));

        let closed: DistributedError = ProtocolError::ConnectionClosed.into();
        assert!(closed.is_retryable());
    }
}
