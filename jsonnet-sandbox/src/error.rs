use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("Setup error: {0}")]
    Setup(String),

    #[error("Failed to spawn evaluator process: {0}")]
    Spawn(#[source] std::io::Error),

    #[error("Evaluation failed: {0}")]
    Evaluation(String),

    #[error("Evaluation timed out after {0:?}")]
    Timeout(Duration),

    #[error("Protocol error: {0}")]
    Protocol(String),

    #[error("context canceled")]
    Cancelled,

    #[error("context deadline exceeded")]
    DeadlineExceeded,

    #[error("Process pool closed")]
    PoolClosed,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Result type for sandboxed evaluation
pub type Result<T> = std::result::Result<T, Error>;

/// Coarse classification of [`Error`] used for retry and recovery decisions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Invalid configuration. Never retried.
    Setup,
    /// Transient failure to create a subprocess.
    Spawn,
    /// The snippet itself failed, timed out or crashed its evaluator.
    Evaluation,
    /// Malformed framing or an unexpected channel closure.
    Protocol,
    /// The caller's context was cancelled or its deadline passed.
    Cancellation,
}

impl Error {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::Setup(_) | Error::PoolClosed => ErrorKind::Setup,
            Error::Spawn(_) => ErrorKind::Spawn,
            Error::Evaluation(_) | Error::Timeout(_) => ErrorKind::Evaluation,
            Error::Protocol(_) | Error::Io(_) | Error::Serialization(_) => ErrorKind::Protocol,
            Error::Cancelled | Error::DeadlineExceeded => ErrorKind::Cancellation,
        }
    }

    /// Only process creation failures are worth another attempt; anything
    /// that happened after the evaluator started is permanent.
    pub fn is_retryable(&self) -> bool {
        self.kind() == ErrorKind::Spawn
    }

    pub fn is_cancellation(&self) -> bool {
        self.kind() == ErrorKind::Cancellation
    }
}
