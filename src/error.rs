//! Error types for the load harness.
//!
//! Scheduling and executor errors surface synchronously to the caller of the
//! operation that triggered them. Errors raised inside a periodic tick never
//! reach a caller; they are logged at the tick boundary instead.

use thiserror::Error;

/// Result type alias for harness operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while generating or instrumenting load.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum Error {
    /// A non-positive rate was requested.
    #[error("Invalid rate: {0} (must be positive)")]
    InvalidRate(u32),

    /// A scheduler that is already running was asked to schedule again.
    #[error("Scheduler is already scheduled")]
    AlreadyScheduled,

    /// A service that is already running was asked to start again.
    #[error("Service is already running")]
    AlreadyRunning,

    /// Bounded executor queue is full and the policy rejects new work.
    #[error("Executor overloaded: queue capacity {capacity} exhausted")]
    Overloaded {
        /// Queue capacity of the saturated executor.
        capacity: usize,
    },

    /// A client connection could not be established.
    #[error("Connection {index} failed: {reason}")]
    ConnectionFailure {
        /// Index of the connection that failed.
        index: usize,
        /// Underlying failure description.
        reason: String,
    },

    /// Malformed STOMP frame.
    #[error("Invalid frame: {0}")]
    InvalidFrame(String),

    /// Frame size exceeds configured maximum.
    #[error("Frame too large: {size} bytes (max: {max})")]
    FrameTooLarge {
        /// Actual frame size.
        size: usize,
        /// Maximum allowed size.
        max: usize,
    },

    /// Message body could not be decoded or encoded.
    #[error("Invalid payload: {0}")]
    InvalidPayload(String),

    /// Configuration value rejected.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// I/O error occurred.
    #[error("I/O error: {0}")]
    Io(String),

    /// The executor no longer accepts work.
    #[error("Executor has been shut down")]
    ExecutorShutdown,

    /// A submitted task returned an error or panicked.
    #[error("Task failed: {0}")]
    TaskFailed(String),

    /// The session has been closed.
    #[error("Session closed")]
    SessionClosed,

    /// No tokio runtime is available on the calling thread.
    #[error("No tokio runtime available")]
    NoRuntime,
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Error::Io(err.to_string())
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::InvalidPayload(err.to_string())
    }
}
