//! Error types for clearing, the wire codec and the compute transport.

use std::fmt;
use thiserror::Error;

/// Result type for clearing operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors raised anywhere between job construction and result delivery.
#[derive(Error, Debug)]
pub enum Error {
    /// The job's arrays are inconsistent or hold non-finite values.
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// A frame violated the wire protocol.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// Connect, read or write failure.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// A check that should be unreachable failed inside the engine.
    #[error("engine invariant violated: {0}")]
    EngineInvariantViolation(String),

    /// The compute server rejected the job and reported why.
    #[error("server reported {kind} error: {message}")]
    Remote { kind: ErrorKind, message: String },

    /// Bad configuration value.
    #[error("configuration error: {0}")]
    Config(String),
}

impl Error {
    /// The category of this error. Remote errors report the server's category.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::InvalidInput(_) => ErrorKind::InvalidInput,
            Error::Protocol(_) => ErrorKind::Protocol,
            Error::Io(_) => ErrorKind::Io,
            Error::EngineInvariantViolation(_) => ErrorKind::EngineInvariantViolation,
            Error::Remote { kind, .. } => *kind,
            Error::Config(_) => ErrorKind::Config,
        }
    }

    pub(crate) fn invalid(msg: impl Into<String>) -> Self {
        Error::InvalidInput(msg.into())
    }

    pub(crate) fn protocol(msg: impl Into<String>) -> Self {
        Error::Protocol(msg.into())
    }
}

/// Error categories, shared by both ends of a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    InvalidInput,
    Protocol,
    Io,
    EngineInvariantViolation,
    Config,
}

impl ErrorKind {
    /// One-byte code carried in error frames.
    pub fn code(self) -> u8 {
        match self {
            ErrorKind::InvalidInput => 1,
            ErrorKind::Protocol => 2,
            ErrorKind::Io => 3,
            ErrorKind::EngineInvariantViolation => 4,
            ErrorKind::Config => 5,
        }
    }

    pub fn from_code(code: u8) -> Option<Self> {
        match code {
            1 => Some(ErrorKind::InvalidInput),
            2 => Some(ErrorKind::Protocol),
            3 => Some(ErrorKind::Io),
            4 => Some(ErrorKind::EngineInvariantViolation),
            5 => Some(ErrorKind::Config),
            _ => None,
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ErrorKind::InvalidInput => "invalid-input",
            ErrorKind::Protocol => "protocol",
            ErrorKind::Io => "io",
            ErrorKind::EngineInvariantViolation => "engine-invariant",
            ErrorKind::Config => "config",
        };
        f.write_str(name)
    }
}
