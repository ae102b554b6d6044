//! Error taxonomy for the acquisition layer
//!
//! Nothing here is fatal: every variant ends up as transient state on a
//! channel or on the write executor, and polling carries on.

use thiserror::Error;

/// Result alias used across the engine
pub type Result<T, E = Error> = std::result::Result<T, E>;

/// An address range that does not fit the active domain
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RangeError {
    #[error("count must be between 1 and {limit}, got {count}")]
    InvalidCount { count: i64, limit: u16 },
    #[error("start address must be between 0 and {max}, got {start}")]
    InvalidStart { start: i64, max: i64 },
}

/// Local validation failures. These never reach the transport.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error(transparent)]
    Range(#[from] RangeError),
    #[error("write address must be between 0 and {max}, got {address}")]
    WriteAddress { address: i64, max: u16 },
    #[error("register value must be between 0 and {}, got {0}", u16::MAX)]
    WriteValue(i64),
}

/// Top-level error for reads and writes against the gateway
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Error {
    #[error("invalid request: {0}")]
    Validation(#[from] ValidationError),
    #[error("gateway unreachable: {0}")]
    Connectivity(String),
    #[error("gateway responded with HTTP {status}")]
    Server { status: u16 },
    #[error("malformed gateway response: {0}")]
    MalformedResponse(String),
}

impl Error {
    /// Stable label used for metrics and API payloads
    pub fn kind(&self) -> &'static str {
        match self {
            Error::Validation(_) => "validation",
            Error::Connectivity(_) => "connectivity",
            Error::Server { .. } => "server",
            Error::MalformedResponse(_) => "malformed_response",
        }
    }

    /// Whether the next scheduled poll may succeed without user action
    pub fn is_transient(&self) -> bool {
        !matches!(self, Error::Validation(_))
    }

    pub fn malformed(msg: impl Into<String>) -> Self {
        Error::MalformedResponse(msg.into())
    }
}

impl From<RangeError> for Error {
    fn from(err: RangeError) -> Self {
        Error::Validation(ValidationError::Range(err))
    }
}
