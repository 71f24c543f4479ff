//! Error types for Key-Visual

use std::fmt;

/// Result type alias for Key-Visual operations
pub type Result<T> = std::result::Result<T, Error>;

/// Error types for Key-Visual
#[derive(Debug)]
pub enum Error {
    /// IO errors
    Io(std::io::Error),
    /// Serialization errors
    Serialization(String),
    /// Configuration errors
    Config(String),
    /// Client-facing invalid request parameters
    InvalidInput(String),
    /// Axis violates its structural invariants
    InvalidAxis(String),
    /// Snapshot time is not newer than the retained history
    OutOfOrder { time: i64, latest: i64 },
    /// Persistence mirror failed (in-memory state already committed)
    Persistence(String),
    /// Persisted record could not be decoded
    CorruptRecord { layer: u8, end_time: i64, reason: String },
    /// Sample source failure
    Source(String),
    /// Outbound HTTP errors
    Http(reqwest::Error),
    /// Lifecycle transition rejected
    InvalidTransition { from: &'static str, to: &'static str },
    /// Heatmap requested while collection is stopped
    ServiceNotRunning,
    /// Internal error
    Internal(String),
}

impl Error {
    /// Whether the error was caused by the caller's parameters.
    pub fn is_invalid_input(&self) -> bool {
        matches!(self, Error::InvalidInput(_))
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::Io(e) => Some(e),
            Error::Http(e) => Some(e),
            _ => None,
        }
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::Io(e) => write!(f, "IO error: {}", e),
            Error::Serialization(msg) => write!(f, "Serialization error: {}", msg),
            Error::Config(msg) => write!(f, "Configuration error: {}", msg),
            Error::InvalidInput(msg) => write!(f, "Invalid input: {}", msg),
            Error::InvalidAxis(msg) => write!(f, "Invalid axis: {}", msg),
            Error::OutOfOrder { time, latest } => write!(
                f,
                "Snapshot at {} is not newer than the latest retained snapshot at {}",
                time, latest
            ),
            Error::Persistence(msg) => write!(f, "Persistence error: {}", msg),
            Error::CorruptRecord {
                layer,
                end_time,
                reason,
            } => write!(
                f,
                "Corrupt record (layer={}, end_time={}): {}",
                layer, end_time, reason
            ),
            Error::Source(msg) => write!(f, "Sample source error: {}", msg),
            Error::Http(e) => write!(f, "HTTP error: {}", e),
            Error::InvalidTransition { from, to } => {
                write!(f, "Invalid lifecycle transition: {} -> {}", from, to)
            }
            Error::ServiceNotRunning => write!(f, "Key visual service is not running"),
            Error::Internal(msg) => write!(f, "Internal error: {}", msg),
        }
    }
}

impl From<std::io::Error> for Error {
    fn from(e: std::io::Error) -> Self {
        Error::Io(e)
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::Serialization(e.to_string())
    }
}

impl From<bincode::Error> for Error {
    fn from(e: bincode::Error) -> Self {
        Error::Serialization(e.to_string())
    }
}

impl From<reqwest::Error> for Error {
    fn from(e: reqwest::Error) -> Self {
        Error::Http(e)
    }
}
