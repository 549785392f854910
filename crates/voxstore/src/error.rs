//! Error types for voxstore

use std::fmt;
use std::io;

/// Result type alias for voxstore operations
pub type Result<T> = std::result::Result<T, Error>;

/// Error types for store operations
#[derive(Debug)]
pub enum Error {
    /// I/O error while reading or writing payloads or the index
    Io(io::Error),

    /// Index header or record could not be parsed
    Parse(String),

    /// Payload on disk does not have the size recorded in the index
    PayloadMismatch {
        /// Payload file name
        locator: String,
        /// Size recorded in the index
        expected: u64,
        /// Size found on disk
        actual: u64,
    },

    /// Configuration rejected at construction
    InvalidConfig(String),

    /// Store is closed
    Closed,
}

impl Error {
    /// True when the underlying cause is a missing file
    pub fn is_not_found(&self) -> bool {
        match self {
            Error::Io(e) => e.kind() == io::ErrorKind::NotFound,
            _ => false,
        }
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::Io(e) => write!(f, "Storage I/O error: {}", e),
            Error::Parse(msg) => write!(f, "Parse error: {}", msg),
            Error::PayloadMismatch {
                locator,
                expected,
                actual,
            } => write!(
                f,
                "Payload {} has {} bytes, index expects {}",
                locator, actual, expected
            ),
            Error::InvalidConfig(msg) => write!(f, "Invalid configuration: {}", msg),
            Error::Closed => write!(f, "Store is closed"),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::Io(e) => Some(e),
            _ => None,
        }
    }
}

impl From<io::Error> for Error {
    fn from(err: io::Error) -> Self {
        Error::Io(err)
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::Parse(err.to_string())
    }
}

impl From<nom::Err<nom::error::Error<&[u8]>>> for Error {
    fn from(err: nom::Err<nom::error::Error<&[u8]>>) -> Self {
        Error::Parse(format!("{:?}", err))
    }
}
