//! Error types for the ipatlas library

use std::fmt;

/// Result type alias for MMDB operations
pub type Result<T> = std::result::Result<T, MmdbError>;

/// Main error type for MMDB operations
///
/// Every variant is recoverable at the call site: a failed lookup never
/// corrupts the loaded reader, and subsequent lookups still succeed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MmdbError {
    /// The buffer is not an MMDB file (metadata marker missing) or its
    /// structure is internally inconsistent
    CorruptFormat(String),

    /// The metadata section decoded, but is not a map or lacks required
    /// fields
    MalformedMetadata(String),

    /// Unrecognized type tag in a control byte
    UnknownTypeTag(u8),

    /// A read would run past the end of the buffer
    TruncatedData(String),

    /// A pointer redirection chain exceeded the depth bound
    PointerDepthExceeded,

    /// Query address family cannot be answered by this tree
    /// (IPv6 query against an IPv4-only tree)
    IncompatibleAddressFamily(String),

    /// Query string is not a valid IPv4 or IPv6 address
    InvalidAddress(String),

    /// I/O error while opening or mapping a file
    Io(String),
}

impl fmt::Display for MmdbError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MmdbError::CorruptFormat(msg) => write!(f, "Corrupt MMDB format: {}", msg),
            MmdbError::MalformedMetadata(msg) => write!(f, "Malformed metadata: {}", msg),
            MmdbError::UnknownTypeTag(tag) => write!(f, "Unknown type tag: {}", tag),
            MmdbError::TruncatedData(msg) => write!(f, "Truncated data: {}", msg),
            MmdbError::PointerDepthExceeded => {
                write!(f, "Pointer redirection chain exceeded depth bound")
            }
            MmdbError::IncompatibleAddressFamily(msg) => {
                write!(f, "Incompatible address family: {}", msg)
            }
            MmdbError::InvalidAddress(msg) => write!(f, "Invalid IP address: {}", msg),
            MmdbError::Io(msg) => write!(f, "I/O error: {}", msg),
        }
    }
}

impl std::error::Error for MmdbError {}

impl From<std::io::Error> for MmdbError {
    fn from(err: std::io::Error) -> Self {
        MmdbError::Io(err.to_string())
    }
}

impl From<std::net::AddrParseError> for MmdbError {
    fn from(err: std::net::AddrParseError) -> Self {
        MmdbError::InvalidAddress(err.to_string())
    }
}
