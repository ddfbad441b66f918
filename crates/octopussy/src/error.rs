// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Error type shared by the messaging layer.

use std::fmt;
use std::io;

/// Errors raised by the messaging layer.
#[derive(Debug)]
pub enum Error {
    // ========================================================================
    // Transport Errors
    // ========================================================================
    /// I/O error with underlying cause.
    Io(io::Error),

    // ========================================================================
    // Data Errors
    // ========================================================================
    /// Not enough bytes to decode the named item.
    Truncated {
        /// What was being decoded.
        what: &'static str,
        /// Bytes required.
        needed: usize,
        /// Bytes left in the buffer.
        available: usize,
    },
    /// Decoded data is structurally invalid.
    Corrupt(String),
    /// A name could not be resolved to an atomic id.
    UnknownAtomicId(String),

    // ========================================================================
    // Configuration / State Errors
    // ========================================================================
    /// Configuration rejected by validation.
    InvalidConfig(String),
    /// Operation requires a running dispatcher.
    NotRunning,
    /// The dispatcher behind a handle has shut down.
    Stopped,
    /// No work process is attached at the given address.
    WpNotFound,
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::Io(e) => write!(f, "I/O error: {}", e),
            Error::Truncated {
                what,
                needed,
                available,
            } => write!(
                f,
                "Truncated {}: need {} bytes, {} available",
                what, needed, available
            ),
            Error::Corrupt(msg) => write!(f, "Corrupt data: {}", msg),
            Error::UnknownAtomicId(name) => write!(f, "Unknown atomic id: {}", name),
            Error::InvalidConfig(msg) => write!(f, "Invalid configuration: {}", msg),
            Error::NotRunning => write!(f, "Dispatcher is not running"),
            Error::Stopped => write!(f, "Dispatcher has stopped"),
            Error::WpNotFound => write!(f, "Work process not found"),
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
    fn from(e: io::Error) -> Self {
        Error::Io(e)
    }
}

/// Convenient alias for results using the crate `Error` type.
pub type Result<T> = core::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_truncated() {
        let err = Error::Truncated {
            what: "header",
            needed: 8,
            available: 3,
        };
        assert_eq!(
            err.to_string(),
            "Truncated header: need 8 bytes, 3 available"
        );
    }

    #[test]
    fn test_io_source() {
        use std::error::Error as _;
        let err: Error = io::Error::new(io::ErrorKind::BrokenPipe, "gone").into();
        assert!(err.source().is_some());
        assert!(Error::Stopped.source().is_none());
    }
}
