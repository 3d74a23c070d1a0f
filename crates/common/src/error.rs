//! Common error types
//!
//! [`ErrorKind`] is the classification every driver error maps onto, so
//! callers can decide between "fix the config", "check the board" and
//! "restart" without matching on component-specific variants.

use std::fmt;
use thiserror::Error;

/// Error classification shared by all driver components
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Caller mistake (bad port, malformed descriptors); no retry
    Configuration,
    /// PHY or stack programming failed; install was rolled back
    Hardware,
    /// Operation not valid in the current driver state; nothing changed
    Lifecycle,
    /// Resources may have leaked; only a restart recovers
    InternalFatal,
}

impl ErrorKind {
    pub fn is_fatal(self) -> bool {
        matches!(self, ErrorKind::InternalFatal)
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ErrorKind::Configuration => "configuration",
            ErrorKind::Hardware => "hardware",
            ErrorKind::Lifecycle => "lifecycle",
            ErrorKind::InternalFatal => "internal fatal",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Error)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Channel error: {0}")]
    Channel(String),
}

pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_display() {
        assert_eq!(ErrorKind::InternalFatal.to_string(), "internal fatal");
        assert!(ErrorKind::InternalFatal.is_fatal());
        assert!(!ErrorKind::Lifecycle.is_fatal());
    }
}
