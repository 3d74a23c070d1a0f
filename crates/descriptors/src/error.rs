//! Descriptor error types

use thiserror::Error;

/// Errors raised while resolving a descriptor set
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DescriptorError {
    /// The set does not hang together (missing mandatory descriptor,
    /// qualifier/high-speed mismatch, string count mismatch, ...)
    #[error("Inconsistent descriptor set: {0}")]
    Inconsistent(String),

    /// A descriptor's own header is structurally invalid
    #[error("Malformed descriptor: {0}")]
    Malformed(String),
}

/// Type alias for descriptor results
pub type Result<T> = std::result::Result<T, DescriptorError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = DescriptorError::Inconsistent("full-speed configuration missing".into());
        let msg = format!("{}", err);
        assert!(msg.contains("Inconsistent descriptor set"));
        assert!(msg.contains("full-speed configuration missing"));
    }
}
