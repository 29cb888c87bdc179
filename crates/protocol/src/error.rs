//! Protocol error types

use thiserror::Error;

/// Errors converting wire codes into model types
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProtocolError {
    /// Block size multiplier outside `' '`, `B`, `K`, `M`
    #[error("Invalid memory unit: {0:?}")]
    InvalidUnit(char),

    /// Permission letter outside `a`..`g`
    #[error("Invalid memory permission: {0:?}")]
    InvalidPermission(char),
}

/// Type alias for protocol results
pub type Result<T> = std::result::Result<T, ProtocolError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let msg = format!("{}", ProtocolError::InvalidUnit('X'));
        assert!(msg.contains("Invalid memory unit"));
        assert!(msg.contains("'X'"));

        let msg = format!("{}", ProtocolError::InvalidPermission('z'));
        assert!(msg.contains("Invalid memory permission"));
    }
}
