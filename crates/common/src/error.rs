//! Common error types
//!
//! One variant per fault class the server distinguishes. Validation faults are
//! raised before any subprocess is spawned; execution faults carry whatever the
//! tool wrote to its error stream; parse faults abort the current snapshot.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Execution error (status {}): {stderr}", status.map_or_else(|| "unknown".to_string(), |c| c.to_string()))]
    Execution {
        /// Exit code of the tool, if it exited normally
        status: Option<i32>,
        /// Captured error stream (or a description when none was written)
        stderr: String,
    },

    #[error("Parse error: {0}")]
    Parse(String),

    #[error("Hot-plug error: {0}")]
    Hotplug(String),

    #[error("Channel error: {0}")]
    Channel(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<protocol::ProtocolError> for Error {
    fn from(e: protocol::ProtocolError) -> Self {
        Error::Parse(e.to_string())
    }
}

pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_execution_display() {
        let err = Error::Execution {
            status: Some(0),
            stderr: "No DFU capable USB device available".to_string(),
        };
        let msg = err.to_string();
        assert!(msg.contains("status 0"));
        assert!(msg.contains("No DFU capable USB device available"));

        let err = Error::Execution {
            status: None,
            stderr: "killed".to_string(),
        };
        assert!(err.to_string().contains("status unknown"));
    }

    #[test]
    fn test_protocol_error_is_parse_fault() {
        let err: Error = protocol::ProtocolError::InvalidUnit('X').into();
        assert!(matches!(err, Error::Parse(_)));
    }
}
