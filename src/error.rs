//! Error types for the synchronizer.

use std::io;
use thiserror::Error;

/// Result type alias for synchronizer operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for the synchronizer.
#[derive(Error, Debug)]
pub enum Error {
    /// The node topology is empty or otherwise unusable.
    #[error("topology error: {0}")]
    Topology(String),

    /// Configuration errors.
    #[error("config error: {0}")]
    Config(String),

    /// A node could not be listed or reached for a transfer.
    #[error("node unreachable: {node}: {reason}")]
    NodeUnreachable { node: String, reason: String },

    /// The transfer facility reported a failure for a batch.
    #[error("transfer failed (status {status:?}): {output}")]
    TransferFailure { status: Option<i32>, output: String },

    /// The operation timed out.
    #[error("operation timed out after {0:?}")]
    Timeout(std::time::Duration),

    /// A listing line or config value could not be parsed.
    #[error("parse error: {0}")]
    Parse(String),

    /// I/O error.
    #[error("io error: {0}")]
    Io(#[from] io::Error),
}

impl Error {
    /// Create a config error.
    pub fn config(msg: impl Into<String>) -> Self {
        Error::Config(msg.into())
    }

    /// Create a topology error.
    pub fn topology(msg: impl Into<String>) -> Self {
        Error::Topology(msg.into())
    }

    /// Create an unreachable-node error.
    pub fn unreachable(node: impl Into<String>, reason: impl Into<String>) -> Self {
        Error::NodeUnreachable {
            node: node.into(),
            reason: reason.into(),
        }
    }
}

impl From<regex::Error> for Error {
    fn from(e: regex::Error) -> Self {
        Error::Config(format!("invalid exclusion pattern: {}", e))
    }
}

impl From<toml::de::Error> for Error {
    fn from(e: toml::de::Error) -> Self {
        Error::Config(format!("invalid config file: {}", e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_messages() {
        let err = Error::unreachable("store2", "connection refused");
        assert_eq!(err.to_string(), "node unreachable: store2: connection refused");
        assert_eq!(
            Error::topology("ring has no nodes").to_string(),
            "topology error: ring has no nodes"
        );
    }

    #[test]
    fn test_regex_error_is_config() {
        let err: Error = regex::Regex::new("(").unwrap_err().into();
        assert!(matches!(err, Error::Config(_)));
    }
}
