//! Error kinds shared across the bridge.

use thiserror::Error;

/// Result type for bridge operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while bridging a panel.
#[derive(Debug, Error)]
pub enum Error {
    /// LAN API call could not be completed.
    #[error("Transport error: {0}")]
    Transport(String),

    /// LAN API responded but signaled a vendor error code.
    #[error("Protocol error {code}: {message}")]
    Protocol { code: i64, message: String },

    /// Request or response body could not be understood.
    #[error("Malformed input: {0}")]
    MalformedInput(String),

    /// Required configuration or association is missing.
    #[error("Invalid state: {0}")]
    InvalidState(String),

    /// A required field is absent from a parsed structure.
    #[error("Missing value: {0}")]
    MissingValue(String),

    /// The owning connector has to stop.
    #[error("Terminate: {0}")]
    Terminate(String),

    /// Serialization error.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Other error.
    #[error("Other: {0}")]
    Other(#[from] anyhow::Error),
}

impl Error {
    /// Whether the error must stop the owning connector.
    pub fn is_terminating(&self) -> bool {
        matches!(self, Error::Terminate(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display_protocol() {
        let error = Error::Protocol {
            code: 401,
            message: "invalid access token".to_string(),
        };
        assert_eq!(error.to_string(), "Protocol error 401: invalid access token");
        assert!(!error.is_terminating());
    }

    #[test]
    fn test_terminate_is_terminating() {
        let error = Error::Terminate("socket closed".to_string());
        assert!(error.is_terminating());
        assert!(error.to_string().contains("socket closed"));
    }
}
