//! Error types of the directive endpoint.

use axum::http::StatusCode;
use thiserror::Error;

use crate::protocol::ErrorType;

/// Failure while handling a directive request.
#[derive(Debug, Error)]
pub enum DirectiveError {
    /// Typed protocol error carrying its error type.
    #[error("{error_type}: {message}")]
    Protocol {
        error_type: ErrorType,
        message: String,
    },

    /// Request rejected at the HTTP level.
    #[error("Malformed request ({status}): {message}")]
    MalformedHttp { status: StatusCode, message: String },

    /// Any other failure.
    #[error("Internal error: {0}")]
    Internal(#[from] anyhow::Error),
}

impl DirectiveError {
    pub fn protocol(error_type: ErrorType, message: impl Into<String>) -> Self {
        Self::Protocol {
            error_type,
            message: message.into(),
        }
    }

    pub fn invalid_directive(message: impl Into<String>) -> Self {
        Self::protocol(ErrorType::InvalidDirective, message)
    }

    pub fn malformed(status: StatusCode, message: impl Into<String>) -> Self {
        Self::MalformedHttp {
            status,
            message: message.into(),
        }
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal(anyhow::anyhow!(message.into()))
    }

    /// Error type reported to the panel.
    pub fn error_type(&self) -> ErrorType {
        match self {
            DirectiveError::Protocol { error_type, .. } => *error_type,
            DirectiveError::MalformedHttp { .. } => ErrorType::InvalidDirective,
            DirectiveError::Internal(_) => ErrorType::InternalError,
        }
    }

    /// HTTP status of the error response.
    pub fn status(&self) -> StatusCode {
        match self {
            DirectiveError::Protocol { error_type, .. } => error_type.status(),
            DirectiveError::MalformedHttp { status, .. } => *status,
            DirectiveError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl From<nspanel_core::Error> for DirectiveError {
    fn from(err: nspanel_core::Error) -> Self {
        match err {
            nspanel_core::Error::MalformedInput(msg) | nspanel_core::Error::MissingValue(msg) => {
                Self::invalid_directive(msg)
            }
            nspanel_core::Error::Serialization(e) => Self::invalid_directive(e.to_string()),
            other => Self::Internal(other.into()),
        }
    }
}

/// Failure of the directive HTTP server.
#[derive(Debug, Error)]
pub enum ServerError {
    #[error("Failed to bind {address}: {source}")]
    Bind {
        address: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Directive server terminated: {0}")]
    Terminated(String),
}

impl From<ServerError> for nspanel_core::Error {
    fn from(err: ServerError) -> Self {
        nspanel_core::Error::Terminate(err.to_string())
    }
}
