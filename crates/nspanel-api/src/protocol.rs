//! Directive protocol envelopes.
//!
//! Requests arrive as
//!
//! ```json
//! {"directive": {"header": {"name": "...", "message_id": "...", "version": "1"},
//!                "endpoint": {...}, "payload": {...}}}
//! ```
//!
//! and are answered with an `event` envelope carrying the same `message_id`.

use axum::http::StatusCode;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use uuid::Uuid;

/// Path the panel posts directives to.
pub const DIRECTIVE_PATH: &str = "/do-directive";

/// Content type of every directive response.
pub const CONTENT_TYPE: &str = "application/hap+json";

pub const PROTOCOL_VERSION: &str = "1";

pub const UPDATE_DEVICE_STATES: &str = "UpdateDeviceStates";
pub const UPDATE_DEVICE_STATES_RESPONSE: &str = "UpdateDeviceStatesResponse";
pub const ERROR_RESPONSE: &str = "ErrorResponse";

/// Error type reported in an `ErrorResponse` payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorType {
    EndpointUnreachable,
    EndpointLowPower,
    InvalidDirective,
    NoSuchEndpoint,
    NotSupportedInCurrentMode,
    InternalError,
    RemoteKeyCodeNotLearned,
}

impl ErrorType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorType::EndpointUnreachable => "ENDPOINT_UNREACHABLE",
            ErrorType::EndpointLowPower => "ENDPOINT_LOW_POWER",
            ErrorType::InvalidDirective => "INVALID_DIRECTIVE",
            ErrorType::NoSuchEndpoint => "NO_SUCH_ENDPOINT",
            ErrorType::NotSupportedInCurrentMode => "NOT_SUPPORTED_IN_CURRENT_MODE",
            ErrorType::InternalError => "INTERNAL_ERROR",
            ErrorType::RemoteKeyCodeNotLearned => "REMOTE_KEY_CODE_NOT_LEARNED",
        }
    }

    /// HTTP status the error type is answered with.
    pub fn status(&self) -> StatusCode {
        match self {
            ErrorType::EndpointUnreachable | ErrorType::EndpointLowPower => {
                StatusCode::SERVICE_UNAVAILABLE
            }
            ErrorType::InvalidDirective | ErrorType::RemoteKeyCodeNotLearned => {
                StatusCode::BAD_REQUEST
            }
            ErrorType::NoSuchEndpoint => StatusCode::NOT_FOUND,
            ErrorType::NotSupportedInCurrentMode => StatusCode::CONFLICT,
            ErrorType::InternalError => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl fmt::Display for ErrorType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProtocolHeader {
    pub name: String,
    pub message_id: String,
    #[serde(default = "default_version")]
    pub version: String,
}

fn default_version() -> String {
    PROTOCOL_VERSION.to_string()
}

impl ProtocolHeader {
    pub fn new(name: impl Into<String>, message_id: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            message_id: message_id.into(),
            version: default_version(),
        }
    }
}

/// Target device of a directive.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Endpoint {
    pub serial_number: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub third_serial_number: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tags: Option<Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Directive {
    pub header: ProtocolHeader,
    #[serde(default)]
    pub endpoint: Option<Endpoint>,
    #[serde(default)]
    pub payload: Value,
}

/// Request body of `POST /do-directive`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DirectiveEnvelope {
    pub directive: Directive,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    pub header: ProtocolHeader,
    pub payload: Value,
}

/// Response body of `POST /do-directive`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventEnvelope {
    pub event: Event,
}

impl EventEnvelope {
    pub fn new(name: impl Into<String>, message_id: impl Into<String>, payload: Value) -> Self {
        Self {
            event: Event {
                header: ProtocolHeader::new(name, message_id),
                payload,
            },
        }
    }

    /// `ErrorResponse` event of the given type.
    pub fn error(message_id: impl Into<String>, error_type: ErrorType) -> Self {
        Self::new(
            ERROR_RESPONSE,
            message_id,
            serde_json::json!({ "type": error_type.as_str() }),
        )
    }

    pub fn message_id(&self) -> &str {
        &self.event.header.message_id
    }
}

/// Best-effort `directive.header.message_id` of a raw request body.
///
/// Falls back to a fresh UUID when the body is not JSON or the field is
/// missing, empty or not a string.
pub fn extract_message_id(body: &[u8]) -> String {
    serde_json::from_slice::<Value>(body)
        .ok()
        .as_ref()
        .and_then(|v| v.pointer("/directive/header/message_id"))
        .and_then(Value::as_str)
        .filter(|id| !id.is_empty())
        .map(str::to_string)
        .unwrap_or_else(new_message_id)
}

pub fn new_message_id() -> String {
    Uuid::new_v4().to_string()
}
