use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::types::ConnectionState;

/// Stable error code carried in every error surfaced to observers.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum ErrorCode {
    #[serde(rename = "CLIENT_ERROR")]
    ClientError,
    #[serde(rename = "SOCKET_ERROR")]
    SocketError,
    #[serde(rename = "INVALID_SERVER_MESSAGE")]
    InvalidServerMessage,
    #[serde(rename = "MAX_STEPS_EXCEEDED")]
    MaxStepsExceeded,
    #[serde(rename = "MAX_TEXT_LENGTH_EXCEEDED")]
    MaxTextLengthExceeded,
    #[serde(rename = "COMMAND_EXECUTION_DISABLED")]
    CommandExecutionDisabled,
    #[serde(rename = "DEVICE_NOT_AUTHORIZED")]
    DeviceNotAuthorized,
    #[serde(rename = "UNKNOWN_SERVER_ERROR")]
    UnknownServerError,
}

impl ErrorCode {
    /// Wire/display form of the code.
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCode::ClientError => "CLIENT_ERROR",
            ErrorCode::SocketError => "SOCKET_ERROR",
            ErrorCode::InvalidServerMessage => "INVALID_SERVER_MESSAGE",
            ErrorCode::MaxStepsExceeded => "MAX_STEPS_EXCEEDED",
            ErrorCode::MaxTextLengthExceeded => "MAX_TEXT_LENGTH_EXCEEDED",
            ErrorCode::CommandExecutionDisabled => "COMMAND_EXECUTION_DISABLED",
            ErrorCode::DeviceNotAuthorized => "DEVICE_NOT_AUTHORIZED",
            ErrorCode::UnknownServerError => "UNKNOWN_SERVER_ERROR",
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Map a normalized (trimmed, uppercased) host error code to its stable code.
///
/// Codes outside the fixed table fall back to `UNKNOWN_SERVER_ERROR` at the
/// classification site.
pub fn classify_server_code(normalized: &str) -> Option<ErrorCode> {
    match normalized {
        "MAX_STEPS_EXCEEDED" => Some(ErrorCode::MaxStepsExceeded),
        "MAX_TEXT_LENGTH_EXCEEDED" => Some(ErrorCode::MaxTextLengthExceeded),
        "COMMAND_EXECUTION_DISABLED" => Some(ErrorCode::CommandExecutionDisabled),
        "DEVICE_NOT_AUTHORIZED" => Some(ErrorCode::DeviceNotAuthorized),
        _ => None,
    }
}

/// User-facing message for codes that have a fixed one.
pub fn user_message_for(code: ErrorCode) -> Option<&'static str> {
    match code {
        ErrorCode::MaxStepsExceeded => Some("Too many steps in one action (max 50)."),
        ErrorCode::MaxTextLengthExceeded => Some("Text step exceeds 1000 characters."),
        ErrorCode::CommandExecutionDisabled => {
            Some("Terminal commands are disabled on the desktop.")
        }
        ErrorCode::DeviceNotAuthorized => Some("This device is not authorized on the desktop."),
        ErrorCode::UnknownServerError => Some("Unexpected desktop error."),
        _ => None,
    }
}

/// Stable error payload surfaced to observers.
///
/// The engine never throws across its boundary; every failure becomes one of
/// these, delivered as an event.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Error)]
#[error("{code}: {message}")]
pub struct EngineError {
    pub code: ErrorCode,
    pub message: String,
}

impl EngineError {
    /// Construct a new engine error.
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }

    /// Locally-originated failure (`CLIENT_ERROR`).
    pub fn client(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::ClientError, message)
    }

    /// Transport-level failure (`SOCKET_ERROR`).
    pub fn socket(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::SocketError, message)
    }

    /// Unparseable or unrecognized inbound frame.
    pub fn invalid_server_message(detail: impl Into<String>) -> Self {
        Self::new(ErrorCode::InvalidServerMessage, detail)
    }

    /// Rejected transition attempt; state is left unchanged by the caller.
    pub fn illegal_transition(from: ConnectionState, to: ConnectionState) -> Self {
        Self::client(format!("Illegal state transition: {from} -> {to}"))
    }

    /// Send attempted while the channel is not open.
    pub fn not_connected() -> Self {
        Self::client("WebSocket is not connected.")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keeps_illegal_transition_message_stable() {
        let err = EngineError::illegal_transition(
            ConnectionState::Disconnected,
            ConnectionState::Connected,
        );
        assert_eq!(err.code, ErrorCode::ClientError);
        assert_eq!(
            err.message,
            "Illegal state transition: DISCONNECTED -> CONNECTED"
        );
    }

    #[test]
    fn serializes_codes_in_wire_casing() {
        let encoded = serde_json::to_string(&EngineError::socket("WebSocket connection error."))
            .expect("error should serialize");
        assert_eq!(
            encoded,
            r#"{"code":"SOCKET_ERROR","message":"WebSocket connection error."}"#
        );
    }

    #[test]
    fn classifies_known_server_codes() {
        assert_eq!(
            classify_server_code("COMMAND_EXECUTION_DISABLED"),
            Some(ErrorCode::CommandExecutionDisabled)
        );
        assert_eq!(classify_server_code("SOMETHING_ELSE"), None);
    }

    #[test]
    fn fixed_table_codes_have_user_messages() {
        assert_eq!(
            user_message_for(ErrorCode::CommandExecutionDisabled),
            Some("Terminal commands are disabled on the desktop.")
        );
        assert_eq!(
            user_message_for(ErrorCode::UnknownServerError),
            Some("Unexpected desktop error.")
        );
        assert_eq!(user_message_for(ErrorCode::ClientError), None);
    }
}
