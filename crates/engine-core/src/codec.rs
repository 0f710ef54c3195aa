//! Wire codec for the desktop host protocol.
//!
//! Frames are single JSON objects carried as text messages. Inbound frames
//! are parsed defensively: anything that does not match a recognized shape is
//! reported as `INVALID_SERVER_MESSAGE` with the raw frame logged for
//! diagnostics.

use serde::Serialize;
use serde_json::{Map, Value};
use tracing::debug;

use crate::{
    error::{EngineError, ErrorCode, classify_server_code, user_message_for},
    types::{Action, ActionStatus, ExecutionResult},
};

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct AuthPayload<'a> {
    client_id: &'a str,
    device_id: &'a str,
    protocol_version: &'a str,
}

#[derive(Serialize)]
#[serde(tag = "type")]
enum ClientMessage<'a> {
    #[serde(rename = "AUTH")]
    Auth { payload: AuthPayload<'a> },
    #[serde(rename = "EXECUTE_ACTION")]
    ExecuteAction { timestamp: u64, payload: &'a Action },
    #[serde(rename = "PONG")]
    Pong { timestamp: u64 },
}

/// Serialize the AUTH envelope.
pub fn auth_frame(
    client_id: &str,
    device_id: &str,
    protocol_version: &str,
) -> Result<String, EngineError> {
    encode(&ClientMessage::Auth {
        payload: AuthPayload {
            client_id,
            device_id,
            protocol_version,
        },
    })
}

/// Serialize the EXECUTE_ACTION envelope.
pub fn execute_action_frame(timestamp_ms: u64, action: &Action) -> Result<String, EngineError> {
    encode(&ClientMessage::ExecuteAction {
        timestamp: timestamp_ms,
        payload: action,
    })
}

/// Serialize the PONG envelope.
pub fn pong_frame(timestamp_ms: u64) -> Result<String, EngineError> {
    encode(&ClientMessage::Pong {
        timestamp: timestamp_ms,
    })
}

fn encode(message: &ClientMessage<'_>) -> Result<String, EngineError> {
    serde_json::to_string(message)
        .map_err(|err| EngineError::client(format!("Failed to encode outbound frame: {err}")))
}

/// Parsed inbound frame, already classified for dispatch.
#[derive(Debug, Clone, PartialEq)]
pub enum InboundMessage {
    /// Host liveness probe; reset staleness and answer with PONG.
    Ping,
    AuthSuccess,
    /// Authentication rejected, either via AUTH_FAILURE or via an ERROR frame
    /// whose code reads as auth-related.
    AuthFailure { message: Option<String> },
    /// Host-reported error mapped through the fixed code table.
    ServerError(EngineError),
    ActionResult(ExecutionResult),
}

/// Parse one inbound text frame.
pub fn parse_inbound(raw: &str) -> Result<InboundMessage, EngineError> {
    let value: Value = serde_json::from_str(raw).map_err(|err| {
        debug!(frame = raw, error = %err, "discarding unparseable frame");
        EngineError::invalid_server_message("Received a malformed message from desktop.")
    })?;

    let Some(root) = value.as_object() else {
        debug!(frame = raw, "discarding non-object frame");
        return Err(EngineError::invalid_server_message(
            "Received a non-object message from desktop.",
        ));
    };

    let Some(kind) = root.get("type").and_then(Value::as_str) else {
        debug!(frame = raw, "discarding frame without a type field");
        return Err(EngineError::invalid_server_message(
            "Received a message without a type from desktop.",
        ));
    };

    match kind {
        "PING" => Ok(InboundMessage::Ping),
        "AUTH_SUCCESS" => Ok(InboundMessage::AuthSuccess),
        "AUTH_FAILURE" => Ok(InboundMessage::AuthFailure {
            message: message_field(root),
        }),
        "ERROR" => Ok(classify_error_frame(root, raw)),
        "ACTION_RESULT" => parse_action_result(root, raw),
        other => {
            debug!(frame = raw, kind = other, "discarding unrecognized frame type");
            Err(EngineError::invalid_server_message(format!(
                "Received an unrecognized message type '{other}' from desktop."
            )))
        }
    }
}

/// Resolve and classify an ERROR frame.
///
/// Code resolution priority: `payload.code`, top-level `code`,
/// `payload.message`, top-level `message`, empty. A resolved string that
/// reads as auth-related is routed to the auth-failure sink; everything else
/// maps through the fixed code table with `UNKNOWN_SERVER_ERROR` as the
/// fallback.
fn classify_error_frame(root: &Map<String, Value>, raw: &str) -> InboundMessage {
    let payload = root.get("payload").and_then(Value::as_object);

    let from_code = payload
        .and_then(|p| p.get("code"))
        .and_then(Value::as_str)
        .or_else(|| root.get("code").and_then(Value::as_str));

    let resolved = match from_code {
        Some(code) => code,
        None => {
            let fallback = payload
                .and_then(|p| p.get("message"))
                .and_then(Value::as_str)
                .or_else(|| root.get("message").and_then(Value::as_str));
            if let Some(message) = fallback {
                // A human message standing in for a code can collide with
                // real codes; keep the raw frame around for diagnostics.
                debug!(frame = raw, "host error code resolved from a message field");
                message
            } else {
                ""
            }
        }
    };

    let normalized = resolved.trim().to_uppercase();

    if is_auth_error(resolved) {
        let message = classify_server_code(&normalized)
            .and_then(user_message_for)
            .map(str::to_owned)
            .or_else(|| {
                let trimmed = resolved.trim();
                (!trimmed.is_empty()).then(|| trimmed.to_owned())
            });
        return InboundMessage::AuthFailure { message };
    }

    let code = classify_server_code(&normalized).unwrap_or(ErrorCode::UnknownServerError);
    if code == ErrorCode::UnknownServerError {
        debug!(frame = raw, "host error code outside the fixed table");
    }
    let message = user_message_for(code)
        .unwrap_or("Unexpected desktop error.")
        .to_owned();
    InboundMessage::ServerError(EngineError::new(code, message))
}

fn is_auth_error(resolved: &str) -> bool {
    let lower = resolved.trim().to_lowercase();
    ["auth", "unauthorized", "not authorized"]
        .iter()
        .any(|needle| lower.contains(needle))
}

fn message_field(root: &Map<String, Value>) -> Option<String> {
    root.get("payload")
        .and_then(Value::as_object)
        .and_then(|p| p.get("message"))
        .and_then(Value::as_str)
        .or_else(|| root.get("message").and_then(Value::as_str))
        .map(str::to_owned)
}

fn parse_action_result(
    root: &Map<String, Value>,
    raw: &str,
) -> Result<InboundMessage, EngineError> {
    let invalid = |detail: &str| {
        debug!(frame = raw, detail, "discarding invalid ACTION_RESULT frame");
        Err(EngineError::invalid_server_message(
            "Received an invalid action result from desktop.",
        ))
    };

    let Some(payload) = root.get("payload").and_then(Value::as_object) else {
        return invalid("missing payload object");
    };

    let Some(id) = payload.get("id").and_then(Value::as_str) else {
        return invalid("missing string id");
    };

    let status = match payload.get("status").and_then(Value::as_str) {
        Some("success") => ActionStatus::Success,
        Some("error") => ActionStatus::Error,
        _ => return invalid("status outside {success, error}"),
    };

    let Some(execution_time) = payload.get("executionTime").and_then(Value::as_f64) else {
        return invalid("missing numeric executionTime");
    };
    if !execution_time.is_finite() || execution_time < 0.0 {
        return invalid("executionTime not a non-negative finite number");
    }

    let error = match payload.get("error") {
        None | Some(Value::Null) => None,
        Some(Value::String(message)) => Some(message.clone()),
        Some(_) => return invalid("error field is not a string"),
    };

    Ok(InboundMessage::ActionResult(ExecutionResult {
        id: id.to_owned(),
        status,
        execution_time,
        error,
    }))
}
