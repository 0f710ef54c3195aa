use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::EngineError;

/// Connection lifecycle state of the engine.
///
/// Exactly one value at any time; transitions are guarded by
/// [`crate::state_machine::ConnectionStateMachine`].
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    Reconnecting,
    Error,
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ConnectionState::Disconnected => "DISCONNECTED",
            ConnectionState::Connecting => "CONNECTING",
            ConnectionState::Connected => "CONNECTED",
            ConnectionState::Reconnecting => "RECONNECTING",
            ConnectionState::Error => "ERROR",
        };
        f.write_str(name)
    }
}

/// One atomic host operation inside an action.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum Step {
    /// Press an ordered chord of keys together.
    Shortcut { keys: Vec<String> },
    /// Inject a text string.
    Text { value: String },
    /// Wait for `duration` milliseconds before the next step.
    Delay { duration: f64 },
    /// Press a single key.
    Key { key: String },
    /// Run a shell command line on the host.
    Command { command: String },
}

impl Step {
    /// Whether this step runs a shell command on the host.
    pub fn is_command(&self) -> bool {
        matches!(self, Step::Command { .. })
    }
}

/// A client-originated request to execute a bounded step sequence.
///
/// `id` is engine-assigned (`<epochMillis>-<nonce>`) and unique for the
/// lifetime of the engine instance.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Action {
    pub id: String,
    pub steps: Vec<Step>,
}

/// Outcome reported by the host for one action.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ActionStatus {
    Success,
    Error,
}

/// Normalized host-side execution result for one action.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionResult {
    pub id: String,
    pub status: ActionStatus,
    /// Host-reported execution time in milliseconds; non-negative.
    pub execution_time: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Observer-facing engine events.
///
/// Events are emitted in the order their causes occur. For a given action id
/// at most one of `ActionResult`/`ActionTimedOut` fires; whichever cause
/// occurred first wins and any later arrival is dropped silently.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub enum EngineEvent {
    StateChanged {
        state: ConnectionState,
        reconnect_attempt: u32,
    },
    Connected,
    Disconnected,
    AuthSucceeded,
    AuthFailed {
        message: String,
    },
    ActionResult(ExecutionResult),
    ActionTimedOut {
        id: String,
    },
    Error(EngineError),
    /// Non-fatal dispatch warning; `None` clears a previously shown warning.
    Warning(Option<String>),
    Heartbeat {
        timestamp_ms: u64,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn serializes_steps_with_wire_tags() {
        let shortcut = serde_json::to_string(&Step::Shortcut {
            keys: vec!["control".into(), "s".into()],
        })
        .expect("shortcut should serialize");
        assert_eq!(shortcut, r#"{"type":"shortcut","keys":["control","s"]}"#);

        let text = serde_json::to_string(&Step::Text { value: "hi".into() })
            .expect("text should serialize");
        assert_eq!(text, r#"{"type":"text","value":"hi"}"#);

        let delay = serde_json::to_string(&Step::Delay { duration: 250.0 })
            .expect("delay should serialize");
        assert_eq!(delay, r#"{"type":"delay","duration":250.0}"#);

        let key = serde_json::to_string(&Step::Key { key: "enter".into() })
            .expect("key should serialize");
        assert_eq!(key, r#"{"type":"key","key":"enter"}"#);

        let command = serde_json::to_string(&Step::Command {
            command: "ls -la".into(),
        })
        .expect("command should serialize");
        assert_eq!(command, r#"{"type":"command","command":"ls -la"}"#);
    }

    #[test]
    fn omits_absent_error_from_results() {
        let encoded = serde_json::to_string(&ExecutionResult {
            id: "1700000000000-1".into(),
            status: ActionStatus::Success,
            execution_time: 42.0,
            error: None,
        })
        .expect("result should serialize");
        assert_eq!(
            encoded,
            r#"{"id":"1700000000000-1","status":"success","executionTime":42.0}"#
        );
    }

    #[test]
    fn formats_states_in_wire_casing() {
        assert_eq!(ConnectionState::Disconnected.to_string(), "DISCONNECTED");
        assert_eq!(ConnectionState::Reconnecting.to_string(), "RECONNECTING");
    }
}
