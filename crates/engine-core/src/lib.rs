//! Core contract for the TapVolt connection engine.
//!
//! This crate defines the wire protocol types and codec, the connection
//! lifecycle state machine, the reconnect backoff policy, action validation,
//! and the duplicate-result window. It performs no I/O and owns no timers;
//! the runtime crate drives it.

/// Capped exponential reconnect backoff.
pub mod backoff;
/// Inbound frame parsing and outbound envelope serialization.
pub mod codec;
/// Engine tuning constants.
pub mod config;
/// Stable error payloads and host error-code classification.
pub mod error;
/// Connection lifecycle transition guard.
pub mod state_machine;
/// Frontend-facing protocol types (states, steps, results, events).
pub mod types;
/// Pre-dispatch action validation.
pub mod validator;
/// Bounded FIFO used for duplicate-result suppression.
pub mod window;

pub use backoff::ReconnectPolicy;
pub use codec::{InboundMessage, auth_frame, execute_action_frame, parse_inbound, pong_frame};
pub use config::{EngineConfig, HEARTBEAT_CLOSE_CODE, HEARTBEAT_CLOSE_REASON};
pub use error::{EngineError, ErrorCode, classify_server_code, user_message_for};
pub use state_machine::ConnectionStateMachine;
pub use types::{Action, ActionStatus, ConnectionState, EngineEvent, ExecutionResult, Step};
pub use validator::{COMMAND_STEP_WARNING, dispatch_warning, validate_action};
pub use window::CompletedWindow;
