//! WebSocket runtime for the TapVolt connection engine.
//!
//! One engine task owns the connection state machine, the reconnect
//! scheduler, the heartbeat monitor, and the action dispatcher; the
//! [`EngineHandle`] façade feeds it intents and exposes its event stream.

mod channel;
mod command;
mod engine;
/// Host foreground/background gating.
pub mod lifecycle;
mod timer;
mod transport;

pub use engine::{EngineHandle, EngineSnapshot, spawn};
pub use lifecycle::{HostPhase, spawn_lifecycle_gate};
