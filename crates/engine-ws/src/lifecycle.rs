//! Host-lifecycle gate: foreground/background phases suspend and resume the
//! engine.

use tokio::{sync::watch, task::JoinHandle};
use tracing::debug;

use crate::engine::EngineHandle;

/// Two-state host process phase, as reported by the platform shell.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HostPhase {
    Foreground,
    Background,
}

/// Forward phase changes into the engine until the source goes away.
///
/// Backgrounding suspends reconnects, clears pending work, and drops the
/// session (the target endpoint is kept); foregrounding reopens it.
pub fn spawn_lifecycle_gate(
    handle: EngineHandle,
    mut phases: watch::Receiver<HostPhase>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut current = *phases.borrow();
        loop {
            if phases.changed().await.is_err() {
                debug!("host lifecycle source closed");
                break;
            }
            let next = *phases.borrow_and_update();
            if next == current {
                continue;
            }
            current = next;

            match next {
                HostPhase::Background => handle.backgrounded(),
                HostPhase::Foreground => handle.foregrounded(),
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use std::{sync::Arc, time::Duration};

    use engine_core::{ConnectionState, EngineConfig};
    use engine_platform::FixedDeviceIdentity;
    use tokio::time;

    use super::*;
    use crate::engine::spawn;

    #[tokio::test(start_paused = true)]
    async fn forwards_phase_changes_to_the_engine() {
        let (handle, _task) = spawn(
            EngineConfig::default(),
            Arc::new(FixedDeviceIdentity::new("device-under-test")),
        );
        let (phases_tx, phases_rx) = watch::channel(HostPhase::Foreground);
        let _gate = spawn_lifecycle_gate(handle.clone(), phases_rx);

        phases_tx
            .send(HostPhase::Background)
            .expect("phase send should work");

        // Backgrounding with no session is a forced DISCONNECTED no-op.
        time::sleep(Duration::from_millis(10)).await;
        assert_eq!(handle.state(), ConnectionState::Disconnected);
    }
}
