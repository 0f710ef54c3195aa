use engine_core::Step;
use tokio::sync::oneshot;

/// Intents accepted by the engine task.
///
/// `Authenticate` and `SendAction` carry reply slots so the façade keeps the
/// synchronous-looking contracts (`bool` / assigned action id); everything
/// else is fire-and-forget.
#[derive(Debug)]
pub(crate) enum EngineCommand {
    Connect {
        address: String,
    },
    Authenticate {
        client_name: String,
        reply: oneshot::Sender<bool>,
    },
    SendAction {
        step: Step,
        reply: oneshot::Sender<Option<String>>,
    },
    Disconnect,
    Foregrounded,
    Backgrounded,
}
