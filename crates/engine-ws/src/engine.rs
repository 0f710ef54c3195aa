//! Engine task and façade handle.
//!
//! All engine state lives on one task: public-method intents, transport
//! events, and timer expiries arrive as messages and are handled one at a
//! time, so nothing is ever read or written concurrently.

use std::{
    collections::HashMap,
    sync::Arc,
    time::{SystemTime, UNIX_EPOCH},
};

use engine_core::{
    Action, ActionStatus, CompletedWindow, ConnectionState, ConnectionStateMachine, EngineConfig,
    EngineError, EngineEvent, ExecutionResult, HEARTBEAT_CLOSE_CODE, HEARTBEAT_CLOSE_REASON,
    InboundMessage, ReconnectPolicy, Step, auth_frame, dispatch_warning, execute_action_frame,
    parse_inbound, pong_frame, validate_action,
};
use engine_platform::DeviceIdentity;
use tokio::{
    sync::{broadcast, mpsc, oneshot, watch},
    task::JoinHandle,
    time::Instant,
};
use tracing::{debug, info, warn};
use url::Url;

use crate::{
    channel::EngineChannels,
    command::EngineCommand,
    timer::{self, TimerHandle},
    transport::{Connector, Transport, TransportEvent, TransportUpdate, WebSocketConnector},
};

const EVENT_BUFFER: usize = 256;

/// Point-in-time engine readout served to the pure getters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EngineSnapshot {
    pub state: ConnectionState,
    pub reconnect_attempt: u32,
    /// Wall-clock ms of the last liveness signal, if any.
    pub last_heartbeat_ms: Option<u64>,
}

/// Cloneable façade over the engine task.
#[derive(Debug, Clone)]
pub struct EngineHandle {
    commands: mpsc::UnboundedSender<EngineCommand>,
    events: broadcast::Sender<EngineEvent>,
    snapshot: watch::Receiver<EngineSnapshot>,
}

impl EngineHandle {
    /// Open a session toward `address`, normalizing it to a `ws://` URL.
    pub fn connect(&self, address: impl Into<String>) {
        let _ = self.commands.send(EngineCommand::Connect {
            address: address.into(),
        });
    }

    /// Authenticate with the remembered device identity under `client_name`.
    ///
    /// Resolves to whether the AUTH frame was handed to an open channel.
    pub async fn authenticate(&self, client_name: impl Into<String>) -> bool {
        let (reply_tx, reply_rx) = oneshot::channel();
        if self
            .commands
            .send(EngineCommand::Authenticate {
                client_name: client_name.into(),
                reply: reply_tx,
            })
            .is_err()
        {
            return false;
        }
        reply_rx.await.unwrap_or(false)
    }

    /// Dispatch a single-step action; resolves to its assigned id, or `None`
    /// when validation or the send failed (the failure arrives as an event).
    pub async fn send_action(&self, step: Step) -> Option<String> {
        let (reply_tx, reply_rx) = oneshot::channel();
        if self
            .commands
            .send(EngineCommand::SendAction {
                step,
                reply: reply_tx,
            })
            .is_err()
        {
            return None;
        }
        reply_rx.await.unwrap_or(None)
    }

    /// Tear down the session and forget the target endpoint.
    pub fn disconnect(&self) {
        let _ = self.commands.send(EngineCommand::Disconnect);
    }

    /// Host entered the foreground; resume if an endpoint is remembered.
    pub fn foregrounded(&self) {
        let _ = self.commands.send(EngineCommand::Foregrounded);
    }

    /// Host left the foreground; suspend and drop the session.
    pub fn backgrounded(&self) {
        let _ = self.commands.send(EngineCommand::Backgrounded);
    }

    /// Subscribe to engine events.
    pub fn subscribe(&self) -> broadcast::Receiver<EngineEvent> {
        self.events.subscribe()
    }

    pub fn state(&self) -> ConnectionState {
        self.snapshot.borrow().state
    }

    pub fn reconnect_attempt(&self) -> u32 {
        self.snapshot.borrow().reconnect_attempt
    }

    pub fn last_heartbeat(&self) -> Option<u64> {
        self.snapshot.borrow().last_heartbeat_ms
    }
}

/// Spawn the engine over the production WebSocket connector.
pub fn spawn(
    config: EngineConfig,
    identity: Arc<dyn DeviceIdentity>,
) -> (EngineHandle, JoinHandle<()>) {
    spawn_with_connector(config, identity, Arc::new(WebSocketConnector))
}

pub(crate) fn spawn_with_connector(
    config: EngineConfig,
    identity: Arc<dyn DeviceIdentity>,
    connector: Arc<dyn Connector>,
) -> (EngineHandle, JoinHandle<()>) {
    let (channels, command_rx) = EngineChannels::new(EVENT_BUFFER);
    let (transport_tx, transport_rx) = mpsc::unbounded_channel();
    let (timer_tx, timer_rx) = mpsc::unbounded_channel();
    let (snapshot_tx, snapshot_rx) = watch::channel(EngineSnapshot {
        state: ConnectionState::Disconnected,
        reconnect_attempt: 0,
        last_heartbeat_ms: None,
    });

    let engine = Engine {
        policy: config.reconnect_policy(),
        completed: CompletedWindow::new(config.completed_window_capacity),
        config,
        machine: ConnectionStateMachine::default(),
        connector,
        identity,
        events: channels.event_sender(),
        snapshot: snapshot_tx,
        transport_tx,
        timer_tx,
        transport: None,
        next_epoch: 0,
        target_url: None,
        suspended: false,
        reconnect_attempt: 0,
        reconnect_seq: 0,
        reconnect_timer: None,
        heartbeat_timer: None,
        last_liveness: None,
        last_heartbeat_ms: None,
        pending: HashMap::new(),
        action_nonce: 0,
        credentials: None,
    };

    let handle = EngineHandle {
        commands: channels.command_sender(),
        events: channels.event_sender(),
        snapshot: snapshot_rx,
    };
    let task = tokio::spawn(engine.run(command_rx, transport_rx, timer_rx));
    (handle, task)
}

#[derive(Debug, Clone)]
struct Credentials {
    client_name: String,
    device_id: String,
}

#[derive(Debug)]
enum TimerEvent {
    ReconnectElapsed { seq: u64 },
    HeartbeatTick,
    ActionDeadline { id: String },
}

struct Engine {
    config: EngineConfig,
    policy: ReconnectPolicy,
    machine: ConnectionStateMachine,
    connector: Arc<dyn Connector>,
    identity: Arc<dyn DeviceIdentity>,
    events: broadcast::Sender<EngineEvent>,
    snapshot: watch::Sender<EngineSnapshot>,
    transport_tx: mpsc::UnboundedSender<TransportUpdate>,
    timer_tx: mpsc::UnboundedSender<TimerEvent>,
    transport: Option<Transport>,
    next_epoch: u64,
    target_url: Option<String>,
    suspended: bool,
    reconnect_attempt: u32,
    reconnect_seq: u64,
    reconnect_timer: Option<TimerHandle>,
    heartbeat_timer: Option<TimerHandle>,
    /// Monotonic instant of the last liveness signal, for staleness math.
    last_liveness: Option<Instant>,
    /// Wall-clock ms of the last liveness signal, for observers.
    last_heartbeat_ms: Option<u64>,
    pending: HashMap<String, TimerHandle>,
    action_nonce: u64,
    credentials: Option<Credentials>,
    completed: CompletedWindow,
}

impl Engine {
    async fn run(
        mut self,
        mut commands: mpsc::UnboundedReceiver<EngineCommand>,
        mut transports: mpsc::UnboundedReceiver<TransportUpdate>,
        mut timers: mpsc::UnboundedReceiver<TimerEvent>,
    ) {
        loop {
            tokio::select! {
                command = commands.recv() => match command {
                    Some(command) => self.handle_command(command).await,
                    None => break,
                },
                Some(update) = transports.recv() => self.handle_transport(update),
                Some(event) = timers.recv() => self.handle_timer(event),
            }
            self.publish_snapshot();
        }

        debug!("engine handle dropped; stopping");
        self.drop_transport();
    }

    async fn handle_command(&mut self, command: EngineCommand) {
        match command {
            EngineCommand::Connect { address } => self.connect(address),
            EngineCommand::Authenticate { client_name, reply } => {
                let sent = self.authenticate(client_name).await;
                let _ = reply.send(sent);
            }
            EngineCommand::SendAction { step, reply } => {
                let _ = reply.send(self.send_action(step));
            }
            EngineCommand::Disconnect => self.disconnect(),
            EngineCommand::Foregrounded => self.foregrounded(),
            EngineCommand::Backgrounded => self.backgrounded(),
        }
    }

    fn handle_transport(&mut self, update: TransportUpdate) {
        let Some(transport) = &self.transport else {
            return;
        };
        if update.epoch != transport.epoch {
            return;
        }

        match update.event {
            TransportEvent::Opened => self.on_opened(),
            TransportEvent::Closed { code, reason } => self.on_closed(code, reason),
            TransportEvent::Errored { detail } => self.on_errored(detail),
            TransportEvent::Text(frame) => self.on_frame(&frame),
            TransportEvent::Unsupported => self.emit_error(EngineError::invalid_server_message(
                "Received a non-text frame from desktop.",
            )),
        }
    }

    fn handle_timer(&mut self, event: TimerEvent) {
        match event {
            TimerEvent::ReconnectElapsed { seq } => self.on_reconnect_elapsed(seq),
            TimerEvent::HeartbeatTick => self.on_heartbeat_tick(),
            TimerEvent::ActionDeadline { id } => self.on_action_deadline(id),
        }
    }

    fn connect(&mut self, address: String) {
        let trimmed = address.trim();
        if trimmed.is_empty() {
            self.emit_error(EngineError::client("IP address is required."));
            self.set_state(ConnectionState::Error);
            return;
        }

        let url = normalize_url(trimmed);
        info!(url = %url, "connect requested");
        self.target_url = Some(url.clone());
        self.reconnect_attempt = 0;
        self.suspended = false;
        self.stop_reconnect();
        self.clear_pending();
        self.set_state(ConnectionState::Connecting);
        self.open_transport(&url);
    }

    async fn authenticate(&mut self, client_name: String) -> bool {
        let client_name = client_name.trim().to_owned();
        if client_name.is_empty() {
            self.emit_error(EngineError::client("Client ID is required."));
            return false;
        }
        if self.machine.state() != ConnectionState::Connected {
            self.emit_error(EngineError::not_connected());
            return false;
        }

        let device_id = match self.identity.resolve_or_create().await {
            Ok(device_id) => device_id,
            Err(err) => {
                warn!(error = %err, "device identity resolution failed");
                self.emit_error(EngineError::client("Failed to load device identity."));
                return false;
            }
        };

        // Identity resolution suspends; re-check the channel before sending.
        if self.machine.state() != ConnectionState::Connected {
            self.emit_error(EngineError::not_connected());
            return false;
        }

        let credentials = Credentials {
            client_name,
            device_id,
        };
        self.credentials = Some(credentials.clone());
        self.send_auth(&credentials)
    }

    fn send_auth(&mut self, credentials: &Credentials) -> bool {
        let frame = match auth_frame(
            &credentials.client_name,
            &credentials.device_id,
            &self.config.protocol_version,
        ) {
            Ok(frame) => frame,
            Err(err) => {
                self.emit_error(err);
                return false;
            }
        };

        let sent = self.send_frame(&frame);
        if sent {
            info!(client_name = %credentials.client_name, "auth dispatched");
        } else {
            warn!("auth dropped; channel not open");
        }
        sent
    }

    fn send_action(&mut self, step: Step) -> Option<String> {
        self.action_nonce += 1;
        let id = format!("{}-{}", epoch_millis(), self.action_nonce);
        let action = Action {
            id: id.clone(),
            steps: vec![step],
        };

        if let Err(err) = validate_action(
            &action,
            self.config.max_steps_per_action,
            self.config.max_text_step_chars,
        ) {
            self.emit_error(err);
            return None;
        }

        let frame = match execute_action_frame(epoch_millis(), &action) {
            Ok(frame) => frame,
            Err(err) => {
                self.emit_error(err);
                return None;
            }
        };
        if !self.send_frame(&frame) {
            self.emit_error(EngineError::not_connected());
            return None;
        }

        self.emit(EngineEvent::Warning(
            dispatch_warning(&action.steps).map(str::to_owned),
        ));

        let deadline = timer::schedule(
            self.config.action_timeout,
            self.timer_tx.clone(),
            TimerEvent::ActionDeadline { id: id.clone() },
        );
        self.pending.insert(id.clone(), deadline);
        debug!(id = %id, "action dispatched");
        Some(id)
    }

    fn disconnect(&mut self) {
        info!("disconnect requested");
        self.suspended = true;
        self.stop_reconnect();
        self.stop_heartbeat();
        self.clear_pending();
        self.target_url = None;
        self.drop_transport();
        self.set_state(ConnectionState::Disconnected);
        self.emit(EngineEvent::Disconnected);
    }

    fn backgrounded(&mut self) {
        info!("host backgrounded; suspending");
        self.suspended = true;
        self.stop_reconnect();
        self.stop_heartbeat();
        self.clear_pending();
        self.drop_transport();
        self.set_state(ConnectionState::Disconnected);
        self.emit(EngineEvent::Disconnected);
    }

    fn foregrounded(&mut self) {
        let Some(url) = self.target_url.clone() else {
            return;
        };
        info!("host foregrounded; resuming");
        self.suspended = false;
        self.reconnect_attempt = 0;
        self.set_state(ConnectionState::Connecting);
        self.open_transport(&url);
    }

    fn on_opened(&mut self) {
        info!("transport opened");
        self.reconnect_attempt = 0;
        self.stop_reconnect();
        self.set_state(ConnectionState::Connected);
        self.emit(EngineEvent::Connected);
        self.mark_liveness();
        self.start_heartbeat();

        if let Some(credentials) = self.credentials.clone() {
            self.send_auth(&credentials);
        }
    }

    fn on_closed(&mut self, code: Option<u16>, reason: String) {
        info!(code, reason = %reason, "transport closed");
        self.transport = None;
        self.stop_heartbeat();

        if self.suspended {
            self.set_state(ConnectionState::Disconnected);
            self.emit(EngineEvent::Disconnected);
        } else {
            self.schedule_reconnect();
        }
    }

    fn on_errored(&mut self, detail: String) {
        warn!(detail = %detail, "transport error");
        self.emit_error(EngineError::socket("WebSocket connection error."));
        self.set_state(ConnectionState::Error);
    }

    fn on_frame(&mut self, frame: &str) {
        match parse_inbound(frame) {
            Err(err) => self.emit_error(err),
            Ok(InboundMessage::Ping) => self.on_ping(),
            Ok(InboundMessage::AuthSuccess) => {
                info!("authentication accepted");
                self.emit(EngineEvent::AuthSucceeded);
            }
            Ok(InboundMessage::AuthFailure { message }) => {
                warn!("authentication rejected");
                self.emit(EngineEvent::AuthFailed {
                    message: message
                        .unwrap_or_else(|| "Desktop rejected the authentication.".to_owned()),
                });
            }
            Ok(InboundMessage::ServerError(err)) => self.emit_error(err),
            Ok(InboundMessage::ActionResult(result)) => self.on_action_result(result),
        }
    }

    fn on_ping(&mut self) {
        self.mark_liveness();
        self.emit(EngineEvent::Heartbeat {
            timestamp_ms: self.last_heartbeat_ms.unwrap_or_default(),
        });

        match pong_frame(epoch_millis()) {
            Ok(frame) => {
                if !self.send_frame(&frame) {
                    debug!("pong dropped; channel not open");
                }
            }
            Err(err) => self.emit_error(err),
        }
    }

    fn on_action_result(&mut self, result: ExecutionResult) {
        if self.completed.contains(&result.id) {
            debug!(id = %result.id, "dropping duplicate action result");
            return;
        }
        if self.pending.remove(&result.id).is_none() {
            self.emit_error(EngineError::client(format!(
                "Unknown ACTION_RESULT id: {}",
                result.id
            )));
            return;
        }

        self.completed.insert(result.id.clone());
        debug!(id = %result.id, status = ?result.status, "action resolved");
        self.emit(EngineEvent::ActionResult(result));
    }

    fn on_action_deadline(&mut self, id: String) {
        if self.pending.remove(&id).is_none() {
            return;
        }

        self.completed.insert(id.clone());
        warn!(id = %id, "action timed out");
        let message = format!(
            "Action timed out after {} seconds.",
            self.config.action_timeout.as_secs()
        );
        self.emit(EngineEvent::ActionTimedOut { id: id.clone() });
        self.emit(EngineEvent::ActionResult(ExecutionResult {
            id,
            status: ActionStatus::Error,
            execution_time: self.config.action_timeout.as_millis() as f64,
            error: Some(message.clone()),
        }));
        self.emit_error(EngineError::client(message));
    }

    fn on_reconnect_elapsed(&mut self, seq: u64) {
        if seq != self.reconnect_seq || self.reconnect_timer.is_none() {
            return;
        }
        self.reconnect_timer = None;
        if self.suspended || self.machine.state() != ConnectionState::Reconnecting {
            return;
        }
        let Some(url) = self.target_url.clone() else {
            return;
        };

        debug!(attempt = self.reconnect_attempt, "reconnect timer fired");
        self.open_transport(&url);
    }

    fn on_heartbeat_tick(&mut self) {
        if self.heartbeat_timer.is_none() || self.machine.state() != ConnectionState::Connected {
            return;
        }
        let Some(last) = self.last_liveness else {
            return;
        };
        if last.elapsed() <= self.config.heartbeat_stale_after {
            return;
        }

        warn!(
            stale_for_ms = last.elapsed().as_millis() as u64,
            "heartbeat stale; forcing reconnect"
        );
        self.emit_error(EngineError::client("Heartbeat timeout. Reconnecting."));
        if let Some(transport) = self.transport.take() {
            transport.close(HEARTBEAT_CLOSE_CODE, HEARTBEAT_CLOSE_REASON);
        }
        self.stop_heartbeat();
        self.schedule_reconnect();
    }

    fn schedule_reconnect(&mut self) {
        if self.target_url.is_none() {
            self.set_state(ConnectionState::Disconnected);
            return;
        }

        if self.policy.is_exhausted(self.reconnect_attempt) {
            self.emit_error(EngineError::client(format!(
                "Reconnect failed after {} attempts.",
                self.policy.max_attempts()
            )));
            self.set_state(ConnectionState::Error);
            return;
        }

        self.reconnect_attempt += 1;
        let delay = self.policy.delay_for_attempt(self.reconnect_attempt);
        info!(
            attempt = self.reconnect_attempt,
            delay_ms = delay.as_millis() as u64,
            "scheduling reconnect"
        );
        self.set_state(ConnectionState::Reconnecting);
        self.reconnect_seq += 1;
        self.reconnect_timer = Some(timer::schedule(
            delay,
            self.timer_tx.clone(),
            TimerEvent::ReconnectElapsed {
                seq: self.reconnect_seq,
            },
        ));
    }

    fn open_transport(&mut self, url: &str) {
        self.drop_transport();
        self.next_epoch += 1;
        debug!(url, epoch = self.next_epoch, "opening transport");
        let transport = self
            .connector
            .connect(url, self.next_epoch, self.transport_tx.clone());
        self.transport = Some(transport);
    }

    fn drop_transport(&mut self) {
        if let Some(transport) = self.transport.take() {
            transport.close(1000, "");
        }
    }

    fn start_heartbeat(&mut self) {
        self.stop_heartbeat();
        self.heartbeat_timer = Some(timer::schedule_interval(
            self.config.heartbeat_check_period,
            self.timer_tx.clone(),
            || TimerEvent::HeartbeatTick,
        ));
    }

    fn stop_heartbeat(&mut self) {
        if let Some(timer) = self.heartbeat_timer.take() {
            timer.cancel();
        }
    }

    fn stop_reconnect(&mut self) {
        if let Some(timer) = self.reconnect_timer.take() {
            timer.cancel();
        }
    }

    fn mark_liveness(&mut self) {
        self.last_liveness = Some(Instant::now());
        self.last_heartbeat_ms = Some(epoch_millis());
    }

    fn clear_pending(&mut self) {
        // Dropping the handles retires the per-action timers with the map.
        self.pending.clear();
    }

    fn send_frame(&self, frame: &str) -> bool {
        self.transport
            .as_ref()
            .map(|transport| transport.send_text(frame))
            .unwrap_or(false)
    }

    fn set_state(&mut self, next: ConnectionState) {
        match self.machine.transition(next) {
            Ok(Some(state)) => self.emit(EngineEvent::StateChanged {
                state,
                reconnect_attempt: self.reconnect_attempt,
            }),
            Ok(None) => {}
            Err(err) => self.emit_error(err),
        }
    }

    fn emit(&self, event: EngineEvent) {
        let _ = self.events.send(event);
    }

    fn emit_error(&self, err: EngineError) {
        self.emit(EngineEvent::Error(err));
    }

    fn publish_snapshot(&self) {
        self.snapshot.send_replace(EngineSnapshot {
            state: self.machine.state(),
            reconnect_attempt: self.reconnect_attempt,
            last_heartbeat_ms: self.last_heartbeat_ms,
        });
    }
}

/// Prefix bare addresses with `ws://`; explicit `ws://`/`wss://` pass
/// through unchanged.
fn normalize_url(address: &str) -> String {
    let url = if address.starts_with("ws://") || address.starts_with("wss://") {
        address.to_owned()
    } else {
        format!("ws://{address}")
    };

    if Url::parse(&url).is_err() {
        debug!(url = %url, "target does not parse as a URL; passing through");
    }
    url
}

fn epoch_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| elapsed.as_millis() as u64)
        .unwrap_or(0)
}
