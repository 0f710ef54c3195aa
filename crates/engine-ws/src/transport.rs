//! Transport adapter: one outbound bidirectional text channel per instance.
//!
//! Each open gets a fresh epoch; events are tagged with it so that anything
//! emitted by a detached instance is a no-op at the engine. Detaching happens
//! before the close frame goes out, so no event can fire from a closed
//! transport.

use std::sync::{
    Arc,
    atomic::{AtomicBool, Ordering},
};

use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio_tungstenite::{
    connect_async,
    tungstenite::{
        Message,
        protocol::{CloseFrame, frame::coding::CloseCode},
    },
};
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// Events delivered from a transport instance to the engine.
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum TransportEvent {
    Opened,
    Closed { code: Option<u16>, reason: String },
    Errored { detail: String },
    Text(String),
    /// A non-text frame arrived; reported upward as an invalid message.
    Unsupported,
}

/// Transport event tagged with the epoch of the instance that produced it.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct TransportUpdate {
    pub epoch: u64,
    pub event: TransportEvent,
}

/// Frames queued toward the socket task.
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum OutboundFrame {
    Text(String),
    Close { code: u16, reason: String },
}

/// Handle to one live channel instance.
#[derive(Debug)]
pub(crate) struct Transport {
    pub(crate) epoch: u64,
    pub(crate) outbound: mpsc::UnboundedSender<OutboundFrame>,
    pub(crate) open: Arc<AtomicBool>,
    pub(crate) detach: CancellationToken,
}

impl Transport {
    pub(crate) fn is_open(&self) -> bool {
        self.open.load(Ordering::SeqCst)
    }

    /// Queue a text frame; `false` (never an error) when the channel is not
    /// open.
    pub(crate) fn send_text(&self, frame: &str) -> bool {
        if !self.is_open() {
            return false;
        }
        self.outbound
            .send(OutboundFrame::Text(frame.to_owned()))
            .is_ok()
    }

    /// Detach event delivery, then close with the given code and reason.
    pub(crate) fn close(self, code: u16, reason: &str) {
        self.open.store(false, Ordering::SeqCst);
        self.detach.cancel();
        let _ = self.outbound.send(OutboundFrame::Close {
            code,
            reason: reason.to_owned(),
        });
    }
}

/// Seam for opening channel instances; swapped for an in-memory link in
/// tests.
pub(crate) trait Connector: Send + Sync + 'static {
    fn connect(
        &self,
        url: &str,
        epoch: u64,
        updates: mpsc::UnboundedSender<TransportUpdate>,
    ) -> Transport;
}

/// Production connector over `tokio-tungstenite`.
pub(crate) struct WebSocketConnector;

impl Connector for WebSocketConnector {
    fn connect(
        &self,
        url: &str,
        epoch: u64,
        updates: mpsc::UnboundedSender<TransportUpdate>,
    ) -> Transport {
        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
        let open = Arc::new(AtomicBool::new(false));
        let detach = CancellationToken::new();

        tokio::spawn(run_socket(SocketTask {
            url: url.to_owned(),
            epoch,
            updates,
            outbound: outbound_rx,
            open: Arc::clone(&open),
            detach: detach.clone(),
        }));

        Transport {
            epoch,
            outbound: outbound_tx,
            open,
            detach,
        }
    }
}

struct SocketTask {
    url: String,
    epoch: u64,
    updates: mpsc::UnboundedSender<TransportUpdate>,
    outbound: mpsc::UnboundedReceiver<OutboundFrame>,
    open: Arc<AtomicBool>,
    detach: CancellationToken,
}

impl SocketTask {
    fn emit(&self, event: TransportEvent) {
        if self.detach.is_cancelled() {
            return;
        }
        let _ = self.updates.send(TransportUpdate {
            epoch: self.epoch,
            event,
        });
    }
}

async fn run_socket(mut task: SocketTask) {
    let stream = tokio::select! {
        _ = task.detach.cancelled() => return,
        dialed = connect_async(&task.url) => match dialed {
            Ok((stream, _response)) => stream,
            Err(err) => {
                debug!(url = %task.url, error = %err, "websocket dial failed");
                task.emit(TransportEvent::Errored {
                    detail: err.to_string(),
                });
                task.emit(TransportEvent::Closed {
                    code: None,
                    reason: String::new(),
                });
                return;
            }
        },
    };

    task.open.store(true, Ordering::SeqCst);
    task.emit(TransportEvent::Opened);

    let (mut sink, mut source) = stream.split();

    loop {
        tokio::select! {
            queued = task.outbound.recv() => match queued {
                Some(OutboundFrame::Text(text)) => {
                    if let Err(err) = sink.send(Message::Text(text)).await {
                        debug!(error = %err, "websocket send failed");
                        task.open.store(false, Ordering::SeqCst);
                        task.emit(TransportEvent::Errored {
                            detail: err.to_string(),
                        });
                        task.emit(TransportEvent::Closed {
                            code: None,
                            reason: String::new(),
                        });
                        break;
                    }
                }
                Some(OutboundFrame::Close { code, reason }) => {
                    task.open.store(false, Ordering::SeqCst);
                    let _ = sink
                        .send(Message::Close(Some(CloseFrame {
                            code: CloseCode::from(code),
                            reason: reason.into(),
                        })))
                        .await;
                    break;
                }
                // The handle is gone; nothing left to deliver in either
                // direction.
                None => {
                    let _ = sink.send(Message::Close(None)).await;
                    break;
                }
            },
            frame = source.next() => match frame {
                Some(Ok(Message::Text(text))) => task.emit(TransportEvent::Text(text)),
                Some(Ok(Message::Binary(_))) => task.emit(TransportEvent::Unsupported),
                Some(Ok(Message::Ping(payload))) => {
                    let _ = sink.send(Message::Pong(payload)).await;
                }
                Some(Ok(Message::Pong(_))) | Some(Ok(Message::Frame(_))) => {}
                Some(Ok(Message::Close(close))) => {
                    task.open.store(false, Ordering::SeqCst);
                    let (code, reason) = match close {
                        Some(frame) => (Some(u16::from(frame.code)), frame.reason.into_owned()),
                        None => (None, String::new()),
                    };
                    task.emit(TransportEvent::Closed { code, reason });
                    break;
                }
                Some(Err(err)) => {
                    debug!(error = %err, "websocket stream error");
                    task.open.store(false, Ordering::SeqCst);
                    task.emit(TransportEvent::Errored {
                        detail: err.to_string(),
                    });
                    task.emit(TransportEvent::Closed {
                        code: None,
                        reason: String::new(),
                    });
                    break;
                }
                None => {
                    task.open.store(false, Ordering::SeqCst);
                    task.emit(TransportEvent::Closed {
                        code: None,
                        reason: String::new(),
                    });
                    break;
                }
            },
        }
    }

    task.open.store(false, Ordering::SeqCst);
}
