//! Socket lifecycle manager
//!
//! One actor task per logical client connection. It owns the stream
//! socket, the reconnect schedule, the raw event log and the run-stream
//! state. Callers talk to it through a cheap-to-clone `SocketHandle`
//! (commands over mpsc, lock-free snapshot reads through `ArcSwap`).

use std::collections::VecDeque;
use std::fmt;
use std::mem;
use std::sync::Arc;
use std::time::Duration;

use arc_swap::ArcSwap;
use controlroom_protocol::{decode_frame, ClientMessage, ServerEvent, WsEvent};
use futures::stream::SplitSink;
use futures::{SinkExt, StreamExt};
use serde::Serialize;
use thiserror::Error;
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::{debug, info, warn};

use crate::config::{redact_token, ClientConfig, ConfigError};
use crate::run_stream::{reduce, RunAction, RunStreamState};

/// Raw events retained for diagnostics.
pub const EVENT_LOG_CAPACITY: usize = 400;

pub const BASE_RECONNECT_DELAY: Duration = Duration::from_millis(400);
pub const MAX_RECONNECT_DELAY: Duration = Duration::from_millis(8000);
/// Caps the exponent only; retries never stop.
pub const MAX_RECONNECT_ATTEMPT: u32 = 6;

pub const PARSE_ERROR_NOTICE: &str = "WS message parse error";
pub const AGENT_ERROR_NOTICE: &str = "Agent error";

const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;
type WsSink = SplitSink<WsStream, Message>;

#[derive(Debug, Error)]
pub enum SocketError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("socket manager has been disposed")]
    Disposed,
}

// ---------------------------------------------------------------------------
// Connection state and backoff
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionState {
    Connecting,
    Connected,
    Offline,
    Reconnecting,
    Disposed,
}

impl ConnectionState {
    pub fn as_str(self) -> &'static str {
        match self {
            ConnectionState::Connecting => "connecting",
            ConnectionState::Connected => "connected",
            ConnectionState::Offline => "offline",
            ConnectionState::Reconnecting => "reconnecting",
            ConnectionState::Disposed => "disposed",
        }
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// `min(8000ms, 400ms * 2^(attempt - 1))`; zero before the first failure.
pub fn delay_for_attempt(attempt: u32) -> Duration {
    if attempt == 0 {
        return Duration::ZERO;
    }
    let exponent = (attempt - 1).min(MAX_RECONNECT_ATTEMPT);
    let delay = BASE_RECONNECT_DELAY.saturating_mul(1u32 << exponent);
    delay.min(MAX_RECONNECT_DELAY)
}

/// Retry counter for consecutive failed or closed connections.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReconnectBackoff {
    attempt: u32,
}

impl ReconnectBackoff {
    pub fn attempt(&self) -> u32 {
        self.attempt
    }

    /// Record a close and return how long to wait before the next attempt.
    pub fn on_close(&mut self) -> Duration {
        self.attempt = (self.attempt + 1).min(MAX_RECONNECT_ATTEMPT);
        delay_for_attempt(self.attempt)
    }

    /// A connection opened.
    pub fn reset(&mut self) {
        self.attempt = 0;
    }
}

// ---------------------------------------------------------------------------
// Event log
// ---------------------------------------------------------------------------

/// Rolling log of the most recent valid events; oldest dropped first.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EventLog {
    events: VecDeque<WsEvent>,
}

impl EventLog {
    pub fn push(&mut self, event: WsEvent) {
        if self.events.len() == EVENT_LOG_CAPACITY {
            self.events.pop_front();
        }
        self.events.push_back(event);
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    /// Oldest first.
    pub fn iter(&self) -> impl DoubleEndedIterator<Item = &WsEvent> {
        self.events.iter()
    }

    pub fn last(&self) -> Option<&WsEvent> {
        self.events.back()
    }
}

// ---------------------------------------------------------------------------
// Snapshot, commands, notices
// ---------------------------------------------------------------------------

/// Everything a reader may look at, published after every change.
#[derive(Debug, Clone)]
pub struct SocketSnapshot {
    pub connection: ConnectionState,
    pub reconnect_delay_ms: u64,
    pub attempt: u32,
    pub events: Arc<EventLog>,
    pub runs: Arc<RunStreamState>,
}

impl Default for SocketSnapshot {
    fn default() -> Self {
        Self {
            connection: ConnectionState::Connecting,
            reconnect_delay_ms: 0,
            attempt: 0,
            events: Arc::default(),
            runs: Arc::default(),
        }
    }
}

#[derive(Debug)]
enum SocketCommand {
    SendChat {
        content: String,
        session_key: String,
        channel: String,
        chat_id: String,
    },
    CancelRun {
        run_id: String,
    },
    SubscribeSession {
        session_key: String,
    },
    Ping,
    Shutdown {
        done: oneshot::Sender<()>,
    },
}

/// Pushed to whoever owns the notice receiver (composer or UI).
#[derive(Debug, Clone, PartialEq)]
pub enum SocketNotice {
    SessionUpdated { session_key: String },
    Error { message: String },
    Connection {
        state: ConnectionState,
        reconnect_delay_ms: u64,
    },
    Event(WsEvent),
}

// ---------------------------------------------------------------------------
// Handle
// ---------------------------------------------------------------------------

/// Handle to a running socket manager (cheap to Clone).
///
/// Dropping every handle disposes the manager.
#[derive(Clone)]
pub struct SocketHandle {
    command_tx: mpsc::Sender<SocketCommand>,
    snapshot: Arc<ArcSwap<SocketSnapshot>>,
}

impl SocketHandle {
    /// Send `chat.send` if a socket is open.
    pub async fn send_chat(
        &self,
        content: impl Into<String>,
        session_key: impl Into<String>,
        channel: impl Into<String>,
        chat_id: impl Into<String>,
    ) -> Result<(), SocketError> {
        self.send(SocketCommand::SendChat {
            content: content.into(),
            session_key: session_key.into(),
            channel: channel.into(),
            chat_id: chat_id.into(),
        })
        .await
    }

    /// Send `chat.cancel` and drop the run locally right away.
    pub async fn cancel_run(&self, run_id: impl Into<String>) -> Result<(), SocketError> {
        self.send(SocketCommand::CancelRun {
            run_id: run_id.into(),
        })
        .await
    }

    /// Send `session.subscribe` and drop the session's settled runs locally.
    pub async fn subscribe_session(&self, session_key: impl Into<String>) -> Result<(), SocketError> {
        self.send(SocketCommand::SubscribeSession {
            session_key: session_key.into(),
        })
        .await
    }

    pub async fn ping(&self) -> Result<(), SocketError> {
        self.send(SocketCommand::Ping).await
    }

    /// Lock-free snapshot read.
    pub fn snapshot(&self) -> Arc<SocketSnapshot> {
        self.snapshot.load_full()
    }

    /// Dispose the manager and wait until it has stopped.
    pub async fn shutdown(&self) {
        let (done, done_rx) = oneshot::channel();
        if self
            .command_tx
            .send(SocketCommand::Shutdown { done })
            .await
            .is_ok()
        {
            let _ = done_rx.await;
        }
    }

    async fn send(&self, cmd: SocketCommand) -> Result<(), SocketError> {
        self.command_tx
            .send(cmd)
            .await
            .map_err(|_| SocketError::Disposed)
    }
}

pub struct SocketManager;

impl SocketManager {
    /// Spawn the actor and start connecting immediately.
    pub fn spawn(
        config: &ClientConfig,
        notices: mpsc::UnboundedSender<SocketNotice>,
    ) -> Result<SocketHandle, SocketError> {
        let url = config.stream_url()?;
        let (command_tx, command_rx) = mpsc::channel(256);
        let snapshot = Arc::new(ArcSwap::from_pointee(SocketSnapshot::default()));

        let actor = SocketActor {
            log_url: redact_token(&url),
            url,
            backoff: ReconnectBackoff::default(),
            connection: ConnectionState::Connecting,
            reconnect_delay_ms: 0,
            events: Arc::default(),
            runs: Arc::default(),
            subscription: None,
            snapshot: snapshot.clone(),
            notices,
            shutdown_ack: None,
        };
        tokio::spawn(actor.run(command_rx));

        Ok(SocketHandle {
            command_tx,
            snapshot,
        })
    }
}

// ---------------------------------------------------------------------------
// Actor
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Flow {
    Continue,
    Dispose,
}

struct SocketActor {
    url: String,
    log_url: String,
    backoff: ReconnectBackoff,
    connection: ConnectionState,
    reconnect_delay_ms: u64,
    events: Arc<EventLog>,
    runs: Arc<RunStreamState>,
    /// Last session subscribed to; re-sent on every new connection.
    subscription: Option<String>,
    snapshot: Arc<ArcSwap<SocketSnapshot>>,
    notices: mpsc::UnboundedSender<SocketNotice>,
    shutdown_ack: Option<oneshot::Sender<()>>,
}

impl SocketActor {
    async fn run(mut self, mut command_rx: mpsc::Receiver<SocketCommand>) {
        loop {
            let state = if self.backoff.attempt() == 0 {
                ConnectionState::Connecting
            } else {
                ConnectionState::Reconnecting
            };
            self.set_connection(state);

            let Some(connected) = self.connect(&mut command_rx).await else {
                break;
            };

            if let Some(ws) = connected {
                self.backoff.reset();
                self.reconnect_delay_ms = 0;
                self.set_connection(ConnectionState::Connected);
                info!(
                    component = "socket",
                    event = "socket.connected",
                    url = %self.log_url,
                    "Stream socket connected"
                );
                if self.serve(ws, &mut command_rx).await == Flow::Dispose {
                    break;
                }
            }

            let delay = self.backoff.on_close();
            self.reconnect_delay_ms = delay.as_millis() as u64;
            self.set_connection(ConnectionState::Offline);
            info!(
                component = "socket",
                event = "socket.reconnect.scheduled",
                attempt = self.backoff.attempt(),
                delay_ms = self.reconnect_delay_ms,
                "Stream socket closed, reconnect scheduled"
            );

            if self.wait_backoff(delay, &mut command_rx).await == Flow::Dispose {
                break;
            }
        }

        drop(command_rx);
        self.set_connection(ConnectionState::Disposed);
        info!(
            component = "socket",
            event = "socket.disposed",
            "Socket manager disposed"
        );
        if let Some(done) = self.shutdown_ack.take() {
            let _ = done.send(());
        }
    }

    /// `None` means dispose; `Some(None)` means the attempt failed.
    async fn connect(
        &mut self,
        command_rx: &mut mpsc::Receiver<SocketCommand>,
    ) -> Option<Option<WsStream>> {
        let attempt = tokio::time::timeout(CONNECT_TIMEOUT, connect_async(self.url.clone()));
        tokio::pin!(attempt);

        loop {
            tokio::select! {
                result = &mut attempt => {
                    return match result {
                        Ok(Ok((ws, _response))) => Some(Some(ws)),
                        Ok(Err(err)) => {
                            warn!(
                                component = "socket",
                                event = "socket.connect.failed",
                                url = %self.log_url,
                                error = %err,
                                "Stream socket connect failed"
                            );
                            Some(None)
                        }
                        Err(_) => {
                            warn!(
                                component = "socket",
                                event = "socket.connect.timeout",
                                url = %self.log_url,
                                "Stream socket connect timed out"
                            );
                            Some(None)
                        }
                    };
                }
                cmd = command_rx.recv() => {
                    if self.apply(cmd, None).await == Flow::Dispose {
                        return None;
                    }
                }
            }
        }
    }

    async fn serve(&mut self, ws: WsStream, command_rx: &mut mpsc::Receiver<SocketCommand>) -> Flow {
        let (mut sink, mut stream) = ws.split();

        if let Some(session_key) = self.subscription.clone() {
            send_message(&mut sink, &ClientMessage::SessionSubscribe { session_key }).await;
        }

        loop {
            tokio::select! {
                frame = stream.next() => match frame {
                    Some(Ok(Message::Text(text))) => self.handle_frame(text.as_str()),
                    Some(Ok(Message::Binary(bytes))) => match std::str::from_utf8(&bytes) {
                        Ok(text) => self.handle_frame(text),
                        Err(_) => self.report_malformed("binary frame is not UTF-8", bytes.len()),
                    },
                    Some(Ok(Message::Close(_))) | None => {
                        debug!(
                            component = "socket",
                            event = "socket.closed",
                            "Stream socket closed by server"
                        );
                        return Flow::Continue;
                    }
                    Some(Ok(_)) => {}
                    Some(Err(err)) => {
                        warn!(
                            component = "socket",
                            event = "socket.error",
                            error = %err,
                            "Stream socket error"
                        );
                        return Flow::Continue;
                    }
                },
                cmd = command_rx.recv() => {
                    if self.apply(cmd, Some(&mut sink)).await == Flow::Dispose {
                        let _ = sink.close().await;
                        return Flow::Dispose;
                    }
                }
            }
        }
    }

    async fn wait_backoff(
        &mut self,
        delay: Duration,
        command_rx: &mut mpsc::Receiver<SocketCommand>,
    ) -> Flow {
        let sleep = tokio::time::sleep(delay);
        tokio::pin!(sleep);

        loop {
            tokio::select! {
                _ = &mut sleep => return Flow::Continue,
                cmd = command_rx.recv() => {
                    if self.apply(cmd, None).await == Flow::Dispose {
                        return Flow::Dispose;
                    }
                }
            }
        }
    }

    /// Run one command. Without a sink, wire messages are skipped but
    /// local reducer actions still apply.
    async fn apply(&mut self, cmd: Option<SocketCommand>, sink: Option<&mut WsSink>) -> Flow {
        let Some(cmd) = cmd else {
            // Every handle dropped.
            return Flow::Dispose;
        };

        let (message, local) = match cmd {
            SocketCommand::Shutdown { done } => {
                self.shutdown_ack = Some(done);
                return Flow::Dispose;
            }
            SocketCommand::SendChat {
                content,
                session_key,
                channel,
                chat_id,
            } => (
                ClientMessage::ChatSend {
                    content,
                    session_key,
                    channel,
                    chat_id,
                },
                None,
            ),
            SocketCommand::CancelRun { run_id } => (
                ClientMessage::ChatCancel {
                    run_id: run_id.clone(),
                },
                Some(RunAction::ClearRun { run_id }),
            ),
            SocketCommand::SubscribeSession { session_key } => {
                self.subscription = Some(session_key.clone());
                (
                    ClientMessage::SessionSubscribe {
                        session_key: session_key.clone(),
                    },
                    Some(RunAction::SessionSynced { session_key }),
                )
            }
            SocketCommand::Ping => (ClientMessage::Ping, None),
        };

        match sink {
            Some(sink) => send_message(sink, &message).await,
            None => debug!(
                component = "socket",
                event = "socket.send.skipped",
                connection = %self.connection,
                "No open socket, intent not sent"
            ),
        }

        if let Some(action) = local {
            self.apply_run_action(action);
            self.publish();
        }
        Flow::Continue
    }

    fn handle_frame(&mut self, text: &str) {
        let event = match decode_frame(text) {
            Ok(event) => event,
            Err(err) => {
                warn!(
                    component = "socket",
                    event = "socket.frame.malformed",
                    error = %err,
                    payload_bytes = text.len(),
                    payload_preview = %truncate_for_log(text, 240),
                    "Discarding malformed stream frame"
                );
                self.notify(SocketNotice::Error {
                    message: PARSE_ERROR_NOTICE.to_string(),
                });
                return;
            }
        };

        let follow_up = match event.as_server() {
            Some(ServerEvent::SessionUpdated {
                session_key: Some(session_key),
                ..
            }) => Some(SocketNotice::SessionUpdated {
                session_key: session_key.clone(),
            }),
            Some(ServerEvent::AgentError { message, .. }) => Some(SocketNotice::Error {
                message: message
                    .clone()
                    .unwrap_or_else(|| AGENT_ERROR_NOTICE.to_string()),
            }),
            _ => None,
        };

        Arc::make_mut(&mut self.events).push(event.clone());
        self.apply_run_action(RunAction::Event(event.clone()));
        self.publish();

        self.notify(SocketNotice::Event(event));
        if let Some(notice) = follow_up {
            self.notify(notice);
        }
    }

    fn report_malformed(&mut self, reason: &str, payload_bytes: usize) {
        warn!(
            component = "socket",
            event = "socket.frame.malformed",
            error = reason,
            payload_bytes,
            "Discarding malformed stream frame"
        );
        self.notify(SocketNotice::Error {
            message: PARSE_ERROR_NOTICE.to_string(),
        });
    }

    fn apply_run_action(&mut self, action: RunAction) {
        let runs = Arc::unwrap_or_clone(mem::take(&mut self.runs));
        self.runs = Arc::new(reduce(runs, action, crate::now_ms()));
    }

    fn set_connection(&mut self, state: ConnectionState) {
        self.connection = state;
        self.publish();
        self.notify(SocketNotice::Connection {
            state,
            reconnect_delay_ms: self.reconnect_delay_ms,
        });
    }

    fn publish(&self) {
        self.snapshot.store(Arc::new(SocketSnapshot {
            connection: self.connection,
            reconnect_delay_ms: self.reconnect_delay_ms,
            attempt: self.backoff.attempt(),
            events: self.events.clone(),
            runs: self.runs.clone(),
        }));
    }

    fn notify(&self, notice: SocketNotice) {
        // Nobody listening is fine.
        let _ = self.notices.send(notice);
    }
}

async fn send_message(sink: &mut WsSink, message: &ClientMessage) {
    let json = match serde_json::to_string(message) {
        Ok(json) => json,
        Err(err) => {
            warn!(
                component = "socket",
                event = "socket.send.serialize_failed",
                error = %err,
                "Failed to serialize client message"
            );
            return;
        }
    };
    if let Err(err) = sink.send(Message::text(json)).await {
        warn!(
            component = "socket",
            event = "socket.send.failed",
            error = %err,
            "Failed to send client message"
        );
    }
}

fn truncate_for_log(value: &str, max_chars: usize) -> String {
    value.chars().take(max_chars).collect()
}
