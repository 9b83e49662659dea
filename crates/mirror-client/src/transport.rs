//! Push-channel connection.
//!
//! Owns the single WebSocket connection to the server, including:
//! - Connection establishment and the per-connection `hello` version check
//! - Forwarding change notifications to the engine
//! - Automatic reconnection with exponential backoff
//! - Immediate retry when the user becomes active while disconnected
//!
//! Errors never escape this module: they are logged and recovered by reconnecting.

use crate::config::ReconnectConfig;
use futures::StreamExt;
use mirror_core::protocol::{PushMessage, VersionCheck, VersionGuard, MAX_MESSAGE_SIZE};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::sync::{mpsc, watch, Notify};
use tokio::task::JoinHandle;
use tokio_tungstenite::{
    connect_async,
    tungstenite::{Error as WsError, Message},
    MaybeTlsStream, WebSocketStream,
};
use tracing::{debug, error, info, warn};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// State of the push-channel connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// Attempting to connect
    Connecting,
    /// Connected and receiving notifications
    Open,
    /// Disconnected; `attempt` is the number of the scheduled reconnect (0 when stopped
    /// before any failure)
    Closed { attempt: u32 },
}

impl Default for ConnectionState {
    fn default() -> Self {
        Self::Closed { attempt: 0 }
    }
}

/// Event emitted by the transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    /// A connection was (re)established. Anything sent while disconnected is lost,
    /// so the receiver must resynchronize fully.
    Opened,
    /// The server reported a batch of changed paths
    Changed {
        paths: Vec<String>,
        repo: Option<String>,
    },
    /// The server restarted with a different build. The transport has stopped.
    VersionChanged { previous: String, current: String },
    /// Connection state transition
    StateChanged(ConnectionState),
}

/// Calculates the reconnection delay for a 1-based attempt number.
pub fn calculate_backoff(attempt: u32, config: &ReconnectConfig) -> Duration {
    let exponent = attempt.saturating_sub(1).min(64) as i32;
    let delay_secs = config.initial_delay.as_secs_f64() * config.backoff_factor.powi(exponent);

    Duration::from_secs_f64(delay_secs.min(config.max_delay.as_secs_f64()))
}

/// Reconnection bookkeeping.
#[derive(Debug, Clone, Default)]
pub struct ReconnectState {
    /// Number of reconnection attempts since the last successful open
    pub attempts: u32,
    /// Current backoff delay
    pub current_delay: Duration,
}

impl ReconnectState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Schedule the next attempt, returning how long to wait.
    pub fn schedule_reconnect(&mut self, config: &ReconnectConfig) -> Duration {
        self.attempts += 1;
        self.current_delay = calculate_backoff(self.attempts, config);
        self.current_delay
    }

    /// Reset after a successful open or observed user activity.
    pub fn reset(&mut self) {
        self.attempts = 0;
        self.current_delay = Duration::ZERO;
    }
}

/// Control handle for a running transport.
///
/// Dropping every clone of the handle shuts the transport down.
#[derive(Clone)]
pub struct TransportHandle {
    activity: Arc<Notify>,
    shutdown: Arc<watch::Sender<bool>>,
    state: watch::Receiver<ConnectionState>,
}

impl TransportHandle {
    /// Report user activity (pointer, click, key press, view visible again).
    ///
    /// While disconnected this cancels the pending backoff and reconnects immediately.
    pub fn notify_activity(&self) {
        if matches!(*self.state.borrow(), ConnectionState::Closed { .. }) {
            // Wakes only a pending backoff wait; no permit is stored for later
            self.activity.notify_waiters();
        }
    }

    /// Stop the transport. No reconnect is scheduled afterwards.
    pub fn shutdown(&self) {
        self.shutdown.send_replace(true);
    }

    pub fn state(&self) -> ConnectionState {
        *self.state.borrow()
    }
}

enum ReadOutcome {
    Closed,
    Shutdown,
    VersionChanged,
}

/// The push-channel connection and its reconnect loop.
pub struct ChangeTransport {
    url: String,
    config: ReconnectConfig,
    event_tx: mpsc::UnboundedSender<TransportEvent>,
    activity: Arc<Notify>,
    shutdown_rx: watch::Receiver<bool>,
    state_tx: watch::Sender<ConnectionState>,
    version: VersionGuard,
    reconnect: ReconnectState,
}

impl ChangeTransport {
    /// Create a transport for `url` (not yet connected).
    pub fn new(
        url: String,
        config: ReconnectConfig,
    ) -> (Self, TransportHandle, mpsc::UnboundedReceiver<TransportEvent>) {
        let (shutdown, _) = watch::channel(false);
        Self::with_shutdown(url, config, Arc::new(shutdown))
    }

    /// Create a transport that stops when `shutdown` is set, including when it was set
    /// before the transport was created.
    pub fn with_shutdown(
        url: String,
        config: ReconnectConfig,
        shutdown: Arc<watch::Sender<bool>>,
    ) -> (Self, TransportHandle, mpsc::UnboundedReceiver<TransportEvent>) {
        let (event_tx, event_rx) = mpsc::unbounded_channel();
        let shutdown_rx = shutdown.subscribe();
        let (state_tx, state_rx) = watch::channel(ConnectionState::Connecting);
        let activity = Arc::new(Notify::new());

        let handle = TransportHandle {
            activity: Arc::clone(&activity),
            shutdown,
            state: state_rx,
        };

        let transport = Self {
            url,
            config,
            event_tx,
            activity,
            shutdown_rx,
            state_tx,
            version: VersionGuard::new(),
            reconnect: ReconnectState::new(),
        };

        (transport, handle, event_rx)
    }

    /// Run the connection loop on its own task.
    pub fn spawn(self) -> JoinHandle<()> {
        tokio::spawn(self.run())
    }

    /// Connect, read, and reconnect until shut down or the server build changes.
    pub async fn run(mut self) {
        loop {
            if *self.shutdown_rx.borrow() {
                break;
            }

            self.set_state(ConnectionState::Connecting);
            let connected = tokio::select! {
                result = connect_async(self.url.as_str()) => result,
                _ = wait_for_shutdown(&mut self.shutdown_rx) => break,
            };

            match connected {
                Ok((ws, _)) => {
                    self.reconnect.reset();
                    self.set_state(ConnectionState::Open);
                    info!("Connected to {}", self.url);
                    let _ = self.event_tx.send(TransportEvent::Opened);

                    match self.read_loop(ws).await {
                        ReadOutcome::Closed => {}
                        ReadOutcome::Shutdown => break,
                        ReadOutcome::VersionChanged => {
                            self.set_state(ConnectionState::Closed { attempt: 0 });
                            return;
                        }
                    }
                }
                Err(e) => {
                    warn!("Failed to connect to {}: {}", self.url, e);
                }
            }

            let delay = self.reconnect.schedule_reconnect(&self.config);
            // Registered before `Closed` is visible so activity reported from then on is seen
            let activity = Arc::clone(&self.activity);
            let woken = activity.notified();
            self.set_state(ConnectionState::Closed {
                attempt: self.reconnect.attempts,
            });
            info!(
                "Scheduled reconnect to {} in {:?} (attempt {})",
                self.url, delay, self.reconnect.attempts
            );

            tokio::select! {
                _ = tokio::time::sleep(delay) => {}
                _ = woken => {
                    debug!("User activity while disconnected, reconnecting now");
                    self.reconnect.reset();
                }
                _ = wait_for_shutdown(&mut self.shutdown_rx) => break,
            }
        }

        self.set_state(ConnectionState::Closed {
            attempt: self.reconnect.attempts,
        });
        debug!("Transport for {} stopped", self.url);
    }

    /// Read frames until the connection drops.
    async fn read_loop(&mut self, mut ws: WsStream) -> ReadOutcome {
        loop {
            let next = tokio::select! {
                next = ws.next() => next,
                _ = wait_for_shutdown(&mut self.shutdown_rx) => {
                    let _ = ws.close(None).await;
                    return ReadOutcome::Shutdown;
                }
            };

            let msg = match next {
                Some(Ok(msg)) => msg,
                Some(Err(e)) => {
                    match e {
                        WsError::ConnectionClosed | WsError::AlreadyClosed => {
                            debug!("Connection to {} closed", self.url);
                        }
                        _ => {
                            error!("WebSocket error on {}: {}", self.url, e);
                        }
                    }
                    return ReadOutcome::Closed;
                }
                None => {
                    debug!("Connection to {} stream ended", self.url);
                    return ReadOutcome::Closed;
                }
            };

            let data = match msg {
                Message::Text(text) => text.into_bytes(),
                Message::Binary(data) => data.to_vec(),
                Message::Ping(_) | Message::Pong(_) | Message::Frame(_) => continue,
                Message::Close(_) => {
                    debug!("Received close frame from {}", self.url);
                    return ReadOutcome::Closed;
                }
            };

            if data.len() > MAX_MESSAGE_SIZE {
                warn!(
                    "Message from {} exceeds max size ({} > {}), dropping",
                    self.url,
                    data.len(),
                    MAX_MESSAGE_SIZE
                );
                continue;
            }

            match PushMessage::from_bytes(&data) {
                Some(PushMessage::Hello { version }) => match self.version.observe(&version) {
                    VersionCheck::First => {
                        debug!("Server build version {}", version);
                    }
                    VersionCheck::Unchanged => {
                        debug!("Server build version unchanged ({})", version);
                    }
                    VersionCheck::Changed { previous } => {
                        warn!(
                            "Server build changed ({} -> {}), reload required",
                            previous, version
                        );
                        let _ = self.event_tx.send(TransportEvent::VersionChanged {
                            previous,
                            current: version,
                        });
                        let _ = ws.close(None).await;
                        return ReadOutcome::VersionChanged;
                    }
                },
                Some(PushMessage::FilesChanged { paths, repo }) => {
                    debug!("{} path(s) changed", paths.len());
                    let _ = self.event_tx.send(TransportEvent::Changed { paths, repo });
                }
                None => {
                    warn!(
                        "Unrecognized message from {} ({} bytes), dropping",
                        self.url,
                        data.len()
                    );
                }
            }
        }
    }

    fn set_state(&self, state: ConnectionState) {
        let previous = self.state_tx.send_replace(state);
        if previous != state {
            let _ = self.event_tx.send(TransportEvent::StateChanged(state));
        }
    }
}

/// Resolves once shutdown is requested or every handle has been dropped.
async fn wait_for_shutdown(rx: &mut watch::Receiver<bool>) {
    loop {
        if *rx.borrow_and_update() {
            return;
        }
        if rx.changed().await.is_err() {
            return;
        }
    }
}
