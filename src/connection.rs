use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::config::ReconnectConfig;
use crate::error::ChatError;
use crate::events::{ClientEvent, ServerEvent};
use crate::transport::{Transport, TransportLink};

/// Connection lifecycle states.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    Reconnecting,
    Failed,
}

/// Everything fanned out to subscribers: state transitions, server events,
/// and informational notices (for example a lost-network signal).
#[derive(Debug, Clone)]
pub enum ChannelEvent {
    State(ConnectionState),
    Server(ServerEvent),
    Notice(String),
}

/// Backoff schedule for automatic reconnection: doubles per attempt from the
/// base delay, capped at the configured maximum.
pub fn backoff_delay(cfg: &ReconnectConfig, attempt: u32) -> Duration {
    let exp = attempt.min(31);
    let ms = cfg
        .base_delay_ms
        .saturating_mul(2u64.saturating_pow(exp))
        .min(cfg.max_delay_ms);
    Duration::from_millis(ms)
}

enum Cmd {
    Connect {
        token: String,
    },
    Disconnect,
    Reconnect,
    Emit {
        event: ClientEvent,
        ack: oneshot::Sender<Result<(), ChatError>>,
    },
    NetworkRestored,
    NetworkLost,
}

#[derive(Debug)]
struct Inner {
    state: ConnectionState,
    attempt: u32,
    last_error: Option<ChatError>,
    in_flight: bool,
}

/// Owns the process-wide realtime connection.
///
/// All socket I/O happens on a background task; the public methods post
/// commands to it. The in-flight flag (not the connection state) guards
/// against overlapping connection attempts, so there is no window between
/// "attempt started" and "state updated" where a second attempt can slip in.
pub struct ConnectionManager {
    cmd_tx: mpsc::Sender<Cmd>,
    events_tx: broadcast::Sender<ChannelEvent>,
    shared: Arc<Mutex<Inner>>,
    _task: JoinHandle<()>,
}

impl ConnectionManager {
    pub fn new(transport: Arc<dyn Transport>, cfg: ReconnectConfig) -> Self {
        let (cmd_tx, cmd_rx) = mpsc::channel(64);
        let (events_tx, _) = broadcast::channel(256);
        let shared = Arc::new(Mutex::new(Inner {
            state: ConnectionState::Disconnected,
            attempt: 0,
            last_error: None,
            in_flight: false,
        }));

        let task = tokio::spawn(run_connection(
            cmd_rx,
            transport,
            cfg,
            shared.clone(),
            events_tx.clone(),
        ));

        Self {
            cmd_tx,
            events_tx,
            shared,
            _task: task,
        }
    }

    /// Subscribe to connection-state and server events.
    pub fn subscribe(&self) -> broadcast::Receiver<ChannelEvent> {
        self.events_tx.subscribe()
    }

    /// Open a connection authenticated with `token`. Returns `false`
    /// without side effects if an attempt is already in flight.
    pub async fn connect(&self, token: impl Into<String>) -> bool {
        {
            let mut s = self.shared.lock().expect("connection state poisoned");
            if s.in_flight {
                return false;
            }
            s.in_flight = true;
        }
        self.cmd_tx
            .send(Cmd::Connect {
                token: token.into(),
            })
            .await
            .is_ok()
    }

    /// Close the socket, cancel any pending reconnection timer, and reset
    /// to `Disconnected`. Idempotent.
    pub async fn disconnect(&self) {
        let _ = self.cmd_tx.send(Cmd::Disconnect).await;
    }

    /// Manual retry trigger, for example from a banner's retry action.
    /// No-ops while a connection or reconnection is already in flight.
    pub async fn reconnect(&self) -> bool {
        {
            let mut s = self.shared.lock().expect("connection state poisoned");
            if s.in_flight {
                return false;
            }
            s.in_flight = true;
        }
        self.cmd_tx.send(Cmd::Reconnect).await.is_ok()
    }

    /// Emit a client event over the live connection.
    pub async fn emit(&self, event: ClientEvent) -> Result<(), ChatError> {
        let (ack, ack_rx) = oneshot::channel();
        self.cmd_tx
            .send(Cmd::Emit { event, ack })
            .await
            .map_err(|_| ChatError::NotConnected)?;
        ack_rx.await.map_err(|_| ChatError::NotConnected)?
    }

    /// OS/browser signal: connectivity came back. Reconnects immediately if
    /// currently disconnected.
    pub async fn network_restored(&self) {
        let _ = self.cmd_tx.send(Cmd::NetworkRestored).await;
    }

    /// OS/browser signal: connectivity dropped. Surfaces a notice without
    /// forcing a state change; the transport will report the loss itself.
    pub async fn network_lost(&self) {
        let _ = self.cmd_tx.send(Cmd::NetworkLost).await;
    }

    pub fn state(&self) -> ConnectionState {
        self.shared.lock().expect("connection state poisoned").state
    }

    pub fn attempt(&self) -> u32 {
        self.shared
            .lock()
            .expect("connection state poisoned")
            .attempt
    }

    pub fn last_error(&self) -> Option<ChatError> {
        self.shared
            .lock()
            .expect("connection state poisoned")
            .last_error
            .clone()
    }
}

enum Step {
    Cmd(Option<Cmd>),
    Frame(Option<Result<ServerEvent, ChatError>>),
}

async fn run_connection(
    mut cmd_rx: mpsc::Receiver<Cmd>,
    transport: Arc<dyn Transport>,
    cfg: ReconnectConfig,
    shared: Arc<Mutex<Inner>>,
    events_tx: broadcast::Sender<ChannelEvent>,
) {
    let mut link: Option<Box<dyn TransportLink>> = None;
    let mut retry_at: Option<Instant> = None;
    let mut token: Option<String> = None;

    let set_state = |state: ConnectionState| {
        shared.lock().expect("connection state poisoned").state = state;
        let _ = events_tx.send(ChannelEvent::State(state));
    };

    loop {
        let step = if link.is_some() {
            let active = link.as_mut().expect("link checked above");
            tokio::select! {
                cmd = cmd_rx.recv() => Step::Cmd(cmd),
                frame = active.recv() => Step::Frame(frame),
            }
        } else if let Some(deadline) = retry_at {
            tokio::select! {
                cmd = cmd_rx.recv() => Step::Cmd(cmd),
                _ = tokio::time::sleep_until(deadline) => {
                    retry_at = None;
                    attempt_open(
                        &transport,
                        token.as_deref(),
                        &cfg,
                        &shared,
                        &events_tx,
                        &mut link,
                        &mut retry_at,
                    )
                    .await;
                    continue;
                }
            }
        } else {
            Step::Cmd(cmd_rx.recv().await)
        };

        match step {
            Step::Cmd(None) => {
                // Manager dropped: close out and stop.
                if let Some(active) = link.as_mut() {
                    active.close().await;
                }
                return;
            }
            Step::Cmd(Some(Cmd::Connect { token: t })) => {
                if link.is_some() {
                    debug!("connect ignored: already connected");
                    shared.lock().expect("connection state poisoned").in_flight = false;
                    continue;
                }
                token = Some(t);
                retry_at = None;
                set_state(ConnectionState::Connecting);
                attempt_open(
                    &transport,
                    token.as_deref(),
                    &cfg,
                    &shared,
                    &events_tx,
                    &mut link,
                    &mut retry_at,
                )
                .await;
            }
            Step::Cmd(Some(Cmd::Disconnect)) => {
                if let Some(active) = link.as_mut() {
                    active.close().await;
                }
                link = None;
                retry_at = None;
                {
                    let mut s = shared.lock().expect("connection state poisoned");
                    s.attempt = 0;
                    s.last_error = None;
                    s.in_flight = false;
                }
                set_state(ConnectionState::Disconnected);
            }
            Step::Cmd(Some(Cmd::Reconnect)) => {
                if link.is_some() {
                    debug!("reconnect ignored: already connected");
                    shared.lock().expect("connection state poisoned").in_flight = false;
                    continue;
                }
                if token.is_none() {
                    warn!("reconnect ignored: no token supplied yet");
                    shared.lock().expect("connection state poisoned").in_flight = false;
                    continue;
                }
                retry_at = None;
                {
                    let mut s = shared.lock().expect("connection state poisoned");
                    s.attempt = 0;
                    s.last_error = None;
                }
                set_state(ConnectionState::Connecting);
                attempt_open(
                    &transport,
                    token.as_deref(),
                    &cfg,
                    &shared,
                    &events_tx,
                    &mut link,
                    &mut retry_at,
                )
                .await;
            }
            Step::Cmd(Some(Cmd::Emit { event, ack })) => {
                let result = match link.as_mut() {
                    Some(active) => active.send(event).await,
                    None => Err(ChatError::NotConnected),
                };
                let _ = ack.send(result);
            }
            Step::Cmd(Some(Cmd::NetworkRestored)) => {
                let idle = {
                    let s = shared.lock().expect("connection state poisoned");
                    !s.in_flight
                };
                if link.is_none() && idle && token.is_some() {
                    info!("network restored, reconnecting");
                    retry_at = None;
                    {
                        let mut s = shared.lock().expect("connection state poisoned");
                        s.attempt = 0;
                        s.last_error = None;
                        s.in_flight = true;
                    }
                    set_state(ConnectionState::Connecting);
                    attempt_open(
                        &transport,
                        token.as_deref(),
                        &cfg,
                        &shared,
                        &events_tx,
                        &mut link,
                        &mut retry_at,
                    )
                    .await;
                }
            }
            Step::Cmd(Some(Cmd::NetworkLost)) => {
                let _ = events_tx.send(ChannelEvent::Notice(
                    "network connection lost".to_string(),
                ));
            }
            Step::Frame(Some(Ok(event))) => {
                let _ = events_tx.send(ChannelEvent::Server(event));
            }
            Step::Frame(Some(Err(err))) if err.is_auth() => {
                warn!("authentication rejected mid-session: {err}");
                link = None;
                fail_terminal(&shared, &events_tx, err);
            }
            Step::Frame(Some(Err(err))) => {
                warn!("transport error: {err}");
                link = None;
                schedule_retry(&cfg, &shared, &events_tx, &mut retry_at, err);
            }
            Step::Frame(None) => {
                // Server-initiated close is recoverable.
                info!("connection closed by peer");
                link = None;
                schedule_retry(
                    &cfg,
                    &shared,
                    &events_tx,
                    &mut retry_at,
                    ChatError::Transient("connection closed by peer".to_string()),
                );
            }
        }
    }
}

async fn attempt_open(
    transport: &Arc<dyn Transport>,
    token: Option<&str>,
    cfg: &ReconnectConfig,
    shared: &Arc<Mutex<Inner>>,
    events_tx: &broadcast::Sender<ChannelEvent>,
    link: &mut Option<Box<dyn TransportLink>>,
    retry_at: &mut Option<Instant>,
) {
    let Some(token) = token else {
        let mut s = shared.lock().expect("connection state poisoned");
        s.in_flight = false;
        return;
    };

    match transport.open(token).await {
        Ok(new_link) => {
            *link = Some(new_link);
            {
                let mut s = shared.lock().expect("connection state poisoned");
                s.state = ConnectionState::Connected;
                s.attempt = 0;
                s.last_error = None;
                s.in_flight = false;
            }
            info!("realtime connection established");
            let _ = events_tx.send(ChannelEvent::State(ConnectionState::Connected));
        }
        Err(err) if err.is_auth() => {
            warn!("connection rejected: {err}");
            fail_terminal(shared, events_tx, err);
        }
        Err(err) => {
            schedule_retry(cfg, shared, events_tx, retry_at, err);
        }
    }
}

/// Terminal failure: no automatic retry until the caller intervenes.
fn fail_terminal(
    shared: &Arc<Mutex<Inner>>,
    events_tx: &broadcast::Sender<ChannelEvent>,
    err: ChatError,
) {
    {
        let mut s = shared.lock().expect("connection state poisoned");
        s.state = ConnectionState::Failed;
        s.last_error = Some(err);
        s.in_flight = false;
    }
    let _ = events_tx.send(ChannelEvent::State(ConnectionState::Failed));
}

/// Schedule the next automatic attempt, or give up once the ceiling is hit.
/// The in-flight flag stays set for the whole retry cycle so overlapping
/// attempts cannot start.
fn schedule_retry(
    cfg: &ReconnectConfig,
    shared: &Arc<Mutex<Inner>>,
    events_tx: &broadcast::Sender<ChannelEvent>,
    retry_at: &mut Option<Instant>,
    err: ChatError,
) {
    let mut s = shared.lock().expect("connection state poisoned");
    if s.attempt >= cfg.max_attempts {
        warn!("giving up after {} reconnection attempts", s.attempt);
        s.state = ConnectionState::Failed;
        s.last_error = Some(ChatError::Exhausted);
        s.in_flight = false;
        *retry_at = None;
        drop(s);
        let _ = events_tx.send(ChannelEvent::State(ConnectionState::Failed));
        return;
    }

    let delay = backoff_delay(cfg, s.attempt);
    s.attempt += 1;
    s.state = ConnectionState::Reconnecting;
    s.last_error = Some(err);
    s.in_flight = true;
    let attempt = s.attempt;
    drop(s);

    info!("reconnecting in {}ms (attempt {})", delay.as_millis(), attempt);
    *retry_at = Some(Instant::now() + delay);
    let _ = events_tx.send(ChannelEvent::State(ConnectionState::Reconnecting));
}
