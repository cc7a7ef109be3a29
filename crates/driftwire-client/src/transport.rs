//! WebSocket + REST transport driver.
//!
//! Provides [`spawn`] which owns a [`SyncClient`] inside a tokio task and
//! bridges it to the real world: a WebSocket for push frames, an HTTP client
//! for mutations, timers for reconnects and ticks. This is a thin layer that
//! just executes [`SyncAction`]s; protocol logic remains in the sans-IO
//! [`SyncClient`].
//!
//! All client transitions run inside the one driver task, which is the
//! serialized execution context the epoch scheme requires.

use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::{
    sync::{mpsc, watch},
    task::AbortHandle,
};
use tokio_tungstenite::{
    connect_async,
    tungstenite::{Error as WsError, Message},
};
use tracing::{debug, error, info, warn};

use driftwire_core::{Environment, SystemEnv};
use driftwire_proto::{UserId, UserRecord};

use crate::{
    client::SyncClient,
    event::{MutationOutcome, SyncAction, SyncEvent},
    subscribe::StateSnapshot,
};

/// How often the driver ticks the client for timeout processing.
const TICK_INTERVAL: Duration = Duration::from_secs(1);

/// Buffered events between transport tasks and the driver loop.
const CHANNEL_CAPACITY: usize = 64;

/// Transport errors surfaced by [`SyncHandle`] methods.
#[derive(Debug, Error)]
pub enum TransportError {
    /// The driver task is gone; no further commands can be delivered.
    #[error("driver task stopped")]
    DriverStopped,
}

/// Transport configuration.
#[derive(Debug, Clone)]
pub struct TransportConfig {
    /// Push channel URL without the token query parameter.
    pub push_url: String,
    /// Base URL of the mutation endpoint.
    pub rest_url: String,
}

/// Commands the application sends to the driver.
#[derive(Debug)]
enum Command {
    Connect { token: String },
    Disconnect,
    Suspend { id: UserId, suspended: bool, reason: Option<String> },
    Seed { records: Vec<UserRecord> },
}

/// Handle to a running synchronization driver.
///
/// Dropping the handle does not stop the driver; call [`SyncHandle::stop`].
pub struct SyncHandle {
    commands: mpsc::Sender<Command>,
    snapshots: watch::Receiver<StateSnapshot>,
    abort: AbortHandle,
}

impl SyncHandle {
    /// Begin connecting with the given bearer token.
    ///
    /// # Errors
    ///
    /// - [`TransportError::DriverStopped`] if the driver task is gone.
    pub async fn connect(&self, token: impl Into<String>) -> Result<(), TransportError> {
        self.send(Command::Connect { token: token.into() }).await
    }

    /// Tear the connection down.
    ///
    /// # Errors
    ///
    /// - [`TransportError::DriverStopped`] if the driver task is gone.
    pub async fn disconnect(&self) -> Result<(), TransportError> {
        self.send(Command::Disconnect).await
    }

    /// Optimistically suspend or reinstate a user.
    ///
    /// # Errors
    ///
    /// - [`TransportError::DriverStopped`] if the driver task is gone.
    pub async fn suspend(
        &self,
        id: impl Into<UserId>,
        suspended: bool,
        reason: Option<String>,
    ) -> Result<(), TransportError> {
        self.send(Command::Suspend { id: id.into(), suspended, reason }).await
    }

    /// Install initial page-load records.
    ///
    /// # Errors
    ///
    /// - [`TransportError::DriverStopped`] if the driver task is gone.
    pub async fn seed(&self, records: Vec<UserRecord>) -> Result<(), TransportError> {
        self.send(Command::Seed { records }).await
    }

    /// Latest state snapshot.
    #[must_use]
    pub fn snapshot(&self) -> StateSnapshot {
        self.snapshots.borrow().clone()
    }

    /// Watch channel that updates on every state change.
    #[must_use]
    pub fn watch(&self) -> watch::Receiver<StateSnapshot> {
        self.snapshots.clone()
    }

    /// Stop the driver and any transport tasks it owns.
    pub fn stop(&self) {
        self.abort.abort();
    }

    async fn send(&self, command: Command) -> Result<(), TransportError> {
        self.commands.send(command).await.map_err(|_| TransportError::DriverStopped)
    }
}

/// Spawn the synchronization driver.
///
/// The returned handle is the application's only interface; the client
/// itself lives inside the driver task.
#[must_use]
pub fn spawn(config: TransportConfig) -> SyncHandle {
    let env = SystemEnv;
    let client = SyncClient::new(env, config.push_url.clone());

    let (command_tx, command_rx) = mpsc::channel(CHANNEL_CAPACITY);
    let (snapshot_tx, snapshot_rx) = watch::channel(StateSnapshot {
        users: Vec::new(),
        stats: driftwire_proto::DashboardStats::default(),
        connection: driftwire_core::ConnectionState::Disconnected,
    });

    let task = tokio::spawn(run_driver(config, env, client, command_rx, snapshot_tx));

    SyncHandle { commands: command_tx, snapshots: snapshot_rx, abort: task.abort_handle() }
}

/// The driver loop: feed events into the client, execute its actions.
async fn run_driver(
    config: TransportConfig,
    env: SystemEnv,
    mut client: SyncClient<SystemEnv>,
    mut commands: mpsc::Receiver<Command>,
    snapshots: watch::Sender<StateSnapshot>,
) {
    // Transport tasks and timers feed their outcomes back through here.
    let (feedback_tx, mut feedback_rx) = mpsc::channel::<SyncEvent>(CHANNEL_CAPACITY);

    client.subscribe(move |snapshot: &StateSnapshot| {
        // Receivers may be gone; the driver keeps running regardless.
        let _ = snapshots.send(snapshot.clone());
    });

    let http = reqwest::Client::new();
    let mut ticker = tokio::time::interval(TICK_INTERVAL);
    // The client is idle most of the time; no point catching up on ticks.
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

    let mut socket: Option<AbortHandle> = None;

    loop {
        let event = tokio::select! {
            command = commands.recv() => match command {
                Some(Command::Connect { token }) => SyncEvent::Connect { token },
                Some(Command::Disconnect) => SyncEvent::Disconnect,
                Some(Command::Suspend { id, suspended, reason }) => {
                    SyncEvent::ApplySuspend { id, suspended, reason }
                },
                Some(Command::Seed { records }) => SyncEvent::Seed { records },
                None => break,
            },
            feedback = feedback_rx.recv() => match feedback {
                Some(event) => event,
                None => break,
            },
            _ = ticker.tick() => SyncEvent::Tick { now: env.now() },
        };

        for action in client.handle(event) {
            execute(action, &config, &env, &http, &feedback_tx, &mut socket);
        }
    }

    if let Some(socket) = socket {
        socket.abort();
    }
}

/// Execute one action by spawning the I/O it asks for.
fn execute(
    action: SyncAction,
    config: &TransportConfig,
    env: &SystemEnv,
    http: &reqwest::Client,
    feedback: &mpsc::Sender<SyncEvent>,
    socket: &mut Option<AbortHandle>,
) {
    match action {
        SyncAction::OpenTransport { url, epoch } => {
            if let Some(old) = socket.take() {
                old.abort();
            }
            let task = tokio::spawn(run_socket(url, epoch, feedback.clone()));
            *socket = Some(task.abort_handle());
        },
        SyncAction::CloseTransport => {
            if let Some(old) = socket.take() {
                old.abort();
            }
        },
        SyncAction::ScheduleReconnect { delay, epoch } => {
            let env = *env;
            let feedback = feedback.clone();
            tokio::spawn(async move {
                env.sleep(delay).await;
                let _ = feedback.send(SyncEvent::ReconnectTimerFired { epoch }).await;
            });
        },
        SyncAction::IssueSuspend { id, suspended, reason } => {
            tokio::spawn(issue_suspend(
                http.clone(),
                config.rest_url.clone(),
                id,
                suspended,
                reason,
                feedback.clone(),
            ));
        },
        SyncAction::MutationFailed { id, error } => {
            warn!(id = %id, %error, "mutation failed and was rolled back");
        },
        SyncAction::Fatal(err) => {
            error!(%err, "synchronization is down");
        },
        SyncAction::Log { message } => {
            debug!("{message}");
        },
    }
}

/// One WebSocket lifetime: open, report, pump frames until it dies.
async fn run_socket(url: String, epoch: u64, feedback: mpsc::Sender<SyncEvent>) {
    let (stream, _response) = match connect_async(url).await {
        Ok(pair) => pair,
        Err(err) => {
            let _ = feedback.send(classify_open_failure(epoch, &err)).await;
            return;
        },
    };

    info!(epoch, "websocket open");
    if feedback.send(SyncEvent::TransportOpened { epoch }).await.is_err() {
        return;
    }

    let (mut sink, mut source) = stream.split();

    while let Some(message) = source.next().await {
        match message {
            Ok(Message::Text(text)) => {
                if feedback.send(SyncEvent::FrameReceived { epoch, text }).await.is_err() {
                    return;
                }
            },
            Ok(Message::Ping(payload)) => {
                if sink.send(Message::Pong(payload)).await.is_err() {
                    break;
                }
            },
            Ok(Message::Close(_)) => break,
            Ok(_) => {},
            Err(err) => {
                warn!(epoch, %err, "websocket read failed");
                break;
            },
        }
    }

    let _ = feedback.send(SyncEvent::TransportFailed { epoch }).await;
}

/// Map a failed websocket open to the right client event.
///
/// An HTTP 401/403 during the handshake means the server rejected the
/// bearer token; that is fatal and must not burn reconnect attempts.
/// Everything else is a transient transport failure.
fn classify_open_failure(epoch: u64, err: &WsError) -> SyncEvent {
    if let WsError::Http(response) = err {
        let status = response.status();
        if matches!(status.as_u16(), 401 | 403) {
            warn!(epoch, status = status.as_u16(), "auth token rejected");
            return SyncEvent::AuthRejected { epoch, reason: format!("auth rejected: {status}") };
        }
    }

    warn!(epoch, %err, "websocket open failed");
    SyncEvent::TransportFailed { epoch }
}

/// Body of `PUT /resource/{id}/suspend`.
#[derive(Debug, Serialize)]
struct SuspendRequest {
    suspended: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    reason: Option<String>,
}

/// Mutation endpoint response envelope.
#[derive(Debug, Deserialize)]
struct SuspendResponse {
    success: bool,
    #[serde(default)]
    message: String,
    #[serde(default)]
    data: Option<UserRecord>,
}

/// Issue the suspend request and feed the outcome back to the driver.
async fn issue_suspend(
    http: reqwest::Client,
    rest_url: String,
    id: UserId,
    suspended: bool,
    reason: Option<String>,
    feedback: mpsc::Sender<SyncEvent>,
) {
    let url = format!("{rest_url}/resource/{id}/suspend");
    let body = SuspendRequest { suspended, reason };

    let outcome = match http.put(&url).json(&body).send().await {
        Ok(response) => match response.json::<SuspendResponse>().await {
            Ok(SuspendResponse { success: true, data: Some(record), .. }) => {
                MutationOutcome::Confirmed { record }
            },
            Ok(SuspendResponse { success: true, data: None, .. }) => {
                MutationOutcome::Failed { reason: "response carried no record".to_string() }
            },
            Ok(SuspendResponse { message, .. }) => MutationOutcome::Failed { reason: message },
            Err(err) => MutationOutcome::Failed { reason: format!("invalid response: {err}") },
        },
        Err(err) => MutationOutcome::Failed { reason: format!("request failed: {err}") },
    };

    let _ = feedback.send(SyncEvent::MutationResolved { id, outcome }).await;
}
