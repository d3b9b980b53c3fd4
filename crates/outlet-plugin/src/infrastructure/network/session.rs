//! SessionManager: the plugin's session with its host controller.
//!
//! # Session lifecycle (for beginners)
//!
//! ```text
//!                 connect()                 both channels live,
//! Disconnected ──────────────► Connecting ── registration accepted ──► Connected
//!      ▲                           │                                     │  │
//!      │      any step fails       │                                     │  │
//!      └───────────────────────────┘                                     │  │
//!      ▲                                                                 │  │
//!      └──────────── a channel loses its connection (signal fires) ──────┘  │
//!                                                                           │
//!                shutdown() from any state (signal fires)                   │
//!      ShuttingDown ──► Terminated ◄────────────────────────────────────────┘
//! ```
//!
//! `connect` runs three steps in order: open + probe the primary channel,
//! open + probe the callback channel, then register the plugin on the primary
//! channel.  If a step fails, every channel opened by that attempt is closed
//! before the error is returned, so a failed attempt never leaves a half-open
//! session behind.
//!
//! Once connected, a liveness watcher task waits for either channel to close.
//! When one does, the session drops back to `Disconnected` and the
//! [`ShutdownSignal`] fires.  An explicit [`SessionManager::shutdown`] fires
//! the same signal; whichever happens first wins and the other is a no-op.
//!
//! The manager never holds its internal lock across an `.await`, and shares no
//! lock with the device registry.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex as StdMutex, MutexGuard, PoisonError};

use outlet_core::protocol::messages::{
    ChannelRole, DisconnectReason, HostCallbackMessage, LogLevel, RegisterPluginMessage,
    RpcMessage, WriteLogMessage,
};
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use super::rpc_channel::{ChannelConnector, ChannelError, HostChannel};
use super::shutdown::ShutdownSignal;

/// Name the plugin registers under and tags its log lines with.
pub const PLUGIN_NAME: &str = "Outlet Monitor";

/// `tracing` target for lines written through the host logging surface.
pub const HOST_LOG_TARGET: &str = "outlet_plugin::host_log";

/// Lifecycle state of the session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Disconnected,
    Connecting,
    Connected,
    ShuttingDown,
    Terminated,
}

/// The step of `connect` that failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectStep {
    PrimaryChannel,
    CallbackChannel,
    Registration,
}

impl std::fmt::Display for ConnectStep {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConnectStep::PrimaryChannel => f.write_str("primary channel"),
            ConnectStep::CallbackChannel => f.write_str("callback channel"),
            ConnectStep::Registration => f.write_str("plugin registration"),
        }
    }
}

/// Why a connect attempt failed.
#[derive(Debug, Error)]
pub enum ConnectionError {
    /// One of the three connect steps failed.
    #[error("{step} failed: {source}")]
    Step {
        step: ConnectStep,
        #[source]
        source: ChannelError,
    },

    /// `connect` was called while a session was already in progress or after
    /// shutdown.
    #[error("cannot connect while the session is {0:?}")]
    InvalidState(SessionState),
}

impl ConnectionError {
    /// The failed step, if the error came from one.
    pub fn step(&self) -> Option<ConnectStep> {
        match self {
            ConnectionError::Step { step, .. } => Some(*step),
            ConnectionError::InvalidState(_) => None,
        }
    }

    fn at(step: ConnectStep) -> impl FnOnce(ChannelError) -> Self {
        move |source| ConnectionError::Step { step, source }
    }
}

struct ActiveSession {
    primary: Arc<dyn HostChannel>,
    callback: Arc<dyn HostChannel>,
    liveness: JoinHandle<()>,
}

struct SessionInner {
    state: SessionState,
    active: Option<ActiveSession>,
    signal: ShutdownSignal,
    /// Bumped on every connect attempt so a stale watcher cannot tear down a
    /// newer session.
    generation: u64,
}

/// Owns the two host channels and the shutdown signal.
pub struct SessionManager {
    connector: Arc<dyn ChannelConnector>,
    instance_name: String,
    inner: Arc<StdMutex<SessionInner>>,
    debug_forwarding: AtomicBool,
}

impl SessionManager {
    pub fn new(connector: Arc<dyn ChannelConnector>, instance_name: impl Into<String>) -> Self {
        Self {
            connector,
            instance_name: instance_name.into(),
            inner: Arc::new(StdMutex::new(SessionInner {
                state: SessionState::Disconnected,
                active: None,
                signal: ShutdownSignal::new(),
                generation: 0,
            })),
            debug_forwarding: AtomicBool::new(false),
        }
    }

    pub fn state(&self) -> SessionState {
        lock(&self.inner).state
    }

    /// The signal of the current (or most recent) session.
    pub fn shutdown_signal(&self) -> ShutdownSignal {
        lock(&self.inner).signal.clone()
    }

    // ── Connect ───────────────────────────────────────────────────────────────

    /// Establishes the session with the host at `host:port`.
    ///
    /// # Errors
    ///
    /// - [`ConnectionError::Step`] naming the failed step; no channel is left
    ///   open.
    /// - [`ConnectionError::InvalidState`] unless the session is
    ///   `Disconnected`.
    pub async fn connect(&self, host: &str, port: u16) -> Result<(), ConnectionError> {
        let generation = {
            let mut inner = lock(&self.inner);
            if inner.state != SessionState::Disconnected {
                return Err(ConnectionError::InvalidState(inner.state));
            }
            inner.state = SessionState::Connecting;
            if inner.signal.is_fired() {
                inner.signal = ShutdownSignal::new();
            }
            inner.generation += 1;
            inner.generation
        };
        // Resets `Connecting` on every exit, including a dropped future.
        let _attempt = ConnectAttempt {
            inner: &self.inner,
            generation,
        };
        info!(host, port, "connecting to host");

        let (primary, callback) = match self.establish(host, port).await {
            Ok(channels) => channels,
            Err(e) => {
                warn!(host, port, error = %e, "connect failed");
                return Err(e);
            }
        };

        let outcome = {
            let mut inner = lock(&self.inner);
            if inner.state == SessionState::Connecting && inner.generation == generation {
                let liveness = tokio::spawn(watch_liveness(
                    Arc::clone(&self.inner),
                    generation,
                    Arc::clone(&primary),
                    Arc::clone(&callback),
                    inner.signal.clone(),
                ));
                inner.active = Some(ActiveSession {
                    primary: Arc::clone(&primary),
                    callback: Arc::clone(&callback),
                    liveness,
                });
                inner.state = SessionState::Connected;
                Ok(())
            } else {
                Err(inner.state)
            }
        };

        match outcome {
            Ok(()) => {
                info!(host, port, "session connected");
                Ok(())
            }
            Err(state) => {
                // Shut down while the handshake was in flight.
                primary.close().await;
                callback.close().await;
                Err(ConnectionError::InvalidState(state))
            }
        }
    }

    async fn establish(
        &self,
        host: &str,
        port: u16,
    ) -> Result<(Arc<dyn HostChannel>, Arc<dyn HostChannel>), ConnectionError> {
        let primary = self
            .open_and_probe(host, port, ChannelRole::Primary)
            .await
            .map_err(ConnectionError::at(ConnectStep::PrimaryChannel))?;

        let callback = match self.open_and_probe(host, port, ChannelRole::Callback).await {
            Ok(channel) => channel,
            Err(e) => {
                primary.close().await;
                return Err(ConnectionError::at(ConnectStep::CallbackChannel)(e));
            }
        };

        let registration = RegisterPluginMessage {
            plugin_name: PLUGIN_NAME.to_string(),
            instance_name: self.instance_name.clone(),
        };
        if let Err(e) = primary.register(registration).await {
            primary.close().await;
            callback.close().await;
            return Err(ConnectionError::at(ConnectStep::Registration)(e));
        }

        Ok((primary, callback))
    }

    async fn open_and_probe(
        &self,
        host: &str,
        port: u16,
        role: ChannelRole,
    ) -> Result<Arc<dyn HostChannel>, ChannelError> {
        let channel = self.connector.open(host, port, role).await?;
        match channel.probe().await {
            Ok(version) => {
                debug!(%role, api_version = version, "channel probe succeeded");
                Ok(channel)
            }
            Err(e) => {
                channel.close().await;
                Err(e)
            }
        }
    }

    // ── Shutdown ──────────────────────────────────────────────────────────────

    /// Blocks until the shutdown signal of the current session fires.
    pub async fn wait_for_shutdown_or_disconnect(&self) {
        let signal = self.shutdown_signal();
        signal.wait().await;
    }

    /// Ends the session for good.  Idempotent.
    ///
    /// Fires the shutdown signal, stops the liveness watcher, sends a
    /// best-effort `Disconnect` and closes both channels.
    pub async fn shutdown(&self) {
        let (active, signal) = {
            let mut inner = lock(&self.inner);
            if matches!(
                inner.state,
                SessionState::ShuttingDown | SessionState::Terminated
            ) {
                return;
            }
            inner.state = SessionState::ShuttingDown;
            (inner.active.take(), inner.signal.clone())
        };

        if signal.fire() {
            debug!("shutdown signal fired");
        }

        if let Some(active) = active {
            active.liveness.abort();
            let bye = RpcMessage::Disconnect {
                reason: DisconnectReason::UserInitiated,
            };
            if let Err(e) = active.primary.notify(bye).await {
                debug!(error = %e, "could not send disconnect to host");
            }
            active.primary.close().await;
            active.callback.close().await;
        }

        lock(&self.inner).state = SessionState::Terminated;
        info!("session terminated");
    }

    // ── Host callbacks ────────────────────────────────────────────────────────

    /// Takes the queue of host callbacks for the connected session.
    pub fn take_callbacks(&self) -> Option<mpsc::Receiver<HostCallbackMessage>> {
        lock(&self.inner)
            .active
            .as_ref()
            .and_then(|active| active.callback.take_callbacks())
    }

    // ── Logging surface ───────────────────────────────────────────────────────

    /// Enables forwarding of [`SessionManager::debug_log`] lines to the host.
    pub fn set_debug_logging(&self, enabled: bool) {
        self.debug_forwarding.store(enabled, Ordering::Relaxed);
    }

    pub fn debug_logging(&self) -> bool {
        self.debug_forwarding.load(Ordering::Relaxed)
    }

    pub async fn log_error(&self, text: impl Into<String>) {
        self.forward_log(LogLevel::Error, text.into()).await;
    }

    pub async fn log_warning(&self, text: impl Into<String>) {
        self.forward_log(LogLevel::Warning, text.into()).await;
    }

    pub async fn log_info(&self, text: impl Into<String>) {
        self.forward_log(LogLevel::Info, text.into()).await;
    }

    /// Always traces locally; forwarded to the host only while debug logging
    /// is enabled.
    pub async fn debug_log(&self, text: impl Into<String>) {
        let text = text.into();
        debug!(target: HOST_LOG_TARGET, "{text}");
        if self.debug_logging() {
            self.forward_log(LogLevel::Debug, text).await;
        }
    }

    /// Sends a log line to the host.  Never fails: when there is no session,
    /// or the send fails, the line is written to the local log instead.
    async fn forward_log(&self, level: LogLevel, text: String) {
        let primary = lock(&self.inner)
            .active
            .as_ref()
            .map(|active| Arc::clone(&active.primary));

        let Some(primary) = primary else {
            log_locally(level, &text);
            return;
        };

        let message = RpcMessage::WriteLog(WriteLogMessage {
            level,
            source: PLUGIN_NAME.to_string(),
            text,
        });
        if let Err(e) = primary.notify(message.clone()).await {
            warn!(error = %e, ?level, "failed to forward log line to host");
            if let RpcMessage::WriteLog(line) = message {
                log_locally(level, &line.text);
            }
        }
    }
}

/// Returns the session to `Disconnected` if its connect attempt ends while
/// still `Connecting`.  Channels opened by the attempt are closed when their
/// last handle drops.
struct ConnectAttempt<'a> {
    inner: &'a StdMutex<SessionInner>,
    generation: u64,
}

impl Drop for ConnectAttempt<'_> {
    fn drop(&mut self) {
        let mut inner = lock(self.inner);
        if inner.state == SessionState::Connecting && inner.generation == self.generation {
            inner.state = SessionState::Disconnected;
            debug!("connect attempt ended without a session");
        }
    }
}

fn lock(inner: &StdMutex<SessionInner>) -> MutexGuard<'_, SessionInner> {
    inner.lock().unwrap_or_else(PoisonError::into_inner)
}

fn log_locally(level: LogLevel, text: &str) {
    match level {
        LogLevel::Error => error!(target: HOST_LOG_TARGET, "{text}"),
        LogLevel::Warning => warn!(target: HOST_LOG_TARGET, "{text}"),
        LogLevel::Info => info!(target: HOST_LOG_TARGET, "{text}"),
        LogLevel::Debug => debug!(target: HOST_LOG_TARGET, "{text}"),
    }
}

/// Waits for either channel to close, then drops the session back to
/// `Disconnected` and fires its signal.
async fn watch_liveness(
    inner: Arc<StdMutex<SessionInner>>,
    generation: u64,
    primary: Arc<dyn HostChannel>,
    callback: Arc<dyn HostChannel>,
    signal: ShutdownSignal,
) {
    tokio::select! {
        _ = primary.closed() => warn!("primary channel lost"),
        _ = callback.closed() => warn!("callback channel lost"),
    }

    let lost = {
        let mut inner = lock(&inner);
        if inner.generation == generation && inner.state == SessionState::Connected {
            inner.state = SessionState::Disconnected;
            inner.active.take()
        } else {
            None
        }
    };

    if signal.fire() {
        info!("host connection lost; session disconnected");
    }

    if let Some(active) = lost {
        active.primary.close().await;
        active.callback.close().await;
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
