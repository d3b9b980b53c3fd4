//! RPC channels to the host controller.
//!
//! A session uses two TCP connections to the same host endpoint:
//!
//! - the **primary** channel carries plugin → host calls (probe, registration,
//!   log lines);
//! - the **callback** channel carries host → plugin callbacks.
//!
//! Both speak the framing codec from `outlet_core::protocol`.
//!
//! # How a call works (for beginners)
//!
//! ```text
//! call(msg)                              reader task
//!   │ id = next call id                      │
//!   │ pending[id] = oneshot sender           │
//!   │ write frame(id, msg) ───────► host     │
//!   │ await oneshot (bounded by timeout)     │
//!   │                          host ───────► │ frame(id, reply)
//!   │ ◄──────────── pending.remove(id).send(reply)
//! ```
//!
//! The reader task owns the read half of the socket.  Besides routing replies
//! it answers `Ping` with `Pong`, forwards `HostCallback` messages to a queue,
//! and marks the channel closed on EOF, a read error, an undecodable frame, or
//! a `Disconnect` frame.  Marking the channel closed drops every pending
//! sender, so callers blocked in `call` see [`ChannelError::Closed`].
//!
//! The [`HostChannel`] and [`ChannelConnector`] traits are the seams the
//! session manager is written against; tests substitute in-memory doubles.

use std::collections::HashMap;
use std::sync::{Arc, Mutex as StdMutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use outlet_core::protocol::codec::{decode_frame, encode_frame_now, payload_len_from_header};
use outlet_core::protocol::messages::{
    ChannelRole, ErrorMessage, HelloMessage, HostCallbackMessage, MessageType,
    RegisterPluginMessage, RemoteErrorCode, RpcMessage, HEADER_SIZE, NOTIFICATION_ID,
};
use outlet_core::protocol::sequence::SequenceCounter;
use outlet_core::{Frame, ProtocolError};
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot, watch, Mutex};
use tokio::task::JoinHandle;
use tokio::time;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Maximum number of undelivered host callbacks before new ones are dropped.
const CALLBACK_QUEUE_DEPTH: usize = 64;

/// Errors raised by a host channel.
#[derive(Debug, Error)]
pub enum ChannelError {
    /// TCP connection to the host failed.
    #[error("failed to connect to host at {endpoint}: {source}")]
    Connect {
        endpoint: String,
        #[source]
        source: std::io::Error,
    },

    /// An I/O error occurred on the established connection.
    #[error("channel I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// A frame could not be encoded or decoded.
    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    /// The channel is closed, or closed while the call was in flight.
    #[error("channel closed")]
    Closed,

    /// The host did not answer in time.
    #[error("no reply within {0:?}")]
    Timeout(Duration),

    /// The host declined the plugin registration.
    #[error("registration rejected by host: {0}")]
    Rejected(String),

    /// The host answered the call with an error reply.
    #[error("host returned {code:?}: {description}")]
    Remote {
        code: RemoteErrorCode,
        description: String,
    },

    /// The host answered with a message that does not fit the call.
    #[error("unexpected {0:?} reply")]
    UnexpectedReply(MessageType),
}

impl From<ErrorMessage> for ChannelError {
    fn from(e: ErrorMessage) -> Self {
        ChannelError::Remote {
            code: e.code,
            description: e.description,
        }
    }
}

/// Timeouts applied by TCP channels.
#[derive(Debug, Clone)]
pub struct ChannelOptions {
    pub connect_timeout: Duration,
    pub call_timeout: Duration,
}

impl Default for ChannelOptions {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(10),
            call_timeout: Duration::from_secs(10),
        }
    }
}

// ── Channel seams ─────────────────────────────────────────────────────────────

/// One open connection to the host.
#[async_trait]
pub trait HostChannel: Send + Sync {
    fn role(&self) -> ChannelRole;

    /// Liveness probe: asks the host for its API version.
    async fn probe(&self) -> Result<u32, ChannelError>;

    /// Announces the plugin to the host.
    async fn register(&self, registration: RegisterPluginMessage) -> Result<(), ChannelError>;

    /// Sends `message` without waiting for a reply.
    async fn notify(&self, message: RpcMessage) -> Result<(), ChannelError>;

    /// Completes once the channel has lost its connection or was closed.
    async fn closed(&self);

    fn is_closed(&self) -> bool;

    /// Closes the connection.  Idempotent.
    async fn close(&self);

    /// Hands out the queue of host callbacks.  Returns `None` after the first
    /// call.
    fn take_callbacks(&self) -> Option<mpsc::Receiver<HostCallbackMessage>>;
}

/// Opens [`HostChannel`]s to a host endpoint.
#[async_trait]
pub trait ChannelConnector: Send + Sync {
    async fn open(
        &self,
        host: &str,
        port: u16,
        role: ChannelRole,
    ) -> Result<Arc<dyn HostChannel>, ChannelError>;
}

// ── Framing over a byte stream ────────────────────────────────────────────────

/// Reads one frame.  Returns `Ok(None)` when the peer closed the stream.
pub async fn read_frame<R>(reader: &mut R) -> Result<Option<Frame>, ChannelError>
where
    R: AsyncRead + Unpin,
{
    let mut header = [0u8; HEADER_SIZE];
    match reader.read_exact(&mut header).await {
        Ok(_) => {}
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(None),
        Err(e) => return Err(e.into()),
    }

    let payload_len = payload_len_from_header(&header)?;
    let mut buf = Vec::with_capacity(HEADER_SIZE + payload_len);
    buf.extend_from_slice(&header);
    buf.resize(HEADER_SIZE + payload_len, 0);
    reader.read_exact(&mut buf[HEADER_SIZE..]).await?;

    let (frame, _) = decode_frame(&buf)?;
    Ok(Some(frame))
}

/// Encodes and writes one frame.
pub async fn write_frame<W>(
    writer: &mut W,
    message: &RpcMessage,
    call_id: u64,
) -> Result<(), ChannelError>
where
    W: AsyncWrite + Unpin,
{
    let bytes = encode_frame_now(message, call_id)?;
    writer.write_all(&bytes).await?;
    Ok(())
}

// ── TCP implementation ────────────────────────────────────────────────────────

/// State shared between a [`TcpHostChannel`] and its reader task.
struct ChannelShared {
    role: ChannelRole,
    writer: Mutex<Option<OwnedWriteHalf>>,
    pending: StdMutex<HashMap<u64, oneshot::Sender<RpcMessage>>>,
    closed: watch::Sender<bool>,
    call_ids: SequenceCounter,
}

impl ChannelShared {
    fn lock_pending(&self) -> MutexGuard<'_, HashMap<u64, oneshot::Sender<RpcMessage>>> {
        self.pending.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn is_closed(&self) -> bool {
        *self.closed.borrow()
    }

    /// Flags the channel closed and fails every pending call.
    ///
    /// The flag is set before the pending map is drained; `call` relies on
    /// that order.
    fn mark_closed(&self) {
        let newly_closed = self.closed.send_if_modified(|closed| {
            if *closed {
                false
            } else {
                *closed = true;
                true
            }
        });
        self.lock_pending().clear();
        if newly_closed {
            debug!(role = %self.role, "channel marked closed");
        }
    }

    async fn send(&self, message: &RpcMessage, call_id: u64) -> Result<(), ChannelError> {
        let mut guard = self.writer.lock().await;
        let writer = guard.as_mut().ok_or(ChannelError::Closed)?;
        if let Err(e) = write_frame(writer, message, call_id).await {
            if matches!(e, ChannelError::Io(_)) {
                drop(guard);
                self.mark_closed();
            }
            return Err(e);
        }
        Ok(())
    }

    fn complete(&self, call_id: u64, reply: RpcMessage) {
        match self.lock_pending().remove(&call_id) {
            Some(tx) => {
                let _ = tx.send(reply);
            }
            None => debug!(role = %self.role, call_id, "reply for unknown or expired call"),
        }
    }
}

async fn read_loop(
    shared: Arc<ChannelShared>,
    mut reader: OwnedReadHalf,
    callbacks: mpsc::Sender<HostCallbackMessage>,
) {
    let role = shared.role;
    loop {
        let frame = match read_frame(&mut reader).await {
            Ok(Some(frame)) => frame,
            Ok(None) => {
                debug!(%role, "host closed the connection");
                break;
            }
            Err(e) => {
                warn!(%role, error = %e, "channel read failed");
                break;
            }
        };

        match frame.message {
            RpcMessage::Ping(token) => {
                if let Err(e) = shared.send(&RpcMessage::Pong(token), frame.call_id).await {
                    warn!(%role, error = %e, "failed to answer ping");
                    break;
                }
            }
            RpcMessage::Disconnect { reason } => {
                info!(%role, ?reason, "host ended the session");
                break;
            }
            RpcMessage::HostCallback(callback) => {
                if let Err(e) = callbacks.try_send(callback) {
                    warn!(%role, error = %e, "host callback dropped");
                }
            }
            message if message.is_reply() => shared.complete(frame.call_id, message),
            other => debug!(%role, message_type = ?other.message_type(), "ignoring message"),
        }
    }
    shared.mark_closed();
}

/// A [`HostChannel`] over a TCP connection.
pub struct TcpHostChannel {
    shared: Arc<ChannelShared>,
    reader: StdMutex<Option<JoinHandle<()>>>,
    callbacks: StdMutex<Option<mpsc::Receiver<HostCallbackMessage>>>,
    call_timeout: Duration,
}

impl TcpHostChannel {
    /// Connects to `host:port` and announces `role` with a `Hello` frame.
    ///
    /// # Errors
    ///
    /// - [`ChannelError::Connect`] if the TCP connection is refused.
    /// - [`ChannelError::Timeout`] if it does not complete in time.
    pub async fn open(
        host: &str,
        port: u16,
        role: ChannelRole,
        plugin_id: &str,
        options: &ChannelOptions,
    ) -> Result<Self, ChannelError> {
        let endpoint = format!("{host}:{port}");
        let stream = match time::timeout(options.connect_timeout, TcpStream::connect((host, port)))
            .await
        {
            Ok(Ok(stream)) => stream,
            Ok(Err(source)) => return Err(ChannelError::Connect { endpoint, source }),
            Err(_) => return Err(ChannelError::Timeout(options.connect_timeout)),
        };
        let _ = stream.set_nodelay(true);
        let (read_half, write_half) = stream.into_split();

        let (closed, _) = watch::channel(false);
        let shared = Arc::new(ChannelShared {
            role,
            writer: Mutex::new(Some(write_half)),
            pending: StdMutex::new(HashMap::new()),
            closed,
            call_ids: SequenceCounter::new(),
        });
        let (callback_tx, callback_rx) = mpsc::channel(CALLBACK_QUEUE_DEPTH);
        let reader = tokio::spawn(read_loop(Arc::clone(&shared), read_half, callback_tx));

        let channel = Self {
            shared,
            reader: StdMutex::new(Some(reader)),
            callbacks: StdMutex::new(Some(callback_rx)),
            call_timeout: options.call_timeout,
        };

        let hello = RpcMessage::Hello(HelloMessage {
            role,
            plugin_id: plugin_id.to_string(),
        });
        channel.shared.send(&hello, NOTIFICATION_ID).await?;
        info!(%role, %endpoint, "channel open");
        Ok(channel)
    }

    /// Sends `message` as a call and waits for the matching reply.
    pub async fn call(&self, message: RpcMessage) -> Result<RpcMessage, ChannelError> {
        let call_id = self.shared.call_ids.next();
        let (tx, rx) = oneshot::channel();
        self.shared.lock_pending().insert(call_id, tx);

        if self.shared.is_closed() {
            self.shared.lock_pending().remove(&call_id);
            return Err(ChannelError::Closed);
        }
        if let Err(e) = self.shared.send(&message, call_id).await {
            self.shared.lock_pending().remove(&call_id);
            return Err(e);
        }

        match time::timeout(self.call_timeout, rx).await {
            Ok(Ok(reply)) => Ok(reply),
            Ok(Err(_)) => Err(ChannelError::Closed),
            Err(_) => {
                self.shared.lock_pending().remove(&call_id);
                warn!(
                    role = %self.shared.role,
                    message_type = ?message.message_type(),
                    timeout = ?self.call_timeout,
                    "call timed out"
                );
                Err(ChannelError::Timeout(self.call_timeout))
            }
        }
    }

    fn abort_reader(&self) {
        let handle = self
            .reader
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(handle) = handle {
            handle.abort();
        }
    }
}

#[async_trait]
impl HostChannel for TcpHostChannel {
    fn role(&self) -> ChannelRole {
        self.shared.role
    }

    async fn probe(&self) -> Result<u32, ChannelError> {
        match self.call(RpcMessage::GetApiVersion).await? {
            RpcMessage::ApiVersion(version) => Ok(version),
            RpcMessage::Error(e) => Err(e.into()),
            other => Err(ChannelError::UnexpectedReply(other.message_type())),
        }
    }

    async fn register(&self, registration: RegisterPluginMessage) -> Result<(), ChannelError> {
        match self.call(RpcMessage::RegisterPlugin(registration)).await? {
            RpcMessage::RegisterAck(ack) if ack.accepted => Ok(()),
            RpcMessage::RegisterAck(ack) => Err(ChannelError::Rejected(ack.reason)),
            RpcMessage::Error(e) => Err(e.into()),
            other => Err(ChannelError::UnexpectedReply(other.message_type())),
        }
    }

    async fn notify(&self, message: RpcMessage) -> Result<(), ChannelError> {
        if self.shared.is_closed() {
            return Err(ChannelError::Closed);
        }
        self.shared.send(&message, NOTIFICATION_ID).await
    }

    async fn closed(&self) {
        let mut rx = self.shared.closed.subscribe();
        let _ = rx.wait_for(|closed| *closed).await;
    }

    fn is_closed(&self) -> bool {
        self.shared.is_closed()
    }

    async fn close(&self) {
        self.abort_reader();
        let writer = self.shared.writer.lock().await.take();
        if let Some(mut writer) = writer {
            let _ = writer.shutdown().await;
            debug!(role = %self.shared.role, "channel closed locally");
        }
        self.shared.mark_closed();
    }

    fn take_callbacks(&self) -> Option<mpsc::Receiver<HostCallbackMessage>> {
        self.callbacks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
    }
}

impl Drop for TcpHostChannel {
    fn drop(&mut self) {
        self.abort_reader();
    }
}

/// Opens [`TcpHostChannel`]s, tagging both channels of the process with one
/// plugin id.
#[derive(Debug, Clone)]
pub struct TcpChannelConnector {
    plugin_id: String,
    options: ChannelOptions,
}

impl TcpChannelConnector {
    pub fn new(options: ChannelOptions) -> Self {
        Self {
            plugin_id: Uuid::new_v4().to_string(),
            options,
        }
    }

    pub fn plugin_id(&self) -> &str {
        &self.plugin_id
    }
}

#[async_trait]
impl ChannelConnector for TcpChannelConnector {
    async fn open(
        &self,
        host: &str,
        port: u16,
        role: ChannelRole,
    ) -> Result<Arc<dyn HostChannel>, ChannelError> {
        let channel = TcpHostChannel::open(host, port, role, &self.plugin_id, &self.options).await?;
        Ok(Arc::new(channel))
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
