//! All message types exchanged with the host controller.
//!
//! The plugin keeps two TCP channels open to the host:
//!
//! - the **primary** channel carries plugin → host calls (version probe,
//!   reverse registration, log writes);
//! - the **callback** channel carries host → plugin callbacks.
//!
//! Both channels use the same framing.  A frame whose call id is non-zero is
//! either a call or the reply to that call; call id 0 marks a notification
//! that expects no reply.

use serde::{Deserialize, Serialize};

// ── Protocol constants ────────────────────────────────────────────────────────

/// Current protocol version byte.
pub const PROTOCOL_VERSION: u8 = 0x01;

/// Total size of the common frame header in bytes.
pub const HEADER_SIZE: usize = 24;

/// Largest payload accepted by the decoder.
pub const MAX_PAYLOAD_SIZE: usize = 1 << 20;

/// Call id used for notifications (frames that expect no reply).
pub const NOTIFICATION_ID: u64 = 0;

// ── Channel roles ─────────────────────────────────────────────────────────────

/// Which of the two session channels a connection serves.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum ChannelRole {
    /// Plugin → host calls.
    Primary = 0x01,
    /// Host → plugin callback delivery.
    Callback = 0x02,
}

impl TryFrom<u8> for ChannelRole {
    type Error = ();

    fn try_from(value: u8) -> Result<Self, ()> {
        match value {
            0x01 => Ok(ChannelRole::Primary),
            0x02 => Ok(ChannelRole::Callback),
            _ => Err(()),
        }
    }
}

impl std::fmt::Display for ChannelRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ChannelRole::Primary => f.write_str("primary"),
            ChannelRole::Callback => f.write_str("callback"),
        }
    }
}

// ── Message type codes ────────────────────────────────────────────────────────

/// All message type codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[repr(u8)]
pub enum MessageType {
    // Channel control (0x00–0x0F)
    Hello = 0x01,
    Ping = 0x02,
    Pong = 0x03,
    Disconnect = 0x04,
    Error = 0x05,
    // Plugin → host calls (0x10–0x1F)
    GetApiVersion = 0x10,
    ApiVersion = 0x11,
    RegisterPlugin = 0x12,
    RegisterAck = 0x13,
    WriteLog = 0x14,
    // Host → plugin (0x20–0x2F)
    HostCallback = 0x20,
}

impl TryFrom<u8> for MessageType {
    type Error = ();

    fn try_from(value: u8) -> Result<Self, ()> {
        match value {
            0x01 => Ok(MessageType::Hello),
            0x02 => Ok(MessageType::Ping),
            0x03 => Ok(MessageType::Pong),
            0x04 => Ok(MessageType::Disconnect),
            0x05 => Ok(MessageType::Error),
            0x10 => Ok(MessageType::GetApiVersion),
            0x11 => Ok(MessageType::ApiVersion),
            0x12 => Ok(MessageType::RegisterPlugin),
            0x13 => Ok(MessageType::RegisterAck),
            0x14 => Ok(MessageType::WriteLog),
            0x20 => Ok(MessageType::HostCallback),
            _ => Err(()),
        }
    }
}

// ── Enumerated payload fields ─────────────────────────────────────────────────

/// Why a channel is being closed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[repr(u8)]
pub enum DisconnectReason {
    UserInitiated = 0x01,
    HostShutdown = 0x02,
    ProtocolError = 0x03,
    Timeout = 0x04,
}

impl TryFrom<u8> for DisconnectReason {
    type Error = ();

    fn try_from(value: u8) -> Result<Self, ()> {
        match value {
            0x01 => Ok(DisconnectReason::UserInitiated),
            0x02 => Ok(DisconnectReason::HostShutdown),
            0x03 => Ok(DisconnectReason::ProtocolError),
            0x04 => Ok(DisconnectReason::Timeout),
            _ => Err(()),
        }
    }
}

/// Severity of a log line forwarded to the host.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[repr(u8)]
pub enum LogLevel {
    Error = 0x01,
    Warning = 0x02,
    Info = 0x03,
    Debug = 0x04,
}

impl TryFrom<u8> for LogLevel {
    type Error = ();

    fn try_from(value: u8) -> Result<Self, ()> {
        match value {
            0x01 => Ok(LogLevel::Error),
            0x02 => Ok(LogLevel::Warning),
            0x03 => Ok(LogLevel::Info),
            0x04 => Ok(LogLevel::Debug),
            _ => Err(()),
        }
    }
}

/// Error codes carried in an [`ErrorMessage`] reply.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[repr(u8)]
pub enum RemoteErrorCode {
    UnknownMethod = 0x01,
    InvalidArguments = 0x02,
    NotRegistered = 0x03,
    InternalError = 0x04,
}

// ── Per-message payload structs ───────────────────────────────────────────────

/// HELLO (0x01): first frame on every channel, announcing its role.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HelloMessage {
    pub role: ChannelRole,
    /// Per-process identifier shared by both channels of one session.
    pub plugin_id: String,
}

/// REGISTER_PLUGIN (0x12): reverse registration announcing the plugin to the host.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegisterPluginMessage {
    pub plugin_name: String,
    /// Friendly instance name; empty for the default instance.
    pub instance_name: String,
}

/// REGISTER_ACK (0x13): host reply to [`RegisterPluginMessage`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegisterAckMessage {
    pub accepted: bool,
    /// Empty when accepted.
    pub reason: String,
}

/// WRITE_LOG (0x14): a log line for the host's log.  Always a notification.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WriteLogMessage {
    pub level: LogLevel,
    /// Source tag shown next to the line (the plugin name).
    pub source: String,
    pub text: String,
}

/// HOST_CALLBACK (0x20): a host → plugin callback on the callback channel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HostCallbackMessage {
    pub method: String,
    /// Opaque argument bytes owned by the host.
    pub payload: Vec<u8>,
}

/// ERROR (0x05): reply sent instead of the expected result when a call fails.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorMessage {
    pub code: RemoteErrorCode,
    pub description: String,
}

// ── Top-level message enum ────────────────────────────────────────────────────

/// Every message that can travel on a session channel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum RpcMessage {
    Hello(HelloMessage),
    /// Keep-alive from the host; the plugin answers with `Pong` carrying the token.
    Ping(u64),
    Pong(u64),
    Disconnect { reason: DisconnectReason },
    Error(ErrorMessage),
    GetApiVersion,
    ApiVersion(u32),
    RegisterPlugin(RegisterPluginMessage),
    RegisterAck(RegisterAckMessage),
    WriteLog(WriteLogMessage),
    HostCallback(HostCallbackMessage),
}

impl RpcMessage {
    /// Returns the [`MessageType`] discriminant for this message.
    pub fn message_type(&self) -> MessageType {
        match self {
            RpcMessage::Hello(_) => MessageType::Hello,
            RpcMessage::Ping(_) => MessageType::Ping,
            RpcMessage::Pong(_) => MessageType::Pong,
            RpcMessage::Disconnect { .. } => MessageType::Disconnect,
            RpcMessage::Error(_) => MessageType::Error,
            RpcMessage::GetApiVersion => MessageType::GetApiVersion,
            RpcMessage::ApiVersion(_) => MessageType::ApiVersion,
            RpcMessage::RegisterPlugin(_) => MessageType::RegisterPlugin,
            RpcMessage::RegisterAck(_) => MessageType::RegisterAck,
            RpcMessage::WriteLog(_) => MessageType::WriteLog,
            RpcMessage::HostCallback(_) => MessageType::HostCallback,
        }
    }

    /// Returns `true` for messages that answer a call.
    pub fn is_reply(&self) -> bool {
        matches!(
            self,
            RpcMessage::Error(_) | RpcMessage::ApiVersion(_) | RpcMessage::RegisterAck(_)
        )
    }
}
