//! Binary codec for encoding and decoding host RPC frames.
//!
//! Wire format:
//! ```text
//! [version:1][msg_type:1][reserved:2][payload_len:4][call_id:8][timestamp_us:8][payload:N]
//! ```
//! Total header size: 24 bytes. All multi-byte integers are big-endian.
//! Strings are a 2-byte length prefix followed by UTF-8 bytes.

use std::time::{SystemTime, UNIX_EPOCH};

use crate::protocol::messages::{
    ChannelRole, DisconnectReason, ErrorMessage, HelloMessage, HostCallbackMessage, LogLevel,
    MessageType, RegisterAckMessage, RegisterPluginMessage, RemoteErrorCode, RpcMessage,
    WriteLogMessage, HEADER_SIZE, MAX_PAYLOAD_SIZE, PROTOCOL_VERSION,
};
use thiserror::Error;

/// Errors that can occur during frame encoding or decoding.
#[derive(Debug, Error, PartialEq)]
pub enum ProtocolError {
    /// The byte slice is shorter than the minimum required length.
    #[error("insufficient data: need at least {needed} bytes, got {available}")]
    InsufficientData { needed: usize, available: usize },

    /// The message type byte in the header is not a recognized value.
    #[error("unknown message type: 0x{0:02X}")]
    UnknownMessageType(u8),

    /// The protocol version in the header is not supported.
    #[error("unsupported protocol version: {0}")]
    UnsupportedVersion(u8),

    /// The payload could not be parsed (field value out of range, UTF-8 error, etc.).
    #[error("malformed payload: {0}")]
    MalformedPayload(String),

    /// The encoded payload length field does not match the actual data available.
    #[error("payload length mismatch: header says {declared}, available is {available}")]
    PayloadLengthMismatch { declared: usize, available: usize },

    /// The declared payload exceeds [`MAX_PAYLOAD_SIZE`].
    #[error("payload of {0} bytes exceeds the {MAX_PAYLOAD_SIZE}-byte limit")]
    PayloadTooLarge(usize),

    /// A string field does not fit its 2-byte length prefix.
    #[error("string field of {0} bytes exceeds the {max}-byte limit", max = u16::MAX)]
    StringTooLong(usize),
}

/// One decoded frame: the message plus the header fields callers need.
#[derive(Debug, Clone, PartialEq)]
pub struct Frame {
    /// Correlates a reply with its call.  `0` for notifications.
    pub call_id: u64,
    /// Microseconds since Unix epoch at time of encoding.
    pub timestamp_us: u64,
    pub message: RpcMessage,
}

// ── Public API ────────────────────────────────────────────────────────────────

/// Encodes an [`RpcMessage`] into a byte vector including the 24-byte header.
///
/// # Errors
///
/// Returns [`ProtocolError::PayloadTooLarge`] if the payload would exceed the
/// decoder's limit, or [`ProtocolError::StringTooLong`] if a string field is
/// longer than `u16::MAX` bytes.
///
/// # Examples
///
/// ```rust
/// use outlet_core::protocol::{decode_frame, encode_frame};
/// use outlet_core::protocol::messages::RpcMessage;
///
/// let bytes = encode_frame(&RpcMessage::ApiVersion(4), 7, 0).unwrap();
/// let (frame, consumed) = decode_frame(&bytes).unwrap();
/// assert_eq!(frame.message, RpcMessage::ApiVersion(4));
/// assert_eq!(frame.call_id, 7);
/// assert_eq!(consumed, bytes.len());
/// ```
pub fn encode_frame(
    msg: &RpcMessage,
    call_id: u64,
    timestamp_us: u64,
) -> Result<Vec<u8>, ProtocolError> {
    let payload = encode_payload(msg)?;
    if payload.len() > MAX_PAYLOAD_SIZE {
        return Err(ProtocolError::PayloadTooLarge(payload.len()));
    }
    let payload_len = payload.len() as u32;

    let mut buf = Vec::with_capacity(HEADER_SIZE + payload.len());
    buf.push(PROTOCOL_VERSION);
    buf.push(msg.message_type() as u8);
    buf.push(0x00); // reserved
    buf.push(0x00); // reserved
    buf.extend_from_slice(&payload_len.to_be_bytes());
    buf.extend_from_slice(&call_id.to_be_bytes());
    buf.extend_from_slice(&timestamp_us.to_be_bytes());

    buf.extend_from_slice(&payload);
    Ok(buf)
}

/// Encodes a frame stamped with the current system time.
///
/// # Errors
///
/// See [`encode_frame`].
pub fn encode_frame_now(msg: &RpcMessage, call_id: u64) -> Result<Vec<u8>, ProtocolError> {
    encode_frame(msg, call_id, current_timestamp_us())
}

/// Reads the payload length from a complete 24-byte header.
///
/// Stream readers call this after reading exactly [`HEADER_SIZE`] bytes to
/// learn how many more bytes belong to the frame.
///
/// # Errors
///
/// Returns [`ProtocolError`] for a short header, a version mismatch, or an
/// oversized payload.
pub fn payload_len_from_header(header: &[u8]) -> Result<usize, ProtocolError> {
    if header.len() < HEADER_SIZE {
        return Err(ProtocolError::InsufficientData {
            needed: HEADER_SIZE,
            available: header.len(),
        });
    }
    if header[0] != PROTOCOL_VERSION {
        return Err(ProtocolError::UnsupportedVersion(header[0]));
    }
    let len = u32::from_be_bytes([header[4], header[5], header[6], header[7]]) as usize;
    if len > MAX_PAYLOAD_SIZE {
        return Err(ProtocolError::PayloadTooLarge(len));
    }
    Ok(len)
}

/// Decodes one [`Frame`] from the beginning of `bytes`.
///
/// Returns the frame and the total number of bytes consumed (header +
/// payload), so the caller can advance their read cursor.
///
/// # Errors
///
/// Returns [`ProtocolError`] if the bytes are malformed.
pub fn decode_frame(bytes: &[u8]) -> Result<(Frame, usize), ProtocolError> {
    let payload_len = payload_len_from_header(bytes)?;

    let msg_type_byte = bytes[1];
    let msg_type = MessageType::try_from(msg_type_byte)
        .map_err(|_| ProtocolError::UnknownMessageType(msg_type_byte))?;

    // bytes[2..4] are reserved – ignored on decode

    let call_id = read_u64(bytes, 8)?;
    let timestamp_us = read_u64(bytes, 16)?;

    let total_needed = HEADER_SIZE + payload_len;
    if bytes.len() < total_needed {
        return Err(ProtocolError::PayloadLengthMismatch {
            declared: payload_len,
            available: bytes.len() - HEADER_SIZE,
        });
    }

    let payload = &bytes[HEADER_SIZE..total_needed];
    let message = decode_payload(msg_type, payload)?;
    Ok((
        Frame {
            call_id,
            timestamp_us,
            message,
        },
        total_needed,
    ))
}

/// Microseconds since the Unix epoch, or 0 if the clock is before it.
pub fn current_timestamp_us() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_micros() as u64)
        .unwrap_or(0)
}

// ── Payload encoding ──────────────────────────────────────────────────────────

fn encode_payload(msg: &RpcMessage) -> Result<Vec<u8>, ProtocolError> {
    let mut buf = Vec::new();
    match msg {
        RpcMessage::Hello(m) => encode_hello(&mut buf, m)?,
        RpcMessage::Ping(token) | RpcMessage::Pong(token) => {
            buf.extend_from_slice(&token.to_be_bytes());
        }
        RpcMessage::Disconnect { reason } => buf.push(*reason as u8),
        RpcMessage::Error(m) => {
            buf.push(m.code as u8);
            write_length_prefixed_string(&mut buf, &m.description)?;
        }
        RpcMessage::GetApiVersion => {} // empty payload
        RpcMessage::ApiVersion(v) => buf.extend_from_slice(&v.to_be_bytes()),
        RpcMessage::RegisterPlugin(m) => {
            write_length_prefixed_string(&mut buf, &m.plugin_name)?;
            write_length_prefixed_string(&mut buf, &m.instance_name)?;
        }
        RpcMessage::RegisterAck(m) => {
            buf.push(if m.accepted { 0x01 } else { 0x00 });
            write_length_prefixed_string(&mut buf, &m.reason)?;
        }
        RpcMessage::WriteLog(m) => encode_write_log(&mut buf, m)?,
        RpcMessage::HostCallback(m) => encode_host_callback(&mut buf, m)?,
    }
    Ok(buf)
}

fn encode_hello(buf: &mut Vec<u8>, m: &HelloMessage) -> Result<(), ProtocolError> {
    buf.push(m.role as u8);
    write_length_prefixed_string(buf, &m.plugin_id)
}

fn encode_write_log(buf: &mut Vec<u8>, m: &WriteLogMessage) -> Result<(), ProtocolError> {
    buf.push(m.level as u8);
    write_length_prefixed_string(buf, &m.source)?;
    write_length_prefixed_string(buf, &m.text)
}

fn encode_host_callback(buf: &mut Vec<u8>, m: &HostCallbackMessage) -> Result<(), ProtocolError> {
    write_length_prefixed_string(buf, &m.method)?;
    buf.extend_from_slice(&(m.payload.len() as u32).to_be_bytes());
    buf.extend_from_slice(&m.payload);
    Ok(())
}

// ── Payload decoding ──────────────────────────────────────────────────────────

fn decode_payload(msg_type: MessageType, p: &[u8]) -> Result<RpcMessage, ProtocolError> {
    match msg_type {
        MessageType::Hello => decode_hello(p).map(RpcMessage::Hello),
        MessageType::Ping => read_u64(p, 0).map(RpcMessage::Ping),
        MessageType::Pong => read_u64(p, 0).map(RpcMessage::Pong),
        MessageType::Disconnect => {
            require_len(p, 1, "Disconnect")?;
            let reason = DisconnectReason::try_from(p[0]).map_err(|_| {
                ProtocolError::MalformedPayload(format!("unknown disconnect reason: {}", p[0]))
            })?;
            Ok(RpcMessage::Disconnect { reason })
        }
        MessageType::Error => decode_error(p).map(RpcMessage::Error),
        MessageType::GetApiVersion => Ok(RpcMessage::GetApiVersion),
        MessageType::ApiVersion => {
            require_len(p, 4, "ApiVersion")?;
            Ok(RpcMessage::ApiVersion(u32::from_be_bytes([p[0], p[1], p[2], p[3]])))
        }
        MessageType::RegisterPlugin => {
            let (plugin_name, end) = read_length_prefixed_string(p, 0)?;
            let (instance_name, _) = read_length_prefixed_string(p, end)?;
            Ok(RpcMessage::RegisterPlugin(RegisterPluginMessage {
                plugin_name,
                instance_name,
            }))
        }
        MessageType::RegisterAck => {
            require_len(p, 3, "RegisterAck")?;
            let accepted = p[0] != 0;
            let (reason, _) = read_length_prefixed_string(p, 1)?;
            Ok(RpcMessage::RegisterAck(RegisterAckMessage { accepted, reason }))
        }
        MessageType::WriteLog => decode_write_log(p).map(RpcMessage::WriteLog),
        MessageType::HostCallback => decode_host_callback(p).map(RpcMessage::HostCallback),
    }
}

fn decode_hello(p: &[u8]) -> Result<HelloMessage, ProtocolError> {
    // 1 (role) + 2 (id_len) + id
    require_len(p, 3, "Hello")?;
    let role = ChannelRole::try_from(p[0])
        .map_err(|_| ProtocolError::MalformedPayload(format!("unknown channel role: {}", p[0])))?;
    let (plugin_id, _) = read_length_prefixed_string(p, 1)?;
    Ok(HelloMessage { role, plugin_id })
}

fn decode_error(p: &[u8]) -> Result<ErrorMessage, ProtocolError> {
    require_len(p, 3, "Error")?;
    let code = match p[0] {
        0x01 => RemoteErrorCode::UnknownMethod,
        0x02 => RemoteErrorCode::InvalidArguments,
        0x03 => RemoteErrorCode::NotRegistered,
        _ => RemoteErrorCode::InternalError,
    };
    let (description, _) = read_length_prefixed_string(p, 1)?;
    Ok(ErrorMessage { code, description })
}

fn decode_write_log(p: &[u8]) -> Result<WriteLogMessage, ProtocolError> {
    // 1 (level) + 2 (source_len) + source + 2 (text_len) + text
    require_len(p, 5, "WriteLog")?;
    let level = LogLevel::try_from(p[0])
        .map_err(|_| ProtocolError::MalformedPayload(format!("unknown log level: {}", p[0])))?;
    let (source, end) = read_length_prefixed_string(p, 1)?;
    let (text, _) = read_length_prefixed_string(p, end)?;
    Ok(WriteLogMessage { level, source, text })
}

fn decode_host_callback(p: &[u8]) -> Result<HostCallbackMessage, ProtocolError> {
    let (method, end) = read_length_prefixed_string(p, 0)?;
    require_len(p, end + 4, "HostCallback.payload_len")?;
    let payload_len = u32::from_be_bytes([p[end], p[end + 1], p[end + 2], p[end + 3]]) as usize;
    let start = end + 4;
    require_len(p, start + payload_len, "HostCallback.payload")?;
    Ok(HostCallbackMessage {
        method,
        payload: p[start..start + payload_len].to_vec(),
    })
}

// ── Utility helpers ───────────────────────────────────────────────────────────

fn require_len(buf: &[u8], needed: usize, context: &str) -> Result<(), ProtocolError> {
    if buf.len() < needed {
        Err(ProtocolError::MalformedPayload(format!(
            "{context}: need {needed} bytes, got {}",
            buf.len()
        )))
    } else {
        Ok(())
    }
}

fn read_u64(buf: &[u8], offset: usize) -> Result<u64, ProtocolError> {
    if buf.len() < offset + 8 {
        return Err(ProtocolError::InsufficientData {
            needed: offset + 8,
            available: buf.len(),
        });
    }
    let mut raw = [0u8; 8];
    raw.copy_from_slice(&buf[offset..offset + 8]);
    Ok(u64::from_be_bytes(raw))
}

/// Writes a 2-byte length prefix followed by the UTF-8 string bytes.
fn write_length_prefixed_string(buf: &mut Vec<u8>, s: &str) -> Result<(), ProtocolError> {
    let len = u16::try_from(s.len()).map_err(|_| ProtocolError::StringTooLong(s.len()))?;
    buf.extend_from_slice(&len.to_be_bytes());
    buf.extend_from_slice(s.as_bytes());
    Ok(())
}

/// Reads a 2-byte length prefix and then that many UTF-8 bytes.
/// Returns the string and the offset of the byte after the string.
fn read_length_prefixed_string(buf: &[u8], offset: usize) -> Result<(String, usize), ProtocolError> {
    if buf.len() < offset + 2 {
        return Err(ProtocolError::MalformedPayload(format!(
            "need 2 bytes for string length at offset {offset}"
        )));
    }
    let len = u16::from_be_bytes([buf[offset], buf[offset + 1]]) as usize;
    let start = offset + 2;
    if buf.len() < start + len {
        return Err(ProtocolError::MalformedPayload(format!(
            "string of length {len} at offset {start} exceeds buffer"
        )));
    }
    let s = std::str::from_utf8(&buf[start..start + len])
        .map_err(|e| ProtocolError::MalformedPayload(format!("invalid UTF-8: {e}")))?
        .to_string();
    Ok((s, start + len))
}

// ── Tests ─────────────────────────────────────────────────────────────────────
