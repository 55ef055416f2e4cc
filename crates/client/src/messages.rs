//! Socket.IO wire format and event decoding.
//!
//! The backend pushes notifications with Socket.IO v4, which rides on
//! Engine.IO v4 text frames. Each WebSocket text frame is one Engine.IO
//! packet (`<type digit><payload>`); Engine.IO `message` packets carry a
//! Socket.IO packet (`<type digit>[/namespace,][ack id][json]`). Events
//! arrive as `42["event_name", {...}]`.

use comfyqueue_core::models::job::{Job, JobStatus};
use serde::Deserialize;

use crate::events::{ChannelEvent, JobNotice};

/// Socket.IO event announcing a newly uploaded job.
pub const EVENT_NEW_JOB: &str = "new_job";
/// Socket.IO event announcing a job status change.
pub const EVENT_JOB_UPDATE: &str = "job_update";

/// Engine.IO pong, sent in reply to every server ping.
pub const PONG: &str = "3";
/// Socket.IO CONNECT to the default namespace.
pub const CONNECT_DEFAULT_NAMESPACE: &str = "40";
/// Socket.IO DISCONNECT from the default namespace.
pub const DISCONNECT_DEFAULT_NAMESPACE: &str = "41";
/// Engine.IO close.
pub const CLOSE: &str = "1";

/// Engine.IO transport-level packet.
#[derive(Debug, Clone, PartialEq)]
pub enum EnginePacket {
    Open(OpenData),
    Close,
    Ping(String),
    Pong(String),
    /// Payload is a Socket.IO packet.
    Message(String),
    Upgrade,
    Noop,
}

/// Handshake data sent by the server in the Engine.IO `open` packet.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OpenData {
    pub sid: String,
    /// Milliseconds between server pings.
    pub ping_interval: u64,
    /// Milliseconds the server waits for a pong.
    pub ping_timeout: u64,
}

/// Socket.IO packet carried inside an Engine.IO message.
#[derive(Debug, Clone, PartialEq)]
pub enum SocketPacket {
    /// Namespace connect (client request or server acknowledgement).
    Connect(Option<serde_json::Value>),
    Disconnect,
    Event {
        name: String,
        args: Vec<serde_json::Value>,
    },
    Ack,
    ConnectError(Option<serde_json::Value>),
    /// Binary events and acks are not used by this backend.
    Binary,
}

/// Errors raised while parsing frames.
#[derive(Debug, thiserror::Error)]
pub enum MessageError {
    #[error("Empty packet")]
    Empty,

    #[error("Unknown packet type '{0}'")]
    UnknownType(char),

    #[error("Invalid packet payload: {0}")]
    Payload(#[from] serde_json::Error),

    #[error("Event packet without a name")]
    MissingEventName,
}

/// Parse one WebSocket text frame as an Engine.IO packet.
pub fn parse_engine_packet(text: &str) -> Result<EnginePacket, MessageError> {
    let mut chars = text.chars();
    let kind = chars.next().ok_or(MessageError::Empty)?;
    let rest = chars.as_str();
    match kind {
        '0' => Ok(EnginePacket::Open(serde_json::from_str(rest)?)),
        '1' => Ok(EnginePacket::Close),
        '2' => Ok(EnginePacket::Ping(rest.to_string())),
        '3' => Ok(EnginePacket::Pong(rest.to_string())),
        '4' => Ok(EnginePacket::Message(rest.to_string())),
        '5' => Ok(EnginePacket::Upgrade),
        '6' => Ok(EnginePacket::Noop),
        other => Err(MessageError::UnknownType(other)),
    }
}

/// Parse the payload of an Engine.IO message as a Socket.IO packet.
///
/// Only the default namespace is used, so any namespace prefix is
/// skipped rather than checked.
pub fn parse_socket_packet(payload: &str) -> Result<SocketPacket, MessageError> {
    let mut chars = payload.chars();
    let kind = chars.next().ok_or(MessageError::Empty)?;
    let mut rest = chars.as_str();

    if rest.starts_with('/') {
        rest = match rest.find(',') {
            Some(idx) => &rest[idx + 1..],
            None => "",
        };
    }
    // Ack id, if any, precedes the JSON body.
    rest = rest.trim_start_matches(|c: char| c.is_ascii_digit());

    let body = || -> Result<Option<serde_json::Value>, MessageError> {
        if rest.is_empty() {
            Ok(None)
        } else {
            Ok(Some(serde_json::from_str(rest)?))
        }
    };

    match kind {
        '0' => Ok(SocketPacket::Connect(body()?)),
        '1' => Ok(SocketPacket::Disconnect),
        '2' => {
            let mut args: Vec<serde_json::Value> = serde_json::from_str(rest)?;
            if args.is_empty() {
                return Err(MessageError::MissingEventName);
            }
            let name = match args.remove(0) {
                serde_json::Value::String(name) => name,
                _ => return Err(MessageError::MissingEventName),
            };
            Ok(SocketPacket::Event { name, args })
        }
        '3' => Ok(SocketPacket::Ack),
        '4' => Ok(SocketPacket::ConnectError(body()?)),
        '5' | '6' => Ok(SocketPacket::Binary),
        other => Err(MessageError::UnknownType(other)),
    }
}

/// Map a Socket.IO event onto a [`ChannelEvent`].
///
/// Returns `None` for events this client does not subscribe to.
pub fn decode_event(name: &str, args: &[serde_json::Value]) -> Option<ChannelEvent> {
    let payload = args.first().cloned().unwrap_or(serde_json::Value::Null);
    match name {
        EVENT_NEW_JOB => Some(ChannelEvent::JobCreated(job_notice(&payload))),
        EVENT_JOB_UPDATE => Some(ChannelEvent::JobStatusChanged(job_notice(&payload))),
        _ => None,
    }
}

/// Pull whatever the payload offers. Every field is optional: the
/// event is primarily a trigger. Only an explicit `job` object counts as
/// a full entity; top-level fields may be a partial update.
fn job_notice(payload: &serde_json::Value) -> JobNotice {
    let job = payload
        .get("job")
        .cloned()
        .and_then(|value| serde_json::from_value::<Job>(value).ok());

    let job_id = ["id", "job_id"]
        .iter()
        .find_map(|key| payload.get(*key).and_then(|v| v.as_i64()))
        .or_else(|| job.as_ref().map(|j| j.id));

    let filename = ["file", "filename"]
        .iter()
        .find_map(|key| payload.get(*key).and_then(|v| v.as_str()))
        .map(str::to_string)
        .or_else(|| job.as_ref().map(|j| j.filename.clone()));

    let status = payload
        .get("status")
        .cloned()
        .and_then(|value| serde_json::from_value::<JobStatus>(value).ok())
        .or_else(|| job.as_ref().map(|j| j.status));

    JobNotice {
        job_id,
        filename,
        status,
        job,
    }
}
