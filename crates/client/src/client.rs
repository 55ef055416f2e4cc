//! WebSocket client for the backend's realtime endpoint.
//!
//! [`RealtimeClient`] holds the endpoint URL and the session to
//! authenticate with. Call [`RealtimeClient::connect`] to open a socket
//! and complete the Engine.IO/Socket.IO handshake, yielding a live
//! [`RealtimeConnection`].

use std::sync::Arc;
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::header::AUTHORIZATION;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use url::Url;

use crate::messages::{
    parse_engine_packet, parse_socket_packet, EnginePacket, MessageError, OpenData, SocketPacket,
    CONNECT_DEFAULT_NAMESPACE, PONG,
};
use crate::session::SessionStore;

/// Upper bound on the whole handshake after the socket opens.
const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(10);

pub type RealtimeStream = WebSocketStream<MaybeTlsStream<tokio::net::TcpStream>>;

/// Connection handle for the realtime endpoint.
pub struct RealtimeClient {
    url: Url,
    session: Arc<SessionStore>,
}

/// A handshaken Socket.IO connection.
pub struct RealtimeConnection {
    /// Engine.IO session id assigned by the server.
    pub sid: String,
    /// Interval at which the server pings.
    pub ping_interval: Duration,
    /// How long the server waits for our pong.
    pub ping_timeout: Duration,
    /// The raw WebSocket stream for reading/writing frames.
    pub ws_stream: RealtimeStream,
}

impl std::fmt::Debug for RealtimeConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RealtimeConnection")
            .field("sid", &self.sid)
            .field("ping_interval", &self.ping_interval)
            .field("ping_timeout", &self.ping_timeout)
            .finish_non_exhaustive()
    }
}

impl RealtimeConnection {
    /// Silence longer than this means the connection is gone.
    pub fn liveness_window(&self) -> Duration {
        self.ping_interval + self.ping_timeout
    }
}

impl RealtimeClient {
    /// * `url`     - Socket.IO WebSocket URL, e.g.
    ///   `ws://host:5000/socket.io/?EIO=4&transport=websocket`.
    /// * `session` - source of the bearer token sent on the upgrade.
    pub fn new(url: Url, session: Arc<SessionStore>) -> Self {
        Self { url, session }
    }

    pub fn url(&self) -> &Url {
        &self.url
    }

    /// Open the WebSocket and complete the handshake: wait for the
    /// Engine.IO `open` packet, join the default namespace and wait for
    /// the server's acknowledgement.
    pub async fn connect(&self) -> Result<RealtimeConnection, RealtimeClientError> {
        let mut request = self
            .url
            .as_str()
            .into_client_request()
            .map_err(|e| RealtimeClientError::Connection(format!("Invalid URL {}: {e}", self.url)))?;

        if let Some(token) = self.session.token() {
            let value = HeaderValue::from_str(&format!("Bearer {token}")).map_err(|_| {
                RealtimeClientError::Connection("Session token is not a valid header value".into())
            })?;
            request.headers_mut().insert(AUTHORIZATION, value);
        }

        let (mut ws_stream, _response) = connect_async(request).await.map_err(|e| {
            match &e {
                tokio_tungstenite::tungstenite::Error::Http(response)
                    if matches!(response.status().as_u16(), 401 | 403) =>
                {
                    RealtimeClientError::Rejected(format!(
                        "Upgrade refused with HTTP {}",
                        response.status()
                    ))
                }
                _ => RealtimeClientError::Connection(format!(
                    "Failed to connect to {}: {e}",
                    self.url
                )),
            }
        })?;

        let open = tokio::time::timeout(HANDSHAKE_TIMEOUT, handshake(&mut ws_stream))
            .await
            .map_err(|_| RealtimeClientError::Protocol("Handshake timed out".into()))??;

        tracing::info!(sid = %open.sid, url = %self.url, "Realtime channel connected");

        Ok(RealtimeConnection {
            sid: open.sid,
            ping_interval: Duration::from_millis(open.ping_interval),
            ping_timeout: Duration::from_millis(open.ping_timeout),
            ws_stream,
        })
    }
}

async fn handshake(ws: &mut RealtimeStream) -> Result<OpenData, RealtimeClientError> {
    let open = loop {
        let text = next_text(ws).await?;
        match parse_engine_packet(&text)? {
            EnginePacket::Open(data) => break data,
            other => tracing::debug!(?other, "Ignoring packet before open"),
        }
    };

    ws.send(Message::Text(CONNECT_DEFAULT_NAMESPACE.to_string()))
        .await
        .map_err(|e| RealtimeClientError::Protocol(e.to_string()))?;

    loop {
        let text = next_text(ws).await?;
        match parse_engine_packet(&text)? {
            EnginePacket::Ping(data) => {
                ws.send(Message::Text(format!("{PONG}{data}")))
                    .await
                    .map_err(|e| RealtimeClientError::Protocol(e.to_string()))?;
            }
            EnginePacket::Message(payload) => match parse_socket_packet(&payload)? {
                SocketPacket::Connect(_) => return Ok(open),
                SocketPacket::ConnectError(detail) => {
                    let reason = detail
                        .as_ref()
                        .and_then(|v| v.get("message"))
                        .and_then(|v| v.as_str())
                        .unwrap_or("connection refused")
                        .to_string();
                    return Err(RealtimeClientError::Rejected(reason));
                }
                other => tracing::debug!(?other, "Ignoring packet before namespace ack"),
            },
            EnginePacket::Close => {
                return Err(RealtimeClientError::Protocol(
                    "Server closed during handshake".into(),
                ))
            }
            _ => {}
        }
    }
}

/// Next text frame, skipping control and binary frames.
async fn next_text(ws: &mut RealtimeStream) -> Result<String, RealtimeClientError> {
    loop {
        match ws.next().await {
            Some(Ok(Message::Text(text))) => return Ok(text),
            Some(Ok(Message::Close(_))) | None => {
                return Err(RealtimeClientError::Protocol(
                    "Socket closed during handshake".into(),
                ))
            }
            Some(Ok(_)) => continue,
            Some(Err(e)) => return Err(RealtimeClientError::Protocol(e.to_string())),
        }
    }
}

/// Errors that can occur when working with the realtime client.
#[derive(Debug, thiserror::Error)]
pub enum RealtimeClientError {
    /// Failed to establish the WebSocket connection.
    #[error("Connection error: {0}")]
    Connection(String),

    /// The server refused the credentials. Retrying will not help.
    #[error("Connection rejected: {0}")]
    Rejected(String),

    /// A protocol-level error on an established connection.
    #[error("Protocol error: {0}")]
    Protocol(String),

    #[error(transparent)]
    Message(#[from] MessageError),
}

impl RealtimeClientError {
    pub fn is_rejected(&self) -> bool {
        matches!(self, RealtimeClientError::Rejected(_))
    }
}
