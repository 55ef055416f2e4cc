//! Realtime message processing loop.
//!
//! Reads frames from a handshaken connection, answers Engine.IO pings,
//! decodes Socket.IO events and hands each resulting [`ChannelEvent`] to
//! the dispatcher in arrival order.

use std::time::Duration;

use futures::{SinkExt, StreamExt};
use tokio_tungstenite::tungstenite::Message;
use tokio_util::sync::CancellationToken;

use crate::client::RealtimeConnection;
use crate::events::EventDispatcher;
use crate::messages::{
    decode_event, parse_engine_packet, parse_socket_packet, EnginePacket, SocketPacket, CLOSE,
    DISCONNECT_DEFAULT_NAMESPACE, PONG,
};

/// Floor for the liveness window so a server advertising zero intervals
/// does not make every read time out.
const MIN_LIVENESS_WINDOW: Duration = Duration::from_secs(1);

/// Why [`process_messages`] returned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionEnd {
    /// The cancellation token fired; a clean disconnect was sent.
    Cancelled,
    /// The server closed, the socket errored, or pings stopped arriving.
    Dropped,
}

enum Flow {
    Continue,
    Stop,
}

/// Process frames until the connection drops or `cancel` fires.
pub async fn process_messages(
    conn: RealtimeConnection,
    dispatcher: &EventDispatcher,
    cancel: &CancellationToken,
) -> SessionEnd {
    let sid = conn.sid.clone();
    let liveness = conn.liveness_window().max(MIN_LIVENESS_WINDOW);
    let (mut sink, mut stream) = conn.ws_stream.split();

    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                for frame in [DISCONNECT_DEFAULT_NAMESPACE, CLOSE] {
                    let _ = sink.send(Message::Text(frame.to_string())).await;
                }
                let _ = sink.close().await;
                tracing::info!(sid = %sid, "Realtime channel closed by owner");
                return SessionEnd::Cancelled;
            }
            next = tokio::time::timeout(liveness, stream.next()) => {
                let Ok(msg) = next else {
                    tracing::warn!(
                        sid = %sid,
                        window_ms = liveness.as_millis() as u64,
                        "No traffic within ping window",
                    );
                    return SessionEnd::Dropped;
                };
                match msg {
                    Some(Ok(Message::Text(text))) => {
                        if let Flow::Stop = handle_text(&text, &sid, &mut sink, dispatcher).await {
                            return SessionEnd::Dropped;
                        }
                    }
                    Some(Ok(Message::Binary(_))) => {
                        tracing::trace!(sid = %sid, "Ignoring binary frame");
                    }
                    Some(Ok(Message::Ping(_) | Message::Pong(_))) => {
                        // Handled automatically by tungstenite.
                    }
                    Some(Ok(Message::Close(frame))) => {
                        tracing::info!(sid = %sid, ?frame, "Realtime socket closed by server");
                        return SessionEnd::Dropped;
                    }
                    Some(Ok(Message::Frame(_))) => {}
                    Some(Err(e)) => {
                        tracing::error!(sid = %sid, error = %e, "WebSocket receive error");
                        return SessionEnd::Dropped;
                    }
                    None => {
                        tracing::info!(sid = %sid, "WebSocket stream exhausted");
                        return SessionEnd::Dropped;
                    }
                }
            }
        }
    }
}

/// Handle one Engine.IO text frame.
async fn handle_text<S>(text: &str, sid: &str, sink: &mut S, dispatcher: &EventDispatcher) -> Flow
where
    S: SinkExt<Message, Error = tokio_tungstenite::tungstenite::Error> + Unpin,
{
    let packet = match parse_engine_packet(text) {
        Ok(packet) => packet,
        Err(e) => {
            tracing::warn!(sid, error = %e, raw = %text, "Failed to parse engine packet");
            return Flow::Continue;
        }
    };

    match packet {
        EnginePacket::Ping(data) => {
            if let Err(e) = sink.send(Message::Text(format!("{PONG}{data}"))).await {
                tracing::error!(sid, error = %e, "Failed to send pong");
                return Flow::Stop;
            }
            Flow::Continue
        }
        EnginePacket::Close => {
            tracing::info!(sid, "Server closed the engine session");
            Flow::Stop
        }
        EnginePacket::Message(payload) => handle_socket_packet(&payload, sid, dispatcher),
        EnginePacket::Open(_) | EnginePacket::Pong(_) | EnginePacket::Upgrade | EnginePacket::Noop => {
            Flow::Continue
        }
    }
}

fn handle_socket_packet(payload: &str, sid: &str, dispatcher: &EventDispatcher) -> Flow {
    match parse_socket_packet(payload) {
        Ok(SocketPacket::Event { name, args }) => {
            match decode_event(&name, &args) {
                Some(event) => {
                    tracing::debug!(sid, event = %name, "Realtime event received");
                    dispatcher.dispatch(&event);
                }
                None => tracing::debug!(sid, event = %name, "Ignoring unsubscribed event"),
            }
            Flow::Continue
        }
        Ok(SocketPacket::Disconnect) => {
            tracing::info!(sid, "Server disconnected the namespace");
            Flow::Stop
        }
        Ok(other) => {
            tracing::trace!(sid, ?other, "Ignoring socket packet");
            Flow::Continue
        }
        Err(e) => {
            tracing::warn!(sid, error = %e, raw = %payload, "Failed to parse socket packet");
            Flow::Continue
        }
    }
}
