// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Socket.IO v2 transport over WebSocket.
//!
//! Speaks Engine.IO v3 directly over a WebSocket (no polling upgrade):
//!
//! 1. Open `ws(s)://host/socket.io/?EIO=3&transport=websocket&token=..&dev_id=..`
//! 2. Read the engine `open` packet for the heartbeat interval
//! 3. Send a namespace connect carrying the same query
//! 4. Wait for the namespace acknowledgement; a rejection or close fails
//!    `connect`, an accept is reported as [`TransportEvent::Connected`]
//!
//! Engine heartbeats (`2`/`3`) are handled internally while waiting for
//! events and never surface to the session.

use std::collections::VecDeque;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use serde_json::Value;
use tokio::net::TcpStream;
use tokio::time::Instant;
use tokio_tungstenite::tungstenite::{self, Message};
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};

use super::packet::{EnginePacket, Handshake, SocketPacket, SocketPacketKind};
use super::{Endpoint, KEEP_ALIVE_MESSAGE, Transport, TransportEvent};
use crate::error::ProtocolError;

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Namespace the service publishes device updates on.
pub const DEVICE_NAMESPACE: &str = "/api/v2/socket_io";

/// Event name used for keep-alive messages.
const KEEP_ALIVE_EVENT: &str = "message";

/// Default time allowed for the WebSocket and engine handshake.
const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Clone, Copy)]
struct Heartbeat {
    interval: Duration,
    next: Instant,
}

impl Heartbeat {
    fn new(interval_ms: u64) -> Option<Self> {
        if interval_ms == 0 {
            return None;
        }
        let interval = Duration::from_millis(interval_ms);
        Some(Self {
            interval,
            next: Instant::now() + interval,
        })
    }

    fn schedule_next(&mut self) {
        self.next = Instant::now() + self.interval;
    }
}

/// Socket.IO transport for one device namespace.
///
/// # Examples
///
/// ```no_run
/// use smartbox::protocol::SocketIoTransport;
/// use std::time::Duration;
///
/// let transport = SocketIoTransport::new().with_connect_timeout(Duration::from_secs(10));
/// ```
pub struct SocketIoTransport {
    namespace: String,
    connect_timeout: Duration,
    stream: Option<WsStream>,
    heartbeat: Option<Heartbeat>,
    pending: VecDeque<TransportEvent>,
}

impl SocketIoTransport {
    /// Creates a transport for the default device namespace.
    #[must_use]
    pub fn new() -> Self {
        Self::with_namespace(DEVICE_NAMESPACE)
    }

    /// Creates a transport for a custom namespace.
    #[must_use]
    pub fn with_namespace(namespace: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            stream: None,
            heartbeat: None,
            pending: VecDeque::new(),
        }
    }

    /// Sets the time allowed for opening the connection.
    #[must_use]
    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Returns the namespace this transport joins.
    #[must_use]
    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    /// Returns `true` while a WebSocket is open.
    #[must_use]
    pub fn is_open(&self) -> bool {
        self.stream.is_some()
    }

    async fn close(&mut self) {
        self.heartbeat = None;
        self.pending.clear();
        if let Some(mut stream) = self.stream.take() {
            // Peer may already be gone
            let _ = stream.close(None).await;
        }
    }

    /// Reads frames until the server accepts or rejects the namespace.
    ///
    /// Returns the event to report first: the acknowledgement, or an event
    /// that arrived in its place.
    async fn await_namespace_ack(&mut self) -> Result<TransportEvent, ProtocolError> {
        loop {
            let stream = self.stream.as_mut().ok_or(ProtocolError::NotConnected)?;
            let text = match stream.next().await {
                Some(Ok(Message::Text(text))) => text,
                Some(Ok(Message::Close(_))) | None => {
                    return Err(ProtocolError::ConnectionFailed(
                        "connection closed before namespace was accepted".to_string(),
                    ));
                }
                Some(Ok(_)) => continue,
                Some(Err(e)) => return Err(e.into()),
            };
            match decode_frame(&self.namespace, text.as_str()) {
                Frame::Event(TransportEvent::Disconnected { reason }) => {
                    return Err(ProtocolError::ConnectionFailed(format!(
                        "namespace rejected: {reason}"
                    )));
                }
                Frame::Event(event) => return Ok(event),
                Frame::Reply(reply) => self.send_frame(reply).await?,
                Frame::Ignore => {}
            }
        }
    }

    async fn send_frame(&mut self, frame: String) -> Result<(), ProtocolError> {
        let stream = self.stream.as_mut().ok_or(ProtocolError::NotConnected)?;
        tracing::trace!(%frame, "Sending frame");
        stream.send(Message::text(frame)).await?;
        Ok(())
    }
}

impl Default for SocketIoTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for SocketIoTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SocketIoTransport")
            .field("namespace", &self.namespace)
            .field("connect_timeout", &self.connect_timeout)
            .field("open", &self.stream.is_some())
            .finish_non_exhaustive()
    }
}

enum Wake {
    Frame(Option<Result<Message, tungstenite::Error>>),
    Heartbeat,
}

impl Transport for SocketIoTransport {
    async fn connect(&mut self, endpoint: &Endpoint) -> Result<(), ProtocolError> {
        self.close().await;

        let url = socket_io_url(endpoint.url())?;
        tracing::debug!(namespace = %self.namespace, "Opening Socket.IO connection");

        let timeout_ms = u64::try_from(self.connect_timeout.as_millis()).unwrap_or(u64::MAX);
        let deadline = Instant::now() + self.connect_timeout;
        let (stream, handshake) = tokio::time::timeout_at(deadline, open(&url))
            .await
            .map_err(|_| ProtocolError::Timeout(timeout_ms))??;
        tracing::debug!(
            sid = %handshake.sid,
            ping_interval_ms = handshake.ping_interval,
            "Engine session opened"
        );

        self.stream = Some(stream);
        self.heartbeat = Heartbeat::new(handshake.ping_interval);

        let connect = SocketPacket::connect(format!("{}?{}", self.namespace, endpoint.query()));
        if let Err(e) = self.send_frame(connect.to_frame()).await {
            self.close().await;
            return Err(e);
        }

        let acknowledged = match tokio::time::timeout_at(deadline, self.await_namespace_ack()).await {
            Ok(result) => result,
            Err(_) => Err(ProtocolError::Timeout(timeout_ms)),
        };
        match acknowledged {
            Ok(first) => {
                tracing::debug!(namespace = %self.namespace, "Namespace accepted");
                self.pending.push_back(first);
                Ok(())
            }
            Err(e) => {
                self.close().await;
                Err(e)
            }
        }
    }

    async fn next_event(&mut self) -> TransportEvent {
        if let Some(event) = self.pending.pop_front() {
            return event;
        }
        loop {
            let Some(stream) = self.stream.as_mut() else {
                return TransportEvent::disconnected("not connected");
            };

            let wake = match self.heartbeat {
                Some(heartbeat) => {
                    match tokio::time::timeout_at(heartbeat.next, stream.next()).await {
                        Ok(frame) => Wake::Frame(frame),
                        Err(_) => Wake::Heartbeat,
                    }
                }
                None => Wake::Frame(stream.next().await),
            };

            let frame = match wake {
                Wake::Heartbeat => {
                    if let Some(heartbeat) = self.heartbeat.as_mut() {
                        heartbeat.schedule_next();
                    }
                    let ping = EnginePacket::Ping(String::new()).encode();
                    if let Err(e) = self.send_frame(ping).await {
                        self.close().await;
                        return TransportEvent::disconnected(format!("heartbeat failed: {e}"));
                    }
                    continue;
                }
                Wake::Frame(frame) => frame,
            };

            match frame {
                None => {
                    self.stream = None;
                    return TransportEvent::disconnected("connection closed");
                }
                Some(Err(e)) => {
                    self.stream = None;
                    return TransportEvent::disconnected(e.to_string());
                }
                Some(Ok(Message::Close(_))) => {
                    self.stream = None;
                    return TransportEvent::disconnected("closed by server");
                }
                Some(Ok(Message::Text(text))) => {
                    tracing::trace!(frame = %text.as_str(), "Received frame");
                    match decode_frame(&self.namespace, text.as_str()) {
                        Frame::Event(event) => {
                            if matches!(event, TransportEvent::Disconnected { .. }) {
                                self.close().await;
                            }
                            return event;
                        }
                        Frame::Reply(reply) => {
                            if let Err(e) = self.send_frame(reply).await {
                                tracing::debug!(error = %e, "Failed to answer engine ping");
                            }
                        }
                        Frame::Ignore => {}
                    }
                }
                Some(Ok(_)) => {}
            }
        }
    }

    async fn emit(&mut self, event: &str, payload: Option<&Value>) -> Result<(), ProtocolError> {
        let frame = SocketPacket::event(self.namespace.as_str(), event, payload).to_frame();
        self.send_frame(frame).await
    }

    async fn send_keep_alive(&mut self) -> Result<(), ProtocolError> {
        self.emit(KEEP_ALIVE_EVENT, Some(&Value::from(KEEP_ALIVE_MESSAGE)))
            .await
    }

    async fn disconnect(&mut self) {
        if self.stream.is_some() {
            let frame = SocketPacket::disconnect(self.namespace.as_str()).to_frame();
            if let Err(e) = self.send_frame(frame).await {
                tracing::debug!(error = %e, "Failed to send namespace disconnect");
            }
            tracing::debug!(namespace = %self.namespace, "Closing Socket.IO connection");
        }
        self.close().await;
    }
}

async fn open(url: &str) -> Result<(WsStream, Handshake), ProtocolError> {
    let (mut stream, _) = connect_async(url).await?;
    while let Some(frame) = stream.next().await {
        if let Message::Text(text) = frame? {
            match EnginePacket::decode(text.as_str()) {
                Ok(EnginePacket::Open(handshake)) => return Ok((stream, handshake)),
                Ok(other) => tracing::debug!(?other, "Ignoring packet before handshake"),
                Err(e) => {
                    return Err(ProtocolError::ConnectionFailed(format!(
                        "invalid handshake: {e}"
                    )));
                }
            }
        }
    }
    Err(ProtocolError::ConnectionFailed(
        "connection closed before handshake".to_string(),
    ))
}

/// Builds the WebSocket URL for an endpoint URL of the form
/// `http(s)://host/?query`.
fn socket_io_url(endpoint_url: &str) -> Result<String, ProtocolError> {
    let (base, query) = endpoint_url.split_once('?').unwrap_or((endpoint_url, ""));
    let base = base.trim_end_matches('/');

    let ws_base = if let Some(host) = base.strip_prefix("https://") {
        format!("wss://{host}")
    } else if let Some(host) = base.strip_prefix("http://") {
        format!("ws://{host}")
    } else if base.starts_with("wss://") || base.starts_with("ws://") {
        base.to_string()
    } else {
        return Err(ProtocolError::InvalidAddress(endpoint_url.to_string()));
    };

    let mut url = format!("{ws_base}/socket.io/?EIO=3&transport=websocket");
    if !query.is_empty() {
        url.push('&');
        url.push_str(query);
    }
    Ok(url)
}

#[derive(Debug, PartialEq)]
enum Frame {
    Event(TransportEvent),
    Reply(String),
    Ignore,
}

fn decode_frame(namespace: &str, text: &str) -> Frame {
    let packet = match EnginePacket::decode(text) {
        Ok(packet) => packet,
        Err(e) => {
            tracing::warn!(error = %e, "Discarding undecodable frame");
            return Frame::Ignore;
        }
    };

    let message = match packet {
        EnginePacket::Message(message) => message,
        EnginePacket::Ping(data) => return Frame::Reply(EnginePacket::Pong(data).encode()),
        EnginePacket::Close => return Frame::Event(TransportEvent::disconnected("engine closed")),
        EnginePacket::Open(_) | EnginePacket::Pong(_) | EnginePacket::Upgrade | EnginePacket::Noop => {
            return Frame::Ignore;
        }
    };

    let packet = match SocketPacket::decode(&message) {
        Ok(packet) => packet,
        Err(e) => {
            tracing::warn!(error = %e, "Discarding undecodable socket packet");
            return Frame::Ignore;
        }
    };
    if packet.namespace_path() != namespace {
        return Frame::Ignore;
    }

    match packet.kind {
        SocketPacketKind::Connect => Frame::Event(TransportEvent::Connected),
        SocketPacketKind::Disconnect => Frame::Event(TransportEvent::disconnected(
            "namespace disconnected by server",
        )),
        SocketPacketKind::Error => {
            let detail = packet.data.map(|d| d.to_string()).unwrap_or_default();
            Frame::Event(TransportEvent::disconnected(format!(
                "namespace error: {detail}"
            )))
        }
        SocketPacketKind::Event => match packet.event_parts() {
            Some((name, payload)) => Frame::Event(TransportEvent::Event {
                name: name.to_string(),
                payload: payload.cloned(),
            }),
            None => Frame::Ignore,
        },
        SocketPacketKind::Ack | SocketPacketKind::BinaryEvent | SocketPacketKind::BinaryAck => {
            Frame::Ignore
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn url_from_https_endpoint() {
        let endpoint = Endpoint::new("https://api-foo.example.com", "dev1", "tok");
        assert_eq!(
            socket_io_url(endpoint.url()).unwrap(),
            "wss://api-foo.example.com/socket.io/?EIO=3&transport=websocket&token=tok&dev_id=dev1"
        );
    }

    #[test]
    fn url_from_http_endpoint() {
        let endpoint = Endpoint::new("http://127.0.0.1:9000", "dev1", "tok");
        assert_eq!(
            socket_io_url(endpoint.url()).unwrap(),
            "ws://127.0.0.1:9000/socket.io/?EIO=3&transport=websocket&token=tok&dev_id=dev1"
        );
    }

    #[test]
    fn url_rejects_unknown_scheme() {
        assert!(matches!(
            socket_io_url("ftp://host/?token=x"),
            Err(ProtocolError::InvalidAddress(_))
        ));
    }

    #[test]
    fn namespace_ack_is_connected() {
        assert_eq!(
            decode_frame(DEVICE_NAMESPACE, "40/api/v2/socket_io"),
            Frame::Event(TransportEvent::Connected)
        );
    }

    #[test]
    fn root_namespace_ack_is_ignored() {
        assert_eq!(decode_frame(DEVICE_NAMESPACE, "40"), Frame::Ignore);
    }

    #[test]
    fn event_frames_become_events() {
        let frame = decode_frame(
            DEVICE_NAMESPACE,
            r#"42/api/v2/socket_io,["dev_data",{"nodes":[]}]"#,
        );
        assert_eq!(
            frame,
            Frame::Event(TransportEvent::Event {
                name: "dev_data".to_string(),
                payload: Some(json!({"nodes": []})),
            })
        );
    }

    #[test]
    fn other_namespace_events_are_ignored() {
        assert_eq!(
            decode_frame(DEVICE_NAMESPACE, r#"42/other,["update",{}]"#),
            Frame::Ignore
        );
    }

    #[test]
    fn engine_ping_gets_pong() {
        assert_eq!(
            decode_frame(DEVICE_NAMESPACE, "2probe"),
            Frame::Reply("3probe".to_string())
        );
        assert_eq!(decode_frame(DEVICE_NAMESPACE, "3"), Frame::Ignore);
    }

    #[test]
    fn disconnects_and_errors_end_connection() {
        assert!(matches!(
            decode_frame(DEVICE_NAMESPACE, "41/api/v2/socket_io"),
            Frame::Event(TransportEvent::Disconnected { .. })
        ));
        assert!(matches!(
            decode_frame(DEVICE_NAMESPACE, r#"44/api/v2/socket_io,"Invalid token""#),
            Frame::Event(TransportEvent::Disconnected { .. })
        ));
        assert!(matches!(
            decode_frame(DEVICE_NAMESPACE, "1"),
            Frame::Event(TransportEvent::Disconnected { .. })
        ));
    }

    #[test]
    fn garbage_is_ignored() {
        assert_eq!(decode_frame(DEVICE_NAMESPACE, ""), Frame::Ignore);
        assert_eq!(decode_frame(DEVICE_NAMESPACE, "4{"), Frame::Ignore);
    }

    #[tokio::test]
    async fn emit_without_connection_fails() {
        let mut transport = SocketIoTransport::new();
        assert!(matches!(
            transport.emit("dev_data", None).await,
            Err(ProtocolError::NotConnected)
        ));
        assert!(matches!(
            transport.send_keep_alive().await,
            Err(ProtocolError::NotConnected)
        ));
        assert!(!transport.is_open());
        transport.disconnect().await;
    }

    #[tokio::test]
    async fn next_event_without_connection_reports_disconnect() {
        let mut transport = SocketIoTransport::new();
        assert!(matches!(
            transport.next_event().await,
            TransportEvent::Disconnected { .. }
        ));
    }
}
