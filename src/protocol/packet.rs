// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Engine.IO v3 and Socket.IO v2 text packet codec.
//!
//! Each WebSocket text frame carries one Engine.IO packet: a type digit
//! followed by data. Engine `message` packets in turn carry one Socket.IO
//! packet:
//!
//! ```text
//! 42/api/v2/socket_io,["update",{"path":"/htr/1/status","body":{}}]
//! ││└──── namespace ──┘ └─────────── [event name, payload] ───────┘
//! │└ socket packet type (2 = event)
//! └ engine packet type (4 = message)
//! ```
//!
//! Binary attachments are not supported.

use serde::Deserialize;
use serde_json::Value;

use crate::error::ParseError;

/// Namespace used when a packet names none.
pub const DEFAULT_NAMESPACE: &str = "/";

/// Handshake carried by the engine `open` packet.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Handshake {
    /// Engine session id.
    pub sid: String,
    /// Transports the server offers to upgrade to.
    #[serde(default)]
    pub upgrades: Vec<String>,
    /// Interval in milliseconds at which the client should ping.
    pub ping_interval: u64,
    /// Milliseconds after a ping before the server gives up on the client.
    pub ping_timeout: u64,
}

/// An Engine.IO packet.
#[derive(Debug, Clone, PartialEq)]
pub enum EnginePacket {
    /// Session opened (`0`).
    Open(Handshake),
    /// Session closed (`1`).
    Close,
    /// Heartbeat probe (`2`).
    Ping(String),
    /// Heartbeat reply (`3`).
    Pong(String),
    /// Application payload (`4`).
    Message(String),
    /// Transport upgrade (`5`).
    Upgrade,
    /// No-op (`6`).
    Noop,
}

impl EnginePacket {
    /// Decodes one text frame.
    ///
    /// # Errors
    ///
    /// Returns `ParseError::InvalidPacket` for an empty frame or unknown
    /// type, or `ParseError::Json` for a malformed handshake.
    pub fn decode(frame: &str) -> Result<Self, ParseError> {
        let mut chars = frame.chars();
        let kind = chars
            .next()
            .ok_or_else(|| ParseError::InvalidPacket("empty frame".to_string()))?;
        let data = chars.as_str();

        match kind {
            '0' => Ok(Self::Open(serde_json::from_str(data)?)),
            '1' => Ok(Self::Close),
            '2' => Ok(Self::Ping(data.to_string())),
            '3' => Ok(Self::Pong(data.to_string())),
            '4' => Ok(Self::Message(data.to_string())),
            '5' => Ok(Self::Upgrade),
            '6' => Ok(Self::Noop),
            other => Err(ParseError::InvalidPacket(format!(
                "unknown engine packet type '{other}'"
            ))),
        }
    }

    /// Encodes the packet as a text frame.
    ///
    /// `Open` is server-only; it encodes as a bare `0`.
    #[must_use]
    pub fn encode(&self) -> String {
        match self {
            Self::Open(_) => "0".to_string(),
            Self::Close => "1".to_string(),
            Self::Ping(data) => format!("2{data}"),
            Self::Pong(data) => format!("3{data}"),
            Self::Message(data) => format!("4{data}"),
            Self::Upgrade => "5".to_string(),
            Self::Noop => "6".to_string(),
        }
    }
}

/// Socket.IO packet type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SocketPacketKind {
    /// Namespace connect (`0`).
    Connect,
    /// Namespace disconnect (`1`).
    Disconnect,
    /// Named event (`2`).
    Event,
    /// Event acknowledgement (`3`).
    Ack,
    /// Namespace error (`4`).
    Error,
    /// Event with binary attachments (`5`).
    BinaryEvent,
    /// Acknowledgement with binary attachments (`6`).
    BinaryAck,
}

impl SocketPacketKind {
    fn from_digit(digit: char) -> Option<Self> {
        match digit {
            '0' => Some(Self::Connect),
            '1' => Some(Self::Disconnect),
            '2' => Some(Self::Event),
            '3' => Some(Self::Ack),
            '4' => Some(Self::Error),
            '5' => Some(Self::BinaryEvent),
            '6' => Some(Self::BinaryAck),
            _ => None,
        }
    }

    fn digit(self) -> char {
        match self {
            Self::Connect => '0',
            Self::Disconnect => '1',
            Self::Event => '2',
            Self::Ack => '3',
            Self::Error => '4',
            Self::BinaryEvent => '5',
            Self::BinaryAck => '6',
        }
    }
}

/// A Socket.IO packet.
#[derive(Debug, Clone, PartialEq)]
pub struct SocketPacket {
    /// Packet type.
    pub kind: SocketPacketKind,
    /// Namespace, possibly with a `?query` suffix on connect packets.
    pub namespace: String,
    /// Acknowledgement id.
    pub id: Option<u64>,
    /// JSON data.
    pub data: Option<Value>,
}

impl SocketPacket {
    /// Creates a namespace connect packet. `namespace` may carry a query.
    #[must_use]
    pub fn connect(namespace: impl Into<String>) -> Self {
        Self {
            kind: SocketPacketKind::Connect,
            namespace: namespace.into(),
            id: None,
            data: None,
        }
    }

    /// Creates a namespace disconnect packet.
    #[must_use]
    pub fn disconnect(namespace: impl Into<String>) -> Self {
        Self {
            kind: SocketPacketKind::Disconnect,
            namespace: namespace.into(),
            id: None,
            data: None,
        }
    }

    /// Creates an event packet carrying `[name]` or `[name, payload]`.
    #[must_use]
    pub fn event(namespace: impl Into<String>, name: &str, payload: Option<&Value>) -> Self {
        let mut data = vec![Value::from(name)];
        if let Some(payload) = payload {
            data.push(payload.clone());
        }
        Self {
            kind: SocketPacketKind::Event,
            namespace: namespace.into(),
            id: None,
            data: Some(Value::Array(data)),
        }
    }

    /// Returns the namespace without any query suffix.
    #[must_use]
    pub fn namespace_path(&self) -> &str {
        self.namespace
            .split_once('?')
            .map_or(self.namespace.as_str(), |(path, _)| path)
    }

    /// Returns the event name and payload of an event packet.
    #[must_use]
    pub fn event_parts(&self) -> Option<(&str, Option<&Value>)> {
        if self.kind != SocketPacketKind::Event {
            return None;
        }
        let items = self.data.as_ref()?.as_array()?;
        let name = items.first()?.as_str()?;
        Some((name, items.get(1)))
    }

    /// Decodes the payload of an engine `message` packet.
    ///
    /// # Errors
    ///
    /// Returns `ParseError::InvalidPacket` for an unknown type or binary
    /// packet, or `ParseError::Json` for malformed data.
    pub fn decode(text: &str) -> Result<Self, ParseError> {
        let mut chars = text.chars();
        let digit = chars
            .next()
            .ok_or_else(|| ParseError::InvalidPacket("empty socket packet".to_string()))?;
        let kind = SocketPacketKind::from_digit(digit).ok_or_else(|| {
            ParseError::InvalidPacket(format!("unknown socket packet type '{digit}'"))
        })?;
        if matches!(kind, SocketPacketKind::BinaryEvent | SocketPacketKind::BinaryAck) {
            return Err(ParseError::InvalidPacket(
                "binary packets are not supported".to_string(),
            ));
        }

        let mut rest = chars.as_str();
        let namespace = if rest.starts_with('/') {
            let (namespace, tail) = rest.split_once(',').unwrap_or((rest, ""));
            rest = tail;
            namespace.to_string()
        } else {
            DEFAULT_NAMESPACE.to_string()
        };

        let digits = rest.bytes().take_while(u8::is_ascii_digit).count();
        let id = if digits > 0 {
            let id = rest[..digits]
                .parse()
                .map_err(|_| ParseError::InvalidPacket(format!("invalid ack id in '{text}'")))?;
            rest = &rest[digits..];
            Some(id)
        } else {
            None
        };

        let data = if rest.is_empty() {
            None
        } else {
            Some(serde_json::from_str(rest)?)
        };

        Ok(Self {
            kind,
            namespace,
            id,
            data,
        })
    }

    /// Encodes the packet as the payload of an engine `message` packet.
    #[must_use]
    pub fn encode(&self) -> String {
        let mut out = String::new();
        out.push(self.kind.digit());
        let has_tail = self.id.is_some() || self.data.is_some();
        if self.namespace != DEFAULT_NAMESPACE {
            out.push_str(&self.namespace);
            if has_tail {
                out.push(',');
            }
        }
        if let Some(id) = self.id {
            out.push_str(&id.to_string());
        }
        if let Some(data) = &self.data {
            out.push_str(&data.to_string());
        }
        out
    }

    /// Wraps the packet in an engine `message` frame.
    #[must_use]
    pub fn to_frame(&self) -> String {
        EnginePacket::Message(self.encode()).encode()
    }
}
