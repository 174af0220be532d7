// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Protocol plumbing between the update pipeline and the cloud service.
//!
//! # Seams
//!
//! - [`Transport`]: a device-scoped event connection (connect, receive named
//!   events, emit, keep-alive, disconnect)
//! - [`TokenProvider`]: the credential collaborator the session reads the
//!   current access token from and asks to refresh
//! - [`Endpoint`]: the one place device identity and token are combined
//!
//! # Implementations
//!
//! - [`ApiSession`] (feature `http`): REST client and token store
//! - [`SocketIoTransport`] (feature `websocket`): Socket.IO over WebSocket

#[cfg(feature = "http")]
mod http;
pub mod packet;
#[cfg(feature = "websocket")]
mod socket_io;
mod token;

#[cfg(feature = "http")]
pub use http::{ApiSession, HttpConfig};
#[cfg(feature = "websocket")]
pub use socket_io::{DEVICE_NAMESPACE, SocketIoTransport};
pub use token::{MIN_TOKEN_LIFETIME_SECS, TokenProvider, TokenState};

use std::future::Future;

use percent_encoding::{AsciiSet, NON_ALPHANUMERIC, utf8_percent_encode};
use serde_json::Value;

use crate::error::ProtocolError;

/// Event carrying the full device snapshot.
pub const SNAPSHOT_EVENT: &str = "dev_data";

/// Event carrying a single delta.
pub const DELTA_EVENT: &str = "update";

/// Payload of the application-level keep-alive message.
pub const KEEP_ALIVE_MESSAGE: &str = "ping";

/// Characters left unescaped in query values, matching what the service
/// accepts in access tokens.
const QUERY_VALUE_SET: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'_')
    .remove(b'.')
    .remove(b'~')
    .remove(b'(')
    .remove(b')')
    .remove(b'*')
    .remove(b'!')
    .remove(b'\'');

/// Percent-encodes a query value, keeping `-_.~()*!'` and alphanumerics.
#[must_use]
pub fn encode_query_value(value: &str) -> String {
    utf8_percent_encode(value, QUERY_VALUE_SET).to_string()
}

/// Address of a device-scoped event connection.
///
/// # Examples
///
/// ```
/// use smartbox::protocol::Endpoint;
///
/// let endpoint = Endpoint::new("https://api.example.com", "02j3rjjf", "a/b+c");
/// assert_eq!(endpoint.url(), "https://api.example.com/?token=a%2Fb%2Bc&dev_id=02j3rjjf");
/// assert_eq!(endpoint.query(), "token=a%2Fb%2Bc&dev_id=02j3rjjf");
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoint {
    url: String,
    query: String,
}

impl Endpoint {
    /// Builds the endpoint for `device_id` authenticated with `token`.
    #[must_use]
    pub fn new(api_host: &str, device_id: &str, token: &str) -> Self {
        let query = format!(
            "token={}&dev_id={}",
            encode_query_value(token),
            encode_query_value(device_id)
        );
        let url = format!("{}/?{query}", api_host.trim_end_matches('/'));
        Self { url, query }
    }

    /// Returns the full URL, including the query.
    #[must_use]
    pub fn url(&self) -> &str {
        &self.url
    }

    /// Returns the query string (`token=..&dev_id=..`).
    #[must_use]
    pub fn query(&self) -> &str {
        &self.query
    }
}

/// Something a transport observed on its connection.
#[derive(Debug, Clone, PartialEq)]
pub enum TransportEvent {
    /// The remote side acknowledged the connection. Not yet safe to send.
    Connected,
    /// A named inbound event.
    Event {
        /// Event name, e.g. [`SNAPSHOT_EVENT`] or [`DELTA_EVENT`].
        name: String,
        /// Event payload, if any.
        payload: Option<Value>,
    },
    /// The connection ended.
    Disconnected {
        /// Human-readable cause.
        reason: String,
    },
}

impl TransportEvent {
    /// Creates a disconnect event.
    #[must_use]
    pub fn disconnected(reason: impl Into<String>) -> Self {
        Self::Disconnected {
            reason: reason.into(),
        }
    }
}

/// A device-scoped event connection.
///
/// One transport serves one connection at a time; the session calls
/// [`connect`](Transport::connect) again after every disconnect.
/// [`next_event`](Transport::next_event) must be cancel-safe since the
/// session races it against timers and cancellation.
pub trait Transport: Send {
    /// Opens the connection and returns once the server has accepted it.
    ///
    /// # Errors
    ///
    /// Returns `ProtocolError` if the connection cannot be established or
    /// the server rejects it.
    fn connect(
        &mut self,
        endpoint: &Endpoint,
    ) -> impl Future<Output = Result<(), ProtocolError>> + Send;

    /// Waits for the next inbound event.
    ///
    /// After a [`TransportEvent::Disconnected`] the transport is closed until
    /// the next `connect`.
    fn next_event(&mut self) -> impl Future<Output = TransportEvent> + Send;

    /// Sends a named event.
    ///
    /// # Errors
    ///
    /// Returns `ProtocolError::NotConnected` without a connection, or the
    /// underlying write error.
    fn emit(
        &mut self,
        event: &str,
        payload: Option<&Value>,
    ) -> impl Future<Output = Result<(), ProtocolError>> + Send;

    /// Sends the lightweight keep-alive message.
    ///
    /// # Errors
    ///
    /// Same as [`emit`](Transport::emit).
    fn send_keep_alive(&mut self) -> impl Future<Output = Result<(), ProtocolError>> + Send;

    /// Closes the connection. Does nothing if already closed.
    fn disconnect(&mut self) -> impl Future<Output = ()> + Send;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn token_encoding_keeps_service_safe_characters() {
        assert_eq!(encode_query_value("abc~()*!.'-_"), "abc~()*!.'-_");
        assert_eq!(encode_query_value("a b/c+d=e&f"), "a%20b%2Fc%2Bd%3De%26f");
    }

    #[test]
    fn endpoint_combines_token_and_device() {
        let endpoint = Endpoint::new("http://localhost:8080/", "dev1", "sj32oj2lkwjf");
        assert_eq!(
            endpoint.url(),
            "http://localhost:8080/?token=sj32oj2lkwjf&dev_id=dev1"
        );
        assert!(endpoint.query().split('&').any(|p| p == "token=sj32oj2lkwjf"));
        assert!(endpoint.query().split('&').any(|p| p == "dev_id=dev1"));
    }

    #[test]
    fn disconnected_constructor() {
        assert_eq!(
            TransportEvent::disconnected("gone"),
            TransportEvent::Disconnected {
                reason: "gone".to_string()
            }
        );
    }
}
