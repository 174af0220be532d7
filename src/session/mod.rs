// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Connection session: keeps one device's update stream alive.
//!
//! Each connection epoch follows the same sequence:
//!
//! ```text
//! refresh token if expired
//!        ↓
//! connect(endpoint with current token)        [Connecting]
//!        ↓  connect acknowledged
//! wait for any inbound event                  [AwaitingFirstMessage]
//!        ↓  first event seen → emit snapshot request (once)
//! drop deltas until the snapshot arrives      [AwaitingSnapshot]
//!        ↓  snapshot dispatched
//! forward deltas, send keep-alives            [Streaming]
//!        ↓  transport dropped / token expired
//! clear epoch flags, reconnect                [Disconnected]
//! ```
//!
//! The inbound events, the keep-alive timer and cancellation are all
//! multiplexed on the task that calls [`ConnectionSession::run`];
//! snapshot and delta callbacks run inline on that task.

mod config;
mod state;
#[cfg(test)]
pub(crate) mod testing;

pub use config::{ReconnectionPolicy, SessionConfig};
pub use state::{SessionHandle, SessionState};

use std::time::Duration;

use serde_json::Value;
use tokio::time::{Instant, Interval, MissedTickBehavior};

use crate::error::{ProtocolError, Result};
use crate::event::{EventBus, PipelineEvent};
use crate::protocol::{
    DELTA_EVENT, Endpoint, SNAPSHOT_EVENT, TokenProvider, Transport, TransportEvent,
};
use crate::subscription::UpdateSink;
use crate::types::Delta;

const MIN_PING_INTERVAL: Duration = Duration::from_millis(1);

/// How a connection epoch ended.
enum EpochEnd {
    /// The connection dropped; `established` if an inbound event had been
    /// seen on it.
    Disconnected { established: bool },
    Cancelled,
}

/// State machine over one transport, scoped to one device.
///
/// # Examples
///
/// ```no_run
/// use smartbox::protocol::{ApiSession, HttpConfig, SocketIoTransport};
/// use smartbox::session::{ConnectionSession, SessionConfig};
/// use smartbox::subscription::UpdateRouter;
/// use std::sync::Arc;
///
/// # async fn example() -> smartbox::Result<()> {
/// let api = Arc::new(ApiSession::login(HttpConfig::new("api-foo", "creds"), "user", "pw").await?);
/// let mut session = ConnectionSession::new(
///     SocketIoTransport::new(),
///     api,
///     "device-id",
///     SessionConfig::default(),
/// );
/// let router = UpdateRouter::new();
/// session.run(&router).await?;
/// # Ok(())
/// # }
/// ```
pub struct ConnectionSession<T, P> {
    transport: T,
    tokens: P,
    device_id: String,
    config: SessionConfig,
    handle: SessionHandle,
    events: EventBus,
}

impl<T: Transport, P: TokenProvider> ConnectionSession<T, P> {
    /// Creates a session for `device_id`.
    #[must_use]
    pub fn new(transport: T, tokens: P, device_id: impl Into<String>, config: SessionConfig) -> Self {
        Self {
            transport,
            tokens,
            device_id: device_id.into(),
            config,
            handle: SessionHandle::new(),
            events: EventBus::new(),
        }
    }

    /// Publishes state changes and dropped deltas on `events`.
    #[must_use]
    pub fn with_events(mut self, events: EventBus) -> Self {
        self.events = events;
        self
    }

    /// Returns a handle for cancelling and observing this session.
    #[must_use]
    pub fn handle(&self) -> SessionHandle {
        self.handle.clone()
    }

    /// Returns the current state.
    #[must_use]
    pub fn state(&self) -> SessionState {
        self.handle.state()
    }

    /// Returns the device this session is bound to.
    #[must_use]
    pub fn device_id(&self) -> &str {
        &self.device_id
    }

    /// Returns the session configuration.
    #[must_use]
    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// Returns the transport.
    #[must_use]
    pub fn transport(&self) -> &T {
        &self.transport
    }

    /// Returns the credential provider.
    #[must_use]
    pub fn tokens(&self) -> &P {
        &self.tokens
    }

    /// Requests cancellation. See [`SessionHandle::cancel`].
    pub fn cancel(&self) {
        self.handle.cancel();
    }

    fn endpoint(&self) -> Endpoint {
        Endpoint::new(
            &self.tokens.api_host(),
            &self.device_id,
            &self.tokens.access_token(),
        )
    }

    fn transition(&self, to: SessionState) {
        let from = self.handle.set_state(to);
        if from != to {
            tracing::debug!(%from, %to, "Session state changed");
            self.events.publish(PipelineEvent::StateChanged { from, to });
        }
    }

    /// Drives the session, forwarding snapshots and deltas to `sink`.
    ///
    /// Reconnects after every disconnect. Returns `Ok(())` once cancelled,
    /// or after [`SessionConfig::max_epochs`] epochs; in the latter case
    /// `run()` may be called again to drive further epochs.
    ///
    /// # Errors
    ///
    /// Returns the credential provider's error if a token refresh fails, or
    /// `ProtocolError::ReconnectExhausted` once the reconnection policy gives
    /// up. Transport errors on an established connection only cause a
    /// reconnect.
    pub async fn run(&mut self, sink: &impl UpdateSink) -> Result<()> {
        let period = self.config.ping_interval.max(MIN_PING_INTERVAL);
        let mut keep_alive = tokio::time::interval_at(Instant::now() + period, period);
        keep_alive.set_missed_tick_behavior(MissedTickBehavior::Skip);

        let mut epochs = 0u32;
        let mut failures = 0u32;

        loop {
            if self.handle.is_cancelled() {
                break;
            }
            if self.config.max_epochs.is_some_and(|max| epochs >= max) {
                tracing::debug!(epochs, "Epoch limit reached");
                return Ok(());
            }

            if self.tokens.has_token_expired() {
                tracing::info!("Token expired, refreshing before connecting");
            }
            self.tokens.refresh_if_needed().await?;

            self.transition(SessionState::Connecting);
            let endpoint = self.endpoint();
            tracing::debug!(device = %self.device_id, "Connecting");

            let connected = tokio::select! {
                biased;
                () = self.handle.cancelled() => None,
                result = self.transport.connect(&endpoint) => Some(result),
            };

            match connected {
                None => {
                    self.transport.disconnect().await;
                    break;
                }
                Some(Ok(())) => epochs += 1,
                Some(Err(e)) => {
                    failures += 1;
                    tracing::warn!(error = %e, attempt = failures, "Connection attempt failed");
                    self.transition(SessionState::Disconnected);
                    if !self.back_off(failures).await? {
                        break;
                    }
                    continue;
                }
            }

            match self.drive_epoch(sink, &mut keep_alive).await {
                EpochEnd::Cancelled => break,
                EpochEnd::Disconnected { established: true } => {
                    failures = 0;
                    self.transition(SessionState::Disconnected);
                }
                EpochEnd::Disconnected { established: false } => {
                    // A connection dropped before its first event counts as a failed attempt
                    failures += 1;
                    tracing::warn!(attempt = failures, "Connection closed before first message");
                    self.transition(SessionState::Disconnected);
                    if self.config.max_epochs.is_some_and(|max| epochs >= max) {
                        continue;
                    }
                    if !self.back_off(failures).await? {
                        break;
                    }
                }
            }
        }

        self.transition(SessionState::Closed);
        tracing::debug!(device = %self.device_id, "Session closed");
        Ok(())
    }

    /// Waits out the reconnection delay after `failures` consecutive failed
    /// attempts. Returns `Ok(false)` if cancelled while waiting.
    async fn back_off(&self, failures: u32) -> Result<bool> {
        if !self.config.reconnection.should_retry(failures) {
            return Err(ProtocolError::ReconnectExhausted { attempts: failures }.into());
        }
        let delay = self.config.reconnection.delay_for_attempt(failures - 1);
        tracing::debug!(?delay, "Waiting before reconnecting");
        tokio::select! {
            biased;
            () = self.handle.cancelled() => Ok(false),
            () = tokio::time::sleep(delay) => Ok(true),
        }
    }

    async fn drive_epoch(&mut self, sink: &impl UpdateSink, keep_alive: &mut Interval) -> EpochEnd {
        loop {
            let established = self.state().is_established();

            tokio::select! {
                biased;
                () = self.handle.cancelled() => {
                    self.transport.disconnect().await;
                    return EpochEnd::Cancelled;
                }
                event = self.transport.next_event() => {
                    if let Some(reason) = self.handle_event(event, sink).await {
                        tracing::info!(%reason, "Disconnected");
                        return EpochEnd::Disconnected {
                            established: self.state().is_established(),
                        };
                    }
                    if !established && self.state().is_established() {
                        // First keep-alive one full interval after the handshake
                        keep_alive.reset();
                    }
                }
                _ = keep_alive.tick(), if established => {
                    if let Some(reason) = self.send_keep_alive().await {
                        tracing::info!(%reason, "Disconnecting");
                        self.transport.disconnect().await;
                        return EpochEnd::Disconnected { established: true };
                    }
                }
            }
        }
    }

    async fn send_keep_alive(&mut self) -> Option<String> {
        if self.tokens.has_token_expired() {
            return Some("token expired".to_string());
        }
        match self.transport.send_keep_alive().await {
            Ok(()) => {
                tracing::debug!("Sent keep-alive");
                self.events.publish(PipelineEvent::KeepAliveSent);
                None
            }
            Err(e) => {
                tracing::warn!(error = %e, "Keep-alive failed");
                Some(format!("keep-alive failed: {e}"))
            }
        }
    }

    /// Applies one transport event. Returns the reason if the connection ended.
    async fn handle_event(&mut self, event: TransportEvent, sink: &impl UpdateSink) -> Option<String> {
        let (name, payload) = match event {
            TransportEvent::Disconnected { reason } => return Some(reason),
            TransportEvent::Connected => {
                tracing::debug!("Connection acknowledged");
                if self.state() == SessionState::Connecting {
                    self.transition(SessionState::AwaitingFirstMessage);
                }
                return None;
            }
            TransportEvent::Event { name, payload } => (name, payload),
        };

        if self.state() == SessionState::Connecting {
            // Transport skipped the acknowledgement
            self.transition(SessionState::AwaitingFirstMessage);
        }

        if self.state() == SessionState::AwaitingFirstMessage && name != SNAPSHOT_EVENT {
            tracing::debug!(event = %name, "First message received, requesting snapshot");
            if let Err(e) = self.transport.emit(SNAPSHOT_EVENT, None).await {
                tracing::warn!(error = %e, "Snapshot request failed");
                self.transport.disconnect().await;
                return Some(format!("snapshot request failed: {e}"));
            }
            self.transition(SessionState::AwaitingSnapshot);
        }

        match name.as_str() {
            SNAPSHOT_EVENT => self.on_snapshot(&payload.unwrap_or(Value::Null), sink),
            DELTA_EVENT => self.on_delta(payload, sink),
            other => tracing::trace!(event = other, "Ignoring event"),
        }
        None
    }

    fn on_snapshot(&self, snapshot: &Value, sink: &impl UpdateSink) {
        tracing::debug!(device = %self.device_id, "Received snapshot");
        if self.handle.dispatch(|| sink.on_snapshot(snapshot)).is_some()
            && self.state() != SessionState::Streaming
        {
            self.transition(SessionState::Streaming);
        }
    }

    fn on_delta(&self, payload: Option<Value>, sink: &impl UpdateSink) {
        if self.state() != SessionState::Streaming {
            let path = payload
                .as_ref()
                .and_then(|p| p.get("path"))
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string();
            tracing::debug!(%path, "Snapshot not received yet, ignoring update");
            self.events.publish(PipelineEvent::DeltaDropped { path });
            return;
        }

        let Some(payload) = payload else {
            tracing::warn!("Discarding update without payload");
            return;
        };
        match Delta::from_value(payload) {
            Ok(delta) => {
                tracing::trace!(path = %delta.path(), "Received update");
                self.handle.dispatch(|| sink.on_delta(&delta));
            }
            Err(e) => tracing::warn!(error = %e, "Discarding malformed update"),
        }
    }
}

impl<T, P> std::fmt::Debug for ConnectionSession<T, P> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionSession")
            .field("device_id", &self.device_id)
            .field("config", &self.config)
            .field("handle", &self.handle)
            .finish_non_exhaustive()
    }
}
