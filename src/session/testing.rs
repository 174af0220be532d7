// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! In-memory transport and credential doubles for session tests.

use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use parking_lot::Mutex;
use serde_json::{Value, json};

use crate::error::{Error, ProtocolError};
use crate::protocol::{DELTA_EVENT, Endpoint, SNAPSHOT_EVENT, TokenProvider, Transport, TransportEvent};
use crate::session::SessionHandle;
use crate::subscription::UpdateSink;
use crate::types::Delta;

pub(crate) fn snapshot_event(payload: Value) -> TransportEvent {
    TransportEvent::Event {
        name: SNAPSHOT_EVENT.to_string(),
        payload: Some(payload),
    }
}

pub(crate) fn delta_event(path: &str, body: Value) -> TransportEvent {
    TransportEvent::Event {
        name: DELTA_EVENT.to_string(),
        payload: Some(json!({"path": path, "body": body})),
    }
}

/// Everything the session did to the transport.
#[derive(Debug, Default)]
pub(crate) struct TransportLog {
    pub connects: Vec<Endpoint>,
    pub emitted: Vec<(String, Option<Value>)>,
    pub keep_alives: usize,
    pub disconnects: usize,
}

enum Script {
    Fail(String),
    Events {
        events: VecDeque<TransportEvent>,
        hold_open: bool,
    },
}

/// Replays one scripted event list per `connect` call.
///
/// When an epoch's events run out the transport reports a disconnect, or
/// for "open" epochs waits forever.
pub(crate) struct ScriptedTransport {
    scripts: VecDeque<Script>,
    current: VecDeque<TransportEvent>,
    hold_open: bool,
    connected: bool,
    log: Arc<Mutex<TransportLog>>,
}

impl ScriptedTransport {
    pub(crate) fn new() -> Self {
        Self {
            scripts: VecDeque::new(),
            current: VecDeque::new(),
            hold_open: false,
            connected: false,
            log: Arc::new(Mutex::new(TransportLog::default())),
        }
    }

    pub(crate) fn with_epoch(mut self, events: Vec<TransportEvent>) -> Self {
        self.scripts.push_back(Script::Events {
            events: events.into(),
            hold_open: false,
        });
        self
    }

    pub(crate) fn with_open_epoch(mut self, events: Vec<TransportEvent>) -> Self {
        self.scripts.push_back(Script::Events {
            events: events.into(),
            hold_open: true,
        });
        self
    }

    pub(crate) fn with_failure(mut self, reason: &str) -> Self {
        self.scripts.push_back(Script::Fail(reason.to_string()));
        self
    }

    pub(crate) fn log(&self) -> Arc<Mutex<TransportLog>> {
        self.log.clone()
    }
}

impl Transport for ScriptedTransport {
    async fn connect(&mut self, endpoint: &Endpoint) -> Result<(), ProtocolError> {
        self.log.lock().connects.push(endpoint.clone());
        match self.scripts.pop_front() {
            Some(Script::Events { events, hold_open }) => {
                self.current = events;
                self.hold_open = hold_open;
                self.connected = true;
                Ok(())
            }
            Some(Script::Fail(reason)) => Err(ProtocolError::ConnectionFailed(reason)),
            None => Err(ProtocolError::ConnectionFailed(
                "no scripted connection left".to_string(),
            )),
        }
    }

    async fn next_event(&mut self) -> TransportEvent {
        if !self.connected {
            return TransportEvent::disconnected("not connected");
        }
        match self.current.pop_front() {
            Some(event) => {
                if matches!(event, TransportEvent::Disconnected { .. }) {
                    self.connected = false;
                }
                event
            }
            None if self.hold_open => std::future::pending::<TransportEvent>().await,
            None => {
                self.connected = false;
                TransportEvent::disconnected("script finished")
            }
        }
    }

    async fn emit(&mut self, event: &str, payload: Option<&Value>) -> Result<(), ProtocolError> {
        if !self.connected {
            return Err(ProtocolError::NotConnected);
        }
        self.log
            .lock()
            .emitted
            .push((event.to_string(), payload.cloned()));
        Ok(())
    }

    async fn send_keep_alive(&mut self) -> Result<(), ProtocolError> {
        if !self.connected {
            return Err(ProtocolError::NotConnected);
        }
        self.log.lock().keep_alives += 1;
        Ok(())
    }

    async fn disconnect(&mut self) {
        if self.connected {
            self.log.lock().disconnects += 1;
        }
        self.connected = false;
        self.current.clear();
    }
}

#[derive(Debug, Default)]
struct TokenInner {
    current: Mutex<String>,
    upcoming: Mutex<VecDeque<String>>,
    expired: AtomicBool,
    fail: AtomicBool,
    refreshes: AtomicUsize,
}

/// Token store whose expiry is flipped by the test.
#[derive(Debug, Clone, Default)]
pub(crate) struct TestTokens {
    inner: Arc<TokenInner>,
}

impl TestTokens {
    pub(crate) fn new(token: &str) -> Self {
        let tokens = Self::default();
        *tokens.inner.current.lock() = token.to_string();
        tokens
    }

    /// Queues the token handed out by the next refresh.
    pub(crate) fn then(self, token: &str) -> Self {
        self.inner.upcoming.lock().push_back(token.to_string());
        self
    }

    pub(crate) fn expire(&self) {
        self.inner.expired.store(true, Ordering::SeqCst);
    }

    pub(crate) fn fail_refresh(&self) {
        self.inner.fail.store(true, Ordering::SeqCst);
    }

    pub(crate) fn refresh_count(&self) -> usize {
        self.inner.refreshes.load(Ordering::SeqCst)
    }
}

impl TokenProvider for TestTokens {
    fn api_host(&self) -> String {
        "https://api.test".to_string()
    }

    fn access_token(&self) -> String {
        self.inner.current.lock().clone()
    }

    fn has_token_expired(&self) -> bool {
        self.inner.expired.load(Ordering::SeqCst)
    }

    async fn refresh_if_needed(&self) -> Result<(), Error> {
        if !self.has_token_expired() {
            return Ok(());
        }
        if self.inner.fail.load(Ordering::SeqCst) {
            return Err(ProtocolError::AuthenticationFailed.into());
        }
        if let Some(next) = self.inner.upcoming.lock().pop_front() {
            *self.inner.current.lock() = next;
        }
        self.inner.expired.store(false, Ordering::SeqCst);
        self.inner.refreshes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// Sink that records what it was given.
#[derive(Default)]
pub(crate) struct RecordingSink {
    snapshots: Mutex<Vec<Value>>,
    deltas: Mutex<Vec<Delta>>,
    cancel_on_delta: Option<SessionHandle>,
}

impl RecordingSink {
    pub(crate) fn cancel_on_delta(mut self, handle: SessionHandle) -> Self {
        self.cancel_on_delta = Some(handle);
        self
    }

    pub(crate) fn snapshots(&self) -> Vec<Value> {
        self.snapshots.lock().clone()
    }

    pub(crate) fn deltas(&self) -> Vec<Delta> {
        self.deltas.lock().clone()
    }
}

impl UpdateSink for RecordingSink {
    fn on_snapshot(&self, snapshot: &Value) {
        self.snapshots.lock().push(snapshot.clone());
    }

    fn on_delta(&self, delta: &Delta) {
        self.deltas.lock().push(delta.clone());
        if let Some(handle) = &self.cancel_on_delta {
            handle.cancel();
        }
    }
}
