// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Session states and the cross-task session handle.

use std::cell::Cell;
use std::sync::Arc;

use parking_lot::ReentrantMutex;
use tokio::sync::watch;

/// Lifecycle state of a connection session.
///
/// ```text
/// Idle → Connecting → AwaitingFirstMessage → AwaitingSnapshot → Streaming
///            ↑                                                     │
///            └──────────────────── Disconnected ←──────────────────┘
///                                       │ (cancel)
///                                       ↓
///                                    Closed
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SessionState {
    /// `run()` has not been called yet.
    Idle,
    /// Opening the transport.
    Connecting,
    /// Connected; nothing may be sent until the first inbound event.
    AwaitingFirstMessage,
    /// The snapshot has been requested; deltas are dropped.
    AwaitingSnapshot,
    /// The snapshot has been dispatched; deltas are forwarded.
    Streaming,
    /// The connection ended; epoch flags are cleared.
    Disconnected,
    /// Cancelled. Terminal.
    Closed,
}

impl SessionState {
    /// Returns `true` once the first inbound event has been seen on the
    /// current connection, i.e. sending is allowed.
    #[must_use]
    pub fn is_established(self) -> bool {
        matches!(self, Self::AwaitingSnapshot | Self::Streaming)
    }

    /// Returns `true` if the state is terminal.
    #[must_use]
    pub fn is_closed(self) -> bool {
        self == Self::Closed
    }
}

impl std::fmt::Display for SessionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Idle => "idle",
            Self::Connecting => "connecting",
            Self::AwaitingFirstMessage => "awaiting first message",
            Self::AwaitingSnapshot => "awaiting snapshot",
            Self::Streaming => "streaming",
            Self::Disconnected => "disconnected",
            Self::Closed => "closed",
        };
        f.write_str(name)
    }
}

struct HandleInner {
    cancel: watch::Sender<bool>,
    state: watch::Sender<SessionState>,
    // Held for the duration of every dispatch; `cancel()` takes it too, so
    // no dispatch starts or is still running once `cancel()` returns. It is
    // reentrant so a callback may cancel its own session.
    dispatch_gate: ReentrantMutex<Cell<bool>>,
}

/// Cloneable handle for observing and cancelling a session from other tasks.
///
/// # Examples
///
/// ```
/// use smartbox::session::{SessionHandle, SessionState};
///
/// let handle = SessionHandle::new();
/// assert_eq!(handle.state(), SessionState::Idle);
///
/// handle.cancel();
/// handle.cancel(); // idempotent
/// assert!(handle.is_cancelled());
/// ```
#[derive(Clone)]
pub struct SessionHandle {
    inner: Arc<HandleInner>,
}

impl SessionHandle {
    /// Creates a handle for a session that has not started.
    #[must_use]
    pub fn new() -> Self {
        let (cancel, _) = watch::channel(false);
        let (state, _) = watch::channel(SessionState::Idle);
        Self {
            inner: Arc::new(HandleInner {
                cancel,
                state,
                dispatch_gate: ReentrantMutex::new(Cell::new(false)),
            }),
        }
    }

    /// Requests cancellation.
    ///
    /// Idempotent. When this returns, no further snapshot or delta will be
    /// dispatched; the session tears down the transport and `run()` returns.
    pub fn cancel(&self) {
        let gate = self.inner.dispatch_gate.lock();
        if gate.replace(true) {
            return;
        }
        self.inner.cancel.send_replace(true);
        tracing::debug!("Session cancellation requested");
    }

    /// Returns `true` if cancellation has been requested.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        *self.inner.cancel.borrow()
    }

    /// Returns the current session state.
    #[must_use]
    pub fn state(&self) -> SessionState {
        *self.inner.state.borrow()
    }

    /// Watches session state changes.
    #[must_use]
    pub fn watch_state(&self) -> watch::Receiver<SessionState> {
        self.inner.state.subscribe()
    }

    /// Completes once cancellation has been requested.
    pub async fn cancelled(&self) {
        let mut receiver = self.inner.cancel.subscribe();
        // The sender lives as long as `self`
        let _ = receiver.wait_for(|cancelled| *cancelled).await;
    }

    /// Runs `dispatch` unless the session has been cancelled.
    pub(crate) fn dispatch<R>(&self, dispatch: impl FnOnce() -> R) -> Option<R> {
        let gate = self.inner.dispatch_gate.lock();
        if gate.get() {
            return None;
        }
        Some(dispatch())
    }

    /// Stores a new state and returns the previous one.
    pub(crate) fn set_state(&self, state: SessionState) -> SessionState {
        self.inner.state.send_replace(state)
    }
}

impl Default for SessionHandle {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for SessionHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionHandle")
            .field("state", &self.state())
            .field("cancelled", &self.is_cancelled())
            .finish()
    }
}
