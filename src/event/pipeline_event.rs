// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Pipeline event types.

use serde_json::Value;

use crate::session::SessionState;
use crate::subscription::SubscriptionId;

/// Events emitted by the connection session and the update router.
#[derive(Debug, Clone, PartialEq)]
pub enum PipelineEvent {
    /// The connection session moved to a new state.
    StateChanged {
        /// The state that was left.
        from: SessionState,
        /// The state that was entered.
        to: SessionState,
    },

    /// A snapshot was forwarded to the snapshot subscriptions.
    SnapshotDispatched,

    /// A delta arrived before the epoch's snapshot and was discarded.
    DeltaDropped {
        /// Route of the discarded delta.
        path: String,
    },

    /// No delta subscription's route pattern matched this delta.
    UnmatchedDelta {
        /// Route of the delta.
        path: String,
        /// The full `{path, body}` record.
        record: Value,
    },

    /// A subscriber callback panicked; delivery to the others continued.
    SubscriberPanicked {
        /// The subscription whose callback panicked.
        subscription: SubscriptionId,
    },

    /// A keep-alive was written to the transport.
    KeepAliveSent,
}

impl PipelineEvent {
    /// Returns `true` if this event reports an unmatched delta.
    #[must_use]
    pub fn is_unmatched_delta(&self) -> bool {
        matches!(self, Self::UnmatchedDelta { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn unmatched_delta_predicate() {
        let event = PipelineEvent::UnmatchedDelta {
            path: "/x".to_string(),
            record: json!({"path": "/x", "body": {}}),
        };
        assert!(event.is_unmatched_delta());
        assert!(!PipelineEvent::SnapshotDispatched.is_unmatched_delta());
    }

    #[test]
    fn state_changed_debug() {
        let event = PipelineEvent::StateChanged {
            from: SessionState::Idle,
            to: SessionState::Connecting,
        };
        let debug = format!("{event:?}");
        assert!(debug.contains("Connecting"));
    }
}
