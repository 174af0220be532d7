// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Routing of snapshots and deltas to subscriptions.
//!
//! ```text
//! Delta: {path: "/htr/1/status", body: {...}}
//!                     ↓
//!         UpdateRouter.dispatch_delta()
//!                     ↓
//!   for each DeltaSubscription, in registration order:
//!       route pattern ~ path ?  →  selector over record ?
//!                     ↓
//!           callback(DeltaMatch { value, captures })
//! ```

use std::sync::Arc;

use parking_lot::RwLock;
use serde_json::Value;

use crate::event::{EventBus, PipelineEvent};
use crate::subscription::{
    DeltaSubscription, MatchOutcome, SnapshotSubscription, Subscription, SubscriptionId,
};
use crate::types::Delta;

/// Receiver of decoded snapshots and deltas from a connection session.
pub trait UpdateSink: Send + Sync {
    /// Handles the snapshot of a new epoch.
    fn on_snapshot(&self, snapshot: &Value);

    /// Handles a delta received after the epoch's snapshot.
    fn on_delta(&self, delta: &Delta);
}

/// Either kind of subscription, for [`UpdateRouter::add`].
#[derive(Debug)]
pub enum AnySubscription {
    /// A snapshot subscription.
    Snapshot(SnapshotSubscription),
    /// A delta subscription.
    Delta(DeltaSubscription),
}

impl From<SnapshotSubscription> for AnySubscription {
    fn from(subscription: SnapshotSubscription) -> Self {
        Self::Snapshot(subscription)
    }
}

impl From<DeltaSubscription> for AnySubscription {
    fn from(subscription: DeltaSubscription) -> Self {
        Self::Delta(subscription)
    }
}

/// Owns registered subscriptions and dispatches updates to them.
///
/// Callbacks run synchronously inside the dispatch call, in registration
/// order. Registration takes a snapshot of the list at dispatch time, so a
/// callback may register further subscriptions; they see the next update.
#[derive(Debug, Default)]
pub struct UpdateRouter {
    snapshot_subscriptions: RwLock<Vec<Arc<SnapshotSubscription>>>,
    delta_subscriptions: RwLock<Vec<Arc<DeltaSubscription>>>,
    events: EventBus,
}

impl UpdateRouter {
    /// Creates a router with its own event bus.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a router that publishes diagnostics on `events`.
    #[must_use]
    pub fn with_events(events: EventBus) -> Self {
        Self {
            events,
            ..Self::default()
        }
    }

    /// Returns the event bus diagnostics are published on.
    #[must_use]
    pub fn events(&self) -> &EventBus {
        &self.events
    }

    /// Registers a subscription. Identical subscriptions are not merged.
    pub fn add(&self, subscription: impl Into<AnySubscription>) -> SubscriptionId {
        match subscription.into() {
            AnySubscription::Snapshot(subscription) => {
                let id = subscription.id();
                tracing::debug!(subscription = %id, selector = %subscription.selector(), "Adding snapshot subscription");
                self.snapshot_subscriptions.write().push(Arc::new(subscription));
                id
            }
            AnySubscription::Delta(subscription) => {
                let id = subscription.id();
                tracing::debug!(
                    subscription = %id,
                    route = %subscription.route(),
                    selector = %subscription.selector(),
                    "Adding delta subscription"
                );
                self.delta_subscriptions.write().push(Arc::new(subscription));
                id
            }
        }
    }

    /// Offers a snapshot to every snapshot subscription.
    ///
    /// Returns the number of callbacks invoked.
    pub fn dispatch_snapshot(&self, snapshot: &Value) -> usize {
        let subscriptions = self.snapshot_subscriptions.read().clone();
        let mut delivered = 0;
        for subscription in &subscriptions {
            let outcome = subscription.deliver(snapshot);
            delivered += self.record_outcome(subscription.id(), outcome);
        }
        tracing::debug!(delivered, "Dispatched snapshot");
        self.events.publish(PipelineEvent::SnapshotDispatched);
        delivered
    }

    /// Offers a delta to every delta subscription.
    ///
    /// If no route pattern matches, an [`PipelineEvent::UnmatchedDelta`] is
    /// published. Returns the number of callbacks invoked.
    pub fn dispatch_delta(&self, delta: &Delta) -> usize {
        let subscriptions = self.delta_subscriptions.read().clone();
        let mut route_matched = false;
        let mut delivered = 0;
        for subscription in &subscriptions {
            let outcome = subscription.deliver(delta);
            route_matched |= outcome.route_matched();
            delivered += self.record_outcome(subscription.id(), outcome);
        }

        if !route_matched {
            tracing::debug!(path = %delta.path(), record = %delta.record(), "No matches for update");
            self.events.publish(PipelineEvent::UnmatchedDelta {
                path: delta.path().to_string(),
                record: delta.record().clone(),
            });
        }
        delivered
    }

    fn record_outcome(&self, id: SubscriptionId, outcome: MatchOutcome) -> usize {
        match outcome {
            MatchOutcome::Delivered => 1,
            MatchOutcome::Panicked => {
                self.events
                    .publish(PipelineEvent::SubscriberPanicked { subscription: id });
                1
            }
            MatchOutcome::RouteMismatch | MatchOutcome::NoValue => 0,
        }
    }

    /// Returns the number of snapshot subscriptions.
    #[must_use]
    pub fn snapshot_subscription_count(&self) -> usize {
        self.snapshot_subscriptions.read().len()
    }

    /// Returns the number of delta subscriptions.
    #[must_use]
    pub fn delta_subscription_count(&self) -> usize {
        self.delta_subscriptions.read().len()
    }
}

impl UpdateSink for UpdateRouter {
    fn on_snapshot(&self, snapshot: &Value) {
        self.dispatch_snapshot(snapshot);
    }

    fn on_delta(&self, delta: &Delta) {
        self.dispatch_delta(delta);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use serde_json::json;

    #[test]
    fn dispatch_snapshot_in_registration_order() {
        let router = UpdateRouter::new();
        let order = Arc::new(Mutex::new(Vec::new()));

        for (label, selector) in [("root", "."), ("away", ".away_status"), ("missing", ".nope")] {
            let order = order.clone();
            router.add(
                SnapshotSubscription::new(selector, move |_| order.lock().push(label)).unwrap(),
            );
        }

        let delivered = router.dispatch_snapshot(&json!({"away_status": {"away": true}}));
        assert_eq!(delivered, 2);
        assert_eq!(*order.lock(), vec!["root", "away"]);
        assert_eq!(router.snapshot_subscription_count(), 3);
    }

    #[test]
    fn identical_subscriptions_all_fire() {
        let router = UpdateRouter::new();
        let count = Arc::new(Mutex::new(0));
        for _ in 0..2 {
            let count = count.clone();
            router.add(
                DeltaSubscription::new("^/foo", ".body", move |_| *count.lock() += 1).unwrap(),
            );
        }
        router.dispatch_delta(&Delta::new("/foo", json!({})));
        assert_eq!(*count.lock(), 2);
    }

    #[test]
    fn unmatched_delta_is_published() {
        let router = UpdateRouter::new();
        let mut events = router.events().subscribe();
        let fired = Arc::new(Mutex::new(false));
        let flag = fired.clone();
        router.add(
            DeltaSubscription::new("^/mgr/away_status", ".body.away", move |_| {
                *flag.lock() = true;
            })
            .unwrap(),
        );

        let delta = Delta::new("/htr_system/unknown_thing", json!({"blah": "foo"}));
        assert_eq!(router.dispatch_delta(&delta), 0);
        assert!(!*fired.lock());

        let event = events.try_recv().unwrap();
        assert_eq!(
            event,
            PipelineEvent::UnmatchedDelta {
                path: "/htr_system/unknown_thing".to_string(),
                record: json!({"path": "/htr_system/unknown_thing", "body": {"blah": "foo"}}),
            }
        );
    }

    #[test]
    fn selector_miss_is_not_unmatched() {
        let router = UpdateRouter::new();
        let mut events = router.events().subscribe();
        router.add(DeltaSubscription::new("^/foo", ".body.foo", |_| {}).unwrap());

        router.dispatch_delta(&Delta::new("/foo", json!({"fooboo": "bar"})));
        assert!(events.try_recv().is_err());
    }

    #[test]
    fn panicking_subscriber_does_not_block_others() {
        let router = UpdateRouter::new();
        let mut events = router.events().subscribe();
        let bad = router.add(DeltaSubscription::new("^/", ".body", |_| panic!("boom")).unwrap());
        let fired = Arc::new(Mutex::new(false));
        let flag = fired.clone();
        router.add(DeltaSubscription::new("^/", ".body", move |_| *flag.lock() = true).unwrap());

        router.dispatch_delta(&Delta::new("/htr/1/status", json!({})));

        assert!(*fired.lock());
        assert_eq!(
            events.try_recv().unwrap(),
            PipelineEvent::SubscriberPanicked { subscription: bad }
        );
    }

    #[test]
    fn callback_may_register_subscriptions() {
        let router = Arc::new(UpdateRouter::new());
        let inner = router.clone();
        router.add(
            SnapshotSubscription::new(".", move |_| {
                inner.add(SnapshotSubscription::new(".", |_| {}).unwrap());
            })
            .unwrap(),
        );

        router.dispatch_snapshot(&json!({}));
        assert_eq!(router.snapshot_subscription_count(), 2);
    }

    #[test]
    fn sink_forwards_to_dispatch() {
        let router = UpdateRouter::new();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        router.add(SnapshotSubscription::new(".a", move |v| sink.lock().push(v.clone())).unwrap());
        let sink: &dyn UpdateSink = &router;
        sink.on_snapshot(&json!({"a": 1}));
        assert_eq!(*seen.lock(), vec![json!(1)]);
    }
}
