// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Snapshot and delta subscriptions.
//!
//! - [`SubscriptionId`] - Unique identifier used in diagnostics
//! - [`SnapshotSubscription`] - Selector over the per-epoch snapshot
//! - [`DeltaSubscription`] - Route pattern plus selector over each delta
//! - [`DeltaMatch`] - The value and named route captures handed to delta callbacks

use std::collections::BTreeMap;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use regex::Regex;
use serde_json::Value;

use crate::error::Error;
use crate::selector::Selector;
use crate::types::Delta;

/// Global counter for subscription IDs.
static SUBSCRIPTION_ID_COUNTER: AtomicU64 = AtomicU64::new(1);

/// Unique identifier for a subscription.
///
/// IDs are unique within the process and appear in tracing output and
/// pipeline events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SubscriptionId(u64);

impl SubscriptionId {
    fn next() -> Self {
        Self(SUBSCRIPTION_ID_COUNTER.fetch_add(1, Ordering::Relaxed))
    }

    /// Returns the raw ID value.
    #[must_use]
    pub fn value(&self) -> u64 {
        self.0
    }
}

impl std::fmt::Display for SubscriptionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Sub({})", self.0)
    }
}

/// Named captures from a route pattern, keyed by group name.
pub type Captures = BTreeMap<String, String>;

/// Type alias for snapshot callbacks.
type SnapshotCallback = Arc<dyn Fn(&Value) + Send + Sync>;

/// Type alias for delta callbacks.
type DeltaCallback = Arc<dyn Fn(&DeltaMatch<'_>) + Send + Sync>;

/// What happened when a subscription was offered an event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatchOutcome {
    /// The route pattern did not match the delta path.
    RouteMismatch,
    /// The route matched (or there is none) but the selector resolved to nothing.
    NoValue,
    /// The callback was invoked.
    Delivered,
    /// The callback was invoked and panicked.
    Panicked,
}

impl MatchOutcome {
    /// Returns `true` unless the route pattern rejected the event.
    #[must_use]
    pub fn route_matched(self) -> bool {
        !matches!(self, Self::RouteMismatch)
    }
}

/// Capability shared by both subscription kinds.
pub trait Subscription<E: ?Sized>: Send + Sync {
    /// Returns this subscription's ID.
    fn id(&self) -> SubscriptionId;

    /// Evaluates the event and invokes the callback on a match.
    fn deliver(&self, event: &E) -> MatchOutcome;
}

/// A selected value from a delta, with the route's named captures.
///
/// # Examples
///
/// ```
/// use serde_json::json;
/// use smartbox::subscription::DeltaSubscription;
/// use smartbox::types::Delta;
///
/// let sub = DeltaSubscription::new(r"^/(?P<node_type>[^/]+)/(?P<addr>\d+)/status", ".body", |m| {
///     assert_eq!(m.capture("node_type"), Some("htr"));
///     assert_eq!(m.capture("addr"), Some("1"));
///     assert_eq!(m.value(), &json!({"active": true}));
/// })
/// .unwrap();
/// # use smartbox::subscription::Subscription;
/// sub.deliver(&Delta::new("/htr/1/status", json!({"active": true})));
/// ```
#[derive(Debug, Clone, PartialEq)]
pub struct DeltaMatch<'a> {
    path: &'a str,
    value: &'a Value,
    captures: Captures,
}

impl<'a> DeltaMatch<'a> {
    /// Returns the path of the delta that matched.
    #[must_use]
    pub fn path(&self) -> &'a str {
        self.path
    }

    /// Returns the value the selector resolved to.
    #[must_use]
    pub fn value(&self) -> &'a Value {
        self.value
    }

    /// Returns all named captures.
    #[must_use]
    pub fn captures(&self) -> &Captures {
        &self.captures
    }

    /// Returns one named capture.
    #[must_use]
    pub fn capture(&self, name: &str) -> Option<&str> {
        self.captures.get(name).map(String::as_str)
    }
}

/// Runs a subscriber callback, containing any panic it raises.
fn guarded(id: SubscriptionId, call: impl FnOnce()) -> MatchOutcome {
    match catch_unwind(AssertUnwindSafe(call)) {
        Ok(()) => MatchOutcome::Delivered,
        Err(_) => {
            tracing::error!(subscription = %id, "Subscriber callback panicked");
            MatchOutcome::Panicked
        }
    }
}

/// A subscription to a fragment of the per-epoch snapshot.
#[derive(Clone)]
pub struct SnapshotSubscription {
    id: SubscriptionId,
    selector: Selector,
    callback: SnapshotCallback,
}

impl SnapshotSubscription {
    /// Creates a snapshot subscription from selector text.
    ///
    /// # Errors
    ///
    /// Returns `Error::Selector` if the selector does not compile.
    pub fn new<F>(selector: &str, callback: F) -> Result<Self, Error>
    where
        F: Fn(&Value) + Send + Sync + 'static,
    {
        Ok(Self::with_selector(Selector::parse(selector)?, callback))
    }

    /// Creates a snapshot subscription from a compiled selector.
    pub fn with_selector<F>(selector: Selector, callback: F) -> Self
    where
        F: Fn(&Value) + Send + Sync + 'static,
    {
        Self {
            id: SubscriptionId::next(),
            selector,
            callback: Arc::new(callback),
        }
    }

    /// Returns the selector.
    #[must_use]
    pub fn selector(&self) -> &Selector {
        &self.selector
    }
}

impl Subscription<Value> for SnapshotSubscription {
    fn id(&self) -> SubscriptionId {
        self.id
    }

    fn deliver(&self, snapshot: &Value) -> MatchOutcome {
        let Some(value) = self.selector.evaluate(snapshot) else {
            tracing::trace!(subscription = %self.id, selector = %self.selector, "No snapshot match");
            return MatchOutcome::NoValue;
        };
        guarded(self.id, || (self.callback)(value))
    }
}

impl std::fmt::Debug for SnapshotSubscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SnapshotSubscription")
            .field("id", &self.id)
            .field("selector", &self.selector.as_str())
            .finish_non_exhaustive()
    }
}

/// A subscription to deltas whose path matches a route pattern.
#[derive(Clone)]
pub struct DeltaSubscription {
    id: SubscriptionId,
    route: Regex,
    selector: Selector,
    callback: DeltaCallback,
}

impl DeltaSubscription {
    /// Creates a delta subscription.
    ///
    /// `route` is a regular expression tested against the delta path; its
    /// named groups are passed to the callback. `selector` is evaluated
    /// against the whole `{path, body}` record.
    ///
    /// # Errors
    ///
    /// Returns `Error::Pattern` for an invalid regular expression and
    /// `Error::Selector` for an invalid selector.
    pub fn new<F>(route: &str, selector: &str, callback: F) -> Result<Self, Error>
    where
        F: Fn(&DeltaMatch<'_>) + Send + Sync + 'static,
    {
        Ok(Self::with_parts(
            Regex::new(route)?,
            Selector::parse(selector)?,
            callback,
        ))
    }

    /// Creates a delta subscription from a compiled pattern and selector.
    pub fn with_parts<F>(route: Regex, selector: Selector, callback: F) -> Self
    where
        F: Fn(&DeltaMatch<'_>) + Send + Sync + 'static,
    {
        Self {
            id: SubscriptionId::next(),
            route,
            selector,
            callback: Arc::new(callback),
        }
    }

    /// Returns the route pattern.
    #[must_use]
    pub fn route(&self) -> &Regex {
        &self.route
    }

    /// Returns the selector.
    #[must_use]
    pub fn selector(&self) -> &Selector {
        &self.selector
    }
}

impl Subscription<Delta> for DeltaSubscription {
    fn id(&self) -> SubscriptionId {
        self.id
    }

    fn deliver(&self, delta: &Delta) -> MatchOutcome {
        let Some(route_captures) = self.route.captures(delta.path()) else {
            return MatchOutcome::RouteMismatch;
        };
        let Some(value) = self.selector.evaluate(delta.record()) else {
            tracing::trace!(
                subscription = %self.id,
                path = %delta.path(),
                selector = %self.selector,
                "Route matched but selector did not"
            );
            return MatchOutcome::NoValue;
        };

        let captures = self
            .route
            .capture_names()
            .flatten()
            .filter_map(|name| {
                route_captures
                    .name(name)
                    .map(|m| (name.to_string(), m.as_str().to_string()))
            })
            .collect();
        let matched = DeltaMatch {
            path: delta.path(),
            value,
            captures,
        };
        guarded(self.id, || (self.callback)(&matched))
    }
}

impl std::fmt::Debug for DeltaSubscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeltaSubscription")
            .field("id", &self.id)
            .field("route", &self.route.as_str())
            .field("selector", &self.selector.as_str())
            .finish_non_exhaustive()
    }
}
