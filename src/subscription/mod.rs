// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Subscriptions and routing for snapshots and deltas.
//!
//! Observers register interest in fragments of the update stream:
//!
//! - [`SnapshotSubscription`] - a selector evaluated against each epoch's snapshot
//! - [`DeltaSubscription`] - a route pattern tested against each delta's path,
//!   plus a selector evaluated against the `{path, body}` record
//! - [`UpdateRouter`] - owns the registered subscriptions and fans every
//!   snapshot or delta out to them in registration order
//!
//! Subscriptions live as long as the router; there is no unsubscribe.
//!
//! # Usage
//!
//! ```
//! use serde_json::json;
//! use smartbox::subscription::{DeltaSubscription, UpdateRouter};
//! use smartbox::types::Delta;
//!
//! let router = UpdateRouter::new();
//! router.add(DeltaSubscription::new("^/mgr/away_status", ".body.away", |m| {
//!     println!("away: {}", m.value());
//! }).unwrap());
//!
//! router.dispatch_delta(&Delta::new("/mgr/away_status", json!({"away": true})));
//! ```

mod callback;
mod router;

pub use callback::{
    Captures, DeltaMatch, DeltaSubscription, MatchOutcome, SnapshotSubscription, Subscription,
    SubscriptionId,
};
pub use router::{AnySubscription, UpdateRouter, UpdateSink};
