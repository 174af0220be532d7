// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Update manager: one device's session wired to a subscription router.

use std::sync::Arc;

use serde_json::Value;
use tokio::sync::broadcast;

use crate::error::Result;
use crate::event::{EventBus, PipelineEvent};
use crate::protocol::{TokenProvider, Transport};
use crate::session::{ConnectionSession, SessionConfig, SessionHandle, SessionState};
use crate::subscription::{DeltaMatch, DeltaSubscription, SnapshotSubscription, SubscriptionId, UpdateRouter};

const AWAY_STATUS_SELECTOR: &str = ".away_status";
const AWAY_STATUS_ROUTE: &str = "^/mgr/away_status";

const POWER_LIMIT_SELECTOR: &str = ".htr_system.setup.power_limit";
const POWER_LIMIT_ROUTE: &str = "^/htr_system/(setup|power_limit)";
const POWER_LIMIT_DELTA_SELECTOR: &str = ".body.power_limit";

const NODES_SELECTOR: &str = ".nodes";
const NODE_STATUS_ROUTE: &str = r"^/(?P<node_type>[^/]+)/(?P<addr>\d+)/status";
const NODE_SETUP_ROUTE: &str = r"^/(?P<node_type>[^/]+)/(?P<addr>\d+)/setup";

const BODY_SELECTOR: &str = ".body";

/// Subscribes to the update stream of one device.
///
/// Owns a [`ConnectionSession`] and an [`UpdateRouter`]; every snapshot and
/// delta the session decodes is forwarded to the router.
///
/// # Examples
///
/// ```no_run
/// use smartbox::manager::UpdateManager;
/// use smartbox::protocol::{ApiSession, HttpConfig};
/// use std::sync::Arc;
///
/// # async fn example() -> smartbox::Result<()> {
/// let api = Arc::new(ApiSession::login(HttpConfig::new("api-foo", "creds"), "user", "pw").await?);
/// let mut manager = UpdateManager::for_api_session(api, "device-id");
///
/// manager.subscribe_to_device_away_status(|status| println!("away status: {status}"))?;
/// manager.subscribe_to_node_status(|node_type, addr, status| {
///     println!("{node_type}/{addr}: {status}");
/// })?;
///
/// manager.run().await?;
/// # Ok(())
/// # }
/// ```
pub struct UpdateManager<T, P> {
    session: ConnectionSession<T, P>,
    router: Arc<UpdateRouter>,
    events: EventBus,
}

impl<T: Transport, P: TokenProvider> UpdateManager<T, P> {
    /// Creates a manager for `device_id`.
    #[must_use]
    pub fn new(transport: T, tokens: P, device_id: impl Into<String>, config: SessionConfig) -> Self {
        let events = EventBus::new();
        let router = Arc::new(UpdateRouter::with_events(events.clone()));
        let session =
            ConnectionSession::new(transport, tokens, device_id, config).with_events(events.clone());
        Self {
            session,
            router,
            events,
        }
    }

    // =========================================================================
    // Generic subscriptions
    // =========================================================================

    /// Calls `callback` with the value `selector` resolves to in each
    /// snapshot.
    ///
    /// # Errors
    ///
    /// Returns `Error::Selector` if `selector` does not compile; nothing is
    /// registered in that case.
    pub fn subscribe_to_snapshot<F>(&self, selector: &str, callback: F) -> Result<SubscriptionId>
    where
        F: Fn(&Value) + Send + Sync + 'static,
    {
        Ok(self.router.add(SnapshotSubscription::new(selector, callback)?))
    }

    /// Calls `callback` for each delta whose path matches `route` and whose
    /// `{path, body}` record resolves `selector`.
    ///
    /// # Errors
    ///
    /// Returns `Error::Pattern` or `Error::Selector` if either does not
    /// compile; nothing is registered in that case.
    pub fn subscribe_to_delta<F>(&self, route: &str, selector: &str, callback: F) -> Result<SubscriptionId>
    where
        F: Fn(&DeltaMatch<'_>) + Send + Sync + 'static,
    {
        Ok(self.router.add(DeltaSubscription::new(route, selector, callback)?))
    }

    // =========================================================================
    // Convenience subscriptions
    // =========================================================================

    /// Calls `callback` with the device's away status from each snapshot
    /// and each away-status delta.
    ///
    /// # Errors
    ///
    /// Never fails in practice; the patterns are fixed.
    pub fn subscribe_to_device_away_status<F>(&self, callback: F) -> Result<[SubscriptionId; 2]>
    where
        F: Fn(&Value) + Send + Sync + 'static,
    {
        let callback = Arc::new(callback);
        let on_snapshot = Arc::clone(&callback);
        let snapshot = self.subscribe_to_snapshot(AWAY_STATUS_SELECTOR, move |status| on_snapshot(status))?;
        let delta = self.subscribe_to_delta(AWAY_STATUS_ROUTE, BODY_SELECTOR, move |m| callback(m.value()))?;
        Ok([snapshot, delta])
    }

    /// Calls `callback` with the device's power limit from each snapshot
    /// and each power-limit delta.
    ///
    /// Values are coerced to integers; values that are not integers or
    /// integer strings are skipped.
    ///
    /// # Errors
    ///
    /// Never fails in practice; the patterns are fixed.
    pub fn subscribe_to_device_power_limit<F>(&self, callback: F) -> Result<[SubscriptionId; 2]>
    where
        F: Fn(i64) + Send + Sync + 'static,
    {
        let callback = Arc::new(callback);
        let on_snapshot = Arc::clone(&callback);
        let snapshot = self.subscribe_to_snapshot(POWER_LIMIT_SELECTOR, move |value| {
            if let Some(limit) = coerce_integer(value) {
                on_snapshot(limit);
            } else {
                tracing::debug!(%value, "Ignoring non-integer power limit");
            }
        })?;
        let delta = self.subscribe_to_delta(POWER_LIMIT_ROUTE, POWER_LIMIT_DELTA_SELECTOR, move |m| {
            if let Some(limit) = coerce_integer(m.value()) {
                callback(limit);
            } else {
                tracing::debug!(value = %m.value(), "Ignoring non-integer power limit");
            }
        })?;
        Ok([snapshot, delta])
    }

    /// Calls `callback(node_type, addr, status)` for every node in each
    /// snapshot and for each node status delta.
    ///
    /// # Errors
    ///
    /// Never fails in practice; the patterns are fixed.
    pub fn subscribe_to_node_status<F>(&self, callback: F) -> Result<[SubscriptionId; 2]>
    where
        F: Fn(&str, u32, &Value) + Send + Sync + 'static,
    {
        self.subscribe_to_node_resource("status", NODE_STATUS_ROUTE, callback)
    }

    /// Calls `callback(node_type, addr, setup)` for every node in each
    /// snapshot and for each node setup delta.
    ///
    /// # Errors
    ///
    /// Never fails in practice; the patterns are fixed.
    pub fn subscribe_to_node_setup<F>(&self, callback: F) -> Result<[SubscriptionId; 2]>
    where
        F: Fn(&str, u32, &Value) + Send + Sync + 'static,
    {
        self.subscribe_to_node_resource("setup", NODE_SETUP_ROUTE, callback)
    }

    fn subscribe_to_node_resource<F>(
        &self,
        resource: &'static str,
        route: &str,
        callback: F,
    ) -> Result<[SubscriptionId; 2]>
    where
        F: Fn(&str, u32, &Value) + Send + Sync + 'static,
    {
        let callback = Arc::new(callback);
        let on_snapshot = Arc::clone(&callback);
        let snapshot = self.subscribe_to_snapshot(NODES_SELECTOR, move |nodes| {
            for_each_node(nodes, resource, |node_type, addr, value| {
                on_snapshot(node_type, addr, value);
            });
        })?;
        let delta = self.subscribe_to_delta(route, BODY_SELECTOR, move |m| {
            let (Some(node_type), Some(addr)) = (m.capture("node_type"), m.capture("addr")) else {
                return;
            };
            match addr.parse::<u32>() {
                Ok(addr) => callback(node_type, addr, m.value()),
                Err(_) => tracing::debug!(path = m.path(), "Ignoring node address out of range"),
            }
        })?;
        Ok([snapshot, delta])
    }

    // =========================================================================
    // Session control
    // =========================================================================

    /// Drives the session until it is cancelled, or until the configured
    /// number of epochs has completed.
    ///
    /// May be called again after it returns; subscriptions are kept.
    ///
    /// # Errors
    ///
    /// See [`ConnectionSession::run`].
    pub async fn run(&mut self) -> Result<()> {
        self.session.run(self.router.as_ref()).await
    }

    /// Requests cancellation. `run()` returns once the transport is closed.
    pub fn cancel(&self) {
        self.session.cancel();
    }

    /// Returns a handle for cancelling or observing the session from another
    /// task while `run()` is in flight.
    #[must_use]
    pub fn handle(&self) -> SessionHandle {
        self.session.handle()
    }

    /// Returns the current session state.
    #[must_use]
    pub fn state(&self) -> SessionState {
        self.session.state()
    }

    /// Returns the device this manager is bound to.
    #[must_use]
    pub fn device_id(&self) -> &str {
        self.session.device_id()
    }

    /// Returns the router. Subscriptions added through it are kept across
    /// epochs like any other.
    #[must_use]
    pub fn router(&self) -> &Arc<UpdateRouter> {
        &self.router
    }

    /// Subscribes to pipeline events (state changes, dropped and unmatched
    /// deltas, panicking subscribers, keep-alives).
    #[must_use]
    pub fn events(&self) -> broadcast::Receiver<PipelineEvent> {
        self.events.subscribe()
    }
}

#[cfg(all(feature = "http", feature = "websocket"))]
impl UpdateManager<crate::protocol::SocketIoTransport, Arc<crate::protocol::ApiSession>> {
    /// Creates a manager streaming `device_id` over Socket.IO, authenticated
    /// by `api`.
    #[must_use]
    pub fn for_api_session(api: Arc<crate::protocol::ApiSession>, device_id: impl Into<String>) -> Self {
        Self::new(
            crate::protocol::SocketIoTransport::new(),
            api,
            device_id,
            SessionConfig::default(),
        )
    }
}

impl<T, P> std::fmt::Debug for UpdateManager<T, P> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UpdateManager")
            .field("session", &self.session)
            .field("router", &self.router)
            .finish_non_exhaustive()
    }
}

fn coerce_integer(value: &Value) -> Option<i64> {
    match value {
        Value::Number(number) => number.as_i64(),
        Value::String(text) => text.trim().parse().ok(),
        _ => None,
    }
}

fn coerce_addr(value: &Value) -> Option<u32> {
    coerce_integer(value).and_then(|addr| u32::try_from(addr).ok())
}

/// Calls `f(type, addr, node[field])` for each well-formed node entry.
fn for_each_node(nodes: &Value, field: &str, mut f: impl FnMut(&str, u32, &Value)) {
    let Some(nodes) = nodes.as_array() else {
        return;
    };
    for node in nodes {
        let node_type = node.get("type").and_then(Value::as_str);
        let addr = node.get("addr").and_then(coerce_addr);
        let value = node.get(field);
        if let (Some(node_type), Some(addr), Some(value)) = (node_type, addr, value) {
            f(node_type, addr, value);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::TransportEvent;
    use crate::session::testing::{ScriptedTransport, TestTokens, delta_event, snapshot_event};
    use parking_lot::Mutex;
    use serde_json::json;

    type Recorded<T> = Arc<Mutex<Vec<T>>>;

    fn recorded<T>() -> Recorded<T> {
        Arc::new(Mutex::new(Vec::new()))
    }

    fn manager(transport: ScriptedTransport) -> UpdateManager<ScriptedTransport, TestTokens> {
        UpdateManager::new(
            transport,
            TestTokens::new("tok"),
            "dev1",
            SessionConfig::default().with_max_epochs(1),
        )
    }

    #[test]
    fn coerce_integer_accepts_numbers_and_numeric_strings() {
        assert_eq!(coerce_integer(&json!(1000)), Some(1000));
        assert_eq!(coerce_integer(&json!(" 500 ")), Some(500));
        assert_eq!(coerce_integer(&json!(1.5)), None);
        assert_eq!(coerce_integer(&json!("high")), None);
        assert_eq!(coerce_integer(&json!(null)), None);
    }

    #[test]
    fn for_each_node_skips_incomplete_entries() {
        let nodes = json!([
            {"type": "htr", "addr": 1, "status": {"mtemp": "19.0"}},
            {"type": "acm", "addr": "2", "status": {"mtemp": "20.0"}},
            {"type": "htr", "status": {}},
            {"type": "htr", "addr": 3},
        ]);
        let mut seen = Vec::new();
        for_each_node(&nodes, "status", |node_type, addr, value| {
            seen.push((node_type.to_string(), addr, value.clone()));
        });
        assert_eq!(
            seen,
            vec![
                ("htr".to_string(), 1, json!({"mtemp": "19.0"})),
                ("acm".to_string(), 2, json!({"mtemp": "20.0"})),
            ]
        );
    }

    #[test]
    fn invalid_selector_is_not_registered() {
        let manager = manager(ScriptedTransport::new());
        assert!(manager.subscribe_to_snapshot("foo", |_| {}).is_err());
        assert!(manager.subscribe_to_delta("^/(", ".body", |_| {}).is_err());
        assert_eq!(manager.router().snapshot_subscription_count(), 0);
        assert_eq!(manager.router().delta_subscription_count(), 0);
    }

    #[tokio::test]
    async fn integration_over_two_epochs() {
        let dev_data = json!({
            "away_status": {"away": true},
            "htr_system": {"setup": {"power_limit": 0}},
        });
        let node_body = json!({"active": true, "mtemp": 22.5});
        let transport = ScriptedTransport::new()
            .with_epoch(vec![
                TransportEvent::Connected,
                snapshot_event(dev_data.clone()),
                delta_event("/htr/1/status", node_body.clone()),
                delta_event("/mgr/away_status", json!({"away": true})),
                delta_event("/htr_system/setup", json!({"power_limit": 1000})),
                delta_event("/htr_system/unknown_thing", json!({"blah": "foo"})),
            ])
            .with_epoch(vec![
                TransportEvent::Connected,
                delta_event("/htr_system/power_limit", json!({"power_limit": 250})),
                snapshot_event(dev_data.clone()),
                delta_event("/htr_system/power_limit", json!({"power_limit": 500})),
            ]);
        let mut manager = manager(transport);
        let mut events = manager.events();

        // Snapshot subscriptions
        let whole = recorded();
        let sink = whole.clone();
        manager.subscribe_to_snapshot(".", move |v| sink.lock().push(v.clone())).unwrap();
        let away = recorded();
        let sink = away.clone();
        manager.subscribe_to_snapshot(".away_status", move |v| sink.lock().push(v.clone())).unwrap();
        let limit = recorded();
        let sink = limit.clone();
        manager
            .subscribe_to_snapshot(".htr_system.setup.power_limit", move |v| sink.lock().push(v.clone()))
            .unwrap();
        let unmatched = recorded::<Value>();
        let sink = unmatched.clone();
        manager
            .subscribe_to_snapshot(".htr_system.setup.unmatched", move |v| sink.lock().push(v.clone()))
            .unwrap();

        // Delta subscriptions
        let node_updates = recorded();
        let sink = node_updates.clone();
        manager
            .subscribe_to_delta(NODE_STATUS_ROUTE, ".body", move |m| {
                sink.lock().push((
                    m.value().clone(),
                    m.capture("node_type").map(str::to_string),
                    m.capture("addr").map(str::to_string),
                ));
            })
            .unwrap();
        let away_updates = recorded();
        let sink = away_updates.clone();
        manager
            .subscribe_to_delta("^/mgr/away_status", ".body.away", move |m| sink.lock().push(m.value().clone()))
            .unwrap();
        let limit_updates = recorded();
        let sink = limit_updates.clone();
        manager
            .subscribe_to_delta(POWER_LIMIT_ROUTE, ".body.power_limit", move |m| {
                sink.lock().push(m.value().clone());
            })
            .unwrap();

        // Convenience subscriptions
        let away_specific = recorded();
        let sink = away_specific.clone();
        manager
            .subscribe_to_device_away_status(move |v| sink.lock().push(v.clone()))
            .unwrap();
        let limit_specific = recorded();
        let sink = limit_specific.clone();
        manager
            .subscribe_to_device_power_limit(move |v| sink.lock().push(v))
            .unwrap();
        let node_specific = recorded();
        let sink = node_specific.clone();
        manager
            .subscribe_to_node_status(move |node_type, addr, v| {
                sink.lock().push((node_type.to_string(), addr, v.clone()));
            })
            .unwrap();

        manager.run().await.unwrap();

        assert_eq!(*whole.lock(), vec![dev_data.clone()]);
        assert_eq!(*away.lock(), vec![json!({"away": true})]);
        assert_eq!(*limit.lock(), vec![json!(0)]);
        assert!(unmatched.lock().is_empty());

        assert_eq!(
            *node_updates.lock(),
            vec![(node_body.clone(), Some("htr".to_string()), Some("1".to_string()))]
        );
        assert_eq!(*away_updates.lock(), vec![json!(true)]);
        assert_eq!(*limit_updates.lock(), vec![json!(1000)]);

        assert_eq!(
            *away_specific.lock(),
            vec![json!({"away": true}), json!({"away": true})]
        );
        assert_eq!(*limit_specific.lock(), vec![0, 1000]);
        assert_eq!(
            *node_specific.lock(),
            vec![("htr".to_string(), 1, node_body.clone())]
        );

        let mut unmatched_paths = Vec::new();
        while let Ok(event) = events.try_recv() {
            if let PipelineEvent::UnmatchedDelta { path, record } = event {
                assert_eq!(record, json!({"path": path, "body": {"blah": "foo"}}));
                unmatched_paths.push(path);
            }
        }
        assert_eq!(unmatched_paths, vec!["/htr_system/unknown_thing".to_string()]);

        // Second epoch: the early delta is dropped, the fresh snapshot comes first
        manager.run().await.unwrap();

        assert_eq!(whole.lock().len(), 2);
        assert_eq!(*limit_updates.lock(), vec![json!(1000), json!(500)]);
        assert_eq!(*limit_specific.lock(), vec![0, 1000, 0, 500]);
        assert_eq!(manager.state(), SessionState::Disconnected);
    }

    #[tokio::test]
    async fn node_setup_from_snapshot_and_delta() {
        let transport = ScriptedTransport::new().with_epoch(vec![
            TransportEvent::Connected,
            snapshot_event(json!({
                "nodes": [{"type": "acm", "addr": 2, "setup": {"units": "C"}}]
            })),
            delta_event("/acm/2/setup", json!({"units": "F"})),
            delta_event("/acm/2/status", json!({"mode": "auto"})),
        ]);
        let mut manager = manager(transport);
        let seen = recorded();
        let sink = seen.clone();
        manager
            .subscribe_to_node_setup(move |node_type, addr, v| {
                sink.lock().push((node_type.to_string(), addr, v.clone()));
            })
            .unwrap();

        manager.run().await.unwrap();

        assert_eq!(
            *seen.lock(),
            vec![
                ("acm".to_string(), 2, json!({"units": "C"})),
                ("acm".to_string(), 2, json!({"units": "F"})),
            ]
        );
    }

    #[tokio::test]
    async fn handle_cancels_running_manager() {
        let transport = ScriptedTransport::new()
            .with_open_epoch(vec![TransportEvent::Connected, snapshot_event(json!({}))]);
        let mut manager = UpdateManager::new(
            transport,
            TestTokens::new("tok"),
            "dev1",
            SessionConfig::default(),
        );
        let handle = manager.handle();
        let mut states = handle.watch_state();
        let task = tokio::spawn(async move {
            manager.run().await.unwrap();
            manager
        });

        states
            .wait_for(|state| *state == SessionState::Streaming)
            .await
            .unwrap();
        handle.cancel();
        let manager = task.await.unwrap();

        assert_eq!(manager.state(), SessionState::Closed);
    }
}
