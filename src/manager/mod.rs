// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Update manager for a single device's live update stream.
//!
//! # Overview
//!
//! The [`UpdateManager`] is the entry point for applications that want to
//! react to device changes as they happen. It provides:
//!
//! - **Snapshot subscriptions**: select a value out of the full device state
//!   sent at the start of every connection
//! - **Delta subscriptions**: match incremental updates by path pattern and
//!   select a value out of them
//! - **Convenience subscriptions**: away status, power limit, node status and
//!   node setup, fed from both snapshots and deltas
//! - **Reconnection**: token refresh and backoff handled by the underlying
//!   [`ConnectionSession`](crate::session::ConnectionSession)
//!
//! # Examples
//!
//! ## Selecting values
//!
//! ```no_run
//! use smartbox::manager::UpdateManager;
//! use smartbox::protocol::{ApiSession, HttpConfig};
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> smartbox::Result<()> {
//!     let api = ApiSession::login(HttpConfig::new("api-foo", "creds"), "user", "pw").await?;
//!     let mut manager = UpdateManager::for_api_session(Arc::new(api), "device-id");
//!
//!     manager.subscribe_to_snapshot(".htr_system.setup.power_limit", |limit| {
//!         println!("power limit at connect: {limit}");
//!     })?;
//!     manager.subscribe_to_delta(r"^/(?P<node_type>[^/]+)/(?P<addr>\d+)/status", ".body", |update| {
//!         println!("{:?} {:?}: {}", update.capture("node_type"), update.capture("addr"), update.value());
//!     })?;
//!
//!     manager.run().await
//! }
//! ```
//!
//! ## Observing the pipeline
//!
//! ```no_run
//! use smartbox::event::PipelineEvent;
//! # use smartbox::manager::UpdateManager;
//! # use smartbox::protocol::{ApiSession, SocketIoTransport};
//! # use std::sync::Arc;
//!
//! # fn example(manager: &UpdateManager<SocketIoTransport, Arc<ApiSession>>) {
//! let mut events = manager.events();
//! tokio::spawn(async move {
//!     while let Ok(event) = events.recv().await {
//!         if let PipelineEvent::UnmatchedDelta { path, .. } = event {
//!             println!("nobody handles {path}");
//!         }
//!     }
//! });
//! # }
//! ```

mod update_manager;

pub use update_manager::UpdateManager;
