// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! `smartbox` - A Rust client for cloud-connected heating smart boxes.
//!
//! This library provides async APIs to read and control heating devices
//! through the vendor's REST API, and to follow their state in real time
//! over Socket.IO.
//!
//! # Supported Features
//!
//! - **REST control**: Devices, nodes, node status and setup, away status
//! - **Live updates**: One full snapshot per connection, then path-addressed
//!   deltas
//! - **Subscriptions**: Selector expressions over snapshots, route patterns
//!   with named captures over deltas
//! - **Resilience**: Token refresh before reconnecting, exponential backoff
//!   for failed connection attempts
//!
//! # Quick Start
//!
//! ## REST API
//!
//! ```no_run
//! use smartbox::protocol::{ApiSession, HttpConfig};
//!
//! #[tokio::main]
//! async fn main() -> smartbox::Result<()> {
//!     let config = HttpConfig::new("api-foo", "base64-client-credentials");
//!     let session = ApiSession::login(config, "user@example.com", "secret").await?;
//!
//!     for device in session.get_devices().await? {
//!         println!("{} ({})", device.name, device.dev_id);
//!         for node in session.get_nodes(&device.dev_id).await? {
//!             let status = session.get_status(&device.dev_id, &node).await?;
//!             println!("  {}/{}: {status}", node.node_type, node.addr);
//!         }
//!     }
//!     Ok(())
//! }
//! ```
//!
//! ## Live Updates
//!
//! ```no_run
//! use smartbox::manager::UpdateManager;
//! use smartbox::protocol::{ApiSession, HttpConfig};
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> smartbox::Result<()> {
//!     let config = HttpConfig::new("api-foo", "base64-client-credentials");
//!     let session = Arc::new(ApiSession::login(config, "user@example.com", "secret").await?);
//!
//!     let mut manager = UpdateManager::for_api_session(session, "device-id");
//!     manager.subscribe_to_device_power_limit(|limit| println!("power limit: {limit}"))?;
//!     manager.subscribe_to_node_status(|node_type, addr, status| {
//!         println!("{node_type}/{addr}: {status}");
//!     })?;
//!
//!     // Runs until cancelled through `manager.handle()`
//!     manager.run().await
//! }
//! ```

pub mod error;
pub mod event;
pub mod manager;
pub mod protocol;
pub mod selector;
pub mod session;
pub mod subscription;
pub mod types;

pub use error::{Error, ParseError, ProtocolError, Result, SelectorError, ValueError};
pub use event::{EventBus, PipelineEvent};
pub use manager::UpdateManager;
pub use selector::Selector;
pub use session::{ConnectionSession, ReconnectionPolicy, SessionConfig, SessionHandle, SessionState};
pub use subscription::{DeltaMatch, DeltaSubscription, SnapshotSubscription, SubscriptionId, UpdateRouter};
pub use types::{Delta, Device, Node};
