// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Observability events for the update pipeline.
//!
//! Besides `tracing` output, the pipeline publishes [`PipelineEvent`]s on an
//! [`EventBus`] so that callers (and tests) can observe state transitions,
//! dropped deltas, and deltas no subscription was interested in.
//!
//! # Examples
//!
//! ```
//! use smartbox::event::{EventBus, PipelineEvent};
//!
//! let bus = EventBus::new();
//! let mut rx = bus.subscribe();
//!
//! bus.publish(PipelineEvent::DeltaDropped { path: "/htr/1/status".to_string() });
//! assert!(matches!(rx.try_recv(), Ok(PipelineEvent::DeltaDropped { .. })));
//! ```

mod event_bus;
mod pipeline_event;

pub use event_bus::EventBus;
pub use pipeline_event::PipelineEvent;
