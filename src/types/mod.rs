// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Value types for smartbox devices and their update stream.
//!
//! # Types
//!
//! - [`Delta`] - A single `{path, body}` change event from the update stream
//! - [`Device`] - A smartbox as listed by the REST API
//! - [`Node`] - A heater, thermostat, or other node attached to a device
//! - [`StatusUpdate`] - Fields to change on a node's status
//! - [`AwayStatusUpdate`] - Fields to change on a device's away status

mod delta;
mod device;
mod update;

pub use delta::Delta;
pub use device::{Device, Node};
pub use update::{AwayStatusUpdate, StatusUpdate};
