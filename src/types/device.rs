// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Devices and nodes as returned by the REST API.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// A smartbox registered to the account.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Device {
    /// Device identifier used in every per-device route.
    pub dev_id: String,
    /// User-facing name.
    pub name: String,
    /// Fields this library does not interpret.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// A node (heater, accumulator, thermostat, ...) attached to a device.
///
/// # Examples
///
/// ```
/// use smartbox::types::Node;
///
/// let node: Node = serde_json::from_str(r#"{"addr": 1, "name": "My Heater", "type": "htr"}"#).unwrap();
/// assert_eq!(node.route("status"), "htr/1/status");
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Node {
    /// Address of the node on its device.
    pub addr: u32,
    /// User-facing name.
    #[serde(default)]
    pub name: String,
    /// Node type, e.g. `htr` or `acm`.
    #[serde(rename = "type")]
    pub node_type: String,
}

impl Node {
    /// Returns the relative route `<type>/<addr>/<resource>` for this node.
    #[must_use]
    pub fn route(&self, resource: &str) -> String {
        format!("{}/{}/{resource}", self.node_type, self.addr)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn device_keeps_unknown_fields() {
        let device: Device =
            serde_json::from_str(r#"{"dev_id": "abc", "name": "Home", "product_id": "x"}"#)
                .unwrap();
        assert_eq!(device.dev_id, "abc");
        assert_eq!(device.extra.get("product_id"), Some(&Value::from("x")));
    }

    #[test]
    fn node_route() {
        let node = Node {
            addr: 2,
            name: "Landing".to_string(),
            node_type: "acm".to_string(),
        };
        assert_eq!(node.route("setup"), "acm/2/setup");
    }
}
