// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Request bodies for status and away-status changes.
//!
//! Only the fields that are set are sent; unset fields keep their current
//! value on the device.

use serde::Serialize;

use crate::error::ValueError;

/// Changes to a node's status.
///
/// # Examples
///
/// ```
/// use smartbox::types::StatusUpdate;
///
/// let update = StatusUpdate::new().with_mode("auto").with_stemp("16.0", "C");
/// assert!(update.validate().is_ok());
/// assert_eq!(
///     serde_json::to_string(&update).unwrap(),
///     r#"{"mode":"auto","stemp":"16.0","units":"C"}"#
/// );
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct StatusUpdate {
    /// Operating mode, e.g. `auto`, `manual`, `off`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mode: Option<String>,
    /// Target temperature, as the service formats it (`"16.0"`).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stemp: Option<String>,
    /// Temperature units (`C` or `F`); required together with `stemp`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub units: Option<String>,
    /// Whether the node's local controls are locked.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub locked: Option<bool>,
}

impl StatusUpdate {
    /// Creates an empty update.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the operating mode.
    #[must_use]
    pub fn with_mode(mut self, mode: impl Into<String>) -> Self {
        self.mode = Some(mode.into());
        self
    }

    /// Sets the target temperature together with its units.
    #[must_use]
    pub fn with_stemp(mut self, stemp: impl Into<String>, units: impl Into<String>) -> Self {
        self.stemp = Some(stemp.into());
        self.units = Some(units.into());
        self
    }

    /// Sets the lock state.
    #[must_use]
    pub fn with_locked(mut self, locked: bool) -> Self {
        self.locked = Some(locked);
        self
    }

    /// Checks that the update can be sent.
    ///
    /// # Errors
    ///
    /// Returns `ValueError::MissingUnits` if `stemp` is set without `units`.
    pub fn validate(&self) -> Result<(), ValueError> {
        if self.stemp.is_some() && self.units.is_none() {
            return Err(ValueError::MissingUnits);
        }
        Ok(())
    }
}

/// Changes to a device's away status.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct AwayStatusUpdate {
    /// Whether the device is in away mode.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub away: Option<bool>,
    /// Whether automatic away detection is enabled.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub enabled: Option<bool>,
    /// Whether away mode is forced on.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub forced: Option<bool>,
}

impl AwayStatusUpdate {
    /// Creates an empty update.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets away mode.
    #[must_use]
    pub fn with_away(mut self, away: bool) -> Self {
        self.away = Some(away);
        self
    }

    /// Sets automatic away detection.
    #[must_use]
    pub fn with_enabled(mut self, enabled: bool) -> Self {
        self.enabled = Some(enabled);
        self
    }

    /// Sets forced away mode.
    #[must_use]
    pub fn with_forced(mut self, forced: bool) -> Self {
        self.forced = Some(forced);
        self
    }
}
