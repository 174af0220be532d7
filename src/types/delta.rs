// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Delta records from the update stream.

use serde_json::{Value, json};

use crate::error::ParseError;

/// A single change event, structurally `{ path, body }`.
///
/// `path` is a slash-delimited route such as `/htr/1/status`; `body` is the
/// new value at that route. The full record is kept so that selectors can be
/// evaluated against it (`.body.mtemp`, `.path`).
///
/// # Examples
///
/// ```
/// use serde_json::json;
/// use smartbox::types::Delta;
///
/// let delta = Delta::new("/htr/1/status", json!({"mtemp": "19.5"}));
/// assert_eq!(delta.path(), "/htr/1/status");
/// assert_eq!(delta.body(), Some(&json!({"mtemp": "19.5"})));
/// ```
#[derive(Debug, Clone, PartialEq)]
pub struct Delta {
    path: String,
    record: Value,
}

impl Delta {
    /// Creates a delta from a route and body.
    #[must_use]
    pub fn new(path: impl Into<String>, body: Value) -> Self {
        let path = path.into();
        let record = json!({ "path": path, "body": body });
        Self { path, record }
    }

    /// Decodes a delta from a raw record.
    ///
    /// # Errors
    ///
    /// Returns `ParseError::MissingField` if the record has no string `path`.
    pub fn from_value(record: Value) -> Result<Self, ParseError> {
        let path = record
            .get("path")
            .and_then(Value::as_str)
            .ok_or_else(|| ParseError::MissingField("path".to_string()))?
            .to_string();
        Ok(Self { path, record })
    }

    /// Returns the route of this delta.
    #[must_use]
    pub fn path(&self) -> &str {
        &self.path
    }

    /// Returns the body, if the record carries one.
    #[must_use]
    pub fn body(&self) -> Option<&Value> {
        self.record.get("body")
    }

    /// Returns the whole `{path, body}` record.
    #[must_use]
    pub fn record(&self) -> &Value {
        &self.record
    }
}

impl TryFrom<Value> for Delta {
    type Error = ParseError;

    fn try_from(value: Value) -> Result<Self, Self::Error> {
        Self::from_value(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn from_value_keeps_record() {
        let record = json!({"path": "/mgr/away_status", "body": {"away": true}, "extra": 1});
        let delta = Delta::from_value(record.clone()).unwrap();
        assert_eq!(delta.path(), "/mgr/away_status");
        assert_eq!(delta.record(), &record);
    }

    #[test]
    fn from_value_requires_path() {
        let err = Delta::from_value(json!({"body": {}})).unwrap_err();
        assert!(matches!(err, ParseError::MissingField(field) if field == "path"));

        assert!(Delta::from_value(json!({"path": 3, "body": {}})).is_err());
    }

    #[test]
    fn missing_body() {
        let delta = Delta::from_value(json!({"path": "/x"})).unwrap();
        assert_eq!(delta.body(), None);
    }
}
