// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Error types for the smartbox library.
//!
//! Failures are grouped by where they originate: selector compilation,
//! transport and REST communication, payload parsing, and request
//! validation. Non-matches (a selector resolving to nothing, a route pattern
//! not matching a delta path) are never errors.

use thiserror::Error;

/// The main error type for this library.
#[derive(Debug, Error)]
pub enum Error {
    /// A path selector could not be compiled.
    #[error("selector error: {0}")]
    Selector(#[from] SelectorError),

    /// A route pattern is not a valid regular expression.
    #[error("invalid route pattern: {0}")]
    Pattern(#[from] regex::Error),

    /// Error occurred during protocol communication.
    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    /// Error occurred while parsing a payload.
    #[error("parse error: {0}")]
    Parse(#[from] ParseError),

    /// A request argument failed validation.
    #[error("value error: {0}")]
    Value(#[from] ValueError),
}

/// Errors raised while compiling a path selector such as `.foo[1].bar`.
///
/// Positions are byte offsets into the selector text.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SelectorError {
    /// The selector text is empty.
    #[error("selector is empty")]
    Empty,

    /// The selector does not start with the root `.`.
    #[error("selector must start with '.'")]
    MissingRoot,

    /// A `.` is not followed by a field name.
    #[error("empty segment at position {position}")]
    EmptySegment {
        /// Offset of the offending `.`.
        position: usize,
    },

    /// A `[` has no matching `]`, or a `]` appears without a `[`.
    #[error("unbalanced bracket at position {position}")]
    UnbalancedBracket {
        /// Offset of the offending bracket.
        position: usize,
    },

    /// The text between brackets is not a non-negative integer.
    #[error("invalid index '{text}' at position {position}")]
    InvalidIndex {
        /// Offset of the opening bracket.
        position: usize,
        /// The text found between the brackets.
        text: String,
    },

    /// A character that cannot appear in a field name.
    #[error("unexpected character '{character}' at position {position}")]
    UnexpectedCharacter {
        /// Offset of the character.
        position: usize,
        /// The character itself.
        character: char,
    },
}

/// Errors related to transport and REST communication.
#[derive(Debug, Error)]
pub enum ProtocolError {
    /// HTTP request failed.
    #[cfg(feature = "http")]
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// WebSocket connection or communication failed.
    #[cfg(feature = "websocket")]
    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    /// Connection to the service failed.
    #[error("connection failed: {0}")]
    ConnectionFailed(String),

    /// Request timed out.
    #[error("request timed out after {0} ms")]
    Timeout(u64),

    /// Invalid URL or address.
    #[error("invalid address: {0}")]
    InvalidAddress(String),

    /// The service rejected the credentials.
    #[error("authentication failed")]
    AuthenticationFailed,

    /// An operation needed an established connection.
    #[error("transport is not connected")]
    NotConnected,

    /// The reconnection policy gave up.
    #[error("gave up reconnecting after {attempts} attempts")]
    ReconnectExhausted {
        /// Number of consecutive failed attempts.
        attempts: u32,
    },
}

/// Errors related to parsing service payloads.
#[derive(Debug, Error)]
pub enum ParseError {
    /// JSON parsing failed.
    #[error("JSON parse error: {0}")]
    Json(#[from] serde_json::Error),

    /// Expected field is missing from the payload.
    #[error("missing field in payload: {0}")]
    MissingField(String),

    /// Unexpected payload format.
    #[error("unexpected payload format: {0}")]
    UnexpectedFormat(String),

    /// A transport frame could not be decoded.
    #[error("invalid packet: {0}")]
    InvalidPacket(String),
}

/// Errors related to request validation.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ValueError {
    /// A target temperature was given without its units.
    #[error("must supply units with temperature fields")]
    MissingUnits,
}

/// A specialized Result type for this library.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn selector_error_display() {
        let err = SelectorError::InvalidIndex {
            position: 4,
            text: "x".to_string(),
        };
        assert_eq!(err.to_string(), "invalid index 'x' at position 4");
    }

    #[test]
    fn error_from_selector_error() {
        let err: Error = SelectorError::Empty.into();
        assert!(matches!(err, Error::Selector(SelectorError::Empty)));
    }

    #[test]
    fn parse_error_display() {
        let err = ParseError::MissingField("path".to_string());
        assert_eq!(err.to_string(), "missing field in payload: path");
    }

    #[test]
    fn reconnect_exhausted_display() {
        let err = ProtocolError::ReconnectExhausted { attempts: 3 };
        assert_eq!(err.to_string(), "gave up reconnecting after 3 attempts");
    }

    #[test]
    fn value_error_display() {
        assert_eq!(
            ValueError::MissingUnits.to_string(),
            "must supply units with temperature fields"
        );
    }
}
