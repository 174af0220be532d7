// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Access-token state and the credential collaborator contract.

use std::future::Future;
use std::sync::Arc;

use chrono::{DateTime, TimeDelta, Utc};

use crate::error::Error;

/// Tokens with less than this many seconds left are treated as expired.
pub const MIN_TOKEN_LIFETIME_SECS: i64 = 60;

/// Credential collaborator consumed by the connection session.
///
/// The session only reads the current token and asks for a refresh; the
/// provider owns the token store.
pub trait TokenProvider: Send + Sync {
    /// Base URL of the service, e.g. `https://api.example.com`.
    fn api_host(&self) -> String;

    /// Returns the current access token.
    fn access_token(&self) -> String;

    /// Returns `true` if the access token is expired or about to expire.
    fn has_token_expired(&self) -> bool;

    /// Refreshes the access token if it has expired.
    ///
    /// Must be a no-op when the token is still valid.
    ///
    /// # Errors
    ///
    /// Returns an error if the refresh request fails; the session treats
    /// this as fatal.
    fn refresh_if_needed(&self) -> impl Future<Output = Result<(), Error>> + Send;
}

impl<P: TokenProvider> TokenProvider for Arc<P> {
    fn api_host(&self) -> String {
        (**self).api_host()
    }

    fn access_token(&self) -> String {
        (**self).access_token()
    }

    fn has_token_expired(&self) -> bool {
        (**self).has_token_expired()
    }

    fn refresh_if_needed(&self) -> impl Future<Output = Result<(), Error>> + Send {
        (**self).refresh_if_needed()
    }
}

/// An access/refresh token pair with its expiry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenState {
    /// Bearer token for REST calls and the event connection.
    pub access_token: String,
    /// Token exchanged for a new access token.
    pub refresh_token: String,
    /// When the access token expires.
    pub expires_at: DateTime<Utc>,
}

impl TokenState {
    /// Creates a token state expiring `expires_in` seconds after `now`.
    #[must_use]
    pub fn new(
        access_token: impl Into<String>,
        refresh_token: impl Into<String>,
        expires_in: i64,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            access_token: access_token.into(),
            refresh_token: refresh_token.into(),
            expires_at: now + TimeDelta::seconds(expires_in),
        }
    }

    /// Returns `true` if fewer than [`MIN_TOKEN_LIFETIME_SECS`] remain at `now`.
    #[must_use]
    pub fn has_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.expires_at - now < TimeDelta::seconds(MIN_TOKEN_LIFETIME_SECS)
    }

    /// Returns `true` if fewer than [`MIN_TOKEN_LIFETIME_SECS`] remain now.
    #[must_use]
    pub fn has_expired(&self) -> bool {
        self.has_expired_at(Utc::now())
    }
}
