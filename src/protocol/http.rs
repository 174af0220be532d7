// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! REST client for the smartbox cloud API.
//!
//! [`ApiSession`] owns the OAuth token pair: it logs in with a password
//! grant, refreshes before each request when the access token is about to
//! expire, and hands the current token to the update session through
//! [`TokenProvider`].

use std::time::Duration;

use chrono::Utc;
use parking_lot::RwLock;
use reqwest::header::{AUTHORIZATION, CONTENT_TYPE};
use reqwest::{Client, RequestBuilder, Response, StatusCode};
use serde::Deserialize;
use serde::de::DeserializeOwned;
use serde_json::{Map, Value};

use super::token::{MIN_TOKEN_LIFETIME_SECS, TokenProvider, TokenState};
use crate::error::{Error, ParseError, ProtocolError};
use crate::types::{AwayStatusUpdate, Device, Node, StatusUpdate};

/// Serial id header the service expects on API calls.
const SERIAL_ID_HEADER: &str = "x-serialid";
const SERIAL_ID: &str = "5";

/// Configuration for the REST API.
///
/// # Examples
///
/// ```
/// use smartbox::protocol::HttpConfig;
/// use std::time::Duration;
///
/// let config = HttpConfig::new("api-foo", "YmFzaWM6YXV0aA==");
/// assert_eq!(config.base_url(), "https://api-foo.helki.com");
///
/// // Point at a test server
/// let config = HttpConfig::new("api-foo", "YmFzaWM6YXV0aA==")
///     .with_base_url("http://127.0.0.1:8080")
///     .with_timeout(Duration::from_secs(5));
/// assert_eq!(config.base_url(), "http://127.0.0.1:8080");
/// ```
#[derive(Debug, Clone)]
pub struct HttpConfig {
    api_name: String,
    basic_auth_credentials: String,
    base_url: String,
    timeout: Duration,
}

impl HttpConfig {
    /// Default request timeout.
    pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

    /// Creates a configuration for the named API deployment.
    ///
    /// `basic_auth_credentials` is the base64 client credential sent when
    /// requesting tokens.
    #[must_use]
    pub fn new(api_name: impl Into<String>, basic_auth_credentials: impl Into<String>) -> Self {
        let api_name = api_name.into();
        let base_url = format!("https://{api_name}.helki.com");
        Self {
            api_name,
            basic_auth_credentials: basic_auth_credentials.into(),
            base_url,
            timeout: Self::DEFAULT_TIMEOUT,
        }
    }

    /// Overrides the base URL derived from the API name.
    #[must_use]
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    /// Sets the request timeout.
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Returns the API name.
    #[must_use]
    pub fn api_name(&self) -> &str {
        &self.api_name
    }

    /// Returns the base URL.
    #[must_use]
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Returns the timeout.
    #[must_use]
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    fn build_client(&self) -> Result<Client, ProtocolError> {
        Client::builder()
            .timeout(self.timeout)
            .build()
            .map_err(ProtocolError::Http)
    }
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    refresh_token: String,
    expires_in: i64,
}

#[derive(Debug, Deserialize)]
struct DevicesResponse {
    devs: Vec<Device>,
}

#[derive(Debug, Deserialize)]
struct NodesResponse {
    nodes: Vec<Node>,
}

/// Authenticated REST session.
///
/// # Examples
///
/// ```no_run
/// use smartbox::protocol::{ApiSession, HttpConfig};
///
/// # async fn example() -> smartbox::Result<()> {
/// let config = HttpConfig::new("api-foo", "YmFzaWM6YXV0aA==");
/// let session = ApiSession::login(config, "user@example.com", "secret").await?;
/// for device in session.get_devices().await? {
///     println!("{}: {}", device.dev_id, device.name);
/// }
/// # Ok(())
/// # }
/// ```
#[derive(Debug)]
pub struct ApiSession {
    config: HttpConfig,
    client: Client,
    tokens: RwLock<TokenState>,
    refresh_lock: tokio::sync::Mutex<()>,
}

impl ApiSession {
    /// Logs in with a username and password.
    ///
    /// # Errors
    ///
    /// Returns `ProtocolError::AuthenticationFailed` if the service rejects
    /// the credentials, or another error if the request fails.
    pub async fn login(
        config: HttpConfig,
        username: &str,
        password: &str,
    ) -> Result<Self, Error> {
        let client = config.build_client()?;
        let tokens = request_token(
            &client,
            &config,
            &[
                ("grant_type", "password"),
                ("username", username),
                ("password", password),
            ],
        )
        .await?;

        Ok(Self {
            config,
            client,
            tokens: RwLock::new(tokens),
            refresh_lock: tokio::sync::Mutex::new(()),
        })
    }

    /// Returns the configuration.
    #[must_use]
    pub fn config(&self) -> &HttpConfig {
        &self.config
    }

    /// Returns the API name.
    #[must_use]
    pub fn api_name(&self) -> &str {
        self.config.api_name()
    }

    /// Returns a copy of the current token state.
    #[must_use]
    pub fn token_state(&self) -> TokenState {
        self.tokens.read().clone()
    }

    /// Returns the current refresh token.
    #[must_use]
    pub fn refresh_token(&self) -> String {
        self.tokens.read().refresh_token.clone()
    }

    /// Returns when the current access token expires.
    #[must_use]
    pub fn expires_at(&self) -> chrono::DateTime<Utc> {
        self.tokens.read().expires_at
    }

    /// Exchanges the refresh token for a new token pair if the access token
    /// is about to expire.
    ///
    /// Concurrent callers share one refresh request.
    ///
    /// # Errors
    ///
    /// Returns an error if the refresh request fails.
    pub async fn check_refresh(&self) -> Result<(), Error> {
        if !self.has_token_expired() {
            return Ok(());
        }

        let _guard = self.refresh_lock.lock().await;
        if !self.has_token_expired() {
            // Another caller refreshed while we waited
            return Ok(());
        }

        let refresh_token = self.refresh_token();
        let tokens = request_token(
            &self.client,
            &self.config,
            &[
                ("grant_type", "refresh_token"),
                ("refresh_token", refresh_token.as_str()),
            ],
        )
        .await?;
        *self.tokens.write() = tokens;
        Ok(())
    }

    fn api_url(&self, path: &str) -> String {
        format!("{}/api/v2/{path}", self.config.base_url())
    }

    fn authorized(&self, request: RequestBuilder) -> RequestBuilder {
        let token = self.tokens.read().access_token.clone();
        request
            .header(AUTHORIZATION, format!("Bearer {token}"))
            .header(CONTENT_TYPE, "application/json")
            .header(SERIAL_ID_HEADER, SERIAL_ID)
    }

    async fn api_get<T: DeserializeOwned>(&self, path: &str) -> Result<T, Error> {
        self.check_refresh().await?;
        let url = self.api_url(path);
        tracing::debug!(url = %url, "GET");

        let response = self
            .authorized(self.client.get(&url))
            .send()
            .await
            .map_err(ProtocolError::Http)?;
        read_json(response).await
    }

    async fn api_post<T: DeserializeOwned>(&self, path: &str, body: &Value) -> Result<T, Error> {
        self.check_refresh().await?;
        let url = self.api_url(path);
        tracing::debug!(url = %url, body = %body, "POST");

        let response = self
            .authorized(self.client.post(&url))
            .body(body.to_string())
            .send()
            .await
            .map_err(ProtocolError::Http)?;
        read_json(response).await
    }

    /// Lists the devices registered to the account.
    ///
    /// # Errors
    ///
    /// Returns an error if the request fails or the response is malformed.
    pub async fn get_devices(&self) -> Result<Vec<Device>, Error> {
        let response: DevicesResponse = self.api_get("devs").await?;
        Ok(response.devs)
    }

    /// Returns devices grouped as in the vendor app.
    ///
    /// # Errors
    ///
    /// Returns an error if the request fails.
    pub async fn get_grouped_devices(&self) -> Result<Value, Error> {
        self.api_get("grouped_devs").await
    }

    /// Lists the nodes attached to a device.
    ///
    /// # Errors
    ///
    /// Returns an error if the request fails or the response is malformed.
    pub async fn get_nodes(&self, device_id: &str) -> Result<Vec<Node>, Error> {
        let response: NodesResponse = self.api_get(&format!("devs/{device_id}/mgr/nodes")).await?;
        Ok(response.nodes)
    }

    /// Returns a node's status.
    ///
    /// # Errors
    ///
    /// Returns an error if the request fails.
    pub async fn get_status(&self, device_id: &str, node: &Node) -> Result<Value, Error> {
        self.api_get(&format!("devs/{device_id}/{}", node.route("status")))
            .await
    }

    /// Changes a node's status.
    ///
    /// # Errors
    ///
    /// Returns `ValueError::MissingUnits` if a temperature is given without
    /// units, or an error if the request fails.
    pub async fn set_status(
        &self,
        device_id: &str,
        node: &Node,
        update: &StatusUpdate,
    ) -> Result<Value, Error> {
        update.validate()?;
        let body = serde_json::to_value(update).map_err(ParseError::Json)?;
        self.api_post(&format!("devs/{device_id}/{}", node.route("status")), &body)
            .await
    }

    /// Returns a node's setup.
    ///
    /// # Errors
    ///
    /// Returns an error if the request fails.
    pub async fn get_setup(&self, device_id: &str, node: &Node) -> Result<Value, Error> {
        self.api_get(&format!("devs/{device_id}/{}", node.route("setup")))
            .await
    }

    /// Changes fields of a node's setup.
    ///
    /// The service expects the complete setup, so the current setup is read
    /// first and `changes` merged over it. `null` values in `changes` are
    /// skipped.
    ///
    /// # Errors
    ///
    /// Returns `ParseError::UnexpectedFormat` if the current setup is not an
    /// object, or an error if either request fails.
    pub async fn set_setup(
        &self,
        device_id: &str,
        node: &Node,
        changes: &Map<String, Value>,
    ) -> Result<Value, Error> {
        let current = self.get_setup(device_id, node).await?;
        let Value::Object(mut setup) = current else {
            return Err(ParseError::UnexpectedFormat(format!(
                "setup for {} is not an object",
                node.route("setup")
            ))
            .into());
        };
        for (key, value) in changes.iter().filter(|(_, value)| !value.is_null()) {
            setup.insert(key.clone(), value.clone());
        }
        self.api_post(
            &format!("devs/{device_id}/{}", node.route("setup")),
            &Value::Object(setup),
        )
        .await
    }

    /// Returns a device's away status.
    ///
    /// # Errors
    ///
    /// Returns an error if the request fails.
    pub async fn get_device_away_status(&self, device_id: &str) -> Result<Value, Error> {
        self.api_get(&format!("devs/{device_id}/mgr/away_status"))
            .await
    }

    /// Changes a device's away status.
    ///
    /// # Errors
    ///
    /// Returns an error if the request fails.
    pub async fn set_device_away_status(
        &self,
        device_id: &str,
        update: &AwayStatusUpdate,
    ) -> Result<Value, Error> {
        let body = serde_json::to_value(update).map_err(ParseError::Json)?;
        self.api_post(&format!("devs/{device_id}/mgr/away_status"), &body)
            .await
    }
}

impl TokenProvider for ApiSession {
    fn api_host(&self) -> String {
        self.config.base_url().to_string()
    }

    fn access_token(&self) -> String {
        self.tokens.read().access_token.clone()
    }

    fn has_token_expired(&self) -> bool {
        self.tokens.read().has_expired()
    }

    async fn refresh_if_needed(&self) -> Result<(), Error> {
        self.check_refresh().await
    }
}

async fn request_token(
    client: &Client,
    config: &HttpConfig,
    form: &[(&str, &str)],
) -> Result<TokenState, Error> {
    let grant_type = form
        .iter()
        .find_map(|(key, value)| (*key == "grant_type").then_some(*value))
        .unwrap_or("unknown");
    let url = format!("{}/client/token", config.base_url());

    let response = client
        .post(&url)
        .header(
            AUTHORIZATION,
            format!("Basic {}", config.basic_auth_credentials),
        )
        .form(form)
        .send()
        .await
        .map_err(ProtocolError::Http)?;
    let token: TokenResponse = read_json(response).await?;

    if token.expires_in < MIN_TOKEN_LIFETIME_SECS {
        tracing::warn!(
            expires_in = token.expires_in,
            min_lifetime = MIN_TOKEN_LIFETIME_SECS,
            "Token lifetime is below minimum, will refresh again on next operation"
        );
    }

    let state = TokenState::new(
        token.access_token,
        token.refresh_token,
        token.expires_in,
        Utc::now(),
    );
    tracing::debug!(grant_type, expires_at = %state.expires_at, "Authenticated session");
    Ok(state)
}

async fn read_json<T: DeserializeOwned>(response: Response) -> Result<T, Error> {
    let status = response.status();
    if status == StatusCode::UNAUTHORIZED {
        return Err(ProtocolError::AuthenticationFailed.into());
    }
    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        tracing::error!(status = status.as_u16(), body = %body, "API request failed");
        return Err(ProtocolError::ConnectionFailed(format!(
            "HTTP {} - {}",
            status.as_u16(),
            status.canonical_reason().unwrap_or("Unknown")
        ))
        .into());
    }

    let body = response.text().await.map_err(ProtocolError::Http)?;
    tracing::trace!(body = %body, "Received API response");
    Ok(serde_json::from_str(&body).map_err(ParseError::Json)?)
}
