// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Connection session configuration.

use std::time::Duration;

/// Configuration for a [`ConnectionSession`](super::ConnectionSession).
///
/// # Examples
///
/// ```
/// use std::time::Duration;
/// use smartbox::session::{ReconnectionPolicy, SessionConfig};
///
/// let config = SessionConfig::default()
///     .with_ping_interval(Duration::from_secs(30))
///     .with_reconnection(ReconnectionPolicy::new().with_max_retries(5))
///     .with_max_epochs(1);
/// assert_eq!(config.max_epochs, Some(1));
/// ```
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Interval between keep-alive messages on an established connection.
    pub ping_interval: Duration,
    /// Backoff applied after failed connection attempts.
    pub reconnection: ReconnectionPolicy,
    /// Number of connection epochs after which `run()` returns
    /// (None = run until cancelled).
    pub max_epochs: Option<u32>,
}

impl SessionConfig {
    /// Default keep-alive interval.
    pub const DEFAULT_PING_INTERVAL: Duration = Duration::from_secs(20);

    /// Creates a configuration with default settings.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the keep-alive interval. Zero is raised to one millisecond.
    #[must_use]
    pub fn with_ping_interval(mut self, interval: Duration) -> Self {
        self.ping_interval = interval;
        self
    }

    /// Sets the reconnection policy.
    #[must_use]
    pub fn with_reconnection(mut self, policy: ReconnectionPolicy) -> Self {
        self.reconnection = policy;
        self
    }

    /// Makes `run()` return after `epochs` connect/stream/disconnect cycles.
    #[must_use]
    pub fn with_max_epochs(mut self, epochs: u32) -> Self {
        self.max_epochs = Some(epochs);
        self
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            ping_interval: Self::DEFAULT_PING_INTERVAL,
            reconnection: ReconnectionPolicy::default(),
            max_epochs: None,
        }
    }
}

/// Backoff between failed connection attempts.
///
/// Only failed `connect` calls count as attempts; a connection that drops
/// after being established is reopened immediately and resets the count.
///
/// # Examples
///
/// ```
/// use std::time::Duration;
/// use smartbox::session::ReconnectionPolicy;
///
/// // Default policy (unlimited retries with exponential backoff)
/// let policy = ReconnectionPolicy::default();
/// assert!(policy.should_retry(1_000));
///
/// // Give up after the first failure
/// let policy = ReconnectionPolicy::disabled();
/// assert!(!policy.should_retry(1));
///
/// // Custom policy
/// let policy = ReconnectionPolicy::new()
///     .with_max_retries(5)
///     .with_initial_delay(Duration::from_millis(500))
///     .with_max_delay(Duration::from_secs(30));
/// assert_eq!(policy.delay_for_attempt(1), Duration::from_secs(1));
/// ```
#[derive(Debug, Clone)]
pub struct ReconnectionPolicy {
    /// Whether failed connection attempts are retried.
    pub enabled: bool,
    /// Maximum consecutive failed attempts before giving up (None = infinite).
    pub max_retries: Option<u32>,
    /// Delay after the first failed attempt.
    pub initial_delay: Duration,
    /// Upper bound on the delay.
    pub max_delay: Duration,
    /// Multiplier applied per further failed attempt.
    pub backoff_multiplier: f32,
}

impl ReconnectionPolicy {
    /// Creates a new reconnection policy with default settings.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a policy that gives up after the first failed attempt.
    #[must_use]
    pub fn disabled() -> Self {
        Self {
            enabled: false,
            ..Self::default()
        }
    }

    /// Sets the maximum number of consecutive failed attempts.
    #[must_use]
    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = Some(max_retries);
        self
    }

    /// Sets infinite retries.
    #[must_use]
    pub fn with_infinite_retries(mut self) -> Self {
        self.max_retries = None;
        self
    }

    /// Sets the delay after the first failed attempt.
    #[must_use]
    pub fn with_initial_delay(mut self, delay: Duration) -> Self {
        self.initial_delay = delay;
        self
    }

    /// Sets the maximum delay.
    #[must_use]
    pub fn with_max_delay(mut self, delay: Duration) -> Self {
        self.max_delay = delay;
        self
    }

    /// Sets the backoff multiplier.
    #[must_use]
    pub fn with_backoff_multiplier(mut self, multiplier: f32) -> Self {
        self.backoff_multiplier = multiplier;
        self
    }

    /// Calculates the delay for a given retry attempt (zero-based).
    #[must_use]
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        if attempt == 0 {
            return self.initial_delay.min(self.max_delay);
        }

        let multiplier = self
            .backoff_multiplier
            .powi(i32::try_from(attempt).unwrap_or(i32::MAX));

        #[allow(clippy::cast_precision_loss)]
        let delay_ms = self.initial_delay.as_millis() as f32 * multiplier;

        // Saturates on overflow; negative and NaN become zero
        #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
        let delay = Duration::from_millis(delay_ms as u64);

        delay.min(self.max_delay)
    }

    /// Returns true if another attempt should follow `failures` consecutive
    /// failed attempts.
    #[must_use]
    pub fn should_retry(&self, failures: u32) -> bool {
        self.enabled && self.max_retries.is_none_or(|max| failures <= max)
    }
}

impl Default for ReconnectionPolicy {
    fn default() -> Self {
        Self {
            enabled: true,
            max_retries: None,
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(60),
            backoff_multiplier: 2.0,
        }
    }
}
