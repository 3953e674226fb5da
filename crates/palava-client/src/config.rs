//! Client configuration

use crate::connection::{BackendAddress, ConnectStrategy, parse_backend_list};
use crate::error::Result;
use crate::session::SESSION_COOKIE_NAME;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Default bound on a single connection attempt
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(3);

/// Default bound on a single socket read
pub const DEFAULT_READ_TIMEOUT: Duration = Duration::from_secs(30);

/// Settings for [`crate::ClientBuilder`]
///
/// # Example
///
/// ```
/// use palava_client::{ClientConfig, ConnectStrategy};
/// use std::time::Duration;
///
/// let config = ClientConfig::new("10.0.0.1:2323;10.0.0.2:2323")
///     .unwrap()
///     .with_strategy(ConnectStrategy::Linear)
///     .with_read_timeout(Duration::from_secs(5));
/// assert_eq!(config.backends.len(), 2);
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClientConfig {
    /// Equivalent backends, tried according to `strategy`
    pub backends: Vec<BackendAddress>,

    /// Backend selection order
    pub strategy: ConnectStrategy,

    /// Bound on each connection attempt
    pub connect_timeout: Duration,

    /// Bound on each individual read from the backend
    pub read_timeout: Duration,

    /// Name under which the caller's web layer carries the session token
    pub session_name: String,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            backends: Vec::new(),
            strategy: ConnectStrategy::default(),
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            read_timeout: DEFAULT_READ_TIMEOUT,
            session_name: SESSION_COOKIE_NAME.to_string(),
        }
    }
}

impl ClientConfig {
    /// Configuration for a `;`-separated backend list
    pub fn new(backends: &str) -> Result<Self> {
        Ok(Self {
            backends: parse_backend_list(backends)?,
            ..Self::default()
        })
    }

    /// Set the selection strategy
    #[must_use]
    pub fn with_strategy(mut self, strategy: ConnectStrategy) -> Self {
        self.strategy = strategy;
        self
    }

    /// Set the per-attempt connect timeout
    #[must_use]
    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Set the per-read timeout
    #[must_use]
    pub fn with_read_timeout(mut self, timeout: Duration) -> Self {
        self.read_timeout = timeout;
        self
    }

    /// Set the session carrier name
    #[must_use]
    pub fn with_session_name(mut self, name: impl Into<String>) -> Self {
        self.session_name = name.into();
        self
    }

    /// Create configuration from environment variables
    ///
    /// Reads `PALAVA_BACKENDS`, `PALAVA_CONNECT_STRATEGY`,
    /// `PALAVA_CONNECT_TIMEOUT` and `PALAVA_READ_TIMEOUT` (seconds) and
    /// `PALAVA_SESSION_NAME`. Unset variables keep their defaults.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let defaults = Self::default();
        let seconds = |key: &str, default: Duration| {
            lookup(key)
                .and_then(|value| value.trim().parse::<u64>().ok())
                .map_or(default, Duration::from_secs)
        };

        Ok(Self {
            backends: lookup("PALAVA_BACKENDS")
                .map(|list| parse_backend_list(&list))
                .transpose()?
                .unwrap_or_default(),
            strategy: lookup("PALAVA_CONNECT_STRATEGY")
                .map(|name| name.parse())
                .transpose()?
                .unwrap_or(defaults.strategy),
            connect_timeout: seconds("PALAVA_CONNECT_TIMEOUT", defaults.connect_timeout),
            read_timeout: seconds("PALAVA_READ_TIMEOUT", defaults.read_timeout),
            session_name: lookup("PALAVA_SESSION_NAME").unwrap_or(defaults.session_name),
        })
    }
}
